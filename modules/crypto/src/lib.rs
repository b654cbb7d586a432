pub mod consumer;
pub mod models;
pub mod repos;
pub mod services;

pub use consumer::build_registry;

pub const SERVICE_NAME: &str = "crypto-service";
