pub mod consumer;
pub mod models;
pub mod repos;

pub use consumer::build_registry;

pub const SERVICE_NAME: &str = "audit-service";
