pub mod consumer;
pub mod models;
pub mod repos;
pub mod services;

pub use consumer::build_registry;

/// Logical source name and default consumer group
pub const SERVICE_NAME: &str = "account-service";
