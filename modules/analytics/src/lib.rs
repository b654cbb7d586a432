pub mod config;
pub mod consumer;
pub mod metrics;
pub mod services;

pub use config::AnalyticsConfig;
pub use consumer::build_registry;

pub const SERVICE_NAME: &str = "analytics-service";
