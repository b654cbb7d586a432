//! Payment service
//!
//! Validates payment requests against limits and compliance screening,
//! runs the fraud rules, and publishes `TransactionCompleted`,
//! `PaymentFailed` and `FraudDetected`. It consumes nothing.

pub mod models;
pub mod repos;
pub mod services;

pub const SERVICE_NAME: &str = "payment-service";
