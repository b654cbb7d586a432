//! User service
//!
//! Owns the user directory and publishes `UserCreated`, `UserUpdated`,
//! `KycUpdated` and `UserDeleted` on `user-events`. It consumes nothing.

pub mod models;
pub mod repos;
pub mod services;

pub const SERVICE_NAME: &str = "user-service";
