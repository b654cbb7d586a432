//! # Notifications
//!
//! Turns banking events into user notifications: a template per event type,
//! per-user channel preferences, and delivery over [`NotificationChannel`]
//! implementations under the consumer's retry policy. Every successful
//! delivery is announced with `NotificationSent`.

pub mod channels;
pub mod consumer;
pub mod models;
pub mod preferences;
pub mod services;
pub mod templates;

pub use channels::{ChannelError, LogChannel, NotificationChannel};
pub use consumer::build_registry;

pub const SERVICE_NAME: &str = "notification-service";
