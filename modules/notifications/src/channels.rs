//! Delivery channels
//!
//! Providers (SMTP, SMS gateways, push services) plug in behind
//! [`NotificationChannel`]. The service ships with [`LogChannel`], which
//! writes the rendered message to the log.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Channel, Notification};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{channel} provider unavailable: {reason}")]
    Unavailable { channel: Channel, reason: String },

    #[error("{channel} rejected notification for user {user_id}: {reason}")]
    Rejected {
        channel: Channel,
        user_id: i64,
        reason: String,
    },
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel(&self) -> Channel;

    /// Send one notification, returning the provider's message id
    async fn send(&self, notification: &Notification) -> Result<String, ChannelError>;
}

pub struct LogChannel {
    channel: Channel,
}

impl LogChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, notification: &Notification) -> Result<String, ChannelError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            channel = %self.channel,
            user_id = notification.user_id,
            kind = notification.kind.as_str(),
            subject = %notification.subject,
            message_id = %message_id,
            "Notification sent"
        );
        Ok(message_id)
    }
}
