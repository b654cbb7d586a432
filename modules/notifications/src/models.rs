use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CHANNELS AND KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Push => "PUSH",
            Channel::InApp => "IN_APP",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Welcome,
    AccountCreated,
    Transaction,
    PaymentFailed,
    FraudAlert,
    Alert,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 6] = [
        NotificationKind::Welcome,
        NotificationKind::AccountCreated,
        NotificationKind::Transaction,
        NotificationKind::PaymentFailed,
        NotificationKind::FraudAlert,
        NotificationKind::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Welcome => "WELCOME",
            NotificationKind::AccountCreated => "ACCOUNT_CREATED",
            NotificationKind::Transaction => "TRANSACTION",
            NotificationKind::PaymentFailed => "PAYMENT_FAILED",
            NotificationKind::FraudAlert => "FRAUD_ALERT",
            NotificationKind::Alert => "ALERT",
        }
    }
}

// ============================================================================
// RENDERED NOTIFICATIONS
// ============================================================================

/// A rendered message for one user, not yet bound to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
}

/// Successful send of one notification over one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub notification_id: String,
    pub channel: Channel,
    pub provider_message_id: String,
    pub sent_at: DateTime<Utc>,
    /// `NotificationSent` has been published
    pub announced: bool,
}
