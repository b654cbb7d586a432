//! Per-event notification templates

use event_bus::events::{
    AccountCreated, AlertTriggered, FraudDetected, PaymentFailed, TransactionCompleted,
    UserCreated,
};
use event_bus::{DomainEvent, EventEnvelope, EventError};
use rust_decimal::Decimal;

use crate::models::{Notification, NotificationKind};

/// Event types that produce a notification
pub const NOTIFIED_EVENT_TYPES: [&str; 6] = [
    UserCreated::EVENT_TYPE,
    AccountCreated::EVENT_TYPE,
    TransactionCompleted::EVENT_TYPE,
    PaymentFailed::EVENT_TYPE,
    FraudDetected::EVENT_TYPE,
    AlertTriggered::EVENT_TYPE,
];

fn money(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount.round_dp(2), currency)
}

/// Render the notification for an envelope
///
/// `Ok(None)` for event types that carry no notification. A payload that
/// does not match its event type fails with `InvalidPayload`.
pub fn render(envelope: &EventEnvelope) -> Result<Option<Notification>, EventError> {
    let notification = match envelope.event_type.as_str() {
        UserCreated::EVENT_TYPE => {
            let e: UserCreated = envelope.payload_as()?;
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::Welcome,
                subject: "Welcome to your bank".to_string(),
                body: format!(
                    "Hello {} {}, your profile {} is ready.",
                    e.first_name, e.last_name, e.username
                ),
            }
        }
        AccountCreated::EVENT_TYPE => {
            let e: AccountCreated = envelope.payload_as()?;
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::AccountCreated,
                subject: format!("Your {} account is open", e.account_type.to_lowercase()),
                body: format!(
                    "Account {} was opened with a balance of {}.",
                    e.account_number,
                    money(e.initial_balance, &e.currency)
                ),
            }
        }
        TransactionCompleted::EVENT_TYPE => {
            let e: TransactionCompleted = envelope.payload_as()?;
            let route = match (&e.from_account_number, &e.to_account_number) {
                (Some(from), Some(to)) => format!(" from {from} to {to}"),
                (Some(from), None) => format!(" from {from}"),
                (None, Some(to)) => format!(" to {to}"),
                (None, None) => String::new(),
            };
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::Transaction,
                subject: format!("{} of {}", title_case(&e.transaction_type), money(e.amount, &e.currency)),
                body: format!(
                    "Transaction {}{} is {}.",
                    e.transaction_id,
                    route,
                    e.status.to_lowercase()
                ),
            }
        }
        PaymentFailed::EVENT_TYPE => {
            let e: PaymentFailed = envelope.payload_as()?;
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::PaymentFailed,
                subject: format!("Payment of {} failed", money(e.amount, &e.currency)),
                body: format!("Transaction {} failed: {}.", e.transaction_id, e.failure_reason),
            }
        }
        FraudDetected::EVENT_TYPE => {
            let e: FraudDetected = envelope.payload_as()?;
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::FraudAlert,
                subject: format!("{} fraud alert", title_case(&e.severity)),
                body: format!(
                    "We blocked a suspicious {} of {} ({}). Contact us if this was not you.",
                    e.fraud_type.to_lowercase().replace('_', " "),
                    money(e.amount, &e.currency),
                    e.transaction_id
                ),
            }
        }
        AlertTriggered::EVENT_TYPE => {
            let e: AlertTriggered = envelope.payload_as()?;
            Notification {
                user_id: e.user_id,
                kind: NotificationKind::Alert,
                subject: format!("Account alert: {}", e.alert_type.to_lowercase().replace('_', " ")),
                body: format!(
                    "{} (threshold {}, current {}).",
                    e.message,
                    e.threshold.round_dp(2),
                    e.current_value.round_dp(2)
                ),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(notification))
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
