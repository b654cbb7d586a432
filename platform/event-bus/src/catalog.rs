//! # Event Catalog
//!
//! The static set of recognised event types: each `event_type` maps to a
//! payload schema (the Rust payload type) and to a transport topic. The
//! catalog is built once at process start and is read-only afterwards;
//! share it as `Arc<EventCatalog>`.
//!
//! Topic names can be overridden from a TOML file:
//!
//! ```toml
//! [topics]
//! AccountCreated = "staging.account.created"
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::events::{
    AccountCreated, AlertTriggered, BalanceUpdated, CryptoTradeExecuted, FraudDetected,
    KycUpdated, NotificationFailed, NotificationSent, PaymentFailed, TransactionCompleted,
    UserCreated, UserDeleted, UserUpdated,
};
use crate::{DomainEvent, EventError};

/// Transport topic names
pub mod topics {
    pub const USER_EVENTS: &str = "user-events";
    pub const ACCOUNT_CREATED: &str = "account.created";
    pub const BALANCE_UPDATED: &str = "balance.updated";
    pub const TRANSACTION_COMPLETED: &str = "transaction.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const FRAUD_DETECTED: &str = "fraud.detected";
    pub const CRYPTO_TRADE_EXECUTED: &str = "crypto.trade.executed";
    pub const ALERT_TRIGGERED: &str = "alert.triggered";
    pub const NOTIFICATION_SENT: &str = "notification.sent";
    pub const NOTIFICATION_FAILED: &str = "notification.failed";

    /// Dead-letter topic paired with a main topic
    pub fn dead_letter(topic: &str) -> String {
        format!("{topic}.dlq")
    }
}

type SchemaCheck = fn(&Value) -> Result<(), String>;

fn check_schema<E: DomainEvent>(payload: &Value) -> Result<(), String> {
    E::deserialize(payload).map(|_| ()).map_err(|e| e.to_string())
}

#[derive(Clone)]
struct CatalogEntry {
    topic: String,
    schema: SchemaCheck,
}

/// Immutable mapping of event types to payload schemas and topics
#[derive(Clone)]
pub struct EventCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl std::fmt::Debug for EventCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, &v.topic)))
            .finish()
    }
}

impl EventCatalog {
    pub fn builder() -> EventCatalogBuilder {
        EventCatalogBuilder::default()
    }

    /// Every banking event on its default topic
    pub fn banking_builder() -> EventCatalogBuilder {
        Self::builder()
            .event::<UserCreated>(topics::USER_EVENTS)
            .event::<UserUpdated>(topics::USER_EVENTS)
            .event::<UserDeleted>(topics::USER_EVENTS)
            .event::<KycUpdated>(topics::USER_EVENTS)
            .event::<AccountCreated>(topics::ACCOUNT_CREATED)
            .event::<BalanceUpdated>(topics::BALANCE_UPDATED)
            .event::<TransactionCompleted>(topics::TRANSACTION_COMPLETED)
            .event::<PaymentFailed>(topics::PAYMENT_FAILED)
            .event::<FraudDetected>(topics::FRAUD_DETECTED)
            .event::<CryptoTradeExecuted>(topics::CRYPTO_TRADE_EXECUTED)
            .event::<AlertTriggered>(topics::ALERT_TRIGGERED)
            .event::<NotificationSent>(topics::NOTIFICATION_SENT)
            .event::<NotificationFailed>(topics::NOTIFICATION_FAILED)
    }

    pub fn banking() -> Result<Self, EventError> {
        Self::banking_builder().build()
    }

    /// Resolve the transport topic for an event type
    pub fn topic_for(&self, event_type: &str) -> Result<&str, EventError> {
        self.entries
            .get(event_type)
            .map(|entry| entry.topic.as_str())
            .ok_or_else(|| EventError::UnknownEventType(event_type.to_string()))
    }

    /// Check a payload against the schema registered for `event_type`
    pub fn validate_payload(&self, event_type: &str, payload: &Value) -> Result<(), EventError> {
        let entry = self
            .entries
            .get(event_type)
            .ok_or_else(|| EventError::UnknownEventType(event_type.to_string()))?;

        (entry.schema)(payload).map_err(|reason| EventError::InvalidPayload {
            event_type: event_type.to_string(),
            reason,
        })
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Distinct topics in the catalog
    pub fn topics(&self) -> BTreeSet<&str> {
        self.entries.values().map(|e| e.topic.as_str()).collect()
    }

    /// Event types published on `topic`
    pub fn event_types_on<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.topic == topic)
            .map(|(event_type, _)| event_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct TopicOverrides {
    #[serde(default)]
    topics: BTreeMap<String, String>,
}

/// Collects catalog entries and validates them in [`build`](Self::build)
#[derive(Default)]
pub struct EventCatalogBuilder {
    entries: BTreeMap<String, CatalogEntry>,
    duplicates: Vec<String>,
    overrides: BTreeMap<String, String>,
    load_error: Option<EventError>,
}

impl EventCatalogBuilder {
    /// Register a payload type on a topic
    pub fn event<E: DomainEvent>(mut self, topic: &str) -> Self {
        let entry = CatalogEntry {
            topic: topic.to_string(),
            schema: check_schema::<E>,
        };
        if self
            .entries
            .insert(E::EVENT_TYPE.to_string(), entry)
            .is_some()
        {
            self.duplicates.push(E::EVENT_TYPE.to_string());
        }
        self
    }

    /// Replace the topic of already-registered event types
    pub fn with_topic_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Read `[topics]` overrides from a TOML file
    pub fn with_overrides_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| toml::from_str::<TopicOverrides>(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(file) => self.overrides.extend(file.topics),
            Err(reason) => {
                self.load_error = Some(EventError::Config {
                    var: path.display().to_string(),
                    reason,
                })
            }
        }
        self
    }

    pub fn build(self) -> Result<EventCatalog, EventError> {
        if let Some(err) = self.load_error {
            return Err(err);
        }
        if !self.duplicates.is_empty() {
            return Err(EventError::Config {
                var: "event catalog".to_string(),
                reason: format!("duplicate event types: {}", self.duplicates.join(", ")),
            });
        }

        let mut entries = self.entries;
        for (event_type, topic) in self.overrides {
            let entry = entries.get_mut(&event_type).ok_or_else(|| EventError::Config {
                var: "topic override".to_string(),
                reason: format!("event type {event_type} is not in the catalog"),
            })?;
            entry.topic = topic;
        }

        if let Some((event_type, _)) = entries.iter().find(|(_, e)| e.topic.trim().is_empty()) {
            return Err(EventError::Config {
                var: "event catalog".to_string(),
                reason: format!("empty topic for {event_type}"),
            });
        }

        Ok(EventCatalog { entries })
    }
}
