//! # Banking Event Bus
//!
//! The propagation fabric shared by every banking service: the canonical
//! event envelope, the event catalog and topic registry, the transport
//! abstraction and its implementations, and the typed producer.
//!
//! ## Delivery model
//!
//! Transports are durable, partition-ordered and at-least-once. A message is
//! redelivered to a consumer group until that group commits its offset, so
//! consumers must deduplicate by `event_id` (see the `event-consumer` crate).
//! Events sharing a partition key land in the same partition and are
//! delivered in publish order.
//!
//! ## Implementations
//!
//! - **NatsBus**: NATS JetStream, one stream per topic, durable pull consumers
//! - **InMemoryBus**: partitioned in-process log for tests and local runs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, EventCatalog, EventProducer, InMemoryBus, PublishMode};
//! use event_bus::events::AccountCreated;
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! let catalog = Arc::new(EventCatalog::banking()?);
//! let producer = EventProducer::new(bus, catalog, "account-service");
//!
//! let event = AccountCreated {
//!     account_id: 42,
//!     user_id: 7,
//!     account_number: "ACC-42".to_string(),
//!     account_type: "CHECKING".to_string(),
//!     currency: "EUR".to_string(),
//!     initial_balance: Decimal::ZERO,
//! };
//! producer.emit(&event, PublishMode::Confirmed).await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod consumer_retry;
mod envelope;
pub mod error;
pub mod event;
pub mod events;
mod inmemory_bus;
mod nats_bus;
mod producer;

pub use catalog::{topics, EventCatalog, EventCatalogBuilder};
pub use config::{BusConfig, BusKind};
pub use envelope::{validate_envelope_fields, EventEnvelope, DEFAULT_SCHEMA_VERSION};
pub use error::EventError;
pub use event::DomainEvent;
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use producer::{EventProducer, PublishMode};

use async_trait::async_trait;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Header carrying the partition key alongside the payload.
pub const PARTITION_KEY_HEADER: &str = "Partition-Key";

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The topic this message was published to
    pub topic: String,
    /// Ordering key supplied by the producer
    pub partition_key: Option<String>,
    /// Partition (ordering lane) within the topic
    pub partition: u32,
    /// Position of the message within its partition
    pub offset: u64,
    /// The serialized envelope
    pub payload: Vec<u8>,
    /// Transport headers
    pub headers: Option<HashMap<String, String>>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            partition_key: None,
            partition: 0,
            offset: 0,
            payload,
            headers: None,
        }
    }

    /// Set the partition key
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Set the partition and offset the transport assigned
    pub fn at(mut self, partition: u32, offset: u64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Key used to serialize processing: the partition key when present,
    /// otherwise the partition number.
    pub fn ordering_key(&self) -> String {
        match &self.partition_key {
            Some(key) => key.clone(),
            None => format!("{}#{}", self.topic, self.partition),
        }
    }
}

/// Where a published message landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish to {topic}: {cause}")]
    PublishError { topic: String, cause: String },

    #[error("failed to subscribe to {topic}: {cause}")]
    SubscribeError { topic: String, cause: String },

    #[error("failed to commit offset on {topic}: {cause}")]
    CommitError { topic: String, cause: String },

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("bus is shut down")]
    Closed,
}

impl BusError {
    /// Topic the failed operation targeted, when known
    pub fn topic(&self) -> Option<&str> {
        match self {
            BusError::PublishError { topic, .. }
            | BusError::SubscribeError { topic, .. }
            | BusError::CommitError { topic, .. } => Some(topic),
            BusError::ConnectionError(_) | BusError::Closed => None,
        }
    }
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Transport boundary for partition-ordered, at-least-once pub/sub.
///
/// Implementations must deliver messages with the same partition key to a
/// consumer group in publish order, and must redeliver any message whose
/// offset the group has not committed.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message and wait for the transport to confirm durable receipt
    ///
    /// # Arguments
    /// * `topic` - Transport topic (e.g., "account.created")
    /// * `partition_key` - Ordering key; equal keys share a partition
    /// * `payload` - Serialized envelope
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt>;

    /// Subscribe a consumer group to a topic
    ///
    /// The stream starts at the group's committed position, so anything the
    /// group has not committed is delivered again.
    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>>;

    /// Record that `message` has been fully handled by `consumer_group`
    async fn commit(&self, consumer_group: &str, message: &BusMessage) -> BusResult<()>;

    /// Release transport resources. Open subscription streams end.
    async fn shutdown(&self) -> BusResult<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// Stable partition assignment for a key.
///
/// Uses SHA-256 so the mapping is identical across processes and restarts.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(prefix) % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_for_is_stable_and_bounded() {
        for key in ["42", "7", "T1", "user-abc"] {
            let p = partition_for(key, 8);
            assert!(p < 8);
            assert_eq!(p, partition_for(key, 8));
        }
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_ordering_key_falls_back_to_partition() {
        let keyed = BusMessage::new("t".into(), vec![]).with_partition_key("42");
        assert_eq!(keyed.ordering_key(), "42");

        let unkeyed = BusMessage::new("t".into(), vec![]).at(3, 10);
        assert_eq!(unkeyed.ordering_key(), "t#3");
    }
}
