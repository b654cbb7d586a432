//! Dead-letter sinks
//!
//! Append-only destinations for events that exhausted their retries or
//! could not be decoded at all. Each record carries the original envelope,
//! the attempt count and the final error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{topics, BusMessage, EventBus, EventError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Absent when the envelope could not be decoded
    pub event_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub consumer_group: String,
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Original envelope JSON, or the raw payload as a string if it was not JSON
    pub envelope: Value,
    pub attempt_count: u32,
    pub final_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Record for a message that failed processing
    pub fn from_message(
        message: &BusMessage,
        consumer_group: &str,
        attempt_count: u32,
        final_error: &EventError,
    ) -> Self {
        let envelope = serde_json::from_slice::<Value>(&message.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&message.payload).into_owned()));

        let event_id = envelope
            .get("event_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let event_type = envelope
            .get("event_type")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            event_id,
            event_type,
            consumer_group: consumer_group.to_string(),
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            envelope,
            attempt_count,
            final_error: final_error.to_string(),
            dead_lettered_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Durably store a dead letter. An error means the event must not be
    /// acknowledged.
    async fn send(&self, record: DeadLetterRecord) -> Result<(), EventError>;
}

/// Keeps dead letters in memory; used by tests and local runs
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), EventError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Publishes dead letters to `<topic>.dlq` on the event bus
pub struct BusDeadLetterSink {
    bus: Arc<dyn EventBus>,
}

impl BusDeadLetterSink {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl DeadLetterSink for BusDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), EventError> {
        let topic = topics::dead_letter(&record.topic);
        let key = record
            .event_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{}#{}", record.partition, record.offset));

        let bytes = serde_json::to_vec(&record).map_err(|e| EventError::Serialization {
            event_type: "DeadLetterRecord".to_string(),
            cause: e.to_string(),
        })?;

        self.bus.publish(&topic, &key, bytes).await.map_err(|e| {
            error!(
                dlq_topic = %topic,
                event_id = ?record.event_id,
                error = %e,
                "Failed to publish dead letter"
            );
            EventError::from(e)
        })?;

        Ok(())
    }
}
