//! # Event Envelope
//!
//! Canonical wrapper for every event exchanged between banking services.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Time-ordered UUID v7, the deduplication key
//! - `event_type`: Schema tag for `payload` (e.g. `AccountCreated`)
//! - `source`: Service that produced the event
//! - `occurred_at`: Producer-side creation time, never transport receipt time
//! - `partition_key`: Entity the event is about; governs ordering
//! - `schema_version`: Version of the payload schema
//! - `correlation_id`: Links related events in a business flow
//! - `causation_id`: `event_id` of the event that caused this one
//! - `payload`: Event-specific data, opaque to the transport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{DomainEvent, EventCatalog, EventError};

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Standard event envelope
///
/// Two envelopes with the same `event_id` are the same logical occurrence,
/// whatever their payloads.
///
/// # Examples
///
/// ```rust
/// use event_bus::{EventCatalog, EventEnvelope};
/// use serde_json::json;
///
/// let catalog = EventCatalog::banking().unwrap();
/// let envelope = EventEnvelope::build(
///     &catalog,
///     "UserDeleted",
///     "user-service",
///     "7",
///     json!({ "user_id": 7 }),
/// )
/// .unwrap()
/// .with_correlation_id(Some("req-123".to_string()));
///
/// assert_eq!(envelope.partition_key, "7");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,

    pub event_type: String,

    pub source: String,

    pub occurred_at: DateTime<Utc>,

    pub partition_key: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,

    pub payload: Value,
}

fn default_schema_version() -> String {
    DEFAULT_SCHEMA_VERSION.to_string()
}

impl EventEnvelope {
    /// Build an envelope after checking `payload` against the catalog
    ///
    /// Assigns a fresh `event_id` and `occurred_at`. No I/O.
    ///
    /// # Errors
    ///
    /// * `UnknownEventType` if the catalog has no entry for `event_type`
    /// * `InvalidPayload` if `payload` does not match its schema
    pub fn build(
        catalog: &EventCatalog,
        event_type: &str,
        source: &str,
        partition_key: &str,
        payload: Value,
    ) -> Result<Self, EventError> {
        catalog.validate_payload(event_type, &payload)?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            occurred_at: Utc::now(),
            partition_key: partition_key.to_string(),
            schema_version: default_schema_version(),
            correlation_id: None,
            causation_id: None,
            payload,
        })
    }

    /// Build an envelope from a typed payload
    ///
    /// The event type and partition key come from the [`DomainEvent`] impl.
    pub fn from_event<E: DomainEvent>(source: &str, event: &E) -> Result<Self, EventError> {
        let payload = serde_json::to_value(event).map_err(|e| EventError::Serialization {
            event_type: E::EVENT_TYPE.to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: E::EVENT_TYPE.to_string(),
            source: source.to_string(),
            occurred_at: Utc::now(),
            partition_key: event.partition_key(),
            schema_version: default_schema_version(),
            correlation_id: None,
            causation_id: None,
            payload,
        })
    }

    /// Override the event id (replays and tests)
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Mark this envelope as produced in reaction to `cause`
    ///
    /// Inherits the cause's correlation id, falling back to its event id.
    pub fn caused_by(mut self, cause: &EventEnvelope) -> Self {
        self.causation_id = Some(cause.event_id);
        self.correlation_id = cause
            .correlation_id
            .clone()
            .or_else(|| Some(cause.event_id.to_string()));
        self
    }

    /// Decode the payload into its typed form
    pub fn payload_as<E: DomainEvent>(&self) -> Result<E, EventError> {
        E::deserialize(&self.payload).map_err(|e| EventError::InvalidPayload {
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization {
            event_type: self.event_type.clone(),
            cause: e.to_string(),
        })
    }

    /// Decode and validate an envelope received from the transport
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            EventError::Deserialization {
                reason: e.to_string(),
            }
        })?;

        validate_envelope_fields(&value)
            .map_err(|reason| EventError::Deserialization { reason })?;

        serde_json::from_value(value).map_err(|e| EventError::Deserialization {
            reason: e.to_string(),
        })
    }
}

/// Validate the envelope header fields of a raw JSON message
///
/// # Validation Rules
///
/// - `event_id`: Must be a valid UUID
/// - `event_type`, `source`, `partition_key`: Must be non-empty strings
/// - `occurred_at`: Must be present
/// - `payload`: Must be present
///
/// # Errors
///
/// Returns a descriptive error string if validation fails
pub fn validate_envelope_fields(envelope: &Value) -> Result<(), String> {
    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_id")?;

    Uuid::parse_str(event_id).map_err(|e| format!("event_id is not a UUID: {e}"))?;

    envelope
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid occurred_at")?;

    for field in ["event_type", "source", "partition_key"] {
        let value = envelope
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Missing or invalid {field}"))?;

        if value.is_empty() {
            return Err(format!("{field} cannot be empty"));
        }
    }

    if envelope.get("payload").is_none() {
        return Err("Missing payload".to_string());
    }

    Ok(())
}
