//! Error taxonomy for event production and consumption.
//!
//! Structural errors (`InvalidPayload`, `UnknownEventType`, `Deserialization`)
//! can never be fixed by retrying the same message. Transient errors
//! (`Domain`, `TransportUnavailable`, `HandlerTimeout`) are retried by the
//! consumer's retry coordinator before the event is dead-lettered.

use thiserror::Error;
use uuid::Uuid;

use crate::BusError;

/// Errors raised by the event propagation fabric.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// Payload does not match the schema registered for its event type.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// Event type is not present in the event catalog.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Envelope could not be encoded for the wire.
    #[error("failed to serialize {event_type}: {cause}")]
    Serialization { event_type: String, cause: String },

    /// Received bytes could not be decoded into an envelope.
    #[error("failed to deserialize envelope: {reason}")]
    Deserialization { reason: String },

    /// Transport refused or could not confirm the operation.
    #[error("transport unavailable for {topic}: {cause}")]
    TransportUnavailable { topic: String, cause: String },

    /// Handler-level business failure. Retryable.
    #[error("domain error: {0}")]
    Domain(String),

    /// A single handler attempt exceeded its time budget. Retryable.
    #[error("handler attempt timed out after {timeout_ms}ms")]
    HandlerTimeout { timeout_ms: u64 },

    /// Event exhausted its retries and was moved to the dead-letter sink.
    #[error("event {event_id} dead-lettered after {attempts} attempts: {last_error}")]
    DeadLettered {
        event_id: Uuid,
        attempts: u32,
        last_error: String,
    },

    /// Delivery record or dead-letter storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid or missing configuration.
    #[error("configuration error for {var}: {reason}")]
    Config { var: String, reason: String },
}

impl EventError {
    /// Build a domain error from anything displayable.
    pub fn domain(cause: impl std::fmt::Display) -> Self {
        EventError::Domain(cause.to_string())
    }

    /// Returns true if retrying the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventError::Domain(_)
                | EventError::TransportUnavailable { .. }
                | EventError::HandlerTimeout { .. }
                | EventError::Storage(_)
        )
    }

    /// Returns true for errors caused by the shape of the message itself.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EventError::InvalidPayload { .. }
                | EventError::UnknownEventType(_)
                | EventError::Deserialization { .. }
        )
    }
}

impl From<BusError> for EventError {
    fn from(err: BusError) -> Self {
        let topic = err.topic().unwrap_or("unknown").to_string();
        EventError::TransportUnavailable {
            topic,
            cause: err.to_string(),
        }
    }
}
