use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One observed event; `sequence` is the append position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub topic: String,
    pub partition_key: String,
    pub correlation_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
