//! Append-only audit trail
//!
//! Entries are never updated or removed. An event id is appended at most
//! once, whichever group or retry delivers it.

use chrono::Utc;
use event_bus::EventEnvelope;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::AuditEntry;

#[derive(Default)]
struct Trail {
    entries: Vec<AuditEntry>,
    seen: HashSet<Uuid>,
}

#[derive(Default)]
pub struct AuditLog {
    trail: RwLock<Trail>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `envelope` as seen on `topic`; `None` if already recorded
    pub async fn append(&self, envelope: &EventEnvelope, topic: &str) -> Option<AuditEntry> {
        let mut trail = self.trail.write().await;
        if !trail.seen.insert(envelope.event_id) {
            return None;
        }

        let entry = AuditEntry {
            sequence: trail.entries.len() as u64 + 1,
            event_id: envelope.event_id,
            event_type: envelope.event_type.clone(),
            source: envelope.source.clone(),
            occurred_at: envelope.occurred_at,
            topic: topic.to_string(),
            partition_key: envelope.partition_key.clone(),
            correlation_id: envelope.correlation_id.clone(),
            recorded_at: Utc::now(),
        };
        trail.entries.push(entry.clone());
        Some(entry)
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.trail.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.trail.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries for one partition key, in append order
    pub async fn for_key(&self, partition_key: &str) -> Vec<AuditEntry> {
        self.trail
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.partition_key == partition_key)
            .cloned()
            .collect()
    }
}
