//! Delivery records: per consumer group processing state of each event
//!
//! `claim` is the linearisation point of idempotent consumption. For one
//! `(event_id, consumer_group)` at most one caller holds an `Acquired`
//! claim at a time; everyone else sees the record as in flight or done.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use event_bus::consumer_retry::RetryConfig;
use event_bus::EventError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Lease after which a `Processing` claim is considered abandoned, sized
/// for the default retry policy
pub fn default_claim_lease() -> Duration {
    RetryConfig::default().claim_lease()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Seen,
    Processing,
    Acknowledged,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Seen => "seen",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Acknowledged => "acknowledged",
            DeliveryStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "seen" => Some(DeliveryStatus::Seen),
            "processing" => Some(DeliveryStatus::Processing),
            "acknowledged" => Some(DeliveryStatus::Acknowledged),
            "dead_lettered" => Some(DeliveryStatus::DeadLettered),
            _ => None,
        }
    }

    /// Acknowledged and dead-lettered records never process again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Acknowledged | DeliveryStatus::DeadLettered
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub event_id: Uuid,
    pub consumer_group: String,
    pub event_type: String,
    pub status: DeliveryStatus,
    /// Handler attempts of the latest claim, updated after each failure
    pub attempt_count: u32,
    /// Error of the most recent failed attempt; kept after a later success
    pub last_error: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of trying to take ownership of an event for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Caller owns the event and must finish with acknowledge, dead-letter or release
    Acquired(DeliveryRecord),
    AlreadyAcknowledged,
    AlreadyDeadLettered,
    /// Another worker holds an unexpired claim
    InFlight,
}

/// Storage of delivery records for one or more consumer groups
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Create the record on first observation or take over a released or
    /// expired claim
    async fn claim(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        event_type: &str,
    ) -> Result<Claim, EventError>;

    /// Record a failed handler attempt of a claimed event. Also refreshes
    /// the claim's lease.
    async fn record_attempt(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempt: u32,
        error: &str,
    ) -> Result<(), EventError>;

    async fn mark_acknowledged(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempts: u32,
    ) -> Result<(), EventError>;

    async fn mark_dead_lettered(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempts: u32,
        last_error: &str,
    ) -> Result<(), EventError>;

    /// Give up a claim without a terminal outcome; the event becomes
    /// claimable again
    async fn release(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        last_error: Option<&str>,
    ) -> Result<(), EventError>;

    async fn get(
        &self,
        event_id: Uuid,
        consumer_group: &str,
    ) -> Result<Option<DeliveryRecord>, EventError>;

    /// Delete terminal records last updated before `cutoff`
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, EventError>;
}

/// Process-local delivery store
///
/// A single mutex guards all records, so every claim is linearised.
pub struct InMemoryDeliveryStore {
    records: Mutex<HashMap<(Uuid, String), DeliveryRecord>>,
    lease: ChronoDuration,
}

impl Default for InMemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::with_lease(default_claim_lease())
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            lease: ChronoDuration::from_std(lease).unwrap_or_else(|_| ChronoDuration::days(36_500)),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Records currently in `status`
    pub async fn count_with_status(&self, status: DeliveryStatus) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    async fn update<F>(&self, event_id: Uuid, consumer_group: &str, apply: F) -> Result<(), EventError>
    where
        F: FnOnce(&mut DeliveryRecord),
    {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(event_id, consumer_group.to_string()))
            .ok_or_else(|| {
                EventError::Storage(format!(
                    "no delivery record for {event_id} in {consumer_group}"
                ))
            })?;
        apply(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn claim(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        event_type: &str,
    ) -> Result<Claim, EventError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let key = (event_id, consumer_group.to_string());

        let record = records.entry(key).or_insert_with(|| DeliveryRecord {
            event_id,
            consumer_group: consumer_group.to_string(),
            event_type: event_type.to_string(),
            status: DeliveryStatus::Seen,
            attempt_count: 0,
            last_error: None,
            first_seen_at: now,
            updated_at: now,
        });

        match record.status {
            DeliveryStatus::Acknowledged => Ok(Claim::AlreadyAcknowledged),
            DeliveryStatus::DeadLettered => Ok(Claim::AlreadyDeadLettered),
            DeliveryStatus::Processing if now - record.updated_at < self.lease => {
                Ok(Claim::InFlight)
            }
            DeliveryStatus::Seen | DeliveryStatus::Processing => {
                record.status = DeliveryStatus::Processing;
                record.updated_at = now;
                Ok(Claim::Acquired(record.clone()))
            }
        }
    }

    async fn record_attempt(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempt: u32,
        error: &str,
    ) -> Result<(), EventError> {
        self.update(event_id, consumer_group, |record| {
            record.attempt_count = attempt;
            record.last_error = Some(error.to_string());
        })
        .await
    }

    async fn mark_acknowledged(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempts: u32,
    ) -> Result<(), EventError> {
        self.update(event_id, consumer_group, |record| {
            record.status = DeliveryStatus::Acknowledged;
            record.attempt_count = attempts;
        })
        .await
    }

    async fn mark_dead_lettered(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        attempts: u32,
        last_error: &str,
    ) -> Result<(), EventError> {
        self.update(event_id, consumer_group, |record| {
            record.status = DeliveryStatus::DeadLettered;
            record.attempt_count = attempts;
            record.last_error = Some(last_error.to_string());
        })
        .await
    }

    async fn release(
        &self,
        event_id: Uuid,
        consumer_group: &str,
        last_error: Option<&str>,
    ) -> Result<(), EventError> {
        self.update(event_id, consumer_group, |record| {
            record.status = DeliveryStatus::Seen;
            if let Some(error) = last_error {
                record.last_error = Some(error.to_string());
            }
        })
        .await
    }

    async fn get(
        &self,
        event_id: Uuid,
        consumer_group: &str,
    ) -> Result<Option<DeliveryRecord>, EventError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(event_id, consumer_group.to_string()))
            .cloned())
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, EventError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !(r.status.is_terminal() && r.updated_at < cutoff));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_claim_acquires_then_in_flight() {
        let store = InMemoryDeliveryStore::new();
        let id = Uuid::now_v7();

        match store.claim(id, "crypto", "AccountCreated").await.unwrap() {
            Claim::Acquired(record) => {
                assert_eq!(record.status, DeliveryStatus::Processing);
                assert_eq!(record.event_type, "AccountCreated");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            store.claim(id, "crypto", "AccountCreated").await.unwrap(),
            Claim::InFlight
        );
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let store = InMemoryDeliveryStore::new();
        let id = Uuid::now_v7();

        store.claim(id, "crypto", "AccountCreated").await.unwrap();
        store.mark_acknowledged(id, "crypto", 1).await.unwrap();

        assert!(matches!(
            store.claim(id, "notifications", "AccountCreated").await.unwrap(),
            Claim::Acquired(_)
        ));
        assert_eq!(
            store.claim(id, "crypto", "AccountCreated").await.unwrap(),
            Claim::AlreadyAcknowledged
        );
    }

    #[tokio::test]
    async fn test_released_claim_can_be_reacquired() {
        let store = InMemoryDeliveryStore::new();
        let id = Uuid::now_v7();

        store.claim(id, "g", "UserDeleted").await.unwrap();
        store.release(id, "g", Some("shutdown")).await.unwrap();

        let record = store.get(id, "g").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Seen);
        assert_eq!(record.last_error.as_deref(), Some("shutdown"));
        assert!(matches!(
            store.claim(id, "g", "UserDeleted").await.unwrap(),
            Claim::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = InMemoryDeliveryStore::with_lease(Duration::ZERO);
        let id = Uuid::now_v7();

        store.claim(id, "g", "UserDeleted").await.unwrap();
        assert!(matches!(
            store.claim(id, "g", "UserDeleted").await.unwrap(),
            Claim::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_one_owner() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let id = Uuid::now_v7();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.claim(id, "g", "TransactionCompleted").await.unwrap()
            }));
        }

        let mut acquired = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), Claim::Acquired(_)) {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_open_records() {
        let store = InMemoryDeliveryStore::new();
        let done = Uuid::now_v7();
        let dead = Uuid::now_v7();
        let open = Uuid::now_v7();

        for id in [done, dead, open] {
            store.claim(id, "g", "UserCreated").await.unwrap();
        }
        store.mark_acknowledged(done, "g", 1).await.unwrap();
        store.mark_dead_lettered(dead, "g", 3, "smtp down").await.unwrap();

        let purged = store
            .purge_terminal_before(Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap();

        assert_eq!(purged, 2);
        assert!(store.get(open, "g").await.unwrap().is_some());
        assert!(store.get(done, "g").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_attempts_are_recorded_before_terminal_mark() {
        let store = InMemoryDeliveryStore::new();
        let id = Uuid::now_v7();

        store.claim(id, "g", "BalanceUpdated").await.unwrap();
        store.record_attempt(id, "g", 1, "db busy").await.unwrap();
        store.record_attempt(id, "g", 2, "db locked").await.unwrap();

        let record = store.get(id, "g").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Processing);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.last_error.as_deref(), Some("db locked"));

        store.mark_acknowledged(id, "g", 3).await.unwrap();
        let record = store.get(id, "g").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.last_error.as_deref(), Some("db locked"));
    }

    #[tokio::test]
    async fn test_marking_unknown_record_fails() {
        let store = InMemoryDeliveryStore::new();
        assert!(matches!(
            store.mark_acknowledged(Uuid::now_v7(), "g", 1).await,
            Err(EventError::Storage(_))
        ));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DeliveryStatus::Seen,
            DeliveryStatus::Processing,
            DeliveryStatus::Acknowledged,
            DeliveryStatus::DeadLettered,
        ] {
            assert_eq!(DeliveryStatus::from_str(status.as_str()), Some(status));
        }
        assert!(DeliveryStatus::DeadLettered.is_terminal());
        assert!(!DeliveryStatus::Seen.is_terminal());
    }
}
