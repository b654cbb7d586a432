//! Aggregated activity counters
//!
//! Each event is counted once: the set of counted event ids lives under the
//! same lock as the counters.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Volume {
    pub count: u64,
    pub total: Decimal,
}

impl Volume {
    fn add(&mut self, amount: Decimal) {
        self.count += 1;
        self.total += amount;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub users_created: u64,
    pub accounts_opened: u64,
    /// Completed transactions by currency
    pub transactions: BTreeMap<String, Volume>,
    /// Crypto trades by fiat currency
    pub crypto_trades: BTreeMap<String, Volume>,
    pub alerts_raised: u64,
}

#[derive(Default)]
struct State {
    snapshot: MetricsSnapshot,
    counted: HashSet<Uuid>,
}

#[derive(Default)]
pub struct Metrics {
    state: Mutex<State>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` unless `event_id` was already counted
    pub async fn record<F>(&self, event_id: Uuid, update: F) -> bool
    where
        F: FnOnce(&mut MetricsSnapshot),
    {
        let mut state = self.state.lock().await;
        if !state.counted.insert(event_id) {
            return false;
        }
        update(&mut state.snapshot);
        true
    }

    pub(crate) async fn alert_raised(&self) {
        self.state.lock().await.snapshot.alerts_raised += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().await.snapshot.clone()
    }
}

pub(crate) fn add_volume(map: &mut BTreeMap<String, Volume>, currency: &str, amount: Decimal) {
    map.entry(currency.to_string()).or_default().add(amount);
}
