//! Transport configuration parsed from environment variables

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::consumer_retry::RetryConfig;
use crate::inmemory_bus::DEFAULT_PARTITIONS;
use crate::{EventBus, EventCatalog, EventError, InMemoryBus, NatsBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    InMemory,
    Nats,
}

impl std::str::FromStr for BusKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" | "memory" => Ok(BusKind::InMemory),
            "nats" => Ok(BusKind::Nats),
            other => Err(EventError::Config {
                var: "BUS_TYPE".to_string(),
                reason: format!("{other} is not one of inmemory, nats"),
            }),
        }
    }
}

/// Bus and catalog settings shared by every service
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub kind: BusKind,
    pub nats_url: String,
    pub partitions: u32,
    /// Optional TOML file with `[topics]` overrides
    pub topics_file: Option<String>,
    /// NATS redelivery timeout for unacknowledged messages
    pub ack_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::InMemory,
            nats_url: "nats://localhost:4222".to_string(),
            partitions: DEFAULT_PARTITIONS,
            topics_file: None,
            ack_wait: RetryConfig::default().claim_lease(),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, EventError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EventError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let kind = match lookup("BUS_TYPE") {
            Some(raw) => raw.parse()?,
            None => defaults.kind,
        };

        let nats_url = lookup("NATS_URL").unwrap_or(defaults.nats_url);

        let partitions = match lookup("BUS_PARTITIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| EventError::Config {
                    var: "BUS_PARTITIONS".to_string(),
                    reason: format!("{raw} is not a positive integer"),
                })?,
            None => defaults.partitions,
        };

        let topics_file = lookup("EVENT_TOPICS_FILE").filter(|p| !p.trim().is_empty());

        let ack_wait = match lookup("NATS_ACK_WAIT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| EventError::Config {
                    var: "NATS_ACK_WAIT_MS".to_string(),
                    reason: format!("{raw} is not a positive integer"),
                })?,
            None => defaults.ack_wait,
        };

        Ok(Self {
            kind,
            nats_url,
            partitions,
            topics_file,
            ack_wait,
        })
    }

    /// Connect to the configured transport
    pub async fn connect(&self) -> Result<Arc<dyn EventBus>, EventError> {
        match self.kind {
            BusKind::InMemory => {
                info!(partitions = self.partitions, "Using InMemory event bus");
                Ok(Arc::new(InMemoryBus::with_partitions(self.partitions)))
            }
            BusKind::Nats => {
                info!(
                    url = %self.nats_url,
                    ack_wait_ms = self.ack_wait.as_millis() as u64,
                    "Connecting to NATS"
                );
                let bus = NatsBus::connect(&self.nats_url)
                    .await
                    .map_err(|e| EventError::Config {
                        var: "NATS_URL".to_string(),
                        reason: e.to_string(),
                    })?
                    .with_ack_wait(self.ack_wait);
                Ok(Arc::new(bus))
            }
        }
    }

    /// Banking catalog with any configured topic overrides applied
    pub fn load_catalog(&self) -> Result<EventCatalog, EventError> {
        let builder = EventCatalog::banking_builder();
        match &self.topics_file {
            Some(path) => builder.with_overrides_file(path).build(),
            None => builder.build(),
        }
    }
}
