use event_bus::consumer_retry::{BackoffPolicy, Jitter, RetryConfig};
use event_bus::{BusConfig, EventError};
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error(transparent)]
    Bus(#[from] EventError),
}

impl From<ConfigError> for EventError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Bus(inner) => inner,
            ConfigError::Missing(var) => EventError::Config {
                var: var.to_string(),
                reason: "must be set".to_string(),
            },
            ConfigError::Invalid { var, reason } => EventError::Config {
                var: var.to_string(),
                reason,
            },
        }
    }
}

/// Settings for one consumer group
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub consumer_group: String,
    /// Parallel processing lanes; one entity always maps to one lane
    pub lanes: u32,
    /// Messages buffered per lane before the reader waits
    pub lane_buffer: usize,
    pub retry: RetryConfig,
}

impl ConsumerConfig {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            lanes: 4,
            lane_buffer: 64,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_lanes(mut self, lanes: u32) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Lease for delivery-record claims, derived from the retry budget
    pub fn claim_lease(&self) -> Duration {
        self.retry.claim_lease()
    }
}

/// Where exhausted events go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqSinkKind {
    Bus,
    Memory,
    Postgres,
}

/// Full service configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub bus: BusConfig,
    pub consumer: ConsumerConfig,
    pub dlq_sink: DlqSinkKind,
    /// Enables the Postgres delivery store when set
    pub database_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env(service_name: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(service_name, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(service_name: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut bus = BusConfig::from_lookup(&lookup)?;

        let consumer_group =
            lookup("CONSUMER_GROUP").unwrap_or_else(|| service_name.to_string());

        let defaults = RetryConfig::default();
        let (default_initial, default_max) = match &defaults.backoff {
            BackoffPolicy::Exponential { initial, max, .. } => (*initial, *max),
            BackoffPolicy::Fixed(delay) => (*delay, *delay),
        };

        let max_attempts = parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let initial_ms = parse_or(
            &lookup,
            "RETRY_INITIAL_BACKOFF_MS",
            default_initial.as_millis() as u64,
        )?;
        let max_ms = parse_or(&lookup, "RETRY_MAX_BACKOFF_MS", default_max.as_millis() as u64)?;
        if max_ms < initial_ms {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_BACKOFF_MS",
                reason: format!("{max_ms} is below RETRY_INITIAL_BACKOFF_MS ({initial_ms})"),
            });
        }

        let timeout_ms = parse_or(
            &lookup,
            "HANDLER_TIMEOUT_MS",
            defaults.attempt_timeout.as_millis() as u64,
        )?;

        let retry = RetryConfig {
            max_attempts,
            backoff: BackoffPolicy::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                multiplier: 2.0,
                jitter: Jitter::Full,
            },
            attempt_timeout: Duration::from_millis(timeout_ms),
        };

        // Transport redelivery must not start while retries are still running
        let lease = retry.claim_lease();
        if lookup("NATS_ACK_WAIT_MS").is_none() {
            bus.ack_wait = lease;
        } else if bus.ack_wait < lease {
            return Err(ConfigError::Invalid {
                var: "NATS_ACK_WAIT_MS",
                reason: format!(
                    "{}ms is below the retry budget plus margin ({}ms)",
                    bus.ack_wait.as_millis(),
                    lease.as_millis()
                ),
            });
        }

        let lanes: u32 = parse_or(&lookup, "CONSUMER_LANES", 4)?;
        if lanes == 0 {
            return Err(ConfigError::Invalid {
                var: "CONSUMER_LANES",
                reason: "must be at least 1".to_string(),
            });
        }

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let dlq_sink = match lookup("DLQ_SINK").as_deref().map(str::to_lowercase).as_deref() {
            None => DlqSinkKind::Bus,
            Some("bus") => DlqSinkKind::Bus,
            Some("memory") => DlqSinkKind::Memory,
            Some("postgres") => DlqSinkKind::Postgres,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "DLQ_SINK",
                    reason: format!("{other} is not one of bus, memory, postgres"),
                })
            }
        };
        if dlq_sink == DlqSinkKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            service_name: service_name.to_string(),
            bus,
            consumer: ConsumerConfig::new(consumer_group)
                .with_lanes(lanes)
                .with_retry(retry),
            dlq_sink,
            database_url,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("{raw} is not a valid number"),
        }),
    }
}
