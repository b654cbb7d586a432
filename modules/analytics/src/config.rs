use event_consumer::ConfigError;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Transactions at or above this amount raise a HIGH_SPENDING alert
pub const DEFAULT_HIGH_SPEND_THRESHOLD: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub high_spend_threshold: Decimal,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            high_spend_threshold: DEFAULT_HIGH_SPEND_THRESHOLD,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup("HIGH_SPEND_THRESHOLD") else {
            return Ok(Self::default());
        };

        let threshold = Decimal::from_str(raw.trim()).map_err(|e| ConfigError::Invalid {
            var: "HIGH_SPEND_THRESHOLD",
            reason: format!("{raw} is not a decimal: {e}"),
        })?;
        if threshold <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                var: "HIGH_SPEND_THRESHOLD",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            high_spend_threshold: threshold,
        })
    }
}
