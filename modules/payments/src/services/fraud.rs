//! Fraud rules applied to every payment before execution

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct FraudRules {
    /// Larger single amounts are flagged
    pub high_amount_threshold: Decimal,
    /// More payments than this from one account within an hour are blocked
    pub max_transactions_per_hour: usize,
}

impl Default for FraudRules {
    fn default() -> Self {
        Self {
            high_amount_threshold: Decimal::new(5_000, 0),
            max_transactions_per_hour: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FraudVerdict {
    Allowed,
    /// Suspicious but executed; reported with HIGH severity
    Flagged(Vec<&'static str>),
    /// Refused; reported with CRITICAL severity
    Blocked(Vec<&'static str>),
}

impl FraudVerdict {
    pub fn severity(&self) -> Option<&'static str> {
        match self {
            FraudVerdict::Allowed => None,
            FraudVerdict::Flagged(_) => Some("HIGH"),
            FraudVerdict::Blocked(_) => Some("CRITICAL"),
        }
    }

    pub fn indicators(&self) -> &[&'static str] {
        match self {
            FraudVerdict::Allowed => &[],
            FraudVerdict::Flagged(indicators) | FraudVerdict::Blocked(indicators) => indicators,
        }
    }
}

impl FraudRules {
    /// `recent_from_account` counts the account's payments in the last hour,
    /// not including this one
    pub fn evaluate(&self, amount: Decimal, recent_from_account: usize) -> FraudVerdict {
        let mut indicators = Vec::new();
        if amount > self.high_amount_threshold {
            indicators.push("HIGH_AMOUNT");
        }
        if recent_from_account >= self.max_transactions_per_hour {
            indicators.push("HIGH_VELOCITY");
            return FraudVerdict::Blocked(indicators);
        }
        if indicators.is_empty() {
            FraudVerdict::Allowed
        } else {
            FraudVerdict::Flagged(indicators)
        }
    }
}
