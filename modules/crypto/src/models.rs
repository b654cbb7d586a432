use chrono::{DateTime, Utc};
use event_bus::events::TradeSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Crypto wallet attached to one bank account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: Uuid,
    pub account_id: i64,
    pub user_id: i64,
    /// Balance per crypto currency symbol
    pub holdings: BTreeMap<String, Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn holding(&self, symbol: &str) -> Decimal {
        self.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub account_id: i64,
    pub crypto_currency: String,
    pub side: TradeSide,
    pub crypto_amount: Decimal,
    /// Fiat price of one unit
    pub exchange_rate: Decimal,
    pub fiat_currency: String,
}
