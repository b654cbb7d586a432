use chrono::Utc;
use event_bus::events::TradeSide;
use event_bus::EventError;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Wallet;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no wallet for account {0}")]
    NotFound(i64),

    #[error("insufficient {symbol} in account {account_id}: holding {holding}, requested {requested}")]
    InsufficientHoldings {
        account_id: i64,
        symbol: String,
        holding: Decimal,
        requested: Decimal,
    },

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<WalletError> for EventError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Event(inner) => inner,
            other => EventError::domain(other),
        }
    }
}

/// Wallets keyed by account id
#[derive(Default)]
pub struct WalletRepo {
    wallets: Mutex<HashMap<i64, Wallet>>,
}

impl WalletRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the wallet for an account unless one exists
    ///
    /// Returns the wallet and whether this call created it.
    pub async fn initialize(&self, account_id: i64, user_id: i64) -> (Wallet, bool) {
        let mut wallets = self.wallets.lock().await;
        if let Some(existing) = wallets.get(&account_id) {
            return (existing.clone(), false);
        }

        let wallet = Wallet {
            wallet_id: Uuid::now_v7(),
            account_id,
            user_id,
            holdings: BTreeMap::new(),
            created_at: Utc::now(),
        };
        wallets.insert(account_id, wallet.clone());
        (wallet, true)
    }

    pub async fn get(&self, account_id: i64) -> Option<Wallet> {
        self.wallets.lock().await.get(&account_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.wallets.lock().await.len()
    }

    /// Apply a trade to the wallet's holdings
    pub async fn apply_trade(
        &self,
        account_id: i64,
        symbol: &str,
        side: TradeSide,
        amount: Decimal,
    ) -> Result<Wallet, WalletError> {
        let mut wallets = self.wallets.lock().await;
        let wallet = wallets
            .get_mut(&account_id)
            .ok_or(WalletError::NotFound(account_id))?;

        let holding = wallet.holding(symbol);
        let updated = match side {
            TradeSide::Buy => holding + amount,
            TradeSide::Sell if holding >= amount => holding - amount,
            TradeSide::Sell => {
                return Err(WalletError::InsufficientHoldings {
                    account_id,
                    symbol: symbol.to_string(),
                    holding,
                    requested: amount,
                })
            }
        };
        wallet.holdings.insert(symbol.to_string(), updated);
        Ok(wallet.clone())
    }
}
