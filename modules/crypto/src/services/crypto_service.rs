use event_bus::events::{AccountCreated, CryptoTradeExecuted};
use event_bus::{EventProducer, PublishMode};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{TradeRequest, Wallet};
use crate::repos::{WalletError, WalletRepo};

pub struct CryptoService {
    wallets: Arc<WalletRepo>,
    producer: EventProducer,
    last_trade_id: AtomicI64,
}

impl CryptoService {
    pub fn new(wallets: Arc<WalletRepo>, producer: EventProducer) -> Self {
        Self {
            wallets,
            producer,
            last_trade_id: AtomicI64::new(0),
        }
    }

    pub fn wallets(&self) -> &Arc<WalletRepo> {
        &self.wallets
    }

    /// Give a newly opened account its wallet (one per account id)
    pub async fn on_account_created(&self, event: &AccountCreated) -> Wallet {
        let (wallet, created) = self
            .wallets
            .initialize(event.account_id, event.user_id)
            .await;

        if created {
            info!(
                account_id = event.account_id,
                user_id = event.user_id,
                wallet_id = %wallet.wallet_id,
                "Crypto wallet initialised"
            );
        } else {
            debug!(account_id = event.account_id, "Wallet already exists");
        }
        wallet
    }

    /// Execute a trade against the account's wallet and publish it
    pub async fn record_trade(
        &self,
        request: TradeRequest,
    ) -> Result<CryptoTradeExecuted, WalletError> {
        if request.crypto_amount <= Decimal::ZERO || request.exchange_rate <= Decimal::ZERO {
            return Err(WalletError::InvalidTrade(format!(
                "amount {} at rate {}",
                request.crypto_amount, request.exchange_rate
            )));
        }

        let wallet = self
            .wallets
            .apply_trade(
                request.account_id,
                &request.crypto_currency,
                request.side,
                request.crypto_amount,
            )
            .await?;

        let event = CryptoTradeExecuted {
            trade_id: self.last_trade_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: wallet.user_id,
            account_id: wallet.account_id,
            crypto_currency: request.crypto_currency,
            trade_type: request.side,
            crypto_amount: request.crypto_amount,
            fiat_amount: request.crypto_amount * request.exchange_rate,
            fiat_currency: request.fiat_currency,
            exchange_rate: request.exchange_rate,
            status: "EXECUTED".to_string(),
        };
        self.producer.emit(&event, PublishMode::Confirmed).await?;

        info!(
            trade_id = event.trade_id,
            account_id = event.account_id,
            symbol = %event.crypto_currency,
            "Crypto trade executed"
        );
        Ok(event)
    }
}
