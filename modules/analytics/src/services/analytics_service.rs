use event_bus::events::{
    AccountCreated, AlertTriggered, CryptoTradeExecuted, TransactionCompleted, UserCreated,
};
use event_bus::{EventEnvelope, EventError, EventProducer, PublishMode};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::metrics::{add_volume, Metrics};

pub struct AnalyticsService {
    metrics: Arc<Metrics>,
    producer: EventProducer,
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(metrics: Arc<Metrics>, producer: EventProducer, config: AnalyticsConfig) -> Self {
        Self {
            metrics,
            producer,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn on_user_created(&self, _event: &UserCreated, envelope: &EventEnvelope) {
        self.metrics
            .record(envelope.event_id, |s| s.users_created += 1)
            .await;
    }

    pub async fn on_account_created(&self, _event: &AccountCreated, envelope: &EventEnvelope) {
        self.metrics
            .record(envelope.event_id, |s| s.accounts_opened += 1)
            .await;
    }

    pub async fn on_crypto_trade(&self, event: &CryptoTradeExecuted, envelope: &EventEnvelope) {
        self.metrics
            .record(envelope.event_id, |s| {
                add_volume(&mut s.crypto_trades, &event.fiat_currency, event.fiat_amount)
            })
            .await;
    }

    /// Count the transaction; a high-spend amount raises an alert
    ///
    /// The alert is published fire-and-forget: losing one is tolerated.
    pub async fn on_transaction(
        &self,
        event: &TransactionCompleted,
        envelope: &EventEnvelope,
    ) -> Result<(), EventError> {
        let counted = self
            .metrics
            .record(envelope.event_id, |s| {
                add_volume(&mut s.transactions, &event.currency, event.amount)
            })
            .await;
        if !counted {
            debug!(transaction_id = %event.transaction_id, "Transaction already counted");
            return Ok(());
        }

        let threshold = self.config.high_spend_threshold;
        if event.amount < threshold {
            return Ok(());
        }

        let alert = AlertTriggered {
            alert_id: format!("ALERT-{}", envelope.event_id),
            user_id: event.user_id,
            alert_type: "HIGH_SPENDING".to_string(),
            severity: "WARNING".to_string(),
            message: format!(
                "Transaction {} of {} {} exceeds your spending threshold",
                event.transaction_id, event.amount, event.currency
            ),
            threshold,
            current_value: event.amount,
            account_number: event.from_account_number.clone(),
        };
        self.producer
            .emit_caused_by(&alert, envelope, PublishMode::FireAndForget)
            .await?;
        self.metrics.alert_raised().await;

        warn!(
            alert_id = %alert.alert_id,
            user_id = alert.user_id,
            amount = %event.amount,
            "High spending alert raised"
        );
        Ok(())
    }
}
