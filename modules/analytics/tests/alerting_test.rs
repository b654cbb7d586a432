use analytics_rs::metrics::{Metrics, Volume};
use analytics_rs::services::AnalyticsService;
use analytics_rs::{build_registry, AnalyticsConfig, SERVICE_NAME};
use event_bus::events::{AlertTriggered, CryptoTradeExecuted, TradeSide, TransactionCompleted};
use event_bus::{EventCatalog, EventEnvelope, EventProducer, InMemoryBus, PublishMode};
use event_consumer::{
    ConsumerConfig, IdempotentConsumer, InMemoryDeadLetterSink, InMemoryDeliveryStore,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    bus: Arc<InMemoryBus>,
    catalog: Arc<EventCatalog>,
    service: Arc<AnalyticsService>,
    upstream: EventProducer,
}

impl Fixture {
    fn new(threshold: i64) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let catalog = Arc::new(EventCatalog::banking().unwrap());
        let service = Arc::new(AnalyticsService::new(
            Arc::new(Metrics::new()),
            EventProducer::new(bus.clone(), catalog.clone(), SERVICE_NAME),
            AnalyticsConfig {
                high_spend_threshold: Decimal::new(threshold, 0),
            },
        ));
        Self {
            upstream: EventProducer::new(bus.clone(), catalog.clone(), "payment-service"),
            bus,
            catalog,
            service,
        }
    }

    async fn consume(&self, topics: &[&str]) {
        let consumer = IdempotentConsumer::new(
            self.bus.clone(),
            Arc::new(build_registry(self.catalog.clone(), self.service.clone()).unwrap()),
            Arc::new(InMemoryDeliveryStore::new()),
            Arc::new(InMemoryDeadLetterSink::new()),
            ConsumerConfig::new(SERVICE_NAME),
        );
        let token = CancellationToken::new();
        let task = consumer.spawn(token.clone());
        tokio::time::timeout(Duration::from_secs(5), async {
            for topic in topics {
                while self.bus.lag(topic, SERVICE_NAME).await > 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        })
        .await
        .expect("consumer did not drain");
        token.cancel();
        task.await.unwrap().unwrap();
    }

    /// Fire-and-forget publishes land asynchronously
    async fn alerts(&self, expected: usize) -> Vec<AlertTriggered> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let published = self.bus.messages("alert.triggered").await;
                if published.len() >= expected {
                    return published;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("alerts were not published")
        .into_iter()
        .map(|bytes| EventEnvelope::from_bytes(&bytes).unwrap().payload_as().unwrap())
        .collect()
    }
}

fn payment(id: &str, amount: i64, currency: &str) -> TransactionCompleted {
    TransactionCompleted {
        transaction_id: id.into(),
        user_id: 7,
        from_account_id: Some(42),
        to_account_id: None,
        from_account_number: Some("ACC-00000042".into()),
        to_account_number: None,
        amount: Decimal::new(amount, 0),
        currency: currency.into(),
        transaction_type: "PAYMENT".into(),
        status: "COMPLETED".into(),
        description: None,
    }
}

#[tokio::test]
async fn test_high_spend_raises_one_alert() {
    let fx = Fixture::new(1000);

    fx.upstream
        .emit(&payment("T1", 50, "EUR"), PublishMode::Confirmed)
        .await
        .unwrap();
    let big = fx
        .upstream
        .emit(&payment("T2", 1000, "EUR"), PublishMode::Confirmed)
        .await
        .unwrap();
    fx.consume(&["transaction.completed"]).await;

    let alerts = fx.alerts(1).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_id, format!("ALERT-{}", big.event_id));
    assert_eq!(alerts[0].alert_type, "HIGH_SPENDING");
    assert_eq!(alerts[0].current_value, Decimal::new(1000, 0));
    assert_eq!(alerts[0].account_number.as_deref(), Some("ACC-00000042"));

    let snapshot = fx.service.metrics().snapshot().await;
    assert_eq!(
        snapshot.transactions.get("EUR"),
        Some(&Volume {
            count: 2,
            total: Decimal::new(1050, 0),
        })
    );
    assert_eq!(snapshot.alerts_raised, 1);
}

#[tokio::test]
async fn test_redelivered_transaction_counts_once() {
    let fx = Fixture::new(1000);
    let envelope = EventEnvelope::from_event("payment-service", &payment("T3", 5000, "USD")).unwrap();

    // The handler sees the same event twice when delivery records are lost
    fx.upstream.publish(&envelope).await.unwrap();
    fx.consume(&["transaction.completed"]).await;
    fx.upstream.publish(&envelope).await.unwrap();
    fx.consume(&["transaction.completed"]).await;

    let snapshot = fx.service.metrics().snapshot().await;
    assert_eq!(snapshot.transactions["USD"].count, 1);
    assert_eq!(snapshot.alerts_raised, 1);
    assert_eq!(fx.alerts(1).await.len(), 1);
}

#[tokio::test]
async fn test_crypto_trades_aggregate_by_fiat_currency() {
    let fx = Fixture::new(1000);
    let crypto = EventProducer::new(fx.bus.clone(), fx.catalog.clone(), "crypto-service");

    for (trade_id, fiat) in [(1, 300), (2, 200)] {
        crypto
            .emit(
                &CryptoTradeExecuted {
                    trade_id,
                    user_id: 7,
                    account_id: 42,
                    crypto_currency: "BTC".into(),
                    trade_type: TradeSide::Buy,
                    crypto_amount: Decimal::new(1, 2),
                    fiat_amount: Decimal::new(fiat, 0),
                    fiat_currency: "USD".into(),
                    exchange_rate: Decimal::new(fiat * 100, 0),
                    status: "EXECUTED".into(),
                },
                PublishMode::Confirmed,
            )
            .await
            .unwrap();
    }
    fx.consume(&["crypto.trade.executed"]).await;

    let snapshot = fx.service.metrics().snapshot().await;
    assert_eq!(snapshot.crypto_trades["USD"].count, 2);
    assert_eq!(snapshot.crypto_trades["USD"].total, Decimal::new(500, 0));
    assert!(snapshot.transactions.is_empty());
}
