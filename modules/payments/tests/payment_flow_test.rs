//! Payment outcomes and the events they publish

use async_trait::async_trait;
use event_bus::events::{FraudDetected, PaymentFailed, TransactionCompleted};
use event_bus::{
    topics, BusError, BusMessage, BusResult, EventBus, EventCatalog, EventEnvelope,
    EventProducer, InMemoryBus, PublishReceipt,
};
use futures::stream::BoxStream;
use payments_rs::models::{PaymentRequest, PaymentStatus, PaymentType};
use payments_rs::repos::{PaymentError, PaymentRepo};
use payments_rs::services::{FraudRules, PaymentLimits, PaymentService};
use payments_rs::SERVICE_NAME;
use rust_decimal::Decimal;
use std::sync::Arc;

fn service(bus: Arc<dyn EventBus>) -> PaymentService {
    let catalog = Arc::new(EventCatalog::banking().unwrap());
    PaymentService::new(
        Arc::new(PaymentRepo::new()),
        EventProducer::new(bus, catalog, SERVICE_NAME),
    )
}

fn transfer(key: &str, amount: i64) -> PaymentRequest {
    PaymentRequest {
        idempotency_key: key.into(),
        user_id: 7,
        payment_type: PaymentType::InternalTransfer,
        from_account_id: 100,
        from_account_number: Some("ACC-00000100".into()),
        to_account_id: Some(200),
        to_account_number: Some("ACC-00000200".into()),
        beneficiary_name: Some("Grace Hopper".into()),
        amount: Decimal::new(amount, 0),
        currency: "EUR".into(),
        description: Some("rent".into()),
    }
}

async fn published(bus: &InMemoryBus, topic: &str) -> Vec<EventEnvelope> {
    bus.messages(topic)
        .await
        .iter()
        .map(|bytes| EventEnvelope::from_bytes(bytes).unwrap())
        .collect()
}

#[tokio::test]
async fn test_completed_payment_publishes_transaction_completed() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone());

    let payment = payments.initiate(transfer("K1", 250)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let events = published(&bus, topics::TRANSACTION_COMPLETED).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].partition_key, payment.transaction_id);
    assert_eq!(events[0].source, SERVICE_NAME);

    let completed: TransactionCompleted = events[0].payload_as().unwrap();
    assert_eq!(completed.transaction_id, payment.transaction_id);
    assert_eq!(completed.from_account_id, Some(100));
    assert_eq!(completed.to_account_id, Some(200));
    assert_eq!(completed.amount, Decimal::new(250, 0));
    assert_eq!(completed.transaction_type, "TRANSFER");
    assert_eq!(completed.status, "COMPLETED");
    assert!(published(&bus, topics::PAYMENT_FAILED).await.is_empty());
}

#[tokio::test]
async fn test_repeated_idempotency_key_publishes_once() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone());

    let first = payments.initiate(transfer("K1", 250)).await.unwrap();
    let again = payments.initiate(transfer("K1", 250)).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(payments.repo().count().await, 1);
    assert_eq!(published(&bus, topics::TRANSACTION_COMPLETED).await.len(), 1);
}

#[tokio::test]
async fn test_limit_breach_publishes_payment_failed() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone());

    payments.initiate(transfer("K1", 4_000)).await.unwrap();
    let refused = payments.initiate(transfer("K2", 1_500)).await.unwrap();
    assert_eq!(refused.status, PaymentStatus::Failed);

    let failed = published(&bus, topics::PAYMENT_FAILED).await;
    assert_eq!(failed.len(), 1);
    let failed: PaymentFailed = failed[0].payload_as().unwrap();
    assert_eq!(failed.transaction_id, refused.transaction_id);
    assert_eq!(failed.account_id, 100);
    assert_eq!(failed.error_code.as_deref(), Some("DAILY_LIMIT_EXCEEDED"));
    assert_eq!(published(&bus, topics::TRANSACTION_COMPLETED).await.len(), 1);
}

#[tokio::test]
async fn test_sanctioned_beneficiary_is_refused() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone());

    let request = PaymentRequest {
        beneficiary_name: Some("SANCTIONED Holdings".into()),
        ..transfer("K1", 10)
    };
    let refused = payments.initiate(request).await.unwrap();

    assert_eq!(refused.status, PaymentStatus::Failed);
    let failed: PaymentFailed = published(&bus, topics::PAYMENT_FAILED).await[0]
        .payload_as()
        .unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("COMPLIANCE_REJECTED"));
}

#[tokio::test]
async fn test_high_amount_is_reported_and_still_executed() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone()).with_limits(PaymentLimits {
        daily: Decimal::new(50_000, 0),
        monthly: Decimal::new(100_000, 0),
    });

    let payment = payments.initiate(transfer("K1", 8_000)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let fraud = published(&bus, topics::FRAUD_DETECTED).await;
    assert_eq!(fraud.len(), 1);
    assert_eq!(fraud[0].partition_key, "100");
    let fraud: FraudDetected = fraud[0].payload_as().unwrap();
    assert_eq!(fraud.fraud_type, "HIGH_AMOUNT");
    assert_eq!(fraud.severity, "HIGH");
    assert_eq!(published(&bus, topics::TRANSACTION_COMPLETED).await.len(), 1);
}

#[tokio::test]
async fn test_velocity_breach_blocks_the_payment() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone()).with_fraud_rules(FraudRules {
        max_transactions_per_hour: 2,
        ..FraudRules::default()
    });

    payments.initiate(transfer("K1", 10)).await.unwrap();
    payments.initiate(transfer("K2", 10)).await.unwrap();
    let blocked = payments.initiate(transfer("K3", 10)).await.unwrap();
    assert_eq!(blocked.status, PaymentStatus::Rejected);

    let fraud: FraudDetected = published(&bus, topics::FRAUD_DETECTED).await[0]
        .payload_as()
        .unwrap();
    assert_eq!(fraud.severity, "CRITICAL");
    assert_eq!(fraud.fraud_type, "HIGH_VELOCITY");

    let failed: PaymentFailed = published(&bus, topics::PAYMENT_FAILED).await[0]
        .payload_as()
        .unwrap();
    assert_eq!(failed.transaction_id, blocked.transaction_id);
    assert_eq!(failed.error_code.as_deref(), Some("FRAUD_BLOCKED"));
    assert_eq!(published(&bus, topics::TRANSACTION_COMPLETED).await.len(), 2);
}

#[tokio::test]
async fn test_invalid_request_records_and_publishes_nothing() {
    let bus = Arc::new(InMemoryBus::new());
    let payments = service(bus.clone());

    assert!(matches!(
        payments.initiate(transfer("K1", 0)).await,
        Err(PaymentError::InvalidAmount(_))
    ));
    assert_eq!(payments.repo().count().await, 0);
    assert!(published(&bus, topics::TRANSACTION_COMPLETED).await.is_empty());
    assert!(published(&bus, topics::PAYMENT_FAILED).await.is_empty());
}

struct DownBus;

#[async_trait]
impl EventBus for DownBus {
    async fn publish(&self, topic: &str, _key: &str, _payload: Vec<u8>) -> BusResult<PublishReceipt> {
        Err(BusError::PublishError {
            topic: topic.to_string(),
            cause: "broker unavailable".to_string(),
        })
    }

    async fn subscribe(&self, topic: &str, _group: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        Err(BusError::SubscribeError {
            topic: topic.to_string(),
            cause: "broker unavailable".to_string(),
        })
    }

    async fn commit(&self, _group: &str, _message: &BusMessage) -> BusResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unconfirmed_outcome_is_rolled_back() {
    let payments = service(Arc::new(DownBus));

    let err = payments.initiate(transfer("K1", 10)).await.unwrap_err();
    assert!(matches!(err, PaymentError::Event(_)));
    assert_eq!(payments.repo().count().await, 0);
}
