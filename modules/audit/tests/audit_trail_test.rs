use audit_rs::repos::AuditLog;
use audit_rs::{build_registry, SERVICE_NAME};
use event_bus::events::{AccountCreated, BalanceOperation, BalanceUpdated, UserCreated};
use event_bus::{topics, EventCatalog, EventEnvelope, EventProducer, InMemoryBus, PublishMode};
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
    log: Arc<AuditLog>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            bus: Arc::new(InMemoryBus::with_partitions(4)),
            catalog: Arc::new(EventCatalog::banking().unwrap()),
            log: Arc::new(AuditLog::new()),
        }
    }

    fn producer(&self, source: &str) -> EventProducer {
        EventProducer::new(self.bus.clone(), self.catalog.clone(), source)
    }

    async fn consume(&self) {
        let consumer = IdempotentConsumer::new(
            self.bus.clone(),
            Arc::new(build_registry(self.catalog.clone(), self.log.clone()).unwrap()),
            Arc::new(InMemoryDeliveryStore::new()),
            Arc::new(InMemoryDeadLetterSink::new()),
            ConsumerConfig::new(SERVICE_NAME).with_lanes(4),
        );
        let token = CancellationToken::new();
        let task = consumer.spawn(token.clone());
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut lag = 0;
                for topic in self.catalog.topics() {
                    lag += self.bus.lag(topic, SERVICE_NAME).await;
                }
                if lag == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("audit consumer did not drain");
        token.cancel();
        task.await.unwrap().unwrap();
    }
}

fn balance(account_id: i64, new_balance: i64) -> BalanceUpdated {
    BalanceUpdated {
        account_id,
        account_number: format!("ACC-{account_id:08}"),
        previous_balance: Decimal::new(new_balance - 10, 0),
        new_balance: Decimal::new(new_balance, 0),
        amount: Decimal::new(10, 0),
        operation: BalanceOperation::Credit,
        reason: "DEPOSIT".into(),
    }
}

#[test]
fn test_registry_covers_every_topic() {
    let catalog = Arc::new(EventCatalog::banking().unwrap());
    let registry = build_registry(catalog.clone(), Arc::new(AuditLog::new())).unwrap();

    assert_eq!(registry.topics().len(), catalog.topics().len());
    assert!(registry.handler_for("NotificationFailed").is_some());
}

#[tokio::test]
async fn test_events_from_every_service_are_audited_with_topic_and_source() {
    let fx = Fixture::new();
    let user = fx
        .producer("user-service")
        .emit(
            &UserCreated {
                user_id: 7,
                email: "ada@example.com".into(),
                username: "ada".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                status: "ACTIVE".into(),
            },
            PublishMode::Confirmed,
        )
        .await
        .unwrap();
    let account = fx
        .producer("account-service")
        .emit(
            &AccountCreated {
                account_id: 42,
                user_id: 7,
                account_number: "ACC-00000042".into(),
                account_type: "CHECKING".into(),
                currency: "USD".into(),
                initial_balance: Decimal::ZERO,
            },
            PublishMode::Confirmed,
        )
        .await
        .unwrap();
    fx.consume().await;

    let entries = fx.log.entries().await;
    assert_eq!(entries.len(), 2);

    let user_entry = entries.iter().find(|e| e.event_id == user.event_id).unwrap();
    assert_eq!(user_entry.topic, topics::USER_EVENTS);
    assert_eq!(user_entry.source, "user-service");
    assert_eq!(user_entry.occurred_at, user.occurred_at);

    let account_entry = entries.iter().find(|e| e.event_id == account.event_id).unwrap();
    assert_eq!(account_entry.topic, topics::ACCOUNT_CREATED);
    assert_eq!(account_entry.event_type, "AccountCreated");
}

#[tokio::test]
async fn test_same_key_entries_keep_publish_order() {
    let fx = Fixture::new();
    let accounts = fx.producer("account-service");
    for n in 1..=10 {
        accounts
            .emit(&balance(42, n * 10), PublishMode::Confirmed)
            .await
            .unwrap();
        accounts
            .emit(&balance(43, n * 10), PublishMode::Confirmed)
            .await
            .unwrap();
    }
    fx.consume().await;

    assert_eq!(fx.log.len().await, 20);
    assert_eq!(fx.log.for_key("43").await.len(), 10);

    let audited: Vec<_> = fx
        .log
        .for_key("42")
        .await
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    let published: Vec<_> = fx
        .bus
        .messages(topics::BALANCE_UPDATED)
        .await
        .iter()
        .map(|bytes| EventEnvelope::from_bytes(bytes).unwrap())
        .filter(|e| e.partition_key == "42")
        .map(|e| e.event_id)
        .collect();
    assert_eq!(audited, published);
}

#[tokio::test]
async fn test_redelivery_appends_once() {
    let fx = Fixture::new();
    let envelope = EventEnvelope::from_event("account-service", &balance(42, 100)).unwrap();
    let producer = fx.producer("account-service");

    producer.publish(&envelope).await.unwrap();
    fx.consume().await;
    producer.publish(&envelope).await.unwrap();
    fx.consume().await;

    assert_eq!(fx.log.len().await, 1);
}
