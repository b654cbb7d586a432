//! Account service consuming `TransactionCompleted` and `UserDeleted`
//! through the idempotent consumer over the in-memory bus.

use accounts_rs::models::{AccountStatus, OpenAccountRequest};
use accounts_rs::repos::AccountRepo;
use accounts_rs::services::AccountService;
use accounts_rs::{build_registry, SERVICE_NAME};
use async_trait::async_trait;
use event_bus::consumer_retry::{BackoffPolicy, RetryConfig};
use event_bus::events::{AccountCreated, BalanceUpdated, TransactionCompleted, UserDeleted};
use event_bus::{
    BusError, BusMessage, BusResult, DomainEvent, EventBus, EventCatalog, EventEnvelope,
    EventError, EventProducer, InMemoryBus, PublishMode, PublishReceipt,
};
use event_consumer::{
    ConsumerConfig, DeliveryStatus, DeliveryStore, EventHandler, HandlerContext, HandlerRegistry,
    IdempotentConsumer, InMemoryDeadLetterSink, InMemoryDeliveryStore,
};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GROUP: &str = "account-service";

/// Fails the first `failures` publishes to one topic
struct FlakyBus {
    inner: Arc<InMemoryBus>,
    topic: &'static str,
    failures: AtomicU32,
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt> {
        if topic == self.topic
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(BusError::PublishError {
                topic: topic.to_string(),
                cause: "broker unavailable".to_string(),
            });
        }
        self.inner.publish(topic, partition_key, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        self.inner.subscribe(topic, consumer_group).await
    }

    async fn commit(&self, consumer_group: &str, message: &BusMessage) -> BusResult<()> {
        self.inner.commit(consumer_group, message).await
    }
}

struct Counted {
    inner: Arc<dyn EventHandler>,
    calls: AtomicU32,
}

#[async_trait]
impl EventHandler for Counted {
    async fn handle(&self, envelope: &EventEnvelope, ctx: &HandlerContext) -> Result<(), EventError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.handle(envelope, ctx).await
    }
}

struct Fixture {
    bus: Arc<InMemoryBus>,
    catalog: Arc<EventCatalog>,
    service: Arc<AccountService>,
    payments: EventProducer,
    store: Arc<InMemoryDeliveryStore>,
    sink: Arc<InMemoryDeadLetterSink>,
    transaction_calls: Arc<Counted>,
    registry: HandlerRegistry,
}

impl Fixture {
    /// `balance_publish_failures` publishes of `BalanceUpdated` fail first
    fn new(balance_publish_failures: u32) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let catalog = Arc::new(EventCatalog::banking().unwrap());
        let flaky = Arc::new(FlakyBus {
            inner: bus.clone(),
            topic: "balance.updated",
            failures: AtomicU32::new(balance_publish_failures),
        });

        let service = Arc::new(AccountService::new(
            Arc::new(AccountRepo::new()),
            EventProducer::new(flaky, catalog.clone(), SERVICE_NAME),
        ));

        let handlers = build_registry(catalog.clone(), service.clone()).unwrap();
        let transaction_calls = Arc::new(Counted {
            inner: handlers
                .handler_for(TransactionCompleted::EVENT_TYPE)
                .unwrap(),
            calls: AtomicU32::new(0),
        });
        let registry = HandlerRegistry::builder(catalog.clone())
            .on_event::<TransactionCompleted>(transaction_calls.clone())
            .on_event::<UserDeleted>(handlers.handler_for(UserDeleted::EVENT_TYPE).unwrap())
            .build()
            .unwrap();

        Self {
            payments: EventProducer::new(bus.clone(), catalog.clone(), "payment-service"),
            bus,
            catalog,
            service,
            store: Arc::new(InMemoryDeliveryStore::new()),
            sink: Arc::new(InMemoryDeadLetterSink::new()),
            transaction_calls,
            registry,
        }
    }

    async fn open(&self, user_id: i64, deposit: i64) -> i64 {
        self.service
            .open_account(OpenAccountRequest {
                user_id,
                account_type: "CHECKING".into(),
                currency: "EUR".into(),
                initial_deposit: Decimal::new(deposit, 0),
            })
            .await
            .unwrap()
            .account_id
    }

    async fn balance(&self, account_id: i64) -> Decimal {
        self.service.repo().get(account_id).await.unwrap().balance
    }

    /// Run the consumer until `topic` has no uncommitted messages
    async fn consume(&self, topic: &str) {
        let retry = RetryConfig::default()
            .with_max_attempts(3)
            .with_backoff(BackoffPolicy::Fixed(Duration::from_millis(1)));
        let consumer = IdempotentConsumer::new(
            self.bus.clone(),
            Arc::new(self.registry.clone()),
            self.store.clone(),
            self.sink.clone(),
            ConsumerConfig::new(GROUP).with_retry(retry),
        );

        let token = CancellationToken::new();
        let task = consumer.spawn(token.clone());
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.bus.lag(topic, GROUP).await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer did not drain the topic");
        token.cancel();
        task.await.unwrap().unwrap();
    }
}

fn transaction(id: &str, from: Option<i64>, to: Option<i64>, amount: i64) -> TransactionCompleted {
    TransactionCompleted {
        transaction_id: id.into(),
        user_id: 7,
        from_account_id: from,
        to_account_id: to,
        from_account_number: None,
        to_account_number: None,
        amount: Decimal::new(amount, 0),
        currency: "EUR".into(),
        transaction_type: "TRANSFER".into(),
        status: "COMPLETED".into(),
        description: None,
    }
}

#[tokio::test]
async fn test_open_account_publishes_account_created() {
    let fx = Fixture::new(0);
    let account_id = fx.open(7, 250).await;

    let published = fx.bus.messages("account.created").await;
    assert_eq!(published.len(), 1);

    let envelope = EventEnvelope::from_bytes(&published[0]).unwrap();
    assert_eq!(envelope.source, SERVICE_NAME);
    assert_eq!(envelope.partition_key, account_id.to_string());

    let event: AccountCreated = envelope.payload_as().unwrap();
    assert_eq!(event.user_id, 7);
    assert_eq!(event.initial_balance, Decimal::new(250, 0));
    assert_eq!(event.account_number, format!("ACC-{account_id:08}"));
}

#[tokio::test]
async fn test_transient_failures_retry_and_update_balance_once() {
    let fx = Fixture::new(2);
    let from = fx.open(7, 100).await;
    let to = fx.open(8, 0).await;

    let envelope = fx
        .payments
        .emit(&transaction("T1", Some(from), Some(to), 25), PublishMode::Confirmed)
        .await
        .unwrap();
    fx.consume("transaction.completed").await;

    assert_eq!(fx.transaction_calls.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fx.balance(from).await, Decimal::new(75, 0));
    assert_eq!(fx.balance(to).await, Decimal::new(25, 0));

    let updates: Vec<BalanceUpdated> = fx
        .bus
        .messages("balance.updated")
        .await
        .iter()
        .map(|bytes| EventEnvelope::from_bytes(bytes).unwrap().payload_as().unwrap())
        .collect();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|u| u.reason == "TRANSFER T1"));

    let record = fx.store.get(envelope.event_id, GROUP).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Acknowledged);
    assert_eq!(record.attempt_count, 3);
    assert!(fx.sink.is_empty().await);
}

#[tokio::test]
async fn test_permanent_failure_is_dead_lettered_and_acknowledged() {
    let fx = Fixture::new(0);

    // Account 999 does not exist, so every attempt fails
    let envelope = fx
        .payments
        .emit(&transaction("T2", Some(999), None, 10), PublishMode::Confirmed)
        .await
        .unwrap();
    fx.consume("transaction.completed").await;

    assert_eq!(fx.transaction_calls.calls.load(Ordering::SeqCst), 3);

    let dead = fx.sink.records().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_id, Some(envelope.event_id));
    assert_eq!(dead[0].attempt_count, 3);
    assert_eq!(dead[0].final_error, "domain error: account 999 not found");
    assert_eq!(fx.bus.lag("transaction.completed", GROUP).await, 0);
}

#[tokio::test]
async fn test_redelivered_transaction_moves_money_once() {
    let fx = Fixture::new(0);
    let from = fx.open(7, 100).await;
    let to = fx.open(8, 0).await;

    let envelope = EventEnvelope::from_event(
        "payment-service",
        &transaction("T3", Some(from), Some(to), 40),
    )
    .unwrap();
    fx.payments.publish(&envelope).await.unwrap();
    fx.payments.publish(&envelope).await.unwrap();
    fx.consume("transaction.completed").await;

    assert_eq!(fx.transaction_calls.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.balance(from).await, Decimal::new(60, 0));
    assert_eq!(fx.balance(to).await, Decimal::new(40, 0));
}

#[tokio::test]
async fn test_user_deleted_freezes_accounts() {
    let fx = Fixture::new(0);
    let first = fx.open(7, 10).await;
    let second = fx.open(7, 20).await;
    let other = fx.open(8, 30).await;

    let users = EventProducer::new(fx.bus.clone(), fx.catalog.clone(), "user-service");
    users
        .emit(
            &UserDeleted {
                user_id: 7,
                reason: Some("account closed".into()),
            },
            PublishMode::Confirmed,
        )
        .await
        .unwrap();
    fx.consume("user-events").await;

    let repo = fx.service.repo();
    assert_eq!(repo.get(first).await.unwrap().status, AccountStatus::Frozen);
    assert_eq!(repo.get(second).await.unwrap().status, AccountStatus::Frozen);
    assert_eq!(repo.get(other).await.unwrap().status, AccountStatus::Active);
}
