use event_bus::events::{AccountCreated, CryptoTradeExecuted, TransactionCompleted, UserCreated};
use event_bus::{DomainEvent, EventCatalog, EventEnvelope, EventError};
use event_consumer::{HandlerRegistry, RegistryError};
use std::sync::Arc;

use crate::services::AnalyticsService;

pub fn build_registry(
    catalog: Arc<EventCatalog>,
    service: Arc<AnalyticsService>,
) -> Result<HandlerRegistry, RegistryError> {
    let users = service.clone();
    let accounts = service.clone();
    let transactions = service.clone();
    let trades = service;

    HandlerRegistry::builder(catalog)
        .on_typed(move |event: UserCreated, envelope: EventEnvelope| {
            let service = users.clone();
            async move {
                service.on_user_created(&event, &envelope).await;
                Ok::<(), EventError>(())
            }
        })
        .on_typed(move |event: AccountCreated, envelope: EventEnvelope| {
            let service = accounts.clone();
            async move {
                service.on_account_created(&event, &envelope).await;
                Ok::<(), EventError>(())
            }
        })
        .on_typed(move |event: TransactionCompleted, envelope: EventEnvelope| {
            let service = transactions.clone();
            async move { service.on_transaction(&event, &envelope).await }
        })
        .on_typed(move |event: CryptoTradeExecuted, envelope: EventEnvelope| {
            let service = trades.clone();
            async move {
                service.on_crypto_trade(&event, &envelope).await;
                Ok::<(), EventError>(())
            }
        })
        .require(&[
            UserCreated::EVENT_TYPE,
            AccountCreated::EVENT_TYPE,
            TransactionCompleted::EVENT_TYPE,
            CryptoTradeExecuted::EVENT_TYPE,
        ])
        .build()
}
