//! Event handlers for the account service
//!
//! - `TransactionCompleted`: debit / credit the referenced accounts
//! - `UserDeleted`: freeze the user's accounts

use event_bus::events::{TransactionCompleted, UserDeleted};
use event_bus::{DomainEvent, EventCatalog, EventEnvelope, EventError};
use event_consumer::{HandlerRegistry, RegistryError};
use std::sync::Arc;

use crate::services::AccountService;

pub fn build_registry(
    catalog: Arc<EventCatalog>,
    service: Arc<AccountService>,
) -> Result<HandlerRegistry, RegistryError> {
    let on_transaction = service.clone();
    let on_user_deleted = service;

    HandlerRegistry::builder(catalog)
        .on_typed(move |event: TransactionCompleted, envelope: EventEnvelope| {
            let service = on_transaction.clone();
            async move {
                service
                    .apply_transaction(&event, &envelope)
                    .await
                    .map_err(EventError::from)
            }
        })
        .on_typed(move |event: UserDeleted, _envelope: EventEnvelope| {
            let service = on_user_deleted.clone();
            async move {
                service.freeze_user_accounts(event.user_id).await;
                Ok::<(), EventError>(())
            }
        })
        .require(&[TransactionCompleted::EVENT_TYPE, UserDeleted::EVENT_TYPE])
        .build()
}
