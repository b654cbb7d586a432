use event_bus::events::AccountCreated;
use event_bus::{DomainEvent, EventCatalog, EventEnvelope, EventError};
use event_consumer::{HandlerRegistry, RegistryError};
use std::sync::Arc;

use crate::services::CryptoService;

/// `AccountCreated` initialises the account's wallet
pub fn build_registry(
    catalog: Arc<EventCatalog>,
    service: Arc<CryptoService>,
) -> Result<HandlerRegistry, RegistryError> {
    HandlerRegistry::builder(catalog)
        .on_typed(move |event: AccountCreated, _envelope: EventEnvelope| {
            let service = service.clone();
            async move {
                service.on_account_created(&event).await;
                Ok::<(), EventError>(())
            }
        })
        .require(&[AccountCreated::EVENT_TYPE])
        .build()
}
