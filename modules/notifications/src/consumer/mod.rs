use async_trait::async_trait;
use event_bus::events::UserCreated;
use event_bus::{DomainEvent, EventCatalog, EventEnvelope, EventError};
use event_consumer::{EventHandler, HandlerContext, HandlerRegistry, RegistryError};
use std::sync::Arc;
use tracing::debug;

use crate::services::NotificationService;
use crate::templates::{self, NOTIFIED_EVENT_TYPES};

/// Renders and delivers the notification for every notified event type
pub struct NotificationHandler {
    service: Arc<NotificationService>,
}

impl NotificationHandler {
    pub fn new(service: Arc<NotificationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, envelope: &EventEnvelope, ctx: &HandlerContext) -> Result<(), EventError> {
        if envelope.event_type == UserCreated::EVENT_TYPE {
            let user: UserCreated = envelope.payload_as()?;
            let initialised = self
                .service
                .preferences()
                .initialize_defaults(user.user_id)
                .await;
            debug!(user_id = user.user_id, kinds = initialised, "Default preferences initialised");
        }

        let Some(notification) = templates::render(envelope)? else {
            return Ok(());
        };
        self.service
            .deliver(envelope, &notification, ctx.attempt)
            .await?;
        Ok(())
    }
}

pub fn build_registry(
    catalog: Arc<EventCatalog>,
    service: Arc<NotificationService>,
) -> Result<HandlerRegistry, RegistryError> {
    let handler: Arc<dyn EventHandler> = Arc::new(NotificationHandler::new(service));

    NOTIFIED_EVENT_TYPES
        .iter()
        .fold(HandlerRegistry::builder(catalog), |builder, event_type| {
            builder.on(event_type, handler.clone())
        })
        .require(&NOTIFIED_EVENT_TYPES)
        .build()
}
