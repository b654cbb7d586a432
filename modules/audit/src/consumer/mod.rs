use async_trait::async_trait;
use event_bus::{EventCatalog, EventEnvelope, EventError};
use event_consumer::{EventHandler, HandlerContext, HandlerRegistry, RegistryError};
use std::sync::Arc;
use tracing::{debug, info};

use crate::repos::AuditLog;

/// Records every envelope it is handed, whatever its type
pub struct AuditHandler {
    log: Arc<AuditLog>,
}

impl AuditHandler {
    pub fn new(log: Arc<AuditLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventHandler for AuditHandler {
    async fn handle(&self, envelope: &EventEnvelope, ctx: &HandlerContext) -> Result<(), EventError> {
        match self.log.append(envelope, &ctx.topic).await {
            Some(entry) => info!(
                sequence = entry.sequence,
                event_id = %entry.event_id,
                event_type = %entry.event_type,
                topic = %entry.topic,
                source = %entry.source,
                "Audit entry recorded"
            ),
            None => debug!(event_id = %envelope.event_id, "Event already audited"),
        }
        Ok(())
    }
}

/// One handler for every catalogued type, so the audit group subscribes to
/// every topic
pub fn build_registry(
    catalog: Arc<EventCatalog>,
    log: Arc<AuditLog>,
) -> Result<HandlerRegistry, RegistryError> {
    HandlerRegistry::builder(catalog)
        .on_all(Arc::new(AuditHandler::new(log)))
        .build()
}
