//! Typed event producer
//!
//! Resolves each envelope's topic from the catalog and hands the serialized
//! envelope to the transport, keyed by the envelope's partition key.

use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::{
    DomainEvent, EventBus, EventCatalog, EventEnvelope, EventError, PublishReceipt,
};

/// Delivery guarantee requested from [`EventProducer::publish_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Wait for the transport to acknowledge durable receipt
    #[default]
    Confirmed,
    /// Hand off to a background task and return immediately.
    /// Failures are logged, never reported to the caller.
    FireAndForget,
}

/// Publishes envelopes onto the bus
///
/// Cheap to clone; every service holds one and shares it between handlers.
#[derive(Clone)]
pub struct EventProducer {
    bus: Arc<dyn EventBus>,
    catalog: Arc<EventCatalog>,
    source: String,
}

impl EventProducer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        catalog: Arc<EventCatalog>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            catalog,
            source: source.into(),
        }
    }

    /// Service name stamped into envelopes built by [`emit`](Self::emit)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn catalog(&self) -> &Arc<EventCatalog> {
        &self.catalog
    }

    /// Publish an envelope and wait for the transport to confirm it
    ///
    /// # Errors
    ///
    /// * `UnknownEventType` if the envelope's type is not in the catalog
    /// * `InvalidPayload` if the payload does not match its schema
    /// * `TransportUnavailable` if the bus rejects or cannot confirm the write
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishReceipt, EventError> {
        let (topic, bytes) = self.prepare(envelope)?;

        let span = info_span!(
            "publish_event",
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            topic = %topic,
            partition_key = %envelope.partition_key,
        );

        async {
            match self.bus.publish(&topic, &envelope.partition_key, bytes).await {
                Ok(receipt) => {
                    debug!(
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "Event published"
                    );
                    Ok(receipt)
                }
                Err(e) => {
                    error!(error = %e, "Failed to publish event");
                    Err(EventError::TransportUnavailable {
                        topic: topic.clone(),
                        cause: e.to_string(),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Publish with an explicit delivery mode
    ///
    /// Catalog and schema checks run synchronously in both modes, so a bad
    /// envelope is always reported. In `FireAndForget` mode the transport
    /// write happens on a spawned task and `Ok(None)` is returned.
    pub async fn publish_with(
        &self,
        envelope: &EventEnvelope,
        mode: PublishMode,
    ) -> Result<Option<PublishReceipt>, EventError> {
        match mode {
            PublishMode::Confirmed => self.publish(envelope).await.map(Some),
            PublishMode::FireAndForget => {
                let (topic, bytes) = self.prepare(envelope)?;
                let bus = self.bus.clone();
                let key = envelope.partition_key.clone();
                let event_id = envelope.event_id;
                let event_type = envelope.event_type.clone();

                tokio::spawn(async move {
                    if let Err(e) = bus.publish(&topic, &key, bytes).await {
                        warn!(
                            event_id = %event_id,
                            event_type = %event_type,
                            topic = %topic,
                            error = %e,
                            "Fire-and-forget publish failed"
                        );
                    }
                });

                Ok(None)
            }
        }
    }

    /// Build an envelope from a typed event and publish it
    pub async fn emit<E: DomainEvent>(
        &self,
        event: &E,
        mode: PublishMode,
    ) -> Result<EventEnvelope, EventError> {
        let envelope = EventEnvelope::from_event(&self.source, event)?;
        self.publish_with(&envelope, mode).await?;
        Ok(envelope)
    }

    /// Publish a typed event caused by `cause`, keeping its correlation
    pub async fn emit_caused_by<E: DomainEvent>(
        &self,
        event: &E,
        cause: &EventEnvelope,
        mode: PublishMode,
    ) -> Result<EventEnvelope, EventError> {
        let envelope = EventEnvelope::from_event(&self.source, event)?.caused_by(cause);
        self.publish_with(&envelope, mode).await?;
        Ok(envelope)
    }

    fn prepare(&self, envelope: &EventEnvelope) -> Result<(String, Vec<u8>), EventError> {
        let topic = self.catalog.topic_for(&envelope.event_type)?.to_string();
        self.catalog
            .validate_payload(&envelope.event_type, &envelope.payload)?;
        let bytes = envelope.to_bytes()?;
        Ok((topic, bytes))
    }
}
