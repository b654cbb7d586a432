//! Idempotent consumer
//!
//! Subscribes a consumer group to every topic its registry handles and
//! processes each message through:
//!
//! 1. Decode the envelope (malformed input is dead-lettered, then committed)
//! 2. Resolve the handler (unknown types are committed and dropped)
//! 3. Claim the delivery record (duplicates are committed without running the handler)
//! 4. Run the handler under the retry coordinator
//! 5. Mark the record terminal, then commit the transport offset
//!
//! The offset is committed only after step 5, never before the handler
//! has finished.
//!
//! Messages are spread over a fixed number of lanes by partition key.
//! Each lane is one task that processes its messages strictly in order, so
//! events about one entity are handled in publish order while unrelated
//! entities proceed in parallel. A lane whose message fails with a storage
//! or commit error retries that message before taking the next one.
//!
//! Lanes commit independently, so a later offset may be committed while an
//! earlier one on the same transport partition is still running. The bus
//! keeps the group's position at the earliest uncommitted offset, so an
//! unfinished message is redelivered after a restart.

use event_bus::{partition_for, BusMessage, EventBus, EventEnvelope, EventError};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::config::ConsumerConfig;
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::delivery::{Claim, DeliveryStore};
use crate::registry::HandlerRegistry;
use crate::retry::{RetryCoordinator, RetryOutcome};

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded; offset committed
    Processed { attempts: u32 },
    /// Already acknowledged or dead-lettered by this group; offset committed
    Duplicate,
    /// Another worker of this group holds the claim; not committed, so the
    /// transport redelivers it once that claim is settled or expires
    InFlight,
    /// No handler for the event type; offset committed
    Unhandled,
    /// Envelope could not be decoded; dead-lettered and committed
    Malformed,
    /// Retries exhausted; dead-lettered and committed
    DeadLettered { attempts: u32 },
}

pub struct IdempotentConsumer {
    bus: Arc<dyn EventBus>,
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn DeliveryStore>,
    coordinator: RetryCoordinator,
    config: ConsumerConfig,
}

impl IdempotentConsumer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        registry: Arc<HandlerRegistry>,
        store: Arc<dyn DeliveryStore>,
        sink: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
    ) -> Self {
        let coordinator =
            RetryCoordinator::new(config.retry.clone(), sink).with_delivery_store(store.clone());
        Self {
            bus,
            registry,
            store,
            coordinator,
            config,
        }
    }

    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Process one delivered message, committing its offset when the
    /// disposition allows
    ///
    /// # Errors
    ///
    /// Storage, dead-letter or commit failures. The message is then left
    /// uncommitted and will be redelivered.
    pub async fn process_message(&self, message: &BusMessage) -> Result<Disposition, EventError> {
        let group = self.config.consumer_group.as_str();
        let span = info_span!(
            "consume_event",
            consumer_group = %group,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            event_id = field::Empty,
            event_type = field::Empty,
        );

        async {
            let envelope = match EventEnvelope::from_bytes(&message.payload) {
                Ok(envelope) => envelope,
                Err(e) => return self.dead_letter_malformed(message, e).await,
            };

            let current = Span::current();
            current.record("event_id", field::display(envelope.event_id));
            current.record("event_type", field::display(&envelope.event_type));

            let Some(handler) = self.registry.handler_for(&envelope.event_type) else {
                if self.registry.catalog().contains(&envelope.event_type) {
                    debug!("No handler registered for event type, skipping");
                } else {
                    warn!(
                        source = %envelope.source,
                        "Unknown event type, acknowledging and dropping"
                    );
                }
                self.commit(message).await?;
                return Ok(Disposition::Unhandled);
            };

            match self
                .store
                .claim(envelope.event_id, group, &envelope.event_type)
                .await?
            {
                Claim::Acquired(_) => {}
                Claim::AlreadyAcknowledged | Claim::AlreadyDeadLettered => {
                    info!("Duplicate event ignored (already processed)");
                    self.commit(message).await?;
                    return Ok(Disposition::Duplicate);
                }
                Claim::InFlight => {
                    debug!("Event is being processed by another worker");
                    return Ok(Disposition::InFlight);
                }
            }

            let outcome = match self
                .coordinator
                .execute(&handler, &envelope, message, group)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.store
                        .release(envelope.event_id, group, Some(&e.to_string()))
                        .await?;
                    return Err(e);
                }
            };

            let disposition = match outcome {
                RetryOutcome::Success { attempts } => {
                    self.store
                        .mark_acknowledged(envelope.event_id, group, attempts)
                        .await?;
                    debug!(attempts = attempts, "Event processed");
                    Disposition::Processed { attempts }
                }
                RetryOutcome::DeadLettered {
                    attempts,
                    final_error,
                } => {
                    self.store
                        .mark_dead_lettered(
                            envelope.event_id,
                            group,
                            attempts,
                            &final_error.to_string(),
                        )
                        .await?;
                    Disposition::DeadLettered { attempts }
                }
            };

            self.commit(message).await?;
            Ok(disposition)
        }
        .instrument(span)
        .await
    }

    async fn dead_letter_malformed(
        &self,
        message: &BusMessage,
        error: EventError,
    ) -> Result<Disposition, EventError> {
        error!(error = %error, "Malformed envelope, moving to dead-letter sink");

        let record =
            DeadLetterRecord::from_message(message, &self.config.consumer_group, 0, &error);
        self.coordinator.sink().send(record).await?;
        self.commit(message).await?;
        Ok(Disposition::Malformed)
    }

    async fn commit(&self, message: &BusMessage) -> Result<(), EventError> {
        self.bus
            .commit(&self.config.consumer_group, message)
            .await
            .map_err(EventError::from)
    }

    /// Consume until `shutdown` is cancelled or every subscription ends
    ///
    /// On cancellation the reader stops, each lane finishes the message it
    /// is processing, and messages still queued in a lane stay uncommitted
    /// for redelivery.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), EventError> {
        let group = self.config.consumer_group.clone();
        let topics = self.registry.topics();

        let mut subscriptions = Vec::with_capacity(topics.len());
        for topic in &topics {
            let stream = self.bus.subscribe(topic, &group).await?;
            info!(consumer_group = %group, topic = %topic, "Subscribed");
            subscriptions.push(stream);
        }
        let mut messages = stream::select_all(subscriptions);

        let lane_count = self.config.lanes.max(1);
        let mut lanes = Vec::with_capacity(lane_count as usize);
        let mut workers = Vec::with_capacity(lane_count as usize);
        for lane in 0..lane_count {
            let (tx, rx) = mpsc::channel(self.config.lane_buffer.max(1));
            lanes.push(tx);
            workers.push(tokio::spawn(
                run_lane(self.clone(), rx, shutdown.clone())
                    .instrument(info_span!("consumer_lane", consumer_group = %group, lane = lane)),
            ));
        }

        info!(
            consumer_group = %group,
            topics = topics.len(),
            lanes = lane_count,
            "Consumer started"
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = messages.next() => next,
            };

            let Some(message) = next else {
                info!(consumer_group = %group, "All subscriptions ended");
                break;
            };

            let lane = partition_for(&message.ordering_key(), lane_count) as usize;
            let sent = tokio::select! {
                _ = shutdown.cancelled() => break,
                sent = lanes[lane].send(message) => sent,
            };
            if sent.is_err() {
                warn!(consumer_group = %group, lane = lane, "Lane stopped, shutting consumer down");
                break;
            }
        }

        drop(lanes);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(consumer_group = %group, error = %e, "Consumer lane panicked");
            }
        }

        info!(consumer_group = %group, "Consumer stopped");
        Ok(())
    }

    /// Run on a background task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<(), EventError>> {
        let consumer = Arc::new(self);
        tokio::spawn(async move {
            let group = consumer.config.consumer_group.clone();
            let result = consumer.run(shutdown).await;
            if let Err(e) = &result {
                error!(consumer_group = %group, error = %e, "Consumer failed");
            }
            result
        })
    }
}

async fn run_lane(
    consumer: Arc<IdempotentConsumer>,
    mut rx: mpsc::Receiver<BusMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // Not raced against shutdown: an in-flight message always completes
        if !process_until_settled(&consumer, &message, &shutdown).await {
            break;
        }
    }
}

/// Process one message, retrying storage and commit failures in place
///
/// Returns `false` when shutdown interrupted the retries; the message then
/// stays uncommitted.
async fn process_until_settled(
    consumer: &IdempotentConsumer,
    message: &BusMessage,
    shutdown: &CancellationToken,
) -> bool {
    let mut failures: u32 = 0;
    loop {
        let error = match consumer.process_message(message).await {
            Ok(_) => return true,
            Err(e) => e,
        };

        failures = failures.saturating_add(1);
        let delay = consumer.config.retry.backoff.delay_for(failures);
        error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            failures = failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Message processing failed, retrying before the next message"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    "Shutdown during retry, message left uncommitted"
                );
                return false;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
