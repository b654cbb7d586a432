//! Retry/backoff coordinator
//!
//! Runs a handler under the bounded retry policy and, once the attempts are
//! used up, hands the event to the dead-letter sink. A handler that panics
//! counts as a failed attempt.

use event_bus::consumer_retry::{retry_with_backoff_observed, RetryConfig};
use event_bus::{BusMessage, EventEnvelope, EventError};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::delivery::DeliveryStore;
use crate::registry::{EventHandler, HandlerContext};

/// Terminal result of a coordinated handler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Success { attempts: u32 },
    /// The event was stored in the dead-letter sink
    DeadLettered { attempts: u32, final_error: EventError },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts } | RetryOutcome::DeadLettered { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Clone)]
pub struct RetryCoordinator {
    config: RetryConfig,
    sink: Arc<dyn DeadLetterSink>,
    /// Receives every failed attempt when set
    store: Option<Arc<dyn DeliveryStore>>,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig, sink: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            config,
            sink,
            store: None,
        }
    }

    /// Record each failed attempt on the event's delivery record
    pub fn with_delivery_store(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn DeadLetterSink> {
        &self.sink
    }

    /// Invoke `handler` until it succeeds, fails structurally, or runs out
    /// of attempts
    ///
    /// # Errors
    ///
    /// Only when the dead-letter sink itself fails; the caller must then
    /// leave the message unacknowledged.
    pub async fn execute(
        &self,
        handler: &Arc<dyn EventHandler>,
        envelope: &EventEnvelope,
        message: &BusMessage,
        consumer_group: &str,
    ) -> Result<RetryOutcome, EventError> {
        let context = format!("{consumer_group}/{}", envelope.event_type);

        let result = retry_with_backoff_observed(
            |attempt| {
                let handler = handler.clone();
                let ctx = HandlerContext {
                    consumer_group: consumer_group.to_string(),
                    topic: message.topic.clone(),
                    attempt,
                };
                async move {
                    AssertUnwindSafe(handler.handle(envelope, &ctx))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(panicked(panic)))
                }
            },
            &self.config,
            &context,
            |attempt, error| {
                let store = self.store.clone();
                async move {
                    let Some(store) = store else { return };
                    let recorded = store
                        .record_attempt(
                            envelope.event_id,
                            consumer_group,
                            attempt,
                            &error.to_string(),
                        )
                        .await;
                    if let Err(e) = recorded {
                        warn!(
                            event_id = %envelope.event_id,
                            attempt = attempt,
                            error = %e,
                            "Failed to record attempt on delivery record"
                        );
                    }
                }
            },
        )
        .await;

        match result {
            Ok(((), attempts)) => Ok(RetryOutcome::Success { attempts }),
            Err(exhausted) => {
                let record = DeadLetterRecord::from_message(
                    message,
                    consumer_group,
                    exhausted.attempts,
                    &exhausted.last_error,
                );

                if let Err(sink_err) = self.sink.send(record).await {
                    error!(
                        event_id = %envelope.event_id,
                        attempts = exhausted.attempts,
                        error = %exhausted.last_error,
                        dlq_error = %sink_err,
                        "Failed to write dead letter, event left unacknowledged"
                    );
                    return Err(sink_err);
                }

                error!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Event moved to dead-letter sink"
                );

                Ok(RetryOutcome::DeadLettered {
                    attempts: exhausted.attempts,
                    final_error: exhausted.last_error,
                })
            }
        }
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> EventError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    EventError::domain(format!("handler panicked: {detail}"))
}
