//! NATS JetStream implementation of the EventBus trait

use crate::consumer_retry::RetryConfig;
use crate::{BusError, BusMessage, BusResult, EventBus, PublishReceipt, PARTITION_KEY_HEADER};
use async_nats::jetstream::{self, consumer, stream};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Retention for event streams
const STREAM_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);

type PendingKey = (String, String, u64);

/// EventBus implementation using NATS JetStream
///
/// Each topic is backed by one JetStream stream (a single ordered
/// partition), each consumer group by a durable pull consumer with explicit
/// acks. Publishing waits for the server's ack, so a returned receipt means
/// the message is stored. A delivery is acked only when the group commits
/// it; anything left unacked is redelivered after the ack wait, which must
/// outlast the consumer's whole retry budget (see
/// [`RetryConfig::claim_lease`]).
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsBus::connect("nats://localhost:4222").await?;
/// bus.publish("account.created", "42", b"hello".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    known_streams: Arc<Mutex<HashSet<String>>>,
    /// Delivered but not yet committed messages, keyed by (group, topic, sequence)
    pending: Arc<Mutex<HashMap<PendingKey, jetstream::Message>>>,
    shutdown: Arc<watch::Sender<bool>>,
    /// Unacked deliveries older than this are redelivered by the server
    ack_wait: Duration,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jetstream: jetstream::new(client.clone()),
            client,
            known_streams: Arc::new(Mutex::new(HashSet::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(shutdown),
            ack_wait: RetryConfig::default().claim_lease(),
        }
    }

    /// Set the redelivery timeout of durable consumers created from now on
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(format!("{url}: {e}")))?;
        Ok(Self::new(client))
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// JetStream stream name for a topic; stream names may not contain dots
    pub fn stream_name(topic: &str) -> String {
        sanitize(topic).to_uppercase()
    }

    async fn ensure_stream(&self, topic: &str) -> BusResult<stream::Stream> {
        let name = Self::stream_name(topic);
        let config = stream::Config {
            name: name.clone(),
            subjects: vec![topic.to_string()],
            max_age: STREAM_MAX_AGE,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::SubscribeError {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?;

        if self.known_streams.lock().await.insert(name.clone()) {
            debug!(topic = %topic, stream = %name, "JetStream stream ready");
        }
        Ok(stream)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt> {
        if *self.shutdown.borrow() {
            return Err(BusError::Closed);
        }

        let stream_ready = self
            .known_streams
            .lock()
            .await
            .contains(&Self::stream_name(topic));
        if !stream_ready {
            self.ensure_stream(topic)
                .await
                .map_err(|e| BusError::PublishError {
                    topic: topic.to_string(),
                    cause: e.to_string(),
                })?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(PARTITION_KEY_HEADER, partition_key);

        let ack = self
            .jetstream
            .publish_with_headers(topic.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::PublishError {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::PublishError {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?;

        Ok(PublishReceipt {
            topic: topic.to_string(),
            partition: 0,
            offset: ack.sequence,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        let stream = self.ensure_stream(topic).await?;
        let durable = sanitize(consumer_group);

        let consumer: consumer::Consumer<consumer::pull::Config> = stream
            .get_or_create_consumer(
                &durable,
                consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: self.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError {
                topic: topic.to_string(),
                cause: e.to_string(),
            })?;

        let pending = self.pending.clone();
        let mut shutdown = self.shutdown.subscribe();
        let topic = topic.to_string();
        let group = consumer_group.to_string();

        let stream = async_stream::stream! {
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }

                let next = tokio::select! {
                    next = messages.next() => next,
                    _ = shutdown.changed() => break,
                };

                let msg = match next {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(topic = %topic, error = %e, "JetStream delivery error");
                        continue;
                    }
                    None => break,
                };

                let sequence = match msg.info() {
                    Ok(info) => info.stream_sequence,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Message without JetStream metadata");
                        continue;
                    }
                };

                let mut bus_msg = BusMessage::new(topic.clone(), msg.message.payload.to_vec())
                    .at(0, sequence);

                if let Some(nats_headers) = &msg.message.headers {
                    let mut headers = HashMap::new();
                    for (key, values) in nats_headers.iter() {
                        if let Some(value) = values.first() {
                            headers.insert(key.to_string(), value.to_string());
                        }
                    }
                    if let Some(key) = headers.get(PARTITION_KEY_HEADER).cloned() {
                        bus_msg = bus_msg.with_partition_key(key);
                    }
                    if !headers.is_empty() {
                        bus_msg = bus_msg.with_headers(headers);
                    }
                }

                pending
                    .lock()
                    .await
                    .insert((group.clone(), topic.clone(), sequence), msg);

                yield bus_msg;
            }
        };

        Ok(stream.boxed())
    }

    async fn commit(&self, consumer_group: &str, message: &BusMessage) -> BusResult<()> {
        let key = (
            consumer_group.to_string(),
            message.topic.clone(),
            message.offset,
        );
        let delivered = self.pending.lock().await.remove(&key);

        let Some(delivered) = delivered else {
            return Err(BusError::CommitError {
                topic: message.topic.clone(),
                cause: format!("no pending delivery at sequence {}", message.offset),
            });
        };

        delivered.ack().await.map_err(|e| BusError::CommitError {
            topic: message.topic.clone(),
            cause: e.to_string(),
        })
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.shutdown.send_replace(true);
        // Unacked deliveries are redelivered by the server after the ack wait
        self.pending.lock().await.clear();
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))
    }
}
