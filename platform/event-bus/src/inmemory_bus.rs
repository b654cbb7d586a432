//! In-memory implementation of the EventBus trait for testing and development

use crate::{
    partition_for, BusError, BusMessage, BusResult, EventBus, PublishReceipt,
    PARTITION_KEY_HEADER,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_PARTITIONS: u32 = 8;

#[derive(Debug, Clone)]
struct StoredMessage {
    partition_key: String,
    payload: Vec<u8>,
}

/// Commit position of one group on one partition
///
/// `next` only advances over a contiguous run of acknowledged offsets;
/// acks above a gap wait in `ahead` until the gap is filled.
#[derive(Debug, Default)]
struct Watermark {
    next: u64,
    ahead: BTreeSet<u64>,
}

impl Watermark {
    fn ack(&mut self, offset: u64) {
        if offset < self.next {
            return;
        }
        self.ahead.insert(offset);
        while self.ahead.remove(&self.next) {
            self.next += 1;
        }
    }

    fn is_acked(&self, offset: u64) -> bool {
        offset < self.next || self.ahead.contains(&offset)
    }

    fn pending(&self, log_len: u64) -> u64 {
        if self.next >= log_len {
            return 0;
        }
        let acked = self.ahead.range(self.next..log_len).count() as u64;
        log_len - self.next - acked
    }
}

#[derive(Default)]
struct LogState {
    /// topic -> partition -> messages, offset is the index
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    /// (topic, group, partition) -> commit position
    committed: HashMap<(String, String, u32), Watermark>,
    closed: bool,
}

impl LogState {
    fn watermark(&self, topic: &str, group: &str, partition: u32) -> Option<&Watermark> {
        self.committed
            .get(&(topic.to_string(), group.to_string(), partition))
    }
}

struct Inner {
    partitions: u32,
    state: Mutex<LogState>,
    /// Bumped on every append and on shutdown to wake subscribers
    version: watch::Sender<u64>,
}

/// EventBus implementation backed by an in-process partitioned log
///
/// Suitable for unit tests, local development and integration tests that
/// need a fast, isolated bus with the same delivery guarantees as the
/// production transport:
///
/// - Each topic is split into a fixed number of partitions; a partition
///   key always maps to the same partition.
/// - Messages are retained, so a subscription replays everything its
///   consumer group has not committed.
/// - Commits are per (topic, group, partition) and never move backwards.
///   A commit above an unacknowledged offset is remembered but does not
///   move the group's position past the gap, so an unfinished or failed
///   message is redelivered to the next subscription.
///
/// A consumer group is expected to have a single live subscription per
/// topic; two concurrent subscriptions of one group both see every message.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// bus.publish("account.created", "42", b"hello".to_vec()).await?;
///
/// // Subscribing after publishing still sees the message
/// let mut stream = bus.subscribe("account.created", "crypto-service").await?;
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.partition_key.as_deref(), Some("42"));
/// bus.commit("crypto-service", &msg).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    /// Create a bus with the default partition count
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with a custom partition count per topic
    pub fn with_partitions(partitions: u32) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                version,
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Every payload published to `topic`, grouped by partition in offset order
    pub async fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        let state = self.inner.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .flat_map(|p| p.iter().map(|m| m.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First offset of a partition `group` has not committed, if it ever committed
    pub async fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        let state = self.inner.state.lock().await;
        state.watermark(topic, group, partition).map(|w| w.next)
    }

    /// Messages on `topic` that `group` has not committed yet
    pub async fn lag(&self, topic: &str, group: &str) -> u64 {
        let state = self.inner.state.lock().await;
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let len = log.len() as u64;
                state
                    .watermark(topic, group, p as u32)
                    .map_or(len, |w| w.pending(len))
            })
            .sum()
    }

    fn wake_subscribers(&self) {
        self.inner.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> BusResult<PublishReceipt> {
        let partition = partition_for(partition_key, self.inner.partitions);

        let offset = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(BusError::Closed);
            }

            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions as usize]);
            let log = &mut partitions[partition as usize];
            log.push(StoredMessage {
                partition_key: partition_key.to_string(),
                payload,
            });
            (log.len() - 1) as u64
        };

        self.wake_subscribers();

        Ok(PublishReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> BusResult<BoxStream<'static, BusMessage>> {
        let partitions = self.inner.partitions;
        let mut cursors: Vec<u64> = {
            let state = self.inner.state.lock().await;
            if state.closed {
                return Err(BusError::Closed);
            }
            (0..partitions)
                .map(|p| {
                    state
                        .watermark(topic, consumer_group, p)
                        .map_or(0, |w| w.next)
                })
                .collect()
        };

        let inner = self.inner.clone();
        let mut changes = inner.version.subscribe();
        let topic = topic.to_string();
        let group = consumer_group.to_string();

        let stream = async_stream::stream! {
            loop {
                // Mark the current version seen before scanning, so an append
                // racing with the scan still wakes the next wait.
                changes.borrow_and_update();

                let (batch, closed) = {
                    let state = inner.state.lock().await;
                    let mut batch = Vec::new();
                    if let Some(logs) = state.topics.get(&topic) {
                        for (p, log) in logs.iter().enumerate() {
                            let watermark = state.watermark(&topic, &group, p as u32);
                            let cursor = &mut cursors[p];
                            while let Some(stored) = log.get(*cursor as usize) {
                                // Acked above a gap by an earlier subscription
                                if !watermark.is_some_and(|w| w.is_acked(*cursor)) {
                                    batch.push(
                                        stored_to_message(&topic, stored).at(p as u32, *cursor),
                                    );
                                }
                                *cursor += 1;
                            }
                        }
                    }
                    (batch, state.closed)
                };

                if closed {
                    break;
                }

                for msg in batch {
                    yield msg;
                }

                if changes.changed().await.is_err() {
                    break;
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn commit(&self, consumer_group: &str, message: &BusMessage) -> BusResult<()> {
        let mut state = self.inner.state.lock().await;

        let known = state
            .topics
            .get(&message.topic)
            .and_then(|p| p.get(message.partition as usize))
            .is_some_and(|log| message.offset < log.len() as u64);
        if !known {
            return Err(BusError::CommitError {
                topic: message.topic.clone(),
                cause: format!(
                    "no message at partition {} offset {}",
                    message.partition, message.offset
                ),
            });
        }

        state
            .committed
            .entry((
                message.topic.clone(),
                consumer_group.to_string(),
                message.partition,
            ))
            .or_default()
            .ack(message.offset);

        Ok(())
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.inner.state.lock().await.closed = true;
        self.wake_subscribers();
        Ok(())
    }
}

fn stored_to_message(topic: &str, stored: &StoredMessage) -> BusMessage {
    let mut headers = HashMap::new();
    headers.insert(
        PARTITION_KEY_HEADER.to_string(),
        stored.partition_key.clone(),
    );

    BusMessage::new(topic.to_string(), stored.payload.clone())
        .with_partition_key(stored.partition_key.clone())
        .with_headers(headers)
}
