//! Notification dispatch
//!
//! A notification goes to every channel the user enabled for its kind.
//! Deliveries are keyed by `(event_id, channel)`: a retry after a partial
//! failure only resends the channels that failed.

use chrono::Utc;
use event_bus::events::{NotificationFailed, NotificationSent};
use event_bus::{EventEnvelope, EventError, EventProducer, PublishMode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::NotificationChannel;
use crate::models::{Channel, Delivery, Notification};
use crate::preferences::PreferenceStore;

pub struct NotificationService {
    channels: HashMap<Channel, Arc<dyn NotificationChannel>>,
    preferences: Arc<PreferenceStore>,
    deliveries: Mutex<HashMap<(Uuid, Channel), Delivery>>,
    producer: EventProducer,
    final_attempt: u32,
}

impl NotificationService {
    /// `final_attempt` is the consumer's retry limit; a channel failing on
    /// that attempt is reported with `NotificationFailed`
    pub fn new(producer: EventProducer, preferences: Arc<PreferenceStore>, final_attempt: u32) -> Self {
        Self {
            channels: HashMap::new(),
            preferences,
            deliveries: Mutex::new(HashMap::new()),
            producer,
            final_attempt: final_attempt.max(1),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.channel(), channel);
        self
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    /// Successful deliveries for one event
    pub async fn deliveries_for(&self, event_id: Uuid) -> Vec<Delivery> {
        let deliveries = self.deliveries.lock().await;
        let mut found: Vec<Delivery> = deliveries
            .iter()
            .filter(|((id, _), _)| *id == event_id)
            .map(|(_, delivery)| delivery.clone())
            .collect();
        found.sort_by_key(|d| d.channel);
        found
    }

    /// Send `notification` on every enabled channel not yet delivered
    ///
    /// # Errors
    ///
    /// A domain error naming the failed channels, so the caller retries;
    /// `TransportUnavailable` when announcing a delivery fails.
    pub async fn deliver(
        &self,
        cause: &EventEnvelope,
        notification: &Notification,
        attempt: u32,
    ) -> Result<Vec<Delivery>, EventError> {
        let enabled = self
            .preferences
            .enabled_channels(notification.user_id, notification.kind)
            .await;

        let mut failures = Vec::new();
        for channel in enabled {
            let Some(provider) = self.channels.get(&channel) else {
                warn!(channel = %channel, "Channel enabled but not configured, skipping");
                continue;
            };
            let key = (cause.event_id, channel);
            let notification_id = format!("{}-{}", cause.event_id, channel.as_str().to_lowercase());

            let existing = self.deliveries.lock().await.get(&key).cloned();
            let delivery = match existing {
                Some(delivery) if delivery.announced => continue,
                Some(delivery) => delivery,
                None => match provider.send(notification).await {
                    Ok(provider_message_id) => {
                        let delivery = Delivery {
                            notification_id: notification_id.clone(),
                            channel,
                            provider_message_id,
                            sent_at: Utc::now(),
                            announced: false,
                        };
                        self.deliveries.lock().await.insert(key, delivery.clone());
                        delivery
                    }
                    Err(e) => {
                        warn!(channel = %channel, attempt = attempt, error = %e, "Notification send failed");
                        if attempt >= self.final_attempt {
                            self.report_failure(cause, notification, channel, &notification_id, &e.to_string())
                                .await;
                        }
                        failures.push(format!("{channel}: {e}"));
                        continue;
                    }
                },
            };

            let sent = NotificationSent {
                notification_id: delivery.notification_id.clone(),
                user_id: notification.user_id,
                notification_type: notification.kind.as_str().to_string(),
                channel: channel.as_str().to_string(),
                subject: notification.subject.clone(),
            };
            self.producer
                .emit_caused_by(&sent, cause, PublishMode::Confirmed)
                .await?;

            if let Some(stored) = self.deliveries.lock().await.get_mut(&key) {
                stored.announced = true;
            }
            info!(
                notification_id = %delivery.notification_id,
                channel = %channel,
                user_id = notification.user_id,
                "Notification delivered"
            );
        }

        if !failures.is_empty() {
            return Err(EventError::domain(format!(
                "notification delivery failed on {}",
                failures.join("; ")
            )));
        }
        Ok(self.deliveries_for(cause.event_id).await)
    }

    async fn report_failure(
        &self,
        cause: &EventEnvelope,
        notification: &Notification,
        channel: Channel,
        notification_id: &str,
        error: &str,
    ) {
        let failed = NotificationFailed {
            notification_id: notification_id.to_string(),
            user_id: notification.user_id,
            notification_type: notification.kind.as_str().to_string(),
            channel: channel.as_str().to_string(),
            error: error.to_string(),
        };
        if let Err(e) = self
            .producer
            .emit_caused_by(&failed, cause, PublishMode::Confirmed)
            .await
        {
            warn!(notification_id = %notification_id, error = %e, "Failed to publish NotificationFailed");
        }
    }
}
