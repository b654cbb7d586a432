use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

use crate::models::{Channel, NotificationKind};

/// Channels enabled for a kind when the user has no stored preference
pub fn default_channels(kind: NotificationKind) -> BTreeSet<Channel> {
    match kind {
        NotificationKind::FraudAlert => [Channel::Email, Channel::InApp, Channel::Sms].into(),
        _ => [Channel::Email, Channel::InApp].into(),
    }
}

/// Per-user channel preferences by notification kind
#[derive(Default)]
pub struct PreferenceStore {
    preferences: Mutex<HashMap<(i64, NotificationKind), BTreeSet<Channel>>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store defaults for every kind the user has no preference for
    ///
    /// Returns the number of kinds initialised; 0 on a repeat call.
    pub async fn initialize_defaults(&self, user_id: i64) -> usize {
        let mut preferences = self.preferences.lock().await;
        let mut initialised = 0;
        for kind in NotificationKind::ALL {
            preferences.entry((user_id, kind)).or_insert_with(|| {
                initialised += 1;
                default_channels(kind)
            });
        }
        initialised
    }

    pub async fn set(&self, user_id: i64, kind: NotificationKind, channels: BTreeSet<Channel>) {
        self.preferences
            .lock()
            .await
            .insert((user_id, kind), channels);
    }

    pub async fn enabled_channels(&self, user_id: i64, kind: NotificationKind) -> BTreeSet<Channel> {
        self.preferences
            .lock()
            .await
            .get(&(user_id, kind))
            .cloned()
            .unwrap_or_else(|| default_channels(kind))
    }

    pub async fn has_preferences(&self, user_id: i64) -> bool {
        self.preferences
            .lock()
            .await
            .keys()
            .any(|(user, _)| *user == user_id)
    }
}
