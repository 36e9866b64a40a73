use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback invoked with the `message` payload of every matching inbound frame
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque token identifying one local subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One local callback registered against one topic
struct Subscription {
    handle: SubscriptionHandle,
    topic: String,
    callback: Callback,
}

/// Result of removing a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub topic: String,
    /// No other subscription shares the topic any more
    pub last_for_topic: bool,
    /// The registry holds no subscriptions at all
    pub registry_empty: bool,
}

/// Handle → subscription map with per-topic live counts.
///
/// The counts make the 0 → 1 and 1 → 0 transitions per topic observable
/// at insert/remove time, which is what decides whether a server-side
/// subscribe or unsubscribe frame is owed.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionHandle, Subscription>,
    topic_counts: HashMap<String, usize>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new subscription. Returns its handle and whether it is the
    /// first local subscription to `topic`.
    pub fn insert(&mut self, topic: &str, callback: Callback) -> (SubscriptionHandle, bool) {
        let handle = SubscriptionHandle::new();
        self.entries.insert(
            handle,
            Subscription {
                handle,
                topic: topic.to_string(),
                callback,
            },
        );

        let count = self.topic_counts.entry(topic.to_string()).or_insert(0);
        *count += 1;

        (handle, *count == 1)
    }

    /// Remove a subscription. Unknown handles return `None`.
    pub fn remove(&mut self, handle: SubscriptionHandle) -> Option<Removed> {
        let sub = self.entries.remove(&handle)?;

        let last_for_topic = match self.topic_counts.get_mut(&sub.topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                self.topic_counts.remove(&sub.topic);
                true
            }
        };

        Some(Removed {
            topic: sub.topic,
            last_for_topic,
            registry_empty: self.entries.is_empty(),
        })
    }

    /// Remove everything. Returns how many subscriptions were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.topic_counts.clear();
        dropped
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topic_counts.contains_key(topic)
    }

    /// Distinct topics with at least one live subscription, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topic_counts.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Callbacks of every subscription on `topic`
    pub fn callbacks_for(&self, topic: &str) -> Vec<(SubscriptionHandle, Callback)> {
        if !self.has_topic(topic) {
            return Vec::new();
        }
        self.entries
            .values()
            .filter(|sub| sub.topic == topic)
            .map(|sub| (sub.handle, Arc::clone(&sub.callback)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
