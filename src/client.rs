//! Public entry point: many independent subscribers sharing one transport.
//!
//! ```no_run
//! use topicmux::{ClientConfig, StaticDiscovery, StaticIdentity, TopicClient, WsConnector};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let client = TopicClient::new(
//!     ClientConfig::default(),
//!     Arc::new(StaticDiscovery::new("https://chat.example.com")),
//!     Arc::new(StaticIdentity::new(Some("token".to_string()))),
//!     Arc::new(WsConnector::new()),
//! );
//!
//! let handle = client.subscribe("builds", |message| println!("{message}"));
//! // ...
//! client.unsubscribe(handle);
//! # }
//! ```

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStats};
use crate::discovery::{Discovery, Identity};
use crate::error::ConnectError;
use crate::subscription::SubscriptionHandle;
use crate::transport::Connector;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Multiplexing client. Cheap to clone; clones share the same transport.
///
/// `subscribe`, `unsubscribe` and `send` never fail from the caller's point
/// of view: connection problems are retried internally.
#[derive(Clone)]
pub struct TopicClient {
    manager: Arc<ConnectionManager>,
}

impl TopicClient {
    /// Create a client bound to the current Tokio runtime. No connection is
    /// made until the first subscription.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: ClientConfig,
        discovery: Arc<dyn Discovery>,
        identity: Arc<dyn Identity>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(config, discovery, identity, connector),
        }
    }

    /// Register `callback` for every message published on `topic`.
    ///
    /// Returns immediately. Connecting and sending the subscribe frame happen
    /// in the background; failures there enter the reconnect path.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let (handle, first) = self.manager.state().registry.insert(&topic, Arc::new(callback));

        debug!(handle = %handle, topic = %topic, first_for_topic = first, "Subscribed");

        let manager = Arc::clone(&self.manager);
        self.manager
            .runtime()
            .spawn(async move { manager.connect_for(&topic).await });

        handle
    }

    /// Remove a subscription. Unknown or already-removed handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut st = self.manager.state();
        let Some(removed) = st.registry.remove(handle) else {
            debug!(handle = %handle, "Unsubscribe for unknown handle ignored");
            return;
        };

        debug!(handle = %handle, topic = %removed.topic, "Unsubscribed");

        if removed.last_for_topic {
            self.manager.retract(&mut st, &removed.topic);
        }
        if removed.registry_empty {
            self.manager.teardown(&mut st);
        }
    }

    /// Serialize and send an application frame, buffering it while the
    /// transport is not open.
    pub fn send<T: Serialize + ?Sized>(&self, frame: &T) {
        match serde_json::to_string(frame) {
            Ok(text) => self.manager.send_text(text),
            Err(e) => warn!(error = %e, "Dropping frame that failed to serialize"),
        }
    }

    /// Open the transport now instead of waiting for the first subscription.
    ///
    /// On failure the error is returned and the reconnect path is entered
    /// if anyone is subscribed.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.manager.connect().await
    }

    /// Drop every subscription and close the transport with code 1000
    pub fn close(&self) {
        let mut st = self.manager.state();
        let dropped = st.registry.clear();
        self.manager.teardown(&mut st);
        info!(subscriptions = dropped, "Client closed");
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.connection_state()
    }

    /// Receiver notified on every connection state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.manager.stats()
    }

    pub fn subscription_count(&self) -> usize {
        self.manager.state().registry.len()
    }

    /// Whether a reconnect attempt is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.manager.reconnect_pending()
    }
}
