use crate::config::ClientConfig;
use crate::connection::outbound::{Buffered, OutboundQueue};
use crate::discovery::{stream_url, Credentials, Discovery, Identity};
use crate::error::ConnectError;
use crate::subscription::{ControlFrame, MessageRouter, SubscriptionRegistry};
use crate::transport::{
    is_intentional_close, Connector, Transport, TransportEvent, TransportSink, CLOSE_NORMAL,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the shared transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    /// Transport lost; a reconnect attempt is scheduled
    Reconnecting,
}

/// Diagnostic snapshot of the connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub transports_opened: u64,
    pub reconnect_attempts: u64,
    pub consecutive_failures: u32,
    pub frames_sent: u64,
    pub frames_buffered: usize,
    pub frames_dropped: u64,
    pub malformed_frames: u64,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// The installed transport
struct Link {
    epoch: u64,
    sink: Arc<dyn TransportSink>,
    /// Topics a subscribe frame has been sent for on this transport
    announced: HashSet<String>,
}

struct ReconnectSlot {
    id: u64,
    task: JoinHandle<()>,
}

/// Everything guarded by the manager's lock. Never held across `.await`.
pub(crate) struct State {
    pub(crate) registry: SubscriptionRegistry,
    queue: OutboundQueue,
    link: Option<Link>,
    /// At most one pending reconnect timer
    reconnect: Option<ReconnectSlot>,
    next_timer_id: u64,
    /// Id of the most recently installed transport
    epoch: u64,
    /// Bumped by teardown so an in-flight connect knows to discard its transport
    generation: u64,
    /// Completed connect attempts, and how the latest one ended
    attempts: u64,
    last_outcome: Result<(), ConnectError>,
    stats: ConnectionStats,
}

/// Owns the shared transport: connect, authenticate, detect failure,
/// reconnect with resubscription, and tear down.
pub struct ConnectionManager {
    config: ClientConfig,
    discovery: Arc<dyn Discovery>,
    identity: Arc<dyn Identity>,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    /// Serializes connect attempts so concurrent callers converge on one
    gate: tokio::sync::Mutex<()>,
    state: Mutex<State>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: ClientConfig,
        discovery: Arc<dyn Discovery>,
        identity: Arc<dyn Identity>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let queue = OutboundQueue::with_config(&config.outbound);

        Arc::new(Self {
            config,
            discovery,
            identity,
            connector,
            runtime: Handle::current(),
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(State {
                registry: SubscriptionRegistry::new(),
                queue,
                link: None,
                reconnect: None,
                next_timer_id: 0,
                epoch: 0,
                generation: 0,
                attempts: 0,
                last_outcome: Ok(()),
                stats: ConnectionStats::default(),
            }),
            state_tx,
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().stats.state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let st = self.state();
        let mut stats = st.stats.clone();
        stats.frames_buffered = st.queue.len();
        stats
    }

    /// Whether a reconnect timer is currently pending
    pub fn reconnect_pending(&self) -> bool {
        self.state().reconnect.is_some()
    }

    fn set_phase(&self, st: &mut State, phase: ConnectionState) {
        if st.stats.state != phase {
            debug!(from = ?st.stats.state, to = ?phase, "Connection state change");
        }
        st.stats.state = phase;
        self.state_tx.send_replace(phase);
    }

    /// Ensure an open, authenticated transport.
    ///
    /// No-op when one is installed. Concurrent callers wait on the same gate
    /// and share the outcome of the attempt that held it: the winner's
    /// transport, or its error. A failed attempt enters the reconnect path
    /// when anyone is subscribed.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        self.establish(false).await
    }

    /// Connect on behalf of a new subscription to `topic`, then send its
    /// subscribe frame.
    ///
    /// Does nothing when the subscription is already gone, and leaves the
    /// dialing to a pending reconnect timer, which resubscribes every
    /// registry topic when it fires.
    pub(crate) async fn connect_for(self: &Arc<Self>, topic: &str) {
        {
            let st = self.state();
            if !st.registry.has_topic(topic) {
                debug!(topic = %topic, "Subscription removed before connect, skipping");
                return;
            }
            if st.reconnect.is_some() {
                debug!(topic = %topic, "Reconnect pending, subscription waits for it");
                return;
            }
        }

        match self.establish(true).await {
            Ok(()) => self.announce(topic),
            Err(e) => debug!(topic = %topic, error = %e, "Connect for subscription failed"),
        }
    }

    /// One gated connect attempt. With `needs_subscribers` the attempt is
    /// skipped while the registry is empty.
    async fn establish(self: &Arc<Self>, needs_subscribers: bool) -> Result<(), ConnectError> {
        let seen = self.state().attempts;
        let _gate = self.gate.lock().await;

        let generation = {
            let mut st = self.state();
            if st.link.is_some() {
                return Ok(());
            }
            // An attempt finished while we waited on the gate
            if st.attempts != seen {
                if let Err(e) = &st.last_outcome {
                    return Err(e.clone());
                }
            }
            if needs_subscribers && st.registry.is_empty() {
                return Ok(());
            }
            if st.stats.state != ConnectionState::Reconnecting {
                self.set_phase(&mut st, ConnectionState::Connecting);
            }
            st.generation
        };

        let outcome = match self.open_transport().await {
            Ok((transport, credentials)) => {
                self.install(transport, credentials, generation);
                Ok(())
            }
            Err(e) => Err(e),
        };

        let mut st = self.state();
        st.attempts += 1;
        st.last_outcome = outcome.clone();

        if let Err(e) = &outcome {
            st.stats.consecutive_failures += 1;
            st.stats.last_error = Some(e.to_string());

            let failures = st.stats.consecutive_failures;
            if failures >= self.config.failure_alert_threshold {
                error!(error = %e, consecutive_failures = failures, "Connect failing repeatedly");
            } else {
                warn!(error = %e, consecutive_failures = failures, "Connect failed");
            }

            if st.registry.is_empty() {
                self.set_phase(&mut st, ConnectionState::Disconnected);
            } else {
                self.schedule_reconnect(&mut st);
            }
        }
        outcome
    }

    /// Resolve the endpoint, open the transport within the connect timeout,
    /// and fetch credentials. Nothing is installed here.
    async fn open_transport(&self) -> Result<(Transport, Credentials), ConnectError> {
        let base_url = self
            .discovery
            .base_url(&self.config.service_name)
            .await
            .map_err(|e| ConnectError::Discovery(format!("{:#}", e)))?;
        let url = stream_url(&base_url)?;

        info!(url = %url, service = %self.config.service_name, "Opening transport");

        let wait = self.config.connect_timeout();
        let transport = match tokio::time::timeout(wait, self.connector.connect(&url)).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return Err(ConnectError::Transport(format!("{:#}", e))),
            Err(_) => return Err(ConnectError::Timeout(wait)),
        };

        match self.identity.credentials().await {
            Ok(credentials) => Ok((transport, credentials)),
            Err(e) => {
                transport.sink.close(CLOSE_NORMAL);
                Err(ConnectError::Identity(format!("{:#}", e)))
            }
        }
    }

    /// Install a freshly opened transport: authenticate, announce every
    /// registry topic, flush the outbound buffer, start the event pump.
    fn install(self: &Arc<Self>, transport: Transport, credentials: Credentials, generation: u64) {
        let Transport { sink, events } = transport;
        let mut guard = self.state();
        let st = &mut *guard;

        if st.generation != generation {
            info!("Registry emptied while connecting, closing new transport");
            sink.close(CLOSE_NORMAL);
            return;
        }

        if let Some(slot) = st.reconnect.take() {
            slot.task.abort();
        }

        st.epoch += 1;
        let epoch = st.epoch;
        let mut link = Link {
            epoch,
            sink,
            announced: HashSet::new(),
        };

        if let Some(token) = credentials.bearer() {
            Self::transmit(&mut st.stats, &*link.sink, &ControlFrame::authenticate(token));
        }

        let topics = st.registry.topics();
        for topic in &topics {
            link.announced.insert(topic.clone());
            Self::transmit(&mut st.stats, &*link.sink, &ControlFrame::subscribe(topic.as_str()));
        }

        if !st.queue.is_empty() {
            match st.queue.flush_to(&*link.sink) {
                Ok(flushed) => {
                    st.stats.frames_sent += flushed as u64;
                    debug!(flushed, "Buffered frames flushed");
                }
                Err(e) => warn!(error = %e, remaining = st.queue.len(), "Flush of buffered frames interrupted"),
            }
        }

        st.stats.transports_opened += 1;
        st.stats.consecutive_failures = 0;
        st.stats.last_connected_at = Some(Utc::now());
        st.link = Some(link);
        self.set_phase(st, ConnectionState::Open);

        info!(epoch, topics = topics.len(), "Transport open");

        drop(guard);
        self.runtime.spawn(Arc::clone(self).pump(events, epoch));
    }

    /// Serialize and write one control frame. Control frames are never
    /// buffered: a dead transport gets its subscriptions rebuilt on reconnect.
    fn transmit(stats: &mut ConnectionStats, sink: &dyn TransportSink, frame: &ControlFrame) -> bool {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize control frame");
                return false;
            }
        };
        match sink.send_text(text) {
            Ok(()) => {
                stats.frames_sent += 1;
                debug!(frame = ?frame, "Control frame sent");
                true
            }
            Err(e) => {
                debug!(frame = ?frame, error = %e, "Control frame not sent");
                false
            }
        }
    }

    /// Consume transport events until the transport ends
    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>, epoch: u64) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(text) => self.route(&text),
                TransportEvent::Error(e) => {
                    warn!(epoch, error = %e, "Transport error");
                    self.on_transport_failure(epoch, format!("transport error: {}", e));
                }
                TransportEvent::Closed(code) if is_intentional_close(code) => {
                    info!(epoch, code, "Transport closed");
                    self.on_intentional_close(epoch);
                    return;
                }
                TransportEvent::Closed(code) => {
                    warn!(epoch, code, "Transport closed abnormally");
                    self.on_transport_failure(epoch, format!("abnormal close {}", code));
                    return;
                }
            }
        }
        self.on_transport_failure(epoch, "transport event stream ended".to_string());
    }

    fn route(&self, text: &str) {
        let result = MessageRouter::route(text, |topic| self.state().registry.callbacks_for(topic));
        if let Err(e) = result {
            self.state().stats.malformed_frames += 1;
            debug!(error = %e, "Discarding malformed inbound frame");
        }
    }

    fn on_intentional_close(&self, epoch: u64) {
        let mut st = self.state();
        if st.link.as_ref().is_some_and(|l| l.epoch == epoch) {
            st.link = None;
            self.set_phase(&mut st, ConnectionState::Disconnected);
        }
    }

    /// Error, abnormal close or vanished stream on transport `epoch`.
    ///
    /// Only the installed transport's first failure counts; later events
    /// from the same (already discarded) transport are ignored.
    fn on_transport_failure(self: &Arc<Self>, epoch: u64, reason: String) {
        let mut st = self.state();
        if !st.link.as_ref().is_some_and(|l| l.epoch == epoch) {
            debug!(epoch, reason = %reason, "Ignoring failure of discarded transport");
            return;
        }

        st.link = None;
        st.stats.last_error = Some(reason);

        if st.registry.is_empty() {
            self.set_phase(&mut st, ConnectionState::Disconnected);
            return;
        }
        self.schedule_reconnect(&mut st);
    }

    /// Schedule one reconnect after the fixed delay, replacing any pending one
    fn schedule_reconnect(self: &Arc<Self>, st: &mut State) {
        if let Some(slot) = st.reconnect.take() {
            debug!(timer = slot.id, "Replacing pending reconnect");
            slot.task.abort();
        }

        st.next_timer_id += 1;
        let id = st.next_timer_id;
        let delay = self.config.reconnect_delay();
        let this = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect(id).await;
        });

        st.reconnect = Some(ReconnectSlot { id, task });
        self.set_phase(st, ConnectionState::Reconnecting);

        warn!(delay = ?delay, "Reconnect scheduled");
    }

    async fn reconnect(self: Arc<Self>, id: u64) {
        {
            let mut st = self.state();
            if st.reconnect.as_ref().map(|slot| slot.id) != Some(id) {
                return;
            }
            st.reconnect = None;
            if st.registry.is_empty() {
                self.set_phase(&mut st, ConnectionState::Disconnected);
                return;
            }
            st.stats.reconnect_attempts += 1;
            // Keep the phase visible as Reconnecting while the attempt runs
            self.set_phase(&mut st, ConnectionState::Reconnecting);
        }

        info!(attempt = id, "Reconnecting");

        if self.establish(true).await.is_ok() {
            info!("Reconnected");
        }
    }

    /// Send the subscribe frame for `topic` if the installed transport has
    /// not seen one yet and the topic still has subscribers.
    pub(crate) fn announce(&self, topic: &str) {
        let mut guard = self.state();
        let st = &mut *guard;
        if !st.registry.has_topic(topic) {
            return;
        }
        if let Some(link) = st.link.as_mut() {
            if link.announced.insert(topic.to_string()) {
                Self::transmit(&mut st.stats, &*link.sink, &ControlFrame::subscribe(topic));
            }
        }
    }

    /// Send the unsubscribe frame for `topic` if it was announced
    pub(crate) fn retract(&self, st: &mut State, topic: &str) {
        if let Some(link) = st.link.as_mut() {
            if link.announced.remove(topic) {
                Self::transmit(&mut st.stats, &*link.sink, &ControlFrame::unsubscribe(topic));
            }
        }
    }

    /// Close the transport with 1000 and drop any pending reconnect
    pub(crate) fn teardown(&self, st: &mut State) {
        st.generation += 1;
        if let Some(slot) = st.reconnect.take() {
            slot.task.abort();
        }
        if let Some(link) = st.link.take() {
            link.sink.close(CLOSE_NORMAL);
            info!(epoch = link.epoch, "Transport closed, no subscribers left");
        }
        self.set_phase(st, ConnectionState::Disconnected);
    }

    /// Write `text`, flushing buffered frames first. Buffers when no transport
    /// is open or the transport refuses the write.
    pub(crate) fn send_text(&self, text: String) {
        let mut guard = self.state();
        let st = &mut *guard;

        let Some(link) = st.link.as_ref() else {
            Self::enqueue(&mut st.queue, &mut st.stats, text);
            return;
        };

        match st.queue.flush_to(&*link.sink) {
            Ok(flushed) => st.stats.frames_sent += flushed as u64,
            Err(_) => {
                Self::enqueue(&mut st.queue, &mut st.stats, text);
                return;
            }
        }

        match link.sink.send_text(text.clone()) {
            Ok(()) => st.stats.frames_sent += 1,
            Err(_) => Self::enqueue(&mut st.queue, &mut st.stats, text),
        }
    }

    fn enqueue(queue: &mut OutboundQueue, stats: &mut ConnectionStats, text: String) {
        match queue.push(text) {
            Buffered::Queued => {}
            Buffered::EvictedOldest | Buffered::Rejected => stats.frames_dropped += 1,
        }
        debug!(buffered = queue.len(), "Frame buffered until transport opens");
    }
}
