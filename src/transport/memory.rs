//! In-process scripted server.
//!
//! [`MemoryConnector`] stands in for the network in tests and demos. It
//! records every frame the client writes, counts how many transports were
//! opened, and lets the caller inject inbound messages, errors and closes
//! on the current transport.

use super::{Connector, Transport, TransportEvent, TransportSink};
use crate::error::TransportClosed;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// How the next `connect` call behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Open immediately
    #[default]
    Accept,
    /// Fail immediately
    Refuse,
    /// Never resolve; the caller's timeout decides
    Hang,
}

struct Peer {
    id: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct Hub {
    mode: ConnectMode,
    opened: usize,
    urls: Vec<String>,
    peer: Option<Peer>,
    sent: Vec<String>,
    closes: Vec<u16>,
}

/// Scripted connector with one live transport at a time
#[derive(Clone, Default)]
pub struct MemoryConnector {
    hub: Arc<Mutex<Hub>>,
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MemorySink {
    id: usize,
    hub: Arc<Mutex<Hub>>,
    open: AtomicBool,
}

impl TransportSink for MemorySink {
    fn send_text(&self, text: String) -> Result<(), TransportClosed> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportClosed);
        }
        let mut hub = lock(&self.hub);
        if !hub.peer.as_ref().is_some_and(|p| p.id == self.id) {
            return Err(TransportClosed);
        }
        hub.sent.push(text);
        Ok(())
    }

    fn close(&self, code: u16) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut hub = lock(&self.hub);
        hub.closes.push(code);
        if hub.peer.as_ref().is_some_and(|p| p.id == self.id) {
            if let Some(peer) = hub.peer.take() {
                // Server echoes the close handshake
                let _ = peer.events.send(TransportEvent::Closed(code));
            }
        }
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        lock(&self.hub).mode = mode;
    }

    /// Number of transports successfully opened so far
    pub fn connections_opened(&self) -> usize {
        lock(&self.hub).opened
    }

    /// URLs passed to `connect`, in call order (including failed attempts)
    pub fn urls(&self) -> Vec<String> {
        lock(&self.hub).urls.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.hub).peer.is_some()
    }

    /// Raw text of every frame written by the client, across all transports
    pub fn sent_text(&self) -> Vec<String> {
        lock(&self.hub).sent.clone()
    }

    /// Frames written by the client, parsed as JSON
    pub fn sent_frames(&self) -> Vec<Value> {
        self.sent_text()
            .iter()
            .filter_map(|t| serde_json::from_str(t).ok())
            .collect()
    }

    /// Drain the recorded frames
    pub fn take_sent_frames(&self) -> Vec<Value> {
        let sent = std::mem::take(&mut lock(&self.hub).sent);
        sent.iter()
            .filter_map(|t| serde_json::from_str(t).ok())
            .collect()
    }

    /// Close codes the client initiated, in order
    pub fn client_close_codes(&self) -> Vec<u16> {
        lock(&self.hub).closes.clone()
    }

    /// Deliver a raw text frame to the client. Returns false when no
    /// transport is open.
    pub fn push_inbound(&self, text: impl Into<String>) -> bool {
        let hub = lock(&self.hub);
        match &hub.peer {
            Some(peer) => peer.events.send(TransportEvent::Message(text.into())).is_ok(),
            None => false,
        }
    }

    /// Deliver `{topic, message}` to the client
    pub fn publish(&self, topic: &str, message: Value) -> bool {
        let frame = serde_json::json!({ "topic": topic, "message": message });
        self.push_inbound(frame.to_string())
    }

    /// Drop the current transport from the server side with `code`
    pub fn server_close(&self, code: u16) {
        if let Some(peer) = lock(&self.hub).peer.take() {
            let _ = peer.events.send(TransportEvent::Closed(code));
        }
    }

    /// Fail the current transport with a transport-level error
    pub fn server_error(&self, message: &str) {
        if let Some(peer) = lock(&self.hub).peer.take() {
            let _ = peer.events.send(TransportEvent::Error(message.to_string()));
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let mode = {
            let mut hub = lock(&self.hub);
            hub.urls.push(url.to_string());
            hub.mode
        };

        match mode {
            ConnectMode::Accept => {}
            ConnectMode::Refuse => return Err(anyhow!("connection refused by {}", url)),
            ConnectMode::Hang => return std::future::pending().await,
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut hub = lock(&self.hub);
        hub.opened += 1;
        let id = hub.opened;
        hub.peer = Some(Peer {
            id,
            events: event_tx,
        });

        let sink = MemorySink {
            id,
            hub: Arc::clone(&self.hub),
            open: AtomicBool::new(true),
        };
        Ok(Transport::new(Arc::new(sink), event_rx))
    }
}
