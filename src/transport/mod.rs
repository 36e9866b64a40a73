//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens one [`Transport`]: a synchronous [`TransportSink`]
//! for outbound text frames plus a channel of [`TransportEvent`]s. The
//! connector's future resolving is the "open" event; the connection manager
//! bounds it with its connect timeout.

mod memory;
mod websocket;

pub use memory::{ConnectMode, MemoryConnector};
pub use websocket::WsConnector;

use crate::error::TransportClosed;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Close code for an intentional shutdown
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for an endpoint going away (page unload, server restart)
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close reported when the peer sent a close frame without a status
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close reported when the stream ended without any close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Whether a close code signals an intentional close (no reconnect)
pub fn is_intentional_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

/// Event emitted by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound text frame
    Message(String),
    /// Transport-level error; the transport should be considered dead
    Error(String),
    /// Close handshake completed or observed, with its close code
    Closed(u16),
}

/// Outbound half of an open transport. Writes never block.
pub trait TransportSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), TransportClosed>;

    /// Begin the close handshake with `code`
    fn close(&self, code: u16);
}

/// An open transport
pub struct Transport {
    pub sink: Arc<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    pub fn new(
        sink: Arc<dyn TransportSink>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { sink, events }
    }
}

/// Opens transports to a streaming endpoint URL (`ws://` or `wss://`)
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolves once the transport is open and ready for frames
    async fn connect(&self, url: &str) -> anyhow::Result<Transport>;
}
