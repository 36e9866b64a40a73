use std::time::Duration;
use thiserror::Error;

/// Reasons a connection attempt fails.
///
/// Never surfaced through `subscribe`/`unsubscribe`/`send`; every variant is
/// retried through the reconnect path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Transport did not open within the configured wait
    #[error("transport did not open within {0:?}")]
    Timeout(Duration),

    /// Discovery collaborator could not resolve the endpoint
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    /// Endpoint URL has a scheme with no streaming equivalent
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Identity collaborator could not produce credentials
    #[error("credential lookup failed: {0}")]
    Identity(String),

    /// Connector failed to open the transport
    #[error("transport failed to open: {0}")]
    Transport(String),
}

/// Inbound frame could not be understood; the frame is discarded
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Write attempted on a transport whose writer has gone away
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transport is closed")]
pub struct TransportClosed;
