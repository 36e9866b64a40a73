// Topic registry, wire protocol and inbound routing
pub mod subscription;

// Transport lifecycle, reconnection and outbound buffering
pub mod connection;

// Transport seam: WebSocket and in-memory connectors
pub mod transport;

// Endpoint discovery and credentials
pub mod discovery;

// Client configuration
pub mod config;

// Public client facade
pub mod client;

pub mod error;

pub use client::TopicClient;
pub use config::{load_config, ClientConfig, OutboundConfig, OverflowPolicy};
pub use connection::{ConnectionState, ConnectionStats};
pub use discovery::{Credentials, Discovery, EnvIdentity, Identity, StaticDiscovery, StaticIdentity};
pub use error::{ConnectError, FrameError};
pub use subscription::{ControlFrame, InboundFrame, SubscriptionHandle};
pub use transport::{ConnectMode, Connector, MemoryConnector, WsConnector};
