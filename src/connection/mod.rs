// Transport lifecycle and outbound buffering

mod manager;
pub mod outbound;

pub use manager::{ConnectionManager, ConnectionState, ConnectionStats};
pub use outbound::{Buffered, OutboundQueue};
