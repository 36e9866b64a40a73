// Topic subscriptions: registry, wire protocol and inbound routing

pub mod protocol;
pub mod registry;
pub mod router;

pub use protocol::{ControlFrame, InboundFrame};
pub use registry::{Callback, Removed, SubscriptionHandle, SubscriptionRegistry};
pub use router::MessageRouter;
