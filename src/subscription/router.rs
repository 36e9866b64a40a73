use crate::error::FrameError;
use crate::subscription::protocol::InboundFrame;
use crate::subscription::registry::{Callback, SubscriptionHandle};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

/// Parses inbound frames and fans them out to subscribers
pub struct MessageRouter;

impl MessageRouter {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<InboundFrame, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse `text` and invoke every callback `lookup` returns for its topic.
    ///
    /// `lookup` is called once, before any callback runs, so the caller can
    /// snapshot subscribers under a lock and release it before delivery.
    /// Returns the number of callbacks that completed.
    pub fn route<F>(text: &str, lookup: F) -> Result<usize, FrameError>
    where
        F: FnOnce(&str) -> Vec<(SubscriptionHandle, Callback)>,
    {
        let frame = Self::parse(text)?;
        let targets = lookup(&frame.topic);

        debug!(topic = %frame.topic, subscribers = targets.len(), "Routing inbound frame");

        Ok(Self::deliver(&frame, targets))
    }

    /// Invoke each callback with the frame's message.
    ///
    /// A panicking callback is logged and skipped; siblings still run.
    pub fn deliver(frame: &InboundFrame, targets: Vec<(SubscriptionHandle, Callback)>) -> usize {
        let mut delivered = 0;
        for (handle, callback) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&frame.message))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    error!(
                        handle = %handle,
                        topic = %frame.topic,
                        "Subscriber callback panicked"
                    );
                }
            }
        }
        delivered
    }
}
