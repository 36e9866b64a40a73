use crate::config::{OutboundConfig, OverflowPolicy};
use crate::error::TransportClosed;
use crate::transport::TransportSink;
use std::collections::VecDeque;
use tracing::warn;

/// Outcome of buffering one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffered {
    Queued,
    /// Queued after evicting the oldest frame
    EvictedOldest,
    /// Buffer full and policy rejects new frames; the frame was discarded
    Rejected,
}

/// Serialized frames waiting for an open transport. Strict FIFO.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
    max_frames: Option<usize>,
    overflow: OverflowPolicy,
}

impl OutboundQueue {
    /// Unbounded queue
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &OutboundConfig) -> Self {
        Self {
            frames: VecDeque::new(),
            max_frames: config.max_frames,
            overflow: config.overflow,
        }
    }

    pub fn push(&mut self, frame: String) -> Buffered {
        let Some(max) = self.max_frames else {
            self.frames.push_back(frame);
            return Buffered::Queued;
        };

        if self.frames.len() < max {
            self.frames.push_back(frame);
            return Buffered::Queued;
        }

        match self.overflow {
            OverflowPolicy::DropOldest => {
                self.frames.pop_front();
                if max == 0 {
                    warn!(max_frames = max, "Outbound buffer has no capacity, frame dropped");
                    return Buffered::Rejected;
                }
                self.frames.push_back(frame);
                warn!(max_frames = max, "Outbound buffer full, evicted oldest frame");
                Buffered::EvictedOldest
            }
            OverflowPolicy::RejectNewest => {
                warn!(max_frames = max, "Outbound buffer full, rejected frame");
                Buffered::Rejected
            }
        }
    }

    /// Write every buffered frame to `sink` in order.
    ///
    /// Stops at the first write the sink refuses; that frame and everything
    /// after it stay buffered. Returns how many frames were written.
    pub fn flush_to(&mut self, sink: &dyn TransportSink) -> Result<usize, TransportClosed> {
        let mut written = 0;
        while let Some(frame) = self.frames.pop_front() {
            if let Err(e) = sink.send_text(frame.clone()) {
                self.frames.push_front(frame);
                return Err(e);
            }
            written += 1;
        }
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink accepting `capacity` writes, then refusing
    struct LimitedSink {
        capacity: usize,
        written: Mutex<Vec<String>>,
    }

    impl LimitedSink {
        fn new(capacity: usize) -> Self {
            Self {
                capacity,
                written: Mutex::new(Vec::new()),
            }
        }
    }

    impl TransportSink for LimitedSink {
        fn send_text(&self, text: String) -> Result<(), TransportClosed> {
            let mut written = self.written.lock().unwrap();
            if written.len() >= self.capacity {
                return Err(TransportClosed);
            }
            written.push(text);
            Ok(())
        }

        fn close(&self, _code: u16) {}
    }

    #[test]
    fn test_flush_preserves_buffer_order() {
        let mut queue = OutboundQueue::new();
        for i in 0..5 {
            assert_eq!(queue.push(format!("frame-{i}")), Buffered::Queued);
        }

        let sink = LimitedSink::new(usize::MAX);
        assert_eq!(queue.flush_to(&sink), Ok(5));
        assert!(queue.is_empty());
        assert_eq!(
            *sink.written.lock().unwrap(),
            vec!["frame-0", "frame-1", "frame-2", "frame-3", "frame-4"]
        );
    }

    #[test]
    fn test_refused_write_keeps_remaining_frames() {
        let mut queue = OutboundQueue::new();
        for i in 0..4 {
            queue.push(format!("frame-{i}"));
        }

        let sink = LimitedSink::new(2);
        assert_eq!(queue.flush_to(&sink), Err(TransportClosed));
        assert_eq!(queue.len(), 2);

        let retry = LimitedSink::new(usize::MAX);
        assert_eq!(queue.flush_to(&retry), Ok(2));
        assert_eq!(*retry.written.lock().unwrap(), vec!["frame-2", "frame-3"]);
    }

    #[test]
    fn test_bounded_drop_oldest() {
        let mut queue = OutboundQueue::with_config(&OutboundConfig {
            max_frames: Some(2),
            overflow: OverflowPolicy::DropOldest,
        });
        queue.push("a".to_string());
        queue.push("b".to_string());
        assert_eq!(queue.push("c".to_string()), Buffered::EvictedOldest);

        let sink = LimitedSink::new(usize::MAX);
        queue.flush_to(&sink).unwrap();
        assert_eq!(*sink.written.lock().unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_bounded_reject_newest() {
        let mut queue = OutboundQueue::with_config(&OutboundConfig {
            max_frames: Some(2),
            overflow: OverflowPolicy::RejectNewest,
        });
        queue.push("a".to_string());
        queue.push("b".to_string());
        assert_eq!(queue.push("c".to_string()), Buffered::Rejected);

        let sink = LimitedSink::new(usize::MAX);
        queue.flush_to(&sink).unwrap();
        assert_eq!(*sink.written.lock().unwrap(), vec!["a", "b"]);
    }
}
