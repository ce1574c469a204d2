//! Destination for extracted messages.

use tokio::sync::mpsc;

/// Accepts formatted messages for fan-out.
///
/// Implementations must not block: a full downstream drops the message and
/// returns `false` instead of stalling the producer.
pub trait MessageSink: Send + Sync {
    /// Hand over one message. Returns whether it was accepted.
    fn publish(&self, message: String) -> bool;
}

impl MessageSink for mpsc::Sender<String> {
    fn publish(&self, message: String) -> bool {
        self.try_send(message).is_ok()
    }
}
