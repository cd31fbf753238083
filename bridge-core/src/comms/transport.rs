use crate::error::Result;
use std::sync::Arc;

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The frame was queued.
    Sent,
    /// The queue was full (high-water mark reached); the frame was dropped.
    WouldBlock,
}

impl SendStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendStatus::Sent)
    }
}

/// Abstraction for the outgoing transport layer (sending raw bytes).
/// Sends never block: a full queue is reported as `SendStatus::WouldBlock`.
pub trait OutboundTransport: Send + Sync {
    /// Send a full frame/message.
    fn send_bytes(&self, data: &[u8]) -> Result<SendStatus>;
}

/// Abstraction for the incoming transport layer (reading raw bytes).
pub trait InboundTransport: Send + Sync {
    /// Try to receive the next full frame/message as bytes.
    /// Returns `Ok(None)` when nothing is queued.
    fn try_recv(&self) -> Result<Option<Vec<u8>>>;
}

impl<T: OutboundTransport + ?Sized> OutboundTransport for Arc<T> {
    fn send_bytes(&self, data: &[u8]) -> Result<SendStatus> {
        (**self).send_bytes(data)
    }
}

impl<T: InboundTransport + ?Sized> InboundTransport for Arc<T> {
    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        (**self).try_recv()
    }
}
