use crate::comms::transport::{InboundTransport, OutboundTransport, SendStatus};
use crate::error::Result;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// In-process transport with the same one-message queue as the ZMQ sockets.
pub(crate) struct MemoryOutput {
    tx: mpsc::Sender<Vec<u8>>,
}

pub(crate) struct MemoryInput {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

/// Creates a connected pair holding at most `capacity` frames.
pub(crate) fn memory_pair(capacity: usize) -> (MemoryOutput, MemoryInput) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        MemoryOutput { tx },
        MemoryInput { rx: Mutex::new(rx) },
    )
}

impl OutboundTransport for MemoryOutput {
    fn send_bytes(&self, data: &[u8]) -> Result<SendStatus> {
        match self.tx.try_send(data.to_vec()) {
            Ok(()) => Ok(SendStatus::Sent),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => Ok(SendStatus::WouldBlock),
        }
    }
}

impl InboundTransport for MemoryInput {
    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match rx.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_holds_one_frame() {
        let (output, input) = memory_pair(1);
        assert_eq!(output.send_bytes(b"first").unwrap(), SendStatus::Sent);
        assert_eq!(output.send_bytes(b"second").unwrap(), SendStatus::WouldBlock);
        assert_eq!(input.try_recv().unwrap(), Some(b"first".to_vec()));
        assert_eq!(input.try_recv().unwrap(), None);
    }
}
