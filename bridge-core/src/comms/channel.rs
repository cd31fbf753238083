//! Gated channels.
//!
//! A channel pairs a transport with the [`ChannelGate`] of its health monitor.
//! While the gate is closed the channel refuses I/O before the transport is
//! touched.

use crate::comms::transport::{InboundTransport, OutboundTransport, SendStatus};
use crate::error::{BridgeError, Result};
use crate::monitor::ChannelGate;
use bridge::Channel;
use log::{debug, warn};

/// The Command-Out side: one frame per command, never blocking.
pub(crate) struct OutboundChannel {
    channel: Channel,
    transport: Box<dyn OutboundTransport>,
    gate: ChannelGate,
}

impl OutboundChannel {
    pub fn new(channel: Channel, transport: Box<dyn OutboundTransport>, gate: ChannelGate) -> Self {
        Self {
            channel,
            transport,
            gate,
        }
    }

    /// Sends one frame.
    ///
    /// # Returns
    ///
    /// * `Ok(SendStatus::Sent)` when the frame was queued.
    /// * `Ok(SendStatus::WouldBlock)` when the queue was full; the frame is dropped.
    /// * `Err(BridgeError::ChannelNotConnected)` when the gate is closed.
    pub fn send(&self, data: &[u8]) -> Result<SendStatus> {
        if !self.gate.is_open() {
            warn!("[KERNEL] No handshake on {}, cannot send", self.channel);
            return Err(BridgeError::ChannelNotConnected(self.channel));
        }
        let status = self.transport.send_bytes(data)?;
        if status == SendStatus::WouldBlock {
            warn!("[KERNEL] Resource timeout on {}, message dropped", self.channel);
        }
        Ok(status)
    }

    pub fn gate(&self) -> &ChannelGate {
        &self.gate
    }
}

/// A receiving channel (Response-In or MarketData-In).
pub(crate) struct InboundChannel<T> {
    channel: Channel,
    transport: T,
    gate: ChannelGate,
}

impl<T: InboundTransport> InboundChannel<T> {
    pub fn new(channel: Channel, transport: T, gate: ChannelGate) -> Self {
        Self {
            channel,
            transport,
            gate,
        }
    }

    /// Reads one pending frame.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(bytes))` when a frame was waiting.
    /// * `Ok(None)` when nothing was queued.
    /// * `Err(BridgeError::ChannelNotConnected)` when the gate is closed; the
    ///   frame, if any, stays queued.
    pub fn try_receive(&self) -> Result<Option<Vec<u8>>> {
        if !self.gate.is_open() {
            debug!("[KERNEL] No handshake on {}, cannot read", self.channel);
            return Err(BridgeError::ChannelNotConnected(self.channel));
        }
        self.transport.try_recv()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::transports::memory::memory_pair;
    use crate::monitor::LifecycleEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTransport {
        calls: Arc<AtomicUsize>,
    }

    impl OutboundTransport for CountingTransport {
        fn send_bytes(&self, _data: &[u8]) -> Result<SendStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SendStatus::Sent)
        }
    }

    #[test]
    fn test_closed_gate_refuses_before_transport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = ChannelGate::closed();
        let channel = OutboundChannel::new(
            Channel::CommandOut,
            Box::new(CountingTransport {
                calls: calls.clone(),
            }),
            gate.clone(),
        );

        let err = channel.send(b"HEARTBEAT;").unwrap_err();
        assert!(matches!(err, BridgeError::ChannelNotConnected(Channel::CommandOut)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate.apply(LifecycleEvent::Connected);
        assert!(channel.send(b"HEARTBEAT;").is_err());

        gate.apply(LifecycleEvent::HandshakeSucceeded);
        assert_eq!(channel.send(b"HEARTBEAT;").unwrap(), SendStatus::Sent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_full_queue_drops_frame() {
        let (output, input) = memory_pair(1);
        let channel = OutboundChannel::new(Channel::CommandOut, Box::new(output), ChannelGate::open());

        assert_eq!(channel.send(b"first").unwrap(), SendStatus::Sent);
        assert_eq!(channel.send(b"second").unwrap(), SendStatus::WouldBlock);
        assert_eq!(input.try_recv().unwrap(), Some(b"first".to_vec()));
        assert_eq!(input.try_recv().unwrap(), None);
    }

    #[test]
    fn test_inbound_gate_leaves_frame_queued() {
        let (output, input) = memory_pair(1);
        let gate = ChannelGate::closed();
        let channel = InboundChannel::new(Channel::ResponseIn, input, gate.clone());
        output.send_bytes(b"{'_action': 'EXECUTION'}").unwrap();

        assert!(matches!(
            channel.try_receive(),
            Err(BridgeError::ChannelNotConnected(Channel::ResponseIn))
        ));

        gate.apply(LifecycleEvent::Connected);
        gate.apply(LifecycleEvent::HandshakeSucceeded);
        assert_eq!(
            channel.try_receive().unwrap(),
            Some(b"{'_action': 'EXECUTION'}".to_vec())
        );
        assert_eq!(channel.try_receive().unwrap(), None);
    }
}
