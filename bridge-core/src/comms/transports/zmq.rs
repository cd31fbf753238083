use crate::comms::address::Address;
use crate::comms::transport::{InboundTransport, OutboundTransport, SendStatus};
use crate::error::Result;
use crate::monitor::Monitorable;
use std::sync::{Mutex, MutexGuard, PoisonError};
use zmq::{Context as ZmqContext, Socket, SocketType};

/// Queue depth of the PUSH and PULL sockets: one message in flight.
pub const HIGH_WATER_MARK: i32 = 1;

fn lock(socket: &Mutex<Socket>) -> MutexGuard<'_, Socket> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event mask for `socket.monitor`: every lifecycle event.
fn all_events() -> i32 {
    zmq::SocketEvent::ALL.to_raw() as i32
}

fn create(context: &ZmqContext, kind: SocketType) -> Result<Socket> {
    let socket = context.socket(kind)?;
    // Pending frames are discarded on close so shutdown never waits on the peer.
    socket.set_linger(0)?;
    Ok(socket)
}

/// Command-Out transport (ZMQ PUSH).
///
/// Shared by every caller thread; the Mutex serializes access to the socket.
pub(crate) struct ZmqPush {
    socket: Mutex<Socket>,
}

impl ZmqPush {
    /// Creates the socket without connecting it, so a monitor can be attached first.
    pub fn new(context: &ZmqContext) -> Result<Self> {
        let socket = create(context, SocketType::PUSH)?;
        socket.set_sndhwm(HIGH_WATER_MARK)?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    pub fn connect(&self, address: &Address) -> Result<()> {
        lock(&self.socket).connect(&address.endpoint())?;
        Ok(())
    }
}

impl OutboundTransport for ZmqPush {
    fn send_bytes(&self, data: &[u8]) -> Result<SendStatus> {
        let socket = lock(&self.socket);
        match socket.send(data, zmq::DONTWAIT) {
            Ok(()) => Ok(SendStatus::Sent),
            Err(zmq::Error::EAGAIN) => Ok(SendStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }
}

impl Monitorable for ZmqPush {
    fn arm_monitor(&self, endpoint: &str) -> Result<()> {
        lock(&self.socket).monitor(endpoint, all_events())?;
        Ok(())
    }
}

/// Response-In transport (ZMQ PULL).
///
/// Owned jointly by the poll loop, which holds the lock while polling, and the
/// health monitor, which needs it to re-arm.
pub(crate) struct ZmqPull {
    socket: Mutex<Socket>,
}

impl ZmqPull {
    pub fn new(context: &ZmqContext) -> Result<Self> {
        let socket = create(context, SocketType::PULL)?;
        socket.set_rcvhwm(HIGH_WATER_MARK)?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    pub fn connect(&self, address: &Address) -> Result<()> {
        lock(&self.socket).connect(&address.endpoint())?;
        Ok(())
    }

    /// Locks the socket for building a poll item.
    pub fn lock(&self) -> MutexGuard<'_, Socket> {
        lock(&self.socket)
    }
}

impl InboundTransport for ZmqPull {
    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        recv_nonblocking(&lock(&self.socket))
    }
}

impl Monitorable for ZmqPull {
    fn arm_monitor(&self, endpoint: &str) -> Result<()> {
        lock(&self.socket).monitor(endpoint, all_events())?;
        Ok(())
    }
}

/// MarketData-In transport (ZMQ SUB).
///
/// Read by the poll loop alone; subscription changes reach it through the
/// control channel. The Mutex only makes the transport shareable.
pub(crate) struct ZmqSub {
    socket: Mutex<Socket>,
}

impl ZmqSub {
    /// Creates an SUB socket with no subscriptions.
    pub fn new(context: &ZmqContext) -> Result<Self> {
        Ok(Self {
            socket: Mutex::new(create(context, SocketType::SUB)?),
        })
    }

    pub fn connect(&self, address: &Address) -> Result<()> {
        lock(&self.socket).connect(&address.endpoint())?;
        Ok(())
    }

    pub fn subscribe(&self, topic: &str) -> Result<()> {
        lock(&self.socket).set_subscribe(topic.as_bytes())?;
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        lock(&self.socket).set_unsubscribe(topic.as_bytes())?;
        Ok(())
    }

    /// Locks the socket for building a poll item.
    pub fn lock(&self) -> MutexGuard<'_, Socket> {
        lock(&self.socket)
    }
}

impl InboundTransport for ZmqSub {
    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        recv_nonblocking(&lock(&self.socket))
    }
}

/// How a background loop reacts to a failed `zmq::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollFailure {
    /// A signal interrupted the wait; poll again at once.
    Interrupted,
    /// The context is gone, every socket with it.
    Terminated,
    /// Anything else; back off and poll again.
    Transient,
}

impl PollFailure {
    pub fn classify(error: zmq::Error) -> Self {
        match error {
            zmq::Error::EINTR => PollFailure::Interrupted,
            zmq::Error::ETERM => PollFailure::Terminated,
            _ => PollFailure::Transient,
        }
    }
}

fn recv_nonblocking(socket: &Socket) -> Result<Option<Vec<u8>>> {
    match socket.recv_bytes(zmq::DONTWAIT) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(zmq::Error::EAGAIN) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_without_peer_would_block() {
        let context = ZmqContext::new();
        let push = ZmqPush::new(&context).unwrap();
        push.connect(&Address::tcp("127.0.0.1", 5991)).unwrap();

        // Nobody listens: once the one-message queue is full, sends are refused.
        let refused = (0..1000)
            .map(|_| push.send_bytes(b"HEARTBEAT;").unwrap())
            .any(|status| status == SendStatus::WouldBlock);
        assert!(refused);
    }

    #[test]
    fn test_pull_with_nothing_queued() {
        let context = ZmqContext::new();
        let pull = ZmqPull::new(&context).unwrap();
        pull.connect(&Address::tcp("127.0.0.1", 5992)).unwrap();
        assert_eq!(pull.try_recv().unwrap(), None);
    }

    #[test]
    fn test_sub_subscription_changes() {
        let context = ZmqContext::new();
        let sub = ZmqSub::new(&context).unwrap();
        sub.subscribe("EURUSD").unwrap();
        sub.unsubscribe("EURUSD").unwrap();
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[test]
    fn test_sub_is_shareable_across_threads() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<ZmqSub>();
        assert_sync::<ZmqPull>();
        assert_sync::<ZmqPush>();
    }

    #[test]
    fn test_monitor_mask_covers_every_event() {
        assert_eq!(all_events(), 0xFFFF);
    }

    #[test]
    fn test_poll_failure_classification() {
        assert_eq!(PollFailure::classify(zmq::Error::EINTR), PollFailure::Interrupted);
        assert_eq!(PollFailure::classify(zmq::Error::ETERM), PollFailure::Terminated);
        assert_eq!(PollFailure::classify(zmq::Error::EFAULT), PollFailure::Transient);
        assert_eq!(PollFailure::classify(zmq::Error::ENOTSOCK), PollFailure::Transient);
    }
}
