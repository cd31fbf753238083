//! Socket health monitoring.
//!
//! libzmq reports connection lifecycle events for a socket on an `inproc://`
//! PAIR endpoint. A [`health::HealthMonitor`] reads those events for the PUSH or
//! PULL socket and folds them into a [`ChannelGate`]; the channel refuses I/O
//! while its gate is not `Connected`.

pub(crate) mod health;

use crate::error::Result;
use bridge::ChannelState;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A socket that can report its lifecycle events to an `inproc://` endpoint.
pub(crate) trait Monitorable: Send + Sync {
    fn arm_monitor(&self, endpoint: &str) -> Result<()>;
}

/// A libzmq socket lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    ConnectDelayed,
    ConnectRetried,
    Listening,
    BindFailed,
    Accepted,
    AcceptFailed,
    Closed,
    CloseFailed,
    Disconnected,
    MonitorStopped,
    HandshakeFailedNoDetail,
    HandshakeSucceeded,
    HandshakeFailedProtocol,
    HandshakeFailedAuth,
    Unknown(u16),
}

impl LifecycleEvent {
    /// Decodes the event id of the first monitor frame.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0001 => LifecycleEvent::Connected,
            0x0002 => LifecycleEvent::ConnectDelayed,
            0x0004 => LifecycleEvent::ConnectRetried,
            0x0008 => LifecycleEvent::Listening,
            0x0010 => LifecycleEvent::BindFailed,
            0x0020 => LifecycleEvent::Accepted,
            0x0040 => LifecycleEvent::AcceptFailed,
            0x0080 => LifecycleEvent::Closed,
            0x0100 => LifecycleEvent::CloseFailed,
            0x0200 => LifecycleEvent::Disconnected,
            0x0400 => LifecycleEvent::MonitorStopped,
            0x0800 => LifecycleEvent::HandshakeFailedNoDetail,
            0x1000 => LifecycleEvent::HandshakeSucceeded,
            0x2000 => LifecycleEvent::HandshakeFailedProtocol,
            0x4000 => LifecycleEvent::HandshakeFailedAuth,
            other => LifecycleEvent::Unknown(other),
        }
    }

    pub fn name(&self) -> String {
        let name = match self {
            LifecycleEvent::Connected => "EVENT_CONNECTED",
            LifecycleEvent::ConnectDelayed => "EVENT_CONNECT_DELAYED",
            LifecycleEvent::ConnectRetried => "EVENT_CONNECT_RETRIED",
            LifecycleEvent::Listening => "EVENT_LISTENING",
            LifecycleEvent::BindFailed => "EVENT_BIND_FAILED",
            LifecycleEvent::Accepted => "EVENT_ACCEPTED",
            LifecycleEvent::AcceptFailed => "EVENT_ACCEPT_FAILED",
            LifecycleEvent::Closed => "EVENT_CLOSED",
            LifecycleEvent::CloseFailed => "EVENT_CLOSE_FAILED",
            LifecycleEvent::Disconnected => "EVENT_DISCONNECTED",
            LifecycleEvent::MonitorStopped => "EVENT_MONITOR_STOPPED",
            LifecycleEvent::HandshakeFailedNoDetail => "EVENT_HANDSHAKE_FAILED_NO_DETAIL",
            LifecycleEvent::HandshakeSucceeded => "EVENT_HANDSHAKE_SUCCEEDED",
            LifecycleEvent::HandshakeFailedProtocol => "EVENT_HANDSHAKE_FAILED_PROTOCOL",
            LifecycleEvent::HandshakeFailedAuth => "EVENT_HANDSHAKE_FAILED_AUTH",
            LifecycleEvent::Unknown(raw) => return format!("EVENT_UNKNOWN({:#06x})", raw),
        };
        name.to_string()
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Folds one lifecycle event into the channel state.
///
/// `CONNECTED` starts a handshake, `HANDSHAKE_SUCCEEDED` completes it, and
/// every other event drops the channel to `Disconnected`.
pub fn next_state(event: LifecycleEvent) -> ChannelState {
    match event {
        LifecycleEvent::Connected => ChannelState::Handshaking,
        LifecycleEvent::HandshakeSucceeded => ChannelState::Connected,
        _ => ChannelState::Disconnected,
    }
}

/// Shared connection state of one channel.
///
/// Written by the channel's health monitor, read by every sender and receiver.
#[derive(Debug, Clone)]
pub struct ChannelGate {
    state: Arc<AtomicU8>,
    latest_event: Arc<Mutex<Option<String>>>,
}

impl ChannelGate {
    /// A gate that starts closed and waits for a handshake.
    pub fn closed() -> Self {
        Self::with_state(ChannelState::Disconnected)
    }

    /// A gate for an unmonitored channel; it never closes.
    pub fn open() -> Self {
        Self::with_state(ChannelState::Connected)
    }

    fn with_state(state: ChannelState) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(state.to_raw())),
            latest_event: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_connected()
    }

    /// Name of the last lifecycle event applied, if any.
    pub fn latest_event(&self) -> Option<String> {
        self.latest_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `event` and returns the resulting state.
    pub fn apply(&self, event: LifecycleEvent) -> ChannelState {
        let state = next_state(event);
        *self
            .latest_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(event.name());
        self.state.store(state.to_raw(), Ordering::Release);
        state
    }
}
