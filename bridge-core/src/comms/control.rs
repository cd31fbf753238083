//! In-process control channel for the background threads.
//!
//! Each background loop polls a PAIR socket alongside its data sockets. The
//! connector holds the other end and uses it to stop the loop or, for the poll
//! loop, to change SUB subscriptions from the thread that owns the socket.

use crate::error::Result;
use log::warn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use zmq::{Context as ZmqContext, Socket, SocketType};

static NEXT_CONTROL_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
    Subscribe(String),
    Unsubscribe(String),
}

impl ControlMessage {
    fn encode(&self) -> String {
        match self {
            ControlMessage::Shutdown => "STOP".to_string(),
            ControlMessage::Subscribe(topic) => format!("SUB {}", topic),
            ControlMessage::Unsubscribe(topic) => format!("UNSUB {}", topic),
        }
    }

    fn decode(text: &str) -> Option<Self> {
        if text == "STOP" {
            return Some(ControlMessage::Shutdown);
        }
        let (verb, topic) = text.split_once(' ')?;
        match verb {
            "SUB" => Some(ControlMessage::Subscribe(topic.to_string())),
            "UNSUB" => Some(ControlMessage::Unsubscribe(topic.to_string())),
            _ => None,
        }
    }
}

/// Caller side of a control channel.
pub(crate) struct ControlSender {
    socket: Mutex<Socket>,
}

impl ControlSender {
    /// Queues `message` without blocking; fails if the loop side is gone.
    pub fn send(&self, message: &ControlMessage) -> Result<()> {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        socket.send(message.encode().as_bytes(), zmq::DONTWAIT)?;
        Ok(())
    }
}

/// Loop side of a control channel.
pub(crate) struct ControlReceiver {
    socket: Socket,
}

impl ControlReceiver {
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Reads one pending control message, skipping frames it cannot decode.
    pub fn try_recv(&self) -> Result<Option<ControlMessage>> {
        let bytes = match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let message = ControlMessage::decode(&text);
        if message.is_none() {
            warn!("[CONTROL] Ignoring unknown control frame: {}", text);
        }
        Ok(message)
    }
}

/// Creates a bound/connected PAIR on a fresh `inproc://` endpoint.
pub(crate) fn control_pair(context: &ZmqContext, name: &str) -> Result<(ControlSender, ControlReceiver)> {
    let endpoint = format!(
        "inproc://bridge-control-{}-{}",
        name,
        NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed)
    );

    let receiver = context.socket(SocketType::PAIR)?;
    receiver.set_linger(0)?;
    receiver.bind(&endpoint)?;

    let sender = context.socket(SocketType::PAIR)?;
    sender.set_linger(0)?;
    sender.connect(&endpoint)?;

    Ok((
        ControlSender {
            socket: Mutex::new(sender),
        },
        ControlReceiver { socket: receiver },
    ))
}
