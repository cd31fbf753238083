use crate::comms::control::{ControlMessage, ControlReceiver};
use crate::comms::transports::zmq::PollFailure;
use crate::error::Result;
use crate::monitor::{ChannelGate, LifecycleEvent, Monitorable};
use bridge::{Channel, ChannelState};
use log::{debug, error, info, log, warn, Level};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use zmq::{Context as ZmqContext, Socket, SocketType, POLLIN};

static NEXT_MONITOR_ID: AtomicUsize = AtomicUsize::new(0);

/// One decoded monitor notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MonitorEvent {
    pub event: LifecycleEvent,
    /// Event-specific value (file descriptor, errno or retry interval).
    pub value: u32,
    pub endpoint: String,
}

/// Decodes the two frames libzmq publishes per event.
///
/// The first frame holds the event id (u16) followed by the value (u32) in
/// native byte order; the second holds the affected endpoint.
pub(crate) fn decode_event(frames: &[Vec<u8>]) -> Option<MonitorEvent> {
    let header = frames.first().filter(|frame| frame.len() >= 6)?;
    let id = u16::from_ne_bytes([header[0], header[1]]);
    let value = u32::from_ne_bytes([header[2], header[3], header[4], header[5]]);
    let endpoint = frames
        .get(1)
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .unwrap_or_default();
    Some(MonitorEvent {
        event: LifecycleEvent::from_raw(id),
        value,
        endpoint,
    })
}

/// Arms `target` on a fresh endpoint and connects a PAIR to read its events.
fn open_event_socket(context: &ZmqContext, channel: Channel, target: &dyn Monitorable) -> Result<Socket> {
    let endpoint = format!(
        "inproc://bridge-monitor-{}-{}",
        channel.socket_name().to_lowercase(),
        NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed)
    );
    target.arm_monitor(&endpoint)?;

    let socket = context.socket(SocketType::PAIR)?;
    socket.set_linger(0)?;
    socket.connect(&endpoint)?;
    Ok(socket)
}

/// Background reader of one channel's lifecycle events.
pub(crate) struct HealthMonitor {
    channel: Channel,
    target: Arc<dyn Monitorable>,
    gate: ChannelGate,
    context: ZmqContext,
    events: Socket,
    control: ControlReceiver,
    poll_timeout_ms: i64,
    retry_delay: Duration,
    verbose: bool,
}

impl HealthMonitor {
    /// Arms the monitor on `target`.
    ///
    /// Must run before `target` connects, otherwise the handshake events of
    /// the first connection are lost and the gate never opens.
    pub fn attach(
        channel: Channel,
        target: Arc<dyn Monitorable>,
        gate: ChannelGate,
        context: &ZmqContext,
        control: ControlReceiver,
        poll_timeout: Duration,
        retry_delay: Duration,
        verbose: bool,
    ) -> Result<Self> {
        let events = open_event_socket(context, channel, target.as_ref())?;
        Ok(Self {
            channel,
            target,
            gate,
            context: context.clone(),
            events,
            control,
            poll_timeout_ms: poll_timeout.as_millis() as i64,
            retry_delay,
            verbose,
        })
    }

    pub fn run(mut self) {
        info!("=== {} Health Monitor Starting ===", self.channel);

        loop {
            let polled = {
                let mut items = [
                    self.events.as_poll_item(POLLIN),
                    self.control.socket().as_poll_item(POLLIN),
                ];
                let result = zmq::poll(&mut items, self.poll_timeout_ms)
                    .map(|_| (items[0].is_readable(), items[1].is_readable()));
                result
            };

            let (event_ready, control_ready) = match polled {
                Ok(flags) => flags,
                Err(e) => match PollFailure::classify(e) {
                    PollFailure::Interrupted => continue,
                    PollFailure::Terminated => {
                        error!("[{}] Context terminated, monitor exits", self.channel);
                        break;
                    }
                    PollFailure::Transient => {
                        warn!("[{}] Monitor poll error: {}", self.channel, e);
                        thread::sleep(self.retry_delay);
                        continue;
                    }
                },
            };

            if control_ready && self.shutdown_requested() {
                break;
            }
            if event_ready {
                self.drain_events();
            }
        }

        info!("=== {} Health Monitor Stopped ===", self.channel);
    }

    fn shutdown_requested(&self) -> bool {
        loop {
            match self.control.try_recv() {
                Ok(Some(ControlMessage::Shutdown)) => return true,
                Ok(Some(other)) => debug!("[{}] Monitor ignores {:?}", self.channel, other),
                Ok(None) => return false,
                Err(e) => {
                    error!("[{}] Control channel error: {}", self.channel, e);
                    return true;
                }
            }
        }
    }

    fn drain_events(&mut self) {
        loop {
            let frames = match self.events.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => return,
                Err(e) => {
                    warn!("[{}] Failed to read monitor event: {}", self.channel, e);
                    return;
                }
            };
            let Some(event) = decode_event(&frames) else {
                warn!("[{}] Malformed monitor event ({} frames)", self.channel, frames.len());
                continue;
            };

            self.apply(&event);

            if event.event == LifecycleEvent::MonitorStopped {
                self.rearm();
                return;
            }
        }
    }

    fn apply(&self, event: &MonitorEvent) {
        let previous = self.gate.state();
        let state = self.gate.apply(event.event);

        match (previous, state) {
            (p, ChannelState::Connected) if p != ChannelState::Connected => {
                info!("[{}] {} on {}, channel open", self.channel, event.event, event.endpoint)
            }
            (ChannelState::Connected, s) if s != ChannelState::Connected => {
                warn!("[{}] {} on {}, channel closed", self.channel, event.event, event.endpoint)
            }
            _ => {
                let level = if self.verbose { Level::Info } else { Level::Debug };
                log!(level, "[{}] {} (value {}) -> {}", self.channel, event.event, event.value, state);
            }
        }
    }

    fn rearm(&mut self) {
        match open_event_socket(&self.context, self.channel, self.target.as_ref()) {
            Ok(events) => {
                info!("[{}] Monitor re-armed", self.channel);
                self.events = events;
            }
            Err(e) => error!("[{}] Failed to re-arm monitor: {}", self.channel, e),
        }
    }
}
