//! The connector: three ZeroMQ channels to the MetaTrader server plus the
//! background threads that drain them.
//!
//! Commands go out on PUSH from the caller's thread. Replies (PULL) and
//! published market data (SUB) are read by a single poll thread that writes the
//! response slot and the stores, then runs the registered handlers. With
//! monitoring enabled, one extra thread per PUSH/PULL socket tracks handshakes
//! and gates the channel.

pub mod handlers;
pub(crate) mod poller;

pub use handlers::HandlerRegistry;

use crate::comms::channel::{InboundChannel, OutboundChannel};
use crate::comms::control::{control_pair, ControlMessage, ControlSender};
use crate::comms::transport::SendStatus;
use crate::comms::transports::zmq::{ZmqPull, ZmqPush, ZmqSub};
use crate::config::EndpointConfig;
use crate::error::{BridgeError, Result};
use crate::monitor::health::HealthMonitor;
use crate::monitor::{ChannelGate, Monitorable};
use crate::store::{HistoryStore, MarketDataStore, ResponseSlot};
use bridge::{
    Channel, ChannelState, Command, HistoryRequest, RateSubscription, Response, TradeAction,
    TradeInstruction,
};
use log::{debug, error, info, log, warn, Level};
use poller::{Dispatcher, PollLoop};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Health of one channel as last reported by its monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub state: ChannelState,
    /// Name of the most recent lifecycle event, `None` if unmonitored or nothing seen yet.
    pub latest_event: Option<String>,
}

/// A background thread and the control channel that stops it.
struct Worker {
    name: String,
    control: ControlSender,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(name: &str, control: ControlSender, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
        Ok(Self {
            name: name.to_string(),
            control,
            handle: Some(handle),
        })
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn request_stop(&self) {
        if let Err(e) = self.control.send(&ControlMessage::Shutdown) {
            warn!("[KERNEL] Failed to signal {}: {}", self.name, e);
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[KERNEL] {} thread panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            self.join();
        }
    }
}

/// Client side of the MetaTrader ZeroMQ bridge.
///
/// Dropping the connector stops its threads and closes the sockets.
pub struct Connector {
    config: EndpointConfig,
    command: OutboundChannel,
    response_gate: ChannelGate,
    slot: Arc<ResponseSlot>,
    market: Arc<MarketDataStore>,
    history: Arc<HistoryStore>,
    poller: Worker,
    monitors: Vec<Worker>,
    subscriptions: Mutex<BTreeSet<String>>,
    issue_lock: Mutex<()>,
    stopped: bool,
}

impl Connector {
    /// Connects the three channels and starts the background threads.
    ///
    /// Connecting does not wait for the server; ZeroMQ retries in the
    /// background. With monitoring enabled, PUSH and PULL stay closed until
    /// their first handshake.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoints and tuning, validated before anything is created.
    /// * `handlers` - Callbacks for replies and market data.
    pub fn connect(config: EndpointConfig, handlers: HandlerRegistry) -> Result<Self> {
        Self::with_context(config, handlers, &zmq::Context::new())
    }

    /// Same as [`Connector::connect`], on a caller-provided ZeroMQ context.
    pub fn with_context(
        config: EndpointConfig,
        handlers: HandlerRegistry,
        context: &zmq::Context,
    ) -> Result<Self> {
        config.validate()?;

        let push = Arc::new(ZmqPush::new(context)?);
        let pull = Arc::new(ZmqPull::new(context)?);
        let sub = ZmqSub::new(context)?;

        let monitored = config.is_monitored();
        let (command_gate, response_gate) = if monitored {
            (ChannelGate::closed(), ChannelGate::closed())
        } else {
            (ChannelGate::open(), ChannelGate::open())
        };

        // Monitors are armed before connecting so the first handshake is seen.
        let mut pending_monitors = Vec::new();
        if monitored {
            let targets: [(Channel, Arc<dyn Monitorable>, &ChannelGate); 2] = [
                (Channel::CommandOut, push.clone(), &command_gate),
                (Channel::ResponseIn, pull.clone(), &response_gate),
            ];
            for (channel, target, gate) in targets {
                let (tx, rx) = control_pair(context, channel.socket_name())?;
                let monitor = HealthMonitor::attach(
                    channel,
                    target,
                    gate.clone(),
                    context,
                    rx,
                    config.get_poll_timeout(),
                    config.get_sleep_delay(),
                    config.is_verbose(),
                )?;
                pending_monitors.push((channel, tx, monitor));
            }
        }

        push.connect(&config.address(Channel::CommandOut))?;
        info!(
            "[INIT] Ready to send commands to METATRADER ({}): {}",
            Channel::CommandOut.socket_name(),
            config.address(Channel::CommandOut)
        );
        pull.connect(&config.address(Channel::ResponseIn))?;
        info!(
            "[INIT] Listening for responses from METATRADER ({}): {}",
            Channel::ResponseIn.socket_name(),
            config.address(Channel::ResponseIn)
        );
        sub.connect(&config.address(Channel::MarketDataIn))?;
        info!(
            "[INIT] Listening for market data from METATRADER ({}): {}",
            Channel::MarketDataIn.socket_name(),
            config.address(Channel::MarketDataIn)
        );

        let slot = Arc::new(ResponseSlot::new());
        let market = Arc::new(MarketDataStore::new());
        let history = Arc::new(HistoryStore::new());

        let dispatcher = Dispatcher::new(
            config.get_delimiter(),
            config.is_verbose(),
            slot.clone(),
            market.clone(),
            history.clone(),
            handlers,
        );
        let (poll_tx, poll_rx) = control_pair(context, "poll")?;
        let poll_loop = PollLoop::new(
            InboundChannel::new(Channel::ResponseIn, pull, response_gate.clone()),
            InboundChannel::new(Channel::MarketDataIn, sub, ChannelGate::open()),
            poll_rx,
            dispatcher,
            config.get_poll_timeout(),
            config.get_sleep_delay(),
        );
        let poller = Worker::spawn("bridge-poll", poll_tx, move || poll_loop.run())?;

        let mut monitors = Vec::new();
        for (channel, tx, monitor) in pending_monitors {
            let name = format!("bridge-monitor-{}", channel.socket_name().to_lowercase());
            monitors.push(Worker::spawn(&name, tx, move || monitor.run())?);
        }
        if monitored {
            info!("[INIT] Socket health monitors started for PUSH and PULL");
        }

        Ok(Self {
            command: OutboundChannel::new(Channel::CommandOut, Box::new(push), command_gate),
            config,
            response_gate,
            slot,
            market,
            history,
            poller,
            monitors,
            subscriptions: Mutex::new(BTreeSet::new()),
            issue_lock: Mutex::new(()),
            stopped: false,
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn traffic_level(&self) -> Level {
        if self.config.is_verbose() {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Serializes `command` and sends it on the Command-Out channel.
    ///
    /// # Returns
    ///
    /// * `Ok(SendStatus::Sent)` when the frame was queued.
    /// * `Ok(SendStatus::WouldBlock)` when the one-message queue was full; the command was dropped.
    /// * `Err(BridgeError::ChannelNotConnected)` when monitoring saw no handshake.
    /// * `Err(BridgeError::Wire)` when a text field contains the delimiter.
    pub fn send_command(&self, command: &Command) -> Result<SendStatus> {
        if self.stopped {
            return Err(BridgeError::ShutDown);
        }
        let wire = command.to_wire(self.config.get_delimiter())?;
        let status = self.command.send(wire.as_bytes())?;
        if status.is_sent() {
            log!(self.traffic_level(), "[PUSH] {}", wire);
        }
        Ok(status)
    }

    /// The default instruction for `action`, carrying this client's id as comment.
    pub fn default_instruction(&self, action: TradeAction) -> TradeInstruction {
        TradeInstruction {
            action,
            ..TradeInstruction::default()
        }
        .with_comment(self.config.get_client_id())
    }

    /// Opens a trade. The action field is forced to OPEN.
    pub fn new_trade(&self, instruction: TradeInstruction) -> Result<SendStatus> {
        let instruction = TradeInstruction {
            action: TradeAction::Open,
            ..instruction
        };
        self.send_command(&Command::Trade(instruction))
    }

    /// Changes SL/TP (in points) and, for pending orders, the price of `ticket`.
    pub fn modify_trade_by_ticket(
        &self,
        ticket: u64,
        stop_loss: f64,
        take_profit: f64,
        price: f64,
    ) -> Result<SendStatus> {
        let instruction = self
            .default_instruction(TradeAction::Modify)
            .with_ticket(ticket)
            .with_stops(stop_loss, take_profit)
            .with_price(price);
        self.send_command(&Command::Trade(instruction))
    }

    pub fn close_trade_by_ticket(&self, ticket: u64) -> Result<SendStatus> {
        let instruction = self
            .default_instruction(TradeAction::Close)
            .with_ticket(ticket);
        self.send_command(&Command::Trade(instruction))
    }

    pub fn close_partial_by_ticket(&self, ticket: u64, lots: f64) -> Result<SendStatus> {
        let instruction = self
            .default_instruction(TradeAction::ClosePartial)
            .with_ticket(ticket)
            .with_lots(lots);
        self.send_command(&Command::Trade(instruction))
    }

    pub fn close_trades_by_magic(&self, magic: u64) -> Result<SendStatus> {
        let instruction = self
            .default_instruction(TradeAction::CloseMagic)
            .with_magic(magic);
        self.send_command(&Command::Trade(instruction))
    }

    pub fn close_all_trades(&self) -> Result<SendStatus> {
        let instruction = self.default_instruction(TradeAction::CloseAll);
        self.send_command(&Command::Trade(instruction))
    }

    pub fn get_all_open_trades(&self) -> Result<SendStatus> {
        let instruction = self.default_instruction(TradeAction::GetOpenTrades);
        self.send_command(&Command::Trade(instruction))
    }

    /// Requests bars; the reply also lands in [`Connector::history`].
    pub fn send_hist_request(&self, request: HistoryRequest) -> Result<SendStatus> {
        self.send_command(&Command::History(request))
    }

    /// Legacy DATA request, answered with a close-price series.
    pub fn send_data_request(&self, request: HistoryRequest) -> Result<SendStatus> {
        self.send_command(&Command::Data(request))
    }

    /// Asks the server to publish bid/ask for `symbols`. Replaces the previous list.
    pub fn send_track_prices_request<I, S>(&self, symbols: I) -> Result<SendStatus>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = symbols.into_iter().map(Into::into).collect();
        self.send_command(&Command::TrackPrices(symbols))
    }

    /// Asks the server to publish bars for each `(symbol, timeframe)`. Replaces the previous list.
    pub fn send_track_rates_request(
        &self,
        subscriptions: Vec<RateSubscription>,
    ) -> Result<SendStatus> {
        self.send_command(&Command::TrackRates(subscriptions))
    }

    pub fn heartbeat(&self) -> Result<SendStatus> {
        self.send_command(&Command::Heartbeat)
    }

    /// Subscribes the SUB channel to `topic` (an instrument or `SYMBOL_TF`).
    ///
    /// The change is applied by the poll thread, which owns the socket.
    pub fn subscribe_market_data(&self, topic: &str) -> Result<()> {
        self.control_poller(ControlMessage::Subscribe(topic.to_string()))?;
        self.lock_subscriptions().insert(topic.to_string());
        Ok(())
    }

    pub fn unsubscribe_market_data(&self, topic: &str) -> Result<()> {
        self.control_poller(ControlMessage::Unsubscribe(topic.to_string()))?;
        self.lock_subscriptions().remove(topic);
        Ok(())
    }

    /// Unsubscribes every subscribed topic and every instrument seen so far.
    pub fn unsubscribe_all_market_data(&self) -> Result<()> {
        let mut topics: BTreeSet<String> = self.lock_subscriptions().clone();
        topics.extend(self.market.instruments());
        for topic in &topics {
            self.unsubscribe_market_data(topic)?;
        }
        Ok(())
    }

    /// Currently subscribed topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock_subscriptions().iter().cloned().collect()
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn control_poller(&self, message: ControlMessage) -> Result<()> {
        if self.stopped {
            return Err(BridgeError::ShutDown);
        }
        debug!("[KERNEL] Control: {:?}", message);
        self.poller.control.send(&message)
    }

    /// A copy of the most recent reply.
    pub fn response(&self) -> Option<Response> {
        self.slot.get()
    }

    pub fn take_response(&self) -> Option<Response> {
        self.slot.take()
    }

    pub fn clear_response(&self) {
        self.slot.clear();
    }

    pub fn response_slot(&self) -> &ResponseSlot {
        &self.slot
    }

    pub fn market_data(&self) -> &MarketDataStore {
        &self.market
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn gate(&self, channel: Channel) -> Option<&ChannelGate> {
        match channel {
            Channel::CommandOut => Some(self.command.gate()),
            Channel::ResponseIn => Some(&self.response_gate),
            Channel::MarketDataIn => None,
        }
    }

    /// Connection state of `channel`. MarketData-In is never gated.
    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        self.gate(channel)
            .map_or(ChannelState::Connected, ChannelGate::state)
    }

    pub fn channel_status(&self, channel: Channel) -> ChannelStatus {
        ChannelStatus {
            channel,
            state: self.channel_state(channel),
            latest_event: self.gate(channel).and_then(ChannelGate::latest_event),
        }
    }

    /// Whether the poll thread is still running.
    pub fn is_running(&self) -> bool {
        !self.stopped && self.poller.is_running()
    }

    /// Held by [`crate::execution::Executor`] across clear, send and wait.
    pub(crate) fn issue_guard(&self) -> MutexGuard<'_, ()> {
        self.issue_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the background threads and closes the sockets.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.poller.request_stop();
        for monitor in &self.monitors {
            monitor.request_stop();
        }
        self.poller.join();
        for monitor in &mut self.monitors {
            monitor.join();
        }
        info!("[KERNEL] Connector shut down, sockets closed");
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.stop();
    }
}
