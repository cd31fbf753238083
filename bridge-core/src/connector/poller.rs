use crate::comms::channel::InboundChannel;
use crate::comms::control::{ControlMessage, ControlReceiver};
use crate::comms::transports::zmq::{PollFailure, ZmqPull, ZmqSub};
use crate::connector::handlers::HandlerRegistry;
use crate::error::BridgeError;
use crate::store::{HistoryStore, MarketDataStore, ResponseSlot};
use bridge::{MarketRecord, Response};
use chrono::Utc;
use log::{error, info, log, warn, Level};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use zmq::POLLIN;

/// Routes inbound frames to the stores and handlers.
pub(crate) struct Dispatcher {
    delimiter: char,
    verbose: bool,
    slot: Arc<ResponseSlot>,
    market: Arc<MarketDataStore>,
    history: Arc<HistoryStore>,
    handlers: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(
        delimiter: char,
        verbose: bool,
        slot: Arc<ResponseSlot>,
        market: Arc<MarketDataStore>,
        history: Arc<HistoryStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            delimiter,
            verbose,
            slot,
            market,
            history,
            handlers,
        }
    }

    fn traffic_level(&self) -> Level {
        if self.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Handles one reply frame from the PULL channel.
    ///
    /// A parsed reply overwrites the response slot, HIST data also replaces the
    /// symbol's history, then the response handlers run. Frames that do not
    /// parse are logged and dropped.
    pub fn on_response(&mut self, bytes: &[u8]) {
        let Ok(text) = std::str::from_utf8(bytes) else {
            warn!("[PULL] Dropping non UTF-8 reply ({} bytes)", bytes.len());
            return;
        };
        log!(self.traffic_level(), "[PULL] {}", text);

        let response = match Response::parse(text) {
            Ok(response) => response,
            Err(e) => {
                warn!("[PULL] Dropping malformed reply ({}): {}", e, text);
                return;
            }
        };

        if let Response::History(report) = &response {
            if report.rejected_rows > 0 {
                warn!(
                    "[HIST] Skipped {} row(s) for {} that are not bars",
                    report.rejected_rows, report.symbol
                );
            }
            match &report.data {
                Some(bars) => {
                    log!(
                        self.traffic_level(),
                        "[HIST] Stored {} bars for {}",
                        bars.len(),
                        report.symbol
                    );
                    self.history.replace(&report.symbol, bars.clone());
                }
                None => warn!(
                    "[HIST] No data for {}. MetaTrader often needs a second request for symbols without an open chart",
                    report.symbol
                ),
            }
        }

        self.slot.put(response.clone());
        self.handlers.dispatch_response(&response);
    }

    /// Handles one frame from the SUB channel.
    ///
    /// Handlers see every frame that has a topic, including frames whose
    /// payload is rejected by the store.
    pub fn on_market_data(&mut self, bytes: &[u8]) {
        let Ok(text) = std::str::from_utf8(bytes) else {
            warn!("[SUB] Dropping non UTF-8 frame ({} bytes)", bytes.len());
            return;
        };
        if !text.contains(' ') {
            warn!("[SUB] Dropping frame without topic: {}", text);
            return;
        }

        match MarketRecord::parse(text, self.delimiter, Utc::now()) {
            Ok(record) => {
                log!(self.traffic_level(), "[SUB] {}", text);
                self.market.insert(record);
            }
            Err(e) => warn!("[SUB] Rejected {}: {}", text, e),
        }

        self.handlers.dispatch_market_data(text);
    }
}

/// The background loop draining the PULL and SUB channels.
pub(crate) struct PollLoop {
    responses: InboundChannel<Arc<ZmqPull>>,
    market_data: InboundChannel<ZmqSub>,
    control: ControlReceiver,
    dispatcher: Dispatcher,
    poll_timeout_ms: i64,
    sleep_delay: Duration,
}

impl PollLoop {
    pub fn new(
        responses: InboundChannel<Arc<ZmqPull>>,
        market_data: InboundChannel<ZmqSub>,
        control: ControlReceiver,
        dispatcher: Dispatcher,
        poll_timeout: Duration,
        sleep_delay: Duration,
    ) -> Self {
        Self {
            responses,
            market_data,
            control,
            dispatcher,
            poll_timeout_ms: poll_timeout.as_millis() as i64,
            sleep_delay,
        }
    }

    pub fn run(mut self) {
        info!("=== Poll Loop Starting ===");
        let mut stalled = false;

        loop {
            let polled = {
                let pull = self.responses.transport().lock();
                let sub = self.market_data.transport().lock();
                let mut items = [
                    pull.as_poll_item(POLLIN),
                    sub.as_poll_item(POLLIN),
                    self.control.socket().as_poll_item(POLLIN),
                ];
                let result = zmq::poll(&mut items, self.poll_timeout_ms).map(|_| {
                    (items[0].is_readable(), items[1].is_readable(), items[2].is_readable())
                });
                result
            };

            let (response_ready, market_ready, control_ready) = match polled {
                Ok(flags) => flags,
                Err(e) => match PollFailure::classify(e) {
                    PollFailure::Interrupted => continue,
                    PollFailure::Terminated => {
                        error!("[KERNEL] Context terminated, poll loop exits");
                        break;
                    }
                    PollFailure::Transient => {
                        warn!("[KERNEL] Poll error: {}", e);
                        thread::sleep(self.sleep_delay);
                        continue;
                    }
                },
            };

            if control_ready && !self.handle_control() {
                break;
            }

            let mut blocked = false;
            if response_ready {
                match self.responses.try_receive() {
                    Ok(Some(bytes)) => self.dispatcher.on_response(&bytes),
                    Ok(None) => {}
                    Err(BridgeError::ChannelNotConnected(channel)) => {
                        if !stalled {
                            warn!("[KERNEL] No handshake on {}, replies held back", channel);
                        }
                        blocked = true;
                    }
                    Err(e) => warn!("[KERNEL] Failed to read reply: {}", e),
                }
            }
            if market_ready {
                match self.market_data.try_receive() {
                    Ok(Some(bytes)) => self.dispatcher.on_market_data(&bytes),
                    Ok(None) => {}
                    Err(e) => warn!("[KERNEL] Failed to read market data: {}", e),
                }
            }

            // A readable but gated PULL socket makes poll return at once.
            if blocked && !market_ready {
                thread::sleep(self.sleep_delay);
            }
            stalled = blocked;
        }

        info!("=== Poll Loop Stopped ===");
    }

    /// Applies pending control messages; returns `false` on shutdown.
    fn handle_control(&mut self) -> bool {
        loop {
            match self.control.try_recv() {
                Ok(Some(ControlMessage::Shutdown)) => return false,
                Ok(Some(ControlMessage::Subscribe(topic))) => {
                    match self.market_data.transport().subscribe(&topic) {
                        Ok(()) => info!("[KERNEL] Subscribed to {} updates", topic),
                        Err(e) => error!("[KERNEL] Failed to subscribe to {}: {}", topic, e),
                    }
                }
                Ok(Some(ControlMessage::Unsubscribe(topic))) => {
                    match self.market_data.transport().unsubscribe(&topic) {
                        Ok(()) => info!("[KERNEL] Unsubscribed from {} updates", topic),
                        Err(e) => error!("[KERNEL] Failed to unsubscribe from {}: {}", topic, e),
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    error!("[KERNEL] Control channel error: {}", e);
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge::model::response::BarTime;
    use std::sync::Mutex;

    struct Fixture {
        slot: Arc<ResponseSlot>,
        market: Arc<MarketDataStore>,
        history: Arc<HistoryStore>,
    }

    fn dispatcher(handlers: HandlerRegistry) -> (Dispatcher, Fixture) {
        let fixture = Fixture {
            slot: Arc::new(ResponseSlot::new()),
            market: Arc::new(MarketDataStore::new()),
            history: Arc::new(HistoryStore::new()),
        };
        let dispatcher = Dispatcher::new(
            ';',
            false,
            fixture.slot.clone(),
            fixture.market.clone(),
            fixture.history.clone(),
            handlers,
        );
        (dispatcher, fixture)
    }

    #[test]
    fn test_tick_and_bar_ingestion() {
        let (mut dispatcher, fixture) = dispatcher(HandlerRegistry::new());
        dispatcher.on_market_data(b"EURUSD 1.1000;1.1002");
        dispatcher.on_market_data(b"EURUSD_M1 1;1.1;1.2;1.09;1.15;100;2;500");

        let tick = fixture.market.latest_tick("EURUSD").unwrap();
        assert_eq!((tick.bid, tick.ask), (1.1000, 1.1002));
        let bar = fixture.market.latest("EURUSD_M1").unwrap();
        assert_eq!(bar.as_bar().unwrap().close, 1.15);
    }

    #[test]
    fn test_rejected_payload_still_reaches_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = HandlerRegistry::new().with_market_data_handler(
            move |msg: &str| -> anyhow::Result<()> {
                sink.lock().unwrap().push(msg.to_string());
                Ok(())
            },
        );
        let (mut dispatcher, fixture) = dispatcher(handlers);

        dispatcher.on_market_data(b"EURUSD 1;2;3");
        dispatcher.on_market_data(b"no-topic-here");
        dispatcher.on_market_data(b"EURUSD 1.1;1.2");

        assert_eq!(fixture.market.len("EURUSD"), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["EURUSD 1;2;3", "EURUSD 1.1;1.2"]);
    }

    #[test]
    fn test_reply_overwrites_slot_before_handlers() {
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        let (mut dispatcher, fixture) = dispatcher(HandlerRegistry::new());
        let slot = fixture.slot.clone();
        dispatcher.handlers = HandlerRegistry::new().with_response_handler(
            move |response: &Response| -> anyhow::Result<()> {
                *sink.lock().unwrap() = Some((response.action().map(String::from), slot.get()));
                Ok(())
            },
        );

        dispatcher.on_response(b"{'_action': 'EXECUTION', '_ticket': 1}");
        dispatcher.on_response(b"{'_action': 'CLOSE', '_ticket': 1, '_response_value': 'SUCCESS'}");

        assert_eq!(fixture.slot.get().unwrap().action(), Some("CLOSE"));
        let (action, in_slot) = observed.lock().unwrap().clone().unwrap();
        assert_eq!(action.as_deref(), Some("CLOSE"));
        assert_eq!(in_slot.unwrap().action(), Some("CLOSE"));
    }

    #[test]
    fn test_malformed_reply_is_dropped() {
        let (mut dispatcher, fixture) = dispatcher(HandlerRegistry::new());
        dispatcher.on_response(b"{'_action': 'EXECUTION'");
        dispatcher.on_response(b"__import__('os')");
        dispatcher.on_response(&[0xff, 0xfe]);
        assert!(fixture.slot.is_empty());

        dispatcher.on_response(b"{'_action': 'EXECUTION', '_ticket': 7}");
        assert!(!fixture.slot.is_empty());
    }

    #[test]
    fn test_history_reply_replaces_series() {
        let (mut dispatcher, fixture) = dispatcher(HandlerRegistry::new());
        dispatcher.on_response(
            b"{'_action': 'HIST', '_symbol': 'EURUSD', '_data': [{'time': 1577923200, \
              'open': 1.1, 'high': 1.2, 'low': 1.0, 'close': 1.15, 'tick_volume': 10, \
              'spread': 1, 'real_volume': 0}]}",
        );
        let bars = fixture.history.series("EURUSD").unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, BarTime::Epoch(1_577_923_200));

        dispatcher.on_response(b"{'_action': 'HIST', '_symbol': 'GBPUSD'}");
        assert_eq!(fixture.history.series("GBPUSD"), None);
        assert!(fixture.slot.get().unwrap().is_history());
    }

    #[test]
    fn test_history_reply_with_odd_rows_keeps_good_bars() {
        let (mut dispatcher, fixture) = dispatcher(HandlerRegistry::new());
        dispatcher.on_response(
            b"{'_action': 'HIST', '_symbol': 'EURUSD', '_data': [\
              {'time': '2020.01.02 00:00', 'close': 1.1}, \
              {'time': '2020.01.03 00:00', 'open': 1.1, 'high': 1.2, 'low': 1.0, 'close': 1.15}]}",
        );

        let bars = fixture.history.series("EURUSD").unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, BarTime::Text("2020.01.03 00:00".into()));
        assert!(fixture.slot.get().unwrap().is_history());
    }
}
