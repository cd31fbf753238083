use anyhow::Result;
use bridge::{Channel, ChannelState, Command, Response, TradeAction};
use bridge_core::{BridgeError, Connector, EndpointConfig, Executor, HandlerRegistry, RetryPolicy};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn config(base: u16) -> EndpointConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    EndpointConfig::default()
        .with_host("127.0.0.1")
        .with_ports(base, base + 1, base + 2)
        .with_poll_timeout_ms(50)
        .with_verbose(false)
}

fn bind(context: &zmq::Context, kind: zmq::SocketType, port: u16) -> zmq::Socket {
    let socket = context.socket(kind).unwrap();
    socket.bind(&format!("tcp://127.0.0.1:{}", port)).unwrap();
    socket
}

/// Polls `condition` until it holds or `limit` elapses.
async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A MetaTrader stand-in: reads one command and answers with `replies`.
fn spawn_responder(base: u16, replies: Vec<&'static str>) -> thread::JoinHandle<Option<String>> {
    thread::spawn(move || {
        let context = zmq::Context::new();
        let commands = bind(&context, zmq::PULL, base);
        let responses = bind(&context, zmq::PUSH, base + 1);
        commands.set_rcvtimeo(3000).ok()?;

        let command = commands.recv_string(0).ok()?.ok()?;
        for reply in replies {
            responses.send(reply, 0).ok()?;
        }
        thread::sleep(Duration::from_millis(200));
        Some(command)
    })
}

// The poll loop stores ticks and bars by topic and hands every framed message
// to the handlers, including ones the store rejects.
#[tokio::test]
async fn test_market_data_end_to_end() -> Result<()> {
    let context = zmq::Context::new();
    let publisher = bind(&context, zmq::PUB, 5812);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handlers = HandlerRegistry::new().with_market_data_handler(
        move |message: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(message.to_string());
            Ok(())
        },
    );
    let connector = Connector::connect(config(5810), handlers)?;
    connector.subscribe_market_data("EURUSD")?;

    // Slow joiner: give the subscription time to reach the publisher.
    tokio::time::sleep(Duration::from_millis(200)).await;

    publisher.send("EURUSD 1.10000;1.10020", 0)?;
    publisher.send("EURUSD 1;2;3", 0)?;
    publisher.send("EURUSD_M1 1577923200;1.1;1.2;1.09;1.15;100;2;0", 0)?;
    publisher.send("GBPUSD 1.3;1.31", 0)?;

    let store = connector.market_data();
    assert!(wait_until(Duration::from_secs(2), || store.len("EURUSD_M1") == 1).await);

    let tick = store.latest_tick("EURUSD").unwrap();
    assert_eq!((tick.bid, tick.ask), (1.1, 1.1002));
    assert_eq!(store.len("EURUSD"), 1);
    assert_eq!(store.latest("EURUSD_M1").unwrap().as_bar().unwrap().close, 1.15);
    // Not subscribed.
    assert_eq!(store.len("GBPUSD"), 0);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "EURUSD 1.10000;1.10020",
            "EURUSD 1;2;3",
            "EURUSD_M1 1577923200;1.1;1.2;1.09;1.15;100;2;0",
        ]
    );

    connector.unsubscribe_all_market_data()?;
    connector.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_malformed_replies_do_not_stop_the_loop() -> Result<()> {
    let context = zmq::Context::new();
    let server = bind(&context, zmq::PUSH, 5821);
    let connector = Connector::connect(config(5820), HandlerRegistry::new())?;

    server.send("{'_action': 'EXECUTION'", 0)?;
    server.send("__import__('os').system('ls')", 0)?;
    server.send("{'_action': 'EXECUTION', '_ticket': 7, '_open_price': 1.1}", 0)?;

    assert!(wait_until(Duration::from_secs(2), || connector.response().is_some()).await);
    match connector.take_response() {
        Some(Response::Execution(report)) => assert_eq!(report.ticket, Some(7)),
        other => panic!("unexpected reply {:?}", other),
    }
    assert!(connector.is_running());
    Ok(())
}

#[tokio::test]
async fn test_execute_returns_matching_reply() -> Result<()> {
    let server = spawn_responder(
        5830,
        vec!["{'_action': 'EXECUTION', '_magic': 123456, '_ticket': 85051741, '_open_price': 1.12421}"],
    );
    let connector = Arc::new(Connector::connect(config(5830), HandlerRegistry::new())?);

    let worker = connector.clone();
    let reply = tokio::task::spawn_blocking(move || {
        let instruction = worker.default_instruction(TradeAction::Open);
        Executor::new(&worker)
            .with_policy(RetryPolicy::new(Duration::from_millis(100), 30))
            .execute(instruction)
    })
    .await??;

    match reply {
        Some(Response::Execution(report)) => assert_eq!(report.ticket, Some(85051741)),
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(
        server.join().unwrap().as_deref(),
        Some("TRADE;OPEN;0;EURUSD;0.0;500.0;500.0;dwx-zeromq;0.01;123456;0")
    );
    Ok(())
}

#[tokio::test]
async fn test_close_waits_for_response_value() -> Result<()> {
    let server = spawn_responder(
        5840,
        vec!["{'_action': 'CLOSE', '_ticket': 42, '_response': 'CLOSE_MARKET', '_response_value': 'SUCCESS'}"],
    );
    let connector = Arc::new(Connector::connect(config(5840), HandlerRegistry::new())?);

    let worker = connector.clone();
    let reply = tokio::task::spawn_blocking(move || {
        let instruction = worker.default_instruction(TradeAction::Close).with_ticket(42);
        Executor::new(&worker)
            .with_policy(RetryPolicy::new(Duration::from_millis(100), 30))
            .execute(instruction)
    })
    .await??;

    let reply = reply.expect("close report");
    assert_eq!(reply.action(), Some("CLOSE"));
    assert!(server.join().unwrap().unwrap().starts_with("TRADE;CLOSE;"));
    Ok(())
}

#[tokio::test]
async fn test_open_trades_filtered_by_comment() -> Result<()> {
    let _server = spawn_responder(
        5850,
        vec![
            "{'_action': 'OPEN_TRADES', '_trades': {\
             1: {'_symbol': 'EURUSD', '_lots': 0.01, '_type': 0, '_open_price': 1.1, '_comment': 'alice'}, \
             2: {'_symbol': 'GBPUSD', '_lots': 0.02, '_type': 1, '_open_price': 1.3, '_comment': 'bob'}}}",
        ],
    );
    let connector = Arc::new(Connector::connect(config(5850), HandlerRegistry::new())?);

    let worker = connector.clone();
    let trades = tokio::task::spawn_blocking(move || {
        Executor::new(&worker)
            .with_policy(RetryPolicy::new(Duration::from_millis(100), 30))
            .open_trades("alice")
    })
    .await??;

    assert_eq!(trades.len(), 1);
    assert_eq!(trades["1"].symbol, "EURUSD");
    Ok(())
}

// The first reply settles the outcome: one without `_response_value` means no
// data for a close, even though the budget still has room.
#[tokio::test]
async fn test_execute_rejects_reply_without_marker() -> Result<()> {
    let server = spawn_responder(
        5900,
        vec!["{'_action': 'HIST', '_symbol': 'EURUSD'}"],
    );
    let connector = Arc::new(Connector::connect(config(5900), HandlerRegistry::new())?);

    let worker = connector.clone();
    let started = Instant::now();
    let reply = tokio::task::spawn_blocking(move || {
        let instruction = worker.default_instruction(TradeAction::Close).with_ticket(42);
        Executor::new(&worker)
            .with_policy(RetryPolicy::new(Duration::from_millis(100), 50))
            .execute(instruction)
    })
    .await??;

    assert!(reply.is_none());
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(connector.response().unwrap().is_history());
    assert!(server.join().unwrap().unwrap().starts_with("TRADE;CLOSE;"));
    Ok(())
}

// With nobody answering, the executor gives up after roughly its budget and
// reports "no data" rather than an error.
#[tokio::test]
async fn test_execute_times_out_without_reply() -> Result<()> {
    let context = zmq::Context::new();
    let _sink = bind(&context, zmq::PULL, 5860);
    let connector = Arc::new(Connector::connect(config(5860), HandlerRegistry::new())?);

    let worker = connector.clone();
    let started = Instant::now();
    let reply = tokio::task::spawn_blocking(move || {
        Executor::new(&worker)
            .with_policy(RetryPolicy::new(Duration::from_millis(20), 5))
            .issue(&Command::Heartbeat, bridge::ResponseMarker::Action)
    })
    .await??;

    let elapsed = started.elapsed();
    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1));
    Ok(())
}

#[tokio::test]
async fn test_history_reply_fills_history_store() -> Result<()> {
    let context = zmq::Context::new();
    let server = bind(&context, zmq::PUSH, 5871);
    let connector = Connector::connect(config(5870), HandlerRegistry::new())?;

    server.send(
        "{'_action': 'HIST', '_symbol': 'EURUSD', '_data': [\
         {'time': '2020.01.02 00:00', 'open': 1.1, 'high': 1.2, 'low': 1.0, 'close': 1.15, 'tick_volume': 10, 'spread': 1, 'real_volume': 0}, \
         {'time': '2020.01.03 00:00', 'open': 1.15, 'high': 1.25, 'low': 1.1, 'close': 1.2, 'tick_volume': 12, 'spread': 1, 'real_volume': 0}]}",
        0,
    )?;

    let history = connector.history();
    assert!(wait_until(Duration::from_secs(2), || history.series("EURUSD").is_some()).await);
    assert_eq!(history.series("EURUSD").unwrap().len(), 2);
    assert!(connector.response().unwrap().is_history());
    Ok(())
}

// With monitoring on and no server, PUSH never completes a handshake, so
// sends are refused before reaching the socket.
#[tokio::test]
async fn test_monitored_channel_refuses_without_handshake() -> Result<()> {
    let connector = Connector::connect(config(5880).with_monitor(true), HandlerRegistry::new())?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_ne!(connector.channel_state(Channel::CommandOut), ChannelState::Connected);
    assert!(matches!(
        connector.heartbeat(),
        Err(BridgeError::ChannelNotConnected(Channel::CommandOut))
    ));
    assert_eq!(connector.channel_state(Channel::MarketDataIn), ChannelState::Connected);

    connector.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_monitored_channel_opens_after_handshake() -> Result<()> {
    let context = zmq::Context::new();
    let server = bind(&context, zmq::PULL, 5890);
    let _responses = bind(&context, zmq::PUSH, 5891);
    let connector = Connector::connect(config(5890).with_monitor(true), HandlerRegistry::new())?;

    assert!(
        wait_until(Duration::from_secs(3), || {
            connector.channel_state(Channel::CommandOut) == ChannelState::Connected
        })
        .await
    );
    let status = connector.channel_status(Channel::CommandOut);
    assert_eq!(status.latest_event.as_deref(), Some("EVENT_HANDSHAKE_SUCCEEDED"));

    assert!(connector.heartbeat()?.is_sent());
    server.set_rcvtimeo(2000)?;
    assert_eq!(server.recv_string(0)?.unwrap(), "HEARTBEAT;");

    connector.shutdown();
    Ok(())
}
