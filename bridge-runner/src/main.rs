use anyhow::Context;
use bridge::{RateSubscription, Response, Timeframe};
use bridge_core::args::BridgeArgs;
use bridge_core::{Connector, HandlerRegistry};
use clap::Parser;
use log::{error, info, warn};
use std::time::Duration;

/// Connects to a MetaTrader terminal, subscribes to prices and rates, and logs
/// everything that comes back until interrupted.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct RunnerArgs {
    #[command(flatten)]
    bridge: BridgeArgs,

    /// Symbols to stream bid/ask for (e.g. EURUSD,GDAXI)
    #[arg(long, value_delimiter = ',')]
    prices: Vec<String>,

    /// Bars to stream, as SYMBOL:TIMEFRAME (e.g. EURUSD:M1,GBPUSD:60)
    #[arg(long, value_delimiter = ',', value_parser = parse_rate)]
    rates: Vec<RateSubscription>,

    /// Seconds between heartbeats; 0 disables them
    #[arg(long, default_value_t = 0)]
    heartbeat_secs: u64,
}

fn parse_rate(s: &str) -> Result<RateSubscription, String> {
    let (symbol, timeframe) = s
        .split_once(':')
        .ok_or_else(|| format!("expected SYMBOL:TIMEFRAME, got '{}'", s))?;
    let timeframe: Timeframe = timeframe.parse().map_err(|e| format!("{}", e))?;
    Ok(RateSubscription::new(symbol, timeframe))
}

fn log_response(response: &Response) -> anyhow::Result<()> {
    match response {
        Response::Execution(report) => info!(
            "[REPLY] {} ticket={:?} price={:?} response={:?}",
            report.action, report.ticket, report.open_price, report.response_value
        ),
        Response::OpenTrades(report) => info!("[REPLY] {} open trades", report.trades.len()),
        Response::History(report) => info!(
            "[REPLY] history for {}: {} bars",
            report.symbol,
            report.data.as_ref().map_or(0, Vec::len)
        ),
        Response::Unknown(fields) => info!("[REPLY] {:?}", fields),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("=== Bridge Runner Starting ===");

    let args = RunnerArgs::parse();
    let config = args.bridge.to_config().context("Failed to build configuration")?;

    let handlers = HandlerRegistry::new()
        .with_response_handler(log_response)
        .with_market_data_handler(|message: &str| -> anyhow::Result<()> {
            info!("[DATA] {}", message);
            Ok(())
        });
    let connector = Connector::connect(config, handlers).context("Failed to start connector")?;

    for symbol in &args.prices {
        connector.subscribe_market_data(symbol)?;
    }
    for rate in &args.rates {
        connector.subscribe_market_data(&rate.topic())?;
    }
    if !args.prices.is_empty() {
        if let Err(e) = connector.send_track_prices_request(args.prices.clone()) {
            warn!("TRACK_PRICES not sent: {}", e);
        }
    }
    if !args.rates.is_empty() {
        if let Err(e) = connector.send_track_rates_request(args.rates.clone()) {
            warn!("TRACK_RATES not sent: {}", e);
        }
    }

    let mut heartbeat = (args.heartbeat_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.heartbeat_secs)));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = async {
                match heartbeat.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Err(e) = connector.heartbeat() {
                    warn!("Heartbeat not sent: {}", e);
                }
            }
        }
    }

    info!("Shutting down...");
    for instrument in connector.market_data().instruments() {
        info!(
            "{}: {} records cached",
            instrument,
            connector.market_data().len(&instrument)
        );
    }
    tokio::task::spawn_blocking(move || connector.shutdown()).await?;
    info!("=== Bridge Runner Stopped ===");
    Ok(())
}
