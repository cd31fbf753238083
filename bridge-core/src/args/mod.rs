//! Command-line surface of the connector.
//!
//! Every flag is optional: the configuration starts from the defaults (or from
//! `--config` when given) and each flag that is present overrides one field.

use crate::comms::address::Scheme;
use crate::config::{load_config, EndpointConfig};
use bridge::Channel;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Connection parameters parsed from the command line.
#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct BridgeArgs {
    /// JSON file with an endpoint configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Client identifier, also the default trade comment
    #[arg(long)]
    client_id: Option<String>,

    /// Host running the MetaTrader server
    #[arg(long)]
    host: Option<String>,

    /// Transport scheme (tcp, ipc, inproc)
    #[arg(long)]
    scheme: Option<Scheme>,

    /// Port of the command channel (PUSH)
    #[arg(long)]
    push_port: Option<u16>,

    /// Port of the response channel (PULL)
    #[arg(long)]
    pull_port: Option<u16>,

    /// Port of the market data channel (SUB)
    #[arg(long)]
    sub_port: Option<u16>,

    /// Field delimiter of the wire protocol
    #[arg(long)]
    delimiter: Option<char>,

    /// Poll wait of the background loop, in milliseconds
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Back-off when a ready channel cannot be drained, in milliseconds
    #[arg(long)]
    sleep_delay_ms: Option<u64>,

    /// Log per-message traffic at debug level only
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Gate the PUSH/PULL channels on socket health events
    #[arg(long, default_value_t = false)]
    monitor: bool,
}

impl BridgeArgs {
    /// Parses command-line arguments into a `BridgeArgs` struct.
    ///
    /// This function automatically handles `--help` and `--version` flags via `clap`.
    pub fn parse_args(args: Vec<String>) -> Self {
        BridgeArgs::parse_from(args)
    }

    pub fn get_config_path(&self) -> Option<PathBuf> {
        self.config.clone()
    }

    /// Builds the endpoint configuration these arguments describe.
    ///
    /// # Returns
    ///
    /// * `Ok(EndpointConfig)` with every given flag applied.
    /// * `Err` if `--config` points to an unreadable or invalid file.
    pub fn to_config(&self) -> anyhow::Result<EndpointConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => EndpointConfig::default(),
        };

        if let Some(client_id) = &self.client_id {
            config = config.with_client_id(client_id.clone());
        }
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(scheme) = self.scheme {
            config = config.with_scheme(scheme);
        }
        let push = self.push_port.unwrap_or(config.get_port(Channel::CommandOut));
        let pull = self.pull_port.unwrap_or(config.get_port(Channel::ResponseIn));
        let sub = self.sub_port.unwrap_or(config.get_port(Channel::MarketDataIn));
        config = config.with_ports(push, pull, sub);
        if let Some(delimiter) = self.delimiter {
            config = config.with_delimiter(delimiter);
        }
        if let Some(timeout) = self.poll_timeout_ms {
            config = config.with_poll_timeout_ms(timeout);
        }
        if let Some(delay) = self.sleep_delay_ms {
            config = config.with_sleep_delay_ms(delay);
        }
        if self.quiet {
            config = config.with_verbose(false);
        }
        if self.monitor {
            config = config.with_monitor(true);
        }
        Ok(config)
    }
}
