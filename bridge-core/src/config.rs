//! Connector configuration.
//!
//! `EndpointConfig` is fixed once the connector is built; the connector keeps its
//! own copy and exposes it read-only.

use crate::comms::address::{Address, Scheme};
use crate::error::{BridgeError, Result};
use anyhow::Context;
use bridge::{Channel, DEFAULT_DELIMITER};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CLIENT_ID: &str = "dwx-zeromq";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PUSH_PORT: u16 = 32768;
pub const DEFAULT_PULL_PORT: u16 = 32769;
pub const DEFAULT_SUB_PORT: u16 = 32770;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SLEEP_DELAY_MS: u64 = 1;

/// Where and how the connector reaches the MetaTrader server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    client_id: String,
    host: String,
    scheme: Scheme,
    push_port: u16,
    pull_port: u16,
    sub_port: u16,
    delimiter: char,
    poll_timeout_ms: u64,
    sleep_delay_ms: u64,
    verbose: bool,
    monitor: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            host: DEFAULT_HOST.to_string(),
            scheme: Scheme::Tcp,
            push_port: DEFAULT_PUSH_PORT,
            pull_port: DEFAULT_PULL_PORT,
            sub_port: DEFAULT_SUB_PORT,
            delimiter: DEFAULT_DELIMITER,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            sleep_delay_ms: DEFAULT_SLEEP_DELAY_MS,
            verbose: true,
            monitor: false,
        }
    }
}

impl EndpointConfig {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Sets the PUSH, PULL and SUB ports in that order.
    pub fn with_ports(mut self, push: u16, pull: u16, sub: u16) -> Self {
        self.push_port = push;
        self.pull_port = pull;
        self.sub_port = sub;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_poll_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    pub fn with_sleep_delay_ms(mut self, delay_ms: u64) -> Self {
        self.sleep_delay_ms = delay_ms;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    /// Returns the client identifier, also used as the default trade comment.
    pub fn get_client_id(&self) -> &str {
        &self.client_id
    }

    pub fn get_host(&self) -> &str {
        &self.host
    }

    pub fn get_scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn get_delimiter(&self) -> char {
        self.delimiter
    }

    /// Poll wait of the background loop; bounds how long shutdown can take.
    pub fn get_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn get_sleep_delay(&self) -> Duration {
        Duration::from_millis(self.sleep_delay_ms)
    }

    /// Whether per-message logs are raised from `debug` to `info`.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Whether socket health monitors gate the PUSH and PULL channels.
    pub fn is_monitored(&self) -> bool {
        self.monitor
    }

    pub fn get_port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::CommandOut => self.push_port,
            Channel::ResponseIn => self.pull_port,
            Channel::MarketDataIn => self.sub_port,
        }
    }

    /// The address `channel` connects to.
    pub fn address(&self, channel: Channel) -> Address {
        Address::new(self.scheme, &self.host, self.get_port(channel))
    }

    /// Rejects settings the wire protocol cannot work with.
    ///
    /// The SUB topic is separated from its payload by a space, so the field
    /// delimiter must not be whitespace. A zero poll timeout would turn the
    /// background loop into a busy spin.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.is_whitespace() {
            return Err(BridgeError::Config(format!(
                "delimiter {:?} collides with the topic separator",
                self.delimiter
            )));
        }
        if self.host.is_empty() {
            return Err(BridgeError::Config("host must not be empty".to_string()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "poll timeout must be at least 1 ms".to_string(),
            ));
        }
        let ports = [self.push_port, self.pull_port, self.sub_port];
        if ports.contains(&0) {
            return Err(BridgeError::Config("ports must be non-zero".to_string()));
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            return Err(BridgeError::Config(format!(
                "ports must be distinct, got {:?}",
                ports
            )));
        }
        Ok(())
    }
}

/// Loads an `EndpointConfig` from a JSON file.
///
/// Missing keys keep their defaults.
///
/// # Returns
///
/// * `Ok(EndpointConfig)` on success.
/// * `Err` if the file cannot be read or is not valid JSON.
pub fn load_config(path: &Path) -> anyhow::Result<EndpointConfig> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open config file {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let config = serde_json::from_reader(reader).context("Failed to deserialize config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.get_client_id(), "dwx-zeromq");
        assert_eq!(
            config.address(Channel::CommandOut).to_string(),
            "tcp://localhost:32768"
        );
        assert_eq!(
            config.address(Channel::ResponseIn).to_string(),
            "tcp://localhost:32769"
        );
        assert_eq!(
            config.address(Channel::MarketDataIn).to_string(),
            "tcp://localhost:32770"
        );
        assert_eq!(config.get_delimiter(), ';');
        assert_eq!(config.get_poll_timeout(), Duration::from_millis(1000));
        assert_eq!(config.get_sleep_delay(), Duration::from_millis(1));
        assert!(config.is_verbose());
        assert!(!config.is_monitored());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_whitespace_delimiter() {
        let config = EndpointConfig::default().with_delimiter(' ');
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_shared_ports() {
        let config = EndpointConfig::default().with_ports(5000, 5000, 5001);
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_poll_timeout() {
        let config = EndpointConfig::default().with_poll_timeout_ms(0);
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
        assert!(EndpointConfig::default().with_poll_timeout_ms(1).validate().is_ok());
    }

    #[test]
    fn test_load_partial_config() {
        let path = std::env::temp_dir().join(format!("bridge-config-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"host": "10.0.0.5", "pull_port": 40000, "monitor": true}}"#).unwrap();
        drop(file);

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.get_host(), "10.0.0.5");
        assert_eq!(config.get_port(Channel::ResponseIn), 40000);
        assert_eq!(config.get_port(Channel::CommandOut), DEFAULT_PUSH_PORT);
        assert!(config.is_monitored());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/bridge.json")).is_err());
    }
}
