//! Endpoint addresses for the three ZeroMQ channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport scheme of a ZeroMQ endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Tcp,
    Ipc,
    Inproc,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Ipc => "ipc",
            Scheme::Inproc => "inproc",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Scheme::Tcp),
            "ipc" => Ok(Scheme::Ipc),
            "inproc" => Ok(Scheme::Inproc),
            other => Err(format!("Unknown transport scheme: {}", other)),
        }
    }
}

/// A `scheme://host:port` endpoint the connector connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Creates a new TCP address.
    ///
    /// # Arguments
    ///
    /// * `host` - Host name or IP (e.g., "localhost").
    /// * `port` - The TCP port.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(Scheme::Tcp, host, port)
    }

    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: host.to_string(),
            port,
        }
    }

    /// The string handed to `zmq::Socket::connect`.
    pub fn endpoint(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| format!("Unknown address format: {}", s))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("Missing port in address: {}", s))?;
        if host.is_empty() {
            return Err(format!("Missing host in address: {}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid port in address: {}", s))?;
        Ok(Address::new(scheme.parse()?, host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_connect_string() {
        assert_eq!(Address::tcp("localhost", 32768).endpoint(), "tcp://localhost:32768");
        assert_eq!(
            Address::new(Scheme::Ipc, "bridge", 1).to_string(),
            "ipc://bridge:1"
        );
    }

    #[test]
    fn test_parse_address() {
        let addr: Address = "tcp://127.0.0.1:32770".parse().unwrap();
        assert_eq!(addr, Address::tcp("127.0.0.1", 32770));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("localhost:1".parse::<Address>().is_err());
        assert!("tcp://localhost".parse::<Address>().is_err());
        assert!("tcp://:80".parse::<Address>().is_err());
        assert!("udp://host:80".parse::<Address>().is_err());
        assert!("tcp://host:99999".parse::<Address>().is_err());
    }
}
