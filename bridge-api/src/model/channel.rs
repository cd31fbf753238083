use serde::{Deserialize, Serialize};
use std::fmt;

/// The three logical channels between the bridge and the MetaTrader server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Commands to the server (ZeroMQ PUSH).
    CommandOut,
    /// Replies from the server (ZeroMQ PULL).
    ResponseIn,
    /// Published prices and rates (ZeroMQ SUB).
    MarketDataIn,
}

impl Channel {
    /// Short socket name used in log lines.
    pub fn socket_name(&self) -> &'static str {
        match self {
            Channel::CommandOut => "PUSH",
            Channel::ResponseIn => "PULL",
            Channel::MarketDataIn => "SUB",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::CommandOut => "Command-Out",
            Channel::ResponseIn => "Response-In",
            Channel::MarketDataIn => "MarketData-In",
        };
        write!(f, "{} ({})", name, self.socket_name())
    }
}

/// Connection state of a monitored channel.
///
/// Only `Connected` lets traffic through; the other states refuse sends and receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelState {
    Disconnected = 0,
    Handshaking = 1,
    Connected = 2,
}

impl ChannelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected)
    }

    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Decodes a value produced by [`ChannelState::to_raw`]. Unknown values map to `Disconnected`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Handshaking,
            2 => ChannelState::Connected,
            _ => ChannelState::Disconnected,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "DISCONNECTED"),
            ChannelState::Handshaking => write!(f, "HANDSHAKING"),
            ChannelState::Connected => write!(f, "CONNECTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_raw_round_trip() {
        for state in [
            ChannelState::Disconnected,
            ChannelState::Handshaking,
            ChannelState::Connected,
        ] {
            assert_eq!(ChannelState::from_raw(state.to_raw()), state);
        }
        assert_eq!(ChannelState::from_raw(42), ChannelState::Disconnected);
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::CommandOut.to_string(), "Command-Out (PUSH)");
        assert_eq!(Channel::MarketDataIn.socket_name(), "SUB");
    }
}
