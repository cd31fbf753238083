use bridge::{Channel, LiteralError, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("ZMQ Error: {0}")]
    Zmq(#[from] zmq::Error),

    /// The health monitor has not seen a handshake on this channel.
    #[error("No handshake on {0}: channel not connected")]
    ChannelNotConnected(Channel),

    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("Malformed response: {0}")]
    Literal(#[from] LiteralError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connector is shut down")]
    ShutDown,
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
