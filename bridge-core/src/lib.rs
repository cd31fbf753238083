//! # Bridge Core
//!
//! A ZeroMQ connector that bridges a local process to a MetaTrader terminal
//! running the ZeroMQ server expert advisor.
//!
//! ## Modules
//! - `connector`: The `Connector` itself, its poll loop and handler registry.
//! - `comms`: Transports (PUSH/PULL/SUB), channel gates and the in-process control channel.
//! - `monitor`: Optional socket health monitor driving the channel gates.
//! - `store`: Response slot, market data cache and history cache.
//! - `execution`: Issue-and-wait helpers on top of the ID-less reply protocol.
//! - `config` / `args`: Endpoint configuration and its command-line surface.

pub mod args;
pub mod comms;
pub mod config;
pub mod connector;
pub mod error;
pub mod execution;
pub mod monitor;
pub mod store;

pub use config::EndpointConfig;
pub use connector::{ChannelStatus, Connector, HandlerRegistry};
pub use error::{BridgeError, Result};
pub use execution::{Executor, RetryPolicy};
