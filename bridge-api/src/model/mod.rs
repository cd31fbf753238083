//! Data models exchanged with the MetaTrader server.
//!
//! # Submodules
//! - [`command`]: Outbound instructions and their `;`-delimited wire form.
//! - [`market_data`]: Ticks and bars published on the SUB channel.
//! - [`response`]: Typed replies received on the PULL channel.
//! - [`literal`]: Restricted parser for the server's dict-literal replies.
//! - [`channel`]: Logical channels and their connection state.

pub mod channel;
pub mod command;
pub mod literal;
pub mod market_data;
pub mod response;

pub use channel::{Channel, ChannelState};
pub use command::Command;
pub use market_data::MarketRecord;
pub use response::Response;
