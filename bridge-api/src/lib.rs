//! # Bridge API
//!
//! Models and wire formats shared by everything that talks to the MetaTrader
//! ZeroMQ server.
//!
//! ## Modules
//! - `model`: Commands, market data records, typed responses and channel states.
//! - `traits`: Callback contracts invoked by the connector's poll loop.
//! - `error`: Wire-format errors.

pub mod error;
pub mod model;
pub mod traits;

pub use error::WireError;
pub use model::channel::{Channel, ChannelState};
pub use model::command::{
    Command, HistoryRequest, OrderType, RateSubscription, Timeframe, TradeAction,
    TradeInstruction, DEFAULT_DELIMITER,
};
pub use model::literal::{parse_literal, LiteralError};
pub use model::market_data::{Bar, MarketRecord, Tick};
pub use model::response::{
    ExecutionReport, HistoryBar, HistoryReport, OpenTrade, OpenTradesReport, Response,
    ResponseMarker,
};
pub use traits::handler::{MarketDataHandler, ResponseHandler};

pub mod prelude {
    pub use crate::model::command::{Command, Timeframe, TradeAction, TradeInstruction};
    pub use crate::model::market_data::MarketRecord;
    pub use crate::model::response::Response;
    pub use crate::traits::handler::{MarketDataHandler, ResponseHandler};
}
