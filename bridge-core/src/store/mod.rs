//! Shared state written by the poll loop and read by callers.

pub mod history;
pub mod market;
pub mod slot;

pub use history::HistoryStore;
pub use market::MarketDataStore;
pub use slot::ResponseSlot;
