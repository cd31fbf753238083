pub mod address;
pub(crate) mod channel;
pub(crate) mod control;
pub mod transport;
pub(crate) mod transports;

pub use address::{Address, Scheme};
pub use transport::{InboundTransport, OutboundTransport, SendStatus};
