//! Defines the callback contracts for data arriving from the server.
//!
//! Handlers are invoked synchronously on the connector's poll thread, once per
//! message and in registration order. A handler that returns an error (or
//! panics) is logged and skipped; it never stops the remaining handlers or the
//! loop. Handlers should return quickly: while one runs, no other message is
//! dispatched.

use crate::model::response::Response;

/// Observer of parsed replies on the PULL channel.
///
/// # Examples
///
/// ```
/// use bridge::model::response::Response;
/// use bridge::traits::handler::ResponseHandler;
///
/// struct CountReplies(usize);
///
/// impl ResponseHandler for CountReplies {
///     fn on_response(&mut self, _response: &Response) -> anyhow::Result<()> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait ResponseHandler: Send {
    fn on_response(&mut self, response: &Response) -> anyhow::Result<()>;
}

/// Observer of raw frames on the SUB channel (`INSTRUMENT PAYLOAD`).
pub trait MarketDataHandler: Send {
    fn on_market_data(&mut self, message: &str) -> anyhow::Result<()>;
}

impl<F> ResponseHandler for F
where
    F: FnMut(&Response) -> anyhow::Result<()> + Send,
{
    fn on_response(&mut self, response: &Response) -> anyhow::Result<()> {
        self(response)
    }
}

impl<F> MarketDataHandler for F
where
    F: FnMut(&str) -> anyhow::Result<()> + Send,
{
    fn on_market_data(&mut self, message: &str) -> anyhow::Result<()> {
        self(message)
    }
}
