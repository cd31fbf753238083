use bridge::{MarketDataHandler, Response, ResponseHandler};
use log::{error, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Callbacks the poll loop invokes, in registration order.
///
/// A handler that fails or panics is logged and skipped; the remaining
/// handlers still run and the poll loop keeps going.
#[derive(Default)]
pub struct HandlerRegistry {
    response: Vec<Box<dyn ResponseHandler>>,
    market_data: Vec<Box<dyn MarketDataHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_handler(mut self, handler: impl ResponseHandler + 'static) -> Self {
        self.response.push(Box::new(handler));
        self
    }

    pub fn with_market_data_handler(mut self, handler: impl MarketDataHandler + 'static) -> Self {
        self.market_data.push(Box::new(handler));
        self
    }

    pub fn add_response_handler(&mut self, handler: Box<dyn ResponseHandler>) {
        self.response.push(handler);
    }

    pub fn add_market_data_handler(&mut self, handler: Box<dyn MarketDataHandler>) {
        self.market_data.push(handler);
    }

    pub fn response_handler_count(&self) -> usize {
        self.response.len()
    }

    pub fn market_data_handler_count(&self) -> usize {
        self.market_data.len()
    }

    /// Runs every response handler on `response`; returns how many failed.
    pub fn dispatch_response(&mut self, response: &Response) -> usize {
        let mut failures = 0;
        for (index, handler) in self.response.iter_mut().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_response(response)));
            if !report("response", index, outcome) {
                failures += 1;
            }
        }
        failures
    }

    /// Runs every market data handler on the raw frame; returns how many failed.
    pub fn dispatch_market_data(&mut self, message: &str) -> usize {
        let mut failures = 0;
        for (index, handler) in self.market_data.iter_mut().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_market_data(message)));
            if !report("market data", index, outcome) {
                failures += 1;
            }
        }
        failures
    }
}

fn report(kind: &str, index: usize, outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>) -> bool {
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("[HANDLER] {} handler #{} failed: {:#}", kind, index, e);
            false
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("[HANDLER] {} handler #{} panicked: {}", kind, index, reason);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_failing_handlers_do_not_stop_the_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut registry = HandlerRegistry::new()
            .with_market_data_handler(|_: &str| -> anyhow::Result<()> {
                anyhow::bail!("bad handler")
            })
            .with_market_data_handler(|_: &str| -> anyhow::Result<()> { panic!("worse handler") })
            .with_market_data_handler(move |msg: &str| -> anyhow::Result<()> {
                sink.lock().unwrap().push(msg.to_string());
                Ok(())
            });

        assert_eq!(registry.dispatch_market_data("EURUSD 1.1;1.2"), 2);
        assert_eq!(registry.dispatch_market_data("EURUSD 1.3;1.4"), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["EURUSD 1.1;1.2".to_string(), "EURUSD 1.3;1.4".to_string()]
        );
    }

    #[test]
    fn test_response_handlers_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());

        let mut registry = HandlerRegistry::new()
            .with_response_handler(move |_: &Response| -> anyhow::Result<()> {
                first.lock().unwrap().push(1);
                Ok(())
            })
            .with_response_handler(move |_: &Response| -> anyhow::Result<()> {
                second.lock().unwrap().push(2);
                Ok(())
            });

        assert_eq!(registry.dispatch_response(&Response::Unknown(Map::new())), 0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(registry.response_handler_count(), 2);
        assert_eq!(registry.market_data_handler_count(), 0);
    }
}
