use bridge::HistoryBar;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Latest HIST result per symbol.
///
/// Each reply replaces the symbol's previous series wholesale.
#[derive(Default)]
pub struct HistoryStore {
    series: RwLock<HashMap<String, Vec<HistoryBar>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bars` for `symbol`, returning the series it replaced.
    pub fn replace(&self, symbol: &str, bars: Vec<HistoryBar>) -> Option<Vec<HistoryBar>> {
        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), bars)
    }

    pub fn series(&self, symbol: &str) -> Option<Vec<HistoryBar>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge::model::response::BarTime;

    fn bar(close: f64) -> HistoryBar {
        HistoryBar {
            time: BarTime::Epoch(1_577_923_200),
            open: 1.0,
            high: 1.2,
            low: 0.9,
            close,
            tick_volume: 10,
            spread: 1,
            real_volume: 0,
        }
    }

    #[test]
    fn test_replace_is_wholesale() {
        let store = HistoryStore::new();
        assert_eq!(store.replace("EURUSD", vec![bar(1.0), bar(1.1)]), None);
        let previous = store.replace("EURUSD", vec![bar(1.5)]).unwrap();
        assert_eq!(previous.len(), 2);

        let series = store.series("EURUSD").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 1.5);
        assert_eq!(store.symbols(), vec!["EURUSD"]);
        assert_eq!(store.series("GBPUSD"), None);
    }
}
