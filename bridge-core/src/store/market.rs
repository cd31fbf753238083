use bridge::{Bar, MarketRecord, Tick};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-instrument cache of ticks and bars, in arrival order.
///
/// Instruments appear on their first record and are never removed.
#[derive(Default)]
pub struct MarketDataStore {
    series: RwLock<HashMap<String, Vec<MarketRecord>>>,
}

impl MarketDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<MarketRecord>>> {
        self.series.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<MarketRecord>>> {
        self.series.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: MarketRecord) {
        self.write()
            .entry(record.instrument().to_string())
            .or_default()
            .push(record);
    }

    pub fn upsert_tick(&self, tick: Tick) {
        self.insert(MarketRecord::Tick(tick));
    }

    pub fn upsert_bar(&self, bar: Bar) {
        self.insert(MarketRecord::Bar(bar));
    }

    /// All records of `instrument`, oldest first.
    pub fn series(&self, instrument: &str) -> Vec<MarketRecord> {
        self.read().get(instrument).cloned().unwrap_or_default()
    }

    pub fn latest(&self, instrument: &str) -> Option<MarketRecord> {
        self.read().get(instrument).and_then(|s| s.last().cloned())
    }

    /// Most recent tick of `instrument`, skipping bars.
    pub fn latest_tick(&self, instrument: &str) -> Option<Tick> {
        self.read()
            .get(instrument)
            .and_then(|s| s.iter().rev().find_map(|r| r.as_tick().cloned()))
    }

    /// Known instruments, sorted.
    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.read().get(instrument).map_or(0, Vec::len)
    }

    pub fn total_records(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// A copy of every series, keyed by instrument.
    pub fn snapshot(&self) -> HashMap<String, Vec<MarketRecord>> {
        self.read().clone()
    }
}
