//! Market Data models.
//!
//! The server publishes one text frame per update on the SUB channel:
//! `INSTRUMENT BID;ASK` for ticks and
//! `INSTRUMENT TIME;OPEN;HIGH;LOW;CLOSE;TICKVOL;SPREAD;REALVOL` for bars.

use crate::error::WireError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A bid/ask quote for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// The instrument (SUB topic) the quote belongs to.
    pub instrument: String,
    /// Local arrival time; the server does not timestamp ticks.
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// An OHLC bar for an instrument/timeframe topic such as `EURUSD_M1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    /// Local arrival time.
    pub timestamp: DateTime<Utc>,
    /// Bar open time as sent by the server (epoch seconds, broker time).
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: i64,
    pub spread: i64,
    pub real_volume: i64,
}

/// A single record stored for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketRecord {
    Tick(Tick),
    Bar(Bar),
}

impl MarketRecord {
    pub fn instrument(&self) -> &str {
        match self {
            MarketRecord::Tick(t) => &t.instrument,
            MarketRecord::Bar(b) => &b.instrument,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketRecord::Tick(t) => t.timestamp,
            MarketRecord::Bar(b) => b.timestamp,
        }
    }

    pub fn as_tick(&self) -> Option<&Tick> {
        match self {
            MarketRecord::Tick(t) => Some(t),
            MarketRecord::Bar(_) => None,
        }
    }

    pub fn as_bar(&self) -> Option<&Bar> {
        match self {
            MarketRecord::Bar(b) => Some(b),
            MarketRecord::Tick(_) => None,
        }
    }

    /// Parses a SUB frame into a record stamped with `timestamp`.
    ///
    /// # Arguments
    ///
    /// * `message` - The raw frame, `INSTRUMENT PAYLOAD`.
    /// * `delimiter` - Field separator inside the payload.
    /// * `timestamp` - Arrival time to stamp on the record.
    ///
    /// # Returns
    ///
    /// * `Ok(MarketRecord)` for a 2-field (tick) or 8-field (bar) payload.
    /// * `Err(WireError)` for any other shape or an unparseable number.
    pub fn parse(
        message: &str,
        delimiter: char,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, WireError> {
        let (instrument, payload) = message
            .split_once(' ')
            .ok_or_else(|| WireError::MissingTopic(message.to_string()))?;
        let fields: Vec<&str> = payload.split(delimiter).collect();

        match fields.len() {
            2 => Ok(MarketRecord::Tick(Tick {
                instrument: instrument.to_string(),
                timestamp,
                bid: number("bid", fields[0])?,
                ask: number("ask", fields[1])?,
            })),
            8 => Ok(MarketRecord::Bar(Bar {
                instrument: instrument.to_string(),
                timestamp,
                time: number("time", fields[0])?,
                open: number("open", fields[1])?,
                high: number("high", fields[2])?,
                low: number("low", fields[3])?,
                close: number("close", fields[4])?,
                tick_volume: number("tick_volume", fields[5])?,
                spread: number("spread", fields[6])?,
                real_volume: number("real_volume", fields[7])?,
            })),
            actual => Err(WireError::PayloadShape { actual }),
        }
    }
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, WireError> {
    value.trim().parse().map_err(|_| WireError::InvalidField {
        field,
        value: value.to_string(),
    })
}
