//! Typed replies from the MetaTrader server.
//!
//! Replies are dynamically shaped mappings keyed by `_`-prefixed field names.
//! The `_action` field decides the variant; unrecognized actions, and replies
//! whose fields do not fit their variant, are kept whole as `Unknown`. HIST
//! replies are the exception: rows that do not fit a bar are counted and
//! skipped rather than sinking the whole reply.

use crate::model::literal::{parse_mapping, LiteralError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Execution echo or close report for a TRADE command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "_action")]
    pub action: String,
    #[serde(rename = "_ticket", default)]
    pub ticket: Option<u64>,
    #[serde(rename = "_magic", default)]
    pub magic: Option<u64>,
    #[serde(rename = "_open_price", default)]
    pub open_price: Option<f64>,
    #[serde(rename = "_open_time", default)]
    pub open_time: Option<String>,
    #[serde(rename = "_close_price", default)]
    pub close_price: Option<f64>,
    #[serde(rename = "_close_lots", default)]
    pub close_lots: Option<f64>,
    #[serde(rename = "_sl", default)]
    pub stop_loss: Option<f64>,
    #[serde(rename = "_tp", default)]
    pub take_profit: Option<f64>,
    /// Server status code or label, e.g. `CLOSE_MARKET` or `130`.
    #[serde(rename = "_response", default)]
    pub response: Option<Value>,
    /// Outcome of close-type actions, e.g. `SUCCESS`.
    #[serde(rename = "_response_value", default)]
    pub response_value: Option<Value>,
    /// Fields not modelled above (per-ticket results of CLOSE_ALL, for instance).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of an OPEN_TRADES reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    #[serde(rename = "_magic", default)]
    pub magic: Option<u64>,
    #[serde(rename = "_symbol", default)]
    pub symbol: String,
    #[serde(rename = "_lots", default)]
    pub lots: f64,
    #[serde(rename = "_type", default)]
    pub order_type: Option<u8>,
    #[serde(rename = "_open_price", default)]
    pub open_price: f64,
    #[serde(rename = "_open_time", default)]
    pub open_time: Option<String>,
    #[serde(rename = "_SL", alias = "_sl", default)]
    pub stop_loss: f64,
    #[serde(rename = "_TP", alias = "_tp", default)]
    pub take_profit: f64,
    #[serde(rename = "_pnl", default)]
    pub pnl: f64,
    #[serde(rename = "_comment", default)]
    pub comment: String,
}

/// Reply to GET_OPEN_TRADES, keyed by ticket.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpenTradesReport {
    #[serde(rename = "_trades", default)]
    pub trades: BTreeMap<String, OpenTrade>,
}

impl OpenTradesReport {
    pub fn trade(&self, ticket: u64) -> Option<&OpenTrade> {
        self.trades.get(&ticket.to_string())
    }

    /// Trades whose comment matches `comment` (the comment doubles as trader name).
    pub fn by_comment<'a>(&'a self, comment: &'a str) -> impl Iterator<Item = (&'a String, &'a OpenTrade)> {
        self.trades.iter().filter(move |(_, t)| t.comment == comment)
    }
}

/// Bar open time: the server sends either a formatted string or epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BarTime {
    Epoch(i64),
    Text(String),
}

/// One bar of a HIST reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    pub time: BarTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub tick_volume: i64,
    #[serde(default)]
    pub spread: i64,
    #[serde(default)]
    pub real_volume: i64,
}

/// Reply to a HIST request.
///
/// `data` is absent when the terminal had nothing loaded for the symbol;
/// MetaTrader often needs a second request for symbols without an open chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    #[serde(rename = "_symbol")]
    pub symbol: String,
    #[serde(rename = "_data", default)]
    pub data: Option<Vec<HistoryBar>>,
    /// Rows of `_data` that did not decode as a bar and were left out.
    #[serde(default)]
    pub rejected_rows: usize,
}

impl HistoryReport {
    /// Builds a report from HIST fields, keeping every row that decodes.
    ///
    /// Returns `None` without a `_symbol`, since the bars could not be filed.
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let symbol = fields.get("_symbol")?.as_str()?.to_string();
        let (data, rejected_rows) = match fields.get("_data") {
            None | Some(Value::Null) => (None, 0),
            Some(Value::Array(rows)) => {
                let bars: Vec<HistoryBar> = rows
                    .iter()
                    .filter_map(|row| serde_json::from_value(row.clone()).ok())
                    .collect();
                let rejected = rows.len() - bars.len();
                (Some(bars), rejected)
            }
            Some(_) => (Some(Vec::new()), 1),
        };
        Some(Self {
            symbol,
            data,
            rejected_rows,
        })
    }
}

/// Field a correlation check looks for to accept a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMarker {
    /// `_action`: any echo of an open-type command.
    Action,
    /// `_response_value`: outcome of a close-type command.
    ResponseValue,
}

impl ResponseMarker {
    pub fn field_name(&self) -> &'static str {
        match self {
            ResponseMarker::Action => "_action",
            ResponseMarker::ResponseValue => "_response_value",
        }
    }
}

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Execution(ExecutionReport),
    OpenTrades(OpenTradesReport),
    History(HistoryReport),
    Unknown(Map<String, Value>),
}

impl Response {
    /// Parses the raw text of a reply with the restricted literal parser.
    pub fn parse(text: &str) -> Result<Self, LiteralError> {
        parse_mapping(text).map(Self::from_fields)
    }

    /// Classifies a field mapping by its `_action`.
    ///
    /// A mapping that does not deserialize into its variant falls back to `Unknown`.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let action = fields.get("_action").and_then(Value::as_str).unwrap_or("");
        let typed = match action {
            "EXECUTION" | "MODIFY" | "CLOSE" | "CLOSE_PARTIAL" | "CLOSE_MAGIC" | "CLOSE_ALL" => {
                serde_json::from_value(Value::Object(fields.clone()))
                    .ok()
                    .map(Response::Execution)
            }
            "OPEN_TRADES" => serde_json::from_value(Value::Object(fields.clone()))
                .ok()
                .map(Response::OpenTrades),
            "HIST" => HistoryReport::from_fields(&fields).map(Response::History),
            _ => None,
        };
        typed.unwrap_or(Response::Unknown(fields))
    }

    /// The `_action` the server echoed, if any.
    pub fn action(&self) -> Option<&str> {
        match self {
            Response::Execution(report) => Some(&report.action),
            Response::OpenTrades(_) => Some("OPEN_TRADES"),
            Response::History(_) => Some("HIST"),
            Response::Unknown(fields) => fields.get("_action").and_then(Value::as_str),
        }
    }

    /// Whether the reply carries the field `marker` names.
    pub fn has_marker(&self, marker: ResponseMarker) -> bool {
        match (self, marker) {
            (_, ResponseMarker::Action) => self.action().is_some(),
            (Response::Execution(report), ResponseMarker::ResponseValue) => {
                report.response_value.is_some()
            }
            (Response::Unknown(fields), ResponseMarker::ResponseValue) => {
                fields.contains_key(marker.field_name())
            }
            _ => false,
        }
    }

    pub fn is_history(&self) -> bool {
        matches!(self, Response::History(_))
    }
}
