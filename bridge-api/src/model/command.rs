//! Outbound commands and their delimited wire format.
//!
//! Every command is a single text frame on the PUSH channel:
//!
//! ```text
//! TRADE;ACTION;TYPE;SYMBOL;PRICE;SL;TP;COMMENT;LOTS;MAGIC;TICKET
//! HIST;SYMBOL;TIMEFRAME;START;END
//! DATA;SYMBOL;TIMEFRAME;START;END
//! TRACK_PRICES;SYM1;SYM2;...
//! TRACK_RATES;SYM1;TF1;SYM2;TF2;...
//! HEARTBEAT;
//! ```
//!
//! Commands carry no correlation identifier; the server replies on the PULL
//! channel and the reply is matched by arrival only.

use crate::error::WireError;
use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field separator used by the stock MetaTrader server.
pub const DEFAULT_DELIMITER: char = ';';

/// Timestamp layout understood by the MetaTrader terminal.
pub const PLATFORM_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Comment stamped on default trade instructions.
pub const DEFAULT_COMMENT: &str = "dwx-zeromq";

/// Magic number stamped on default trade instructions.
pub const DEFAULT_MAGIC: u64 = 123456;

/// Action field of a TRADE command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Modify,
    Close,
    ClosePartial,
    CloseMagic,
    CloseAll,
    GetOpenTrades,
}

impl TradeAction {
    /// The token the server expects in the ACTION field.
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Open => "OPEN",
            TradeAction::Modify => "MODIFY",
            TradeAction::Close => "CLOSE",
            TradeAction::ClosePartial => "CLOSE_PARTIAL",
            TradeAction::CloseMagic => "CLOSE_MAGIC",
            TradeAction::CloseAll => "CLOSE_ALL",
            TradeAction::GetOpenTrades => "GET_OPEN_TRADES",
        }
    }

    /// Whether the server answers this action with a close-style report
    /// (carrying `_response_value`) rather than an execution echo.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            TradeAction::Close
                | TradeAction::ClosePartial
                | TradeAction::CloseMagic
                | TradeAction::CloseAll
        )
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeAction::Open),
            "MODIFY" => Ok(TradeAction::Modify),
            "CLOSE" => Ok(TradeAction::Close),
            "CLOSE_PARTIAL" => Ok(TradeAction::ClosePartial),
            "CLOSE_MAGIC" => Ok(TradeAction::CloseMagic),
            "CLOSE_ALL" => Ok(TradeAction::CloseAll),
            "GET_OPEN_TRADES" => Ok(TradeAction::GetOpenTrades),
            other => Err(WireError::UnknownAction(other.to_string())),
        }
    }
}

/// MetaTrader order type codes (`OP_BUY` = 0 ... `OP_SELLSTOP` = 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderType {
    Buy = 0,
    Sell = 1,
    BuyLimit = 2,
    SellLimit = 3,
    BuyStop = 4,
    SellStop = 5,
}

impl OrderType {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OrderType::Buy),
            1 => Some(OrderType::Sell),
            2 => Some(OrderType::BuyLimit),
            3 => Some(OrderType::SellLimit),
            4 => Some(OrderType::BuyStop),
            5 => Some(OrderType::SellStop),
            _ => None,
        }
    }
}

/// Chart timeframe, sent on the wire as a number of minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
            Timeframe::MN1 => 43200,
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(Timeframe::M1),
            5 => Some(Timeframe::M5),
            15 => Some(Timeframe::M15),
            30 => Some(Timeframe::M30),
            60 => Some(Timeframe::H1),
            240 => Some(Timeframe::H4),
            1440 => Some(Timeframe::D1),
            10080 => Some(Timeframe::W1),
            43200 => Some(Timeframe::MN1),
            _ => None,
        }
    }

    /// Label used in topic names, e.g. `M1` in `EURUSD_M1`.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = WireError;

    /// Accepts either a label (`H1`) or a minute count (`60`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WireError::InvalidField {
            field: "timeframe",
            value: s.to_string(),
        };
        if let Ok(minutes) = s.parse::<u32>() {
            return Timeframe::from_minutes(minutes).ok_or_else(invalid);
        }
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            "MN1" => Ok(Timeframe::MN1),
            _ => Err(invalid()),
        }
    }
}

/// Body of a TRADE command.
///
/// SL and TP are expressed in points, not pips. `price` is only meaningful for
/// pending orders and for MODIFY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeInstruction {
    pub action: TradeAction,
    pub order_type: OrderType,
    pub symbol: String,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
    pub lots: f64,
    pub magic: u64,
    pub ticket: u64,
}

impl TradeInstruction {
    /// Creates an instruction for `action` on `symbol`, every other field at its default.
    pub fn new(action: TradeAction, symbol: impl Into<String>) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_stops(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_lots(mut self, lots: f64) -> Self {
        self.lots = lots;
        self
    }

    pub fn with_magic(mut self, magic: u64) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_ticket(mut self, ticket: u64) -> Self {
        self.ticket = ticket;
        self
    }
}

impl Default for TradeInstruction {
    fn default() -> Self {
        Self {
            action: TradeAction::Open,
            order_type: OrderType::Buy,
            symbol: "EURUSD".to_string(),
            price: 0.0,
            stop_loss: 500.0,
            take_profit: 500.0,
            comment: DEFAULT_COMMENT.to_string(),
            lots: 0.01,
            magic: DEFAULT_MAGIC,
            ticket: 0,
        }
    }
}

/// Body of a HIST (or legacy DATA) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl HistoryRequest {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start,
            end,
        }
    }

    /// Requests everything from `start` up to the current minute (UTC).
    ///
    /// The server works in broker time, so callers may need to shift `end` by
    /// the broker's GMT offset.
    pub fn since(symbol: impl Into<String>, timeframe: Timeframe, start: NaiveDateTime) -> Self {
        let now = Utc::now().naive_utc();
        let end = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        Self::new(symbol, timeframe, start, end)
    }
}

/// One `(symbol, timeframe)` pair of a TRACK_RATES request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateSubscription {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl RateSubscription {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// The SUB topic the server publishes these bars under, e.g. `EURUSD_M1`.
    pub fn topic(&self) -> String {
        format!("{}_{}", self.symbol, self.timeframe.label())
    }
}

/// A complete outbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Trade(TradeInstruction),
    History(HistoryRequest),
    Data(HistoryRequest),
    TrackPrices(Vec<String>),
    TrackRates(Vec<RateSubscription>),
    Heartbeat,
}

impl Command {
    /// The leading token of the wire message.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Trade(_) => "TRADE",
            Command::History(_) => "HIST",
            Command::Data(_) => "DATA",
            Command::TrackPrices(_) => "TRACK_PRICES",
            Command::TrackRates(_) => "TRACK_RATES",
            Command::Heartbeat => "HEARTBEAT",
        }
    }

    /// Serializes the command into its delimited wire form.
    ///
    /// # Arguments
    ///
    /// * `delimiter` - Field separator configured on both ends.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` with the frame to send.
    /// * `Err(WireError::DelimiterInField)` if a text field would break framing.
    pub fn to_wire(&self, delimiter: char) -> Result<String, WireError> {
        let mut fields: Vec<String> = vec![self.kind().to_string()];
        match self {
            Command::Trade(t) => {
                check_field("symbol", &t.symbol, delimiter)?;
                check_field("comment", &t.comment, delimiter)?;
                fields.extend([
                    t.action.as_str().to_string(),
                    t.order_type.code().to_string(),
                    t.symbol.clone(),
                    format_float(t.price),
                    format_float(t.stop_loss),
                    format_float(t.take_profit),
                    t.comment.clone(),
                    format_float(t.lots),
                    t.magic.to_string(),
                    t.ticket.to_string(),
                ]);
            }
            Command::History(req) | Command::Data(req) => {
                check_field("symbol", &req.symbol, delimiter)?;
                fields.extend([
                    req.symbol.clone(),
                    req.timeframe.minutes().to_string(),
                    req.start.format(PLATFORM_TIME_FORMAT).to_string(),
                    req.end.format(PLATFORM_TIME_FORMAT).to_string(),
                ]);
            }
            Command::TrackPrices(symbols) => {
                for symbol in symbols {
                    check_field("symbol", symbol, delimiter)?;
                    fields.push(symbol.clone());
                }
            }
            Command::TrackRates(subscriptions) => {
                for sub in subscriptions {
                    check_field("symbol", &sub.symbol, delimiter)?;
                    fields.push(sub.symbol.clone());
                    fields.push(sub.timeframe.minutes().to_string());
                }
            }
            // The server expects a trailing delimiter after HEARTBEAT.
            Command::Heartbeat => fields.push(String::new()),
        }
        Ok(fields.join(&delimiter.to_string()))
    }

    /// Parses a wire frame back into a `Command`.
    ///
    /// This is the server-side view of the protocol; it is what a test peer
    /// uses to check what the bridge sent.
    pub fn from_wire(message: &str, delimiter: char) -> Result<Self, WireError> {
        if message.is_empty() {
            return Err(WireError::Empty);
        }
        let parts: Vec<&str> = message.split(delimiter).collect();
        match parts[0] {
            "TRADE" => {
                expect_fields("TRADE", &parts, 11)?;
                let order_code: u8 = parse_field("type", parts[2])?;
                Ok(Command::Trade(TradeInstruction {
                    action: parts[1].parse()?,
                    order_type: OrderType::from_code(order_code).ok_or_else(|| {
                        WireError::InvalidField {
                            field: "type",
                            value: parts[2].to_string(),
                        }
                    })?,
                    symbol: parts[3].to_string(),
                    price: parse_field("price", parts[4])?,
                    stop_loss: parse_field("sl", parts[5])?,
                    take_profit: parse_field("tp", parts[6])?,
                    comment: parts[7].to_string(),
                    lots: parse_field("lots", parts[8])?,
                    magic: parse_field("magic", parts[9])?,
                    ticket: parse_field("ticket", parts[10])?,
                }))
            }
            kind @ ("HIST" | "DATA") => {
                expect_fields(if kind == "HIST" { "HIST" } else { "DATA" }, &parts, 5)?;
                let request = HistoryRequest {
                    symbol: parts[1].to_string(),
                    timeframe: parts[2].parse()?,
                    start: parse_time("start", parts[3])?,
                    end: parse_time("end", parts[4])?,
                };
                if kind == "HIST" {
                    Ok(Command::History(request))
                } else {
                    Ok(Command::Data(request))
                }
            }
            "TRACK_PRICES" => Ok(Command::TrackPrices(
                parts[1..]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect(),
            )),
            "TRACK_RATES" => {
                let rest = &parts[1..];
                if rest.len() % 2 != 0 {
                    return Err(WireError::FieldCount {
                        kind: "TRACK_RATES",
                        expected: rest.len() + 2,
                        actual: parts.len(),
                    });
                }
                let subscriptions = rest
                    .chunks(2)
                    .map(|pair| Ok(RateSubscription::new(pair[0], pair[1].parse()?)))
                    .collect::<Result<Vec<_>, WireError>>()?;
                Ok(Command::TrackRates(subscriptions))
            }
            "HEARTBEAT" => Ok(Command::Heartbeat),
            other => Err(WireError::UnknownKind(other.to_string())),
        }
    }
}

impl From<TradeInstruction> for Command {
    fn from(instruction: TradeInstruction) -> Self {
        Command::Trade(instruction)
    }
}

// Debug formatting keeps a trailing `.0` on whole numbers, matching what the server has always received.
fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

fn check_field(field: &'static str, value: &str, delimiter: char) -> Result<(), WireError> {
    if value.contains(delimiter) {
        return Err(WireError::DelimiterInField { field, delimiter });
    }
    Ok(())
}

fn expect_fields(kind: &'static str, parts: &[&str], expected: usize) -> Result<(), WireError> {
    if parts.len() != expected {
        return Err(WireError::FieldCount {
            kind,
            expected,
            actual: parts.len(),
        });
    }
    Ok(())
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, WireError> {
    value.parse().map_err(|_| WireError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveDateTime, WireError> {
    NaiveDateTime::parse_from_str(value, PLATFORM_TIME_FORMAT).map_err(|_| {
        WireError::InvalidField {
            field,
            value: value.to_string(),
        }
    })
}
