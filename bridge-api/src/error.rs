use thiserror::Error;

/// Failure to encode or decode a delimited wire message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    /// The message had no content at all.
    #[error("empty message")]
    Empty,

    /// The leading token does not name a known message kind.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    /// A TRADE message carried an action the bridge does not know.
    #[error("unknown trade action: {0}")]
    UnknownAction(String),

    /// The message split into the wrong number of fields.
    #[error("{kind} expects {expected} fields, got {actual}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A market data payload that is neither a tick (2 fields) nor a bar (8).
    #[error("market data expects 2 (tick) or 8 (bar) fields, got {actual}")]
    PayloadShape { actual: usize },

    /// A field could not be parsed into its declared type.
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    /// A text field contains the delimiter and would break framing.
    #[error("field {field} contains the delimiter '{delimiter}'")]
    DelimiterInField { field: &'static str, delimiter: char },

    /// Market data message without the `INSTRUMENT PAYLOAD` shape.
    #[error("missing topic separator in '{0}'")]
    MissingTopic(String),
}
