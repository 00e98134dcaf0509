//! Transport value: the single shape every result cell is converted into.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Sentinel emitted in place of a float NaN.
pub const NAN_SENTINEL: &str = "NaN";
/// Sentinel emitted in place of positive infinity.
pub const POS_INFINITY_SENTINEL: &str = "Infinity";
/// Sentinel emitted in place of negative infinity.
pub const NEG_INFINITY_SENTINEL: &str = "-Infinity";

/// One result cell, owned and detached from the driver row it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Finite values serialize as JSON numbers, NaN and infinities as sentinel strings.
    Float(f64),
    /// Exact decimal text, also used for unsigned values above `i64::MAX`.
    Decimal(String),
    Text(String),
    /// Serialized as standard base64.
    Bytes(Vec<u8>),
    /// ISO-8601 date, date-time (UTC) or time-of-day text.
    Timestamp(String),
    Json(JsonValue),
}

impl TransportValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Tag name, used in logs and test assertions.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int64",
            Self::Float(_) => "float64",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

fn float_sentinel(f: f64) -> &'static str {
    if f.is_nan() {
        NAN_SENTINEL
    } else if f.is_sign_negative() {
        NEG_INFINITY_SENTINEL
    } else {
        POS_INFINITY_SENTINEL
    }
}

impl Serialize for TransportValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(f) => serializer.serialize_str(float_sentinel(*f)),
            Self::Decimal(s) | Self::Text(s) | Self::Timestamp(s) => serializer.serialize_str(s),
            Self::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            Self::Json(v) => v.serialize(serializer),
        }
    }
}

impl From<bool> for TransportValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TransportValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for TransportValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(Self::Int)
            .unwrap_or_else(|_| Self::Decimal(v.to_string()))
    }
}

impl From<f64> for TransportValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for TransportValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<TransportValue>> From<Option<T>> for TransportValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}
