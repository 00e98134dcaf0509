//! MySQL type marshalling.
//!
//! Conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the driver-reported column type
//! 2. a per-category decoder extracts the value as a [`TransportValue`]
//!
//! Decoders fall back to the raw wire bytes when the typed decode fails, so
//! unusual values (zero dates, out-of-range TIME, invalid UTF-8 in a text
//! column) still produce a lossless cell instead of an error.

use crate::db::serializer::MarshalRow;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, TransportValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlColumn, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Null,
    Boolean,
    SignedInteger,
    UnsignedInteger,
    Float,
    Decimal,
    Text,
    Binary,
    Json,
    Date,
    DateTime,
    Time,
    Year,
    Unknown,
}

/// Classify a MySQL type name (as reported by the driver) into a category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();
    let unsigned = upper.ends_with(" UNSIGNED");
    let base = upper.trim_end_matches(" UNSIGNED");

    match base {
        "NULL" => TypeCategory::Null,
        "BOOLEAN" | "BOOL" => TypeCategory::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => {
            if unsigned {
                TypeCategory::UnsignedInteger
            } else {
                TypeCategory::SignedInteger
            }
        }
        "FLOAT" | "DOUBLE" | "REAL" => TypeCategory::Float,
        "DECIMAL" | "NUMERIC" | "NEWDECIMAL" => TypeCategory::Decimal,
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            TypeCategory::Text
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => TypeCategory::Binary,
        "JSON" => TypeCategory::Json,
        "DATE" => TypeCategory::Date,
        "DATETIME" | "TIMESTAMP" => TypeCategory::DateTime,
        "TIME" => TypeCategory::Time,
        "YEAR" => TypeCategory::Year,
        _ => TypeCategory::Unknown,
    }
}

/// Column descriptor for a driver-reported type. The `NULL` pseudo-type
/// (e.g. `SELECT NULL`) carries no information and is left absent.
pub fn describe_column(name: &str, type_name: &str) -> ColumnDescriptor {
    let declared = match type_name {
        "" | "NULL" => None,
        other => Some(other.to_string()),
    };
    ColumnDescriptor::new(name, declared)
}

/// Descriptors for driver column metadata, from a row or a prepared statement.
pub fn describe_columns(columns: &[MySqlColumn]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .map(|col| describe_column(col.name(), col.type_info().name()))
        .collect()
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        categorize_type(ty.name()) == TypeCategory::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Value helpers
// =============================================================================

/// Text when the bytes are valid UTF-8, bytes otherwise.
pub fn text_or_bytes(bytes: Vec<u8>) -> TransportValue {
    match String::from_utf8(bytes) {
        Ok(s) => TransportValue::Text(s),
        Err(e) => TransportValue::Bytes(e.into_bytes()),
    }
}

/// ISO-8601 UTC rendering of a DATETIME/TIMESTAMP value.
pub fn format_datetime(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn format_time(value: NaiveTime) -> String {
    value.format("%H:%M:%S%.f").to_string()
}

/// MySQL zero dates arrive as `0000-00-00...` in the text protocol and as an
/// empty value in the binary protocol.
pub fn is_zero_temporal(raw: &[u8]) -> bool {
    raw.is_empty()
        || raw.starts_with(b"0000-00-00")
        || (raw.len() >= 4 && raw[..4].iter().all(|b| *b == 0))
}

/// Decode a binary-protocol TIME value into `[-]HH:MM:SS[.ffffff]`.
///
/// Layout: sign (1), days (4 LE), hours, minutes, seconds, then optional
/// microseconds (4 LE). Hours include whole days, so values beyond 24h keep
/// their magnitude.
pub fn decode_binary_time(raw: &[u8]) -> Option<String> {
    match raw.len() {
        0 => Some("00:00:00".to_string()),
        8 | 12 => {
            let negative = raw[0] == 1;
            let days = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]);
            let hours = u64::from(days) * 24 + u64::from(raw[5]);
            let mut out = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                hours,
                raw[6],
                raw[7]
            );
            if raw.len() == 12 {
                let micros = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
                if micros > 0 {
                    out.push_str(&format!(".{:06}", micros));
                }
            }
            Some(out)
        }
        _ => None,
    }
}

/// Last-resort rendering for temporal columns the typed decoders rejected.
fn temporal_fallback(raw: Vec<u8>, category: TypeCategory) -> TransportValue {
    if category != TypeCategory::Time && is_zero_temporal(&raw) {
        return TransportValue::Null;
    }
    if category == TypeCategory::Time {
        if let Ok(text) = std::str::from_utf8(&raw) {
            if text.contains(':') {
                return TransportValue::Timestamp(text.to_string());
            }
        }
        if let Some(text) = decode_binary_time(&raw) {
            return TransportValue::Timestamp(text);
        }
    }
    match text_or_bytes(raw) {
        TransportValue::Text(s) => TransportValue::Timestamp(s),
        other => other,
    }
}

// =============================================================================
// MySQL row decoding
// =============================================================================

impl MarshalRow for MySqlRow {
    fn descriptors(&self) -> Vec<ColumnDescriptor> {
        describe_columns(self.columns())
    }

    fn marshal(&self) -> DbResult<Vec<TransportValue>> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                mysql::decode_column(self, idx, categorize_type(type_name)).map_err(|e| {
                    DbError::internal(format!(
                        "failed to decode column '{}' ({}): {}",
                        col.name(),
                        type_name,
                        e
                    ))
                })
            })
            .collect()
    }
}

mod mysql {
    use super::*;

    type DecodeResult = Result<TransportValue, sqlx::Error>;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> DecodeResult {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(TransportValue::Null);
        }

        match category {
            TypeCategory::Null => Ok(TransportValue::Null),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::SignedInteger | TypeCategory::Year => decode_signed(row, idx),
            TypeCategory::UnsignedInteger => decode_unsigned(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Binary => raw_bytes(row, idx).map(TransportValue::Bytes),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::DateTime => decode_datetime(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    fn raw_bytes(row: &MySqlRow, idx: usize) -> Result<Vec<u8>, sqlx::Error> {
        row.try_get_unchecked::<Vec<u8>, _>(idx)
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<bool, _>(idx) {
            return Ok(TransportValue::Bool(v));
        }
        Ok(TransportValue::Bool(
            row.try_get_unchecked::<i64, _>(idx)? != 0,
        ))
    }

    fn decode_signed(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Ok(TransportValue::Int(v));
        }
        row.try_get_unchecked::<i64, _>(idx).map(TransportValue::Int)
    }

    fn decode_unsigned(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return Ok(TransportValue::from(v));
        }
        row.try_get_unchecked::<u64, _>(idx).map(TransportValue::from)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Ok(TransportValue::Float(v));
        }
        row.try_get::<f32, _>(idx)
            .map(|v| TransportValue::Float(f64::from(v)))
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> DecodeResult {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => Ok(TransportValue::Decimal(v.0)),
            Err(_) => {
                let raw = raw_bytes(row, idx)?;
                Ok(match text_or_bytes(raw) {
                    TransportValue::Text(s) => TransportValue::Decimal(s),
                    other => other,
                })
            }
        }
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<JsonValue, _>(idx) {
            return Ok(TransportValue::Json(v));
        }
        match text_or_bytes(raw_bytes(row, idx)?) {
            TransportValue::Text(s) => Ok(serde_json::from_str::<JsonValue>(&s)
                .map(TransportValue::Json)
                .unwrap_or(TransportValue::Text(s))),
            other => Ok(other),
        }
    }

    fn decode_date(row: &MySqlRow, idx: usize) -> DecodeResult {
        match row.try_get::<NaiveDate, _>(idx) {
            Ok(v) => Ok(TransportValue::Timestamp(format_date(v))),
            Err(_) => Ok(temporal_fallback(raw_bytes(row, idx)?, TypeCategory::Date)),
        }
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> DecodeResult {
        match row.try_get::<NaiveDateTime, _>(idx) {
            Ok(v) => Ok(TransportValue::Timestamp(format_datetime(v))),
            Err(_) => Ok(temporal_fallback(
                raw_bytes(row, idx)?,
                TypeCategory::DateTime,
            )),
        }
    }

    fn decode_time(row: &MySqlRow, idx: usize) -> DecodeResult {
        match row.try_get::<NaiveTime, _>(idx) {
            Ok(v) => Ok(TransportValue::Timestamp(format_time(v))),
            Err(_) => Ok(temporal_fallback(raw_bytes(row, idx)?, TypeCategory::Time)),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> DecodeResult {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return Ok(TransportValue::Text(v));
        }
        raw_bytes(row, idx).map(text_or_bytes)
    }
}
