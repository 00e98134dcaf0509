//! Query-related data models.
//!
//! This module defines the parameters a caller may bind, the per-call options
//! and the result document returned for every successful statement.

use super::value::TransportValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default row cap for query results.
pub const DEFAULT_ROW_CAP: usize = 1000;

/// Default byte cap for query results (serialized row bytes).
pub const DEFAULT_BYTE_CAP: usize = 10_000_000;

/// Default query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;

/// Maximum query timeout in milliseconds.
pub const MAX_QUERY_TIMEOUT_MS: u64 = 300_000;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

/// Per-call execution options. `None` means "use the configured default".
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub params: Vec<QueryParam>,
    pub row_cap: Option<usize>,
    pub byte_cap: Option<usize>,
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_row_cap(mut self, row_cap: usize) -> Self {
        self.row_cap = Some(row_cap);
        self
    }

    pub fn with_byte_cap(mut self, byte_cap: usize) -> Self {
        self.byte_cap = Some(byte_cap);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Configured defaults that per-call options are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub row_cap: usize,
    pub byte_cap: usize,
    pub timeout: Duration,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            row_cap: DEFAULT_ROW_CAP,
            byte_cap: DEFAULT_BYTE_CAP,
            timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
        }
    }
}

/// Caps and deadline for one call after resolving options against defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub row_cap: usize,
    pub byte_cap: usize,
    pub timeout: Duration,
}

impl QueryDefaults {
    /// Resolve per-call options. Caps can only tighten the defaults and the
    /// timeout is bounded by [`MAX_QUERY_TIMEOUT_MS`].
    pub fn resolve(&self, options: &QueryOptions) -> ResolvedLimits {
        let max_timeout = Duration::from_millis(MAX_QUERY_TIMEOUT_MS);
        ResolvedLimits {
            row_cap: options
                .row_cap
                .map(|c| c.min(self.row_cap))
                .unwrap_or(self.row_cap),
            byte_cap: options
                .byte_cap
                .map(|c| c.min(self.byte_cap))
                .unwrap_or(self.byte_cap),
            timeout: options.timeout.unwrap_or(self.timeout).min(max_timeout),
        }
    }
}

/// Name and driver-reported type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            declared_type,
        }
    }
}

/// Result of one successful statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultDocument {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<TransportValue>>,
    pub row_count: usize,
    pub truncated: bool,
}

impl ResultDocument {
    /// Look up a column position by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Vec<&TransportValue> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter_map(|r| r.get(idx)).collect(),
            None => Vec::new(),
        }
    }
}
