//! Data models for the MySQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod value;

// Re-export commonly used types
pub use query::{
    ColumnDescriptor, DEFAULT_BYTE_CAP, DEFAULT_QUERY_TIMEOUT_MS, DEFAULT_ROW_CAP,
    MAX_QUERY_TIMEOUT_MS, QueryDefaults, QueryOptions, QueryParam, ResolvedLimits, ResultDocument,
};
pub use value::TransportValue;
