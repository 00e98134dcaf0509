//! Query execution tool.
//!
//! This module implements the `run_query` tool. The SQL is classified
//! before it reaches the pool; anything other than a read-only statement is
//! refused with a message naming the offending keyword.

use crate::db::QueryExecutor;
use crate::error::DbResult;
use crate::models::{QueryOptions, QueryParam, ResultDocument};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Input for the run_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunQueryInput {
    /// A single read-only statement: SELECT, WITH ... SELECT, SHOW, DESCRIBE or EXPLAIN.
    pub sql: String,
    /// Positional parameters bound to `?` placeholders, in order.
    #[serde(default)]
    pub params: Vec<QueryParamInput>,
    /// Maximum rows to return. Can only lower the configured default.
    #[serde(default)]
    pub row_cap: Option<usize>,
    /// Maximum serialized row bytes to return. Can only lower the configured default.
    #[serde(default)]
    pub byte_cap: Option<usize>,
    /// Statement timeout in milliseconds. Capped at 300000.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunQueryInput {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            row_cap: None,
            byte_cap: None,
            timeout_ms: None,
        }
    }

    /// Per-call options for the executor.
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            params: self.params.iter().cloned().map(Into::into).collect(),
            row_cap: self.row_cap,
            byte_cap: self.byte_cap,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Input parameter that can be various JSON types.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParamInput {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
}

impl From<QueryParamInput> for QueryParam {
    fn from(input: QueryParamInput) -> Self {
        match input {
            QueryParamInput::Null => QueryParam::Null,
            QueryParamInput::Bool(v) => QueryParam::Bool(v),
            QueryParamInput::Int(v) => QueryParam::Int(v),
            QueryParamInput::Float(v) => QueryParam::Float(v),
            QueryParamInput::String(v) => QueryParam::String(v),
        }
    }
}

/// Handler for the run_query tool.
#[derive(Debug, Clone)]
pub struct QueryToolHandler {
    executor: Arc<QueryExecutor>,
}

impl QueryToolHandler {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    pub async fn run_query(
        &self,
        input: RunQueryInput,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        info!(
            sql_len = input.sql.len(),
            params = input.params.len(),
            row_cap = ?input.row_cap,
            timeout_ms = ?input.timeout_ms,
            "Tool: run_query"
        );
        let options = input.options();
        self.executor
            .execute_query(&input.sql, &options, caller)
            .await
    }
}
