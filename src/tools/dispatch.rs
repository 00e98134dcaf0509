//! Tool dispatch.
//!
//! Maps a `{tool, params}` invocation onto a handler and folds the outcome
//! into the response envelope: a result document or `{"error": {...}}`.

use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult, ErrorReport};
use crate::models::ResultDocument;
use crate::tools::query::{QueryToolHandler, RunQueryInput};
use crate::tools::schema::{ListDatabasesInput, ListTablesInput, SchemaToolHandler, TableInput};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const TOOL_LIST_DATABASES: &str = "list_databases";
pub const TOOL_LIST_TABLES: &str = "list_tables";
pub const TOOL_DESCRIBE_TABLE: &str = "describe_table";
pub const TOOL_SHOW_CREATE_TABLE: &str = "show_create_table";
pub const TOOL_RUN_QUERY: &str = "run_query";

/// Every tool name the dispatcher accepts.
pub const TOOL_NAMES: [&str; 5] = [
    TOOL_LIST_DATABASES,
    TOOL_LIST_TABLES,
    TOOL_DESCRIBE_TABLE,
    TOOL_SHOW_CREATE_TABLE,
    TOOL_RUN_QUERY,
];

/// One tool invocation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, JsonValue>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, params: JsonValue) -> Self {
        let params = match params {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// Outcome of one invocation, serialized as exactly one of the two
/// envelope shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Result(ResultDocument),
    Error { error: ErrorReport },
}

impl ToolResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn error_report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Error { error } => Some(error),
            Self::Result(_) => None,
        }
    }

    pub fn document(&self) -> Option<&ResultDocument> {
        match self {
            Self::Result(doc) => Some(doc),
            Self::Error { .. } => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "error": ErrorReport::from(DbError::internal(format!(
                    "failed to encode response: {}",
                    e
                )))
            })
        })
    }
}

impl From<DbResult<ResultDocument>> for ToolResponse {
    fn from(result: DbResult<ResultDocument>) -> Self {
        match result {
            Ok(doc) => Self::Result(doc),
            Err(e) => Self::Error {
                error: ErrorReport::from(&e),
            },
        }
    }
}

/// A tool invocation with typed parameters.
#[derive(Debug, Clone)]
pub enum ToolCall {
    ListDatabases(ListDatabasesInput),
    ListTables(ListTablesInput),
    DescribeTable(TableInput),
    ShowCreateTable(TableInput),
    RunQuery(RunQueryInput),
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListDatabases(_) => TOOL_LIST_DATABASES,
            Self::ListTables(_) => TOOL_LIST_TABLES,
            Self::DescribeTable(_) => TOOL_DESCRIBE_TABLE,
            Self::ShowCreateTable(_) => TOOL_SHOW_CREATE_TABLE,
            Self::RunQuery(_) => TOOL_RUN_QUERY,
        }
    }

    /// Resolve a `{tool, params}` request. Unknown tools are a policy
    /// denial; parameters that do not fit the tool's input are INTERNAL.
    pub fn parse(request: ToolRequest) -> DbResult<Self> {
        let ToolRequest { tool, params } = request;
        let call = match tool.as_str() {
            TOOL_LIST_DATABASES => Self::ListDatabases(parse_params(&tool, params)?),
            TOOL_LIST_TABLES => Self::ListTables(parse_params(&tool, params)?),
            TOOL_DESCRIBE_TABLE => Self::DescribeTable(parse_params(&tool, params)?),
            TOOL_SHOW_CREATE_TABLE => Self::ShowCreateTable(parse_params(&tool, params)?),
            TOOL_RUN_QUERY => Self::RunQuery(parse_params(&tool, params)?),
            other => {
                return Err(DbError::policy_denied(
                    format!("tool not allowed: {}", other),
                    other,
                ));
            }
        };
        Ok(call)
    }
}

/// Routes tool invocations to their handlers.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    query: QueryToolHandler,
    schema: SchemaToolHandler,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self {
            query: QueryToolHandler::new(executor.clone()),
            schema: SchemaToolHandler::new(executor),
        }
    }

    /// Run one `{tool, params}` invocation. `caller` is canceled when the
    /// caller abandons the request.
    pub async fn dispatch(&self, request: ToolRequest, caller: CancellationToken) -> ToolResponse {
        match ToolCall::parse(request) {
            Ok(call) => self.call(call, caller).await,
            Err(e) => {
                debug!(error = %e.message(), "Rejected tool request");
                ToolResponse::from(Err(e))
            }
        }
    }

    /// Run a call whose parameters are already typed.
    pub async fn call(&self, call: ToolCall, caller: CancellationToken) -> ToolResponse {
        let caller = Some(caller);
        let result = match call {
            ToolCall::ListDatabases(input) => self.schema.list_databases(input, caller).await,
            ToolCall::ListTables(input) => self.schema.list_tables(input, caller).await,
            ToolCall::DescribeTable(input) => self.schema.describe_table(input, caller).await,
            ToolCall::ShowCreateTable(input) => self.schema.show_create_table(input, caller).await,
            ToolCall::RunQuery(input) => self.query.run_query(input, caller).await,
        };
        result.into()
    }
}

fn parse_params<T: DeserializeOwned>(tool: &str, params: Map<String, JsonValue>) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(params))
        .map_err(|e| DbError::internal(format!("invalid parameters for {}: {}", tool, e)))
}
