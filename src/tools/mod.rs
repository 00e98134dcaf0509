//! Tool implementations.
//!
//! - `sql_validator`: read-only statement classification
//! - `schema`: canned metadata statements and identifier validation
//! - `query`: the `run_query` tool
//! - `dispatch`: `{tool, params}` routing and response envelopes

pub mod dispatch;
pub mod query;
pub mod schema;
pub mod sql_validator;

pub use dispatch::{TOOL_NAMES, ToolCall, ToolDispatcher, ToolRequest, ToolResponse};
pub use query::{QueryParamInput, QueryToolHandler, RunQueryInput};
pub use schema::{
    CannedStatement, Identifier, ListDatabasesInput, ListTablesInput, SchemaToolHandler,
    TableInput,
};
pub use sql_validator::{StatementKind, ValidatedStatement, validate_readonly};
