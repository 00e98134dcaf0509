//! MCP service implementation using rmcp.
//!
//! This module defines the GatewayService struct exposing the gateway's five
//! tools via the MCP protocol using the rmcp framework's macros. Each tool
//! returns the JSON envelope as text content; error envelopes are flagged
//! with `is_error` so clients can tell them apart without parsing.

use crate::tools::dispatch::{ToolCall, ToolDispatcher, ToolResponse};
use crate::tools::query::RunQueryInput;
use crate::tools::schema::{ListDatabasesInput, ListTablesInput, TableInput};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    service::RequestContext,
    tool, tool_handler, tool_router,
};

#[derive(Clone)]
pub struct GatewayService {
    /// Shared dispatcher for all tool invocations
    dispatcher: ToolDispatcher,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    async fn run(&self, call: ToolCall, context: RequestContext<RoleServer>) -> CallToolResult {
        into_call_result(self.dispatcher.call(call, context.ct).await)
    }
}

/// Wrap a tool response as MCP tool content.
fn into_call_result(response: ToolResponse) -> CallToolResult {
    let content = vec![Content::text(response.to_json().to_string())];
    if response.is_error() {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

#[tool_router]
impl GatewayService {
    #[tool(description = "List all databases visible to the gateway's MySQL user.")]
    async fn list_databases(
        &self,
        Parameters(input): Parameters<ListDatabasesInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run(ToolCall::ListDatabases(input), context).await)
    }

    #[tool(
        description = "List tables in a database.\nWithout `db`, lists the database named in the connection string."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run(ToolCall::ListTables(input), context).await)
    }

    #[tool(
        description = "Describe a table's columns (Field, Type, Null, Key, Default, Extra).\nNames may contain only letters, digits and underscores."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<TableInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run(ToolCall::DescribeTable(input), context).await)
    }

    #[tool(description = "Return the CREATE TABLE statement for a table.")]
    async fn show_create_table(
        &self,
        Parameters(input): Parameters<TableInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run(ToolCall::ShowCreateTable(input), context).await)
    }

    #[tool(
        description = "Run one read-only SQL statement (SELECT, WITH ... SELECT, SHOW, DESCRIBE, EXPLAIN).\nWrites, DDL, transactions, procedure calls and multiple statements are refused.\nUse `?` placeholders with `params` instead of inlining values.\nResults stop at `row_cap` rows or `byte_cap` bytes and are then marked truncated."
    )]
    async fn run_query(
        &self,
        Parameters(input): Parameters<RunQueryInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run(ToolCall::RunQuery(input), context).await)
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mysql-gateway".to_owned(),
                title: Some("MySQL Query Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only access to one MySQL server.\n\
                \n\
                ## Workflow\n\
                1. `list_databases`, then `list_tables` with `db`\n\
                2. `describe_table` or `show_create_table` to learn a table's shape\n\
                3. `run_query` for SELECT statements; qualify tables as `db.table`\n\
                \n\
                ## Results\n\
                Success: `{columns, rows, row_count, truncated}`. Binary values are base64.\n\
                Failure: `{error: {kind, message, retriable}}`. Retry only when `retriable` is true."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dsn, PoolOptions};
    use crate::db::{ConnectionPool, QueryExecutor};
    use crate::error::DbError;
    use crate::models::{QueryDefaults, ResultDocument};
    use std::sync::Arc;

    fn create_test_service() -> GatewayService {
        let dsn = Dsn::parse("mysql://u:p@127.0.0.1:1/db").unwrap();
        let pool = ConnectionPool::connect_lazy(&dsn, &PoolOptions::default()).unwrap();
        let executor = Arc::new(QueryExecutor::new(pool, QueryDefaults::default()));
        GatewayService::new(ToolDispatcher::new(executor))
    }

    #[tokio::test]
    async fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "mysql-gateway");
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_tool_router_lists_all_tools() {
        let service = create_test_service();
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "describe_table",
                "list_databases",
                "list_tables",
                "run_query",
                "show_create_table"
            ]
        );
    }

    #[test]
    fn test_error_result_flagged() {
        let result = into_call_result(ToolResponse::from(Err(DbError::multi_statement(
            "multiple statements are not allowed",
        ))));
        assert_eq!(result.is_error, Some(true));

        let result = into_call_result(ToolResponse::from(Ok(ResultDocument {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
        })));
        assert_eq!(result.is_error, Some(false));
    }
}
