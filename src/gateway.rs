//! Process-wide gateway state.
//!
//! [`Gateway::init`] is the only place the pool is created; nothing opens a
//! connection lazily on first use. [`Gateway::shutdown`] cancels in-flight
//! calls and closes the pool.

use crate::config::GatewaySettings;
use crate::db::{ConnectionPool, PoolStats, QueryExecutor};
use crate::error::DbResult;
use crate::tools::{ToolDispatcher, ToolRequest, ToolResponse};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Gateway {
    executor: Arc<QueryExecutor>,
    dispatcher: ToolDispatcher,
}

impl Gateway {
    /// Create the pool and wait for the database to answer a ping.
    pub async fn init(settings: &GatewaySettings) -> DbResult<Self> {
        let database = settings.dsn.database();
        info!(
            dsn = %settings.dsn.redacted(),
            database = database.as_deref().unwrap_or("(none)"),
            "Connecting to MySQL"
        );
        let pool = ConnectionPool::connect(&settings.dsn, &settings.pool).await?;
        Ok(Self::with_pool(pool, settings))
    }

    fn with_pool(pool: ConnectionPool, settings: &GatewaySettings) -> Self {
        let executor = Arc::new(QueryExecutor::new(pool, settings.query));
        Self {
            dispatcher: ToolDispatcher::new(executor.clone()),
            executor,
        }
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Dispatch one invocation with a caller-owned cancel token.
    pub async fn call(&self, request: ToolRequest, caller: CancellationToken) -> ToolResponse {
        self.dispatcher.dispatch(request, caller).await
    }

    pub fn stats(&self) -> PoolStats {
        self.executor.stats()
    }

    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use serde_json::json;

    /// Gateway over a pool that has not connected; the port is closed.
    fn offline_gateway() -> Gateway {
        let settings = Config::with_dsn("mysql://u:p@127.0.0.1:1/db")
            .settings()
            .unwrap();
        let pool = ConnectionPool::connect_lazy(&settings.dsn, &settings.pool).unwrap();
        Gateway::with_pool(pool, &settings)
    }

    #[tokio::test]
    async fn test_unknown_tool_denied() {
        let gateway = offline_gateway();
        let response = gateway
            .call(
                ToolRequest::new("drop_database", json!({"db": "x"})),
                CancellationToken::new(),
            )
            .await;
        let report = response.error_report().unwrap();
        assert_eq!(report.kind, ErrorKind::PolicyDenied);
        assert_eq!(report.message, "tool not allowed: drop_database");
        assert_eq!(gateway.stats().open, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_calls() {
        let gateway = offline_gateway();
        gateway.shutdown().await;
        let response = gateway
            .call(
                ToolRequest::new("list_databases", json!({})),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(response.error_report().unwrap().kind, ErrorKind::Canceled);
    }

    #[tokio::test]
    async fn test_init_fails_when_unreachable() {
        let mut settings = Config::with_dsn("mysql://u:p@127.0.0.1:1/db")
            .settings()
            .unwrap();
        settings.pool.ping_timeout_secs = Some(1);
        let err = Gateway::init(&settings).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DbUnavailable);
    }
}
