//! Query execution engine.
//!
//! Every call follows the same path: classify, resolve limits, open an
//! [`ExecutionScope`], acquire a connection within it, stream rows through
//! the [`RowSerializer`], release. Caller SQL without parameters is sent
//! over the text protocol so `SHOW`/`DESCRIBE` forms that the server cannot
//! prepare still work; parameters always go through prepared placeholders.

use crate::db::params::bind_all;
use crate::db::pool::{ConnectionPool, PoolStats};
use crate::db::scope::ExecutionScope;
use crate::db::serializer::RowSerializer;
use crate::db::types::describe_columns;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, QueryDefaults, QueryOptions, QueryParam, ResultDocument};
use crate::tools::schema::CannedStatement;
use crate::tools::sql_validator::{StatementKind, ValidatedStatement, validate_readonly};
use sqlx::mysql::MySqlConnection;
use sqlx::{Executor, Statement};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes validated statements against the shared pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: ConnectionPool,
    defaults: QueryDefaults,
    shutdown: CancellationToken,
}

impl QueryExecutor {
    pub fn new(pool: ConnectionPool, defaults: QueryDefaults) -> Self {
        Self {
            pool,
            defaults,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn defaults(&self) -> &QueryDefaults {
        &self.defaults
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run caller-supplied SQL.
    ///
    /// The statement is classified before anything touches the pool, so a
    /// denied statement never opens a connection. `USE` is refused here: it
    /// would change session state on a pooled connection.
    pub async fn execute_query(
        &self,
        sql: &str,
        options: &QueryOptions,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        let statement = validate_readonly(sql)?;
        if statement.kind == StatementKind::Use {
            return Err(DbError::policy_denied(
                "USE not allowed in run_query; qualify names as db.table instead",
                "USE",
            ));
        }
        self.execute(&statement, options, caller).await
    }

    /// Run one of the canned metadata statements.
    ///
    /// The generated text still goes through the classifier and must land on
    /// the kind the template promises.
    pub async fn execute_canned(
        &self,
        canned: &CannedStatement,
        options: &QueryOptions,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        let statement = validate_readonly(&canned.sql())?;
        if statement.kind != canned.expected_kind() {
            return Err(DbError::internal(format!(
                "{} produced a {} statement, expected {}",
                canned.name(),
                statement.kind,
                canned.expected_kind()
            )));
        }
        self.execute(&statement, options, caller).await
    }

    async fn execute(
        &self,
        statement: &ValidatedStatement,
        options: &QueryOptions,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        let limits = self.defaults.resolve(options);
        let scope = ExecutionScope::new(limits.timeout, &self.shutdown, caller);
        let start = Instant::now();

        debug!(
            scope_id = %scope.id(),
            kind = %statement.kind,
            sql = %statement.sql,
            params = options.params.len(),
            row_cap = limits.row_cap,
            byte_cap = limits.byte_cap,
            timeout_ms = scope.timeout_ms(),
            "Executing statement"
        );

        let serializer = RowSerializer::new(limits.row_cap, limits.byte_cap);
        let result = self
            .run_in_scope(&scope, statement, &options.params, serializer)
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(doc) => info!(
                scope_id = %scope.id(),
                kind = %statement.kind,
                row_count = doc.row_count,
                truncated = doc.truncated,
                elapsed_ms,
                "Statement completed"
            ),
            Err(e) => warn!(
                scope_id = %scope.id(),
                kind = %statement.kind,
                error_kind = %e.kind(),
                error = %e.message(),
                elapsed_ms,
                "Statement failed"
            ),
        }

        result
    }

    async fn run_in_scope(
        &self,
        scope: &ExecutionScope,
        statement: &ValidatedStatement,
        params: &[QueryParam],
        serializer: RowSerializer,
    ) -> DbResult<ResultDocument> {
        let mut pooled = self.pool.acquire(scope).await?;

        let conn = pooled.begin()?;
        let result = scope
            .run(
                "query execution",
                fetch_document(conn, &statement.sql, params, serializer),
            )
            .await;

        match release_for(&result) {
            Release::Reuse => pooled.finish(),
            Release::Close => {
                debug!(scope_id = %scope.id(), "Discarding connection with unread results");
                pooled.discard();
            }
        }
        result
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Cancel every in-flight call and close the pool.
    pub async fn shutdown(&self) {
        info!(stats = ?self.pool.stats(), "Shutting down query executor");
        self.shutdown.cancel();
        self.pool.close().await;
        info!(stats = ?self.pool.stats(), "Connection pool closed");
    }
}

/// What happens to a connection once its statement is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Reuse,
    Close,
}

/// A truncated result stopped reading mid-stream; the remaining rows are
/// still on the wire and must not become the next caller's problem.
fn release_for(result: &DbResult<ResultDocument>) -> Release {
    match result {
        Ok(doc) if doc.truncated => Release::Close,
        Ok(_) => Release::Reuse,
        Err(e) if e.interrupts_connection() => Release::Close,
        Err(_) => Release::Reuse,
    }
}

async fn fetch_document(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
    serializer: RowSerializer,
) -> DbResult<ResultDocument> {
    let rows = if params.is_empty() {
        (&mut *conn).fetch(sql)
    } else {
        bind_all(sql, params).fetch(&mut *conn)
    };
    let mut doc = serializer.collect(rows).await?;

    // Columns come from the first row; an empty result asks the server.
    if doc.columns.is_empty() && doc.rows.is_empty() {
        doc.columns = prepared_columns(conn, sql).await;
    }
    Ok(doc)
}

/// Result columns of `sql` as reported by a prepare round trip. Statements
/// the server cannot prepare (some `SHOW` forms) yield no columns.
async fn prepared_columns(conn: &mut MySqlConnection, sql: &str) -> Vec<ColumnDescriptor> {
    match conn.prepare(sql).await {
        Ok(statement) => describe_columns(statement.columns()),
        Err(e) => {
            debug!(error = %e, "Column metadata unavailable for empty result");
            Vec::new()
        }
    }
}
