//! Connection pool management.
//!
//! A single process-wide [`ConnectionPool`] wraps sqlx's `MySqlPool`. The
//! driver pool enforces `max_open_conns` and the connection lifetime; this
//! facade adds the idle cap, startup ping with retry, scope-bound acquire and
//! the interrupted-connection policy.

use crate::config::{Dsn, PoolOptions};
use crate::db::scope::ExecutionScope;
use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::MAX_QUERY_TIMEOUT_MS;
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlPool};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PING_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open: u32,
    pub idle: u32,
    pub in_use: u32,
    pub max_open: u32,
}

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: MySqlPool,
    connect_options: MySqlConnectOptions,
    max_open: u32,
    max_idle: u32,
}

impl ConnectionPool {
    /// Create the pool and wait until the database answers a ping.
    ///
    /// The ping is retried every second until the configured ping timeout
    /// elapses, after which startup fails with `DB_UNAVAILABLE`.
    pub async fn connect(dsn: &Dsn, options: &PoolOptions) -> DbResult<Self> {
        let pool = Self::connect_lazy(dsn, options)?;
        pool.ping_until(options.ping_timeout_or_default()).await?;
        Ok(pool)
    }

    /// Create the pool without opening any connection.
    pub fn connect_lazy(dsn: &Dsn, options: &PoolOptions) -> DbResult<Self> {
        let connect_options = MySqlConnectOptions::from_str(dsn.as_str())?.charset("utf8mb4");
        let max_open = options.max_open_conns_or_default();
        let max_idle = options.max_idle_conns_or_default();

        // Acquire waits are bounded by each call's scope, not by the driver.
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(max_open)
            .max_lifetime(options.conn_max_lifetime_or_default())
            .idle_timeout(options.conn_max_lifetime_or_default())
            .acquire_timeout(Duration::from_millis(MAX_QUERY_TIMEOUT_MS))
            .test_before_acquire(true)
            .connect_lazy_with(connect_options.clone());

        info!(
            dsn = %dsn.redacted(),
            max_open,
            max_idle,
            max_lifetime_secs = options.conn_max_lifetime_or_default().as_secs(),
            "Created MySQL connection pool"
        );

        Ok(Self {
            pool,
            connect_options,
            max_open,
            max_idle,
        })
    }

    async fn ping_until(&self, timeout: Duration) -> DbResult<()> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let last_error = match tokio::time::timeout(remaining, self.ping_once()).await {
                Ok(Ok(())) => {
                    info!(attempt, "Database is reachable");
                    return Ok(());
                }
                Ok(Err(e)) => e.message(),
                Err(_) => "ping timed out".to_string(),
            };

            if Instant::now() + PING_RETRY_INTERVAL >= deadline {
                return Err(DbError::unavailable(format!(
                    "database not reachable after {} attempts in {}s: {}",
                    attempt,
                    timeout.as_secs(),
                    last_error
                )));
            }
            warn!(attempt, error = %last_error, "Database ping failed, retrying");
            tokio::time::sleep(PING_RETRY_INTERVAL).await;
        }
    }

    async fn ping_once(&self) -> DbResult<()> {
        let mut conn = MySqlConnection::connect_with(&self.connect_options).await?;
        conn.ping().await?;
        conn.close().await?;
        Ok(())
    }

    /// Wait for a free connection until the scope's deadline.
    ///
    /// Returns `POOL_EXHAUSTED` when the deadline passes first and `CANCELED`
    /// when the scope is canceled.
    pub async fn acquire(&self, scope: &ExecutionScope) -> DbResult<PooledConnection> {
        let acquired = scope
            .run("connection acquire", async {
                self.pool.acquire().await.map_err(DbError::from)
            })
            .await;

        match acquired {
            Ok(conn) => Ok(PooledConnection {
                inner: Some(conn),
                pool: self.clone(),
                busy: false,
            }),
            Err(e) if e.kind() == ErrorKind::Timeout => Err(DbError::pool_exhausted(format!(
                "no connection available within {}ms ({} open, max {})",
                scope.timeout_ms(),
                self.pool.size(),
                self.max_open
            ))),
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX);
        PoolStats {
            open,
            idle,
            in_use: open.saturating_sub(idle),
            max_open: self.max_open,
        }
    }

    pub fn max_idle(&self) -> u32 {
        self.max_idle
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A connection checked out for one execution scope.
///
/// Dropping it returns the connection to the pool, unless a statement was
/// interrupted mid-flight or the pool already holds `max_idle_conns` idle
/// connections; then the connection is closed instead.
#[derive(Debug)]
pub struct PooledConnection {
    inner: Option<PoolConnection<MySql>>,
    pool: ConnectionPool,
    busy: bool,
}

impl PooledConnection {
    /// Borrow the connection for a statement. Until [`finish`](Self::finish)
    /// is called the connection counts as interrupted.
    pub fn begin(&mut self) -> DbResult<&mut MySqlConnection> {
        self.busy = true;
        self.inner
            .as_deref_mut()
            .ok_or_else(|| DbError::internal("connection already released"))
    }

    /// Mark the statement as fully drained.
    pub fn finish(&mut self) {
        self.busy = false;
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.inner.take() {
            close_in_background(conn, "discarded");
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.inner.take() else {
            return;
        };
        if self.busy {
            close_in_background(conn, "interrupted");
        } else if self.pool.pool.num_idle() >= self.pool.max_idle as usize {
            close_in_background(conn, "idle cap reached");
        }
        // otherwise the driver returns it to the pool on drop
    }
}

/// Close a pooled connection while keeping its pool slot until the close
/// finishes, so the open count never exceeds `max_open_conns`.
fn close_in_background(conn: PoolConnection<MySql>, reason: &'static str) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
                    Ok(Ok(())) => debug!(reason, "Closed connection"),
                    Ok(Err(e)) => debug!(reason, error = %e, "Connection closed with error"),
                    Err(_) => debug!(reason, "Connection close timed out, dropped"),
                }
            });
        }
        // No runtime: dropping the detached socket is all we can do.
        Err(_) => drop(conn.detach()),
    }
}
