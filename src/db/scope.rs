//! Per-call execution scope.
//!
//! A scope bundles the deadline and the cancel signals of one request. Every
//! blocking step of the call (pool wait, statement dispatch, row fetch) runs
//! through [`ExecutionScope::run`], so the first of cancellation, deadline or
//! completion wins.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
pub struct ExecutionScope {
    id: Uuid,
    deadline: Instant,
    timeout: Duration,
    /// Child of the gateway shutdown token; canceled when the scope ends.
    cancel: CancellationToken,
    /// Caller-side abort, e.g. an MCP `notifications/cancelled`.
    caller: Option<CancellationToken>,
}

impl ExecutionScope {
    pub fn new(
        timeout: Duration,
        shutdown: &CancellationToken,
        caller: Option<CancellationToken>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            deadline: Instant::now() + timeout,
            timeout,
            cancel: shutdown.child_token(),
            caller,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .caller
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    /// Run `fut` until it completes, the scope is canceled, or the deadline
    /// passes. Cancellation is checked first, so an already-canceled scope
    /// never polls `fut`.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let caller = self.caller.clone();
        let caller_canceled = async move {
            match caller {
                Some(token) => token.cancelled_owned().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DbError::canceled(operation)),
            _ = caller_canceled => Err(DbError::canceled(operation)),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(DbError::timeout(operation, self.timeout_ms()))
            }
            result = fut => result,
        }
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
