//! Error types for the MySQL gateway.
//!
//! Every failure leaving the executor is one of the variants below. The set is
//! closed: callers branch on [`ErrorKind`] and use the `retriable` flag of the
//! [`ErrorReport`] to decide whether trying again can help.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;

/// Caller-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PolicyDenied,
    EmptyStatement,
    MultiStatement,
    InvalidIdentifier,
    SyntaxError,
    ObjectNotFound,
    PermissionDenied,
    Timeout,
    Canceled,
    PoolExhausted,
    DbUnavailable,
    ResultTooLarge,
    Internal,
}

impl ErrorKind {
    /// Wire name of this kind, e.g. `POLICY_DENIED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyDenied => "POLICY_DENIED",
            Self::EmptyStatement => "EMPTY_STATEMENT",
            Self::MultiStatement => "MULTI_STATEMENT",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::ObjectNotFound => "OBJECT_NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Timeout => "TIMEOUT",
            Self::Canceled => "CANCELED",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::DbUnavailable => "DB_UNAVAILABLE",
            Self::ResultTooLarge => "RESULT_TOO_LARGE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::PoolExhausted | Self::DbUnavailable
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Policy denied: {message}")]
    PolicyDenied {
        message: String,
        /// Keyword or feature that triggered the denial, e.g. "DELETE"
        keyword: String,
    },

    #[error("Empty statement: {message}")]
    EmptyStatement { message: String },

    #[error("Multiple statements: {message}")]
    MultiStatement { message: String },

    #[error("Invalid identifier: {message}")]
    InvalidIdentifier { message: String, identifier: String },

    #[error("Syntax error: {message}")]
    Syntax {
        message: String,
        /// MySQL error number, when the server reported one
        code: Option<u16>,
    },

    #[error("Object not found: {message}")]
    ObjectNotFound { message: String, code: Option<u16> },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String, code: Option<u16> },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Canceled: {operation}")]
    Canceled { operation: String },

    /// The server stopped the statement itself, e.g. `max_execution_time`.
    #[error("Server interrupted statement: {message}")]
    ServerInterrupted {
        message: String,
        kind: ErrorKind,
        code: u16,
    },

    #[error("Pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Database unavailable: {message}")]
    Unavailable { message: String },

    #[error("Result too large: {message}")]
    ResultTooLarge { message: String, limit_bytes: usize },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a policy denial naming the offending keyword.
    pub fn policy_denied(message: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self::PolicyDenied {
            message: message.into(),
            keyword: keyword.into(),
        }
    }

    pub fn empty_statement(message: impl Into<String>) -> Self {
        Self::EmptyStatement {
            message: message.into(),
        }
    }

    pub fn multi_statement(message: impl Into<String>) -> Self {
        Self::MultiStatement {
            message: message.into(),
        }
    }

    /// Create an invalid identifier error for a rejected db/table name.
    pub fn invalid_identifier(what: &str, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::InvalidIdentifier {
            message: format!(
                "{} '{}' must match ^[A-Za-z0-9_]+$ and be at most 64 characters",
                what, identifier
            ),
            identifier,
        }
    }

    pub fn syntax(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::Syntax {
            message: message.into(),
            code,
        }
    }

    pub fn object_not_found(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::ObjectNotFound {
            message: message.into(),
            code,
        }
    }

    pub fn permission_denied(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            code,
        }
    }

    /// Create a timeout error for an operation bounded by `timeout_ms`.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn canceled(operation: impl Into<String>) -> Self {
        Self::Canceled {
            operation: operation.into(),
        }
    }

    /// Create an error for a statement the server aborted on its own side.
    /// `kind` is `Timeout` or `Canceled`.
    pub fn server_interrupted(message: impl Into<String>, kind: ErrorKind, code: u16) -> Self {
        Self::ServerInterrupted {
            message: message.into(),
            kind,
            code,
        }
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a result-too-large error for a byte cap no single row fits in.
    pub fn result_too_large(limit_bytes: usize, row_bytes: usize) -> Self {
        Self::ResultTooLarge {
            message: format!(
                "first row needs {} but byte_cap is {}",
                humansize::format_size(row_bytes, humansize::DECIMAL),
                humansize::format_size(limit_bytes, humansize::DECIMAL)
            ),
            limit_bytes,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::EmptyStatement { .. } => ErrorKind::EmptyStatement,
            Self::MultiStatement { .. } => ErrorKind::MultiStatement,
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::Syntax { .. } => ErrorKind::SyntaxError,
            Self::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::ServerInterrupted { kind, .. } => *kind,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::Unavailable { .. } => ErrorKind::DbUnavailable,
            Self::ResultTooLarge { .. } => ErrorKind::ResultTooLarge,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Caller-facing message without the category prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            Self::PolicyDenied { message, .. }
            | Self::EmptyStatement { message }
            | Self::MultiStatement { message }
            | Self::InvalidIdentifier { message, .. }
            | Self::Syntax { message, .. }
            | Self::ObjectNotFound { message, .. }
            | Self::PermissionDenied { message, .. }
            | Self::ServerInterrupted { message, .. }
            | Self::PoolExhausted { message }
            | Self::Unavailable { message }
            | Self::ResultTooLarge { message, .. }
            | Self::Internal { message } => message.clone(),
            Self::Timeout {
                operation,
                timeout_ms,
            } => format!("{} exceeded timeout of {}ms", operation, timeout_ms),
            Self::Canceled { operation } => format!("{} was canceled", operation),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// True when the connection may still hold unread protocol data: the
    /// client cut the statement off, stopped reading rows, or lost the socket.
    /// Errors the server reported end the exchange cleanly.
    pub fn interrupts_connection(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Canceled { .. }
                | Self::ResultTooLarge { .. }
                | Self::Unavailable { .. }
                | Self::Internal { .. }
        )
    }
}

/// Map a MySQL server error number to the taxonomy.
///
/// Returns `None` for numbers with no dedicated mapping.
pub fn classify_mysql_error(number: u16, message: &str) -> Option<DbError> {
    let code = Some(number);
    let err = match number {
        // ER_PARSE_ERROR, ER_SYNTAX_ERROR
        1064 | 1149 => DbError::syntax(message, code),
        // ER_NO_SUCH_TABLE, ER_BAD_DB_ERROR, ER_BAD_FIELD_ERROR, ER_BAD_TABLE_ERROR,
        // ER_NO_DB_ERROR
        1146 | 1049 | 1054 | 1051 | 1046 => DbError::object_not_found(message, code),
        // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_TABLEACCESS_DENIED_ERROR,
        // ER_COLUMNACCESS_DENIED_ERROR, ER_SPECIFIC_ACCESS_DENIED_ERROR
        1044 | 1045 | 1142 | 1143 | 1227 => DbError::permission_denied(message, code),
        // ER_QUERY_TIMEOUT (max_execution_time)
        3024 => DbError::server_interrupted(message, ErrorKind::Timeout, number),
        // ER_QUERY_INTERRUPTED
        1317 => DbError::server_interrupted(message, ErrorKind::Canceled, number),
        // CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR, CR_SERVER_GONE_ERROR, CR_SERVER_LOST
        2002 | 2003 | 2006 | 2013 => DbError::unavailable(message),
        _ => return None,
    };
    Some(err)
}

/// Map a SQLSTATE to the taxonomy when no MySQL error number is available.
pub fn classify_sql_state(sql_state: &str, message: &str) -> Option<DbError> {
    let err = match sql_state {
        "42000" => DbError::syntax(message, None),
        "42S02" | "42S22" | "3D000" => DbError::object_not_found(message, None),
        "28000" | "42501" => DbError::permission_denied(message, None),
        "08S01" | "08001" | "08004" => DbError::unavailable(message),
        _ => return None,
    };
    Some(err)
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                if let Some(mysql_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
                    if let Some(mapped) = classify_mysql_error(mysql_err.number(), &message) {
                        return mapped;
                    }
                }
                db_err
                    .code()
                    .and_then(|state| classify_sql_state(&state, &message))
                    .unwrap_or_else(|| DbError::internal(format!("Database error: {}", message)))
            }
            sqlx::Error::PoolTimedOut => {
                DbError::pool_exhausted("timed out waiting for a free connection")
            }
            sqlx::Error::PoolClosed => DbError::unavailable("connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::unavailable(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::unavailable(format!("TLS error: {}", tls_err)),
            sqlx::Error::Configuration(msg) => {
                DbError::unavailable(format!("Invalid connection configuration: {}", msg))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

/// Structured error returned to the caller in place of a result document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl From<&DbError> for ErrorReport {
    fn from(err: &DbError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message(),
            retriable: err.is_retryable(),
        }
    }
}

impl From<DbError> for ErrorReport {
    fn from(err: DbError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::unavailable("connection refused");
        assert!(err.to_string().contains("Database unavailable"));
        assert_eq!(err.message(), "connection refused");
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query execution", 50).is_retryable());
        assert!(DbError::pool_exhausted("busy").is_retryable());
        assert!(DbError::unavailable("down").is_retryable());
        assert!(!DbError::canceled("query execution").is_retryable());
        assert!(!DbError::policy_denied("no", "DELETE").is_retryable());
        assert!(!DbError::internal("bug").is_retryable());
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::PolicyDenied).unwrap();
        assert_eq!(json, "\"POLICY_DENIED\"");
        let json = serde_json::to_string(&ErrorKind::DbUnavailable).unwrap();
        assert_eq!(json, "\"DB_UNAVAILABLE\"");
        assert_eq!(ErrorKind::ResultTooLarge.as_str(), "RESULT_TOO_LARGE");
    }

    #[test]
    fn test_report_from_policy_denied() {
        let err = DbError::policy_denied("write statement not allowed: DELETE", "DELETE");
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, ErrorKind::PolicyDenied);
        assert_eq!(report.message, "write statement not allowed: DELETE");
        assert!(!report.retriable);
    }

    #[test]
    fn test_report_from_timeout() {
        let report = ErrorReport::from(DbError::timeout("query execution", 50));
        assert_eq!(report.kind, ErrorKind::Timeout);
        assert!(report.retriable);
        assert!(report.message.contains("50ms"));
    }

    #[test]
    fn test_mysql_error_numbers() {
        let cases = [
            (1064, ErrorKind::SyntaxError),
            (1146, ErrorKind::ObjectNotFound),
            (1049, ErrorKind::ObjectNotFound),
            (1045, ErrorKind::PermissionDenied),
            (1142, ErrorKind::PermissionDenied),
            (3024, ErrorKind::Timeout),
            (1317, ErrorKind::Canceled),
            (2013, ErrorKind::DbUnavailable),
        ];
        for (number, kind) in cases {
            let err = classify_mysql_error(number, "msg").unwrap();
            assert_eq!(err.kind(), kind, "error number {}", number);
        }
        assert!(classify_mysql_error(1213, "deadlock").is_none());
    }

    #[test]
    fn test_mysql_error_preserves_message() {
        let err = classify_mysql_error(1146, "Table 'testdb.nope' doesn't exist").unwrap();
        assert_eq!(err.message(), "Table 'testdb.nope' doesn't exist");
    }

    #[test]
    fn test_sql_state_fallback() {
        assert_eq!(
            classify_sql_state("42S02", "x").unwrap().kind(),
            ErrorKind::ObjectNotFound
        );
        assert_eq!(
            classify_sql_state("42000", "x").unwrap().kind(),
            ErrorKind::SyntaxError
        );
        assert!(classify_sql_state("HY000", "x").is_none());
    }

    #[test]
    fn test_sqlx_pool_errors() {
        assert_eq!(
            DbError::from(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::PoolExhausted
        );
        assert_eq!(
            DbError::from(sqlx::Error::PoolClosed).kind(),
            ErrorKind::DbUnavailable
        );
    }

    #[test]
    fn test_unknown_sqlx_error_is_internal() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("no rows"));
    }

    #[test]
    fn test_result_too_large_message() {
        let err = DbError::result_too_large(1000, 2500);
        assert_eq!(err.kind(), ErrorKind::ResultTooLarge);
        assert!(err.message().contains("kB"));
    }

    #[test]
    fn test_interrupts_connection() {
        assert!(DbError::timeout("q", 1).interrupts_connection());
        assert!(DbError::canceled("q").interrupts_connection());
        assert!(DbError::result_too_large(10, 20).interrupts_connection());
        assert!(DbError::internal("ragged row").interrupts_connection());
        assert!(!DbError::syntax("bad", Some(1064)).interrupts_connection());
        assert!(!DbError::object_not_found("gone", Some(1146)).interrupts_connection());
    }

    #[test]
    fn test_server_timeout_keeps_message_and_connection() {
        let message = "Query execution was interrupted, maximum statement execution time exceeded";
        let err = classify_mysql_error(3024, message).unwrap();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.message(), message);
        assert!(err.is_retryable());
        assert!(!err.interrupts_connection());

        let err = classify_mysql_error(1317, "Query execution was interrupted").unwrap();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(err.message(), "Query execution was interrupted");
        assert!(!err.interrupts_connection());
    }
}
