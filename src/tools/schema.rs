//! Canned metadata statements.
//!
//! The metadata tools never interpolate caller text into SQL without first
//! validating it as an [`Identifier`]. Names are qualified inline
//! (`SHOW TABLES FROM \`db\``) so no statement depends on session state left
//! by a previous `USE`.

use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{QueryOptions, ResultDocument};
use crate::tools::sql_validator::StatementKind;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// MySQL's limit on database and table name length.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// A database or table name that is safe to splice into a canned statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validate `value` as a name of kind `what` ("database", "table").
    pub fn parse(what: &str, value: &str) -> DbResult<Self> {
        if value.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER_RE.is_match(value) {
            return Err(DbError::invalid_identifier(what, value));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backtick-quoted form.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse an optional database name; empty strings count as absent.
pub fn optional_database(value: Option<&str>) -> DbResult<Option<Identifier>> {
    match value {
        Some(v) if !v.is_empty() => Identifier::parse("database", v).map(Some),
        _ => Ok(None),
    }
}

/// Metadata statements issued on behalf of the tool verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CannedStatement {
    ListDatabases,
    ListTables {
        database: Option<Identifier>,
    },
    DescribeTable {
        database: Option<Identifier>,
        table: Identifier,
    },
    ShowCreateTable {
        database: Option<Identifier>,
        table: Identifier,
    },
}

impl CannedStatement {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListDatabases => "list_databases",
            Self::ListTables { .. } => "list_tables",
            Self::DescribeTable { .. } => "describe_table",
            Self::ShowCreateTable { .. } => "show_create_table",
        }
    }

    /// Kind the classifier must assign to [`sql`](Self::sql).
    pub fn expected_kind(&self) -> StatementKind {
        match self {
            Self::ListDatabases | Self::ListTables { .. } | Self::ShowCreateTable { .. } => {
                StatementKind::Show
            }
            Self::DescribeTable { .. } => StatementKind::Describe,
        }
    }

    pub fn sql(&self) -> String {
        match self {
            Self::ListDatabases => "SHOW DATABASES".to_string(),
            Self::ListTables { database: None } => "SHOW TABLES".to_string(),
            Self::ListTables { database: Some(db) } => format!("SHOW TABLES FROM {}", db.quoted()),
            Self::DescribeTable { database, table } => {
                format!("DESCRIBE {}", qualified(database.as_ref(), table))
            }
            Self::ShowCreateTable { database, table } => {
                format!("SHOW CREATE TABLE {}", qualified(database.as_ref(), table))
            }
        }
    }
}

fn qualified(database: Option<&Identifier>, table: &Identifier) -> String {
    match database {
        Some(db) => format!("{}.{}", db.quoted(), table.quoted()),
        None => table.quoted(),
    }
}

/// Input for the list_databases tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListDatabasesInput {}

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Database to list. Defaults to the database named in the DSN.
    #[serde(default, alias = "database")]
    pub db: Option<String>,
}

/// Input for the describe_table and show_create_table tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableInput {
    /// Database containing the table. Defaults to the database named in the DSN.
    #[serde(default, alias = "database")]
    pub db: Option<String>,
    /// Table name (letters, digits and underscores only).
    pub table: String,
}

impl TableInput {
    fn identifiers(&self) -> DbResult<(Option<Identifier>, Identifier)> {
        let database = optional_database(self.db.as_deref())?;
        let table = Identifier::parse("table", &self.table)?;
        Ok((database, table))
    }
}

/// Handler for the metadata tools.
#[derive(Debug, Clone)]
pub struct SchemaToolHandler {
    executor: Arc<QueryExecutor>,
}

impl SchemaToolHandler {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    pub async fn list_databases(
        &self,
        _input: ListDatabasesInput,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        info!("Tool: list_databases");
        self.run(CannedStatement::ListDatabases, caller).await
    }

    pub async fn list_tables(
        &self,
        input: ListTablesInput,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        info!(db = ?input.db, "Tool: list_tables");
        let database = optional_database(input.db.as_deref())?;
        self.run(CannedStatement::ListTables { database }, caller)
            .await
    }

    pub async fn describe_table(
        &self,
        input: TableInput,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        info!(db = ?input.db, table = %input.table, "Tool: describe_table");
        let (database, table) = input.identifiers()?;
        self.run(CannedStatement::DescribeTable { database, table }, caller)
            .await
    }

    pub async fn show_create_table(
        &self,
        input: TableInput,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        info!(db = ?input.db, table = %input.table, "Tool: show_create_table");
        let (database, table) = input.identifiers()?;
        self.run(CannedStatement::ShowCreateTable { database, table }, caller)
            .await
    }

    async fn run(
        &self,
        canned: CannedStatement,
        caller: Option<CancellationToken>,
    ) -> DbResult<ResultDocument> {
        self.executor
            .execute_canned(&canned, &QueryOptions::default(), caller)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tools::sql_validator::validate_readonly;

    fn ident(s: &str) -> Identifier {
        Identifier::parse("table", s).unwrap()
    }

    #[test]
    fn test_identifier_accepts_word_chars() {
        assert_eq!(ident("users").as_str(), "users");
        assert_eq!(ident("Order_Items_2024").quoted(), "`Order_Items_2024`");
    }

    #[test]
    fn test_identifier_rejects_injection() {
        for bad in [
            "",
            "users; DROP TABLE x",
            "a`b",
            "db.table",
            "name with space",
            "naïve",
            "x'--",
        ] {
            let err = Identifier::parse("table", bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{bad:?}");
        }
    }

    #[test]
    fn test_identifier_length_limit() {
        assert!(Identifier::parse("table", &"a".repeat(64)).is_ok());
        let err = Identifier::parse("table", &"a".repeat(65)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
    }

    #[test]
    fn test_optional_database() {
        assert_eq!(optional_database(None).unwrap(), None);
        assert_eq!(optional_database(Some("")).unwrap(), None);
        assert!(optional_database(Some("bad-name")).is_err());
    }

    #[test]
    fn test_table_input_accepts_db_alias() {
        let input: TableInput =
            serde_json::from_value(serde_json::json!({"database": "testdb", "table": "users"}))
                .unwrap();
        assert_eq!(input.db.as_deref(), Some("testdb"));

        let input: TableInput =
            serde_json::from_value(serde_json::json!({"db": "testdb", "table": "users"})).unwrap();
        let (database, table) = input.identifiers().unwrap();
        assert_eq!(database.unwrap().as_str(), "testdb");
        assert_eq!(table.as_str(), "users");
    }

    #[test]
    fn test_table_input_validates_both_names() {
        let input = TableInput {
            db: Some("test-db".into()),
            table: "users".into(),
        };
        let err = input.identifiers().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert!(err.message().contains("database 'test-db'"));

        let input = TableInput {
            db: None,
            table: "users`; DROP".into(),
        };
        let err = input.identifiers().unwrap_err();
        assert!(err.message().contains("table"));
    }

    #[test]
    fn test_canned_sql() {
        let db = Some(Identifier::parse("database", "testdb").unwrap());
        assert_eq!(CannedStatement::ListDatabases.sql(), "SHOW DATABASES");
        assert_eq!(
            CannedStatement::ListTables { database: None }.sql(),
            "SHOW TABLES"
        );
        assert_eq!(
            CannedStatement::ListTables {
                database: db.clone()
            }
            .sql(),
            "SHOW TABLES FROM `testdb`"
        );
        assert_eq!(
            CannedStatement::DescribeTable {
                database: db.clone(),
                table: ident("users")
            }
            .sql(),
            "DESCRIBE `testdb`.`users`"
        );
        assert_eq!(
            CannedStatement::ShowCreateTable {
                database: None,
                table: ident("users")
            }
            .sql(),
            "SHOW CREATE TABLE `users`"
        );
    }

    #[test]
    fn test_canned_statements_pass_classifier() {
        let db = Some(Identifier::parse("database", "testdb").unwrap());
        let statements = [
            CannedStatement::ListDatabases,
            CannedStatement::ListTables { database: None },
            CannedStatement::ListTables {
                database: db.clone(),
            },
            CannedStatement::DescribeTable {
                database: db.clone(),
                table: ident("users"),
            },
            CannedStatement::DescribeTable {
                database: None,
                table: ident("select"),
            },
            CannedStatement::ShowCreateTable {
                database: db,
                table: ident("users"),
            },
        ];
        for canned in statements {
            let validated = validate_readonly(&canned.sql()).unwrap();
            assert_eq!(validated.kind, canned.expected_kind(), "{}", canned.sql());
            assert_eq!(validated.sql, canned.sql());
        }
    }
}
