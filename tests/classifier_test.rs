//! Read-only classification through the public API.
//!
//! No database is needed: every case here is decided before a connection
//! would be acquired.

use mysql_gateway::ErrorKind;
use mysql_gateway::tools::sql_validator::{StatementKind, validate_readonly};

fn accepted(sql: &str) -> StatementKind {
    match validate_readonly(sql) {
        Ok(stmt) => stmt.kind,
        Err(e) => panic!("expected {sql:?} to be accepted, got {e}"),
    }
}

fn refused(sql: &str) -> (ErrorKind, String) {
    match validate_readonly(sql) {
        Ok(stmt) => panic!("expected {sql:?} to be refused, got {:?}", stmt.kind),
        Err(e) => (e.kind(), e.message()),
    }
}

#[test]
fn test_read_statements_accepted() {
    let cases = [
        ("SELECT 1 AS one", StatementKind::Select),
        ("select 1", StatementKind::Select),
        ("SELECT * FROM testdb.users WHERE id = ?", StatementKind::Select),
        (
            "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent",
            StatementKind::Select,
        ),
        ("(SELECT 1) UNION ALL (SELECT 2)", StatementKind::Select),
        ("SHOW DATABASES", StatementKind::Show),
        ("SHOW TABLES FROM `testdb`", StatementKind::Show),
        ("SHOW FULL COLUMNS FROM users", StatementKind::Show),
        ("SHOW INDEX FROM users", StatementKind::Show),
        ("SHOW CREATE TABLE users", StatementKind::Show),
        ("SHOW TABLE STATUS LIKE 'u%'", StatementKind::Show),
        ("DESCRIBE users", StatementKind::Describe),
        ("DESC testdb.users", StatementKind::Describe),
        ("EXPLAIN SELECT * FROM users", StatementKind::Explain),
        ("EXPLAIN FORMAT=JSON SELECT 1", StatementKind::Explain),
        ("USE testdb", StatementKind::Use),
    ];
    for (sql, kind) in cases {
        assert_eq!(accepted(sql), kind, "{sql}");
    }
}

#[test]
fn test_write_statements_refused_with_keyword() {
    let cases = [
        ("DELETE FROM users", "write statement not allowed: DELETE"),
        ("insert into t values (1)", "write statement not allowed: INSERT"),
        ("UPDATE users SET name = 'x'", "write statement not allowed: UPDATE"),
        ("REPLACE INTO t VALUES (1)", "write statement not allowed: REPLACE"),
        ("DROP TABLE users", "schema change not allowed: DROP"),
        ("TRUNCATE TABLE users", "schema change not allowed: TRUNCATE"),
        ("BEGIN", "transaction control not allowed: BEGIN"),
        ("START TRANSACTION", "transaction control not allowed: START"),
        ("CALL do_things()", "procedure call not allowed: CALL"),
        ("GRANT ALL ON *.* TO x", "administrative statement not allowed: GRANT"),
        ("KILL 42", "administrative statement not allowed: KILL"),
    ];
    for (sql, message) in cases {
        let (kind, actual) = refused(sql);
        assert_eq!(kind, ErrorKind::PolicyDenied, "{sql}");
        assert_eq!(actual, message, "{sql}");
    }
}

#[test]
fn test_comment_only_is_empty_statement() {
    for sql in ["-- just a comment", "/* nothing */", "# hash comment", "  ;  "] {
        let (kind, _) = refused(sql);
        assert_eq!(kind, ErrorKind::EmptyStatement, "{sql:?}");
    }
    assert_eq!(refused("").0, ErrorKind::EmptyStatement);
}

#[test]
fn test_hidden_second_statement() {
    let (kind, _) = refused("SELECT /* comment */ ; DROP TABLE t");
    assert_eq!(kind, ErrorKind::MultiStatement);

    let (kind, _) = refused("SELECT 1; SELECT 2");
    assert_eq!(kind, ErrorKind::MultiStatement);

    let (kind, _) = refused("SELECT 1;;");
    assert_eq!(kind, ErrorKind::MultiStatement);
}

#[test]
fn test_keywords_inside_literals_ignored() {
    assert_eq!(
        accepted("SELECT 'DELETE FROM users; DROP TABLE x' AS s"),
        StatementKind::Select
    );
    assert_eq!(
        accepted("SELECT `delete`, \"update\" FROM t -- ; DROP TABLE t"),
        StatementKind::Select
    );
    assert_eq!(
        accepted("SELECT 1 /* ; DELETE FROM t */"),
        StatementKind::Select
    );
}

#[test]
fn test_leading_comment_does_not_hide_keyword() {
    let (kind, message) = refused("/* harmless */ DELETE FROM users");
    assert_eq!(kind, ErrorKind::PolicyDenied);
    assert_eq!(message, "write statement not allowed: DELETE");

    let (kind, _) = refused("-- note\nUPDATE t SET a = 1");
    assert_eq!(kind, ErrorKind::PolicyDenied);
}

#[test]
fn test_trailing_terminator_removed_from_text() {
    let stmt = validate_readonly("  SELECT * FROM users ;  ").unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users");

    let stmt = validate_readonly("SELECT 'a;b'").unwrap();
    assert_eq!(stmt.sql, "SELECT 'a;b'");
}

#[test]
fn test_side_effecting_reads_refused() {
    for sql in [
        "SELECT * FROM users INTO OUTFILE '/tmp/x'",
        "SELECT 1 INTO @v",
        "EXPLAIN ANALYZE SELECT * FROM users",
        "EXPLAIN DELETE FROM users",
        "WITH x AS (SELECT 1) DELETE FROM users",
        "SELECT /*!50000 SLEEP(1) */ 1",
        "SHOW GRANTS",
        "SHOW PROCESSLIST",
        "SHOW CREATE USER root",
    ] {
        let (kind, _) = refused(sql);
        assert_eq!(kind, ErrorKind::PolicyDenied, "{sql}");
    }
}

#[test]
fn test_unterminated_quote_is_syntax_error() {
    let (kind, _) = refused("SELECT 'unterminated");
    assert_eq!(kind, ErrorKind::SyntaxError);
}
