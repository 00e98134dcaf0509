//! SQL statement validation for read-only enforcement.
//!
//! Statements are classified from their token prefix rather than a full
//! grammar. The text is tokenized with [sqlparser]'s MySQL dialect so that
//! quoted strings, backtick identifiers and comments never contribute a
//! keyword; the first keyword then decides whether the statement may run.
//!
//! Only `SELECT`, `WITH ... SELECT`, a fixed family of `SHOW` forms,
//! `DESCRIBE`/`DESC`, plan-only `EXPLAIN` and `USE` pass. Everything else is
//! refused with a message naming the offending keyword.

use crate::error::{DbError, DbResult};
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer, Whitespace};

/// Kind of an accepted statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Show,
    Describe,
    Explain,
    /// Accepted by the classifier, refused by `run_query`.
    Use,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Show => "SHOW",
            Self::Describe => "DESCRIBE",
            Self::Explain => "EXPLAIN",
            Self::Use => "USE",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement that passed the read-only policy.
///
/// `sql` is exactly the text handed to the driver: trimmed, with a single
/// trailing terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    pub sql: String,
    pub kind: StatementKind,
}

/// Category of a refused leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// INSERT, UPDATE, DELETE, REPLACE, LOAD
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE, RENAME
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT, RELEASE, START, XA
    Transaction,
    /// CALL, DO, EXECUTE, PREPARE, DEALLOCATE
    ProcedureCall,
    /// GRANT, REVOKE, SET, LOCK, UNLOCK, HANDLER, KILL, FLUSH, ...
    Administrative,
    Unknown,
}

/// Error message prefixes for each statement type category.
mod error_messages {
    pub const DML_WRITE: &str = "write statement not allowed";
    pub const DDL: &str = "schema change not allowed";
    pub const TRANSACTION: &str = "transaction control not allowed";
    pub const PROCEDURE: &str = "procedure call not allowed";
    pub const ADMINISTRATIVE: &str = "administrative statement not allowed";
    pub const UNKNOWN: &str = "statement not allowed";
    pub const SHOW_VARIANT: &str = "SHOW variant not allowed";
    pub const SELECT_INTO: &str = "SELECT ... INTO not allowed";
    pub const EXPLAIN_ANALYZE: &str = "EXPLAIN ANALYZE not allowed: it executes the statement";
    pub const EXECUTABLE_COMMENT: &str = "executable comment not allowed: /*! ... */";
    pub const ASSIGNMENT: &str = "variable assignment not allowed: :=";
    pub const EMPTY: &str = "statement is empty";
    pub const COMMENT_ONLY: &str = "statement contains only comments";
    pub const MULTI: &str = "multiple statements are not allowed";
}

/// Categorize a leading keyword that is not on the allow list.
pub fn categorize_keyword(keyword: &str) -> SqlStatementType {
    match keyword {
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "LOAD" | "MERGE" => SqlStatementType::DmlWrite,
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" => SqlStatementType::Ddl,
        "START" | "BEGIN" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "XA" => {
            SqlStatementType::Transaction
        }
        "CALL" | "DO" | "EXECUTE" | "PREPARE" | "DEALLOCATE" => SqlStatementType::ProcedureCall,
        "GRANT" | "REVOKE" | "SET" | "LOCK" | "UNLOCK" | "HANDLER" | "KILL" | "FLUSH"
        | "RESET" | "PURGE" | "INSTALL" | "UNINSTALL" | "OPTIMIZE" | "ANALYZE" | "REPAIR"
        | "CHECK" | "CHECKSUM" | "SHUTDOWN" | "RESTART" | "CLONE" | "CACHE" | "BINLOG"
        | "CHANGE" | "STOP" => SqlStatementType::Administrative,
        _ => SqlStatementType::Unknown,
    }
}

fn deny_keyword(keyword: &str) -> DbError {
    let prefix = match categorize_keyword(keyword) {
        SqlStatementType::DmlWrite => error_messages::DML_WRITE,
        SqlStatementType::Ddl => error_messages::DDL,
        SqlStatementType::Transaction => error_messages::TRANSACTION,
        SqlStatementType::ProcedureCall => error_messages::PROCEDURE,
        SqlStatementType::Administrative => error_messages::ADMINISTRATIVE,
        SqlStatementType::Unknown => error_messages::UNKNOWN,
    };
    DbError::policy_denied(format!("{}: {}", prefix, keyword), keyword)
}

/// Validate SQL for read-only execution.
///
/// # Examples
///
/// ```
/// use mysql_gateway::tools::sql_validator::{validate_readonly, StatementKind};
///
/// let stmt = validate_readonly("select 1;").unwrap();
/// assert_eq!(stmt.kind, StatementKind::Select);
/// assert_eq!(stmt.sql, "select 1");
///
/// assert!(validate_readonly("DELETE FROM users").is_err());
/// ```
pub fn validate_readonly(sql: &str) -> DbResult<ValidatedStatement> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(DbError::empty_statement(error_messages::EMPTY));
    }

    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, trimmed)
        .tokenize_with_location()
        .map_err(|e| DbError::syntax(format!("failed to tokenize statement: {}", e), None))?;

    if let Some(marker) = executable_comment(trimmed, &tokens) {
        return Err(DbError::policy_denied(error_messages::EXECUTABLE_COMMENT, marker));
    }

    let significant: Vec<&TokenWithSpan> =
        tokens.iter().filter(|t| !is_trivia(&t.token)).collect();
    if significant.is_empty() {
        return Err(DbError::empty_statement(error_messages::COMMENT_ONLY));
    }

    let (body, sql_text) =
        match significant.iter().position(|t| t.token == Token::SemiColon) {
            None => (&significant[..], trimmed),
            Some(idx) if idx + 1 == significant.len() => {
                let end = byte_offset(trimmed, significant[idx].span.start);
                (&significant[..idx], trimmed[..end].trim_end())
            }
            Some(_) => return Err(DbError::multi_statement(error_messages::MULTI)),
        };
    if body.is_empty() {
        return Err(DbError::empty_statement(error_messages::EMPTY));
    }

    let body: Vec<&Token> = body.iter().map(|t| &t.token).collect();
    let kind = classify_tokens(&body)?;

    Ok(ValidatedStatement {
        sql: sql_text.to_string(),
        kind,
    })
}

/// Whitespace and comments never decide a classification.
fn is_trivia(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_) | Token::EOF)
}

/// Comment openers the server runs as SQL: MySQL `/*!` and MariaDB `/*M!`.
const EXECUTABLE_MARKERS: [&str; 2] = ["/*!", "/*M!"];

fn is_executable_body(body: &str) -> bool {
    body.starts_with('!') || body.starts_with("M!")
}

fn is_executable_comment(token: &Token) -> bool {
    matches!(token, Token::Whitespace(Whitespace::MultiLineComment(c)) if is_executable_body(c))
}

/// Tokens whose text the server never executes.
fn is_inert(token: &Token) -> bool {
    match token {
        Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::HexStringLiteral(_)
        | Token::Whitespace(Whitespace::SingleLineComment { .. }) => true,
        Token::Whitespace(Whitespace::MultiLineComment(c)) => !is_executable_body(c),
        Token::Word(w) => w.quote_style.is_some(),
        _ => false,
    }
}

/// Marker of an executable comment outside literals and ordinary comments,
/// whether the tokenizer kept it as a comment or expanded its contents.
fn executable_comment(text: &str, tokens: &[TokenWithSpan]) -> Option<&'static str> {
    let kept = tokens.iter().find_map(|t| match &t.token {
        Token::Whitespace(Whitespace::MultiLineComment(c)) if c.starts_with("M!") => Some("/*M!"),
        token if is_executable_comment(token) => Some("/*!"),
        _ => None,
    });
    if kept.is_some() {
        return kept;
    }

    let inert: Vec<(usize, usize)> = tokens
        .iter()
        .filter(|t| is_inert(&t.token))
        .map(|t| (byte_offset(text, t.span.start), byte_offset(text, t.span.end)))
        .collect();
    EXECUTABLE_MARKERS.into_iter().find(|marker| {
        text.match_indices(marker)
            .any(|(pos, _)| !inert.iter().any(|(start, end)| *start <= pos && pos < *end))
    })
}

/// Unquoted word, uppercased. Quoted identifiers are never keywords.
fn keyword_of(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
        _ => None,
    }
}

/// Convert a tokenizer location (1-based line and character column) into a
/// byte offset within `text`.
fn byte_offset(text: &str, location: Location) -> usize {
    let (mut line, mut column) = (1u64, 1u64);
    for (offset, ch) in text.char_indices() {
        if line == location.line && column == location.column {
            return offset;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    text.len()
}

fn classify_tokens(body: &[&Token]) -> DbResult<StatementKind> {
    // `(SELECT ...) UNION (SELECT ...)` leads with parentheses
    let start = body
        .iter()
        .position(|t| **t != Token::LParen)
        .unwrap_or(body.len());
    let Some(first) = body.get(start) else {
        return Err(DbError::empty_statement(error_messages::EMPTY));
    };
    let Some(keyword) = keyword_of(first) else {
        return Err(deny_keyword(&first.to_string()));
    };
    let rest = &body[start + 1..];

    match keyword.as_str() {
        "SELECT" => {
            check_select_into(body)?;
            Ok(StatementKind::Select)
        }
        "WITH" => {
            classify_with(rest)?;
            check_select_into(body)?;
            Ok(StatementKind::Select)
        }
        "SHOW" => classify_show(rest),
        "DESCRIBE" | "DESC" | "EXPLAIN" => classify_explain(&keyword, rest),
        "USE" => Ok(StatementKind::Use),
        _ => Err(deny_keyword(&keyword)),
    }
}

/// Refuse `SELECT ... INTO OUTFILE|DUMPFILE|@var` and `@var := expr`, both
/// of which leave state behind on a pooled connection.
fn check_select_into(body: &[&Token]) -> DbResult<()> {
    if body
        .iter()
        .any(|t| keyword_of(t).as_deref() == Some("INTO"))
    {
        return Err(DbError::policy_denied(error_messages::SELECT_INTO, "INTO"));
    }
    if body.iter().any(|t| **t == Token::Assignment) {
        return Err(DbError::policy_denied(error_messages::ASSIGNMENT, ":="));
    }
    Ok(())
}

/// Find the statement that follows a CTE list and require it to be a SELECT.
fn classify_with(rest: &[&Token]) -> DbResult<()> {
    let mut depth = 0usize;
    let mut after_cte = false;
    for token in rest {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.saturating_sub(1);
                after_cte = depth == 0;
            }
            Token::Comma if depth == 0 => after_cte = false,
            // `name (a, b) AS (...)`: the closed list was a column list
            _ if depth == 0 && after_cte && keyword_of(token).as_deref() == Some("AS") => {
                after_cte = false;
            }
            // main statement, possibly wrapped: `WITH x AS (...) (SELECT ...)`
            _ if after_cte && depth <= 1 => {
                let keyword = keyword_of(token).unwrap_or_else(|| token.to_string());
                if keyword == "SELECT" {
                    return Ok(());
                }
                return Err(deny_keyword(&keyword));
            }
            _ => {}
        }
    }
    Err(DbError::policy_denied(
        format!("{}: WITH without a SELECT", error_messages::UNKNOWN),
        "WITH",
    ))
}

fn classify_show(rest: &[&Token]) -> DbResult<StatementKind> {
    let collected: Vec<String> = rest.iter().take(3).filter_map(|t| keyword_of(t)).collect();
    let mut words = collected.iter().map(String::as_str).peekable();

    // SHOW [EXTENDED] [FULL] {TABLES|COLUMNS|FIELDS} ...
    let mut head = words.next();
    if head == Some("EXTENDED") {
        head = words.next();
    }
    if head == Some("FULL") {
        head = words.next();
        if matches!(head, Some("TABLES" | "COLUMNS" | "FIELDS")) {
            return Ok(StatementKind::Show);
        }
        return Err(deny_show(rest));
    }

    let allowed = match head {
        Some("DATABASES" | "SCHEMAS" | "TABLES" | "COLUMNS" | "FIELDS" | "INDEX" | "INDEXES"
        | "KEYS") => true,
        Some("CREATE") => words.peek() == Some(&"TABLE"),
        Some("TABLE") => words.peek() == Some(&"STATUS"),
        _ => false,
    };
    if allowed {
        Ok(StatementKind::Show)
    } else {
        Err(deny_show(rest))
    }
}

fn deny_show(rest: &[&Token]) -> DbError {
    let variant: Vec<String> = rest
        .iter()
        .take(2)
        .map(|t| keyword_of(t).unwrap_or_else(|| t.to_string()))
        .collect();
    let keyword = format!("SHOW {}", variant.join(" ")).trim_end().to_string();
    DbError::policy_denied(
        format!("{}: {}", error_messages::SHOW_VARIANT, keyword),
        keyword,
    )
}

fn classify_explain(keyword: &str, rest: &[&Token]) -> DbResult<StatementKind> {
    let mut idx = 0;
    let mut explain_form = keyword == "EXPLAIN";

    while let Some(token) = rest.get(idx) {
        match keyword_of(token).as_deref() {
            Some("ANALYZE") => {
                return Err(DbError::policy_denied(
                    error_messages::EXPLAIN_ANALYZE,
                    "ANALYZE",
                ));
            }
            Some("EXTENDED" | "PARTITIONS") => idx += 1,
            Some("FORMAT") => {
                // FORMAT = {TRADITIONAL|JSON|TREE}
                explain_form = true;
                idx += 1;
                if rest.get(idx) == Some(&&Token::Eq) {
                    idx += 1;
                }
                idx += 1;
            }
            _ => break,
        }
    }

    let plain = if explain_form {
        StatementKind::Explain
    } else {
        StatementKind::Describe
    };
    if idx >= rest.len() {
        return Ok(plain);
    }

    // Skip parentheses around an explained statement
    let inner_start = rest[idx..]
        .iter()
        .position(|t| **t != Token::LParen)
        .map(|p| idx + p);
    let inner = inner_start.and_then(|i| keyword_of(rest[i]));

    match inner.as_deref() {
        Some("SELECT" | "TABLE") => {
            check_select_into(&rest[idx..])?;
            Ok(StatementKind::Explain)
        }
        Some("WITH") => {
            let after = inner_start.map(|i| &rest[i + 1..]).unwrap_or(&[]);
            classify_with(after)?;
            check_select_into(&rest[idx..])?;
            Ok(StatementKind::Explain)
        }
        Some("FOR") => Ok(StatementKind::Explain),
        Some(word) if categorize_keyword(word) != SqlStatementType::Unknown => {
            Err(deny_keyword(word))
        }
        _ => Ok(plain),
    }
}
