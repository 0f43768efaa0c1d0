/// Utility functions for SQL text: statement classification, guardrails and placeholder handling
use crate::{
    config::Driver,
    result::{BridgeError, Result},
    values::SqlValue,
};
use regex::Regex;
use std::fmt;

// Regexes compiled once as lazy statics
static LEADING_COMMAND_REGEX: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:(?:--[^\n]*(?:\n|$)|/\*.*?\*/)\s*)*([A-Za-z]+)").unwrap()
});
static WHERE_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static QUOTED_NONE_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r#"'None'|"None""#).unwrap());
static BARE_NONE_REGEX: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"\bNone\b").unwrap());
static IDENTIFIER_REGEX: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

/// The leading verb of a statement, which decides guardrails and the result shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlCommand {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Other(String),
}

impl SqlCommand {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_uppercase().as_str() {
            "SELECT" => SqlCommand::Select,
            "INSERT" => SqlCommand::Insert,
            "UPDATE" => SqlCommand::Update,
            "DELETE" => SqlCommand::Delete,
            "CREATE" => SqlCommand::Create,
            "DROP" => SqlCommand::Drop,
            other => SqlCommand::Other(other.to_string()),
        }
    }

    /// INSERT/UPDATE/DELETE are announced unless the caller asks for quiet
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            SqlCommand::Insert | SqlCommand::Update | SqlCommand::Delete
        )
    }
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlCommand::Select => write!(f, "SELECT"),
            SqlCommand::Insert => write!(f, "INSERT"),
            SqlCommand::Update => write!(f, "UPDATE"),
            SqlCommand::Delete => write!(f, "DELETE"),
            SqlCommand::Create => write!(f, "CREATE"),
            SqlCommand::Drop => write!(f, "DROP"),
            SqlCommand::Other(keyword) => write!(f, "{keyword}"),
        }
    }
}

/// Classify a statement by its first word, skipping leading comments
pub fn leading_command(sql: &str) -> SqlCommand {
    LEADING_COMMAND_REGEX
        .captures(sql)
        .and_then(|cap| cap.get(1))
        .map(|m| SqlCommand::from_keyword(m.as_str()))
        .unwrap_or_else(|| SqlCommand::Other(String::new()))
}

/// Replace `'None'`, `"None"` and bare `None` tokens with SQL `NULL`
pub fn replace_none_with_null(sql: &str) -> String {
    let sql = QUOTED_NONE_REGEX.replace_all(sql, "NULL");
    BARE_NONE_REGEX.replace_all(&sql, "NULL").trim().to_string()
}

/// Reject CREATE/DROP, and UPDATE/DELETE without a WHERE clause
pub fn check_permissions(sql: &str, command: &SqlCommand) -> Result<()> {
    match command {
        SqlCommand::Create | SqlCommand::Drop => Err(BridgeError::Permission(format!(
            "Disallowed DDL: {sql}"
        ))),
        SqlCommand::Update | SqlCommand::Delete if !WHERE_REGEX.is_match(sql) => Err(
            BridgeError::Permission(format!("UPDATE/DELETE requires WHERE clause: {sql}")),
        ),
        _ => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Lexeme {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Rewrite `%s` placeholders in code with `placeholder(n)` (1-based) and unescape `%%`.
/// Quoted literals and comments are copied through untouched apart from `%%`.
/// Backslash escapes inside literals only exist on MySQL; elsewhere a doubled quote is the escape.
fn rewrite_placeholders(
    sql: &str,
    backslash_escapes: bool,
    mut placeholder: impl FnMut(usize) -> String,
) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut state = Lexeme::Code;
    let mut next_idx = 1;

    while let Some(ch) = chars.next() {
        if ch == '%' && chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        match state {
            Lexeme::Code => match ch {
                '\'' | '"' | '`' => state = Lexeme::Quoted(ch),
                '-' if chars.peek() == Some(&'-') => state = Lexeme::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("/*");
                    state = Lexeme::BlockComment;
                    continue;
                }
                '%' if chars.peek() == Some(&'s') => {
                    chars.next();
                    out.push_str(&placeholder(next_idx));
                    next_idx += 1;
                    continue;
                }
                _ => {}
            },
            Lexeme::Quoted(_) if ch == '\\' && backslash_escapes => {
                out.push(ch);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
                continue;
            }
            // A doubled quote closes and immediately reopens the literal
            Lexeme::Quoted(q) if ch == q => state = Lexeme::Code,
            Lexeme::LineComment if ch == '\n' => state = Lexeme::Code,
            Lexeme::BlockComment if ch == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                out.push_str("*/");
                state = Lexeme::Code;
                continue;
            }
            _ => {}
        }
        out.push(ch);
    }

    out
}

/// Translate `%s` placeholders into the driver's native syntax
pub fn translate_placeholders(sql: &str, driver: Driver) -> String {
    let backslash_escapes = driver == Driver::MySql;
    match driver {
        Driver::Sqlite => rewrite_placeholders(sql, backslash_escapes, |idx| format!("?{idx}")),
        Driver::Postgres => rewrite_placeholders(sql, backslash_escapes, |idx| format!("${idx}")),
        Driver::MySql => rewrite_placeholders(sql, backslash_escapes, |_| "?".to_string()),
    }
}

/// Inline parameter values into the statement for log output
pub fn render_sql(sql: &str, params: &[SqlValue], driver: Driver) -> String {
    rewrite_placeholders(sql, driver == Driver::MySql, |idx| {
        params
            .get(idx - 1)
            .map(SqlValue::to_sql_literal)
            .unwrap_or_else(|| "%s".to_string())
    })
}

/// Table and column names built into SQL must be plain identifiers, optionally `schema.name`
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(BridgeError::InvalidIdentifier(name.to_string()))
    }
}
