//! Named parameters and statement text handling.
//!
//! Statement text uses `@name` placeholders regardless of dialect. Before a
//! statement reaches the driver the placeholders are rewritten into the
//! dialect's positional form and the values are collected in binding order:
//!
//! | Dialect          | Placeholder | Repeated name       |
//! |------------------|-------------|---------------------|
//! | MySQL, SQLite    | `?`         | value bound again   |
//! | PostgreSQL       | `$n`        | same `$n` reused    |
//! | SQL Server       | `@Pn`       | same `@Pn` reused   |
//!
//! The scanner skips quoted strings, quoted identifiers, comments, `@@`
//! globals and PostgreSQL dollar quoting. Names missing from the parameter
//! object are left verbatim so the driver can report them (or treat them as
//! local variables on SQL Server).

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// Ordered named parameter values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, QueryParam)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build parameters from any serializable value whose JSON form is an
    /// object (a struct or a map). Field order is kept; `()` and `None` give
    /// an empty set.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> DbResult<Self> {
        let json = serde_json::to_value(value).map_err(|e| {
            DbError::invalid_input(format!("Parameters could not be serialized: {e}"))
        })?;
        match json {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(map) => Ok(Self {
                entries: map
                    .into_iter()
                    .map(|(name, value)| (name, QueryParam::from(value)))
                    .collect(),
            }),
            other => Err(DbError::invalid_input(format!(
                "Parameters must serialize to an object with named fields, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Add or replace a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<QueryParam>) {
        let name = name.into();
        let name = name.strip_prefix('@').map(String::from).unwrap_or(name);
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a parameter by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryParam)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Statement text after placeholder rewriting, with values in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Text,
    /// `@name`, range includes the `@`
    Named,
    /// top-level `;`
    Separator,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index just past the closing `close` byte, honouring doubled quotes and,
/// when `backslash` is set, backslash escapes.
fn skip_quoted(bytes: &[u8], open: usize, close: u8, backslash: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash && b == b'\\' {
            i += 2;
            continue;
        }
        if b == close {
            if bytes.get(i + 1) == Some(&close) && close != b']' {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_until(sql: &str, from: usize, needle: &str) -> usize {
    sql[from..]
        .find(needle)
        .map(|p| from + p + needle.len())
        .unwrap_or(sql.len())
}

/// PostgreSQL `$tag$ ... $tag$`; returns None when `$` does not open one.
fn skip_dollar_quote(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = open + 1;
    while i < bytes.len() && is_ident_char(bytes[i]) {
        i += 1;
    }
    if bytes.get(i) != Some(&b'$') || bytes.get(open + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag = &sql[open..=i];
    Some(skip_until(sql, i + 1, tag))
}

fn push_token(tokens: &mut Vec<Token>, text_start: &mut usize, kind: TokenKind, start: usize, end: usize) {
    if *text_start < start {
        tokens.push(Token {
            kind: TokenKind::Text,
            start: *text_start,
            end: start,
        });
    }
    tokens.push(Token { kind, start, end });
    *text_start = end;
}

fn tokenize(sql: &str, db_type: DatabaseType) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        i = match b {
            b'\'' => skip_quoted(bytes, i, b'\'', db_type == DatabaseType::MySQL),
            b'"' => skip_quoted(bytes, i, b'"', db_type == DatabaseType::MySQL),
            b'`' if matches!(db_type, DatabaseType::MySQL | DatabaseType::SQLite) => {
                skip_quoted(bytes, i, b'`', false)
            }
            b'[' if matches!(db_type, DatabaseType::Mssql | DatabaseType::SQLite) => {
                skip_quoted(bytes, i, b']', false)
            }
            b'-' if next == Some(b'-') => skip_until(sql, i, "\n"),
            b'#' if db_type == DatabaseType::MySQL => skip_until(sql, i, "\n"),
            b'/' if next == Some(b'*') => skip_until(sql, i + 2, "*/"),
            b'$' if db_type == DatabaseType::PostgreSQL => {
                skip_dollar_quote(sql, i).unwrap_or(i + 1)
            }
            b'@' if next == Some(b'@') => {
                let mut j = i + 2;
                while j < bytes.len() && is_ident_char(bytes[j]) {
                    j += 1;
                }
                j
            }
            b'@' if next.is_some_and(is_ident_start) => {
                let mut j = i + 1;
                while j < bytes.len() && is_ident_char(bytes[j]) {
                    j += 1;
                }
                push_token(&mut tokens, &mut text_start, TokenKind::Named, i, j);
                j
            }
            b';' => {
                push_token(&mut tokens, &mut text_start, TokenKind::Separator, i, i + 1);
                i + 1
            }
            _ => i + 1,
        };
    }
    if text_start < bytes.len() {
        tokens.push(Token {
            kind: TokenKind::Text,
            start: text_start,
            end: bytes.len(),
        });
    }
    tokens
}

/// Split text into statements at top-level `;`. Empty statements are dropped.
pub fn split_statements(sql: &str, db_type: DatabaseType) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    for token in tokenize(sql, db_type) {
        if token.kind == TokenKind::Separator {
            push_statement(&mut statements, &sql[start..token.start]);
            start = token.end;
        }
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

fn push_statement<'a>(statements: &mut Vec<&'a str>, text: &'a str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() && !is_only_comments(trimmed) {
        statements.push(trimmed);
    }
}

fn is_only_comments(text: &str) -> bool {
    let mut rest = text.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            return false;
        }
    }
}

/// Rewrite `@name` placeholders into the dialect's positional form.
pub fn rewrite(sql: &str, params: &Params, db_type: DatabaseType) -> BoundSql {
    if params.is_empty() {
        return BoundSql {
            sql: sql.to_string(),
            params: Vec::new(),
        };
    }

    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<QueryParam> = Vec::new();
    let mut numbered: Vec<String> = Vec::new();

    for token in tokenize(sql, db_type) {
        let text = &sql[token.start..token.end];
        if token.kind != TokenKind::Named {
            out.push_str(text);
            continue;
        }
        let name = &text[1..];
        let Some(value) = params.get(name) else {
            out.push_str(text);
            continue;
        };
        match db_type {
            DatabaseType::MySQL | DatabaseType::SQLite => {
                values.push(value.clone());
                out.push_str(&db_type.placeholder(values.len()));
            }
            DatabaseType::PostgreSQL | DatabaseType::Mssql => {
                let index = match numbered.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                    Some(pos) => pos + 1,
                    None => {
                        numbered.push(name.to_string());
                        values.push(value.clone());
                        values.len()
                    }
                };
                out.push_str(&db_type.placeholder(index));
            }
        }
    }

    BoundSql { sql: out, params: values }
}

/// Build the call text for a stored procedure. Arguments follow the
/// parameter object's field order.
pub fn procedure_call(name: &str, params: &Params, db_type: DatabaseType) -> DbResult<BoundSql> {
    let name = name.trim();
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || c == ';' || c == '(' || c == '\'')
    {
        return Err(DbError::invalid_input(format!(
            "Invalid stored procedure name: '{name}'"
        )));
    }

    let values: Vec<QueryParam> = params.iter().map(|(_, v)| v.clone()).collect();
    let sql = match db_type {
        DatabaseType::MySQL => {
            let args = vec!["?"; values.len()].join(", ");
            format!("CALL {name}({args})")
        }
        DatabaseType::PostgreSQL => {
            let args = params
                .iter()
                .enumerate()
                .map(|(i, (n, _))| format!("{n} => ${}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!("CALL {name}({args})")
        }
        DatabaseType::Mssql if values.is_empty() => format!("EXEC {name}"),
        DatabaseType::Mssql => {
            let args = params
                .iter()
                .enumerate()
                .map(|(i, (n, _))| format!("@{n} = @P{}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!("EXEC {name} {args}")
        }
        DatabaseType::SQLite => {
            return Err(DbError::invalid_input(
                "SQLite has no stored procedures",
            ));
        }
    };
    Ok(BoundSql { sql, params: values })
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind a parameter to a SQL Server query.
pub(crate) fn bind_mssql_param<'a>(query: &mut tiberius::Query<'a>, param: &'a QueryParam) {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
