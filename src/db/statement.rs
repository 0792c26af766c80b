//! Statements and their prepared, dialect-specific form.
//!
//! A [`Statement`] is what commands and queries build: SQL text (or a stored
//! procedure name) carrying the schema placeholder and `@name` parameters.
//! The session turns it into a [`Prepared`] for the context's dialect by
//! substituting the schema once and rewriting placeholders.

use crate::db::params::{self, BoundSql, Params};
use crate::db::template::{self, SqlTemplate};
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, DatabaseType, MAX_QUERY_TIMEOUT_SECS, QueryParam};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;

/// SQL text or procedure name plus named parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    text: Cow<'static, str>,
    params: Params,
    kind: CommandKind,
    timeout: Option<Duration>,
}

impl Statement {
    /// Inline SQL text.
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            text: sql.into(),
            params: Params::new(),
            kind: CommandKind::Text,
            timeout: None,
        }
    }

    /// A stored procedure invocation; parameters become its arguments.
    pub fn procedure(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            ..Self::new(name)
        }
    }

    /// Statement text from a registered template.
    pub fn template(template: &SqlTemplate) -> Self {
        Self::new(template.text)
    }

    /// Bind every field of a serializable parameter object.
    pub fn with_params<P: Serialize + ?Sized>(mut self, params: &P) -> DbResult<Self> {
        self.params = Params::from_serialize(params)?;
        Ok(self)
    }

    pub fn bind(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.params.set(name, value);
        self
    }

    /// Per-statement timeout, capped at the maximum statement timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.min(Duration::from_secs(MAX_QUERY_TIMEOUT_SECS as u64)));
        self
    }

    pub fn sql(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// Substitute the schema and rewrite parameters for `db_type`.
    pub(crate) fn prepare(&self, db_type: DatabaseType, schema: Option<&str>) -> DbResult<Prepared> {
        let text = template::apply(&self.text, schema);

        let (parts, raw) = match self.kind {
            CommandKind::StoredProcedure => {
                (vec![params::procedure_call(&text, &self.params, db_type)?], None)
            }
            CommandKind::Text if db_type.binds_across_statements() => {
                if text.trim().is_empty() {
                    return Err(DbError::invalid_input("Statement text is empty"));
                }
                let raw = self.params.is_empty().then(|| text.to_string());
                (vec![params::rewrite(&text, &self.params, db_type)], raw)
            }
            CommandKind::Text => {
                let statements = params::split_statements(&text, db_type);
                if statements.is_empty() {
                    return Err(DbError::invalid_input("Statement text is empty"));
                }
                // Without parameters the text goes to the server as-is, in
                // one round trip, so statements that cannot be prepared work.
                let raw = self.params.is_empty().then(|| text.to_string());
                let parts = statements
                    .into_iter()
                    .map(|s| params::rewrite(s, &self.params, db_type))
                    .collect();
                (parts, raw)
            }
        };

        Ok(Prepared {
            db_type,
            parts,
            raw,
            timeout: self.timeout,
        })
    }
}

impl From<&'static str> for Statement {
    fn from(sql: &'static str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<SqlTemplate> for Statement {
    fn from(template: SqlTemplate) -> Self {
        Self::template(&template)
    }
}

/// A statement ready for one dialect: schema applied, placeholders rewritten.
#[derive(Debug, Clone)]
pub struct Prepared {
    db_type: DatabaseType,
    parts: Vec<BoundSql>,
    /// Whole text for a single unprepared round trip, set when nothing is bound.
    raw: Option<String>,
    timeout: Option<Duration>,
}

impl Prepared {
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Number of statements sent to the server.
    pub fn statement_count(&self) -> usize {
        self.parts.len()
    }

    pub fn param_count(&self) -> usize {
        self.parts.iter().map(|p| p.params.len()).sum()
    }

    /// Final SQL text, for logging.
    pub fn sql(&self) -> Cow<'_, str> {
        match (&self.raw, self.parts.as_slice()) {
            (Some(raw), _) => Cow::Borrowed(raw),
            (None, [single]) => Cow::Borrowed(&single.sql),
            (None, parts) => Cow::Owned(
                parts
                    .iter()
                    .map(|p| p.sql.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }

    pub(crate) fn parts(&self) -> &[BoundSql] {
        &self.parts
    }

    pub(crate) fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
