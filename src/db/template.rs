//! Schema qualifier substitution.
//!
//! Statement text marks every schema-qualified object with the placeholder
//! `/*schema*/ ` (the comment token followed by exactly one space):
//!
//! ```text
//! SELECT * FROM /*schema*/ products WHERE product_id = @id
//! ```
//!
//! With schema `production.` this becomes `SELECT * FROM production.products ...`;
//! with no schema the placeholder is removed. An unreplaced placeholder is an
//! SQL comment, so a missing substitution never produces invalid SQL, only the
//! wrong object. [`validate_templates`] catches malformed placeholders at startup.

use crate::error::{DbError, DbResult};
use std::borrow::Cow;

/// Comment token that marks a schema qualifier position.
pub const SCHEMA_TOKEN: &str = "/*schema*/";

/// The full placeholder: token plus exactly one space.
pub const SCHEMA_PLACEHOLDER: &str = "/*schema*/ ";

/// A named statement text registered for startup validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlTemplate {
    pub name: &'static str,
    pub text: &'static str,
}

impl SqlTemplate {
    pub const fn new(name: &'static str, text: &'static str) -> Self {
        Self { name, text }
    }

    /// Substitute the schema qualifier into this template.
    pub fn apply(&self, schema: Option<&str>) -> Cow<'static, str> {
        apply(self.text, schema)
    }
}

/// Replace every schema placeholder in `sql` with `schema`.
///
/// `None` or an empty schema removes the placeholder. Text without a
/// placeholder is returned borrowed and unchanged.
pub fn apply<'a>(sql: &'a str, schema: Option<&str>) -> Cow<'a, str> {
    if !sql.contains(SCHEMA_PLACEHOLDER) {
        return Cow::Borrowed(sql);
    }
    Cow::Owned(sql.replace(SCHEMA_PLACEHOLDER, schema.unwrap_or("")))
}

/// Check one template: it must contain the placeholder, every token must be
/// followed by exactly one space, and no near-miss spelling may appear.
pub fn validate(template: &SqlTemplate) -> DbResult<()> {
    let text = template.text;
    let fail = |message: String| Err(DbError::template(message, template.name));

    if !text.contains(SCHEMA_TOKEN) {
        if let Some(near) = find_near_miss(text) {
            return fail(format!(
                "placeholder misspelled as '{near}', expected '{SCHEMA_TOKEN}'"
            ));
        }
        return fail(format!("no '{SCHEMA_PLACEHOLDER}' placeholder"));
    }

    for (pos, _) in text.match_indices(SCHEMA_TOKEN) {
        let rest = &text[pos + SCHEMA_TOKEN.len()..];
        let mut chars = rest.chars();
        let first = chars.next();
        let second = chars.next();
        if first != Some(' ') {
            return fail(format!(
                "placeholder at byte {pos} must be followed by one space"
            ));
        }
        if second.is_some_and(char::is_whitespace) {
            return fail(format!(
                "placeholder at byte {pos} is followed by more than one space"
            ));
        }
    }

    if let Some(near) = find_near_miss(text) {
        return fail(format!(
            "placeholder misspelled as '{near}', expected '{SCHEMA_TOKEN}'"
        ));
    }
    Ok(())
}

/// Validate every registered template, reporting all failures at once.
pub fn validate_templates(templates: &[SqlTemplate]) -> DbResult<()> {
    let failures: Vec<String> = templates
        .iter()
        .filter_map(|t| validate(t).err())
        .map(|e| e.to_string())
        .collect();

    if failures.is_empty() {
        return Ok(());
    }
    let names = templates
        .iter()
        .filter(|t| validate(t).is_err())
        .map(|t| t.name)
        .collect::<Vec<_>>()
        .join(", ");
    Err(DbError::template(failures.join("; "), names))
}

/// Find a comment that reads as "schema" once whitespace and case are
/// ignored but is not the exact token.
fn find_near_miss(text: &str) -> Option<&str> {
    let mut offset = 0;
    while let Some(start) = text[offset..].find("/*") {
        let start = offset + start;
        let end = text[start + 2..].find("*/").map(|e| start + 2 + e + 2)?;
        let comment = &text[start..end];
        let inner: String = comment[2..comment.len() - 2]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if inner.eq_ignore_ascii_case("schema") && comment != SCHEMA_TOKEN {
            return Some(comment);
        }
        offset = end;
    }
    None
}
