//! Static field-to-column tables.
//!
//! Entity types declare which column backs each field once, as a `const`
//! [`ColumnMap`], and statements build their select lists from it. Tables are
//! checked by [`ColumnMap::validate`] at startup so a typo fails before the
//! first statement runs.

use crate::db::template::SCHEMA_PLACEHOLDER;
use crate::error::{DbError, DbResult};

/// Column table for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    /// Table name without schema qualifier.
    pub table: &'static str,
    /// `(field, column)` pairs in select order.
    pub columns: &'static [(&'static str, &'static str)],
}

/// Implemented by types that expose their column table.
pub trait Mapped {
    const COLUMNS: ColumnMap;
}

impl ColumnMap {
    pub const fn new(table: &'static str, columns: &'static [(&'static str, &'static str)]) -> Self {
        Self { table, columns }
    }

    /// Column backing `field`.
    pub fn column(&self, field: &str) -> DbResult<&'static str> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, c)| *c)
            .ok_or_else(|| {
                DbError::mapping(format!("no column mapped for field '{field}'"), self.table)
            })
    }

    /// Table name carrying the schema placeholder, ready for statement text.
    pub fn qualified_table(&self) -> String {
        format!("{SCHEMA_PLACEHOLDER}{}", self.table)
    }

    /// `column AS field` list, each column prefixed with `alias.` when given.
    /// Fields whose name equals the column are emitted without `AS`.
    pub fn select_list(&self, alias: Option<&str>) -> String {
        self.columns
            .iter()
            .map(|(field, column)| {
                let source = match alias {
                    Some(a) => format!("{a}.{column}"),
                    None => column.to_string(),
                };
                if field.eq_ignore_ascii_case(column) {
                    source
                } else {
                    format!("{source} AS {field}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check the table is non-empty and names no field or column twice.
    pub fn validate(&self) -> DbResult<()> {
        if self.table.trim().is_empty() {
            return Err(DbError::mapping("table name is empty", "ColumnMap"));
        }
        if self.columns.is_empty() {
            return Err(DbError::mapping("no columns mapped", self.table));
        }
        for (i, (field, column)) in self.columns.iter().enumerate() {
            if field.is_empty() || column.is_empty() {
                return Err(DbError::mapping(
                    format!("entry {i} has an empty field or column"),
                    self.table,
                ));
            }
            let rest = &self.columns[i + 1..];
            if rest.iter().any(|(f, _)| f.eq_ignore_ascii_case(field)) {
                return Err(DbError::mapping(
                    format!("field '{field}' is mapped twice"),
                    self.table,
                ));
            }
            if rest.iter().any(|(_, c)| c.eq_ignore_ascii_case(column)) {
                return Err(DbError::mapping(
                    format!("column '{column}' is mapped twice"),
                    self.table,
                ));
            }
        }
        Ok(())
    }
}

/// Validate several column tables, failing on the first bad one.
pub fn validate_column_maps(maps: &[ColumnMap]) -> DbResult<()> {
    maps.iter().try_for_each(ColumnMap::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCTS: ColumnMap = ColumnMap::new(
        "products",
        &[
            ("id", "product_id"),
            ("name", "product_name"),
            ("model_year", "model_year"),
        ],
    );

    #[test]
    fn test_column_lookup() {
        assert_eq!(PRODUCTS.column("name").unwrap(), "product_name");
        assert!(matches!(
            PRODUCTS.column("price"),
            Err(DbError::Mapping { .. })
        ));
    }

    #[test]
    fn test_select_list() {
        assert_eq!(
            PRODUCTS.select_list(Some("p")),
            "p.product_id AS id, p.product_name AS name, p.model_year"
        );
        assert_eq!(
            PRODUCTS.select_list(None),
            "product_id AS id, product_name AS name, model_year"
        );
    }

    #[test]
    fn test_qualified_table_applies_schema() {
        let sql = format!("SELECT * FROM {}", PRODUCTS.qualified_table());
        assert_eq!(
            crate::db::template::apply(&sql, Some("production.")),
            "SELECT * FROM production.products"
        );
    }

    #[test]
    fn test_validate() {
        assert!(PRODUCTS.validate().is_ok());

        const DUP: ColumnMap = ColumnMap::new("brands", &[("id", "brand_id"), ("ID", "x")]);
        assert!(DUP.validate().unwrap_err().to_string().contains("mapped twice"));

        const EMPTY: ColumnMap = ColumnMap::new("brands", &[]);
        assert!(validate_column_maps(&[PRODUCTS, EMPTY]).is_err());
    }
}
