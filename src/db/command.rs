//! Command and query contracts.
//!
//! Callers describe one unit of database work as a value that carries its
//! own SQL and parameters, and hand it to a [`Context`](crate::db::Context).
//! The context supplies the session; the contract decides which primitives
//! to call. Contracts are borrowed for one call and never retained.
//!
//! ```ignore
//! struct ProductById(i64);
//!
//! impl Query for ProductById {
//!     type Output = Option<Product>;
//!
//!     async fn select(&self, session: &mut ReadSession<'_>) -> DbResult<Self::Output> {
//!         let statement = Statement::new("SELECT * FROM /*schema*/ products WHERE product_id = @id")
//!             .param("id", self.0);
//!         session.select_first(&statement).await
//!     }
//! }
//! ```

use crate::db::executor::{ReadSession, WriteSession};
use crate::db::statement::Statement;
use crate::db::template::SqlTemplate;
use crate::error::DbResult;
use serde::Serialize;
use std::future::Future;

/// A write with a typed result.
pub trait Command: Send + Sync {
    type Output: Send;

    fn execute(
        &self,
        session: &mut WriteSession<'_>,
    ) -> impl Future<Output = DbResult<Self::Output>> + Send;
}

/// A write whose only result is the number of rows it touched.
pub trait RowCountCommand: Send + Sync {
    fn execute(&self, session: &mut WriteSession<'_>) -> impl Future<Output = DbResult<u64>> + Send;
}

/// A read. The session it receives has no write primitives.
pub trait Query: Send + Sync {
    type Output: Send;

    fn select(
        &self,
        session: &mut ReadSession<'_>,
    ) -> impl Future<Output = DbResult<Self::Output>> + Send;
}

/// A bare statement is a row-count command.
impl RowCountCommand for Statement {
    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<u64> {
        session.execute_row_count(self).await
    }
}

/// One statement executed once per parameter set, atomically.
#[derive(Debug, Clone)]
pub struct BatchCommand<P> {
    statement: Statement,
    items: Vec<P>,
}

impl<P> BatchCommand<P> {
    pub fn new(statement: impl Into<Statement>, items: Vec<P>) -> Self {
        Self {
            statement: statement.into(),
            items,
        }
    }

    pub fn from_template(template: &SqlTemplate, items: Vec<P>) -> Self {
        Self::new(Statement::template(template), items)
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn items(&self) -> &[P] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<P: Serialize + Send + Sync> RowCountCommand for BatchCommand<P> {
    async fn execute(&self, session: &mut WriteSession<'_>) -> DbResult<u64> {
        session.execute_batch(&self.statement, &self.items).await
    }
}
