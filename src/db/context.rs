//! The unit of work: one connection and at most one transaction.
//!
//! A [`Context`] is created by a [`ContextFactory`](crate::db::ContextFactory)
//! and owns its connection exclusively until it is closed or dropped. Every
//! command and query dispatched through it runs on that connection and, when
//! the context was opened with a transaction, inside that transaction.
//!
//! ```text
//!            commit()            rollback() / close()
//!   Open ───────────▶ Committed    Open ───────────▶ RolledBack
//! ```
//!
//! Dropping a context never blocks. A context dropped with its transaction
//! still open discards the connection so the server rolls the work back.

use crate::db::command::{Command, Query, RowCountCommand};
use crate::db::connection::DbConnection;
use crate::db::executor::{Read, Session, SessionFlags, Write, bounded};
use crate::db::factory::ContextOptions;
use crate::error::{DbError, DbResult};
use crate::models::{ContextState, DatabaseType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Context {
    id: Uuid,
    target: String,
    conn: Option<DbConnection>,
    db_type: DatabaseType,
    flags: SessionFlags,
    state: ContextState,
    schema: Option<String>,
    options: ContextOptions,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("db_type", &self.db_type)
            .field("state", &self.state)
            .field("has_transaction", &self.flags.in_transaction)
            .field("closed", &self.conn.is_none())
            .finish()
    }
}

impl Context {
    pub(crate) fn new(
        target: String,
        conn: DbConnection,
        flags: SessionFlags,
        schema: Option<String>,
        options: ContextOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            db_type: conn.db_type(),
            conn: Some(conn),
            flags,
            state: ContextState::Open,
            schema,
            options,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the target this context was created for.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// True while a transaction is open on the connection.
    pub fn has_transaction(&self) -> bool {
        self.flags.in_transaction
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// True when a round trip was cancelled or timed out. Only rollback and
    /// close remain possible.
    pub fn is_interrupted(&self) -> bool {
        self.flags.interrupted
    }

    fn state_error(&self, message: &str) -> DbError {
        let state = if self.conn.is_none() {
            "closed".to_string()
        } else if self.flags.interrupted {
            "interrupted".to_string()
        } else {
            self.state.to_string()
        };
        DbError::invalid_state(message, state)
    }

    fn session<'a, M>(&'a mut self, cancel: &'a CancellationToken) -> DbResult<Session<'a, M>> {
        if self.conn.is_none() {
            return Err(self.state_error("the context is closed"));
        }
        if self.state.is_terminal() {
            return Err(self.state_error("the context transaction has already completed"));
        }
        if self.flags.interrupted {
            return Err(self.state_error(
                "a previous round trip was interrupted; roll back or close the context",
            ));
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::internal("context connection missing"))?;
        Ok(Session::new(
            conn,
            &mut self.flags,
            self.schema.as_deref(),
            &self.options,
            cancel,
        ))
    }

    /// Dispatch a command.
    pub async fn execute<C: Command>(&mut self, command: &C) -> DbResult<C::Output> {
        self.execute_with(command, &CancellationToken::new()).await
    }

    pub async fn execute_with<C: Command>(
        &mut self,
        command: &C,
        cancel: &CancellationToken,
    ) -> DbResult<C::Output> {
        let mut session = self.session::<Write>(cancel)?;
        command.execute(&mut session).await
    }

    /// Dispatch a row-count command.
    pub async fn execute_count<C: RowCountCommand>(&mut self, command: &C) -> DbResult<u64> {
        self.execute_count_with(command, &CancellationToken::new()).await
    }

    pub async fn execute_count_with<C: RowCountCommand>(
        &mut self,
        command: &C,
        cancel: &CancellationToken,
    ) -> DbResult<u64> {
        let mut session = self.session::<Write>(cancel)?;
        command.execute(&mut session).await
    }

    /// Dispatch a query.
    pub async fn query<Q: Query>(&mut self, query: &Q) -> DbResult<Q::Output> {
        self.query_with(query, &CancellationToken::new()).await
    }

    pub async fn query_with<Q: Query>(
        &mut self,
        query: &Q,
        cancel: &CancellationToken,
    ) -> DbResult<Q::Output> {
        let mut session = self.session::<Read>(cancel)?;
        query.select(&mut session).await
    }

    /// Commit the context transaction. A no-op without one.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Err(self.state_error("cannot commit a closed context"));
        }
        if self.state.is_terminal() {
            return Err(self.state_error("the context transaction has already completed"));
        }
        if !self.flags.in_transaction {
            return Ok(());
        }
        if self.flags.interrupted {
            return Err(self.state_error(
                "a round trip was interrupted inside the transaction; roll back instead",
            ));
        }
        if self.flags.rollback_required {
            return Err(self.state_error(
                "a statement failed inside the transaction; roll back instead",
            ));
        }

        let timeout = self.options.default_timeout;
        let Some(conn) = self.conn.as_mut() else {
            return Err(DbError::internal("context connection missing"));
        };
        bounded(
            &mut self.flags,
            "commit",
            timeout,
            &CancellationToken::new(),
            conn.commit(),
        )
        .await?;

        self.flags.in_transaction = false;
        self.state = ContextState::Committed;
        debug!(context_id = %self.id, target_id = %self.target, "Transaction committed");
        Ok(())
    }

    /// Roll back the context transaction. A no-op without one.
    ///
    /// After an interruption the connection cannot be trusted to answer, so
    /// it is discarded instead and the server rolls back on its own.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Err(self.state_error("cannot roll back a closed context"));
        }
        if self.state.is_terminal() {
            return Err(self.state_error("the context transaction has already completed"));
        }

        if self.flags.interrupted {
            self.discard("rollback after interruption");
            return Ok(());
        }
        if !self.flags.in_transaction {
            return Ok(());
        }

        let timeout = self.options.default_timeout;
        let Some(conn) = self.conn.as_mut() else {
            return Err(DbError::internal("context connection missing"));
        };
        let rolled_back = bounded(
            &mut self.flags,
            "rollback",
            timeout,
            &CancellationToken::new(),
            conn.rollback(),
        )
        .await;

        if let Err(e) = rolled_back {
            self.discard("rollback failed");
            return Err(e);
        }
        self.flags.in_transaction = false;
        self.flags.rollback_required = false;
        self.state = ContextState::RolledBack;
        debug!(context_id = %self.id, target_id = %self.target, "Transaction rolled back");
        Ok(())
    }

    /// Roll back an open transaction, then release the connection.
    /// Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.flags.interrupted {
            self.discard("close after interruption");
            return;
        }
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if self.flags.in_transaction {
            warn!(
                context_id = %self.id,
                target_id = %self.target,
                "Closing context with an open transaction; rolling back"
            );
            let rolled_back = bounded(
                &mut self.flags,
                "rollback",
                self.options.default_timeout,
                &CancellationToken::new(),
                conn.rollback(),
            )
            .await;
            self.flags.in_transaction = false;
            self.state = ContextState::RolledBack;
            if let Err(e) = rolled_back {
                warn!(context_id = %self.id, error = %e, "Rollback on close failed; discarding connection");
                conn.discard();
                return;
            }
        }

        conn.release().await;
        debug!(context_id = %self.id, target_id = %self.target, "Context closed");
    }

    /// Drop the connection without returning it to its pool.
    fn discard(&mut self, reason: &str) {
        if let Some(conn) = self.conn.take() {
            warn!(
                context_id = %self.id,
                target_id = %self.target,
                reason,
                "Discarding connection"
            );
            conn.discard();
        }
        if self.flags.in_transaction {
            self.flags.in_transaction = false;
            self.state = ContextState::RolledBack;
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if self.flags.in_transaction || self.flags.interrupted {
            self.discard("dropped without close");
        } else if let Some(conn) = self.conn.take() {
            // sqlx connections go back to their pool; an SQL Server client
            // closes its socket.
            drop(conn);
        }
    }
}
