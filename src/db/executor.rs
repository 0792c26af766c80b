//! Execution primitives.
//!
//! A [`Session`] is what a context hands to a command or query: its
//! connection, its transaction flag, its schema qualifier and its
//! cancellation token, for the duration of one call. Every primitive
//! substitutes the schema, binds parameters, bounds the round trip by the
//! statement timeout (or the context default) and the cancellation token,
//! and maps rows into caller types.
//!
//! Sessions come in two capabilities. [`ReadSession`] offers only the
//! `select_*` and streaming primitives; [`WriteSession`] adds the
//! `execute_*` primitives. Queries receive a read session, so the type
//! system keeps them from writing.

use crate::db::connection::{DbConnection, RoundTrip};
use crate::db::factory::ContextOptions;
use crate::db::params::Params;
use crate::db::result_sets::ResultSets;
use crate::db::statement::{Prepared, Statement};
use crate::db::types::Record;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecuteOutcome, IsolationLevel};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capability marker for sessions that may only read.
#[derive(Debug)]
pub enum Read {}

/// Capability marker for sessions that may also write.
#[derive(Debug)]
pub enum Write {}

pub type ReadSession<'c> = Session<'c, Read>;
pub type WriteSession<'c> = Session<'c, Write>;

/// Per-context bookkeeping that sessions update.
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    pub in_transaction: bool,
    /// A round trip was cut short; the connection is mid-protocol.
    pub interrupted: bool,
    /// A statement failed inside the context transaction.
    pub rollback_required: bool,
}

impl SessionFlags {
    /// A server error inside the context transaction leaves it half applied,
    /// so only a rollback may end it.
    fn note_failure(&mut self, error: &DbError) {
        if self.in_transaction && matches!(error, DbError::Execution { .. }) {
            self.rollback_required = true;
        }
    }
}

/// Borrowed view of a context for one command or query.
pub struct Session<'c, M> {
    conn: &'c mut DbConnection,
    flags: &'c mut SessionFlags,
    schema: Option<&'c str>,
    options: &'c ContextOptions,
    cancel: &'c CancellationToken,
    _mode: PhantomData<M>,
}

impl<M> std::fmt::Debug for Session<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("db_type", &self.conn.db_type())
            .field("schema", &self.schema)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Whole seconds, rounded up so a sub-second limit never reads as zero.
fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    let secs = u32::try_from(timeout.as_millis().div_ceil(1000)).unwrap_or(u32::MAX);
    DbError::timeout(operation, secs)
}

/// Run `fut` unless `cancel` fires or `limit` passes first. Either
/// interruption marks the session interrupted.
pub(crate) async fn bounded<T>(
    flags: &mut SessionFlags,
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled(operation)),
        r = tokio::time::timeout(limit, fut) => {
            r.unwrap_or_else(|_| Err(timeout_error(operation, limit)))
        }
    };
    if let Err(e) = &result {
        if e.is_interruption() {
            flags.interrupted = true;
            warn!(operation = %operation, error = %e, "Round trip interrupted");
        }
    }
    result
}

/// Split a joined row at the last `split_on` column into its two parts.
fn split_decode<T, S>(record: &Record, split_on: &str) -> DbResult<(T, S)>
where
    T: DeserializeOwned,
    S: DeserializeOwned,
{
    let at = record.rposition(split_on).ok_or_else(|| {
        DbError::mapping(
            format!("split column '{split_on}' not found in result columns"),
            std::any::type_name::<S>(),
        )
    })?;
    let primary = record.decode_range(0..at)?;
    let secondary = record.decode_range_or_null(at..record.len())?;
    Ok((primary, secondary))
}

impl<'c, M> Session<'c, M> {
    pub(crate) fn new(
        conn: &'c mut DbConnection,
        flags: &'c mut SessionFlags,
        schema: Option<&'c str>,
        options: &'c ContextOptions,
        cancel: &'c CancellationToken,
    ) -> Self {
        Self {
            conn,
            flags,
            schema,
            options,
            cancel,
            _mode: PhantomData,
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.conn.db_type()
    }

    /// Schema qualifier substituted into every statement.
    pub fn schema(&self) -> Option<&str> {
        self.schema
    }

    pub fn in_transaction(&self) -> bool {
        self.flags.in_transaction
    }

    /// Prepare a statement for this session's dialect and schema.
    pub fn prepare(&self, statement: &Statement) -> DbResult<Prepared> {
        statement.prepare(self.db_type(), self.schema)
    }

    fn timeout_for(&self, prepared: &Prepared) -> Duration {
        prepared.timeout().unwrap_or(self.options.default_timeout)
    }

    fn check_usable(&self, operation: &str) -> DbResult<()> {
        if self.flags.interrupted {
            return Err(DbError::invalid_state(
                "a previous round trip was interrupted; roll back or close the context",
                "interrupted",
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        Ok(())
    }

    async fn run_prepared(
        &mut self,
        operation: &str,
        prepared: &Prepared,
        want_rows: bool,
    ) -> DbResult<RoundTrip> {
        self.check_usable(operation)?;
        if prepared.db_type() != self.db_type() {
            return Err(DbError::invalid_input(format!(
                "statement was prepared for {} but the context is {}",
                prepared.db_type(),
                self.db_type()
            )));
        }
        let timeout = self.timeout_for(prepared);

        debug!(
            sql = %prepared.sql(),
            params = ?prepared.param_count(),
            statements = prepared.statement_count(),
            timeout_secs = ?timeout.as_secs(),
            "Executing {operation}"
        );

        let result = bounded(
            self.flags,
            operation,
            timeout,
            self.cancel,
            self.conn.round_trip(prepared, want_rows),
        )
        .await;
        if let Err(e) = &result {
            self.flags.note_failure(e);
        }
        result
    }

    async fn round_trip(
        &mut self,
        operation: &str,
        statement: &Statement,
        want_rows: bool,
    ) -> DbResult<RoundTrip> {
        self.check_usable(operation)?;
        let prepared = self.prepare(statement)?;
        self.run_prepared(operation, &prepared, want_rows).await
    }

    /// Every row of the first result set, in order.
    pub async fn select_many<T: DeserializeOwned>(&mut self, statement: &Statement) -> DbResult<Vec<T>> {
        self.round_trip("select_many", statement, true)
            .await?
            .into_rows()
            .iter()
            .map(Record::decode)
            .collect()
    }

    /// The first row, or `None` when there is none.
    pub async fn select_first<T: DeserializeOwned>(&mut self, statement: &Statement) -> DbResult<Option<T>> {
        self.round_trip("select_first", statement, true)
            .await?
            .into_first_row()
            .as_ref()
            .map(Record::decode)
            .transpose()
    }

    /// Exactly one row.
    pub async fn select_single<T: DeserializeOwned>(&mut self, statement: &Statement) -> DbResult<T> {
        let rows = self.round_trip("select_single", statement, true).await?.into_rows();
        match rows.as_slice() {
            [row] => row.decode(),
            _ => Err(DbError::not_exactly_one("select_single", rows.len())),
        }
    }

    /// First column of the first row. Zero rows is `NoResult`; a SQL `NULL`
    /// decodes when `T` is an `Option`.
    pub async fn select_scalar<T: DeserializeOwned>(&mut self, statement: &Statement) -> DbResult<T> {
        self.round_trip("select_scalar", statement, true)
            .await?
            .into_first_row()
            .ok_or_else(|| DbError::no_result("select_scalar"))?
            .scalar()
    }

    /// Map each row to two types split at the last column named `split_on`
    /// and combine them with `merge`.
    ///
    /// Columns before the split decode into `T`, the rest into `S`. When
    /// every `S` column is NULL, `S` is decoded from NULL first, so an
    /// `Option<_>` secondary reads an unmatched outer join as `None`.
    pub async fn select_many_join<T, S, F>(
        &mut self,
        statement: &Statement,
        split_on: &str,
        mut merge: F,
    ) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
        S: DeserializeOwned,
        F: FnMut(T, S) -> T,
    {
        self.round_trip("select_many_join", statement, true)
            .await?
            .into_rows()
            .iter()
            .map(|row| split_decode::<T, S>(row, split_on).map(|(t, s)| merge(t, s)))
            .collect()
    }

    /// Buffer every result set of a multi-statement round trip.
    ///
    /// On the sqlx dialects each statement yields one set; on SQL Server only
    /// statements that return rows do.
    pub async fn select_multiple(&mut self, statement: &Statement) -> DbResult<ResultSets> {
        let trip = self.round_trip("select_multiple", statement, true).await?;
        Ok(ResultSets::new(trip.sets))
    }

    /// Stream rows of a single prepared statement, decoding each as it arrives.
    ///
    /// The timeout bounds opening the stream and each wait for the next row.
    /// The stream ends after the first error.
    pub async fn stream<'s, T>(&'s mut self, prepared: &'s Prepared) -> DbResult<BoxStream<'s, DbResult<T>>>
    where
        T: DeserializeOwned + Send + 's,
    {
        self.open_stream("stream", prepared, |record: Record| record.decode())
            .await
    }

    /// Streaming form of [`Session::select_many_join`]. Only available when
    /// the factory was built with streaming joins enabled.
    pub async fn stream_join<'s, T, S, F>(
        &'s mut self,
        prepared: &'s Prepared,
        split_on: &str,
        mut merge: F,
    ) -> DbResult<BoxStream<'s, DbResult<T>>>
    where
        T: DeserializeOwned + Send + 's,
        S: DeserializeOwned + Send + 's,
        F: FnMut(T, S) -> T + Send + 's,
    {
        if !self.options.streaming_joins {
            return Err(DbError::invalid_input(
                "streaming joins are disabled for this factory; enable streaming_joins or use select_many_join",
            ));
        }
        let split_on = split_on.to_string();
        self.open_stream("stream_join", prepared, move |record: Record| {
            split_decode::<T, S>(&record, &split_on).map(|(t, s)| merge(t, s))
        })
        .await
    }

    async fn open_stream<'s, T, D>(
        &'s mut self,
        operation: &'static str,
        prepared: &'s Prepared,
        decode: D,
    ) -> DbResult<BoxStream<'s, DbResult<T>>>
    where
        T: Send + 's,
        D: FnMut(Record) -> DbResult<T> + Send + 's,
    {
        self.check_usable(operation)?;
        if prepared.db_type() != self.db_type() {
            return Err(DbError::invalid_input(format!(
                "statement was prepared for {} but the context is {}",
                prepared.db_type(),
                self.db_type()
            )));
        }
        let timeout = self.timeout_for(prepared);
        let cancel = self.cancel.clone();

        debug!(
            sql = %prepared.sql(),
            params = ?prepared.param_count(),
            timeout_secs = ?timeout.as_secs(),
            "Opening {operation}"
        );

        let opened = bounded(
            &mut *self.flags,
            operation,
            timeout,
            &cancel,
            self.conn.stream(prepared),
        )
        .await;
        let rows = match opened {
            Ok(rows) => rows,
            Err(e) => {
                self.flags.note_failure(&e);
                return Err(e);
            }
        };

        let state = RowStream {
            rows,
            flags: &mut *self.flags,
            cancel,
            timeout,
            operation,
            decode,
        };
        Ok(stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            let polled = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => Err(DbError::cancelled(state.operation)),
                next = tokio::time::timeout(state.timeout, state.rows.next()) => {
                    next.map_err(|_| timeout_error(state.operation, state.timeout))
                }
            };
            match polled {
                Ok(None) => None,
                Ok(Some(Ok(record))) => {
                    let item = (state.decode)(record);
                    let keep = item.is_ok();
                    Some((item, keep.then_some(state)))
                }
                Ok(Some(Err(e))) => {
                    state.flags.note_failure(&e);
                    Some((Err(e), None))
                }
                Err(e) => {
                    state.flags.interrupted = true;
                    warn!(operation = %state.operation, error = %e, "Stream interrupted");
                    Some((Err(e), None))
                }
            }
        })
        .boxed())
    }
}

struct RowStream<'s, D> {
    rows: BoxStream<'s, DbResult<Record>>,
    flags: &'s mut SessionFlags,
    cancel: CancellationToken,
    timeout: Duration,
    operation: &'static str,
    decode: D,
}

impl Session<'_, Write> {
    /// Rows affected by every statement, summed.
    pub async fn execute_row_count(&mut self, statement: &Statement) -> DbResult<u64> {
        Ok(self
            .round_trip("execute_row_count", statement, false)
            .await?
            .outcome
            .rows_affected)
    }

    /// Rows affected plus the generated identifier, when the driver reports one.
    pub async fn execute_outcome(&mut self, statement: &Statement) -> DbResult<ExecuteOutcome> {
        Ok(self
            .round_trip("execute_outcome", statement, false)
            .await?
            .outcome)
    }

    /// Write-side scalar: run every statement and return the first column of
    /// the first row any of them produced.
    pub async fn execute_scalar<T: DeserializeOwned>(&mut self, statement: &Statement) -> DbResult<T> {
        self.round_trip("execute_scalar", statement, true)
            .await?
            .into_first_row()
            .ok_or_else(|| DbError::no_result("execute_scalar"))?
            .scalar()
    }

    /// Run `statement` once per parameter set and return the summed row count.
    ///
    /// Inside the context transaction a failure marks that transaction
    /// rollback-required. Without one, the batch runs in its own transaction
    /// that commits on success and rolls back on failure.
    pub async fn execute_batch<P: Serialize>(&mut self, statement: &Statement, params: &[P]) -> DbResult<u64> {
        const OPERATION: &str = "execute_batch";
        self.check_usable(OPERATION)?;
        if params.is_empty() {
            return Ok(0);
        }

        let prepared = params
            .iter()
            .map(|p| {
                statement
                    .clone()
                    .bind(Params::from_serialize(p)?)
                    .prepare(self.db_type(), self.schema)
            })
            .collect::<DbResult<Vec<_>>>()?;

        let implicit = !self.flags.in_transaction;
        if implicit {
            let timeout = self.options.default_timeout;
            bounded(
                self.flags,
                OPERATION,
                timeout,
                self.cancel,
                self.conn.begin(IsolationLevel::default()),
            )
            .await?;
        }

        let mut total = 0;
        for (index, item) in prepared.iter().enumerate() {
            match self.run_prepared(OPERATION, item, false).await {
                Ok(trip) => total += trip.outcome.rows_affected,
                Err(e) => {
                    warn!(index, error = %e, "Batch item failed");
                    if !implicit {
                        self.flags.rollback_required = true;
                    } else if !e.is_interruption() {
                        self.abandon_batch(OPERATION).await;
                    }
                    return Err(e);
                }
            }
        }

        if implicit {
            let timeout = self.options.default_timeout;
            let committed = bounded(self.flags, OPERATION, timeout, self.cancel, self.conn.commit()).await;
            if let Err(e) = committed {
                if !e.is_interruption() {
                    self.abandon_batch(OPERATION).await;
                }
                return Err(e);
            }
        }

        debug!(items = prepared.len(), rows_affected = total, "Batch complete");
        Ok(total)
    }

    /// Roll back a failed implicit batch transaction. The rollback is bounded
    /// by the context default timeout but ignores the caller's token, so a
    /// cancelled caller still leaves the connection clean.
    async fn abandon_batch(&mut self, operation: &str) {
        let timeout = self.options.default_timeout;
        let rolled_back = bounded(
            self.flags,
            operation,
            timeout,
            &CancellationToken::new(),
            self.conn.rollback(),
        )
        .await;
        if let Err(e) = rolled_back {
            warn!(error = %e, "Failed to roll back batch transaction");
        }
    }
}
