//! Database dispatch macros for reducing code duplication.
//!
//! The sqlx dialects share one shape of round trip and differ only in their
//! connection, argument and result types. These macros generate the
//! per-dialect code while keeping each expansion linear to read.

/// Macro for generating dispatch match arms over `DbConnection` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => mysql::execute_control(c, sql).await,
///     Postgres(c) => postgres::execute_control(c, sql).await,
///     SQLite(c) => sqlite::execute_control(c, sql).await,
///     Mssql(c) => mssql::execute_control(c, sql).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

/// Generate the round trips for one sqlx dialect as a module.
///
/// Paths are resolved inside the generated module, so callers pass them
/// from `super::`. `$bind` binds one `QueryParam` to a `sqlx::query` for the dialect and
/// `$outcome` converts the dialect's query result into an `ExecuteOutcome`, given
/// whether the statement it closes produced rows.
macro_rules! sqlx_round_trips {
    ($module:ident, $db:ty, $bind:path, $outcome:path) => {
        pub(crate) mod $module {
            use $crate::db::connection::RoundTrip;
            use $crate::db::statement::Prepared;
            use $crate::db::types::{Record, RowToRecord, column_names};
            use $crate::error::{DbError, DbResult};
            use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
            use sqlx::pool::PoolConnection;
            use sqlx::{Database, Either, Executor};
            use std::sync::Arc;

            type Conn = PoolConnection<$db>;
            type Item = Either<<$db as Database>::QueryResult, <$db as Database>::Row>;

            pub async fn execute_control(conn: &mut Conn, sql: &str) -> DbResult<()> {
                (&mut **conn).execute(sql).await?;
                Ok(())
            }

            pub async fn round_trip(conn: &mut Conn, prepared: &Prepared) -> DbResult<RoundTrip> {
                let mut trip = RoundTrip::default();
                if let Some(raw) = prepared.raw() {
                    collect(&mut trip, (&mut **conn).fetch_many(raw)).await?;
                } else {
                    for part in prepared.parts() {
                        let query = part.params.iter().fold(sqlx::query(&part.sql), $bind);
                        collect(&mut trip, (&mut **conn).fetch_many(query)).await?;
                    }
                }
                Ok(trip)
            }

            /// Drain one statement stream; each completed statement closes a set.
            async fn collect(
                trip: &mut RoundTrip,
                mut stream: BoxStream<'_, Result<Item, sqlx::Error>>,
            ) -> DbResult<()> {
                let mut rows = Vec::new();
                let mut columns: Option<Arc<[String]>> = None;
                while let Some(item) = stream.try_next().await? {
                    match item {
                        Either::Left(result) => {
                            trip.outcome.merge($outcome(&result, !rows.is_empty()));
                            trip.sets.push(std::mem::take(&mut rows));
                            columns = None;
                        }
                        Either::Right(row) => {
                            let columns = columns.get_or_insert_with(|| column_names(&row)).clone();
                            rows.push(row.to_record_with(columns));
                        }
                    }
                }
                if !rows.is_empty() {
                    trip.sets.push(rows);
                }
                Ok(())
            }

            pub fn stream<'a>(
                conn: &'a mut Conn,
                prepared: &'a Prepared,
            ) -> DbResult<BoxStream<'a, DbResult<Record>>> {
                let rows = match (prepared.raw(), prepared.parts()) {
                    (Some(raw), _) => (&mut **conn).fetch(raw),
                    (None, [part]) => part
                        .params
                        .iter()
                        .fold(sqlx::query(&part.sql), $bind)
                        .fetch(&mut **conn),
                    (None, _) => {
                        return Err(DbError::invalid_input(
                            "Streaming reads take a single statement when parameters are bound",
                        ));
                    }
                };
                let mut columns: Option<Arc<[String]>> = None;
                Ok(rows
                    .map(move |row| -> DbResult<Record> {
                        let row = row?;
                        let columns = columns.get_or_insert_with(|| column_names(&row)).clone();
                        Ok(row.to_record_with(columns))
                    })
                    .boxed())
            }
        }
    };
}

pub use impl_db_dispatch;
