//! The connection a context owns, and its raw round trips.
//!
//! Every dialect offers the same four things: run transaction control
//! statements, run a prepared statement to completion (buffering rows and
//! affected counts), stream rows of a single statement, and give the
//! connection back either to its pool or to nobody.

use crate::db::params::{BoundSql, bind_mssql_param, bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::statement::Prepared;
use crate::db::types::{self, Record};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{DatabaseType, ExecuteOutcome, IsolationLevel};
use futures_util::stream::{BoxStream, StreamExt};
use sqlx::mysql::MySqlQueryResult;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgQueryResult;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{MySql, Postgres, Sqlite};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::{debug, warn};

/// SQL Server client over a tokio TCP stream.
pub type MssqlClient = tiberius::Client<Compat<TcpStream>>;

/// One open connection, exclusively owned by a context.
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
    Mssql(Box<MssqlClient>),
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbConnection").field(&self.db_type()).finish()
    }
}

/// Everything one round trip produced.
#[derive(Debug, Default)]
pub(crate) struct RoundTrip {
    /// Rows per statement, in statement order.
    pub sets: Vec<Vec<Record>>,
    pub outcome: ExecuteOutcome,
}

impl RoundTrip {
    /// Rows of the first statement that returned any.
    pub fn into_rows(self) -> Vec<Record> {
        self.sets
            .into_iter()
            .find(|set| !set.is_empty())
            .unwrap_or_default()
    }

    pub fn into_first_row(self) -> Option<Record> {
        self.into_rows().into_iter().next()
    }
}

fn mysql_outcome(result: &MySqlQueryResult, _returned_rows: bool) -> ExecuteOutcome {
    let id = result.last_insert_id();
    ExecuteOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: (id != 0).then_some(id as i64),
    }
}

fn postgres_outcome(result: &PgQueryResult, _returned_rows: bool) -> ExecuteOutcome {
    ExecuteOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: None,
    }
}

/// SQLite reports `changes()` for every statement, so a query that returns rows
/// repeats the count of the last write before it.
fn sqlite_outcome(result: &SqliteQueryResult, returned_rows: bool) -> ExecuteOutcome {
    if returned_rows {
        return ExecuteOutcome::default();
    }
    let id = result.last_insert_rowid();
    ExecuteOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: (result.rows_affected() > 0 && id != 0).then_some(id),
    }
}

sqlx_round_trips!(mysql, sqlx::MySql, super::bind_mysql_param, super::mysql_outcome);
sqlx_round_trips!(postgres, sqlx::Postgres, super::bind_postgres_param, super::postgres_outcome);
sqlx_round_trips!(sqlite, sqlx::Sqlite, super::bind_sqlite_param, super::sqlite_outcome);

mod mssql {
    use super::*;

    pub async fn execute_control(client: &mut MssqlClient, sql: &str) -> DbResult<()> {
        client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    fn query(part: &BoundSql) -> tiberius::Query<'_> {
        let mut query = tiberius::Query::new(part.sql.as_str());
        for param in &part.params {
            bind_mssql_param(&mut query, param);
        }
        query
    }

    fn batch(prepared: &Prepared) -> DbResult<&BoundSql> {
        prepared
            .parts()
            .first()
            .ok_or_else(|| DbError::internal("prepared statement has no batch"))
    }

    async fn open<'a>(
        client: &'a mut MssqlClient,
        prepared: &'a Prepared,
    ) -> DbResult<tiberius::QueryStream<'a>> {
        Ok(match prepared.raw() {
            Some(raw) => client.simple_query(raw).await?,
            None => query(batch(prepared)?).query(client).await?,
        })
    }

    /// Only statements that return a result set produce a set.
    pub async fn round_trip(
        client: &mut MssqlClient,
        prepared: &Prepared,
        want_rows: bool,
    ) -> DbResult<RoundTrip> {
        let mut trip = RoundTrip::default();
        if want_rows {
            for set in open(client, prepared).await?.into_results().await? {
                let records = match set.first().map(types::mssql::column_names) {
                    Some(columns) => set
                        .into_iter()
                        .map(|row| types::mssql::to_record(row, columns.clone()))
                        .collect(),
                    None => Vec::new(),
                };
                trip.sets.push(records);
            }
        } else {
            let result = query(batch(prepared)?).execute(client).await?;
            trip.outcome.rows_affected = result.rows_affected().iter().sum();
        }
        Ok(trip)
    }

    pub async fn stream<'a>(
        client: &'a mut MssqlClient,
        prepared: &'a Prepared,
    ) -> DbResult<BoxStream<'a, DbResult<Record>>> {
        let rows = open(client, prepared).await?.into_row_stream();
        let mut columns = None;
        Ok(rows
            .map(move |row| -> DbResult<Record> {
                let row = row?;
                let columns = columns
                    .get_or_insert_with(|| types::mssql::column_names(&row))
                    .clone();
                Ok(types::mssql::to_record(row, columns))
            })
            .boxed())
    }
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
            DbConnection::Mssql(_) => DatabaseType::Mssql,
        }
    }

    /// Run a transaction control statement with no parameters and no rows.
    pub(crate) async fn execute_control(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql = %sql, "Executing control statement");
        impl_db_dispatch!(self, {
            MySql(c) => mysql::execute_control(c, sql).await,
            Postgres(c) => postgres::execute_control(c, sql).await,
            SQLite(c) => sqlite::execute_control(c, sql).await,
            Mssql(c) => mssql::execute_control(c, sql).await,
        })
    }

    pub(crate) async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()> {
        for sql in isolation.begin_statements(self.db_type()) {
            self.execute_control(&sql).await?;
        }
        Ok(())
    }

    pub(crate) async fn commit(&mut self) -> DbResult<()> {
        let sql = match self.db_type() {
            DatabaseType::Mssql => "COMMIT TRANSACTION",
            _ => "COMMIT",
        };
        self.execute_control(sql).await
    }

    pub(crate) async fn rollback(&mut self) -> DbResult<()> {
        let sql = match self.db_type() {
            DatabaseType::Mssql => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        };
        self.execute_control(sql).await
    }

    /// Run every statement of `prepared` to completion.
    ///
    /// `want_rows` matters only on SQL Server, where row counts and result
    /// sets come from different client calls.
    pub(crate) async fn round_trip(&mut self, prepared: &Prepared, want_rows: bool) -> DbResult<RoundTrip> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::round_trip(c, prepared).await,
            Postgres(c) => postgres::round_trip(c, prepared).await,
            SQLite(c) => sqlite::round_trip(c, prepared).await,
            Mssql(c) => mssql::round_trip(c, prepared, want_rows).await,
        })
    }

    /// Stream the rows of one statement as they arrive.
    pub(crate) async fn stream<'a>(
        &'a mut self,
        prepared: &'a Prepared,
    ) -> DbResult<BoxStream<'a, DbResult<Record>>> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::stream(c, prepared),
            Postgres(c) => postgres::stream(c, prepared),
            SQLite(c) => sqlite::stream(c, prepared),
            Mssql(c) => mssql::stream(c, prepared).await,
        })
    }

    /// Give the connection back: sqlx connections return to their pool,
    /// SQL Server clients log out.
    pub(crate) async fn release(self) {
        match self {
            DbConnection::Mssql(client) => {
                if let Err(e) = (*client).close().await {
                    warn!(error = %e, "Failed to close SQL Server connection");
                }
            }
            other => drop(other),
        }
    }

    /// Drop the connection without returning it to a pool. The server sees
    /// the session end and rolls back anything still open on it.
    pub(crate) fn discard(self) {
        match self {
            DbConnection::MySql(c) => drop(c.detach()),
            DbConnection::Postgres(c) => drop(c.detach()),
            DbConnection::SQLite(c) => drop(c.detach()),
            DbConnection::Mssql(c) => drop(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::statement::Statement;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn sqlite_conn() -> (tempfile::TempDir, sqlx::SqlitePool, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("conn.db").display());
        let pool = SqlitePoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        let conn = DbConnection::SQLite(pool.acquire().await.unwrap());
        (dir, pool, conn)
    }

    #[tokio::test]
    async fn test_raw_multi_statement_sets() {
        let (_dir, _pool, mut conn) = sqlite_conn().await;
        let prepared = Statement::new(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); \
             INSERT INTO t (name) VALUES ('a'), ('b'); \
             SELECT id, name FROM t ORDER BY id",
        )
        .prepare(DatabaseType::SQLite, None)
        .unwrap();

        let trip = conn.round_trip(&prepared, true).await.unwrap();
        assert_eq!(trip.outcome.rows_affected, 2);
        let rows = trip.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&serde_json::json!("b")));
    }

    #[tokio::test]
    async fn test_select_after_insert_keeps_write_count() {
        let (_dir, _pool, mut conn) = sqlite_conn().await;
        let create = Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .prepare(DatabaseType::SQLite, None)
            .unwrap();
        conn.round_trip(&create, false).await.unwrap();

        let prepared = Statement::new(
            "INSERT INTO t (name) VALUES (@name); SELECT last_insert_rowid() AS id",
        )
        .param("name", "a")
        .prepare(DatabaseType::SQLite, None)
        .unwrap();
        let trip = conn.round_trip(&prepared, true).await.unwrap();
        assert_eq!(trip.outcome.rows_affected, 1);
        assert_eq!(trip.outcome.last_insert_id, Some(1));
        assert_eq!(trip.into_first_row().unwrap().scalar::<i64>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_undoes_writes() {
        let (_dir, _pool, mut conn) = sqlite_conn().await;
        let create = Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .prepare(DatabaseType::SQLite, None)
            .unwrap();
        conn.round_trip(&create, false).await.unwrap();

        conn.begin(IsolationLevel::default()).await.unwrap();
        let insert = Statement::new("INSERT INTO t (id) VALUES (@id)")
            .param("id", 7)
            .prepare(DatabaseType::SQLite, None)
            .unwrap();
        let trip = conn.round_trip(&insert, false).await.unwrap();
        assert_eq!(trip.outcome.last_insert_id, Some(7));
        conn.rollback().await.unwrap();

        let count = Statement::new("SELECT COUNT(*) AS n FROM t")
            .prepare(DatabaseType::SQLite, None)
            .unwrap();
        let row = conn.round_trip(&count, true).await.unwrap().into_first_row().unwrap();
        assert_eq!(row.scalar::<i64>().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_rejects_bound_multi_statement() {
        let (_dir, _pool, mut conn) = sqlite_conn().await;
        let prepared = Statement::new("SELECT @a; SELECT @a")
            .param("a", 1)
            .prepare(DatabaseType::SQLite, None)
            .unwrap();
        let err = conn.stream(&prepared).await.err().unwrap();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
