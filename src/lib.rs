//! sqlctx library
//!
//! Connection- and transaction-scoped execution of commands and queries over
//! MySQL, PostgreSQL, SQLite and SQL Server. A [`ContextFactory`] opens a
//! [`Context`]; callers dispatch [`Command`]s and [`Query`]s through it and
//! then commit, roll back or close.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{
    BatchCommand, Command, Context, ContextFactories, ContextFactory, ContextOptions, Params,
    Query, ReadSession, RowCountCommand, SqlTemplate, Statement, WriteSession,
};
pub use error::{DbError, DbResult};
pub use models::{ContextState, IsolationLevel, TransactionSpec};
pub use tokio_util::sync::CancellationToken;
