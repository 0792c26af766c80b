//! Database abstraction layer.
//!
//! This module provides:
//! - Connection sources and the connection a context owns
//! - Schema templates and named parameters
//! - Execution primitives behind read and write sessions
//! - Command and query contracts
//! - Contexts, factories and the target registry
//! - Row decoding into caller types

#[macro_use]
pub mod macros;
pub mod command;
pub mod connection;
pub mod context;
pub mod executor;
pub mod factory;
pub mod mapping;
pub mod params;
pub mod pool;
pub mod result_sets;
pub mod statement;
pub mod template;
pub mod types;

pub use command::{BatchCommand, Command, Query, RowCountCommand};
pub use connection::DbConnection;
pub use context::Context;
pub use executor::{Read, ReadSession, Session, Write, WriteSession};
pub use factory::{ContextFactories, ContextFactory, ContextOptions};
pub use mapping::{ColumnMap, Mapped, validate_column_maps};
pub use params::Params;
pub use pool::DbPool;
pub use result_sets::ResultSets;
pub use statement::{Prepared, Statement};
pub use template::{SqlTemplate, validate_templates};
pub use types::Record;
