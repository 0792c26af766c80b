//! Data models for sqlctx.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod transaction;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use query::{CommandKind, ExecuteOutcome, MAX_QUERY_TIMEOUT_SECS, QueryParam};
pub use transaction::{ContextState, IsolationLevel, TransactionSpec};
