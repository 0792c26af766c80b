//! Transaction-related data models.

use crate::models::DatabaseType;
use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    /// SQL Server row versioning; PostgreSQL treats it as REPEATABLE READ.
    Snapshot,
}

impl IsolationLevel {
    /// SQL keyword for `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self, db_type: DatabaseType) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot if db_type == DatabaseType::Mssql => "SNAPSHOT",
            Self::Snapshot => "REPEATABLE READ",
        }
    }

    /// Statements that open a transaction at this level, in order.
    pub fn begin_statements(&self, db_type: DatabaseType) -> Vec<String> {
        let level = self.as_sql(db_type);
        match db_type {
            DatabaseType::MySQL => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {level}"),
                "START TRANSACTION".to_string(),
            ],
            DatabaseType::PostgreSQL => vec![format!("BEGIN ISOLATION LEVEL {level}")],
            // SQLite is serializable; IMMEDIATE takes the write lock up front so
            // stricter levels cannot fail later on lock upgrade.
            DatabaseType::SQLite => match self {
                Self::ReadUncommitted | Self::ReadCommitted => vec!["BEGIN".to_string()],
                _ => vec!["BEGIN IMMEDIATE".to_string()],
            },
            DatabaseType::Mssql => vec![format!(
                "SET TRANSACTION ISOLATION LEVEL {level}; BEGIN TRANSACTION"
            )],
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
        };
        f.write_str(name)
    }
}

/// Request for a transaction when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub isolation: IsolationLevel,
}

impl TransactionSpec {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self { isolation }
    }
}

impl From<IsolationLevel> for TransactionSpec {
    fn from(isolation: IsolationLevel) -> Self {
        Self::new(isolation)
    }
}

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Open,
    Committed,
    RolledBack,
}

impl ContextState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Committed => write!(f, "Committed"),
            Self::RolledBack => write!(f, "RolledBack"),
        }
    }
}
