//! Error types for sqlctx.
//!
//! Every failure surfaced by a context, a factory or an execution primitive is a
//! [`DbError`]. Driver errors from `sqlx` and `tiberius` are classified into the
//! same taxonomy so callers can match on the kind of failure regardless of the
//! dialect behind the context.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The connection could not be opened or was lost mid-operation.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// The driver rejected a statement (constraint violation, syntax, ...).
    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("No result: {operation} returned no rows")]
    NoResult { operation: String },

    #[error("Expected exactly one row from {operation}, got {count}")]
    NotExactlyOne { operation: String, count: usize },

    #[error("Mapping error: {message} (target: {target})")]
    Mapping { message: String, target: String },

    #[error("Result set sequence error: {message}")]
    Sequence { message: String },

    #[error("Invalid context state: {message} (state: {state})")]
    InvalidState { message: String, state: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Template error: {message} (template: {template})")]
    Template { message: String, template: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn no_result(operation: impl Into<String>) -> Self {
        Self::NoResult {
            operation: operation.into(),
        }
    }

    pub fn not_exactly_one(operation: impl Into<String>, count: usize) -> Self {
        Self::NotExactlyOne {
            operation: operation.into(),
            count,
        }
    }

    /// Create a mapping error for the given target type or column.
    pub fn mapping(message: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            target: target.into(),
        }
    }

    pub fn sequence(message: impl Into<String>) -> Self {
        Self::Sequence {
            message: message.into(),
        }
    }

    /// Create an invalid state error, naming the state the context was in.
    pub fn invalid_state(message: impl Into<String>, state: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            state: state.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>, template: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
            template: template.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// This layer never retries on its own; the flag is for callers that do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// True for cancellation and timeouts, which leave the connection mid-protocol.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Roll back the context; check constraints and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::no_result("query"),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Increase acquire_timeout or max_connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::mapping(format!("Type not found: {}", type_name), type_name)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::mapping(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::mapping(
                format!("Column index {} out of bounds (len: {})", index, len),
                format!("#{}", index),
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::mapping(
                format!("Failed to decode column {}: {}", index, source),
                index,
            ),
            sqlx::Error::Decode(source) => {
                DbError::mapping(format!("Decode error: {}", source), "value")
            }
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Open a new context; the connection is gone",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert tiberius (SQL Server) errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;
        match err {
            TdsError::Server(token) => DbError::execution(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Roll back the context; check constraints and referenced objects",
            ),
            TdsError::Io { message, .. } => DbError::connection(
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Set trust_cert=true for self-signed development servers",
            ),
            TdsError::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            TdsError::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            TdsError::Conversion(msg) => {
                DbError::mapping(format!("Conversion error: {}", msg), "value")
            }
            other => DbError::internal(format!("SQL Server driver error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
