//! Error types for the data-access engine.
//!
//! Every failure surfaced by this crate is a [`DbError`]. Variants map onto four
//! broad categories (see [`ErrorCategory`]): configuration problems, statement
//! failures, safety-policy violations and migration/seed failures. Raw driver
//! errors never escape; they are converted through `From<sqlx::Error>`.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String, group: Option<String> },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// Human-readable SQL with parameters interpolated. Never executed.
        sql: Option<String>,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Unsafe operation refused: {operation}. {reason}")]
    UnsafeOperation { operation: String, reason: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Migration '{name}' failed: {message}")]
    Migration { name: String, message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification used by callers deciding whether to log, retry or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Statement,
    Policy,
    Migration,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Statement => "statement",
            Self::Policy => "policy",
            Self::Migration => "migration",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl DbError {
    /// Create a configuration error, optionally scoped to a connection group.
    pub fn configuration(message: impl Into<String>, group: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            group: group.map(str::to_string),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement error without SQL context.
    pub fn statement(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql: None,
            sql_state,
        }
    }

    pub fn unsafe_operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsafeOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn migration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the readable SQL text to a statement error.
    ///
    /// Other variants are converted into a statement error so the SQL is not lost.
    pub fn with_sql(self, sql: impl Into<String>) -> Self {
        match self {
            Self::Statement {
                message, sql_state, ..
            } => Self::Statement {
                message,
                sql: Some(sql.into()),
                sql_state,
            },
            Self::Timeout { .. } | Self::Connection { .. } => self,
            other => Self::Statement {
                message: other.to_string(),
                sql: Some(sql.into()),
                sql_state: None,
            },
        }
    }

    /// The interpolated SQL attached to a statement error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Statement { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Statement { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Configuration { .. } => {
                Some("Check the connection group exists and its driver/database fields are set")
            }
            Self::UnsafeOperation { .. } => {
                Some("Add a where clause or select a table before the terminal call")
            }
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::Connection { .. } => ErrorCategory::Configuration,
            Self::Statement { .. } | Self::Timeout { .. } => ErrorCategory::Statement,
            Self::UnsafeOperation { .. } | Self::InvalidInput { .. } => ErrorCategory::Policy,
            Self::Migration { .. } => ErrorCategory::Migration,
            _ => ErrorCategory::Other,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection descriptor format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::statement(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::statement("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
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
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid_input(format!("JSON error: {}", err))
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
