//! Error types for tablite.
//!
//! Every fallible operation in the crate returns [`AppResult`]. Variants carry
//! plain strings so errors can be cloned and shared between concurrent waiters
//! (see the in-flight connect cache in [`crate::db::registry`]).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Unsupported database URL: {url}")]
    UnsupportedBackend { url: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Model request failed{}: {message}", status_suffix(.status))]
    Model {
        status: Option<u16>,
        message: String,
    },

    #[error("Model returned no usable answer during {stage}")]
    EmptyResponse { stage: String },

    #[error("Generation stopped at {stage}: {reason}")]
    Pipeline { stage: String, reason: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    pub fn unsupported_backend(url: impl Into<String>) -> Self {
        Self::UnsupportedBackend { url: url.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a provider resolution error (unknown model, missing or malformed key).
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a model call error, optionally with the HTTP status returned by the provider.
    pub fn model(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Model {
            status,
            message: message.into(),
        }
    }

    pub fn empty_response(stage: impl Into<String>) -> Self {
        Self::EmptyResponse {
            stage: stage.into(),
        }
    }

    pub fn pipeline(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::UnsupportedBackend { .. } => {
                Some("Use a mysql://, postgres:// or sqlite:// connection URL")
            }
            Self::Provider { .. } => Some("Check the selected model and its provider API key"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::EmptyResponse { .. }
        ) || matches!(self, Self::Model { status, .. } if status.is_none_or(|s| s == 429 || s >= 500))
    }

    /// Soft failures mean the model answered but without anything usable.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::EmptyResponse { .. })
    }

    /// The HTTP status of a failed model call, for user-facing notifications.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Model { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Convert sqlx errors to AppError.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => AppError::connection(
                msg.to_string(),
                "Check the connection URL format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                AppError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => AppError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => AppError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                AppError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => AppError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => AppError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => AppError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                AppError::schema(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                AppError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => AppError::internal(format!("Decode error: {}", source)),
            _ => AppError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            AppError::model(status, "request timed out")
        } else {
            AppError::model(status, err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::storage(err.to_string())
    }
}

/// Result type alias used across the crate.
pub type AppResult<T> = Result<T, AppError>;
