//! Error types for the PostgreSQL session backend.

use latchkey_store::StoreError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is a unique-key violation.
pub fn is_unique_violation(err: &SqlxError) -> bool {
    matches!(err, SqlxError::Database(db_err) if db_err.is_unique_violation())
}

/// Errors raised while setting up the PostgreSQL backend.
///
/// Per-call failures are reported as [`StoreError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => store_error(e),
            PostgresError::Migration(e) => StoreError::unavailable(format!("migration failed: {e}")),
            PostgresError::Config { message } => StoreError::invalid_argument(message),
        }
    }
}

/// Maps a driver failure to the store's error taxonomy.
///
/// Row decoding problems become `Invalid`; everything else, including a
/// missing schema, is `Unavailable`.
pub fn store_error(err: SqlxError) -> StoreError {
    match err {
        SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) | SqlxError::ColumnNotFound(_) => {
            StoreError::invalid(format!("undecodable session row: {err}"))
        }
        ref e if has_pg_error_code(e, PG_UNDEFINED_TABLE) => {
            StoreError::unavailable("token_session table missing; run migrations")
        }
        other => StoreError::unavailable(other.to_string()),
    }
}

/// Result type alias for PostgreSQL setup operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
