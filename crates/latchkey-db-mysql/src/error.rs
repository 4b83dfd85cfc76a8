//! Error types for the MySQL session backend.

use latchkey_store::StoreError;
use sqlx_core::error::Error as SqlxError;

/// MySQL error code for a missing table (`ER_NO_SUCH_TABLE`).
pub const MYSQL_NO_SUCH_TABLE: &str = "42S02";

/// Checks if a sqlx error is a duplicate-key violation.
pub fn is_unique_violation(err: &SqlxError) -> bool {
    matches!(err, SqlxError::Database(db_err) if db_err.is_unique_violation())
}

fn is_missing_table(err: &SqlxError) -> bool {
    matches!(err, SqlxError::Database(db_err) if db_err.code().as_deref() == Some(MYSQL_NO_SUCH_TABLE))
}

/// Errors raised while setting up the MySQL backend.
#[derive(Debug, thiserror::Error)]
pub enum MySqlError {
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

impl MySqlError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<MySqlError> for StoreError {
    fn from(err: MySqlError) -> Self {
        match err {
            MySqlError::Connection(e) => store_error(e),
            MySqlError::Migration(e) => StoreError::unavailable(format!("migration failed: {e}")),
            MySqlError::Config { message } => StoreError::invalid_argument(message),
        }
    }
}

/// Maps a driver failure to the store's error taxonomy.
pub fn store_error(err: SqlxError) -> StoreError {
    match err {
        SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) | SqlxError::ColumnNotFound(_) => {
            StoreError::invalid(format!("undecodable session row: {err}"))
        }
        ref e if is_missing_table(e) => {
            StoreError::unavailable("token_session table missing; run migrations")
        }
        other => StoreError::unavailable(other.to_string()),
    }
}

/// Result type alias for MySQL setup operations.
pub type Result<T> = std::result::Result<T, MySqlError>;
