//! Connection pool management for the MySQL session backend.

use std::time::Duration;

use latchkey_store::mask_password;
use sqlx_core::pool::PoolOptions;
use sqlx_mysql::{MySql, MySqlPool};
use tracing::{debug, info, instrument};

use crate::config::MySqlConfig;
use crate::error::{MySqlError, Result};

/// Type alias for MySQL pool options.
pub type MySqlPoolOptions = PoolOptions<MySql>;

/// Creates a new MySQL connection pool from the given configuration.
///
/// # Errors
///
/// Returns `MySqlError::Config` for a zero pool size and
/// `MySqlError::Connection` if the first connection cannot be opened.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &MySqlConfig) -> Result<MySqlPool> {
    if config.pool_size == 0 {
        return Err(MySqlError::config("pool_size must be at least 1"));
    }

    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Creating MySQL connection pool"
    );

    let mut options = MySqlPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));

    if let Some(idle_timeout) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;
    debug!("MySQL connection pool created");
    Ok(pool)
}

/// Tests the connection to the database.
///
/// # Errors
///
/// Returns an error if `SELECT 1` fails.
pub async fn test_connection(pool: &MySqlPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(MySqlError::from)?;
    Ok(())
}
