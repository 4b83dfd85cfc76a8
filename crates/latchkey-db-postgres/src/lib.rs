//! PostgreSQL session backend for latchkey.
//!
//! Provides [`PostgresBackend`], a [`SessionBackend`](latchkey_store::SessionBackend)
//! over a single `token_session` table, plus pool setup and embedded
//! migrations.
//!
//! # Example
//!
//! ```ignore
//! use latchkey_db_postgres::{PostgresBackend, PostgresConfig};
//! use latchkey_store::TokenStore;
//!
//! let backend = PostgresBackend::connect(&PostgresConfig::new(url)).await?;
//! let store = TokenStore::new(backend);
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod session;

pub use config::PostgresConfig;
pub use error::{PostgresError, Result};
pub use pool::create_pool;
pub use session::PostgresBackend;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = sqlx_postgres::PgPool;
