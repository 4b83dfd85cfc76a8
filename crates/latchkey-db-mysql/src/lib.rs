//! MySQL session backend for latchkey.
//!
//! Same table layout as the PostgreSQL backend, with the requester stored as
//! JSON text and create performed inside a transaction.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod session;

pub use config::MySqlConfig;
pub use error::{MySqlError, Result};
pub use pool::create_pool;
pub use session::MySqlBackend;
