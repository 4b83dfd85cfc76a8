//! # latchkey
//!
//! Host for the latchkey token session store: picks a backend from
//! configuration, sets up logging, and provides the token issuance routines
//! used by an authorization server's token endpoint.
//!
//! The `latchkey` binary wraps this crate with maintenance commands
//! (`migrate`, `check`, `sweep`, `config`).

pub mod backend;
pub mod config;
pub mod grant;
pub mod observability;

pub use backend::{Backend, Store, open_store};
pub use config::{AppConfig, LogFormat};
pub use grant::{GrantError, IssuedTokens, exchange_authorize_code, rotate_refresh_token};
