//! # latchkey-store
//!
//! Token session store for OAuth 2.0 / OpenID Connect authorization servers.
//!
//! The store records the relationship between an issued token (access token,
//! refresh token or authorization code) and the request that produced it,
//! keyed by a signature derived from the token.
//!
//! ## Modules
//!
//! - [`storage`] - the [`CoreStorage`] and [`TokenRevocationStorage`] contracts
//! - [`store`] - [`TokenStore`], the contract implemented over a backend
//! - [`backend`] - the [`SessionBackend`] adapter trait
//! - [`requester`] - the [`Requester`] data type
//! - [`context`] - deadline and cancellation for each call
//! - [`config`] - lifespans and backend descriptors
//! - [`signature`] - token signature helpers
//! - `mock` - verifiable test double (feature `mock`)
//!
//! Backend adapters live in separate crates:
//!
//! - `latchkey-db-memory` - in-process maps
//! - `latchkey-db-postgres` - PostgreSQL
//! - `latchkey-db-mysql` - MySQL

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod kind;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod record;
pub mod requester;
pub mod signature;
pub mod storage;
pub mod store;

pub use backend::SessionBackend;
pub use config::{BackendDescriptor, DescriptorError, Lifespans, MAX_LIFESPAN, mask_password};
pub use context::RequestContext;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use kind::{TokenKind, UnknownTokenKind};
pub use record::SessionRecord;
pub use requester::Requester;
pub use signature::{derive_signature, generate_token};
pub use storage::{CoreStorage, TokenRevocationStorage};
pub use store::TokenStore;
