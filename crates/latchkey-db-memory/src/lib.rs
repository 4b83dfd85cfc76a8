//! In-memory session backend for latchkey.
//!
//! Data lives in process memory and is lost on restart. Suitable for tests,
//! development and single-instance deployments that accept re-login after a
//! restart.
//!
//! # Example
//!
//! ```ignore
//! use latchkey_db_memory::MemoryStorage;
//! use latchkey_store::{CoreStorage, RequestContext, TokenStore};
//!
//! let store = TokenStore::new(MemoryStorage::new());
//! store.create_access_token_session(&RequestContext::background(), &signature, &requester).await?;
//! ```

pub mod storage;

pub use storage::{MemoryOptions, MemoryStorage};

/// Token store backed by process memory.
pub type MemoryTokenStore = latchkey_store::TokenStore<MemoryStorage>;

/// Creates a token store over a fresh, empty in-memory backend.
#[must_use]
pub fn create_memory_store() -> MemoryTokenStore {
    latchkey_store::TokenStore::new(MemoryStorage::new())
}
