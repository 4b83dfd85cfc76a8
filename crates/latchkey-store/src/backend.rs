//! Storage backend adapter trait.
//!
//! Adapters own physical persistence. They report outcomes as plain values
//! (`Option`, `bool`, counts) and leave the mapping to `NotFound` to the
//! [`TokenStore`](crate::TokenStore), so every backend reports the same
//! errors for the same situations.
//!
//! # Implementation Notes
//!
//! Implementations must:
//!
//! - Make `insert` a create-if-absent with no observable window between the
//!   check and the write
//! - Make `remove` a delete-if-present under the same discipline
//! - Never expose a record before its insert is fully committed
//! - Treat records whose expiry is at or before `now` as absent
//! - Map every driver failure to `StoreError::Unavailable` (or `Conflict`
//!   for a key collision)
//!
//! The `now` arguments come from the store so that all backends share one
//! clock.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::kind::TokenKind;
use crate::record::SessionRecord;

/// Physical persistence of session records keyed by `(kind, signature)`.
///
/// # Implementations
///
/// - `latchkey-db-memory` - process-local maps behind one lock
/// - `latchkey-db-postgres` - PostgreSQL table
/// - `latchkey-db-mysql` - MySQL table
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Inserts `record` unless a live record exists for its key.
    ///
    /// An expired record under the same key is replaced.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a live record exists, `Unavailable` on
    /// infrastructure failure.
    async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()>;

    /// Fetches the live record for `(kind, signature)`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on infrastructure failure, `Invalid` if the
    /// stored row cannot be decoded.
    async fn fetch(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRecord>>;

    /// Removes the live record for `(kind, signature)`.
    ///
    /// Returns `true` if a live record was removed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on infrastructure failure.
    async fn remove(&self, kind: TokenKind, signature: &str, now: OffsetDateTime)
    -> StoreResult<bool>;

    /// Removes every record of `kind` issued for `request_id`.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on infrastructure failure.
    async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64>;

    /// Physically removes records that expired at or before `now`.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on infrastructure failure.
    async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64>;

    /// Checks that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if it is not.
    async fn ping(&self) -> StoreResult<()>;
}
