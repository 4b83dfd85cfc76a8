use std::collections::HashMap;

use async_trait::async_trait;
use latchkey_store::{SessionBackend, SessionRecord, StoreError, StoreResult, TokenKind};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::trace;
use uuid::Uuid;

/// Sizing hints for the in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Initial capacity of each per-kind map.
    pub initial_capacity: Option<usize>,
}

type Table = HashMap<String, SessionRecord>;

/// One map per token kind.
#[derive(Debug, Default)]
struct Tables {
    access_tokens: Table,
    refresh_tokens: Table,
    authorize_codes: Table,
}

impl Tables {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            access_tokens: HashMap::with_capacity(capacity),
            refresh_tokens: HashMap::with_capacity(capacity),
            authorize_codes: HashMap::with_capacity(capacity),
        }
    }

    fn table(&self, kind: TokenKind) -> &Table {
        match kind {
            TokenKind::AccessToken => &self.access_tokens,
            TokenKind::RefreshToken => &self.refresh_tokens,
            TokenKind::AuthorizeCode => &self.authorize_codes,
        }
    }

    fn table_mut(&mut self, kind: TokenKind) -> &mut Table {
        match kind {
            TokenKind::AccessToken => &mut self.access_tokens,
            TokenKind::RefreshToken => &mut self.refresh_tokens,
            TokenKind::AuthorizeCode => &mut self.authorize_codes,
        }
    }
}

/// Process-local session storage.
///
/// All three maps sit behind a single mutex, so every read-modify-write
/// (create-if-absent, delete-if-present, purge) is atomic with respect to the
/// others. Expiry is lazy: expired records read as absent and are dropped
/// when touched, or in bulk by [`SessionBackend::purge_expired`].
///
/// Instances never share state; each `new()` starts empty.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty storage with the given options.
    #[must_use]
    pub fn with_options(options: MemoryOptions) -> Self {
        let tables = match options.initial_capacity {
            Some(capacity) => Tables::with_capacity(capacity),
            None => Tables::default(),
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Number of physically present records of `kind`, expired ones included.
    #[must_use]
    pub fn len(&self, kind: TokenKind) -> usize {
        self.tables.lock().table(kind).len()
    }

    /// Total number of physically present records.
    #[must_use]
    pub fn total(&self) -> usize {
        let tables = self.tables.lock();
        TokenKind::ALL.iter().map(|k| tables.table(*k).len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[async_trait]
impl SessionBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()> {
        let kind = record.kind;
        let mut tables = self.tables.lock();
        let table = tables.table_mut(kind);

        if let Some(existing) = table.get(&record.signature)
            && existing.is_live_at(now)
        {
            return Err(StoreError::conflict(kind));
        }

        table.insert(record.signature.clone(), record);
        Ok(())
    }

    async fn fetch(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRecord>> {
        let mut tables = self.tables.lock();
        let table = tables.table_mut(kind);

        match table.get(signature) {
            Some(record) if record.is_live_at(now) => Ok(Some(record.clone())),
            Some(_) => {
                table.remove(signature);
                trace!(kind = %kind, "dropped expired session on read");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.table_mut(kind).remove(signature) {
            Some(record) => Ok(record.is_live_at(now)),
            None => Ok(false),
        }
    }

    async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let table = tables.table_mut(kind);
        let before = table.len();
        table.retain(|_, record| record.requester.id() != request_id);
        Ok((before - table.len()) as u64)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let mut purged = 0;
        for kind in TokenKind::ALL {
            let table = tables.table_mut(kind);
            let before = table.len();
            table.retain(|_, record| record.is_live_at(now));
            purged += (before - table.len()) as u64;
        }
        Ok(purged)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
