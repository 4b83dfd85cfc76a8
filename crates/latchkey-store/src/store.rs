//! The core token store.
//!
//! [`TokenStore`] validates arguments, honours the caller's context, erases
//! and decodes session payloads, and turns backend outcomes into the error
//! kinds of [`StoreError`]. Physical storage is delegated to a
//! [`SessionBackend`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::SessionBackend;
use crate::context::RequestContext;
use crate::error::{StoreError, StoreResult};
use crate::kind::TokenKind;
use crate::record::SessionRecord;
use crate::requester::Requester;
use crate::storage::{CoreStorage, TokenRevocationStorage};

/// Token session store over a configured backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Debug)]
pub struct TokenStore<B> {
    backend: Arc<B>,
}

impl<B> Clone for TokenStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: SessionBackend + 'static> TokenStore<B> {
    /// Creates a store that owns `backend`.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Creates a store over a shared backend.
    #[must_use]
    pub fn from_arc(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// The configured backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Physically removes expired records of every kind.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`, `Canceled` or `DeadlineExceeded`.
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn purge_expired(&self, ctx: &RequestContext) -> StoreResult<u64> {
        let now = OffsetDateTime::now_utc();
        let purged = ctx
            .run(self.backend.purge_expired(now))
            .await
            .inspect_err(|e| warn!(error = %e, "expired session purge failed"))?;
        debug!(purged, "expired sessions purged");
        Ok(purged)
    }

    /// Checks that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`, `Canceled` or `DeadlineExceeded`.
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn ping(&self, ctx: &RequestContext) -> StoreResult<()> {
        ctx.run(self.backend.ping()).await
    }

    /// Spawns a task that purges expired records every `interval` until
    /// `shutdown` is canceled.
    ///
    /// Purges go through the backend like any other write, so they never
    /// interleave with an in-flight create for the same key.
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                backend = backend.name(),
                interval_secs = interval.as_secs_f64(),
                "session sweeper started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match backend.purge_expired(OffsetDateTime::now_utc()).await {
                            Ok(0) => {}
                            Ok(purged) => info!(purged, "sweeper removed expired sessions"),
                            Err(e) => warn!(error = %e, "sweeper pass failed"),
                        }
                    }
                }
            }
            info!(backend = backend.name(), "session sweeper stopped");
        })
    }
}

fn require_signature(signature: &str) -> StoreResult<()> {
    if signature.is_empty() {
        return Err(StoreError::invalid_argument("signature must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl<B: SessionBackend + 'static> CoreStorage for TokenStore<B> {
    #[instrument(skip_all, fields(kind = %kind, backend = self.backend.name()))]
    async fn create_session<S>(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync,
    {
        require_signature(signature)?;
        let stored = requester.to_stored()?;
        let request_id = stored.id();
        let record = SessionRecord::new(kind, signature, stored);
        let now = OffsetDateTime::now_utc();

        match ctx.run(self.backend.insert(record, now)).await {
            Ok(()) => {
                debug!(%request_id, "session created");
                Ok(())
            }
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "session create failed");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all, fields(kind = %kind, backend = self.backend.name()))]
    async fn get_session<S>(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send,
    {
        require_signature(signature)?;
        let now = OffsetDateTime::now_utc();

        let record = ctx
            .run(self.backend.fetch(kind, signature, now))
            .await
            .inspect_err(|e| {
                if e.is_unavailable() {
                    warn!(error = %e, "session lookup failed");
                }
            })?
            .ok_or_else(|| StoreError::not_found(kind))?;

        // Backends filter on expiry already; this keeps a record that expired
        // between the query and now from leaking out.
        if !record.is_live_at(now) {
            return Err(StoreError::not_found(kind));
        }

        record.requester.decode()
    }

    #[instrument(skip_all, fields(kind = %kind, backend = self.backend.name()))]
    async fn delete_session(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<()> {
        require_signature(signature)?;
        let now = OffsetDateTime::now_utc();

        let removed = ctx
            .run(self.backend.remove(kind, signature, now))
            .await
            .inspect_err(|e| {
                if e.is_unavailable() {
                    warn!(error = %e, "session delete failed");
                }
            })?;

        if !removed {
            return Err(StoreError::not_found(kind));
        }
        debug!("session deleted");
        Ok(())
    }
}

#[async_trait]
impl<B: SessionBackend + 'static> TokenRevocationStorage for TokenStore<B> {
    #[instrument(skip_all, fields(kind = %kind, %request_id, backend = self.backend.name()))]
    async fn revoke_by_request_id(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        request_id: Uuid,
    ) -> StoreResult<u64> {
        let revoked = ctx
            .run(self.backend.remove_by_request_id(kind, request_id))
            .await
            .inspect_err(|e| warn!(error = %e, "grant revocation failed"))?;
        debug!(revoked, "grant sessions revoked");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    /// Minimal backend for exercising the store's own logic.
    #[derive(Default)]
    struct MapBackend {
        records: Mutex<HashMap<(TokenKind, String), SessionRecord>>,
        offline: bool,
    }

    #[async_trait]
    impl SessionBackend for MapBackend {
        fn name(&self) -> &'static str {
            "map"
        }

        async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()> {
            if self.offline {
                return Err(StoreError::unavailable("offline"));
            }
            let mut records = self.records.lock();
            let key = (record.kind, record.signature.clone());
            if records.get(&key).is_some_and(|r| r.is_live_at(now)) {
                return Err(StoreError::conflict(record.kind));
            }
            records.insert(key, record);
            Ok(())
        }

        async fn fetch(
            &self,
            kind: TokenKind,
            signature: &str,
            _now: OffsetDateTime,
        ) -> StoreResult<Option<SessionRecord>> {
            if self.offline {
                return Err(StoreError::unavailable("offline"));
            }
            // Deliberately returns expired records to test the store's check.
            Ok(self
                .records
                .lock()
                .get(&(kind, signature.to_string()))
                .cloned())
        }

        async fn remove(
            &self,
            kind: TokenKind,
            signature: &str,
            now: OffsetDateTime,
        ) -> StoreResult<bool> {
            let mut records = self.records.lock();
            match records.remove(&(kind, signature.to_string())) {
                Some(record) => Ok(record.is_live_at(now)),
                None => Ok(false),
            }
        }

        async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64> {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|(k, _), r| !(*k == kind && r.requester.id() == request_id));
            Ok((before - records.len()) as u64)
        }

        async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|_, r| r.is_live_at(now));
            Ok((before - records.len()) as u64)
        }

        async fn ping(&self) -> StoreResult<()> {
            if self.offline {
                return Err(StoreError::unavailable("offline"));
            }
            Ok(())
        }
    }

    fn requester() -> Requester<serde_json::Value> {
        Requester::new(
            "app1",
            serde_json::json!({"subject": "alice"}),
            Duration::from_secs(600),
        )
        .with_granted_scopes(["openid"])
    }

    #[tokio::test]
    async fn test_empty_signature_is_rejected() {
        let store = TokenStore::new(MapBackend::default());
        let ctx = RequestContext::background();

        let err = store
            .create_session(&ctx, TokenKind::AccessToken, "", &requester())
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = store
            .get_session::<serde_json::Value>(&ctx, TokenKind::AccessToken, "")
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = store
            .delete_session(&ctx, TokenKind::AccessToken, "")
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_expired_record_from_backend_reads_as_not_found() {
        let store = TokenStore::new(MapBackend::default());
        let ctx = RequestContext::background();
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);

        store
            .create_session(&ctx, TokenKind::RefreshToken, "sig", &requester().expiring_at(past))
            .await
            .unwrap();

        let err = store
            .get_session::<serde_json::Value>(&ctx, TokenKind::RefreshToken, "sig")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_unavailable() {
        let backend = MapBackend {
            offline: true,
            ..Default::default()
        };
        let store = TokenStore::new(backend);
        let ctx = RequestContext::background();

        let err = store
            .create_session(&ctx, TokenKind::AccessToken, "sig", &requester())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.ping(&ctx).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_canceled_context_does_not_create() {
        let store = TokenStore::new(MapBackend::default());
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = store
            .create_session(&ctx, TokenKind::AccessToken, "sig", &requester())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Canceled);

        let fresh = RequestContext::background();
        let err = store
            .get_session::<serde_json::Value>(&fresh, TokenKind::AccessToken, "sig")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_revoke_by_request_id_counts_only_matching_kind() {
        let store = TokenStore::new(MapBackend::default());
        let ctx = RequestContext::background();
        let grant = requester();

        store
            .create_refresh_token_session(&ctx, "r1", &grant)
            .await
            .unwrap();
        store
            .create_access_token_session(&ctx, "a1", &grant)
            .await
            .unwrap();

        let revoked = store.revoke_refresh_tokens(&ctx, grant.id()).await.unwrap();
        assert_eq!(revoked, 1);
        assert!(
            store
                .get_access_token_session::<serde_json::Value>(&ctx, "a1")
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops() {
        let store = TokenStore::new(MapBackend::default());
        let ctx = RequestContext::background();
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        store
            .create_session(&ctx, TokenKind::AccessToken, "old", &requester().expiring_at(past))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_secs(30), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(store.backend().records.lock().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
