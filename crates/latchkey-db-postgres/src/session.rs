//! Token session storage.
//!
//! Sessions of all three token kinds share the `token_session` table, keyed
//! by `(kind, signature)`. The full requester is kept as JSONB; request id,
//! client id and expiry are copied into columns for revocation and sweeping.

use async_trait::async_trait;
use latchkey_store::{
    Requester, SessionBackend, SessionRecord, StoreError, StoreResult, TokenKind,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::PgPool;
use crate::config::PostgresConfig;
use crate::error::{Result, is_unique_violation, store_error};

// =============================================================================
// Types
// =============================================================================

/// Columns read back for a session lookup.
type SessionRow = (serde_json::Value, OffsetDateTime);

fn record_from_row(
    kind: TokenKind,
    signature: &str,
    (requester, created_at): SessionRow,
) -> StoreResult<SessionRecord> {
    let requester: Requester = serde_json::from_value(requester)?;
    Ok(SessionRecord {
        kind,
        signature: signature.to_owned(),
        requester,
        created_at,
    })
}

// =============================================================================
// Backend
// =============================================================================

/// PostgreSQL-backed session storage.
///
/// Create is a single `INSERT ... ON CONFLICT DO UPDATE ... WHERE` statement:
/// it writes when the key is free or holds an expired row, and touches
/// nothing when a live row exists. Delete is a single `DELETE ... RETURNING`.
/// Neither needs an explicit transaction.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Wraps an existing pool. The schema must already be migrated.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a pool from `config`, running migrations if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or a migration fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = crate::pool::create_pool(config).await?;
        if config.run_migrations {
            crate::migrations::run(&pool).await?;
        }
        Ok(Self::new(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `PostgresError::Migration` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        crate::migrations::run(&self.pool).await
    }
}

#[async_trait]
impl SessionBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip_all, fields(kind = %record.kind))]
    async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()> {
        let kind = record.kind;
        let payload = serde_json::to_value(&record.requester)?;

        let result = query(
            r#"
            INSERT INTO token_session
                (kind, signature, request_id, client_id, requester, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (kind, signature) DO UPDATE
            SET request_id = EXCLUDED.request_id,
                client_id = EXCLUDED.client_id,
                requester = EXCLUDED.requester,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            WHERE token_session.expires_at <= $8
            "#,
        )
        .bind(kind.as_str())
        .bind(&record.signature)
        .bind(record.requester.id())
        .bind(record.requester.client_id())
        .bind(&payload)
        .bind(record.expires_at())
        .bind(record.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StoreError::conflict(kind);
            }
            store_error(e)
        })?;

        // Zero rows means the conflict target held a live row.
        if result.rows_affected() == 0 {
            return Err(StoreError::conflict(kind));
        }

        debug!("session row written");
        Ok(())
    }

    #[instrument(skip_all, fields(kind = %kind))]
    async fn fetch(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = query_as(
            r#"
            SELECT requester, created_at
            FROM token_session
            WHERE kind = $1
              AND signature = $2
              AND expires_at > $3
            "#,
        )
        .bind(kind.as_str())
        .bind(signature)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(|row| record_from_row(kind, signature, row))
            .transpose()
    }

    #[instrument(skip_all, fields(kind = %kind))]
    async fn remove(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        // Expired rows are removed too, but only a live one counts.
        let row: Option<(OffsetDateTime,)> = query_as(
            r#"
            DELETE FROM token_session
            WHERE kind = $1
              AND signature = $2
            RETURNING expires_at
            "#,
        )
        .bind(kind.as_str())
        .bind(signature)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(matches!(row, Some((expires_at,)) if expires_at > now))
    }

    #[instrument(skip_all, fields(kind = %kind, %request_id))]
    async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64> {
        let result = query(
            r#"
            DELETE FROM token_session
            WHERE kind = $1
              AND request_id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all)]
    async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result = query("DELETE FROM token_session WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        crate::pool::test_connection(&self.pool)
            .await
            .map_err(StoreError::from)
    }
}
