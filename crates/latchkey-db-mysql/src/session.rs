//! Token session storage.

use async_trait::async_trait;
use latchkey_store::{
    Requester, SessionBackend, SessionRecord, StoreError, StoreResult, TokenKind,
};
use sqlx_core::connection::Connection;
use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_mysql::{MySqlConnection, MySqlPool};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::MySqlConfig;
use crate::error::{Result, is_unique_violation, store_error};

async fn insert_row(
    conn: &mut MySqlConnection,
    record: &SessionRecord,
    payload: &str,
) -> std::result::Result<(), sqlx_core::Error> {
    query(
        r#"
        INSERT INTO token_session
            (kind, signature, request_id, client_id, requester, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.kind.as_str())
    .bind(&record.signature)
    .bind(record.requester.id().to_string())
    .bind(record.requester.client_id())
    .bind(payload)
    .bind(record.expires_at())
    .bind(record.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn replace_row(
    conn: &mut MySqlConnection,
    record: &SessionRecord,
    payload: &str,
) -> std::result::Result<(), sqlx_core::Error> {
    query(
        r#"
        UPDATE token_session
        SET request_id = ?, client_id = ?, requester = ?, expires_at = ?, created_at = ?
        WHERE kind = ? AND signature = ?
        "#,
    )
    .bind(record.requester.id().to_string())
    .bind(record.requester.client_id())
    .bind(payload)
    .bind(record.expires_at())
    .bind(record.created_at)
    .bind(record.kind.as_str())
    .bind(&record.signature)
    .execute(conn)
    .await?;
    Ok(())
}

/// MySQL-backed session storage.
///
/// Create runs in a `READ COMMITTED` transaction that first locks the key
/// with `SELECT … FOR UPDATE`. A live row is a `Conflict`, an expired row is
/// overwritten in place, and a missing key is inserted. Concurrent creates of
/// an existing key queue on the row lock; concurrent creates of a missing key
/// meet at the primary key and the loser gets `Conflict`.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    #[must_use]
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a pool from `config`, running migrations if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or a migration fails.
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        let pool = crate::pool::create_pool(config).await?;
        if config.run_migrations {
            crate::migrations::run(&pool).await?;
        }
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `MySqlError::Migration` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        crate::migrations::run(&self.pool).await
    }
}

#[async_trait]
impl SessionBackend for MySqlBackend {
    fn name(&self) -> &'static str {
        "mysql"
    }

    #[instrument(skip_all, fields(kind = %record.kind))]
    async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()> {
        let kind = record.kind;
        let payload = serde_json::to_string(&record.requester)?;

        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        // A locking read of a missing key takes no gap lock at this level.
        (&mut *conn)
            .execute("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .await
            .map_err(store_error)?;
        let mut tx = Connection::begin(&mut *conn).await.map_err(store_error)?;

        let existing: Option<(OffsetDateTime,)> = query_as(
            r#"
            SELECT expires_at
            FROM token_session
            WHERE kind = ? AND signature = ?
            FOR UPDATE
            "#,
        )
        .bind(kind.as_str())
        .bind(&record.signature)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        let written = match existing {
            Some((expires_at,)) if expires_at > now => false,
            Some(_) => {
                replace_row(&mut tx, &record, &payload)
                    .await
                    .map_err(store_error)?;
                debug!("expired session row replaced");
                true
            }
            None => match insert_row(&mut tx, &record, &payload).await {
                Ok(()) => true,
                Err(e) if is_unique_violation(&e) => false,
                Err(e) => return Err(store_error(e)),
            },
        };

        if !written {
            tx.rollback().await.map_err(store_error)?;
            return Err(StoreError::conflict(kind));
        }

        tx.commit().await.map_err(store_error)?;

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
        let row: Option<(String, OffsetDateTime)> = query_as(
            r#"
            SELECT requester, created_at
            FROM token_session
            WHERE kind = ? AND signature = ? AND expires_at > ?
            "#,
        )
        .bind(kind.as_str())
        .bind(signature)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some((requester, created_at)) = row else {
            return Ok(None);
        };
        let requester: Requester = serde_json::from_str(&requester)?;

        Ok(Some(SessionRecord {
            kind,
            signature: signature.to_owned(),
            requester,
            created_at,
        }))
    }

    #[instrument(skip_all, fields(kind = %kind))]
    async fn remove(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        // An expired row is left for the sweeper.
        let result = query(
            r#"
            DELETE FROM token_session
            WHERE kind = ? AND signature = ? AND expires_at > ?
            "#,
        )
        .bind(kind.as_str())
        .bind(signature)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(kind = %kind, %request_id))]
    async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64> {
        let result = query("DELETE FROM token_session WHERE kind = ? AND request_id = ?")
            .bind(kind.as_str())
            .bind(request_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all)]
    async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result = query("DELETE FROM token_session WHERE expires_at <= ?")
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
