//! Backend selection.
//!
//! The set of backends is closed, so selection is an enum rather than a
//! trait object. [`Backend::connect`] turns a [`DatabaseConfig`] into the
//! matching adapter.

use async_trait::async_trait;
use latchkey_db_memory::MemoryStorage;
use latchkey_db_mysql::{MySqlBackend, MySqlConfig};
use latchkey_db_postgres::{PostgresBackend, PostgresConfig};
use latchkey_store::{
    BackendDescriptor, SessionBackend, SessionRecord, StoreError, StoreResult, TokenKind,
    TokenStore,
};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::DatabaseConfig;

/// Token store over whichever backend the configuration selects.
pub type Store = TokenStore<Backend>;

/// Supported storage backends.
#[derive(Debug)]
pub enum Backend {
    Memory(MemoryStorage),
    Postgres(PostgresBackend),
    MySql(MySqlBackend),
}

impl Backend {
    /// Connects the backend named by `config.url`.
    ///
    /// Relational backends run their migrations first when
    /// `config.run_migrations` is set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown URL and `Unavailable` if the
    /// database cannot be reached or migrated.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let descriptor = config
            .descriptor()
            .map_err(|e| StoreError::invalid_argument(e.to_string()))?;

        let backend = match &descriptor {
            BackendDescriptor::Memory => Self::Memory(MemoryStorage::new()),
            BackendDescriptor::Postgres { url } => {
                let pg = PostgresConfig {
                    url: url.clone(),
                    pool_size: config.pool_size,
                    connect_timeout_ms: config.connect_timeout_ms,
                    idle_timeout_ms: config.idle_timeout_ms,
                    run_migrations: config.run_migrations,
                    ..PostgresConfig::default()
                };
                Self::Postgres(PostgresBackend::connect(&pg).await?)
            }
            BackendDescriptor::MySql { url } => {
                let my = MySqlConfig {
                    url: url.clone(),
                    pool_size: config.pool_size,
                    connect_timeout_ms: config.connect_timeout_ms,
                    idle_timeout_ms: config.idle_timeout_ms,
                    run_migrations: config.run_migrations,
                };
                Self::MySql(MySqlBackend::connect(&my).await?)
            }
        };

        info!(backend = %descriptor, durable = descriptor.is_durable(), "Session backend ready");
        Ok(backend)
    }

    /// Applies pending migrations. Returns `false` for the memory backend,
    /// which has no schema.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if a migration fails.
    pub async fn migrate(&self) -> StoreResult<bool> {
        match self {
            Self::Memory(_) => Ok(false),
            Self::Postgres(pg) => pg.migrate().await.map(|()| true).map_err(Into::into),
            Self::MySql(my) => my.migrate().await.map(|()| true).map_err(Into::into),
        }
    }
}

/// Connects the configured backend and wraps it in a [`TokenStore`].
///
/// # Errors
///
/// See [`Backend::connect`].
pub async fn open_store(config: &DatabaseConfig) -> StoreResult<Store> {
    Ok(TokenStore::new(Backend::connect(config).await?))
}

#[async_trait]
impl SessionBackend for Backend {
    fn name(&self) -> &'static str {
        match self {
            Self::Memory(b) => b.name(),
            Self::Postgres(b) => b.name(),
            Self::MySql(b) => b.name(),
        }
    }

    async fn insert(&self, record: SessionRecord, now: OffsetDateTime) -> StoreResult<()> {
        match self {
            Self::Memory(b) => b.insert(record, now).await,
            Self::Postgres(b) => b.insert(record, now).await,
            Self::MySql(b) => b.insert(record, now).await,
        }
    }

    async fn fetch(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<SessionRecord>> {
        match self {
            Self::Memory(b) => b.fetch(kind, signature, now).await,
            Self::Postgres(b) => b.fetch(kind, signature, now).await,
            Self::MySql(b) => b.fetch(kind, signature, now).await,
        }
    }

    async fn remove(
        &self,
        kind: TokenKind,
        signature: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        match self {
            Self::Memory(b) => b.remove(kind, signature, now).await,
            Self::Postgres(b) => b.remove(kind, signature, now).await,
            Self::MySql(b) => b.remove(kind, signature, now).await,
        }
    }

    async fn remove_by_request_id(&self, kind: TokenKind, request_id: Uuid) -> StoreResult<u64> {
        match self {
            Self::Memory(b) => b.remove_by_request_id(kind, request_id).await,
            Self::Postgres(b) => b.remove_by_request_id(kind, request_id).await,
            Self::MySql(b) => b.remove_by_request_id(kind, request_id).await,
        }
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        match self {
            Self::Memory(b) => b.purge_expired(now).await,
            Self::Postgres(b) => b.purge_expired(now).await,
            Self::MySql(b) => b.purge_expired(now).await,
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        match self {
            Self::Memory(b) => b.ping().await,
            Self::Postgres(b) => b.ping().await,
            Self::MySql(b) => b.ping().await,
        }
    }
}
