//! Embedded schema migrations for the PostgreSQL session backend.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use sqlx_postgres::PgPool;
use tracing::{info, instrument};

use crate::error::{PostgresError, Result};

/// Migrations compiled into the binary, in version order.
///
/// Each entry is `(version, description, sql)`. To add a migration, create
/// the file under `migrations/` and append it here.
macro_rules! embedded_migrations {
    () => {
        &[(
            20260301000001i64,
            "token_session",
            include_str!("../migrations/20260301000001_token_session.sql"),
        )]
    };
}

fn build_migrations() -> Vec<Migration> {
    embedded_migrations!()
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Number of embedded migrations.
#[must_use]
pub fn count() -> usize {
    embedded_migrations!().len()
}

/// Runs all pending migrations.
///
/// Applied versions are tracked in `_sqlx_migrations`; running twice is a
/// no-op.
///
/// # Errors
///
/// Returns `PostgresError::Migration` if a migration fails to execute.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> Result<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running embedded migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };

    migrator
        .run(pool)
        .await
        .map_err(|e| PostgresError::Migration(e.to_string()))?;

    info!("Database migrations completed");
    Ok(())
}
