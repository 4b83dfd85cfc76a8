//! Embedded schema migrations for the MySQL session backend.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use sqlx_mysql::MySqlPool;
use tracing::{info, instrument};

use crate::error::{MySqlError, Result};

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
            // MySQL commits DDL implicitly
            no_tx: true,
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
/// # Errors
///
/// Returns `MySqlError::Migration` if a migration fails to execute.
#[instrument(skip(pool))]
pub async fn run(pool: &MySqlPool) -> Result<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running embedded migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: false,
        locking: true,
        no_tx: true,
    };

    migrator
        .run(pool)
        .await
        .map_err(|e| MySqlError::Migration(e.to_string()))?;

    info!("Database migrations completed");
    Ok(())
}
