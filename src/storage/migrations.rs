//! Schema migrations for the PostgreSQL job store.
//!
//! Several workers may start against the same database at once, so the
//! whole run holds a transaction-scoped advisory lock. Applied names are
//! recorded in `_migrations`.

use std::collections::HashSet;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

use super::schema::{Migration, MIGRATIONS};

/// Advisory lock key shared by every worker running migrations.
const MIGRATION_LOCK_KEY: i64 = 0x696e_7369_6768_74;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration statement was rejected.
    #[error("Migration {name} failed: {message}")]
    MigrationFailed { name: String, message: String },
}

/// Applies [`MIGRATIONS`] that a database has not seen yet.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations and returns how many ran.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let applied: Vec<(String,)> = sqlx::query_as("SELECT name FROM _migrations")
            .fetch_all(&mut *tx)
            .await?;
        let applied: HashSet<String> = applied.into_iter().map(|(name,)| name).collect();

        let to_apply = pending(MIGRATIONS, &applied);
        for migration in &to_apply {
            debug!(name = migration.name, "Applying migration");

            sqlx::query(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::MigrationFailed {
                    name: migration.name.to_string(),
                    message: e.to_string(),
                })?;

            sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
                .bind(migration.name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if !to_apply.is_empty() {
            info!(applied = to_apply.len(), "Applied database migrations");
        }
        Ok(to_apply.len())
    }
}

/// Migrations not yet recorded, in declaration order.
fn pending<'a>(all: &'a [Migration], applied: &HashSet<String>) -> Vec<&'a Migration> {
    all.iter().filter(|m| !applied.contains(m.name)).collect()
}
