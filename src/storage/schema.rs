//! Database schema constants.
//!
//! This module contains the SQL schema definitions for the PostgreSQL job
//! store. Every statement is idempotent.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id VARCHAR(64) PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL,
    kind VARCHAR(32) NOT NULL,
    input JSONB NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    result JSONB,
    error TEXT,
    prompt_tokens BIGINT NOT NULL DEFAULT 0,
    completion_tokens BIGINT NOT NULL DEFAULT 0,
    total_tokens BIGINT NOT NULL DEFAULT 0,
    estimated_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
    cache_hit BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
)
"#;

/// Index backing per-user listings, newest first.
pub const CREATE_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_user_created ON jobs(user_id, created_at DESC)";

/// Index backing status scans.
pub const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)";

/// A named schema change, applied at most once per database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Every migration, in application order.
///
/// Names are recorded in `_migrations`; never rename or reorder an entry
/// that has shipped.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_jobs",
        sql: CREATE_JOBS_TABLE,
    },
    Migration {
        name: "0002_jobs_user_index",
        sql: CREATE_USER_INDEX,
    },
    Migration {
        name: "0003_jobs_status_index",
        sql: CREATE_STATUS_INDEX,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_order() {
        assert_eq!(MIGRATIONS.len(), 3);
        // Indexes reference the table, so it must come first
        assert!(MIGRATIONS[0].sql.contains("CREATE TABLE IF NOT EXISTS jobs"));
        assert!(MIGRATIONS[1..]
            .iter()
            .all(|m| m.sql.contains("CREATE INDEX IF NOT EXISTS")));
    }

    #[test]
    fn test_migration_names_are_unique_and_sorted() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_statements_are_single() {
        // Each statement runs through the extended protocol, one at a time.
        for migration in MIGRATIONS {
            assert!(!migration.sql.trim().trim_end_matches(';').contains(';'));
        }
    }
}
