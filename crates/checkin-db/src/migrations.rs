//! # Schema Migrations
//!
//! SQL files under `migrations/sqlite/` are embedded at compile time and
//! applied in order when the database opens.
//!
//! | File | Creates |
//! |------|---------|
//! | `001_agent_state.sql` | `agent_state` (single row), `receipt_outbox` |
//!
//! Add a new numbered file for every schema change; applied files must
//! never be edited. Changes to the JSON state document are versioned by
//! `checkin_core::STATE_SCHEMA_VERSION` instead.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Applies any migration not yet recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = MIGRATOR.migrations.len(), "Applying agent schema");
    MIGRATOR.run(pool).await?;
    info!("Agent schema up to date");
    Ok(())
}

/// Embedded and applied migration counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Reports how far the schema has been migrated.
///
/// A database that was never migrated reports zero applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: usize::try_from(applied).unwrap_or(0),
    })
}
