//! # Agent State Repository
//!
//! Load/save of the single versioned state document.
//!
//! The document is stored as JSON in a one-row table; the SQL schema never
//! changes when the document gains fields. Document evolution is governed by
//! `checkin_core::STATE_SCHEMA_VERSION`.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use checkin_core::{format_utc, PersistedState};

use crate::error::DbResult;

/// Repository for the persisted agent state.
#[derive(Debug, Clone)]
pub struct AgentStateRepository {
    pool: SqlitePool,
}

impl AgentStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AgentStateRepository { pool }
    }

    /// Loads the stored document, or `None` on first run.
    ///
    /// ## Errors
    /// - `DbError::UnsupportedSchema` if a newer agent wrote the document
    /// - `DbError::CorruptState` if it cannot be decoded
    pub async fn load(&self) -> DbResult<Option<PersistedState>> {
        let row = sqlx::query("SELECT document FROM agent_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            debug!("No stored agent state");
            return Ok(None);
        };

        let document: String = row.try_get("document")?;
        let state = PersistedState::from_json(&document)?;
        Ok(Some(state))
    }

    /// Writes the document, replacing any previous one.
    pub async fn save(&self, state: &PersistedState) -> DbResult<()> {
        let document = state.to_json()?;
        let updated_at = format_utc(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO agent_state (id, schema_version, document, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                schema_version = excluded.schema_version,
                document       = excluded.document,
                updated_at     = excluded.updated_at
            "#,
        )
        .bind(i64::from(state.schema_version))
        .bind(&document)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        debug!(bytes = document.len(), "Agent state saved");
        Ok(())
    }

    /// Deletes the stored document.
    pub async fn clear(&self) -> DbResult<()> {
        sqlx::query("DELETE FROM agent_state WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
