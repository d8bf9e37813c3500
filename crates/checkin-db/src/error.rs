//! # Database Error Types
//!
//! ## Where Errors Come From
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ─────────┐                                                 │
//! │  MigrateError ────────┼──► DbError ──► AgentError::Storage (logged)    │
//! │  CoreError (document)─┤                                                 │
//! │  serde_json::Error ───┘                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A storage error never fails a check-in; the agent logs it and keeps its
//! in-memory state.

use checkin_core::CoreError;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database file could not be opened or created.
    #[error("Could not open agent database: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// SQLite rejected a statement.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The stored document was written by a newer agent.
    #[error("Unsupported state schema version {found} (supported up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// A stored document or receipt row could not be decoded.
    #[error("Corrupt stored state: {0}")]
    CorruptState(String),

    #[error("Storage error: {0}")]
    Other(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("database is closed".to_string()),
            sqlx::Error::Io(io) => DbError::ConnectionFailed(io.to_string()),
            other => DbError::Other(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Only a schema mismatch keeps its shape; anything else the document layer
/// reports means the stored bytes are unusable.
impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnsupportedSchema { found, supported } => {
                DbError::UnsupportedSchema { found, supported }
            }
            other => DbError::CorruptState(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::CorruptState(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_errors_map_to_storage_categories() {
        let err: DbError = CoreError::UnsupportedSchema {
            found: 3,
            supported: 1,
        }
        .into();
        assert!(matches!(
            err,
            DbError::UnsupportedSchema {
                found: 3,
                supported: 1
            }
        ));
        assert_eq!(
            err.to_string(),
            "Unsupported state schema version 3 (supported up to 1)"
        );

        let err: DbError = CoreError::CorruptState("bad".into()).into();
        assert!(matches!(err, DbError::CorruptState(_)));

        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::ConnectionFailed(_)));
    }
}
