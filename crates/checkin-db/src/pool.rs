//! # Agent Database
//!
//! Opens the SQLite store that holds the agent state document and the
//! receipt outbox.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig { location, busy_timeout, migrate }                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new ──► SqlitePool ──► migrations (if enabled)             │
//! │       │                                                                 │
//! │       ├──► agent_state()     one row, the versioned JSON document      │
//! │       └──► receipt_outbox()  receipts waiting for the next check-in    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The agent writes at most once per check-in, so the pool is small. File
//! databases run in WAL mode; an in-memory database is pinned to a single
//! connection that never expires, since closing it would drop the data.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::receipts::ReceiptOutboxRepository;
use crate::repository::state::AgentStateRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the agent database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A file, created on first open.
    File(PathBuf),
    /// Private to this process; gone when the [`Database`] is dropped.
    Memory,
}

/// Options for opening a [`Database`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,

    /// How long a statement waits on a locked database before failing.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// How long to wait for a free pooled connection.
    /// Default: 10 seconds
    pub acquire_timeout: Duration,

    /// Apply embedded migrations on open.
    /// Default: true
    pub migrate: bool,
}

impl DbConfig {
    /// A file-backed database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
            migrate: true,
        }
    }

    /// An in-memory database, used by tests and by agents that opt out of
    /// persistence.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            ..DbConfig::new(PathBuf::new())
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    /// The database file, if there is one.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            DbLocation::File(path) => Some(path),
            DbLocation::Memory => None,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            DbLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            DbLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };
        Ok(options.busy_timeout(self.busy_timeout))
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().acquire_timeout(self.acquire_timeout);
        match self.location {
            DbLocation::File(_) => options
                .max_connections(2)
                .min_connections(0)
                .idle_timeout(Some(Duration::from_secs(300))),
            DbLocation::Memory => options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the agent database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the database and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        match config.path() {
            Some(path) => info!(path = %path.display(), "Opening agent database"),
            None => info!("Opening in-memory agent database"),
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let db = Database { pool };
        if config.migrate {
            db.run_migrations().await?;
        } else {
            debug!("Skipping migrations");
        }
        Ok(db)
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn agent_state(&self) -> AgentStateRepository {
        AgentStateRepository::new(self.pool.clone())
    }

    pub fn receipt_outbox(&self) -> ReceiptOutboxRepository {
        ReceiptOutboxRepository::new(self.pool.clone())
    }

    /// Closes every connection. Repository calls fail afterwards.
    pub async fn close(&self) {
        debug!("Closing agent database");
        self.pool.close().await;
    }

    /// `true` while the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
