//! # checkin-db: Persistence Layer for the Check-in Agent
//!
//! Stores the state that must survive a process restart: the versioned
//! agent state document (credential validity, last check-in/location/config
//! timestamps, applied remote config) and the transaction receipt outbox.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Check-in Agent Data Flow                         │
//! │                                                                         │
//! │  CheckInAgent (after each terminal check-in outcome)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    checkin-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ AgentState     │    │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ ReceiptOutbox  │    │ 001_agent_.. │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file in the platform data directory                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkin_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("checkin.db")).await?;
//! let state = db.agent_state().load().await?.unwrap_or_default();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig, DbLocation};
pub use repository::{AgentStateRepository, ReceiptOutboxRepository};
