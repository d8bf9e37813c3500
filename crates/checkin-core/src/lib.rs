//! # checkin-core: Pure Check-in Logic
//!
//! This crate holds the decision logic of the check-in agent: *when* to check
//! in, *what* a report contains, and *what changed* in remote configuration.
//! It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Check-in Agent Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Host Application                             │   │
//! │  │   lifecycle events, push, background fetch, API calls           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        checkin-agent (pipeline, lifecycle, observer hub)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ checkin-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ registry  │  │ scheduler │  │ reconcile │  │  payload  │  │   │
//! │  │   │ devices   │  │ RunToken  │  │ ConfigRep │  │ Response  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO ASYNC                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             checkin-db (persisted state document)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Credential, CheckInConfig, CheckInState, Location, receipts
//! - [`device`] - Custom devices with lazy providers, extension records
//! - [`registry`] - Snapshot-able extension/device registry
//! - [`scheduler`] - Single-flight state machine and due-time evaluation
//! - [`reconcile`] - Remote config reconciliation and per-key reports
//! - [`payload`] - Check-in payload and response shapes
//! - [`state`] - Versioned persisted state document
//! - [`validation`] - Input validation rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use checkin_core::scheduler::{RunOutcome, Scheduler};
//! use checkin_core::CheckInConfig;
//!
//! let mut scheduler = Scheduler::new(CheckInConfig::default());
//! let now = Utc::now();
//!
//! // Never checked in before, so the first tick is due.
//! let token = scheduler.tick(now).unwrap();
//! assert!(scheduler.tick(now).is_none()); // single-flight
//!
//! scheduler.complete(token, RunOutcome { success: true, ..Default::default() }, now).unwrap();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod device;
pub mod error;
pub mod payload;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use device::{CustomDevice, DeviceDetails, ExtensionRecord, UNKNOWN_BATTERY_LEVEL};
pub use error::{CoreError, CoreResult, ValidationError};
pub use reconcile::{ConfigOutcome, ConfigReport, ConfigSnapshot};
pub use registry::Registry;
pub use scheduler::{RunOutcome, RunToken, Scheduler, Trigger};
pub use state::{PersistedState, STATE_SCHEMA_VERSION};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a device tag.
pub const MAX_DEVICE_TAG_LEN: usize = 64;

/// Maximum length of a device name, model, serial or extension identifier.
pub const MAX_IDENTITY_LEN: usize = 128;
