//! # checkin-agent: Device Check-in Agent
//!
//! This crate embeds the check-in agent in a host application. It reports
//! device identity, custom device inventory, extensions, and location to a
//! remote service on a schedule, applies the configuration it gets back, and
//! tells subscribed observers what happened.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Check-in Agent Architecture                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 CheckInAgent (host-facing surface)               │  │
//! │  │                                                                  │  │
//! │  │  credential, registry, intervals, overrides, device tag,        │  │
//! │  │  receipts, check_in(), timer driver                              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Lifecycle      │  │ CheckIn        │  │  ObserverHub           │    │
//! │  │ Controller     │  │ Pipeline       │  │                        │    │
//! │  │                │  │                │  │ Weak subscribers,      │    │
//! │  │ foreground,    │  │ snapshot, send,│  │ ordered delivery,      │    │
//! │  │ push, fetch    │  │ reconcile      │  │ isolated failures      │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Collaborators: Transport, LocationProvider, CredentialValidator│   │
//! │  │                 IdentityStore, Clock          StateStore        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `CheckInAgent` and its builder
//! - [`pipeline`] - One check-in run, from snapshot to notification
//! - [`lifecycle`] - Host lifecycle, push, and background fetch handling
//! - [`observer`] - Observer trait and fan-out hub
//! - [`collaborators`] - Traits for transport, location, validation, identity, time
//! - [`store`] - State persistence seam
//! - [`config`] - File and environment configuration
//! - [`error`] - Agent error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkin_agent::{AgentConfig, CheckInAgentBuilder, FixedIdentity};
//! use std::sync::Arc;
//!
//! let config = AgentConfig::load_or_default(None);
//!
//! let mut agent = CheckInAgentBuilder::new(config)
//!     .with_transport(Arc::new(my_transport))
//!     .with_validator(Arc::new(my_validator))
//!     .with_identity(Arc::new(FixedIdentity(device_uuid)))
//!     .build()
//!     .await?;
//!
//! agent.subscribe(&my_observer);
//! agent.set_credential("developer-key").await?;
//! agent.start()?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observer;
pub mod pipeline;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{CheckInAgent, CheckInAgentBuilder};
pub use collaborators::{
    Clock, CredentialValidator, FixedIdentity, IdentityStore, LocationProvider, ManualClock,
    NoLocation, SystemClock, Transport, TransportError, TransportReply, Verdict,
};
pub use config::{AgentConfig, CheckInSettings, StorageSettings};
pub use error::{AgentError, AgentResult};
pub use lifecycle::{FetchResult, LifecycleController, LifecycleEvent};
pub use observer::{Observer, ObserverError, ObserverEvent, ObserverHub, ObserverResult};
pub use pipeline::{CheckInCompletion, CheckInPipeline};
pub use store::{MemoryStateStore, StateStore};
