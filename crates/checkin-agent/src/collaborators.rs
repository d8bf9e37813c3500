//! # External Collaborators
//!
//! Narrow interfaces to everything the agent does not implement itself.
//!
//! ## Collaborator Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   CheckInPipeline ──send(payload)──────────► Transport                 │
//! │          │                                   (HTTP, signing, TLS)      │
//! │          ├──current_location()─────────────► LocationProvider          │
//! │          ├──device_uuid()──────────────────► IdentityStore             │
//! │          └──now()──────────────────────────► Clock                     │
//! │                                                                         │
//! │   CheckInAgent ────validate(key)───────────► CredentialValidator       │
//! │                                              (license cryptography)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator is held as `Arc<dyn Trait>` so hosts can plug in their
//! own implementations and tests can script them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use checkin_core::payload::CheckInPayload;
use checkin_core::Location;

// =============================================================================
// Transport
// =============================================================================

/// Raw reply from the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReply {
    /// HTTP-style status code.
    pub status: u16,
    pub body: Vec<u8>,
    /// Response metadata (headers).
    pub headers: BTreeMap<String, String>,
}

impl TransportReply {
    /// A 200 reply with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        TransportReply {
            status: 200,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a reply (network down, timeout, ...).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one check-in to the remote service.
///
/// Exactly one call per check-in. Timeouts are the implementation's
/// responsibility.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &CheckInPayload) -> Result<TransportReply, TransportError>;
}

// =============================================================================
// Location
// =============================================================================

/// Supplies the current device location.
///
/// Missing or denied permission yields `None`, never an error.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Option<Location>;
}

/// Location provider for hosts without location support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_location(&self) -> Option<Location> {
        None
    }
}

// =============================================================================
// Credential Validation
// =============================================================================

/// Outcome of a key or license check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

/// Validates developer keys and service licenses.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Validates the developer key. Called once, before any check-in.
    async fn validate(&self, key: &str) -> Verdict;

    /// Validates a license for a named service.
    async fn validate_license(&self, _license: &str, _service: &str) -> Verdict {
        Verdict::Invalid("license validation is not supported".to_string())
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Stable, persisted device identifier.
pub trait IdentityStore: Send + Sync {
    fn device_uuid(&self) -> String;
}

/// Identity store returning a fixed identifier.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

impl IdentityStore for FixedIdentity {
    fn device_uuid(&self) -> String {
        self.0.clone()
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source for due-time evaluation and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ManualClock {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Collaborator Set
// =============================================================================

/// All collaborators the pipeline needs, cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub location: Arc<dyn LocationProvider>,
    pub validator: Arc<dyn CredentialValidator>,
    pub identity: Arc<dyn IdentityStore>,
    pub clock: Arc<dyn Clock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reply_success_range() {
        assert!(TransportReply::ok("{}").is_success());
        let mut reply = TransportReply::ok("");
        reply.status = 204;
        assert!(reply.is_success());
        reply.status = 301;
        assert!(!reply.is_success());
        reply.status = 500;
        assert!(!reply.is_success());
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_default_license_validation_is_rejected() {
        struct AcceptAll;

        #[async_trait]
        impl CredentialValidator for AcceptAll {
            async fn validate(&self, _key: &str) -> Verdict {
                Verdict::Valid
            }
        }

        assert_eq!(AcceptAll.validate("k").await, Verdict::Valid);
        assert!(matches!(
            AcceptAll.validate_license("lic", "scanner").await,
            Verdict::Invalid(_)
        ));
        assert!(NoLocation.current_location().await.is_none());
    }
}
