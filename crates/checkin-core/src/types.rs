//! # Domain Types
//!
//! Core domain types shared by the scheduler, the pipeline and persistence.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   Credential    │   │  CheckInConfig  │   │  CheckInState   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  key            │   │  3 intervals    │   │  Idle           │       │
//! │  │  state          │   │  2 enable flags │   │  Running        │       │
//! │  │                 │   │  2 one-shots    │   │  Paused         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Location     │   │  IntervalKind   │   │   Transaction   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │     Receipt     │       │
//! │  │  lat / lon      │   │  CheckIn        │   │  ─────────────  │       │
//! │  │  accuracy       │   │  ConfigCheckIn  │   │  id (UUID)      │       │
//! │  │  timestamp      │   │  LocationUpload │   │  fields         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Defaults
// =============================================================================

/// Default check-in interval (1 hour).
pub const DEFAULT_CHECK_IN_INTERVAL_SECS: u64 = 3600;

/// Default config refresh interval (1 day).
pub const DEFAULT_CONFIG_CHECK_IN_INTERVAL_SECS: u64 = 86_400;

/// Default location upload interval (1 hour).
pub const DEFAULT_LOCATION_UPLOAD_INTERVAL_SECS: u64 = 3600;

// =============================================================================
// Credential
// =============================================================================

/// Validation state of the developer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CredentialState {
    /// Set but not yet checked by the validator.
    Unvalidated,
    /// Accepted by the validator.
    Valid,
    /// Rejected by the validator.
    Invalid(String),
}

/// Opaque developer key plus its validation state.
///
/// Set once per agent; the key itself never changes afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: String,
    state: CredentialState,
}

impl Credential {
    /// Creates an unvalidated credential.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: CredentialState::Unvalidated,
        }
    }

    /// The raw developer key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> &CredentialState {
        &self.state
    }

    /// Records the validator's verdict.
    pub fn mark(&mut self, state: CredentialState) {
        self.state = state;
    }

    /// Returns true once the validator has accepted the key.
    pub fn is_valid(&self) -> bool {
        self.state == CredentialState::Valid
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

// =============================================================================
// Location
// =============================================================================

/// A single location fix from the location collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,

    /// Horizontal accuracy in meters, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,

    /// When the fix was taken.
    #[serde(with = "utc_format")]
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Intervals
// =============================================================================

/// The three independently configurable intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    /// Time between regular check-ins.
    CheckIn,
    /// Time between config refreshes (piggybacked on a check-in).
    ConfigCheckIn,
    /// Time between location uploads (piggybacked on a check-in).
    LocationUpload,
}

impl IntervalKind {
    /// Name of the remote config key that carries this interval.
    pub fn remote_key(&self) -> &'static str {
        match self {
            IntervalKind::CheckIn => "checkInInterval",
            IntervalKind::ConfigCheckIn => "configCheckInInterval",
            IntervalKind::LocationUpload => "locationUploadInterval",
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalKind::CheckIn => write!(f, "check-in"),
            IntervalKind::ConfigCheckIn => write!(f, "config check-in"),
            IntervalKind::LocationUpload => write!(f, "location upload"),
        }
    }
}

// =============================================================================
// Check-in Config
// =============================================================================

/// Scheduling knobs owned by the scheduler.
///
/// Mutated only through the scheduler's setters, under the scheduler lock.
/// The two `force_*` flags are one-shots: they are consumed the moment a run
/// begins, whatever that run's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInConfig {
    /// Seconds between timer-driven check-ins.
    pub check_in_interval: u64,

    /// Seconds between config refreshes.
    pub config_check_in_interval: u64,

    /// Seconds between location uploads when `location_enabled`.
    pub location_upload_interval: u64,

    /// Attach location to check-ins on the location interval.
    pub location_enabled: bool,

    /// Master switch for check-ins, forced ones included.
    pub check_in_enabled: bool,

    /// One-shot: the next tick issues a run regardless of the interval.
    #[serde(default)]
    pub force_next_check_in: bool,

    /// One-shot: the next run attaches location regardless of the interval.
    #[serde(default)]
    pub force_next_location_upload: bool,
}

impl CheckInConfig {
    /// Returns the interval for `kind` in seconds.
    pub fn interval(&self, kind: IntervalKind) -> u64 {
        match kind {
            IntervalKind::CheckIn => self.check_in_interval,
            IntervalKind::ConfigCheckIn => self.config_check_in_interval,
            IntervalKind::LocationUpload => self.location_upload_interval,
        }
    }

    pub(crate) fn set_interval_unchecked(&mut self, kind: IntervalKind, seconds: u64) {
        match kind {
            IntervalKind::CheckIn => self.check_in_interval = seconds,
            IntervalKind::ConfigCheckIn => self.config_check_in_interval = seconds,
            IntervalKind::LocationUpload => self.location_upload_interval = seconds,
        }
    }
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            check_in_interval: DEFAULT_CHECK_IN_INTERVAL_SECS,
            config_check_in_interval: DEFAULT_CONFIG_CHECK_IN_INTERVAL_SECS,
            location_upload_interval: DEFAULT_LOCATION_UPLOAD_INTERVAL_SECS,
            location_enabled: false,
            check_in_enabled: true,
            force_next_check_in: false,
            force_next_location_upload: false,
        }
    }
}

// =============================================================================
// Check-in State
// =============================================================================

/// Scheduler state machine.
///
/// ```text
///   Idle ──tick/request──► Running ──complete──► Idle
///     │                                     └──► Paused (pause requested mid-run)
///     └──pause──► Paused ──resume──► Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInState {
    Idle,
    Running,
    Paused,
}

impl fmt::Display for CheckInState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckInState::Idle => write!(f, "idle"),
            CheckInState::Running => write!(f, "running"),
            CheckInState::Paused => write!(f, "paused"),
        }
    }
}

// =============================================================================
// Transaction Receipt
// =============================================================================

/// A transaction receipt queued for upload with the next check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// When the host handed the receipt to the agent.
    #[serde(with = "utc_format")]
    pub created_at: DateTime<Utc>,

    /// Receipt contents as supplied by the host.
    pub fields: BTreeMap<String, Value>,
}

impl TransactionReceipt {
    /// Creates a receipt with a fresh id.
    pub fn new(fields: BTreeMap<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            fields,
        }
    }
}

// =============================================================================
// UTC Formatting
// =============================================================================

/// Renders a timestamp as ISO-8601 UTC with a `Z` suffix.
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use checkin_core::format_utc;
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
/// assert_eq!(format_utc(t), "2024-03-01T12:30:05Z");
/// ```
pub fn format_utc(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serde adapter so every serialized timestamp goes through [`format_utc`].
pub mod utc_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_utc(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for `Option<DateTime<Utc>>` fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => s.serialize_some(&super::super::format_utc(*t)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
