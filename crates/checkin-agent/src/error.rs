//! # Agent Error Types
//!
//! Errors the host application can see.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Agent Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────┐  ┌─────────────────────┐ │
//! │  │   Configuration     │  │   Transport     │  │     Internal        │ │
//! │  │                     │  │                 │  │                     │ │
//! │  │  Configuration      │  │  Transport      │  │  Concurrency        │ │
//! │  │  CredentialNot..    │  │  Malformed      │  │   Violation         │ │
//! │  │  CredentialAlready  │  │   Response      │  │  Storage            │ │
//! │  │  InvalidInterval    │  │                 │  │                     │ │
//! │  │  CheckInDisabled    │  │                 │  │                     │ │
//! │  └─────────────────────┘  └─────────────────┘  └─────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌─────────────────────────────────────────┐  │
//! │  │   Validation        │  │   Scheduling                            │  │
//! │  │   Validation        │  │   CheckInInProgress, Paused             │  │
//! │  └─────────────────────┘  └─────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors are never returned from the timer path; they reach the
//! host through `Observer::status_message` and `Observer::check_in_completed`.
//! Retry is implicit via the next scheduled tick; [`AgentError::is_retryable`]
//! only helps word status messages.

use checkin_core::{CoreError, IntervalKind, ValidationError};
use checkin_db::DbError;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Agent error type.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration (bad config file, license rejected, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A check-in was attempted before the developer key was validated.
    #[error("Developer key is not validated")]
    CredentialNotValidated,

    /// `set_credential` was called a second time.
    #[error("Developer key has already been set")]
    CredentialAlreadySet,

    /// An interval setter received a non-positive value.
    #[error("{kind} interval must be positive, got {seconds}s")]
    InvalidInterval { kind: IntervalKind, seconds: i64 },

    /// Check-ins are switched off.
    #[error("Check-in is disabled")]
    CheckInDisabled,

    // =========================================================================
    // Scheduling
    // =========================================================================
    /// Another check-in is already running.
    #[error("A check-in is already running")]
    CheckInInProgress,

    /// The agent is paused.
    #[error("Check-in is paused")]
    Paused,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The transport failed or the service answered with a non-success status.
    #[error("Check-in failed{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The service answered with a body that could not be decoded.
    #[error("Malformed check-in response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal invariant breach. Indicates a bug in the agent.
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// Persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInterval { kind, seconds } => {
                AgentError::InvalidInterval { kind, seconds }
            }
            CoreError::CheckInDisabled => AgentError::CheckInDisabled,
            CoreError::CheckInInProgress => AgentError::CheckInInProgress,
            CoreError::Paused => AgentError::Paused,
            CoreError::ConcurrencyViolation(msg) => AgentError::ConcurrencyViolation(msg),
            CoreError::Validation(v) => AgentError::Validation(v),
            CoreError::UnsupportedSchema { .. } | CoreError::CorruptState(_) => {
                AgentError::Storage(err.to_string())
            }
        }
    }
}

impl From<DbError> for AgentError {
    fn from(err: DbError) -> Self {
        AgentError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl AgentError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AgentError::Configuration(_)
                | AgentError::CredentialNotValidated
                | AgentError::CredentialAlreadySet
                | AgentError::InvalidInterval { .. }
                | AgentError::CheckInDisabled
        )
    }

    /// Returns true for network failures, bad statuses and malformed bodies.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            AgentError::Transport { .. } | AgentError::MalformedResponse(_)
        )
    }

    /// Returns true if the next scheduled check-in may succeed without any
    /// change on this side.
    ///
    /// ## Retryable Errors
    /// - Transport failures without a status, or with a 5xx / 408 / 429 status
    ///
    /// ## Non-Retryable Errors
    /// - Configuration and validation errors
    /// - 4xx statuses other than 408 / 429
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Transport { status: None, .. } => true,
            AgentError::Transport {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let network = AgentError::Transport {
            status: None,
            message: "connection reset".into(),
        };
        let unavailable = AgentError::Transport {
            status: Some(503),
            message: "unavailable".into(),
        };
        let forbidden = AgentError::Transport {
            status: Some(403),
            message: "forbidden".into(),
        };

        assert!(network.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!AgentError::CredentialNotValidated.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = AgentError::Transport {
            status: Some(500),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Check-in failed (status 500): boom");

        let err = AgentError::Transport {
            status: None,
            message: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Check-in failed: timeout");
    }

    #[test]
    fn test_core_error_mapping() {
        let err: AgentError = CoreError::InvalidInterval {
            kind: IntervalKind::ConfigCheckIn,
            seconds: 0,
        }
        .into();
        assert!(err.is_config_error());
        assert!(!err.is_transport_error());

        let err: AgentError = CoreError::ConcurrencyViolation("x".into()).into();
        assert!(matches!(err, AgentError::ConcurrencyViolation(_)));
    }
}
