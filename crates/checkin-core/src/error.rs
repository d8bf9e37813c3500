//! # Error Types
//!
//! Domain-specific error types for checkin-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  checkin-core errors (this file)                                       │
//! │  ├── CoreError        - Configuration + scheduler state errors         │
//! │  └── ValidationError  - Field and config-key validation failures       │
//! │                                                                         │
//! │  checkin-db errors (separate crate)                                    │
//! │  └── DbError          - Persistence failures                           │
//! │                                                                         │
//! │  checkin-agent errors (separate crate)                                 │
//! │  └── AgentError       - What the host application sees                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → AgentError → Host / Observers     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::IntervalKind;

// =============================================================================
// Core Error
// =============================================================================

/// Core decision-logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An interval setter received zero or a negative number of seconds.
    ///
    /// The previous interval value is left unchanged.
    #[error("{kind} interval must be positive, got {seconds}s")]
    InvalidInterval { kind: IntervalKind, seconds: i64 },

    /// Check-ins are switched off (`check_in_enabled = false`).
    #[error("Check-in is disabled")]
    CheckInDisabled,

    /// A check-in run already holds the single-flight token.
    #[error("A check-in is already running")]
    CheckInInProgress,

    /// The scheduler is paused by the host application.
    #[error("Check-in is paused")]
    Paused,

    /// Internal invariant breach (e.g. completing a run that was never issued).
    ///
    /// ## When This Occurs
    /// Only through a programming error inside the agent. Never user-recoverable.
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// Persisted state was written by a newer, unknown schema.
    #[error("Unsupported state schema version {found} (supported up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// Persisted state could not be decoded.
    #[error("Corrupt persisted state: {0}")]
    CorruptState(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if this error is a configuration problem on the caller side.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidInterval { .. } | CoreError::CheckInDisabled
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised for host input (device identity, tags, keys) and for incoming
/// remote config values that fail local policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g. control characters, whitespace in a key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value has the wrong JSON type for its key.
    #[error("{field} must be {expected}")]
    WrongType { field: String, expected: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidInterval {
            kind: IntervalKind::CheckIn,
            seconds: -5,
        };
        assert_eq!(err.to_string(), "check-in interval must be positive, got -5s");
        assert!(err.is_config_error());
        assert!(!CoreError::CheckInInProgress.is_config_error());
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::required("device_tag");
        assert_eq!(err.to_string(), "device_tag is required");

        let err = ValidationError::WrongType {
            field: "locationEnabled".to_string(),
            expected: "a boolean".to_string(),
        };
        assert_eq!(err.to_string(), "locationEnabled must be a boolean");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("serial").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
