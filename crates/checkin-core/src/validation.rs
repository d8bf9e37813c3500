//! # Validation Module
//!
//! Input validation for host-supplied values.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Host API call (CheckInAgent)                                          │
//! │  ├── set_device_tag, CustomDevice::new, set_interval                  │
//! │  └── THIS MODULE: identity, tag and interval rules                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Remote config (ConfigPolicy in reconcile.rs)                          │
//! │  └── per-key type checks, rejected keys never reach the snapshot       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::{MAX_DEVICE_TAG_LEN, MAX_IDENTITY_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates one of the immutable custom-device identity strings
/// (name, model, serial).
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most [`MAX_IDENTITY_LEN`] characters
///
/// ## Example
/// ```rust
/// use checkin_core::validation::validate_identity;
///
/// assert!(validate_identity("serial", "SN-0042").is_ok());
/// assert!(validate_identity("serial", "   ").is_err());
/// ```
pub fn validate_identity(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::required(field));
    }

    if value.chars().count() > MAX_IDENTITY_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTITY_LEN,
        });
    }

    Ok(())
}

/// Validates a device tag.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_DEVICE_TAG_LEN`] characters
/// - No control characters
pub fn validate_device_tag(tag: &str) -> ValidationResult<()> {
    if tag.trim().is_empty() {
        return Err(ValidationError::required("device_tag"));
    }

    if tag.chars().count() > MAX_DEVICE_TAG_LEN {
        return Err(ValidationError::TooLong {
            field: "device_tag".to_string(),
            max: MAX_DEVICE_TAG_LEN,
        });
    }

    if tag.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "device_tag".to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates a developer key before it is handed to the validator.
pub fn validate_developer_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::required("developer_key"));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "developer_key".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }
    Ok(())
}

/// Validates an extension identifier.
pub fn validate_extension_id(id: &str) -> ValidationResult<()> {
    validate_identity("extension_id", id)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an interval in seconds, returning it as unsigned on success.
///
/// ## Example
/// ```rust
/// use checkin_core::validation::validate_interval_secs;
///
/// assert_eq!(validate_interval_secs("interval", 60).unwrap(), 60);
/// assert!(validate_interval_secs("interval", 0).is_err());
/// assert!(validate_interval_secs("interval", -1).is_err());
/// ```
pub fn validate_interval_secs(field: &str, seconds: i64) -> ValidationResult<u64> {
    if seconds <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(seconds as u64)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("name", "Scanner").is_ok());
        assert_eq!(
            validate_identity("name", ""),
            Err(ValidationError::required("name"))
        );
        assert!(validate_identity("name", &"x".repeat(MAX_IDENTITY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_device_tag() {
        assert!(validate_device_tag("front-register-2").is_ok());
        assert!(validate_device_tag("").is_err());
        assert!(validate_device_tag(&"t".repeat(MAX_DEVICE_TAG_LEN)).is_ok());
        assert!(validate_device_tag(&"t".repeat(MAX_DEVICE_TAG_LEN + 1)).is_err());
        assert!(matches!(
            validate_device_tag("bad\ttag"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_developer_key() {
        assert!(validate_developer_key("abc123").is_ok());
        assert!(validate_developer_key("  ").is_err());
        assert!(validate_developer_key("abc 123").is_err());
    }

    #[test]
    fn test_validate_interval_secs() {
        assert_eq!(validate_interval_secs("i", 1), Ok(1));
        assert_eq!(
            validate_interval_secs("i", 0),
            Err(ValidationError::MustBePositive {
                field: "i".to_string()
            })
        );
    }
}
