//! # Persisted State Document
//!
//! The agent state that survives a process restart.
//!
//! The document is versioned with [`STATE_SCHEMA_VERSION`]. Fields added in
//! later versions must default via serde so older documents still load;
//! documents from a newer version are refused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::reconcile::ConfigSnapshot;
use crate::types::utc_format;

/// Current schema version of [`PersistedState`].
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// State carried across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Version of the document layout.
    pub schema_version: u32,

    /// Last validator verdict for the developer key, if one was recorded.
    #[serde(default)]
    pub credential_valid: Option<bool>,

    /// Last successful check-in.
    #[serde(default, with = "utc_format::option")]
    pub last_check_in: Option<DateTime<Utc>>,

    /// Last check-in that successfully carried a location.
    #[serde(default, with = "utc_format::option")]
    pub last_location_upload: Option<DateTime<Utc>>,

    /// Last check-in that successfully refreshed config.
    #[serde(default, with = "utc_format::option")]
    pub last_config_refresh: Option<DateTime<Utc>>,

    /// Locally applied remote configuration.
    #[serde(default)]
    pub config: ConfigSnapshot,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            credential_valid: None,
            last_check_in: None,
            last_location_upload: None,
            last_config_refresh: None,
            config: ConfigSnapshot::default(),
        }
    }
}

impl PersistedState {
    /// Decodes a document, refusing unknown future versions.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CoreError::CorruptState(e.to_string()))?;

        let found = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CoreError::CorruptState("missing schema_version".to_string()))?;

        if found > STATE_SCHEMA_VERSION as u64 {
            return Err(CoreError::UnsupportedSchema {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: STATE_SCHEMA_VERSION,
            });
        }

        let mut state: PersistedState =
            serde_json::from_value(value).map_err(|e| CoreError::CorruptState(e.to_string()))?;
        state.schema_version = STATE_SCHEMA_VERSION;
        Ok(state)
    }

    /// Encodes the document at the current schema version.
    pub fn to_json(&self) -> CoreResult<String> {
        let mut doc = self.clone();
        doc.schema_version = STATE_SCHEMA_VERSION;
        serde_json::to_string(&doc).map_err(|e| CoreError::CorruptState(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_fields() {
        let mut state = PersistedState::default();
        state.credential_valid = Some(true);
        state.last_check_in = Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        state.config.values.insert("checkInInterval".into(), json!(900));

        let raw = state.to_json().unwrap();
        assert!(raw.contains("2024-05-01T08:00:00Z"));
        assert_eq!(PersistedState::from_json(&raw).unwrap(), state);
    }

    #[test]
    fn test_minimal_document_defaults_missing_fields() {
        let state = PersistedState::from_json(r#"{"schema_version":1}"#).unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn test_future_version_is_refused() {
        let err = PersistedState::from_json(r#"{"schema_version":9}"#).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnsupportedSchema {
                found: 9,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            PersistedState::from_json("not json"),
            Err(CoreError::CorruptState(_))
        ));
        assert!(matches!(
            PersistedState::from_json("{}"),
            Err(CoreError::CorruptState(_))
        ));
    }
}
