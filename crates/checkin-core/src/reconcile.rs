//! # Config Reconciler
//!
//! Compares the locally applied configuration against one received from the
//! remote service and produces a per-key report.
//!
//! ## Reconciliation Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each key in incoming:                                             │
//! │                                                                         │
//! │    previous[key] == incoming[key] ──► Unchanged                        │
//! │    policy rejects incoming[key]   ──► Rejected(reason)  snapshot kept  │
//! │    otherwise                      ──► Applied           snapshot set   │
//! │                                                                         │
//! │  keys only in previous            ──► untouched, not reported          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing key in an update is never a deletion signal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::IntervalKind;
use crate::validation::ValidationResult;

// =============================================================================
// Snapshot & Report
// =============================================================================

/// A configuration mapping plus the remote revision it came from.
///
/// The revision is opaque and only ever compared for equality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    pub fn new(revision: Option<u64>, values: BTreeMap<String, Value>) -> Self {
        Self { revision, values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Outcome for a single config key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ConfigOutcome {
    Applied,
    Rejected(String),
    Unchanged,
}

/// Per-key outcomes of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReport {
    /// Revision of the incoming snapshot.
    pub revision: Option<u64>,
    pub outcomes: BTreeMap<String, ConfigOutcome>,
}

impl ConfigReport {
    /// Keys that were applied in this pass.
    pub fn applied_keys(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == ConfigOutcome::Applied)
            .map(|(k, _)| k.as_str())
    }

    pub fn applied_count(&self) -> usize {
        self.applied_keys().count()
    }

    pub fn rejected_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, ConfigOutcome::Rejected(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Local validation rule for incoming config values.
pub trait ConfigPolicy: Send + Sync {
    /// Returns an error if `value` is not acceptable for `key`.
    fn validate(&self, key: &str, value: &Value) -> ValidationResult<()>;
}

/// Keys that drive the scheduler must be well-typed; anything else may
/// carry any non-null value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfigPolicy;

/// Remote key for `location_enabled`.
pub const KEY_LOCATION_ENABLED: &str = "locationEnabled";

/// Remote key for `check_in_enabled`.
pub const KEY_CHECK_IN_ENABLED: &str = "checkInEnabled";

impl ConfigPolicy for DefaultConfigPolicy {
    fn validate(&self, key: &str, value: &Value) -> ValidationResult<()> {
        if value.is_null() {
            return Err(ValidationError::required(key));
        }

        let is_interval = [
            IntervalKind::CheckIn,
            IntervalKind::ConfigCheckIn,
            IntervalKind::LocationUpload,
        ]
        .iter()
        .any(|k| k.remote_key() == key);

        if is_interval {
            return match value.as_u64() {
                Some(0) => Err(ValidationError::MustBePositive {
                    field: key.to_string(),
                }),
                Some(_) => Ok(()),
                None if value.as_i64().is_some() => Err(ValidationError::MustBePositive {
                    field: key.to_string(),
                }),
                None => Err(ValidationError::WrongType {
                    field: key.to_string(),
                    expected: "a positive integer".to_string(),
                }),
            };
        }

        if (key == KEY_LOCATION_ENABLED || key == KEY_CHECK_IN_ENABLED) && !value.is_boolean() {
            return Err(ValidationError::WrongType {
                field: key.to_string(),
                expected: "a boolean".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconciles `incoming` against `previous`.
///
/// Returns the report and the new local snapshot. `previous` is not modified.
///
/// ## Example
/// ```rust
/// use serde_json::json;
/// use checkin_core::reconcile::{reconcile, ConfigOutcome, ConfigSnapshot, DefaultConfigPolicy};
///
/// let prev = ConfigSnapshot::new(None, [("a".into(), json!(1)), ("b".into(), json!(2))].into());
/// let next = ConfigSnapshot::new(Some(2), [("a".into(), json!(1)), ("b".into(), json!(3))].into());
///
/// let (report, snapshot) = reconcile(&prev, &next, &DefaultConfigPolicy);
/// assert_eq!(report.outcomes["a"], ConfigOutcome::Unchanged);
/// assert_eq!(report.outcomes["b"], ConfigOutcome::Applied);
/// assert_eq!(snapshot.values["b"], json!(3));
/// ```
pub fn reconcile(
    previous: &ConfigSnapshot,
    incoming: &ConfigSnapshot,
    policy: &dyn ConfigPolicy,
) -> (ConfigReport, ConfigSnapshot) {
    let mut next = previous.clone();
    let mut outcomes = BTreeMap::new();

    for (key, value) in &incoming.values {
        let outcome = if previous.values.get(key) == Some(value) {
            ConfigOutcome::Unchanged
        } else {
            match policy.validate(key, value) {
                Ok(()) => {
                    next.values.insert(key.clone(), value.clone());
                    ConfigOutcome::Applied
                }
                Err(e) => ConfigOutcome::Rejected(e.to_string()),
            }
        };
        outcomes.insert(key.clone(), outcome);
    }

    if incoming.revision.is_some() {
        next.revision = incoming.revision;
    }

    let report = ConfigReport {
        revision: incoming.revision,
        outcomes,
    };
    (report, next)
}

/// Holds the locally applied snapshot between check-ins.
pub struct ConfigReconciler {
    snapshot: ConfigSnapshot,
    policy: Box<dyn ConfigPolicy>,
}

impl ConfigReconciler {
    /// Creates a reconciler with the [`DefaultConfigPolicy`].
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self::with_policy(snapshot, Box::new(DefaultConfigPolicy))
    }

    pub fn with_policy(snapshot: ConfigSnapshot, policy: Box<dyn ConfigPolicy>) -> Self {
        Self { snapshot, policy }
    }

    /// Reconciles and replaces the held snapshot.
    pub fn apply(&mut self, incoming: &ConfigSnapshot) -> ConfigReport {
        let (report, next) = reconcile(&self.snapshot, incoming, self.policy.as_ref());
        self.snapshot = next;
        report
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }
}

impl std::fmt::Debug for ConfigReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigReconciler")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snap(pairs: &[(&str, Value)]) -> ConfigSnapshot {
        ConfigSnapshot::new(
            None,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_reconcile_mixed_outcomes() {
        let prev = snap(&[("a", json!(1)), ("b", json!(2))]);
        let incoming = snap(&[("a", json!(1)), ("b", json!(3)), ("c", json!(4))]);

        let (report, next) = reconcile(&prev, &incoming, &DefaultConfigPolicy);

        assert_eq!(report.outcomes["a"], ConfigOutcome::Unchanged);
        assert_eq!(report.outcomes["b"], ConfigOutcome::Applied);
        assert_eq!(report.outcomes["c"], ConfigOutcome::Applied);
        assert_eq!(next, snap(&[("a", json!(1)), ("b", json!(3)), ("c", json!(4))]));
    }

    #[test]
    fn test_reconcile_never_removes_previous_only_keys() {
        let prev = snap(&[("a", json!(1)), ("b", json!(2))]);
        let incoming = snap(&[("a", json!(1))]);

        let (report, next) = reconcile(&prev, &incoming, &DefaultConfigPolicy);

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes["a"], ConfigOutcome::Unchanged);
        assert_eq!(next, prev);
    }

    #[test]
    fn test_rejected_key_keeps_previous_value() {
        let prev = snap(&[("checkInInterval", json!(600))]);
        let incoming = snap(&[
            ("checkInInterval", json!(-5)),
            ("locationEnabled", json!("yes")),
            ("motd", Value::Null),
        ]);

        let (report, next) = reconcile(&prev, &incoming, &DefaultConfigPolicy);

        assert!(matches!(
            report.outcomes["checkInInterval"],
            ConfigOutcome::Rejected(_)
        ));
        assert!(matches!(
            report.outcomes["locationEnabled"],
            ConfigOutcome::Rejected(_)
        ));
        assert!(matches!(report.outcomes["motd"], ConfigOutcome::Rejected(_)));
        assert_eq!(report.rejected_count(), 3);
        assert_eq!(next.values["checkInInterval"], json!(600));
        assert!(next.get("locationEnabled").is_none());
    }

    #[test]
    fn test_default_policy() {
        let policy = DefaultConfigPolicy;
        assert!(policy.validate("configCheckInInterval", &json!(60)).is_ok());
        assert!(policy.validate("configCheckInInterval", &json!(0)).is_err());
        assert!(policy.validate("configCheckInInterval", &json!(1.5)).is_err());
        assert!(policy.validate("checkInEnabled", &json!(false)).is_ok());
        assert!(policy.validate("theme", &json!({"color": "blue"})).is_ok());
        assert!(policy.validate("theme", &Value::Null).is_err());
    }

    #[test]
    fn test_reconciler_tracks_revision() {
        let mut reconciler = ConfigReconciler::new(ConfigSnapshot::default());
        let mut incoming = snap(&[("a", json!(true))]);
        incoming.revision = Some(7);

        let report = reconciler.apply(&incoming);
        assert_eq!(report.revision, Some(7));
        assert_eq!(report.applied_keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(reconciler.snapshot().revision, Some(7));

        let again = reconciler.apply(&incoming);
        assert_eq!(again.applied_count(), 0);
        assert_eq!(again.outcomes["a"], ConfigOutcome::Unchanged);
    }
}
