//! # Agent Configuration
//!
//! File and environment configuration for the check-in agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CHECKIN_INTERVAL_SECS=900                                          │
//! │     CHECKIN_LOCATION_ENABLED=true                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/checkin-agent/checkin.toml (Linux)                       │
//! │     ~/Library/Application Support/com.checkin.agent/checkin.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │                                                                         │
//! │  Remote configuration received at check-in time is applied on top of   │
//! │  these at runtime and persisted with the agent state, not here.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # checkin.toml
//! [checkin]
//! check_in_interval_secs = 3600
//! config_check_in_interval_secs = 86400
//! location_upload_interval_secs = 3600
//! location_enabled = false
//! check_in_enabled = true
//! evaluation_period_ms = 1000
//! background_fetch_deadline_secs = 25
//!
//! [storage]
//! database_path = "/var/lib/checkin/agent.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use checkin_core::CheckInConfig;

use crate::error::{AgentError, AgentResult};

// =============================================================================
// Check-in Settings
// =============================================================================

/// Scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInSettings {
    /// Seconds between timer-driven check-ins.
    #[serde(default = "default_check_in_interval")]
    pub check_in_interval_secs: i64,

    /// Seconds between config refreshes.
    #[serde(default = "default_config_check_in_interval")]
    pub config_check_in_interval_secs: i64,

    /// Seconds between location uploads.
    #[serde(default = "default_location_upload_interval")]
    pub location_upload_interval_secs: i64,

    /// Attach location on the location interval.
    #[serde(default)]
    pub location_enabled: bool,

    /// Master switch for check-ins.
    #[serde(default = "default_true")]
    pub check_in_enabled: bool,

    /// How often the timer driver evaluates the scheduler (milliseconds).
    #[serde(default = "default_evaluation_period")]
    pub evaluation_period_ms: u64,

    /// Budget for reporting a background fetch result (seconds).
    #[serde(default = "default_background_fetch_deadline")]
    pub background_fetch_deadline_secs: u64,
}

fn default_check_in_interval() -> i64 {
    3600
}

fn default_config_check_in_interval() -> i64 {
    86_400
}

fn default_location_upload_interval() -> i64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_evaluation_period() -> u64 {
    1000
}

fn default_background_fetch_deadline() -> u64 {
    25
}

impl Default for CheckInSettings {
    fn default() -> Self {
        CheckInSettings {
            check_in_interval_secs: default_check_in_interval(),
            config_check_in_interval_secs: default_config_check_in_interval(),
            location_upload_interval_secs: default_location_upload_interval(),
            location_enabled: false,
            check_in_enabled: true,
            evaluation_period_ms: default_evaluation_period(),
            background_fetch_deadline_secs: default_background_fetch_deadline(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the agent keeps its state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database path. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub checkin: CheckInSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (checkin.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> AgentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> AgentResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| AgentError::Configuration("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AgentResult<()> {
        let c = &self.checkin;
        for (name, secs) in [
            ("check_in_interval_secs", c.check_in_interval_secs),
            ("config_check_in_interval_secs", c.config_check_in_interval_secs),
            ("location_upload_interval_secs", c.location_upload_interval_secs),
        ] {
            if secs <= 0 {
                return Err(AgentError::Configuration(format!(
                    "{} must be greater than 0, got {}",
                    name, secs
                )));
            }
        }

        if c.evaluation_period_ms == 0 {
            return Err(AgentError::Configuration(
                "evaluation_period_ms must be greater than 0".into(),
            ));
        }

        if c.background_fetch_deadline_secs == 0 {
            return Err(AgentError::Configuration(
                "background_fetch_deadline_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        let c = &mut self.checkin;

        for (var, target) in [
            ("CHECKIN_INTERVAL_SECS", &mut c.check_in_interval_secs),
            ("CHECKIN_CONFIG_INTERVAL_SECS", &mut c.config_check_in_interval_secs),
            ("CHECKIN_LOCATION_INTERVAL_SECS", &mut c.location_upload_interval_secs),
        ] {
            if let Ok(raw) = std::env::var(var) {
                match raw.parse::<i64>() {
                    Ok(v) => {
                        debug!(var, value = v, "Overriding interval from environment");
                        *target = v;
                    }
                    Err(_) => warn!(var, value = %raw, "Ignoring non-numeric interval in environment"),
                }
            }
        }

        if let Ok(raw) = std::env::var("CHECKIN_LOCATION_ENABLED") {
            if let Ok(v) = raw.parse::<bool>() {
                c.location_enabled = v;
            }
        }

        if let Ok(raw) = std::env::var("CHECKIN_ENABLED") {
            if let Ok(v) = raw.parse::<bool>() {
                c.check_in_enabled = v;
            }
        }

        if let Ok(path) = std::env::var("CHECKIN_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("checkin.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "checkin", "agent")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database path: configured, or `agent.db` in the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|d| d.data_dir().join("agent.db")))
    }

    /// Scheduler configuration derived from these settings.
    ///
    /// Call after [`validate`](Self::validate); non-positive intervals fall
    /// back to the scheduler defaults.
    pub fn check_in_config(&self) -> CheckInConfig {
        let defaults = CheckInConfig::default();
        let c = &self.checkin;
        let secs = |v: i64, fallback: u64| u64::try_from(v).ok().filter(|s| *s > 0).unwrap_or(fallback);

        CheckInConfig {
            check_in_interval: secs(c.check_in_interval_secs, defaults.check_in_interval),
            config_check_in_interval: secs(
                c.config_check_in_interval_secs,
                defaults.config_check_in_interval,
            ),
            location_upload_interval: secs(
                c.location_upload_interval_secs,
                defaults.location_upload_interval,
            ),
            location_enabled: c.location_enabled,
            check_in_enabled: c.check_in_enabled,
            force_next_check_in: false,
            force_next_location_upload: false,
        }
    }

    pub fn evaluation_period(&self) -> Duration {
        Duration::from_millis(self.checkin.evaluation_period_ms)
    }

    pub fn background_fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.checkin.background_fetch_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.checkin.check_in_interval_secs, 3600);
        assert_eq!(config.checkin.config_check_in_interval_secs, 86_400);
        assert!(!config.checkin.location_enabled);
        assert!(config.checkin.check_in_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();
        config.checkin.check_in_interval_secs = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.checkin.check_in_interval_secs = 60;
        config.checkin.location_upload_interval_secs = -1;
        assert!(config.validate().is_err());

        config.checkin.location_upload_interval_secs = 60;
        config.checkin.evaluation_period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [checkin]
            check_in_interval_secs = 120
            location_enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.checkin.check_in_interval_secs, 120);
        assert!(config.checkin.location_enabled);
        assert_eq!(config.checkin.background_fetch_deadline_secs, 25);
        assert!(config.storage.database_path.is_none());

        let scheduler_config = config.check_in_config();
        assert_eq!(scheduler_config.check_in_interval, 120);
        assert!(scheduler_config.location_enabled);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkin.toml");

        let mut config = AgentConfig::default();
        config.checkin.check_in_interval_secs = 300;
        config.storage.database_path = Some(dir.path().join("agent.db"));
        config.save(Some(path.clone())).unwrap();

        let loaded = AgentConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.checkin.check_in_interval_secs, 300);
        assert_eq!(loaded.database_path(), Some(dir.path().join("agent.db")));
    }

    #[test]
    fn test_load_or_default_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkin.toml");
        std::fs::write(&path, "[checkin]\ncheck_in_interval_secs = -5\n").unwrap();

        assert!(AgentConfig::load(Some(path.clone())).is_err());
        let config = AgentConfig::load_or_default(Some(path));
        assert_eq!(config.checkin.check_in_interval_secs, 3600);
    }
}
