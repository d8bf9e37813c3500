//! # Scheduler
//!
//! Decides, per tick, whether a check-in is due, and owns the single-flight
//! state machine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │            tick / request                    complete                   │
//! │   ┌──────┐ ─────────────► ┌─────────┐ ─────────────────► ┌──────┐      │
//! │   │ Idle │                │ Running │                     │ Idle │      │
//! │   └──────┘ ◄───────┐      └─────────┘ ──┐                 └──────┘      │
//! │      │ pause       │ resume    pause    │ complete                     │
//! │      ▼             │        (deferred)  ▼ (pause_requested)            │
//! │   ┌────────┐ ──────┘                 ┌────────┐                        │
//! │   │ Paused │ ◄─────────────────────  │ Paused │                        │
//! │   └────────┘                         └────────┘                        │
//! │                                                                         │
//! │  A RunToken is handed out only on Idle → Running. Completing a run     │
//! │  requires that token back; the token is not Clone.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! `Scheduler` is plain data. The agent keeps it behind one mutex, which
//! makes `tick` an atomic check-and-transition: two concurrent ticks can
//! never both receive a token.
//!
//! ## Three Intervals, One Lane
//! Only the check-in interval opens a run. Config refresh and location upload
//! have their own intervals, but are only ever *piggybacked* on a check-in
//! run (flags on the [`RunToken`]); they never open a second network call.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::reconcile::{KEY_CHECK_IN_ENABLED, KEY_LOCATION_ENABLED};
use crate::state::PersistedState;
use crate::types::{CheckInConfig, CheckInState, IntervalKind};
use crate::validation::validate_interval_secs;

// =============================================================================
// Run Token
// =============================================================================

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The check-in interval elapsed (or no check-in ever succeeded).
    Interval,
    /// A one-shot `allow_next_check_in` override was pending.
    Forced,
    /// The host called `check_in` directly.
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval => write!(f, "interval"),
            Trigger::Forced => write!(f, "forced"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Proof that the holder owns the single running check-in.
///
/// Not `Clone`: there is exactly one per run, and it must be
/// handed back to [`Scheduler::complete`].
#[derive(Debug, PartialEq, Eq)]
pub struct RunToken {
    id: u64,
    trigger: Trigger,
    issued_at: DateTime<Utc>,
    upload_location: bool,
    refresh_config: bool,
}

impl RunToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// The run should attach a location fix.
    pub fn upload_location(&self) -> bool {
        self.upload_location
    }

    /// The run should ask the remote side for configuration.
    pub fn refresh_config(&self) -> bool {
        self.refresh_config
    }
}

/// What a finished run achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    pub location_uploaded: bool,
    pub config_refreshed: bool,
}

impl RunOutcome {
    pub fn failed() -> Self {
        Self::default()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Check-in scheduling state.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: CheckInConfig,
    state: CheckInState,
    pause_requested: bool,
    last_check_in: Option<DateTime<Utc>>,
    last_location_upload: Option<DateTime<Utc>>,
    last_config_refresh: Option<DateTime<Utc>>,
    config_refresh_pending: bool,
    next_run_id: u64,
    active_run: Option<u64>,
}

impl Scheduler {
    pub fn new(config: CheckInConfig) -> Self {
        Self {
            config,
            state: CheckInState::Idle,
            pause_requested: false,
            last_check_in: None,
            last_location_upload: None,
            last_config_refresh: None,
            config_refresh_pending: false,
            next_run_id: 1,
            active_run: None,
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluates whether a check-in is due and, if so, starts it.
    ///
    /// Due when the state is `Idle`, check-ins are enabled, and either the
    /// one-shot override is pending or the check-in interval has elapsed
    /// since the last *successful* check-in.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<RunToken> {
        self.evaluate_config(now);

        if self.state != CheckInState::Idle || !self.config.check_in_enabled {
            return None;
        }

        let trigger = if self.config.force_next_check_in {
            Trigger::Forced
        } else if self.elapsed(self.last_check_in, IntervalKind::CheckIn, now) {
            Trigger::Interval
        } else {
            return None;
        };

        Some(self.begin(trigger, now))
    }

    /// Starts a run on explicit host request, ignoring the interval.
    pub fn request(&mut self, now: DateTime<Utc>) -> CoreResult<RunToken> {
        match self.state {
            CheckInState::Running => return Err(CoreError::CheckInInProgress),
            CheckInState::Paused => return Err(CoreError::Paused),
            CheckInState::Idle => {}
        }
        if !self.config.check_in_enabled {
            return Err(CoreError::CheckInDisabled);
        }

        self.evaluate_config(now);
        Ok(self.begin(Trigger::Manual, now))
    }

    /// Marks a config refresh as pending once its interval has elapsed.
    ///
    /// Runs on every tick, independently of whether a check-in is due.
    pub fn evaluate_config(&mut self, now: DateTime<Utc>) -> bool {
        if !self.config_refresh_pending
            && self.elapsed(self.last_config_refresh, IntervalKind::ConfigCheckIn, now)
        {
            self.config_refresh_pending = true;
        }
        self.config_refresh_pending
    }

    fn begin(&mut self, trigger: Trigger, now: DateTime<Utc>) -> RunToken {
        let location_due = self.config.location_enabled
            && self.elapsed(self.last_location_upload, IntervalKind::LocationUpload, now);
        let upload_location = self.config.force_next_location_upload || location_due;

        // One-shots are consumed on start, whatever the outcome.
        self.config.force_next_check_in = false;
        self.config.force_next_location_upload = false;

        let id = self.next_run_id;
        self.next_run_id += 1;
        self.active_run = Some(id);
        self.state = CheckInState::Running;

        RunToken {
            id,
            trigger,
            issued_at: now,
            upload_location,
            refresh_config: self.config_refresh_pending,
        }
    }

    /// Finishes the run identified by `token` and returns the settled state.
    ///
    /// Timestamps only advance on success, so a failed run is retried on the
    /// very next tick at the same due time.
    pub fn complete(
        &mut self,
        token: RunToken,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> CoreResult<CheckInState> {
        if self.state != CheckInState::Running || self.active_run != Some(token.id) {
            return Err(CoreError::ConcurrencyViolation(format!(
                "run {} completed while scheduler is {} (active run {:?})",
                token.id, self.state, self.active_run
            )));
        }

        if outcome.success {
            self.last_check_in = Some(now);
            if outcome.location_uploaded {
                self.last_location_upload = Some(now);
            }
            if outcome.config_refreshed {
                self.last_config_refresh = Some(now);
                self.config_refresh_pending = false;
            }
        }

        self.active_run = None;
        self.state = if self.pause_requested {
            self.pause_requested = false;
            CheckInState::Paused
        } else {
            CheckInState::Idle
        };
        Ok(self.state)
    }

    fn elapsed(&self, last: Option<DateTime<Utc>>, kind: IntervalKind, now: DateTime<Utc>) -> bool {
        match last {
            None => true,
            Some(last) => {
                let interval = i64::try_from(self.config.interval(kind)).unwrap_or(i64::MAX);
                (now - last).num_seconds() >= interval
            }
        }
    }

    // =========================================================================
    // Pause / Resume
    // =========================================================================

    /// Suspends timer-driven runs. A running check-in is not interrupted;
    /// the pause takes effect when it completes.
    pub fn pause(&mut self) -> CheckInState {
        match self.state {
            CheckInState::Idle => self.state = CheckInState::Paused,
            CheckInState::Running => self.pause_requested = true,
            CheckInState::Paused => {}
        }
        self.state
    }

    /// Releases a pause, including one still deferred behind a running check-in.
    pub fn resume(&mut self) -> CheckInState {
        match self.state {
            CheckInState::Paused => self.state = CheckInState::Idle,
            CheckInState::Running => self.pause_requested = false,
            CheckInState::Idle => {}
        }
        self.state
    }

    // =========================================================================
    // Setters
    // =========================================================================

    /// Sets an interval. Non-positive values are rejected and the previous
    /// value is kept. Takes effect at the next evaluation.
    pub fn set_interval(&mut self, kind: IntervalKind, seconds: i64) -> CoreResult<()> {
        let secs = validate_interval_secs(kind.remote_key(), seconds)
            .map_err(|_| CoreError::InvalidInterval { kind, seconds })?;
        self.config.set_interval_unchecked(kind, secs);
        Ok(())
    }

    pub fn interval(&self, kind: IntervalKind) -> u64 {
        self.config.interval(kind)
    }

    /// Sets or clears the one-shot check-in override.
    pub fn allow_next_check_in(&mut self, allow: bool) {
        self.config.force_next_check_in = allow;
    }

    /// Sets or clears the one-shot location override.
    pub fn allow_next_location_upload(&mut self, allow: bool) {
        self.config.force_next_location_upload = allow;
    }

    pub fn set_location_enabled(&mut self, enabled: bool) {
        self.config.location_enabled = enabled;
    }

    pub fn set_check_in_enabled(&mut self, enabled: bool) {
        self.config.check_in_enabled = enabled;
    }

    /// Applies an accepted remote config value to the scheduling knobs.
    ///
    /// Returns true if `key` is one the scheduler understands and the value
    /// was usable. Unknown keys are ignored.
    pub fn apply_remote(&mut self, key: &str, value: &Value) -> bool {
        for kind in [
            IntervalKind::CheckIn,
            IntervalKind::ConfigCheckIn,
            IntervalKind::LocationUpload,
        ] {
            if kind.remote_key() == key {
                return match value.as_u64().filter(|s| *s > 0) {
                    Some(secs) => {
                        self.config.set_interval_unchecked(kind, secs);
                        true
                    }
                    None => false,
                };
            }
        }

        match (key, value.as_bool()) {
            (KEY_LOCATION_ENABLED, Some(b)) => {
                self.config.location_enabled = b;
                true
            }
            (KEY_CHECK_IN_ENABLED, Some(b)) => {
                self.config.check_in_enabled = b;
                true
            }
            _ => false,
        }
    }

    /// Restores timestamps and remote-driven knobs from a persisted document.
    pub fn restore(&mut self, state: &PersistedState) {
        self.last_check_in = state.last_check_in;
        self.last_location_upload = state.last_location_upload;
        self.last_config_refresh = state.last_config_refresh;
        for (key, value) in &state.config.values {
            self.apply_remote(key, value);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> CheckInState {
        self.state
    }

    pub fn config(&self) -> &CheckInConfig {
        &self.config
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested
    }

    pub fn active_run(&self) -> Option<u64> {
        self.active_run
    }

    pub fn last_check_in(&self) -> Option<DateTime<Utc>> {
        self.last_check_in
    }

    pub fn last_location_upload(&self) -> Option<DateTime<Utc>> {
        self.last_location_upload
    }

    pub fn last_config_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_config_refresh
    }

    /// When the next interval-driven check-in becomes due.
    pub fn next_check_in_due(&self) -> Option<DateTime<Utc>> {
        let interval = i64::try_from(self.config.check_in_interval).unwrap_or(i64::MAX);
        self.last_check_in
            .and_then(|last| last.checked_add_signed(chrono::Duration::seconds(interval)))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(CheckInConfig::default())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
