//! # Check-in Agent
//!
//! The host-facing surface. Owns the registry, scheduler, reconciler, and
//! observer hub, and drives timer-based check-ins.
//!
//! ## Driver Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   start() ──spawn──► driver                                            │
//! │                        │                                                │
//! │                        ▼                                                │
//! │          ┌──── select! ─────────────────────────┐                       │
//! │          │  interval.tick()   (evaluation period) │                     │
//! │          │     credential valid?                  │                     │
//! │          │     scheduler.tick(now) ─► RunToken?   │                     │
//! │          │        └─ spawn pipeline.run(token)    │                     │
//! │          │                                        │                     │
//! │          │  shutdown_rx.recv() ─► break           │                     │
//! │          └────────────────────────────────────────┘                     │
//! │                                                                         │
//! │   Explicit check_in(), push, and background fetch feed the same        │
//! │   scheduler, so at most one run is ever in flight.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use checkin_core::reconcile::{ConfigPolicy, ConfigReconciler, DefaultConfigPolicy};
use checkin_core::validation::{validate_developer_key, validate_device_tag};
use checkin_core::{
    CheckInConfig, CheckInState, ConfigSnapshot, Credential, CredentialState, CustomDevice,
    DeviceDetails, ExtensionRecord, IntervalKind, Registry, Scheduler, TransactionReceipt,
};
use checkin_db::{Database, DbConfig};

use crate::collaborators::{
    Clock, Collaborators, CredentialValidator, IdentityStore, LocationProvider, NoLocation,
    SystemClock, Transport, Verdict,
};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::lifecycle::{FetchResult, LifecycleController, LifecycleEvent};
use crate::observer::{Observer, ObserverEvent, ObserverHub};
use crate::pipeline::{lock, CheckInCompletion, CheckInPipeline, Session};
use crate::store::{MemoryStateStore, StateStore};

// =============================================================================
// Check-in Agent
// =============================================================================

/// Device check-in agent embedded in a host application.
pub struct CheckInAgent {
    /// Loaded configuration.
    config: AgentConfig,

    /// Shared handles used by every run.
    pipeline: CheckInPipeline,

    /// Host lifecycle translation.
    lifecycle: Arc<LifecycleController>,

    /// Shutdown sender for the driver (set after start).
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl CheckInAgent {
    // =========================================================================
    // Credential
    // =========================================================================

    /// Sets and validates the developer key. Allowed once.
    ///
    /// The verdict is reported to observers via `company_id_status` and
    /// persisted. A rejected key leaves every check-in failing fast.
    pub async fn set_credential(&self, key: &str) -> AgentResult<()> {
        validate_developer_key(key)?;
        {
            let mut session = lock(&self.pipeline.session);
            if session.credential.is_some() {
                return Err(AgentError::CredentialAlreadySet);
            }
            session.credential = Some(Credential::new(key));
        }

        let verdict = self.pipeline.collaborators.validator.validate(key).await;
        let result = match verdict {
            Verdict::Valid => {
                info!("Developer key validated");
                Ok(())
            }
            Verdict::Invalid(reason) => {
                warn!(reason = %reason, "Developer key rejected");
                Err(AgentError::Configuration(format!(
                    "developer key rejected: {}",
                    reason
                )))
            }
        };

        {
            let mut session = lock(&self.pipeline.session);
            if let Some(credential) = session.credential.as_mut() {
                credential.mark(match &result {
                    Ok(()) => CredentialState::Valid,
                    Err(e) => CredentialState::Invalid(e.to_string()),
                });
            }
        }

        self.pipeline.persist().await;
        self.pipeline.hub.notify(&ObserverEvent::CompanyIdStatus {
            success: result.is_ok(),
            error: result.as_ref().err().cloned(),
        });
        result
    }

    /// Whether the developer key set in this process has been accepted.
    pub fn is_validated(&self) -> bool {
        lock(&self.pipeline.session).is_validated()
    }

    /// Last known verdict on the developer key, including one restored from
    /// a previous run. `None` if no key was ever judged.
    pub fn credential_validity(&self) -> Option<bool> {
        lock(&self.pipeline.session).credential_validity()
    }

    /// Validates a license for a named service.
    pub async fn validate_license(&self, license: &str, service: &str) -> AgentResult<()> {
        match self
            .pipeline
            .collaborators
            .validator
            .validate_license(license, service)
            .await
        {
            Verdict::Valid => {
                debug!(service, "License validated");
                Ok(())
            }
            Verdict::Invalid(reason) => Err(AgentError::Configuration(format!(
                "license for {} rejected: {}",
                service, reason
            ))),
        }
    }

    // =========================================================================
    // Pause / Resume
    // =========================================================================

    /// Pauses timer-driven check-ins. Ignored (returns `None`) while the
    /// host application is in the background.
    pub fn pause(&self) -> Option<CheckInState> {
        self.lifecycle.pause()
    }

    pub fn resume(&self) -> CheckInState {
        self.lifecycle.resume()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn add_extension(&self, extension: ExtensionRecord) -> bool {
        self.pipeline.registry.add_extension(extension)
    }

    pub fn remove_extension(&self, identifier: &str) -> bool {
        self.pipeline.registry.remove_extension(identifier)
    }

    pub fn add_custom_device(&self, device: Arc<CustomDevice>) -> bool {
        self.pipeline.registry.add_custom_device(device)
    }

    pub fn remove_custom_device(&self, device: &Arc<CustomDevice>) -> bool {
        self.pipeline.registry.remove_custom_device(device)
    }

    /// Registered extensions, in registration order.
    pub fn extensions(&self) -> Vec<ExtensionRecord> {
        self.pipeline.registry.snapshot_extensions()
    }

    /// Registered custom devices with every provider evaluated once.
    pub fn connected_device_info(&self) -> Vec<DeviceDetails> {
        self.pipeline
            .registry
            .snapshot_devices()
            .iter()
            .map(|device| device.details())
            .collect()
    }

    // =========================================================================
    // Intervals and Overrides
    // =========================================================================

    /// Sets an interval in seconds. Non-positive values are rejected and the
    /// previous value is kept.
    pub fn set_interval(&self, kind: IntervalKind, seconds: i64) -> AgentResult<()> {
        lock(&self.pipeline.scheduler).set_interval(kind, seconds)?;
        debug!(kind = %kind, seconds, "Interval updated");
        Ok(())
    }

    pub fn interval(&self, kind: IntervalKind) -> u64 {
        lock(&self.pipeline.scheduler).interval(kind)
    }

    pub fn set_check_in_interval(&self, seconds: i64) -> AgentResult<()> {
        self.set_interval(IntervalKind::CheckIn, seconds)
    }

    pub fn check_in_interval(&self) -> u64 {
        self.interval(IntervalKind::CheckIn)
    }

    pub fn set_config_check_in_interval(&self, seconds: i64) -> AgentResult<()> {
        self.set_interval(IntervalKind::ConfigCheckIn, seconds)
    }

    pub fn config_check_in_interval(&self) -> u64 {
        self.interval(IntervalKind::ConfigCheckIn)
    }

    pub fn set_location_upload_interval(&self, seconds: i64) -> AgentResult<()> {
        self.set_interval(IntervalKind::LocationUpload, seconds)
    }

    pub fn location_upload_interval(&self) -> u64 {
        self.interval(IntervalKind::LocationUpload)
    }

    /// Sets or clears the one-shot check-in override.
    pub fn allow_next_check_in_upload(&self, allow: bool) {
        lock(&self.pipeline.scheduler).allow_next_check_in(allow);
    }

    /// Sets or clears the one-shot location override.
    pub fn allow_next_location_upload(&self, allow: bool) {
        lock(&self.pipeline.scheduler).allow_next_location_upload(allow);
    }

    pub fn set_location_enabled(&self, enabled: bool) {
        lock(&self.pipeline.scheduler).set_location_enabled(enabled);
    }

    pub fn set_check_in_enabled(&self, enabled: bool) {
        lock(&self.pipeline.scheduler).set_check_in_enabled(enabled);
    }

    // =========================================================================
    // Device Tag and Receipts
    // =========================================================================

    /// Queues a device tag for the next check-in, replacing any pending one.
    pub fn set_device_tag(&self, tag: &str) -> AgentResult<()> {
        validate_device_tag(tag)?;
        lock(&self.pipeline.session).device_tag = Some(tag.to_string());
        Ok(())
    }

    /// Pending device tag, if any.
    pub fn pending_device_tag(&self) -> Option<String> {
        lock(&self.pipeline.session).device_tag.clone()
    }

    /// Queues a transaction receipt for the next check-in. Returns its id.
    pub async fn upload_transaction_receipt(
        &self,
        fields: BTreeMap<String, Value>,
    ) -> AgentResult<String> {
        let receipt = TransactionReceipt::new(fields, self.pipeline.collaborators.clock.now());
        self.pipeline.store.enqueue_receipt(&receipt).await?;
        debug!(receipt_id = %receipt.id, "Transaction receipt queued");
        Ok(receipt.id)
    }

    // =========================================================================
    // Check-in
    // =========================================================================

    /// Runs a check-in now, ignoring the interval.
    ///
    /// Fails fast when the key is not validated, a run is already in flight,
    /// the agent is paused, or check-ins are disabled. Transport failures are
    /// reported in the returned completion, not as an error.
    pub async fn check_in(&self) -> AgentResult<CheckInCompletion> {
        if !self.is_validated() {
            return Err(AgentError::CredentialNotValidated);
        }
        let now = self.pipeline.collaborators.clock.now();
        let token = lock(&self.pipeline.scheduler).request(now)?;
        Ok(self.pipeline.run(token).await)
    }

    // =========================================================================
    // Observers and Lifecycle
    // =========================================================================

    pub fn subscribe<O: Observer + 'static>(&self, observer: &Arc<O>) -> bool {
        self.pipeline.hub.subscribe(observer)
    }

    pub fn unsubscribe<O: Observer + 'static>(&self, observer: &Arc<O>) -> bool {
        self.pipeline.hub.unsubscribe(observer)
    }

    /// Forwards a host lifecycle event.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> Option<FetchResult> {
        self.lifecycle.handle(event).await
    }

    pub fn device_uuid(&self) -> String {
        self.pipeline.collaborators.identity.device_uuid()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn state(&self) -> CheckInState {
        lock(&self.pipeline.scheduler).state()
    }

    pub fn check_in_config(&self) -> CheckInConfig {
        lock(&self.pipeline.scheduler).config().clone()
    }

    /// Currently applied remote configuration.
    pub fn config_snapshot(&self) -> ConfigSnapshot {
        lock(&self.pipeline.reconciler).snapshot().clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Starts timer-driven check-ins.
    pub fn start(&mut self) -> AgentResult<()> {
        if self.shutdown_tx.is_some() {
            debug!("Check-in driver already running");
            return Ok(());
        }

        let period = self.config.evaluation_period();
        info!(
            device_uuid = %self.device_uuid(),
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            check_in_interval = self.check_in_interval(),
            "Starting check-in agent"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        tokio::spawn(Self::driver(self.pipeline.clone(), period, shutdown_rx));
        Ok(())
    }

    /// Stops the driver. A run already in flight completes on its own.
    pub async fn shutdown(&mut self) -> AgentResult<()> {
        info!("Shutting down check-in agent");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.pipeline.persist().await;
        info!("Check-in agent stopped");
        Ok(())
    }

    async fn driver(
        pipeline: CheckInPipeline,
        period: std::time::Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let validated = lock(&pipeline.session).is_validated();
                    let token = if validated {
                        let now = pipeline.collaborators.clock.now();
                        lock(&pipeline.scheduler).tick(now)
                    } else {
                        None
                    };
                    if let Some(token) = token {
                        let run = pipeline.clone();
                        tokio::spawn(async move {
                            run.run(token).await;
                        });
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Check-in driver received shutdown");
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`CheckInAgent`].
pub struct CheckInAgentBuilder {
    config: AgentConfig,
    transport: Option<Arc<dyn Transport>>,
    validator: Option<Arc<dyn CredentialValidator>>,
    identity: Option<Arc<dyn IdentityStore>>,
    location: Option<Arc<dyn LocationProvider>>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn StateStore>>,
    policy: Option<Box<dyn ConfigPolicy>>,
}

impl CheckInAgentBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: AgentConfig) -> Self {
        CheckInAgentBuilder {
            config,
            transport: None,
            validator: None,
            identity: None,
            location: None,
            clock: None,
            store: None,
            policy: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the location provider. Defaults to [`NoLocation`].
    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the state store. Defaults to a SQLite database at the configured
    /// path, or an in-memory store when no path is available.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the remote config validation policy.
    pub fn with_policy(mut self, policy: Box<dyn ConfigPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Builds the agent and restores persisted state.
    pub async fn build(self) -> AgentResult<CheckInAgent> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| AgentError::Configuration("Transport required".into()))?;
        let validator = self
            .validator
            .ok_or_else(|| AgentError::Configuration("Credential validator required".into()))?;
        let identity = self
            .identity
            .ok_or_else(|| AgentError::Configuration("Identity store required".into()))?;

        let store = match self.store {
            Some(store) => store,
            None => Self::open_store(&self.config).await?,
        };

        let mut scheduler = Scheduler::new(self.config.check_in_config());
        let mut session = Session::default();
        let snapshot = match store.load_state().await {
            Ok(Some(state)) => {
                scheduler.restore(&state);
                session.stored_validity = state.credential_valid;
                debug!(
                    revision = ?state.config.revision,
                    keys = state.config.values.len(),
                    credential_valid = ?state.credential_valid,
                    "Restored agent state"
                );
                state.config
            }
            Ok(None) => ConfigSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "Could not restore agent state, starting fresh");
                ConfigSnapshot::default()
            }
        };
        let policy = self
            .policy
            .unwrap_or_else(|| Box::new(DefaultConfigPolicy));

        let collaborators = Collaborators {
            transport,
            location: self.location.unwrap_or_else(|| Arc::new(NoLocation)),
            validator,
            identity,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        let pipeline = CheckInPipeline {
            registry: Arc::new(Registry::new()),
            scheduler: Arc::new(Mutex::new(scheduler)),
            reconciler: Arc::new(Mutex::new(ConfigReconciler::with_policy(snapshot, policy))),
            session: Arc::new(Mutex::new(session)),
            collaborators,
            hub: Arc::new(ObserverHub::new()),
            store,
        };
        let lifecycle = Arc::new(LifecycleController::new(
            pipeline.clone(),
            self.config.background_fetch_deadline(),
        ));

        Ok(CheckInAgent {
            config: self.config,
            pipeline,
            lifecycle,
            shutdown_tx: None,
        })
    }

    async fn open_store(config: &AgentConfig) -> AgentResult<Arc<dyn StateStore>> {
        let Some(path) = config.database_path() else {
            warn!("No data directory available, agent state will not survive restarts");
            return Ok(Arc::new(MemoryStateStore::new()));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::new(DbConfig::new(path)).await?;
        Ok(Arc::new(db))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
