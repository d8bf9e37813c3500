//! # Check-in Pipeline
//!
//! Executes one check-in for a [`RunToken`] issued by the scheduler.
//!
//! ## Run Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  RunToken ──► credential valid? ──no──► fail fast (configuration)      │
//! │                   │                                                     │
//! │                   ▼                                                     │
//! │  assemble: registry snapshot, device providers, location (if due),     │
//! │            queued receipts, pending device tag, push token             │
//! │                   │                                                     │
//! │                   ├──► observers: devices_info                          │
//! │                   ▼                                                     │
//! │  Transport::send  (single network call, the only suspension point)     │
//! │                   │                                                     │
//! │        ┌──────────┴───────────┐                                         │
//! │        ▼                      ▼                                         │
//! │     success                failure                                      │
//! │  reconcile config      timestamps untouched                             │
//! │  drain receipts        tag and receipts stay queued                     │
//! │  advance timestamps    status_message                                   │
//! │        │                      │                                         │
//! │        └──────────┬───────────┘                                         │
//! │                   ▼                                                     │
//! │  scheduler.complete ─► persist ─► observers: check_in_completed        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-flight is enforced by the scheduler's token issuance, not here.
//! No lock is held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use checkin_core::payload::{CheckInPayload, CheckInResponse};
use checkin_core::reconcile::ConfigReconciler;
use checkin_core::{
    ConfigReport, ConfigSnapshot, Credential, CredentialState, PersistedState, Registry,
    RunOutcome, RunToken, Scheduler, Trigger, ValidationError, STATE_SCHEMA_VERSION,
};

use crate::collaborators::Collaborators;
use crate::error::{AgentError, AgentResult};
use crate::observer::{ObserverEvent, ObserverHub};
use crate::store::StateStore;

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Session
// =============================================================================

/// Host-supplied values that ride along with check-ins.
#[derive(Debug, Default)]
pub struct Session {
    pub credential: Option<Credential>,
    /// Device tag waiting to be sent.
    pub device_tag: Option<String>,
    /// Hex-encoded push token.
    pub push_token: Option<String>,
    /// Validity flag restored from the last run of the process.
    pub stored_validity: Option<bool>,
}

impl Session {
    pub fn is_validated(&self) -> bool {
        self.credential.as_ref().is_some_and(Credential::is_valid)
    }

    /// Validity flag to persist.
    ///
    /// The stored flag stands until a credential set in this process has
    /// been judged.
    pub fn credential_validity(&self) -> Option<bool> {
        match self.credential.as_ref().map(Credential::state) {
            Some(CredentialState::Valid) => Some(true),
            Some(CredentialState::Invalid(_)) => Some(false),
            Some(CredentialState::Unvalidated) | None => self.stored_validity,
        }
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Terminal outcome of one check-in run.
#[derive(Debug, Clone)]
pub struct CheckInCompletion {
    pub run_id: u64,
    pub trigger: Trigger,
    pub success: bool,
    /// Transport status, if a reply was received.
    pub status: Option<u16>,
    /// Raw response body.
    pub body: Vec<u8>,
    /// Decoded response, on success.
    pub response: Option<CheckInResponse>,
    /// Config outcomes, when the response carried configuration.
    pub config_report: Option<ConfigReport>,
    pub error: Option<AgentError>,
}

impl CheckInCompletion {
    /// Whether the run applied at least one config change.
    pub fn applied_config(&self) -> bool {
        self.config_report
            .as_ref()
            .is_some_and(|r| r.applied_count() > 0)
    }
}

/// What was sent, so the outcome can be settled against it.
struct Sent {
    device_tag: Option<String>,
    receipt_ids: Vec<String>,
    location_uploaded: bool,
}

/// Reply as far as it got.
struct Exchange {
    status: Option<u16>,
    body: Vec<u8>,
    result: AgentResult<CheckInResponse>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Shared handles needed to run a check-in. Cheap to clone.
#[derive(Clone)]
pub struct CheckInPipeline {
    pub(crate) registry: Arc<Registry>,
    pub(crate) scheduler: Arc<Mutex<Scheduler>>,
    pub(crate) reconciler: Arc<Mutex<ConfigReconciler>>,
    pub(crate) session: Arc<Mutex<Session>>,
    pub(crate) collaborators: Collaborators,
    pub(crate) hub: Arc<ObserverHub>,
    pub(crate) store: Arc<dyn StateStore>,
}

impl CheckInPipeline {
    /// Runs the check-in owned by `token` to its terminal outcome.
    ///
    /// Never returns an error: failures are reported through the completion
    /// and the observers.
    pub async fn run(&self, token: RunToken) -> CheckInCompletion {
        let run_id = token.id();
        let trigger = token.trigger();
        info!(
            run_id,
            trigger = %trigger,
            upload_location = token.upload_location(),
            refresh_config = token.refresh_config(),
            "Check-in started"
        );

        let credential = lock(&self.session).credential.clone();
        let developer_key = match credential {
            Some(c) if c.is_valid() => c.key().to_string(),
            _ => {
                let sent = Sent {
                    device_tag: None,
                    receipt_ids: Vec::new(),
                    location_uploaded: false,
                };
                let exchange = Exchange {
                    status: None,
                    body: Vec::new(),
                    result: Err(AgentError::CredentialNotValidated),
                };
                return self.settle(token, sent, exchange).await;
            }
        };

        let (payload, sent) = self.assemble(&token, developer_key).await;
        self.hub
            .notify(&ObserverEvent::DevicesInfo(payload.devices.clone()));

        let exchange = self.exchange(&payload).await;
        self.settle(token, sent, exchange).await
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    async fn assemble(&self, token: &RunToken, developer_key: String) -> (CheckInPayload, Sent) {
        let extensions = self.registry.snapshot_extensions();
        let devices: Vec<_> = self
            .registry
            .snapshot_devices()
            .iter()
            .map(|d| d.details())
            .collect();
        for device in devices.iter().filter(|d| !d.failed_providers.is_empty()) {
            warn!(
                device = %device.name,
                serial = %device.serial,
                providers = ?device.failed_providers,
                "Device provider panicked, reporting without it"
            );
        }

        let location = if token.upload_location() {
            self.collaborators.location.current_location().await
        } else {
            None
        };

        let receipts = match self.store.pending_receipts().await {
            Ok(receipts) => receipts,
            Err(e) => {
                warn!(error = %e, "Could not load queued receipts");
                Vec::new()
            }
        };

        let (device_tag, push_token) = {
            let session = lock(&self.session);
            (session.device_tag.clone(), session.push_token.clone())
        };
        let (last_check_in, last_location_upload) = {
            let scheduler = lock(&self.scheduler);
            (scheduler.last_check_in(), scheduler.last_location_upload())
        };
        let config_revision = lock(&self.reconciler).snapshot().revision;

        debug!(
            extensions = extensions.len(),
            devices = devices.len(),
            receipts = receipts.len(),
            has_location = location.is_some(),
            "Assembled check-in payload"
        );

        let sent = Sent {
            device_tag: device_tag.clone(),
            receipt_ids: receipts.iter().map(|r| r.id.clone()).collect(),
            location_uploaded: location.is_some(),
        };

        let payload = CheckInPayload {
            device_uuid: self.collaborators.identity.device_uuid(),
            developer_key,
            extensions,
            devices,
            location,
            device_tag,
            push_token,
            receipts,
            request_config: token.refresh_config(),
            config_revision,
            last_check_in,
            last_location_upload,
            sent_at: self.collaborators.clock.now(),
        };
        (payload, sent)
    }

    async fn exchange(&self, payload: &CheckInPayload) -> Exchange {
        let reply = match self.collaborators.transport.send(payload).await {
            Ok(reply) => reply,
            Err(e) => {
                return Exchange {
                    status: None,
                    body: Vec::new(),
                    result: Err(AgentError::Transport {
                        status: None,
                        message: e.to_string(),
                    }),
                }
            }
        };

        let result = if !reply.is_success() {
            let text = String::from_utf8_lossy(&reply.body).trim().to_string();
            Err(AgentError::Transport {
                status: Some(reply.status),
                message: if text.is_empty() {
                    "non-success status".to_string()
                } else {
                    text
                },
            })
        } else {
            CheckInResponse::parse(&reply.body)
                .map_err(|e| AgentError::MalformedResponse(e.to_string()))
        };

        Exchange {
            status: Some(reply.status),
            body: reply.body,
            result,
        }
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    async fn settle(&self, token: RunToken, sent: Sent, exchange: Exchange) -> CheckInCompletion {
        let run_id = token.id();
        let trigger = token.trigger();
        let now = self.collaborators.clock.now();

        let mut completion = CheckInCompletion {
            run_id,
            trigger,
            success: false,
            status: exchange.status,
            body: exchange.body,
            response: None,
            config_report: None,
            error: None,
        };

        match exchange.result {
            Ok(response) => {
                let report = response.config.clone().map(|remote| {
                    let incoming = ConfigSnapshot::from(remote);
                    lock(&self.reconciler).apply(&incoming)
                });

                {
                    let mut scheduler = lock(&self.scheduler);
                    if let (Some(report), Some(incoming)) = (&report, &response.config) {
                        for key in report.applied_keys() {
                            if let Some(value) = incoming.values.get(key) {
                                scheduler.apply_remote(key, value);
                            }
                        }
                    }
                    let outcome = RunOutcome {
                        success: true,
                        location_uploaded: sent.location_uploaded,
                        config_refreshed: response.config.is_some(),
                    };
                    if let Err(e) = scheduler.complete(token, outcome, now) {
                        error!(run_id, error = %e, "Scheduler rejected run completion");
                    }
                }

                let tag_status = sent
                    .device_tag
                    .as_ref()
                    .map(|tag| self.settle_device_tag(tag, &response));

                if !sent.receipt_ids.is_empty() {
                    if let Err(e) = self.store.remove_receipts(&sent.receipt_ids).await {
                        warn!(run_id, error = %e, "Could not drain sent receipts");
                    }
                }

                self.persist().await;

                info!(
                    run_id,
                    status = ?completion.status,
                    applied = report.as_ref().map_or(0, ConfigReport::applied_count),
                    rejected = report.as_ref().map_or(0, ConfigReport::rejected_count),
                    "Check-in succeeded"
                );

                if let Some(report) = &report {
                    self.hub.notify(&ObserverEvent::ConfigReport(report.clone()));
                }
                if let Some((success, error)) = tag_status {
                    self.hub
                        .notify(&ObserverEvent::DeviceTagStatus { success, error });
                }
                if let Some(message) = &response.message {
                    self.hub
                        .notify(&ObserverEvent::StatusMessage(message.clone()));
                }

                completion.success = true;
                completion.config_report = report;
                completion.response = Some(response);
            }
            Err(err) => {
                let completed = lock(&self.scheduler).complete(token, RunOutcome::failed(), now);
                if let Err(e) = completed {
                    error!(run_id, error = %e, "Scheduler rejected run completion");
                }

                self.persist().await;

                warn!(
                    run_id,
                    status = ?completion.status,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Check-in failed"
                );

                if sent.device_tag.is_some() {
                    self.hub.notify(&ObserverEvent::DeviceTagStatus {
                        success: false,
                        error: Some(err.clone()),
                    });
                }
                let message = if err.is_retryable() {
                    format!("{}; retrying at the next scheduled check-in", err)
                } else {
                    err.to_string()
                };
                self.hub.notify(&ObserverEvent::StatusMessage(message));

                completion.error = Some(err);
            }
        }

        self.hub
            .notify(&ObserverEvent::CheckInCompleted(completion.clone()));
        completion
    }

    /// Clears the pending tag once the service has answered for it.
    ///
    /// A tag the host replaced mid-flight stays pending.
    fn settle_device_tag(
        &self,
        sent: &str,
        response: &CheckInResponse,
    ) -> (bool, Option<AgentError>) {
        let mut session = lock(&self.session);
        if session.device_tag.as_deref() == Some(sent) {
            session.device_tag = None;
        }

        match response.device_tag_accepted {
            Some(false) => {
                let reason = response
                    .message
                    .clone()
                    .unwrap_or_else(|| "rejected by the service".to_string());
                (
                    false,
                    Some(AgentError::Validation(ValidationError::InvalidFormat {
                        field: "deviceTag".to_string(),
                        reason,
                    })),
                )
            }
            _ => (true, None),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Current state document.
    pub fn persisted_state(&self) -> PersistedState {
        let credential_valid = lock(&self.session).credential_validity();
        let (last_check_in, last_location_upload, last_config_refresh) = {
            let scheduler = lock(&self.scheduler);
            (
                scheduler.last_check_in(),
                scheduler.last_location_upload(),
                scheduler.last_config_refresh(),
            )
        };
        let config = lock(&self.reconciler).snapshot().clone();

        PersistedState {
            schema_version: STATE_SCHEMA_VERSION,
            credential_valid,
            last_check_in,
            last_location_upload,
            last_config_refresh,
            config,
        }
    }

    /// Saves the state document. Failures are logged only.
    pub async fn persist(&self) {
        let state = self.persisted_state();
        if let Err(e) = self.store.save_state(&state).await {
            warn!(error = %e, "Could not persist agent state");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
