//! # Lifecycle Controller
//!
//! Turns host application events into scheduler commands.
//!
//! ## Event Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Event                  Scheduler action                  Result        │
//! │  ─────────────────────  ────────────────────────────────  ───────────── │
//! │  BecameActive           host active, resume()             -             │
//! │  EnteredBackground      host inactive, resume()           -             │
//! │  PushRegistered(token)  store hex token in the session    -             │
//! │  PushReceived(payload)  directive? allow_next_check_in,   FetchResult   │
//! │                         then forced tick                                │
//! │  BackgroundFetch        forced tick                       FetchResult   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A forced tick waits for the run up to the background fetch deadline. Past
//! the deadline it reports [`FetchResult::Failed`] and leaves the run going;
//! the run still completes and notifies observers on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use checkin_core::CheckInState;

use crate::pipeline::{lock, CheckInPipeline};

/// Push payload key naming the command.
const PUSH_COMMAND_KEY: &str = "command";

/// Push command requesting a check-in.
const PUSH_CHECK_IN_COMMAND: &str = "check_in";

/// Push payload flag requesting a location upload with the check-in.
const PUSH_LOCATION_KEY: &str = "location";

// =============================================================================
// Events
// =============================================================================

/// Host lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The host application came to the foreground.
    BecameActive,
    /// The host application went to the background.
    EnteredBackground,
    /// The platform issued a push token.
    PushRegistered(Vec<u8>),
    /// A push notification arrived.
    PushReceived(Value),
    /// The OS granted background execution time.
    BackgroundFetch,
}

/// Outcome reported back to the OS for push and background fetch handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// A check-in succeeded and applied new configuration.
    NewData,
    /// Nothing was due, or the check-in brought no changes.
    NoData,
    /// The check-in failed or missed the deadline.
    Failed,
}

/// Parsed check-in directive from a push payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PushDirective {
    upload_location: bool,
}

impl PushDirective {
    fn parse(payload: &Value) -> Option<Self> {
        let command = payload.get(PUSH_COMMAND_KEY)?.as_str()?;
        if command != PUSH_CHECK_IN_COMMAND {
            return None;
        }
        Some(PushDirective {
            upload_location: payload
                .get(PUSH_LOCATION_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

// =============================================================================
// Controller
// =============================================================================

pub struct LifecycleController {
    /// Whether the host application is in the foreground.
    host_active: AtomicBool,
    pipeline: CheckInPipeline,
    fetch_deadline: Duration,
}

impl LifecycleController {
    pub fn new(pipeline: CheckInPipeline, fetch_deadline: Duration) -> Self {
        LifecycleController {
            host_active: AtomicBool::new(true),
            pipeline,
            fetch_deadline,
        }
    }

    pub fn is_host_active(&self) -> bool {
        self.host_active.load(Ordering::SeqCst)
    }

    /// Handles one lifecycle event.
    ///
    /// Returns a [`FetchResult`] for push and background fetch events.
    pub async fn handle(&self, event: LifecycleEvent) -> Option<FetchResult> {
        match event {
            LifecycleEvent::BecameActive => {
                self.host_active.store(true, Ordering::SeqCst);
                let state = lock(&self.pipeline.scheduler).resume();
                debug!(state = %state, "Host became active");
                None
            }
            LifecycleEvent::EnteredBackground => {
                self.host_active.store(false, Ordering::SeqCst);
                let state = lock(&self.pipeline.scheduler).resume();
                debug!(state = %state, "Host entered background");
                None
            }
            LifecycleEvent::PushRegistered(token) => {
                let encoded = hex::encode(&token);
                debug!(token_len = token.len(), "Push token registered");
                lock(&self.pipeline.session).push_token = Some(encoded);
                None
            }
            LifecycleEvent::PushReceived(payload) => {
                let Some(directive) = PushDirective::parse(&payload) else {
                    debug!("Push without check-in directive ignored");
                    return Some(FetchResult::NoData);
                };
                {
                    let mut scheduler = lock(&self.pipeline.scheduler);
                    scheduler.allow_next_check_in(true);
                    if directive.upload_location {
                        scheduler.allow_next_location_upload(true);
                    }
                }
                info!(
                    upload_location = directive.upload_location,
                    "Push requested a check-in"
                );
                Some(self.forced_tick().await)
            }
            LifecycleEvent::BackgroundFetch => {
                debug!("Background fetch");
                Some(self.forced_tick().await)
            }
        }
    }

    /// Pauses timer-driven check-ins. No effect while the host is inactive.
    pub fn pause(&self) -> Option<CheckInState> {
        if !self.is_host_active() {
            debug!("Pause ignored while host is inactive");
            return None;
        }
        Some(lock(&self.pipeline.scheduler).pause())
    }

    pub fn resume(&self) -> CheckInState {
        lock(&self.pipeline.scheduler).resume()
    }

    /// Evaluates the scheduler now and waits for any run it starts, up to
    /// the fetch deadline.
    async fn forced_tick(&self) -> FetchResult {
        if !lock(&self.pipeline.session).is_validated() {
            warn!("Forced check-in skipped: developer key is not validated");
            return FetchResult::Failed;
        }

        let now = self.pipeline.collaborators.clock.now();
        let token = lock(&self.pipeline.scheduler).tick(now);
        let Some(token) = token else {
            debug!("Forced tick found nothing due");
            return FetchResult::NoData;
        };

        let pipeline = self.pipeline.clone();
        let run = tokio::spawn(async move { pipeline.run(token).await });

        match tokio::time::timeout(self.fetch_deadline, run).await {
            Ok(Ok(completion)) if completion.success && completion.applied_config() => {
                FetchResult::NewData
            }
            Ok(Ok(completion)) if completion.success => FetchResult::NoData,
            Ok(Ok(_)) => FetchResult::Failed,
            Ok(Err(e)) => {
                warn!(error = %e, "Check-in task aborted");
                FetchResult::Failed
            }
            Err(_) => {
                warn!(
                    deadline_secs = self.fetch_deadline.as_secs(),
                    "Check-in missed the background deadline, leaving it running"
                );
                FetchResult::Failed
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        Collaborators, CredentialValidator, FixedIdentity, ManualClock, NoLocation, Transport,
        TransportError, TransportReply, Verdict,
    };
    use crate::observer::ObserverHub;
    use crate::pipeline::Session;
    use crate::store::MemoryStateStore;
    use async_trait::async_trait;
    use checkin_core::payload::CheckInPayload;
    use checkin_core::reconcile::ConfigReconciler;
    use checkin_core::{
        CheckInConfig, ConfigSnapshot, Credential, CredentialState, Registry, Scheduler,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Replies with a fixed body after an optional delay.
    struct SlowTransport {
        delay: Duration,
        body: &'static str,
        calls: Mutex<Vec<CheckInPayload>>,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, payload: &CheckInPayload) -> Result<TransportReply, TransportError> {
            self.calls.lock().unwrap().push(payload.clone());
            tokio::time::sleep(self.delay).await;
            Ok(TransportReply::ok(self.body))
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl CredentialValidator for AcceptAll {
        async fn validate(&self, _key: &str) -> Verdict {
            Verdict::Valid
        }
    }

    fn controller(delay: Duration, body: &'static str) -> (LifecycleController, Arc<SlowTransport>) {
        let transport = Arc::new(SlowTransport {
            delay,
            body,
            calls: Mutex::new(Vec::new()),
        });
        let mut credential = Credential::new("dev-key");
        credential.mark(CredentialState::Valid);

        let pipeline = CheckInPipeline {
            registry: Arc::new(Registry::new()),
            scheduler: Arc::new(Mutex::new(Scheduler::new(CheckInConfig::default()))),
            reconciler: Arc::new(Mutex::new(ConfigReconciler::new(ConfigSnapshot::default()))),
            session: Arc::new(Mutex::new(Session {
                credential: Some(credential),
                ..Session::default()
            })),
            collaborators: Collaborators {
                transport: transport.clone(),
                location: Arc::new(NoLocation),
                validator: Arc::new(AcceptAll),
                identity: Arc::new(FixedIdentity("uuid".into())),
                clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
            },
            hub: Arc::new(ObserverHub::new()),
            store: Arc::new(MemoryStateStore::new()),
        };
        (
            LifecycleController::new(pipeline, Duration::from_secs(25)),
            transport,
        )
    }

    #[test]
    fn test_push_directive_parsing() {
        assert_eq!(
            PushDirective::parse(&json!({"command": "check_in"})),
            Some(PushDirective {
                upload_location: false
            })
        );
        assert_eq!(
            PushDirective::parse(&json!({"command": "check_in", "location": true})),
            Some(PushDirective {
                upload_location: true
            })
        );
        assert_eq!(PushDirective::parse(&json!({"command": "wipe"})), None);
        assert_eq!(PushDirective::parse(&json!({"alert": "hello"})), None);
        assert_eq!(PushDirective::parse(&json!("check_in")), None);
    }

    #[tokio::test]
    async fn test_pause_only_while_host_active() {
        let (controller, _) = controller(Duration::ZERO, "{}");

        controller.handle(LifecycleEvent::EnteredBackground).await;
        assert_eq!(controller.pause(), None);
        assert_eq!(
            lock(&controller.pipeline.scheduler).state(),
            CheckInState::Idle
        );

        controller.handle(LifecycleEvent::BecameActive).await;
        assert_eq!(controller.pause(), Some(CheckInState::Paused));

        // Backgrounding releases the pause.
        controller.handle(LifecycleEvent::EnteredBackground).await;
        assert_eq!(
            lock(&controller.pipeline.scheduler).state(),
            CheckInState::Idle
        );
    }

    #[tokio::test]
    async fn test_push_registered_stores_hex_token() {
        let (controller, _) = controller(Duration::ZERO, "{}");

        let result = controller
            .handle(LifecycleEvent::PushRegistered(vec![0xde, 0xad, 0xbe, 0xef]))
            .await;

        assert_eq!(result, None);
        assert_eq!(
            lock(&controller.pipeline.session).push_token.as_deref(),
            Some("deadbeef")
        );
    }

    #[tokio::test]
    async fn test_push_directive_forces_check_in() {
        let (controller, transport) = controller(Duration::ZERO, "{}");
        {
            // Not due by interval.
            let now = controller.pipeline.collaborators.clock.now();
            let mut scheduler = lock(&controller.pipeline.scheduler);
            let token = scheduler.tick(now).unwrap();
            scheduler
                .complete(
                    token,
                    checkin_core::RunOutcome {
                        success: true,
                        location_uploaded: false,
                        config_refreshed: true,
                    },
                    now,
                )
                .unwrap();
        }

        let ignored = controller
            .handle(LifecycleEvent::PushReceived(json!({"alert": "hi"})))
            .await;
        assert_eq!(ignored, Some(FetchResult::NoData));
        assert!(transport.calls.lock().unwrap().is_empty());

        let result = controller
            .handle(LifecycleEvent::PushReceived(
                json!({"command": "check_in", "location": true}),
            ))
            .await;
        assert_eq!(result, Some(FetchResult::NoData));
        assert_eq!(transport.calls.lock().unwrap().len(), 1);

        let scheduler = lock(&controller.pipeline.scheduler);
        assert!(!scheduler.config().force_next_check_in);
        assert!(!scheduler.config().force_next_location_upload);
    }

    #[tokio::test]
    async fn test_background_fetch_reports_new_data() {
        let (controller, _) = controller(
            Duration::ZERO,
            r#"{"config":{"revision":1,"values":{"checkInInterval":600}}}"#,
        );

        let result = controller.handle(LifecycleEvent::BackgroundFetch).await;
        assert_eq!(result, Some(FetchResult::NewData));

        // Nothing due right after a successful check-in.
        let result = controller.handle(LifecycleEvent::BackgroundFetch).await;
        assert_eq!(result, Some(FetchResult::NoData));
    }

    #[tokio::test]
    async fn test_background_fetch_requires_validated_credential() {
        let (controller, transport) = controller(Duration::ZERO, "{}");
        lock(&controller.pipeline.session).credential = None;

        let result = controller.handle(LifecycleEvent::BackgroundFetch).await;

        assert_eq!(result, Some(FetchResult::Failed));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_failed_without_cancelling_run() {
        let (controller, _) = controller(Duration::from_secs(60), "{}");

        let result = controller.handle(LifecycleEvent::BackgroundFetch).await;
        assert_eq!(result, Some(FetchResult::Failed));
        assert_eq!(
            lock(&controller.pipeline.scheduler).state(),
            CheckInState::Running
        );

        tokio::time::sleep(Duration::from_secs(120)).await;

        let scheduler = lock(&controller.pipeline.scheduler);
        assert_eq!(scheduler.state(), CheckInState::Idle);
        assert!(scheduler.last_check_in().is_some());
    }
}
