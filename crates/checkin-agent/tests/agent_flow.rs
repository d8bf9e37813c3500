//! End-to-end check-in flows through the public agent surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use checkin_agent::{
    AgentConfig, AgentError, CheckInAgent, CheckInAgentBuilder, CheckInCompletion,
    CredentialValidator, FetchResult, FixedIdentity, LifecycleEvent, ManualClock,
    MemoryStateStore, Observer, ObserverResult, StateStore, Transport, TransportError,
    TransportReply, Verdict,
};
use checkin_core::payload::CheckInPayload;
use checkin_core::{
    CheckInState, ConfigOutcome, ConfigReport, CustomDevice, DeviceDetails, ExtensionRecord,
};
use checkin_db::{Database, DbConfig};

// =============================================================================
// Fakes
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Replays scripted replies, then answers `{}`.
struct FakeTransport {
    replies: Mutex<Vec<Result<TransportReply, TransportError>>>,
    sent: Mutex<Vec<CheckInPayload>>,
    delay: StdDuration,
}

impl FakeTransport {
    fn new(replies: Vec<Result<TransportReply, TransportError>>) -> Arc<Self> {
        Self::slow(replies, StdDuration::ZERO)
    }

    fn slow(replies: Vec<Result<TransportReply, TransportError>>, delay: StdDuration) -> Arc<Self> {
        Arc::new(FakeTransport {
            replies: Mutex::new(replies),
            sent: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn sent(&self) -> Vec<CheckInPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, payload: &CheckInPayload) -> Result<TransportReply, TransportError> {
        self.sent.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok(TransportReply::ok("{}"))
        } else {
            replies.remove(0)
        }
    }
}

struct AcceptKey;

#[async_trait]
impl CredentialValidator for AcceptKey {
    async fn validate(&self, _key: &str) -> Verdict {
        Verdict::Valid
    }
}

/// Records every callback as a short string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Observer for Recorder {
    fn devices_info(&self, devices: &[DeviceDetails]) -> ObserverResult {
        self.push(format!("devices_info:{}", devices.len()));
        Ok(())
    }

    fn company_id_status(&self, success: bool, _error: Option<&AgentError>) -> ObserverResult {
        self.push(format!("company_id_status:{}", success));
        Ok(())
    }

    fn status_message(&self, message: &str) -> ObserverResult {
        self.push(format!("status_message:{}", message));
        Ok(())
    }

    fn config_report(&self, report: &ConfigReport) -> ObserverResult {
        self.push(format!("config_report:{}", report.applied_count()));
        Ok(())
    }

    fn device_tag_status(&self, success: bool, _error: Option<&AgentError>) -> ObserverResult {
        self.push(format!("device_tag_status:{}", success));
        Ok(())
    }

    fn check_in_completed(&self, completion: &CheckInCompletion) -> ObserverResult {
        self.push(format!("check_in_completed:{}", completion.success));
        Ok(())
    }
}

/// Fails every callback it implements.
struct Broken;

impl Observer for Broken {
    fn check_in_completed(&self, _completion: &CheckInCompletion) -> ObserverResult {
        Err("observer is broken".into())
    }

    fn devices_info(&self, _devices: &[DeviceDetails]) -> ObserverResult {
        panic!("observer panicked");
    }
}

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap()
}

async fn agent_with(
    transport: Arc<FakeTransport>,
    clock: Arc<ManualClock>,
    store: Arc<dyn StateStore>,
) -> CheckInAgent {
    init_tracing();
    let agent = CheckInAgentBuilder::new(AgentConfig::default())
        .with_transport(transport)
        .with_validator(Arc::new(AcceptKey))
        .with_identity(Arc::new(FixedIdentity("device-uuid-1".into())))
        .with_clock(clock)
        .with_store(store)
        .build()
        .await
        .unwrap();
    agent.set_credential("developer-key").await.unwrap();
    agent
}

// =============================================================================
// Flows
// =============================================================================

#[tokio::test]
async fn test_full_check_in_flow() {
    let transport = FakeTransport::new(vec![Ok(TransportReply::ok(
        r#"{"config":{"revision":3,"values":{"checkInInterval":1800,"locationEnabled":"yes","banner":"hello"}}}"#,
    ))]);
    let clock = ManualClock::new(start_time());
    let recorder = Arc::new(Recorder::default());

    init_tracing();
    let agent = CheckInAgentBuilder::new(AgentConfig::default())
        .with_transport(transport.clone())
        .with_validator(Arc::new(AcceptKey))
        .with_identity(Arc::new(FixedIdentity("device-uuid-1".into())))
        .with_clock(clock.clone())
        .with_store(Arc::new(MemoryStateStore::new()))
        .build()
        .await
        .unwrap();
    agent.subscribe(&recorder);
    agent.set_credential("developer-key").await.unwrap();

    let battery_reads = Arc::new(AtomicUsize::new(0));
    let reads = battery_reads.clone();
    let scanner = Arc::new(
        CustomDevice::new(
            "Scanner",
            "SC-200",
            "SN-0042",
            Arc::new(move || {
                reads.fetch_add(1, Ordering::SeqCst);
                87
            }),
        )
        .unwrap(),
    );
    scanner
        .set_field("firmware", "Firmware", Arc::new(|| "4.1.0".to_string()))
        .unwrap();
    scanner.set_plugin_version(1, 2, 3);
    assert!(agent.add_custom_device(scanner.clone()));
    assert!(!agent.add_custom_device(scanner.clone()));

    let extension = ExtensionRecord::new(
        "com.example.payments",
        BTreeMap::from([("version".to_string(), "2.0".to_string())]),
    )
    .unwrap();
    assert!(agent.add_extension(extension));

    agent.set_device_tag("till-3").unwrap();
    agent
        .upload_transaction_receipt(BTreeMap::from([("total".to_string(), json!(12.5))]))
        .await
        .unwrap();
    agent
        .handle_lifecycle(LifecycleEvent::PushRegistered(vec![0x01, 0xab]))
        .await;

    let completion = agent.check_in().await.unwrap();
    assert!(completion.success);
    assert_eq!(completion.status, Some(200));

    // Payload contents
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let payload = &sent[0];
    assert_eq!(payload.device_uuid, "device-uuid-1");
    assert_eq!(payload.developer_key, "developer-key");
    assert_eq!(payload.extensions.len(), 1);
    assert_eq!(payload.devices.len(), 1);
    assert_eq!(payload.devices[0].battery_level, 87);
    assert_eq!(payload.devices[0].fields["firmware"].value, "4.1.0");
    assert_eq!(payload.device_tag.as_deref(), Some("till-3"));
    assert_eq!(payload.push_token.as_deref(), Some("01ab"));
    assert_eq!(payload.receipts.len(), 1);
    assert!(payload.location.is_none());
    assert_eq!(battery_reads.load(Ordering::SeqCst), 1);

    // Config reconciliation
    let report = completion.config_report.clone().unwrap();
    assert_eq!(report.outcomes["checkInInterval"], ConfigOutcome::Applied);
    assert_eq!(report.outcomes["banner"], ConfigOutcome::Applied);
    assert!(matches!(
        report.outcomes["locationEnabled"],
        ConfigOutcome::Rejected(_)
    ));
    assert_eq!(agent.check_in_interval(), 1800);
    assert!(!agent.check_in_config().location_enabled);
    assert_eq!(agent.config_snapshot().revision, Some(3));
    assert!(agent.config_snapshot().get("locationEnabled").is_none());

    // Notifications, in order
    assert_eq!(
        recorder.events(),
        vec![
            "company_id_status:true",
            "devices_info:1",
            "config_report:2",
            "device_tag_status:true",
            "check_in_completed:true",
        ]
    );

    // Tag and receipts were settled; providers run again on the next report.
    assert_eq!(agent.pending_device_tag(), None);
    agent.check_in().await.unwrap();
    let sent = transport.sent();
    assert_eq!(sent[1].device_tag, None);
    assert!(sent[1].receipts.is_empty());
    assert_eq!(battery_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_keeps_due_time_and_retries() {
    let transport = FakeTransport::new(vec![Err(TransportError("connection refused".into()))]);
    let clock = ManualClock::new(start_time());
    let recorder = Arc::new(Recorder::default());
    let agent = agent_with(
        transport.clone(),
        clock.clone(),
        Arc::new(MemoryStateStore::new()),
    )
    .await;
    agent.subscribe(&recorder);

    let result = agent
        .handle_lifecycle(LifecycleEvent::BackgroundFetch)
        .await;
    assert_eq!(result, Some(FetchResult::Failed));

    let events = recorder.events();
    assert_eq!(
        events[1],
        "status_message:Check-in failed: connection refused; retrying at the next scheduled check-in"
    );
    assert_eq!(events[2], "check_in_completed:false");

    // Same due time: the next evaluation retries.
    let result = agent
        .handle_lifecycle(LifecycleEvent::BackgroundFetch)
        .await;
    assert_eq!(result, Some(FetchResult::NoData));
    assert_eq!(transport.sent().len(), 2);

    // Now nothing is due until the interval passes.
    let result = agent
        .handle_lifecycle(LifecycleEvent::BackgroundFetch)
        .await;
    assert_eq!(result, Some(FetchResult::NoData));
    assert_eq!(transport.sent().len(), 2);

    clock.advance(Duration::seconds(3600));
    agent
        .handle_lifecycle(LifecycleEvent::BackgroundFetch)
        .await;
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test]
async fn test_broken_observer_does_not_block_others() {
    let transport = FakeTransport::new(vec![]);
    let clock = ManualClock::new(start_time());
    let agent = agent_with(transport, clock, Arc::new(MemoryStateStore::new())).await;

    let broken = Arc::new(Broken);
    let recorder = Arc::new(Recorder::default());
    agent.subscribe(&broken);
    agent.subscribe(&recorder);

    agent.check_in().await.unwrap();

    assert_eq!(
        recorder.events(),
        vec!["devices_info:0", "check_in_completed:true"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_check_ins_are_single_flight() {
    let transport = FakeTransport::slow(vec![], StdDuration::from_secs(5));
    let clock = ManualClock::new(start_time());
    let agent = agent_with(transport.clone(), clock, Arc::new(MemoryStateStore::new())).await;

    let (first, second) = tokio::join!(agent.check_in(), agent.check_in());

    assert!(first.unwrap().success);
    assert!(matches!(second, Err(AgentError::CheckInInProgress)));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(agent.state(), CheckInState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_timer_driver_checks_in_on_schedule() {
    let transport = FakeTransport::new(vec![]);
    let clock = ManualClock::new(start_time());
    let mut agent = agent_with(
        transport.clone(),
        clock.clone(),
        Arc::new(MemoryStateStore::new()),
    )
    .await;

    agent.start().unwrap();
    assert!(agent.is_started());

    // First evaluation: never checked in, so a run is due.
    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    assert_eq!(transport.sent().len(), 1);

    // Interval has not elapsed on the agent clock.
    tokio::time::sleep(StdDuration::from_secs(5)).await;
    assert_eq!(transport.sent().len(), 1);

    clock.advance(Duration::seconds(3600));
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(transport.sent().len(), 2);

    // Paused: the driver keeps ticking but nothing runs.
    assert_eq!(agent.pause(), Some(CheckInState::Paused));
    clock.advance(Duration::seconds(3600));
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(transport.sent().len(), 2);

    agent.resume();
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(transport.sent().len(), 3);

    agent.shutdown().await.unwrap();
    clock.advance(Duration::seconds(3600));
    tokio::time::sleep(StdDuration::from_secs(5)).await;
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.db");
    let clock = ManualClock::new(start_time());

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    let transport = FakeTransport::new(vec![Ok(TransportReply::ok(
        r#"{"config":{"revision":9,"values":{"configCheckInInterval":43200}}}"#,
    ))]);
    let agent = agent_with(transport, clock.clone(), Arc::new(db.clone())).await;
    agent.check_in().await.unwrap();
    drop(agent);
    db.close().await;

    let db = Database::new(DbConfig::new(&path)).await.unwrap();
    let transport = FakeTransport::new(vec![]);
    let mut agent = CheckInAgentBuilder::new(AgentConfig::default())
        .with_transport(transport.clone())
        .with_validator(Arc::new(AcceptKey))
        .with_identity(Arc::new(FixedIdentity("device-uuid-1".into())))
        .with_clock(clock.clone())
        .with_store(Arc::new(db.clone()))
        .build()
        .await
        .unwrap();

    assert_eq!(agent.config_snapshot().revision, Some(9));
    assert_eq!(agent.config_check_in_interval(), 43_200);

    // The key is not persisted, only its validity.
    assert!(!agent.is_validated());
    let saved = db.load_state().await.unwrap().unwrap();
    assert_eq!(saved.credential_valid, Some(true));
    assert_eq!(saved.last_check_in, Some(start_time()));

    // Saving again before the key is re-set keeps the stored verdict.
    assert_eq!(agent.credential_validity(), Some(true));
    agent.shutdown().await.unwrap();
    let saved = db.load_state().await.unwrap().unwrap();
    assert_eq!(saved.credential_valid, Some(true));

    // Restored timestamps keep the interval honest.
    agent.set_credential("developer-key").await.unwrap();
    let result = agent
        .handle_lifecycle(LifecycleEvent::BackgroundFetch)
        .await;
    assert_eq!(result, Some(FetchResult::NoData));
    assert!(transport.sent().is_empty());
    db.close().await;
}
