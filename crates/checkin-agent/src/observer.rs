//! # Observer Hub
//!
//! Multi-subscriber fan-out of agent events to the host application.
//!
//! ## Delivery Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  notify(event)                                                         │
//! │     │                                                                   │
//! │     ├─ lock; upgrade Weak refs (prune dropped); unlock                 │
//! │     │                                                                   │
//! │     └─ for observer in subscription order:                             │
//! │           deliver ──► Ok        continue                               │
//! │                   ──► Err(e)    warn!, continue                        │
//! │                   ──► panic     caught, warn!, continue                │
//! │                                                                         │
//! │  The hub holds Weak references: it never keeps an observer alive.      │
//! │  Subscribe/unsubscribe during a pass only affects the next pass.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;
use tracing::{debug, warn};

use checkin_core::{ConfigReport, DeviceDetails};

use crate::error::AgentError;
use crate::pipeline::CheckInCompletion;

// =============================================================================
// Observer
// =============================================================================

/// Error an observer may return from a callback. Logged and dropped.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl From<&str> for ObserverError {
    fn from(msg: &str) -> Self {
        ObserverError(msg.to_string())
    }
}

impl From<String> for ObserverError {
    fn from(msg: String) -> Self {
        ObserverError(msg)
    }
}

pub type ObserverResult = Result<(), ObserverError>;

/// Receives agent events. Every callback is optional.
///
/// Callbacks run synchronously on the task that produced the event, so they
/// should hand heavy work off rather than block.
pub trait Observer: Send + Sync {
    /// Evaluated custom device details, once per check-in before sending.
    fn devices_info(&self, _devices: &[DeviceDetails]) -> ObserverResult {
        Ok(())
    }

    /// Result of developer key validation.
    fn company_id_status(&self, _success: bool, _error: Option<&AgentError>) -> ObserverResult {
        Ok(())
    }

    /// Human-readable status, e.g. why a check-in failed.
    fn status_message(&self, _message: &str) -> ObserverResult {
        Ok(())
    }

    /// Per-key outcomes of a remote config update.
    fn config_report(&self, _report: &ConfigReport) -> ObserverResult {
        Ok(())
    }

    /// Whether a device tag sent with a check-in was accepted.
    fn device_tag_status(&self, _success: bool, _error: Option<&AgentError>) -> ObserverResult {
        Ok(())
    }

    /// Terminal outcome of every check-in run.
    fn check_in_completed(&self, _completion: &CheckInCompletion) -> ObserverResult {
        Ok(())
    }
}

// =============================================================================
// Events
// =============================================================================

/// One notification, dispatched to the matching callback.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    DevicesInfo(Vec<DeviceDetails>),
    CompanyIdStatus {
        success: bool,
        error: Option<AgentError>,
    },
    StatusMessage(String),
    ConfigReport(ConfigReport),
    DeviceTagStatus {
        success: bool,
        error: Option<AgentError>,
    },
    CheckInCompleted(CheckInCompletion),
}

impl ObserverEvent {
    fn callback_name(&self) -> &'static str {
        match self {
            ObserverEvent::DevicesInfo(_) => "devices_info",
            ObserverEvent::CompanyIdStatus { .. } => "company_id_status",
            ObserverEvent::StatusMessage(_) => "status_message",
            ObserverEvent::ConfigReport(_) => "config_report",
            ObserverEvent::DeviceTagStatus { .. } => "device_tag_status",
            ObserverEvent::CheckInCompleted(_) => "check_in_completed",
        }
    }

    fn deliver(&self, observer: &dyn Observer) -> ObserverResult {
        match self {
            ObserverEvent::DevicesInfo(devices) => observer.devices_info(devices),
            ObserverEvent::CompanyIdStatus { success, error } => {
                observer.company_id_status(*success, error.as_ref())
            }
            ObserverEvent::StatusMessage(msg) => observer.status_message(msg),
            ObserverEvent::ConfigReport(report) => observer.config_report(report),
            ObserverEvent::DeviceTagStatus { success, error } => {
                observer.device_tag_status(*success, error.as_ref())
            }
            ObserverEvent::CheckInCompleted(completion) => observer.check_in_completed(completion),
        }
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Ordered set of weakly held observers.
#[derive(Default)]
pub struct ObserverHub {
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an observer. Subscribing the same instance twice is a no-op.
    pub fn subscribe<O: Observer + 'static>(&self, observer: &Arc<O>) -> bool {
        let weak: Weak<O> = Arc::downgrade(observer);
        let weak: Weak<dyn Observer> = weak;
        let mut observers = self.lock();
        observers.retain(|w| w.strong_count() > 0);
        if observers.iter().any(|w| Weak::ptr_eq(w, &weak)) {
            return false;
        }
        observers.push(weak);
        debug!(subscribers = observers.len(), "Observer subscribed");
        true
    }

    /// Unsubscribes an observer. Unknown observers are ignored.
    pub fn unsubscribe<O: Observer + 'static>(&self, observer: &Arc<O>) -> bool {
        let weak: Weak<O> = Arc::downgrade(observer);
        let weak: Weak<dyn Observer> = weak;
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|w| w.strong_count() > 0 && !Weak::ptr_eq(w, &weak));
        observers.len() != before
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every live observer in subscription order.
    pub fn notify(&self, event: &ObserverEvent) {
        let targets: Vec<Arc<dyn Observer>> = {
            let mut observers = self.lock();
            observers.retain(|w| w.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        let callback = event.callback_name();
        for (index, observer) in targets.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| event.deliver(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(observer = index, callback, error = %e, "Observer callback failed");
                }
                Err(_) => {
                    warn!(observer = index, callback, "Observer callback panicked");
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<dyn Observer>>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
