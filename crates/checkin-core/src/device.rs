//! # Custom Devices and Extensions
//!
//! Peripherals ("custom devices") and extension records that ride along in
//! every check-in report.
//!
//! ## Provider Evaluation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CustomDevice (shared, Arc)                                            │
//! │  ├── name / model / serial / battery   immutable after new()           │
//! │  └── RwLock ─► fields, images, plugin version   mutable                │
//! │                                                                         │
//! │  details() ──► calls battery() once, each field provider once          │
//! │            └─► DeviceDetails (plain data, never cached)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Providers run on whatever thread assembles the report, so they must be
//! `Send + Sync` and should return quickly. A provider that panics is
//! contained: its field is left out, a failed battery query reports
//! [`UNKNOWN_BATTERY_LEVEL`], and the name lands in
//! [`DeviceDetails::failed_providers`].

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validation::{validate_extension_id, validate_identity, ValidationResult};

/// Zero-argument battery level query (percent).
pub type BatteryProvider = Arc<dyn Fn() -> i32 + Send + Sync>;

/// Zero-argument custom field value query.
pub type FieldProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Battery level reported when the battery provider panics.
pub const UNKNOWN_BATTERY_LEVEL: i32 = -1;

/// Provider name recorded when the battery query fails.
pub const BATTERY_PROVIDER: &str = "battery";

fn evaluate<T>(provider: impl FnOnce() -> T) -> Option<T> {
    catch_unwind(AssertUnwindSafe(provider)).ok()
}

// =============================================================================
// Extension Record
// =============================================================================

/// A registered extension and its metadata.
///
/// Identity is the `identifier`; metadata may differ between two records with
/// the same identifier, but only the first one registered is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub identifier: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ExtensionRecord {
    /// Creates a record after validating the identifier.
    pub fn new(
        identifier: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> ValidationResult<Self> {
        let identifier = identifier.into();
        validate_extension_id(&identifier)?;
        Ok(Self {
            identifier,
            metadata,
        })
    }
}

// =============================================================================
// Plugin Version
// =============================================================================

/// Version triple reported for the plugin that drives a custom device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

// =============================================================================
// Custom Device
// =============================================================================

struct CustomField {
    title: String,
    provider: FieldProvider,
}

/// Image pair shown for a device on the remote portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceImages {
    pub image: Vec<u8>,
    pub thumbnail: Vec<u8>,
}

#[derive(Default)]
struct DeviceMutable {
    plugin_version: PluginVersion,
    fields: BTreeMap<String, CustomField>,
    images: Option<DeviceImages>,
}

/// A host-registered peripheral.
///
/// Registered into the [`Registry`](crate::registry::Registry) as an
/// `Arc<CustomDevice>`; registry identity is the `Arc` pointer.
pub struct CustomDevice {
    name: String,
    model: String,
    serial: String,
    battery: BatteryProvider,
    inner: RwLock<DeviceMutable>,
}

impl CustomDevice {
    /// Creates a device. Name, model and serial must be non-empty.
    ///
    /// ## Example
    /// ```rust
    /// use std::sync::Arc;
    /// use checkin_core::device::CustomDevice;
    ///
    /// let scanner = CustomDevice::new("Scanner", "LP-5", "SN-1", Arc::new(|| 87)).unwrap();
    /// assert_eq!(scanner.details().battery_level, 87);
    /// ```
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        serial: impl Into<String>,
        battery: BatteryProvider,
    ) -> ValidationResult<Self> {
        let (name, model, serial) = (name.into(), model.into(), serial.into());
        validate_identity("name", &name)?;
        validate_identity("model", &model)?;
        validate_identity("serial", &serial)?;

        Ok(Self {
            name,
            model,
            serial,
            battery,
            inner: RwLock::new(DeviceMutable::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Registers or replaces a custom field.
    ///
    /// `title` is the display name shown next to the value on the portal.
    pub fn set_field(
        &self,
        field: impl Into<String>,
        title: impl Into<String>,
        provider: FieldProvider,
    ) -> ValidationResult<()> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(ValidationError::required("field"));
        }
        self.write().fields.insert(
            field,
            CustomField {
                title: title.into(),
                provider,
            },
        );
        Ok(())
    }

    /// Removes a custom field. Returns false if it was not set.
    pub fn remove_field(&self, field: &str) -> bool {
        self.write().fields.remove(field).is_some()
    }

    pub fn set_images(&self, image: Vec<u8>, thumbnail: Vec<u8>) {
        self.write().images = Some(DeviceImages { image, thumbnail });
    }

    pub fn set_plugin_version(&self, major: u32, minor: u32, build: u32) {
        self.write().plugin_version = PluginVersion {
            major,
            minor,
            build,
        };
    }

    /// Evaluates every provider exactly once and returns the result.
    ///
    /// The field list is copied out of the lock before any provider runs, so
    /// a provider may itself touch this device without deadlocking.
    pub fn details(&self) -> DeviceDetails {
        let (plugin_version, fields, has_images) = {
            let inner = self.read();
            let fields: Vec<(String, String, FieldProvider)> = inner
                .fields
                .iter()
                .map(|(k, f)| (k.clone(), f.title.clone(), Arc::clone(&f.provider)))
                .collect();
            (inner.plugin_version, fields, inner.images.is_some())
        };

        let mut failed_providers = Vec::new();
        let battery_level = evaluate(|| (self.battery)()).unwrap_or_else(|| {
            failed_providers.push(BATTERY_PROVIDER.to_string());
            UNKNOWN_BATTERY_LEVEL
        });

        let mut values = BTreeMap::new();
        for (field, title, provider) in fields {
            match evaluate(|| provider()) {
                Some(value) => {
                    values.insert(field, FieldValue { title, value });
                }
                None => failed_providers.push(field),
            }
        }

        DeviceDetails {
            name: self.name.clone(),
            model: self.model.clone(),
            serial: self.serial.clone(),
            battery_level,
            plugin_version,
            fields: values,
            has_images,
            failed_providers,
        }
    }

    /// Plugin identity and version, without evaluating any provider.
    pub fn plugin_data(&self) -> PluginData {
        PluginData {
            name: self.name.clone(),
            model: self.model.clone(),
            version: self.read().plugin_version,
        }
    }

    /// Current image pair, if any.
    pub fn images(&self) -> Option<DeviceImages> {
        self.read().images.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceMutable> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceMutable> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for CustomDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDevice")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Evaluated Snapshots
// =============================================================================

/// One evaluated custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub title: String,
    pub value: String,
}

/// A custom device with all providers evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub name: String,
    pub model: String,
    pub serial: String,
    pub battery_level: i32,
    pub plugin_version: PluginVersion,
    pub fields: BTreeMap<String, FieldValue>,
    pub has_images: bool,
    /// Providers that panicked during evaluation. Not sent to the service.
    #[serde(skip)]
    pub failed_providers: Vec<String>,
}

/// Plugin identity reported for a custom device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginData {
    pub name: String,
    pub model: String,
    pub version: PluginVersion,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scanner() -> CustomDevice {
        CustomDevice::new("Scanner", "LP-5", "SN-1", Arc::new(|| 50)).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_identity() {
        let err = CustomDevice::new("", "m", "s", Arc::new(|| 0)).unwrap_err();
        assert_eq!(err, ValidationError::required("name"));
        assert!(CustomDevice::new("n", "m", " ", Arc::new(|| 0)).is_err());
    }

    #[test]
    fn test_details_evaluates_providers_once_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let device = scanner();
        device
            .set_field(
                "firmware",
                "Firmware",
                Arc::new(move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    format!("v{}", n)
                }),
            )
            .unwrap();

        let first = device.details();
        let second = device.details();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.fields["firmware"].value, "v1");
        assert_eq!(second.fields["firmware"].value, "v2");
        assert_eq!(first.fields["firmware"].title, "Firmware");
    }

    #[test]
    fn test_panicking_providers_are_contained() {
        let device = CustomDevice::new(
            "Printer",
            "TP-80",
            "SN-9",
            Arc::new(|| panic!("battery service gone")),
        )
        .unwrap();
        device
            .set_field("paper", "Paper", Arc::new(|| panic!("sensor fault")))
            .unwrap();
        device
            .set_field("firmware", "Firmware", Arc::new(|| "2.1".to_string()))
            .unwrap();

        let details = device.details();

        assert_eq!(details.battery_level, UNKNOWN_BATTERY_LEVEL);
        assert_eq!(details.fields.len(), 1);
        assert_eq!(details.fields["firmware"].value, "2.1");
        assert_eq!(
            details.failed_providers,
            vec![BATTERY_PROVIDER.to_string(), "paper".to_string()]
        );
        assert!(scanner().details().failed_providers.is_empty());
    }

    #[test]
    fn test_mutable_parts() {
        let device = scanner();
        device.set_plugin_version(1, 4, 22);
        device.set_images(vec![1, 2, 3], vec![1]);

        let details = device.details();
        assert_eq!(details.plugin_version.to_string(), "1.4.22");
        assert!(details.has_images);
        assert_eq!(device.plugin_data().version.minor, 4);
        assert!(!device.remove_field("missing"));
    }

    #[test]
    fn test_extension_record_requires_identifier() {
        assert!(ExtensionRecord::new("", BTreeMap::new()).is_err());
        let ext = ExtensionRecord::new("com.acme.loyalty", BTreeMap::new()).unwrap();
        assert_eq!(ext.identifier, "com.acme.loyalty");
    }
}
