//! # Registry
//!
//! Mutable sets of registered extensions and custom devices.
//!
//! Mutation may happen from any thread while a check-in is in flight; the
//! pipeline only ever reads point-in-time snapshots, so a report is never
//! affected by a concurrent add/remove.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::{CustomDevice, ExtensionRecord};

/// Extension and custom-device registry.
#[derive(Debug, Default)]
pub struct Registry {
    extensions: RwLock<Vec<ExtensionRecord>>,
    devices: RwLock<Vec<Arc<CustomDevice>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an extension. Returns false if one with the same identifier is
    /// already registered (the call is then a no-op).
    pub fn add_extension(&self, extension: ExtensionRecord) -> bool {
        let mut extensions = write(&self.extensions);
        if extensions
            .iter()
            .any(|e| e.identifier == extension.identifier)
        {
            return false;
        }
        extensions.push(extension);
        true
    }

    /// Removes an extension by identifier. Returns false if absent.
    pub fn remove_extension(&self, identifier: &str) -> bool {
        let mut extensions = write(&self.extensions);
        let before = extensions.len();
        extensions.retain(|e| e.identifier != identifier);
        extensions.len() != before
    }

    /// Adds a device. Adding the same instance twice is a no-op.
    pub fn add_custom_device(&self, device: Arc<CustomDevice>) -> bool {
        let mut devices = write(&self.devices);
        if devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
            return false;
        }
        devices.push(device);
        true
    }

    /// Removes a device instance. Returns false if absent.
    pub fn remove_custom_device(&self, device: &Arc<CustomDevice>) -> bool {
        let mut devices = write(&self.devices);
        let before = devices.len();
        devices.retain(|d| !Arc::ptr_eq(d, device));
        devices.len() != before
    }

    /// Point-in-time copy of the registered extensions.
    pub fn snapshot_extensions(&self) -> Vec<ExtensionRecord> {
        read(&self.extensions).clone()
    }

    /// Point-in-time copy of the registered device handles.
    ///
    /// Device providers are not evaluated here; see
    /// [`CustomDevice::details`].
    pub fn snapshot_devices(&self) -> Vec<Arc<CustomDevice>> {
        read(&self.devices).clone()
    }

    pub fn extension_count(&self) -> usize {
        read(&self.extensions).len()
    }

    pub fn device_count(&self) -> usize {
        read(&self.devices).len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
