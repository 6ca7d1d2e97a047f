//! Device registry
//!
//! [`HostManager`] owns the driver-kit session and the registry of known
//! devices. The registry is shared between the caller and the transport's
//! notification thread and is guarded by a single mutex.

use crate::model::Device;
use common::{
    DriverKit, Error, Identifier, MAX_USB_DEVICE_NUM, Result, check, device_id,
};
use record::DeviceRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A registered device, shared with callers
pub type SharedDevice = Arc<Mutex<Device>>;

/// Registry of attached devices keyed by native device id
pub struct HostManager {
    kit: Arc<dyn DriverKit>,
    registry: Mutex<HashMap<u64, SharedDevice>>,
    initialized: Mutex<bool>,
    max_devices: usize,
}

impl HostManager {
    pub fn new(kit: Arc<dyn DriverKit>) -> Self {
        Self::with_max_devices(kit, MAX_USB_DEVICE_NUM)
    }

    /// Create a manager whose enumeration returns at most `max_devices` ids
    pub fn with_max_devices(kit: Arc<dyn DriverKit>, max_devices: usize) -> Self {
        Self {
            kit,
            registry: Mutex::new(HashMap::new()),
            initialized: Mutex::new(false),
            max_devices,
        }
    }

    /// Create a manager with an open driver-kit session
    ///
    /// The session is released when the manager is shut down or dropped.
    pub fn open(kit: Arc<dyn DriverKit>, max_devices: usize) -> Result<Self> {
        let manager = Self::with_max_devices(kit, max_devices);
        manager.initialize()?;
        Ok(manager)
    }

    /// Open the driver-kit session; calling again is a no-op
    pub fn initialize(&self) -> Result<()> {
        let mut initialized = lock(&self.initialized);
        if *initialized {
            debug!("Driver kit already initialized");
            return Ok(());
        }
        check(self.kit.init(), "initialize driver kit")?;
        *initialized = true;
        info!("Driver kit initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        *lock(&self.initialized)
    }

    /// Discover every attached device and add it to the registry
    ///
    /// The whole batch is built before the registry is touched, so a failed
    /// descriptor query leaves the registry unchanged. Devices already in the
    /// registry but no longer attached are kept; removal is driven by detach
    /// notifications. Returns the native ids that were discovered.
    pub fn enumerate(&self) -> Result<Vec<u64>> {
        let ids = check(self.kit.device_ids(self.max_devices), "enumerate devices")?;

        let devices = ids
            .iter()
            .map(|&id| Device::discover(self.kit.as_ref(), id))
            .collect::<Result<Vec<_>>>()?;

        let mut registry = lock(&self.registry);
        for device in devices {
            let id = device.device_id();
            debug!("Registered device {} ({:#x})", device.identifier(), id);
            registry.insert(id, Arc::new(Mutex::new(device)));
        }

        info!(
            "Enumerated {} device(s), {} registered",
            ids.len(),
            registry.len()
        );
        Ok(ids)
    }

    /// Registered device by native id
    pub fn device_of(&self, id: u64) -> Result<SharedDevice> {
        lock(&self.registry)
            .get(&id)
            .cloned()
            .ok_or(Error::DeviceNotFound(id))
    }

    /// Registered device by caller-facing id
    pub fn device_of_external(&self, external_id: u64) -> Result<SharedDevice> {
        self.device_of(device_id::to_native(external_id))
            .map_err(|_| Error::DeviceNotFound(external_id))
    }

    /// Registered device by identifier, if any
    ///
    /// Matches each device's current bus number and address. The registry
    /// lock is released before the devices are locked, so the caller must not
    /// hold the lock of a registered device.
    pub fn find_device(&self, identifier: &Identifier) -> Option<SharedDevice> {
        self.find_entry(identifier).map(|(_, device)| device)
    }

    fn find_entry(&self, identifier: &Identifier) -> Option<(u64, SharedDevice)> {
        self.devices()
            .into_iter()
            .find(|(_, device)| &lock(device).identifier() == identifier)
    }

    /// Insert a device, replacing any device registered under the same id
    pub fn add_device(&self, id: u64, device: Device) -> Option<SharedDevice> {
        debug!("Adding device {} ({:#x})", device.identifier(), id);
        lock(&self.registry).insert(id, Arc::new(Mutex::new(device)))
    }

    pub fn remove_device(&self, id: u64) -> Option<SharedDevice> {
        let removed = lock(&self.registry).remove(&id);
        if removed.is_some() {
            debug!("Removed device {:#x}", id);
        }
        removed
    }

    /// Remove the device registered under `identifier`; returns its native id
    pub fn remove_by_identifier(&self, identifier: &Identifier) -> Option<u64> {
        let (id, device) = self.find_entry(identifier)?;
        let mut registry = lock(&self.registry);
        // Another thread may have replaced the entry since the scan
        if !registry.get(&id).is_some_and(|current| Arc::ptr_eq(current, &device)) {
            return None;
        }
        registry.remove(&id);
        debug!("Removed device {} ({:#x})", identifier, id);
        Some(id)
    }

    /// Discover one newly attached device and register it
    pub fn handle_attached(&self, bus: u8, address: u8) -> Result<u64> {
        let id = device_id::native_from_parts(bus as u16, address as u16);
        let device = Device::discover(self.kit.as_ref(), id)?;
        info!(
            "Device attached: {} ({:04x}:{:04x})",
            device.identifier(),
            device.vendor_id(),
            device.product_id()
        );
        self.add_device(id, device);
        Ok(id)
    }

    /// Drop a detached device from the registry
    pub fn handle_detached(&self, identifier: &Identifier) -> Option<u64> {
        let removed = self.remove_by_identifier(identifier);
        match removed {
            Some(_) => info!("Device detached: {}", identifier),
            None => debug!("Detach for unknown device {}", identifier),
        }
        removed
    }

    /// Snapshot of the registry, sorted by native id
    pub fn devices(&self) -> Vec<(u64, SharedDevice)> {
        let mut devices: Vec<_> = lock(&self.registry)
            .iter()
            .map(|(&id, device)| (id, device.clone()))
            .collect();
        devices.sort_by_key(|(id, _)| *id);
        devices
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.registry).is_empty()
    }

    /// Records of every discovered device, sorted by native id
    ///
    /// Cached devices are skipped. The registry lock is not held while the
    /// individual devices are locked.
    pub fn export_records(&self) -> Vec<DeviceRecord> {
        self.devices()
            .into_iter()
            .filter_map(|(_, device)| lock(&device).to_record())
            .collect()
    }

    pub fn driver_kit(&self) -> &Arc<dyn DriverKit> {
        &self.kit
    }

    /// Clear the registry and close the driver-kit session
    ///
    /// Failures are logged, never returned.
    pub fn shutdown(&self) {
        lock(&self.registry).clear();

        let mut initialized = lock(&self.initialized);
        if !*initialized {
            return;
        }
        *initialized = false;
        match self.kit.release() {
            Ok(()) => info!("Driver kit released"),
            Err(status) => warn!("Failed to release driver kit: {}", status),
        }
    }
}

impl Drop for HostManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
