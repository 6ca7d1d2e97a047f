//! Test utilities for usb-topology
//!
//! Provides in-memory implementations of the driver-kit and event-transport
//! boundaries plus fixture builders for descriptor trees.
//!
//! # Example
//!
//! ```
//! use common::DriverKit;
//! use common::test_utils::{MockDriverKit, create_bulk_device, native_id};
//!
//! let kit = MockDriverKit::new();
//! kit.add_device(native_id(1, 2), create_bulk_device());
//! assert_eq!(kit.device_ids(128).unwrap(), vec![native_id(1, 2)]);
//! ```

use crate::ddk::{
    ConfigDescriptor, ControlSetup, DdkConfigDescriptor, DdkInterface, DdkInterfaceDescriptor,
    DeviceDescriptor, DriverKit, EndpointDescriptor, InterfaceDescriptor,
};
use crate::device_id;
use crate::error::{DdkStatus, EventStatus};
use crate::event::{
    EventTransport, Notification, Receiver, SubscriptionId, USB_DEVICE_ATTACHED,
    USB_DEVICE_DETACHED,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A scripted device served by [`MockDriverKit`]
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub descriptor: DeviceDescriptor,
    pub configs: Vec<DdkConfigDescriptor>,
    /// String descriptors by index
    pub strings: HashMap<u8, String>,
}

/// One recorded control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub handle: u64,
    pub setup: ControlSetup,
    pub timeout_ms: u32,
    /// Bytes written, or the buffer length for reads
    pub data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    init_calls: usize,
    release_calls: usize,
    devices: BTreeMap<u64, MockDevice>,
    /// handle -> (device id, interface index)
    claims: HashMap<u64, (u64, u8)>,
    next_handle: u64,
    settings: HashMap<u64, u8>,
    failures: HashMap<&'static str, DdkStatus>,
    control_calls: Vec<ControlCall>,
    read_payload: Vec<u8>,
    transfer_latency: Duration,
}

/// In-memory driver kit
///
/// Failures are injected per operation name (`"init"`, `"device_ids"`,
/// `"device_descriptor"`, `"config_descriptor"`, `"string_descriptor"`,
/// `"claim_interface"`,
/// `"release_interface"`, `"select_interface_setting"`,
/// `"current_interface_setting"`, `"control_read"`, `"control_write"`,
/// `"release"`) and persist until cleared.
#[derive(Default)]
pub struct MockDriverKit {
    state: Mutex<MockState>,
}

impl MockDriverKit {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_device(&self, native_id: u64, device: MockDevice) {
        self.lock().devices.insert(native_id, device);
    }

    pub fn remove_device(&self, native_id: u64) -> Option<MockDevice> {
        self.lock().devices.remove(&native_id)
    }

    /// Make `op` fail with `status` until [`MockDriverKit::clear_failure`]
    pub fn fail(&self, op: &'static str, status: DdkStatus) {
        self.lock().failures.insert(op, status);
    }

    pub fn clear_failure(&self, op: &'static str) {
        self.lock().failures.remove(op);
    }

    /// Bytes returned by control reads
    pub fn set_read_payload(&self, payload: Vec<u8>) {
        self.lock().read_payload = payload;
    }

    /// Simulated transfer duration; transfers slower than their timeout fail
    pub fn set_transfer_latency(&self, latency: Duration) {
        self.lock().transfer_latency = latency;
    }

    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    pub fn release_calls(&self) -> usize {
        self.lock().release_calls
    }

    pub fn active_claims(&self) -> usize {
        self.lock().claims.len()
    }

    pub fn is_claimed(&self, native_id: u64, interface_index: u8) -> bool {
        self.lock()
            .claims
            .values()
            .any(|&claim| claim == (native_id, interface_index))
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.lock().control_calls.clone()
    }

    fn check(state: &MockState, op: &'static str) -> Result<(), DdkStatus> {
        match state.failures.get(op) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn check_transfer(state: &MockState, handle: u64, timeout_ms: u32) -> Result<(), DdkStatus> {
        if !state.claims.contains_key(&handle) {
            return Err(DdkStatus::InvalidParameter);
        }
        if state.transfer_latency > Duration::from_millis(timeout_ms as u64) {
            return Err(DdkStatus::Timeout);
        }
        Ok(())
    }
}

impl DriverKit for MockDriverKit {
    fn init(&self) -> Result<(), DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "init")?;
        state.init_calls += 1;
        Ok(())
    }

    fn release(&self) -> Result<(), DdkStatus> {
        let mut state = self.lock();
        state.release_calls += 1;
        Self::check(&state, "release")?;
        state.claims.clear();
        Ok(())
    }

    fn device_ids(&self, max: usize) -> Result<Vec<u64>, DdkStatus> {
        let state = self.lock();
        Self::check(&state, "device_ids")?;
        Ok(state.devices.keys().copied().take(max).collect())
    }

    fn device_descriptor(&self, device_id: u64) -> Result<DeviceDescriptor, DdkStatus> {
        let state = self.lock();
        Self::check(&state, "device_descriptor")?;
        state
            .devices
            .get(&device_id)
            .map(|d| d.descriptor)
            .ok_or(DdkStatus::InvalidParameter)
    }

    fn config_descriptor(
        &self,
        device_id: u64,
        config_index: u8,
    ) -> Result<DdkConfigDescriptor, DdkStatus> {
        let state = self.lock();
        Self::check(&state, "config_descriptor")?;
        state
            .devices
            .get(&device_id)
            .and_then(|d| d.configs.get(config_index as usize))
            .cloned()
            .ok_or(DdkStatus::InvalidParameter)
    }

    fn string_descriptor(&self, device_id: u64, index: u8) -> Result<String, DdkStatus> {
        let state = self.lock();
        Self::check(&state, "string_descriptor")?;
        state
            .devices
            .get(&device_id)
            .and_then(|d| d.strings.get(&index))
            .cloned()
            .ok_or(DdkStatus::InvalidParameter)
    }

    fn claim_interface(&self, device_id: u64, interface_index: u8) -> Result<u64, DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "claim_interface")?;

        let device = state
            .devices
            .get(&device_id)
            .ok_or(DdkStatus::InvalidParameter)?;
        let has_interface = device.configs.iter().any(|c| {
            c.interfaces.iter().any(|i| {
                i.alt_settings
                    .first()
                    .is_some_and(|s| s.descriptor.interface_number == interface_index)
            })
        });
        if !has_interface {
            return Err(DdkStatus::InvalidParameter);
        }
        if state
            .claims
            .values()
            .any(|&claim| claim == (device_id, interface_index))
        {
            return Err(DdkStatus::DeviceBusy);
        }

        state.next_handle += 1;
        let handle = state.next_handle;
        state.claims.insert(handle, (device_id, interface_index));
        state.settings.insert(handle, 0);
        Ok(handle)
    }

    fn release_interface(&self, handle: u64) -> Result<(), DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "release_interface")?;
        state
            .claims
            .remove(&handle)
            .ok_or(DdkStatus::InvalidParameter)?;
        state.settings.remove(&handle);
        Ok(())
    }

    fn select_interface_setting(&self, handle: u64, setting: u8) -> Result<(), DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "select_interface_setting")?;
        if !state.claims.contains_key(&handle) {
            return Err(DdkStatus::InvalidParameter);
        }
        state.settings.insert(handle, setting);
        Ok(())
    }

    fn current_interface_setting(&self, handle: u64) -> Result<u8, DdkStatus> {
        let state = self.lock();
        Self::check(&state, "current_interface_setting")?;
        state
            .settings
            .get(&handle)
            .copied()
            .ok_or(DdkStatus::InvalidParameter)
    }

    fn control_read(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &mut [u8],
    ) -> Result<usize, DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "control_read")?;
        Self::check_transfer(&state, handle, timeout_ms)?;

        let count = state.read_payload.len().min(data.len());
        data[..count].copy_from_slice(&state.read_payload[..count]);
        state.control_calls.push(ControlCall {
            handle,
            setup: *setup,
            timeout_ms,
            data: vec![0; data.len()],
        });
        Ok(count)
    }

    fn control_write(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &[u8],
    ) -> Result<usize, DdkStatus> {
        let mut state = self.lock();
        Self::check(&state, "control_write")?;
        Self::check_transfer(&state, handle, timeout_ms)?;

        state.control_calls.push(ControlCall {
            handle,
            setup: *setup,
            timeout_ms,
            data: data.to_vec(),
        });
        Ok(data.len())
    }
}

#[derive(Default)]
struct TransportState {
    next_id: u64,
    subscriptions: HashMap<u64, (Vec<String>, Receiver)>,
    subscribe_calls: Vec<Vec<String>>,
    unsubscribe_calls: usize,
    subscribe_failure: Option<EventStatus>,
    unsubscribe_failure: Option<EventStatus>,
}

/// In-memory event transport
#[derive(Clone, Default)]
pub struct MockEventTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockEventTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_subscribe(&self, status: Option<EventStatus>) {
        self.lock().subscribe_failure = status;
    }

    pub fn fail_unsubscribe(&self, status: Option<EventStatus>) {
        self.lock().unsubscribe_failure = status;
    }

    /// Deliver a notification to every matching subscriber on this thread
    ///
    /// Returns the number of receivers invoked.
    pub fn emit(&self, notification: &Notification) -> usize {
        let receivers: Vec<Receiver> = self
            .lock()
            .subscriptions
            .values()
            .filter(|(events, _)| events.iter().any(|e| *e == notification.event))
            .map(|(_, receiver)| receiver.clone())
            .collect();

        for receiver in &receivers {
            receiver(notification);
        }
        receivers.len()
    }

    /// Deliver a notification from a separate thread, as a real transport does
    pub fn emit_from_thread(&self, notification: Notification) -> usize {
        let transport = self.clone();
        std::thread::spawn(move || transport.emit(&notification))
            .join()
            .unwrap_or(0)
    }

    /// Event lists of the currently active subscriptions
    pub fn active_subscriptions(&self) -> Vec<Vec<String>> {
        self.lock()
            .subscriptions
            .values()
            .map(|(events, _)| events.clone())
            .collect()
    }

    /// Event lists passed to every subscribe call, in call order
    pub fn subscribe_calls(&self) -> Vec<Vec<String>> {
        self.lock().subscribe_calls.clone()
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }
}

impl EventTransport for MockEventTransport {
    fn subscribe(
        &self,
        events: &[&str],
        receiver: Receiver,
    ) -> Result<SubscriptionId, EventStatus> {
        let mut state = self.lock();
        let events: Vec<String> = events.iter().map(|e| e.to_string()).collect();
        state.subscribe_calls.push(events.clone());

        if let Some(status) = state.subscribe_failure {
            return Err(status);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.subscriptions.insert(id, (events, receiver));
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventStatus> {
        let mut state = self.lock();
        state.unsubscribe_calls += 1;

        if let Some(status) = state.unsubscribe_failure {
            return Err(status);
        }

        state
            .subscriptions
            .remove(&id.0)
            .map(|_| ())
            .ok_or(EventStatus::InvalidParameter)
    }
}

/// Native id for a bus/address pair
pub fn native_id(bus: u8, address: u8) -> u64 {
    device_id::native_from_parts(bus as u16, address as u16)
}

/// Create an endpoint descriptor
pub fn endpoint(address: u8, attributes: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        attributes,
        max_packet_size,
        interval: 0,
        refresh: 0,
        synch_address: 0,
    }
}

/// Create one interface setting
pub fn interface(
    number: u8,
    alternate_setting: u8,
    class: u8,
    endpoints: Vec<EndpointDescriptor>,
) -> DdkInterfaceDescriptor {
    DdkInterfaceDescriptor {
        descriptor: InterfaceDescriptor {
            interface_number: number,
            alternate_setting,
            num_endpoints: endpoints.len() as u8,
            interface_class: class,
            interface_sub_class: 0,
            interface_protocol: 0,
            interface_index: 0,
        },
        endpoints,
        extra: Vec::new(),
    }
}

/// Create a configuration from interface groups (settings per interface number)
pub fn config(
    attributes: u8,
    max_power: u8,
    groups: Vec<Vec<DdkInterfaceDescriptor>>,
) -> DdkConfigDescriptor {
    DdkConfigDescriptor {
        descriptor: ConfigDescriptor {
            num_interfaces: groups.len() as u8,
            configuration_value: 1,
            configuration_index: 0,
            attributes,
            max_power,
        },
        interfaces: groups
            .into_iter()
            .map(|alt_settings| DdkInterface { alt_settings })
            .collect(),
    }
}

/// Create a mock device with one vendor-specific interface
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device;
///
/// let device = create_mock_device(0x1234, 0x5678);
/// assert_eq!(device.descriptor.vendor_id, 0x1234);
/// assert_eq!(device.configs.len(), 1);
/// ```
pub fn create_mock_device(vendor_id: u16, product_id: u16) -> MockDevice {
    let mut strings = HashMap::new();
    strings.insert(1, "Test Manufacturer".to_string());
    strings.insert(2, "Test Product".to_string());
    strings.insert(3, "SN000001".to_string());

    MockDevice {
        descriptor: DeviceDescriptor {
            length: 18,
            descriptor_type: 0x01,
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            max_packet_size0: 64,
            vendor_id,
            product_id,
            bcd_device: 0x0100,
            manufacturer_index: 1,
            product_index: 2,
            serial_number_index: 3,
            num_configurations: 1,
        },
        configs: vec![config(
            0x80,
            50,
            vec![vec![interface(0, 0, 0xFF, vec![endpoint(0x81, 0x02, 512)])]],
        )],
        strings,
    }
}

/// Create the reference bulk device
///
/// One configuration (attributes 0xA0, max power 50 units) with one interface
/// holding a bulk IN endpoint 0x81 and a bulk OUT endpoint 0x02.
pub fn create_bulk_device() -> MockDevice {
    let mut device = create_mock_device(0x0781, 0x5581);
    device.configs = vec![config(
        0xA0,
        50,
        vec![vec![interface(
            0,
            0,
            0x08,
            vec![endpoint(0x81, 0x02, 512), endpoint(0x02, 0x02, 512)],
        )]],
    )];
    device
}

/// Attach notification with the JSON payload a transport delivers
pub fn attach_notification(bus: u8, address: u8) -> Notification {
    Notification::new(
        USB_DEVICE_ATTACHED,
        format!(r#"{{"busNum":{},"devAddress":{}}}"#, bus, address),
    )
}

/// Detach notification with the JSON payload a transport delivers
pub fn detach_notification(bus: u8, address: u8) -> Notification {
    Notification::new(
        USB_DEVICE_DETACHED,
        format!(r#"{{"busNum":{},"devAddress":{}}}"#, bus, address),
    )
}

/// Timeout wrapper for async tests
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
