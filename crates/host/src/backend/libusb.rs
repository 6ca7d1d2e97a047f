//! Driver kit over libusb

use common::{
    ConfigDescriptor, ControlSetup, DdkConfigDescriptor, DdkInterface, DdkInterfaceDescriptor,
    DdkStatus, DeviceDescriptor, DriverKit, EndpointDescriptor, InterfaceDescriptor, device_id,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Standard GET_INTERFACE request
const GET_INTERFACE_REQUEST_TYPE: u8 = 0x81;
const GET_INTERFACE: u8 = 0x0A;
const GET_INTERFACE_TIMEOUT: Duration = Duration::from_secs(1);

/// Map a libusb error onto the driver-kit status taxonomy
pub fn map_rusb_error(error: rusb::Error) -> DdkStatus {
    match error {
        rusb::Error::Timeout => DdkStatus::Timeout,
        rusb::Error::Pipe | rusb::Error::Io | rusb::Error::Overflow => DdkStatus::IoFailed,
        rusb::Error::NoDevice | rusb::Error::NotFound => DdkStatus::NotFound,
        rusb::Error::Busy => DdkStatus::DeviceBusy,
        rusb::Error::InvalidParam => DdkStatus::InvalidParameter,
        rusb::Error::Access => DdkStatus::NoPermission,
        rusb::Error::NoMem => DdkStatus::MemoryError,
        rusb::Error::NotSupported => DdkStatus::InvalidOperation,
        _ => DdkStatus::Failed,
    }
}

/// An open device handle holding one claimed interface
struct Claim {
    handle: DeviceHandle<Context>,
    device_id: u64,
    interface: u8,
    /// Kernel driver detached on claim, reattached on release
    kernel_driver_detached: bool,
}

/// [`DriverKit`] backed by a libusb context
///
/// Each claim has its own lock, so a blocking transfer only holds up other
/// operations on the same handle.
#[derive(Default)]
pub struct RusbDriverKit {
    context: Mutex<Option<Context>>,
    claims: Mutex<HashMap<u64, Arc<Mutex<Claim>>>>,
    next_handle: AtomicU64,
}

impl RusbDriverKit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Libusb context of the open session
    pub fn context(&self) -> Result<Context, DdkStatus> {
        lock(&self.context)
            .clone()
            .ok_or(DdkStatus::NotInitialized)
    }

    fn find_device(&self, device_id: u64) -> Result<Device<Context>, DdkStatus> {
        let devices = self.context()?.devices().map_err(map_rusb_error)?;
        devices
            .iter()
            .find(|d| native_id(d) == device_id)
            .ok_or(DdkStatus::NotFound)
    }

    fn claim(&self, handle: u64) -> Result<Arc<Mutex<Claim>>, DdkStatus> {
        lock(&self.claims)
            .get(&handle)
            .cloned()
            .ok_or(DdkStatus::InvalidParameter)
    }

    /// Run `f` on a claim without holding the claim table lock
    fn with_claim<T>(
        &self,
        handle: u64,
        f: impl FnOnce(&Claim) -> rusb::Result<T>,
    ) -> Result<T, DdkStatus> {
        let claim = self.claim(handle)?;
        let claim = lock(&claim);
        f(&claim).map_err(map_rusb_error)
    }
}

impl DriverKit for RusbDriverKit {
    fn init(&self) -> Result<(), DdkStatus> {
        let mut context = lock(&self.context);
        if context.is_none() {
            *context = Some(Context::new().map_err(map_rusb_error)?);
            info!("libusb context created");
        }
        Ok(())
    }

    fn release(&self) -> Result<(), DdkStatus> {
        let claims: Vec<_> = lock(&self.claims).drain().map(|(_, c)| c).collect();
        for claim in claims {
            release_claim(&lock(&claim));
        }
        if lock(&self.context).take().is_some() {
            info!("libusb context released");
        }
        Ok(())
    }

    fn device_ids(&self, max: usize) -> Result<Vec<u64>, DdkStatus> {
        let devices = self.context()?.devices().map_err(map_rusb_error)?;
        Ok(devices.iter().map(|d| native_id(&d)).take(max).collect())
    }

    fn device_descriptor(&self, device_id: u64) -> Result<DeviceDescriptor, DdkStatus> {
        let desc = self
            .find_device(device_id)?
            .device_descriptor()
            .map_err(map_rusb_error)?;

        Ok(DeviceDescriptor {
            length: 18,
            descriptor_type: 0x01,
            bcd_usb: bcd(desc.usb_version()),
            device_class: desc.class_code(),
            device_sub_class: desc.sub_class_code(),
            device_protocol: desc.protocol_code(),
            max_packet_size0: desc.max_packet_size(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            bcd_device: bcd(desc.device_version()),
            manufacturer_index: desc.manufacturer_string_index().unwrap_or(0),
            product_index: desc.product_string_index().unwrap_or(0),
            serial_number_index: desc.serial_number_string_index().unwrap_or(0),
            num_configurations: desc.num_configurations(),
        })
    }

    fn config_descriptor(
        &self,
        device_id: u64,
        config_index: u8,
    ) -> Result<DdkConfigDescriptor, DdkStatus> {
        let config = self
            .find_device(device_id)?
            .config_descriptor(config_index)
            .map_err(map_rusb_error)?;

        let interfaces = config
            .interfaces()
            .map(|interface| DdkInterface {
                alt_settings: interface
                    .descriptors()
                    .map(|setting| DdkInterfaceDescriptor {
                        descriptor: InterfaceDescriptor {
                            interface_number: setting.interface_number(),
                            alternate_setting: setting.setting_number(),
                            num_endpoints: setting.num_endpoints(),
                            interface_class: setting.class_code(),
                            interface_sub_class: setting.sub_class_code(),
                            interface_protocol: setting.protocol_code(),
                            interface_index: setting.description_string_index().unwrap_or(0),
                        },
                        endpoints: setting
                            .endpoint_descriptors()
                            .map(|ep| EndpointDescriptor {
                                address: ep.address(),
                                attributes: endpoint_attributes(
                                    ep.transfer_type(),
                                    ep.sync_type(),
                                    ep.usage_type(),
                                ),
                                max_packet_size: ep.max_packet_size(),
                                interval: ep.interval(),
                                refresh: ep.refresh(),
                                synch_address: ep.synch_address(),
                            })
                            .collect(),
                        extra: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        Ok(DdkConfigDescriptor {
            descriptor: ConfigDescriptor {
                num_interfaces: config.num_interfaces(),
                configuration_value: config.number(),
                configuration_index: config.description_string_index().unwrap_or(0),
                attributes: config_attributes(config.self_powered(), config.remote_wakeup()),
                max_power: u8::try_from(config.max_power() / 2).unwrap_or(u8::MAX),
            },
            interfaces,
        })
    }

    fn string_descriptor(&self, device_id: u64, index: u8) -> Result<String, DdkStatus> {
        let handle = self
            .find_device(device_id)?
            .open()
            .map_err(map_rusb_error)?;
        handle
            .read_string_descriptor_ascii(index)
            .map_err(map_rusb_error)
    }

    fn claim_interface(&self, device_id: u64, interface_index: u8) -> Result<u64, DdkStatus> {
        let handle = self
            .find_device(device_id)?
            .open()
            .map_err(map_rusb_error)?;

        let mut kernel_driver_detached = false;
        match handle.kernel_driver_active(interface_index) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on device {:#x}",
                    interface_index, device_id
                );
                match handle.detach_kernel_driver(interface_index) {
                    Ok(()) => kernel_driver_detached = true,
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface_index, e
                    ),
                }
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface_index, e
            ),
        }

        if let Err(e) = handle.claim_interface(interface_index) {
            if kernel_driver_detached {
                if let Err(e) = handle.attach_kernel_driver(interface_index) {
                    warn!(
                        "Failed to reattach kernel driver to interface {}: {}",
                        interface_index, e
                    );
                }
            }
            return Err(map_rusb_error(e));
        }

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.claims).insert(
            raw,
            Arc::new(Mutex::new(Claim {
                handle,
                device_id,
                interface: interface_index,
                kernel_driver_detached,
            })),
        );
        Ok(raw)
    }

    fn release_interface(&self, handle: u64) -> Result<(), DdkStatus> {
        // The claim stays registered until libusb lets go of the interface
        self.with_claim(handle, |claim| {
            claim.handle.release_interface(claim.interface)?;
            if claim.kernel_driver_detached {
                reattach_kernel_driver(claim);
            }
            Ok(())
        })?;
        lock(&self.claims).remove(&handle);
        Ok(())
    }

    fn select_interface_setting(&self, handle: u64, setting: u8) -> Result<(), DdkStatus> {
        self.with_claim(handle, |claim| {
            claim.handle.set_alternate_setting(claim.interface, setting)
        })
    }

    fn current_interface_setting(&self, handle: u64) -> Result<u8, DdkStatus> {
        self.with_claim(handle, |claim| {
            let mut setting = [0u8; 1];
            claim.handle.read_control(
                GET_INTERFACE_REQUEST_TYPE,
                GET_INTERFACE,
                0,
                claim.interface as u16,
                &mut setting,
                GET_INTERFACE_TIMEOUT,
            )?;
            Ok(setting[0])
        })
    }

    fn control_read(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &mut [u8],
    ) -> Result<usize, DdkStatus> {
        let timeout = transfer_timeout(timeout_ms)?;
        self.with_claim(handle, |claim| {
            claim.handle.read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
        })
    }

    fn control_write(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &[u8],
    ) -> Result<usize, DdkStatus> {
        let timeout = transfer_timeout(timeout_ms)?;
        self.with_claim(handle, |claim| {
            claim.handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
        })
    }
}

impl Drop for RusbDriverKit {
    fn drop(&mut self) {
        if let Err(status) = self.release() {
            warn!("Failed to release libusb session: {}", status);
        }
    }
}

fn release_claim(claim: &Claim) {
    if let Err(e) = claim.handle.release_interface(claim.interface) {
        warn!(
            "Failed to release interface {} on device {:#x}: {}",
            claim.interface, claim.device_id, e
        );
    }
    if claim.kernel_driver_detached {
        reattach_kernel_driver(claim);
    }
}

fn reattach_kernel_driver(claim: &Claim) {
    if let Err(e) = claim.handle.attach_kernel_driver(claim.interface) {
        debug!(
            "Could not reattach kernel driver to interface {}: {}",
            claim.interface, e
        );
    }
}

/// libusb waits forever on a zero timeout
fn transfer_timeout(timeout_ms: u32) -> Result<Duration, DdkStatus> {
    if timeout_ms == 0 {
        return Err(DdkStatus::InvalidParameter);
    }
    Ok(Duration::from_millis(timeout_ms as u64))
}

fn native_id<T: UsbContext>(device: &Device<T>) -> u64 {
    device_id::native_from_parts(device.bus_number() as u16, device.address() as u16)
}

/// Re-encode a decoded version as a BCD release number
fn bcd(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0F) << 4)
        | (version.sub_minor() as u16 & 0x0F)
}

/// Rebuild `bmAttributes`; bit 7 is reserved and always set
fn config_attributes(self_powered: bool, remote_wakeup: bool) -> u8 {
    let mut attributes = 0x80;
    if self_powered {
        attributes |= 0x40;
    }
    if remote_wakeup {
        attributes |= 0x20;
    }
    attributes
}

fn endpoint_attributes(
    transfer: rusb::TransferType,
    sync: rusb::SyncType,
    usage: rusb::UsageType,
) -> u8 {
    let transfer = match transfer {
        rusb::TransferType::Control => 0,
        rusb::TransferType::Isochronous => 1,
        rusb::TransferType::Bulk => 2,
        rusb::TransferType::Interrupt => 3,
    };
    let sync = match sync {
        rusb::SyncType::NoSync => 0,
        rusb::SyncType::Asynchronous => 1,
        rusb::SyncType::Adaptive => 2,
        rusb::SyncType::Synchronous => 3,
    };
    let usage = match usage {
        rusb::UsageType::Data => 0,
        rusb::UsageType::Feedback => 1,
        rusb::UsageType::FeedbackData => 2,
        rusb::UsageType::Reserved => 3,
    };
    transfer | (sync << 2) | (usage << 4)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), DdkStatus::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Busy), DdkStatus::DeviceBusy);
        assert_eq!(map_rusb_error(rusb::Error::Access), DdkStatus::NoPermission);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), DdkStatus::IoFailed);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), DdkStatus::NotFound);
        assert_eq!(map_rusb_error(rusb::Error::Other), DdkStatus::Failed);
    }

    #[test]
    fn test_bcd_reencoding() {
        assert_eq!(bcd(rusb::Version::from_bcd(0x0210)), 0x0210);
        assert_eq!(bcd(rusb::Version::from_bcd(0x0100)), 0x0100);
        assert_eq!(bcd(rusb::Version::from_bcd(0x1234)), 0x1234);
    }

    #[test]
    fn test_config_attributes() {
        assert_eq!(config_attributes(false, false), 0x80);
        assert_eq!(config_attributes(true, true), 0xE0);
    }

    #[test]
    fn test_endpoint_attributes() {
        assert_eq!(
            endpoint_attributes(
                rusb::TransferType::Bulk,
                rusb::SyncType::NoSync,
                rusb::UsageType::Data
            ),
            0x02
        );
        assert_eq!(
            endpoint_attributes(
                rusb::TransferType::Isochronous,
                rusb::SyncType::Asynchronous,
                rusb::UsageType::Feedback
            ),
            0x15
        );
    }

    #[test]
    fn test_zero_timeout_refused() {
        assert_eq!(transfer_timeout(0), Err(DdkStatus::InvalidParameter));
        assert_eq!(transfer_timeout(1), Ok(Duration::from_millis(1)));

        let kit = RusbDriverKit::new();
        let mut buf = [0u8; 1];
        assert_eq!(
            kit.control_read(1, &ControlSetup::vendor_read(), 0, &mut buf),
            Err(DdkStatus::InvalidParameter)
        );
    }

    #[test]
    fn test_uninitialized_kit() {
        let kit = RusbDriverKit::new();
        assert_eq!(kit.device_ids(8), Err(DdkStatus::NotInitialized));
        assert_eq!(
            kit.release_interface(1),
            Err(DdkStatus::InvalidParameter)
        );
    }
}
