//! Driver-kit boundary
//!
//! The [`DriverKit`] trait is the opaque capability the topology model talks
//! to: bounded device enumeration, descriptor queries, interface claim and
//! release, alternate-setting selection and control transfers. Every call
//! returns a [`DdkStatus`] on failure; callers map it with [`crate::check`].
//!
//! Descriptor structs mirror the standard USB descriptor layouts with
//! host-native field types.

use crate::error::DdkStatus;

/// Standard device descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

/// Standard configuration descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    /// String index of the configuration name
    pub configuration_index: u8,
    pub attributes: u8,
    /// Maximum power in 2 mA units
    pub max_power: u8,
}

/// Standard interface descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    /// String index of the interface name
    pub interface_index: u8,
}

/// Standard endpoint descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    pub refresh: u8,
    pub synch_address: u8,
}

/// One interface setting with its endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdkInterfaceDescriptor {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Class-specific bytes following the interface descriptor
    pub extra: Vec<u8>,
}

/// All settings sharing one interface number, in descriptor order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdkInterface {
    pub alt_settings: Vec<DdkInterfaceDescriptor>,
}

/// A configuration descriptor with its interface groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdkConfigDescriptor {
    pub descriptor: ConfigDescriptor,
    pub interfaces: Vec<DdkInterface>,
}

/// Control transfer setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlSetup {
    /// Direction bit of `bmRequestType`
    pub const DIRECTION_IN: u8 = 0x80;

    pub fn new(request_type: u8, request: u8, value: u16, index: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length: 0,
        }
    }

    /// Vendor device-to-host request reading one byte
    pub fn vendor_read() -> Self {
        Self::new(0x80, 0x08, 0, 0).with_length(1)
    }

    /// Vendor host-to-device request without data stage
    pub fn vendor_write() -> Self {
        Self::new(0x00, 0x09, 1, 0)
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & Self::DIRECTION_IN != 0
    }
}

/// Transfer type encoded in endpoint attribute bits 0-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

/// Endpoint data direction encoded in address bit 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Direction::Out => 0x00,
            Direction::In => 0x80,
        }
    }
}

/// The native USB driver kit
///
/// Device ids are native ids (`bus << 32 | address`). Interface handles are
/// opaque numbers issued by [`DriverKit::claim_interface`].
pub trait DriverKit: Send + Sync {
    /// Open a session with the driver kit
    fn init(&self) -> Result<(), DdkStatus>;

    /// Close the session; invalidates outstanding handles
    fn release(&self) -> Result<(), DdkStatus>;

    /// Ids of currently attached devices, at most `max`
    fn device_ids(&self, max: usize) -> Result<Vec<u64>, DdkStatus>;

    fn device_descriptor(&self, device_id: u64) -> Result<DeviceDescriptor, DdkStatus>;

    fn config_descriptor(
        &self,
        device_id: u64,
        config_index: u8,
    ) -> Result<DdkConfigDescriptor, DdkStatus>;

    /// Read a string descriptor
    ///
    /// Kits that cannot read strings report `InvalidOperation`.
    fn string_descriptor(&self, _device_id: u64, _index: u8) -> Result<String, DdkStatus> {
        Err(DdkStatus::InvalidOperation)
    }

    /// Take exclusive use of an interface, returning a raw handle
    fn claim_interface(&self, device_id: u64, interface_index: u8) -> Result<u64, DdkStatus>;

    fn release_interface(&self, handle: u64) -> Result<(), DdkStatus>;

    fn select_interface_setting(&self, handle: u64, setting: u8) -> Result<(), DdkStatus>;

    fn current_interface_setting(&self, handle: u64) -> Result<u8, DdkStatus>;

    /// Device-to-host control transfer; returns the number of bytes read
    fn control_read(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &mut [u8],
    ) -> Result<usize, DdkStatus>;

    /// Host-to-device control transfer; returns the number of bytes written
    fn control_write(
        &self,
        handle: u64,
        setup: &ControlSetup,
        timeout_ms: u32,
        data: &[u8],
    ) -> Result<usize, DdkStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_kind_bits() {
        assert_eq!(TransferKind::from_attributes(0x00), TransferKind::Control);
        assert_eq!(TransferKind::from_attributes(0x01), TransferKind::Isochronous);
        assert_eq!(TransferKind::from_attributes(0x02), TransferKind::Bulk);
        assert_eq!(TransferKind::from_attributes(0x03), TransferKind::Interrupt);
        // upper bits (sync/usage type) are ignored
        assert_eq!(TransferKind::from_attributes(0x0D), TransferKind::Isochronous);
        assert_eq!(TransferKind::Bulk.as_raw(), 2);
    }

    #[test]
    fn test_direction_bits() {
        assert_eq!(Direction::from_address(0x81), Direction::In);
        assert_eq!(Direction::from_address(0x02), Direction::Out);
        assert_eq!(Direction::In.as_raw(), 0x80);
    }

    #[test]
    fn test_illustrative_setups() {
        let read = ControlSetup::vendor_read();
        assert!(read.is_device_to_host());
        assert_eq!((read.request, read.value, read.length), (0x08, 0, 1));

        let write = ControlSetup::vendor_write();
        assert!(!write.is_device_to_host());
        assert_eq!((write.request, write.value, write.length), (0x09, 1, 0));
    }
}
