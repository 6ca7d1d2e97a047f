//! Device node

use super::{Configuration, Provenance, child, child_mut, read_string};
use common::{DeviceDescriptor, DriverKit, Error, Identifier, Result, check, device_id};
use record::DeviceRecord;
use tracing::debug;

/// Descriptor values and strings of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub manufacturer_name: String,
    pub product_name: String,
    /// `bcdDevice` rendered as `major.minor`
    pub version: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub dev_address: u8,
    pub bus_num: u8,
    pub bcd_usb: u16,
    pub bcd_device: u16,
    pub max_packet_size0: u8,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
    /// `bNumConfigurations` as reported by the descriptor
    pub num_configurations: u8,
}

/// A USB device and its configurations
#[derive(Debug)]
pub struct Device {
    device_id: u64,
    info: DeviceInfo,
    configs: Vec<Configuration>,
    provenance: Provenance,
}

impl Device {
    /// Query a device by native id and build its whole descriptor tree
    ///
    /// Any descriptor query failure aborts the build. String descriptors are
    /// best effort and left empty when unavailable.
    pub fn discover(kit: &dyn DriverKit, native_id: u64) -> Result<Self> {
        let (bus, address) = device_id::decode(device_id::from_native(native_id));
        let (Ok(bus_num), Ok(dev_address)) = (u8::try_from(bus), u8::try_from(address)) else {
            return Err(Error::InvalidDeviceId(native_id));
        };

        let desc = check(kit.device_descriptor(native_id), "get device descriptor")?;

        let info = DeviceInfo {
            name: Identifier::new(bus_num, dev_address).to_string(),
            serial: read_string(kit, native_id, desc.serial_number_index),
            manufacturer_name: read_string(kit, native_id, desc.manufacturer_index),
            product_name: read_string(kit, native_id, desc.product_index),
            version: format_bcd(desc.bcd_device),
            vendor_id: desc.vendor_id,
            product_id: desc.product_id,
            class: desc.device_class,
            sub_class: desc.device_sub_class,
            protocol: desc.device_protocol,
            dev_address,
            bus_num,
            bcd_usb: desc.bcd_usb,
            bcd_device: desc.bcd_device,
            max_packet_size0: desc.max_packet_size0,
            manufacturer_index: desc.manufacturer_index,
            product_index: desc.product_index,
            serial_index: desc.serial_number_index,
            num_configurations: desc.num_configurations,
        };

        let configs = (0..desc.num_configurations)
            .map(|index| Configuration::discover(kit, native_id, index))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Discovered device {} ({:04x}:{:04x}) with {} configuration(s)",
            info.name,
            info.vendor_id,
            info.product_id,
            configs.len()
        );

        Ok(Self {
            device_id: native_id,
            info,
            configs,
            provenance: Provenance::Discovered,
        })
    }

    pub fn new(native_id: u64, info: DeviceInfo, configs: Vec<Configuration>) -> Self {
        Self {
            device_id: native_id,
            info,
            configs,
            provenance: Provenance::Cached,
        }
    }

    /// Rebuild from an exported record
    pub fn from_record(record: &DeviceRecord) -> Result<Self> {
        let native_id = device_id::native_from_parts(record.bus_num as u16, record.dev_address as u16);

        let configs = record
            .configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let index = u8::try_from(index).map_err(|_| Error::IndexOutOfRange {
                    what: "config",
                    index,
                    len: u8::MAX as usize,
                })?;
                Configuration::from_record(native_id, index, config)
            })
            .collect::<Result<Vec<_>>>()?;

        let info = DeviceInfo {
            name: record.name.clone(),
            serial: record.serial.clone(),
            manufacturer_name: record.manufacturer_name.clone(),
            product_name: record.product_name.clone(),
            version: record.version.clone(),
            vendor_id: record.vendor_id,
            product_id: record.product_id,
            class: record.clazz,
            sub_class: record.sub_class,
            protocol: record.protocol,
            dev_address: record.dev_address,
            bus_num: record.bus_num,
            num_configurations: configs.len() as u8,
            ..Default::default()
        };

        Ok(Self::new(native_id, info, configs))
    }

    /// Export this device; cached devices export nothing
    pub fn to_record(&self) -> Option<DeviceRecord> {
        if !self.provenance.is_discovered() {
            return None;
        }
        let info = &self.info;
        Some(DeviceRecord {
            name: info.name.clone(),
            serial: info.serial.clone(),
            manufacturer_name: info.manufacturer_name.clone(),
            product_name: info.product_name.clone(),
            version: info.version.clone(),
            vendor_id: info.vendor_id,
            product_id: info.product_id,
            clazz: info.class,
            sub_class: info.sub_class,
            protocol: info.protocol,
            dev_address: info.dev_address,
            bus_num: info.bus_num,
            configs: self.configs.iter().filter_map(Configuration::to_record).collect(),
        })
    }

    /// Fetch a fresh device descriptor
    pub fn descriptor(&self, kit: &dyn DriverKit) -> Result<DeviceDescriptor> {
        check(kit.device_descriptor(self.device_id), "get device descriptor")
    }

    /// Driver-kit native id
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Caller-facing id with bus and device number in the upper half
    pub fn external_id(&self) -> u64 {
        device_id::from_native(self.device_id)
    }

    /// Stable `BBB-DDD` key
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.info.bus_num, self.info.dev_address)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut DeviceInfo {
        &mut self.info
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn serial(&self) -> &str {
        &self.info.serial
    }

    pub fn manufacturer_name(&self) -> &str {
        &self.info.manufacturer_name
    }

    pub fn product_name(&self) -> &str {
        &self.info.product_name
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn vendor_id(&self) -> u16 {
        self.info.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.info.product_id
    }

    pub fn class(&self) -> u8 {
        self.info.class
    }

    pub fn sub_class(&self) -> u8 {
        self.info.sub_class
    }

    pub fn protocol(&self) -> u8 {
        self.info.protocol
    }

    pub fn dev_address(&self) -> u8 {
        self.info.dev_address
    }

    pub fn bus_num(&self) -> u8 {
        self.info.bus_num
    }

    pub fn configs(&self) -> &[Configuration] {
        &self.configs
    }

    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    pub fn config_of(&self, index: usize) -> Result<&Configuration> {
        child(&self.configs, index, "config")
    }

    pub fn config_of_mut(&mut self, index: usize) -> Result<&mut Configuration> {
        child_mut(&mut self.configs, index, "config")
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.info.name = name.into();
    }

    pub fn set_serial(&mut self, serial: impl Into<String>) {
        self.info.serial = serial.into();
    }

    pub fn set_manufacturer_name(&mut self, name: impl Into<String>) {
        self.info.manufacturer_name = name.into();
    }

    pub fn set_product_name(&mut self, name: impl Into<String>) {
        self.info.product_name = name.into();
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.info.version = version.into();
    }

    pub fn set_vendor_id(&mut self, vendor_id: u16) {
        self.info.vendor_id = vendor_id;
    }

    pub fn set_product_id(&mut self, product_id: u16) {
        self.info.product_id = product_id;
    }

    pub fn set_class(&mut self, class: u8) {
        self.info.class = class;
    }

    pub fn set_sub_class(&mut self, sub_class: u8) {
        self.info.sub_class = sub_class;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.info.protocol = protocol;
    }

    /// Change the bus position; the identifier follows
    pub fn set_dev_address(&mut self, dev_address: u8) {
        self.info.dev_address = dev_address;
    }

    pub fn set_bus_num(&mut self, bus_num: u8) {
        self.info.bus_num = bus_num;
    }

    pub fn set_configs(&mut self, configs: Vec<Configuration>) {
        self.configs = configs;
    }
}

/// Render a BCD release number, e.g. 0x0210 -> "2.10"
fn format_bcd(bcd: u16) -> String {
    format!("{:x}.{:02x}", bcd >> 8, bcd & 0xFF)
}
