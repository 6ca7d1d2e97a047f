//! Configuration node

use super::{Interface, Provenance, child, child_mut, read_string};
use common::{DdkConfigDescriptor, DriverKit, Error, Result, check};
use record::{ConfigRecord, RecordError};

const SELF_POWERED: u8 = 0x80;
const REMOTE_WAKEUP: u8 = 0x20;

/// A USB configuration
#[derive(Debug)]
pub struct Configuration {
    device_id: u64,
    config_index: u8,
    id: u8,
    attributes: u8,
    /// Raw `bMaxPower`, 2 mA units
    max_power_units: u8,
    name: String,
    string_index: u8,
    interfaces: Vec<Interface>,
    alt_settings: Vec<Interface>,
    provenance: Provenance,
}

impl Configuration {
    /// Query configuration `config_index` of a device and build its interfaces
    ///
    /// The first setting of every interface becomes a primary interface; the
    /// remaining settings are kept as alternate-setting interfaces.
    pub fn discover(kit: &dyn DriverKit, device_id: u64, config_index: u8) -> Result<Self> {
        let config = check(
            kit.config_descriptor(device_id, config_index),
            "get config descriptor",
        )?;
        let desc = &config.descriptor;

        let group_count = config.interfaces.len();
        let mut interfaces = Vec::with_capacity(desc.num_interfaces as usize);
        let mut alt_settings = Vec::new();

        for i in 0..desc.num_interfaces as usize {
            let group = config.interfaces.get(i).ok_or(Error::IndexOutOfRange {
                what: "interface",
                index: i,
                len: group_count,
            })?;
            let Some((primary, alternates)) = group.alt_settings.split_first() else {
                return Err(Error::IndexOutOfRange {
                    what: "alternate setting",
                    index: 0,
                    len: 0,
                });
            };

            interfaces.push(Interface::discover(kit, device_id, primary));
            alt_settings.extend(
                alternates
                    .iter()
                    .map(|setting| Interface::attach(kit, device_id, setting)),
            );
        }

        Ok(Self {
            device_id,
            config_index,
            id: desc.configuration_value,
            attributes: desc.attributes,
            max_power_units: desc.max_power,
            name: read_string(kit, device_id, desc.configuration_index),
            string_index: desc.configuration_index,
            interfaces,
            alt_settings,
            provenance: Provenance::Discovered,
        })
    }

    /// Build from known values; `max_power_units` is in 2 mA units
    pub fn new(
        device_id: u64,
        config_index: u8,
        id: u8,
        attributes: u8,
        name: impl Into<String>,
        max_power_units: u8,
        interfaces: Vec<Interface>,
    ) -> Self {
        Self {
            device_id,
            config_index,
            id,
            attributes,
            max_power_units,
            name: name.into(),
            string_index: 0,
            interfaces,
            alt_settings: Vec::new(),
            provenance: Provenance::Cached,
        }
    }

    /// Rebuild from an exported record
    ///
    /// The record holds max power in mA. Descriptors count in 2 mA units, so
    /// odd values and values above 510 mA cannot be represented.
    pub fn from_record(device_id: u64, config_index: u8, record: &ConfigRecord) -> Result<Self> {
        let invalid = || RecordError::InvalidField {
            field: "maxPower",
            value: record.max_power as u64,
        };
        if record.max_power % 2 != 0 {
            return Err(invalid().into());
        }
        let max_power_units = u8::try_from(record.max_power / 2).map_err(|_| invalid())?;

        let interfaces = record
            .interfaces
            .iter()
            .map(|i| Interface::from_record(device_id, i))
            .collect();
        let mut config = Self::new(
            device_id,
            config_index,
            record.id,
            record.attributes,
            record.name.clone(),
            max_power_units,
            interfaces,
        );
        config.alt_settings = record
            .alt_settings
            .iter()
            .map(|i| Interface::from_record(device_id, i))
            .collect();
        Ok(config)
    }

    /// Export this configuration; cached configurations export nothing
    ///
    /// Derived power flags are not stored, they follow from `attributes`.
    pub fn to_record(&self) -> Option<ConfigRecord> {
        if !self.provenance.is_discovered() {
            return None;
        }
        Some(ConfigRecord {
            id: self.id,
            attributes: self.attributes,
            max_power: self.max_power(),
            name: self.name.clone(),
            interfaces: self.interfaces.iter().filter_map(Interface::to_record).collect(),
            alt_settings: self
                .alt_settings
                .iter()
                .filter_map(Interface::to_record)
                .collect(),
        })
    }

    /// Fetch a fresh configuration descriptor for this node
    pub fn descriptor(&self, kit: &dyn DriverKit) -> Result<DdkConfigDescriptor> {
        check(
            kit.config_descriptor(self.device_id, self.config_index),
            "get config descriptor",
        )
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Position of this configuration in the device's descriptor list
    pub fn config_index(&self) -> u8 {
        self.config_index
    }

    /// `bConfigurationValue`
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    /// Maximum power draw in mA
    pub fn max_power(&self) -> u16 {
        self.max_power_units as u16 * 2
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `iConfiguration` string index
    pub fn string_index(&self) -> u8 {
        self.string_index
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_self_powered(&self) -> bool {
        self.attributes & SELF_POWERED != 0
    }

    pub fn is_remote_wakeup(&self) -> bool {
        self.attributes & REMOTE_WAKEUP != 0
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn interface_of(&self, index: usize) -> Result<&Interface> {
        child(&self.interfaces, index, "interface")
    }

    pub fn interface_of_mut(&mut self, index: usize) -> Result<&mut Interface> {
        child_mut(&mut self.interfaces, index, "interface")
    }

    pub fn alt_settings(&self) -> &[Interface] {
        &self.alt_settings
    }

    pub fn alt_setting_of(&self, index: usize) -> Result<&Interface> {
        child(&self.alt_settings, index, "alternate setting")
    }

    pub fn set_id(&mut self, id: u8) {
        self.id = id;
    }

    pub fn set_attributes(&mut self, attributes: u8) {
        self.attributes = attributes;
    }

    /// Set the maximum power from a value in 2 mA units
    pub fn set_max_power_units(&mut self, units: u8) {
        self.max_power_units = units;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_interfaces(&mut self, interfaces: Vec<Interface>) {
        self.interfaces = interfaces;
    }

    pub fn set_alt_settings(&mut self, alt_settings: Vec<Interface>) {
        self.alt_settings = alt_settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        MockDriverKit, MockDevice, config, create_bulk_device, interface, native_id,
    };

    fn kit_with(device: MockDevice) -> MockDriverKit {
        let kit = MockDriverKit::new();
        kit.add_device(native_id(1, 2), device);
        kit
    }

    #[test]
    fn test_power_attributes() {
        let kit = kit_with(create_bulk_device());
        let config = Configuration::discover(&kit, native_id(1, 2), 0).unwrap();

        assert!(config.is_self_powered());
        assert!(config.is_remote_wakeup());
        assert_eq!(config.max_power(), 100);
        assert_eq!(config.interface_count(), 1);
    }

    #[test]
    fn test_alternate_settings_split() {
        let mut device = create_bulk_device();
        device.configs = vec![config(
            0x80,
            10,
            vec![
                vec![interface(0, 0, 0x0E, vec![]), interface(0, 1, 0x0E, vec![])],
                vec![interface(1, 0, 0x0E, vec![])],
            ],
        )];
        let kit = kit_with(device);
        let config = Configuration::discover(&kit, native_id(1, 2), 0).unwrap();

        assert_eq!(config.interface_count(), 2);
        assert_eq!(config.alt_settings().len(), 1);
        assert!(config.alt_setting_of(0).unwrap().is_alternate_setting());
        assert_eq!(config.alt_setting_of(0).unwrap().alternate_setting(), 1);
        assert!(!config.interface_of(1).unwrap().is_alternate_setting());
    }

    #[test]
    fn test_missing_interface_group() {
        let mut device = create_bulk_device();
        device.configs[0].descriptor.num_interfaces = 2;
        let kit = kit_with(device);

        let err = Configuration::discover(&kit, native_id(1, 2), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfRange {
                what: "interface",
                index: 1,
                len: 1
            }
        ));
    }

    #[test]
    fn test_transport_error_propagates() {
        let kit = kit_with(create_bulk_device());
        kit.fail("config_descriptor", common::DdkStatus::IoFailed);
        let err = Configuration::discover(&kit, native_id(1, 2), 0).unwrap_err();
        assert_eq!(err.status(), Some(common::DdkStatus::IoFailed));
    }

    #[test]
    fn test_from_record_rejects_unrepresentable_power() {
        let record = ConfigRecord {
            id: 1,
            attributes: 0x80,
            max_power: 600,
            name: String::new(),
            interfaces: Vec::new(),
            alt_settings: Vec::new(),
        };
        assert!(matches!(
            Configuration::from_record(native_id(1, 2), 0, &record),
            Err(Error::Record(RecordError::InvalidField { .. }))
        ));
    }

    #[test]
    fn test_from_record_rejects_odd_power() {
        let mut record = ConfigRecord {
            id: 1,
            attributes: 0x80,
            max_power: 101,
            name: String::new(),
            interfaces: Vec::new(),
            alt_settings: Vec::new(),
        };
        assert!(matches!(
            Configuration::from_record(native_id(1, 2), 0, &record),
            Err(Error::Record(RecordError::InvalidField { field: "maxPower", value: 101 }))
        ));

        record.max_power = 510;
        let config = Configuration::from_record(native_id(1, 2), 0, &record).unwrap();
        assert_eq!(config.max_power(), 510);
    }

    #[test]
    fn test_cached_config_exports_nothing() {
        let config = Configuration::new(native_id(1, 2), 0, 1, 0xA0, "", 50, Vec::new());
        assert_eq!(config.max_power(), 100);
        assert!(config.to_record().is_none());
    }
}
