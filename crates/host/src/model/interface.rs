//! Interface node and its claim

use super::{Endpoint, Provenance, child};
use crate::handle::InterfaceHandle;
use common::{ControlSetup, DdkInterfaceDescriptor, DriverKit, Error, InterfaceDescriptor, Result};
use record::InterfaceRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Descriptor values of an interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub id: u8,
    pub protocol: u8,
    pub class: u8,
    pub sub_class: u8,
    pub alternate_setting: u8,
    pub name: String,
    /// `iInterface` string index
    pub string_index: u8,
}

/// A USB interface setting
///
/// Holds at most one live [`InterfaceHandle`]. Alternate settings keep their
/// raw descriptor and report [`Interface::is_alternate_setting`].
#[derive(Debug)]
pub struct Interface {
    device_id: u64,
    info: InterfaceInfo,
    endpoints: Vec<Endpoint>,
    handle: Option<InterfaceHandle>,
    alt_descriptor: Option<DdkInterfaceDescriptor>,
    provenance: Provenance,
}

impl Interface {
    /// Build the active setting from a live descriptor
    pub fn discover(
        kit: &dyn DriverKit,
        device_id: u64,
        descriptor: &DdkInterfaceDescriptor,
    ) -> Self {
        let desc = &descriptor.descriptor;
        Self {
            device_id,
            info: info_from(kit, device_id, desc),
            endpoints: descriptor
                .endpoints
                .iter()
                .map(|ep| Endpoint::from_descriptor(ep, desc.interface_number))
                .collect(),
            handle: None,
            alt_descriptor: None,
            provenance: Provenance::Discovered,
        }
    }

    /// Build an alternate setting, keeping its raw descriptor
    pub fn attach(
        kit: &dyn DriverKit,
        device_id: u64,
        descriptor: &DdkInterfaceDescriptor,
    ) -> Self {
        let mut interface = Self::discover(kit, device_id, descriptor);
        interface.alt_descriptor = Some(descriptor.clone());
        interface
    }

    pub fn new(device_id: u64, info: InterfaceInfo, endpoints: Vec<Endpoint>) -> Self {
        Self {
            device_id,
            info,
            endpoints,
            handle: None,
            alt_descriptor: None,
            provenance: Provenance::Cached,
        }
    }

    pub fn from_record(device_id: u64, record: &InterfaceRecord) -> Self {
        let info = InterfaceInfo {
            id: record.id,
            protocol: record.protocol,
            class: record.clazz,
            sub_class: record.sub_class,
            alternate_setting: record.alternate_setting,
            name: record.name.clone(),
            string_index: 0,
        };
        let endpoints = record.endpoints.iter().map(Endpoint::from_record).collect();
        Self::new(device_id, info, endpoints)
    }

    /// Export this interface; cached interfaces export nothing
    pub fn to_record(&self) -> Option<InterfaceRecord> {
        if !self.provenance.is_discovered() {
            return None;
        }
        Some(InterfaceRecord {
            id: self.info.id,
            protocol: self.info.protocol,
            clazz: self.info.class,
            sub_class: self.info.sub_class,
            alternate_setting: self.info.alternate_setting,
            name: self.info.name.clone(),
            endpoints: self.endpoints.iter().filter_map(Endpoint::to_record).collect(),
        })
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn info(&self) -> &InterfaceInfo {
        &self.info
    }

    pub fn id(&self) -> u8 {
        self.info.id
    }

    pub fn protocol(&self) -> u8 {
        self.info.protocol
    }

    pub fn class(&self) -> u8 {
        self.info.class
    }

    pub fn sub_class(&self) -> u8 {
        self.info.sub_class
    }

    pub fn alternate_setting(&self) -> u8 {
        self.info.alternate_setting
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn string_index(&self) -> u8 {
        self.info.string_index
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_alternate_setting(&self) -> bool {
        self.alt_descriptor.is_some()
    }

    /// Raw descriptor of an alternate setting
    pub fn alt_descriptor(&self) -> Option<&DdkInterfaceDescriptor> {
        self.alt_descriptor.as_ref()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoint_of(&self, index: usize) -> Result<&Endpoint> {
        child(&self.endpoints, index, "endpoint")
    }

    pub fn set_id(&mut self, id: u8) {
        self.info.id = id;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.info.protocol = protocol;
    }

    pub fn set_class(&mut self, class: u8) {
        self.info.class = class;
    }

    pub fn set_sub_class(&mut self, sub_class: u8) {
        self.info.sub_class = sub_class;
    }

    pub fn set_alternate_setting(&mut self, alternate_setting: u8) {
        self.info.alternate_setting = alternate_setting;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.info.name = name.into();
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        self.endpoints = endpoints;
    }

    pub fn is_claimed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&InterfaceHandle> {
        self.handle.as_ref()
    }

    /// Claim this interface
    ///
    /// Fails with [`Error::AlreadyClaimed`] while a handle is held, and with
    /// the driver kit's busy status when another owner holds the interface.
    pub fn claim(&mut self, kit: &Arc<dyn DriverKit>) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyClaimed {
                device_id: self.device_id,
                interface: self.info.id,
            });
        }
        self.handle = Some(InterfaceHandle::claim(
            kit.clone(),
            self.device_id,
            self.info.id,
        )?);
        Ok(())
    }

    /// Release the claim, if any
    ///
    /// Releasing an unclaimed interface succeeds without touching the driver
    /// kit, so cleanup after a failed claim is always safe. If the driver kit
    /// refuses the release the interface stays claimed.
    pub fn release(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => {
                handle.release()?;
                self.handle = None;
                Ok(())
            }
            None => {
                debug!(
                    "Interface {} on device {:#x} not claimed, nothing to release",
                    self.info.id, self.device_id
                );
                Ok(())
            }
        }
    }

    pub fn select_alternate_setting(&self, setting: u8) -> Result<()> {
        self.claimed()?.select_alternate_setting(setting)
    }

    pub fn current_alternate_setting(&self) -> Result<u8> {
        self.claimed()?.current_alternate_setting()
    }

    pub fn control_read(
        &self,
        setup: ControlSetup,
        timeout: Duration,
        data: &mut [u8],
    ) -> Result<usize> {
        self.claimed()?.control_read(setup, timeout, data)
    }

    pub fn control_write(
        &self,
        setup: ControlSetup,
        timeout: Duration,
        data: &[u8],
    ) -> Result<usize> {
        self.claimed()?.control_write(setup, timeout, data)
    }

    fn claimed(&self) -> Result<&InterfaceHandle> {
        self.handle.as_ref().ok_or(Error::NotClaimed {
            device_id: self.device_id,
            interface: self.info.id,
        })
    }
}

fn info_from(kit: &dyn DriverKit, device_id: u64, desc: &InterfaceDescriptor) -> InterfaceInfo {
    InterfaceInfo {
        id: desc.interface_number,
        protocol: desc.interface_protocol,
        class: desc.interface_class,
        sub_class: desc.interface_sub_class,
        alternate_setting: desc.alternate_setting,
        name: super::read_string(kit, device_id, desc.interface_index),
        string_index: desc.interface_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockDriverKit, create_bulk_device, endpoint, interface, native_id};

    fn kit() -> Arc<dyn DriverKit> {
        let mock = MockDriverKit::new();
        mock.add_device(native_id(1, 2), create_bulk_device());
        Arc::new(mock)
    }

    #[test]
    fn test_discover_endpoints() {
        let kit = kit();
        let desc = interface(
            0,
            0,
            0x08,
            vec![endpoint(0x81, 0x02, 512), endpoint(0x02, 0x02, 512)],
        );
        let iface = Interface::discover(kit.as_ref(), native_id(1, 2), &desc);

        assert_eq!(iface.endpoint_count(), 2);
        assert_eq!(iface.endpoint_of(0).unwrap().direction(), 0x80);
        assert_eq!(iface.endpoint_of(1).unwrap().transfer_type(), 2);
        assert!(!iface.is_alternate_setting());
        assert!(matches!(
            iface.endpoint_of(2),
            Err(Error::IndexOutOfRange { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn test_attach_alternate() {
        let kit = kit();
        let desc = interface(0, 1, 0x08, vec![]);
        let iface = Interface::attach(kit.as_ref(), native_id(1, 2), &desc);
        assert!(iface.is_alternate_setting());
        assert_eq!(iface.alternate_setting(), 1);
        assert_eq!(iface.alt_descriptor(), Some(&desc));
    }

    #[test]
    fn test_operations_require_claim() {
        let iface = Interface::new(native_id(1, 2), InterfaceInfo::default(), Vec::new());
        assert!(matches!(
            iface.current_alternate_setting(),
            Err(Error::NotClaimed { .. })
        ));
        assert!(matches!(
            iface.select_alternate_setting(1),
            Err(Error::NotClaimed { .. })
        ));
        assert!(matches!(
            iface.control_write(ControlSetup::vendor_write(), Duration::from_secs(1), &[]),
            Err(Error::NotClaimed { .. })
        ));
    }

    #[test]
    fn test_release_unclaimed_is_noop() {
        let mut iface = Interface::new(native_id(1, 2), InterfaceInfo::default(), Vec::new());
        assert!(iface.release().is_ok());
        assert!(iface.release().is_ok());
    }

    #[test]
    fn test_claim_twice_busy() {
        let kit = kit();
        let mut iface = Interface::new(native_id(1, 2), InterfaceInfo::default(), Vec::new());
        iface.claim(&kit).unwrap();

        let err = iface.claim(&kit).unwrap_err();
        assert!(err.is_busy());
        assert!(iface.is_claimed());

        iface.release().unwrap();
        assert!(!iface.is_claimed());
    }
}
