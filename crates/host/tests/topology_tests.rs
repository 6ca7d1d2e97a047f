//! Integration tests for the descriptor tree and registry
//!
//! Covers:
//! - End-to-end discovery of the reference bulk device
//! - Power-flag and endpoint bit laws over every byte value
//! - Registry lookups, replacement and detach-driven removal
//! - Export/import provenance rules
//! - Interface claim semantics

use common::test_utils::{MockDriverKit, create_bulk_device, create_mock_device, native_id};
use common::{ControlSetup, DdkStatus, DriverKit, Error, Identifier};
use host::{
    Configuration, Device, DeviceInfo, Endpoint, HostManager, Interface, InterfaceInfo, Provenance,
};
use std::sync::Arc;
use std::time::Duration;

fn bulk_manager() -> (Arc<MockDriverKit>, HostManager) {
    let mock = Arc::new(MockDriverKit::new());
    mock.add_device(native_id(1, 2), create_bulk_device());
    let manager = HostManager::new(mock.clone());
    manager.initialize().unwrap();
    manager.enumerate().unwrap();
    (mock, manager)
}

mod discovery {
    use super::*;

    #[test]
    fn test_bulk_device_end_to_end() {
        let (_mock, manager) = bulk_manager();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let device = device.lock().unwrap();

        assert_eq!(device.provenance(), Provenance::Discovered);
        assert_eq!(device.config_count(), 1);

        let config = device.config_of(0).unwrap();
        assert!(config.is_self_powered());
        assert!(config.is_remote_wakeup());
        assert_eq!(config.max_power(), 100);

        let interface = config.interface_of(0).unwrap();
        assert_eq!(interface.class(), 0x08);
        assert_eq!(interface.endpoint_count(), 2);
        assert_eq!(interface.endpoint_of(0).unwrap().direction(), 0x80);
        assert_eq!(interface.endpoint_of(1).unwrap().transfer_type(), 2);
        assert_eq!(interface.endpoint_of(1).unwrap().direction(), 0x00);
    }

    #[test]
    fn test_descriptor_requery() {
        let (mock, manager) = bulk_manager();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let device = device.lock().unwrap();
        let kit: &dyn DriverKit = &*mock;

        assert_eq!(device.descriptor(kit).unwrap().vendor_id, 0x0781);
        assert_eq!(
            device
                .config_of(0)
                .unwrap()
                .descriptor(kit)
                .unwrap()
                .descriptor
                .attributes,
            0xA0
        );
    }

    #[test]
    fn test_out_of_range_children() {
        let (_mock, manager) = bulk_manager();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let device = device.lock().unwrap();

        assert!(matches!(
            device.config_of(1),
            Err(Error::IndexOutOfRange { what: "config", index: 1, len: 1 })
        ));
        assert!(device.config_of(0).unwrap().interface_of(3).is_err());
    }
}

mod bit_laws {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn power_flags_follow_attributes(attributes: u8) {
            let config = Configuration::new(native_id(1, 1), 0, 1, attributes, "", 0, Vec::new());
            prop_assert_eq!(config.is_self_powered(), attributes & 0x80 != 0);
            prop_assert_eq!(config.is_remote_wakeup(), attributes & 0x20 != 0);
        }

        #[test]
        fn max_power_is_doubled(units: u8) {
            let config = Configuration::new(native_id(1, 1), 0, 1, 0x80, "", units, Vec::new());
            prop_assert_eq!(config.max_power(), units as u16 * 2);
        }

        #[test]
        fn endpoint_bits(address: u8, attributes: u8) {
            let endpoint = Endpoint::new(address, attributes, 0, 64, 0);
            prop_assert_eq!(endpoint.direction(), address & 0x80);
            prop_assert_eq!(endpoint.number(), address & 0x0F);
            prop_assert_eq!(endpoint.transfer_type(), attributes & 0x03);
            prop_assert_eq!(endpoint.transfer_kind().as_raw(), attributes & 0x03);
        }
    }
}

mod registry {
    use super::*;

    #[test]
    fn test_find_device_empty_registry() {
        let manager = HostManager::new(Arc::new(MockDriverKit::new()));
        assert!(manager.find_device(&Identifier::new(1, 2)).is_none());
    }

    #[test]
    fn test_find_after_add() {
        let manager = HostManager::new(Arc::new(MockDriverKit::new()));
        let info = DeviceInfo {
            bus_num: 3,
            dev_address: 4,
            vendor_id: 0xABCD,
            ..Default::default()
        };
        let device = Device::new(native_id(3, 4), info, Vec::new());
        let identifier = device.identifier();

        assert!(manager.add_device(native_id(3, 4), device).is_none());
        let found = manager.find_device(&identifier).unwrap();
        assert_eq!(found.lock().unwrap().vendor_id(), 0xABCD);
    }

    #[test]
    fn test_add_device_replaces() {
        let manager = HostManager::new(Arc::new(MockDriverKit::new()));
        let info = DeviceInfo {
            bus_num: 1,
            dev_address: 1,
            ..Default::default()
        };

        manager.add_device(native_id(1, 1), Device::new(native_id(1, 1), info.clone(), Vec::new()));
        let old = manager.add_device(native_id(1, 1), Device::new(native_id(1, 1), info, Vec::new()));
        assert!(old.is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_detach_removes_only_matching_device() {
        let mock = Arc::new(MockDriverKit::new());
        mock.add_device(native_id(1, 2), create_bulk_device());
        mock.add_device(native_id(1, 3), create_mock_device(0x1234, 0x5678));
        let manager = HostManager::new(mock);
        manager.enumerate().unwrap();

        assert_eq!(manager.handle_detached(&Identifier::new(1, 2)), Some(native_id(1, 2)));
        assert!(manager.find_device(&Identifier::new(1, 2)).is_none());
        assert!(manager.find_device(&Identifier::new(1, 3)).is_some());
    }

    #[test]
    fn test_devices_sorted() {
        let mock = Arc::new(MockDriverKit::new());
        mock.add_device(native_id(2, 1), create_mock_device(0x1, 0x1));
        mock.add_device(native_id(1, 9), create_mock_device(0x2, 0x2));
        let manager = HostManager::new(mock);
        manager.enumerate().unwrap();

        let ids: Vec<u64> = manager.devices().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![native_id(1, 9), native_id(2, 1)]);
    }
}

mod provenance {
    use super::*;

    #[test]
    fn test_export_import_yields_cached() {
        let (_mock, manager) = bulk_manager();
        let records = manager.export_records();
        assert_eq!(records.len(), 1);

        let json = record::encode_json(&records).unwrap();
        let decoded = record::decode_json(&json).unwrap();
        let cached = Device::from_record(&decoded[0]).unwrap();

        assert_eq!(cached.provenance(), Provenance::Cached);
        assert_eq!(cached.identifier().as_str(), "001-002");
        assert_eq!(cached.manufacturer_name(), "Test Manufacturer");
        let config = cached.config_of(0).unwrap();
        assert_eq!(config.max_power(), 100);
        assert!(config.is_self_powered());
        assert_eq!(config.interface_of(0).unwrap().endpoint_count(), 2);

        assert!(cached.to_record().is_none());
    }

    #[test]
    fn test_cached_devices_not_exported() {
        let (_mock, manager) = bulk_manager();
        let info = DeviceInfo {
            bus_num: 5,
            dev_address: 5,
            ..Default::default()
        };
        manager.add_device(native_id(5, 5), Device::new(native_id(5, 5), info, Vec::new()));

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.export_records().len(), 1);
    }

    #[test]
    fn test_cached_children_skipped() {
        let interface = Interface::new(native_id(1, 1), InterfaceInfo::default(), Vec::new());
        assert!(interface.to_record().is_none());
        assert!(Endpoint::new(0x81, 2, 0, 512, 0).to_record().is_none());
    }
}

mod claims {
    use super::*;

    #[test]
    fn test_claim_control_release() {
        let (mock, manager) = bulk_manager();
        let kit = manager.driver_kit().clone();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let mut device = device.lock().unwrap();
        let interface = device.config_of_mut(0).unwrap().interface_of_mut(0).unwrap();

        interface.claim(&kit).unwrap();
        assert!(mock.is_claimed(native_id(1, 2), 0));

        mock.set_read_payload(vec![0x01]);
        let mut buf = [0u8; 1];
        let read = interface
            .control_read(ControlSetup::vendor_read(), Duration::from_secs(1), &mut buf)
            .unwrap();
        assert_eq!((read, buf[0]), (1, 0x01));

        let written = interface
            .control_write(ControlSetup::vendor_write(), Duration::from_secs(1), &[0xAA])
            .unwrap();
        assert_eq!(written, 1);

        interface.release().unwrap();
        assert_eq!(mock.active_claims(), 0);
    }

    #[test]
    fn test_claim_held_elsewhere_is_busy() {
        let (mock, manager) = bulk_manager();
        let kit = manager.driver_kit().clone();
        let other = mock.claim_interface(native_id(1, 2), 0).unwrap();

        let device = manager.device_of(native_id(1, 2)).unwrap();
        let mut device = device.lock().unwrap();
        let interface = device.config_of_mut(0).unwrap().interface_of_mut(0).unwrap();

        let err = interface.claim(&kit).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(err.status(), Some(DdkStatus::DeviceBusy));
        assert!(!interface.is_claimed());

        mock.release_interface(other).unwrap();
        interface.claim(&kit).unwrap();
    }

    #[test]
    fn test_release_unclaimed_succeeds() {
        let (mock, manager) = bulk_manager();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let mut device = device.lock().unwrap();
        let interface = device.config_of_mut(0).unwrap().interface_of_mut(0).unwrap();

        interface.release().unwrap();
        assert_eq!(mock.active_claims(), 0);
    }

    #[test]
    fn test_failed_release_can_be_retried() {
        let (mock, manager) = bulk_manager();
        let kit = manager.driver_kit().clone();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let mut device = device.lock().unwrap();
        let interface = device.config_of_mut(0).unwrap().interface_of_mut(0).unwrap();
        interface.claim(&kit).unwrap();

        mock.fail("release_interface", DdkStatus::IoFailed);
        assert!(interface.release().is_err());
        assert!(interface.is_claimed());
        assert!(mock.is_claimed(native_id(1, 2), 0));

        mock.clear_failure("release_interface");
        interface.release().unwrap();
        assert!(!interface.is_claimed());
        assert_eq!(mock.active_claims(), 0);

        interface.claim(&kit).unwrap();
        interface.release().unwrap();
    }

    #[test]
    fn test_timeout_is_hard_bound() {
        let (mock, manager) = bulk_manager();
        let kit = manager.driver_kit().clone();
        let device = manager.device_of(native_id(1, 2)).unwrap();
        let mut device = device.lock().unwrap();
        let interface = device.config_of_mut(0).unwrap().interface_of_mut(0).unwrap();
        interface.claim(&kit).unwrap();

        mock.set_transfer_latency(Duration::from_millis(500));
        let mut buf = [0u8; 1];
        let err = interface
            .control_read(ControlSetup::vendor_read(), Duration::from_millis(100), &mut buf)
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(mock.control_calls().is_empty());
    }
}
