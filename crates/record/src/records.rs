//! Serialized topology records
//!
//! One record type per level of the descriptor tree. Keys are camelCase in
//! JSON. Every key is mandatory on import except `serial` and `altSettings`,
//! which older exports did not carry.
//!
//! Derived values (self-powered, remote wakeup, endpoint direction, number
//! and transfer type) are not stored: the model recomputes them from
//! `attributes` and `address`.

use serde::{Deserialize, Serialize};

/// Exported device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub name: String,
    #[serde(default)]
    pub serial: String,
    pub manufacturer_name: String,
    pub product_name: String,
    /// Device release, formatted from bcdDevice
    pub version: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub clazz: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub dev_address: u8,
    pub bus_num: u8,
    pub configs: Vec<ConfigRecord>,
}

/// Exported configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    /// bConfigurationValue
    pub id: u8,
    pub attributes: u8,
    /// Maximum power draw in milliamps (already doubled)
    pub max_power: u16,
    pub name: String,
    pub interfaces: Vec<InterfaceRecord>,
    #[serde(default)]
    pub alt_settings: Vec<InterfaceRecord>,
}

/// Exported interface (primary or alternate setting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRecord {
    /// bInterfaceNumber
    pub id: u8,
    pub protocol: u8,
    pub clazz: u8,
    pub sub_class: u8,
    pub alternate_setting: u8,
    pub name: String,
    pub endpoints: Vec<EndpointRecord>,
}

/// Exported endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    pub address: u8,
    pub attributes: u8,
    pub interval: u8,
    pub max_packet_size: u16,
    pub interface_id: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> DeviceRecord {
        DeviceRecord {
            name: "001-004".to_string(),
            serial: "SN0001".to_string(),
            manufacturer_name: "Acme".to_string(),
            product_name: "Widget".to_string(),
            version: "1.00".to_string(),
            vendor_id: 0x1234,
            product_id: 0x5678,
            clazz: 0,
            sub_class: 0,
            protocol: 0,
            dev_address: 4,
            bus_num: 1,
            configs: vec![ConfigRecord {
                id: 1,
                attributes: 0xA0,
                max_power: 100,
                name: String::new(),
                interfaces: vec![InterfaceRecord {
                    id: 0,
                    protocol: 0,
                    clazz: 0xFF,
                    sub_class: 0,
                    alternate_setting: 0,
                    name: String::new(),
                    endpoints: vec![EndpointRecord {
                        address: 0x81,
                        attributes: 0x02,
                        interval: 0,
                        max_packet_size: 512,
                        interface_id: 0,
                    }],
                }],
                alt_settings: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_camel_case_keys() {
        let json = serde_json::to_value(sample_device()).unwrap();
        for key in [
            "name",
            "manufacturerName",
            "productName",
            "version",
            "vendorId",
            "productId",
            "clazz",
            "subClass",
            "protocol",
            "devAddress",
            "busNum",
            "configs",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }

        let config = &json["configs"][0];
        assert_eq!(config["maxPower"], 100);
        assert!(config.get("isSelfPowered").is_none());

        let endpoint = &config["interfaces"][0]["endpoints"][0];
        assert_eq!(endpoint["maxPacketSize"], 512);
        assert_eq!(endpoint["interfaceId"], 0);
        assert!(endpoint.get("direction").is_none());
    }

    #[test]
    fn test_optional_keys_default() {
        let mut json = serde_json::to_value(sample_device()).unwrap();
        json.as_object_mut().unwrap().remove("serial");
        json["configs"][0]
            .as_object_mut()
            .unwrap()
            .remove("altSettings");

        let device: DeviceRecord = serde_json::from_value(json).unwrap();
        assert!(device.serial.is_empty());
        assert!(device.configs[0].alt_settings.is_empty());
    }

    #[test]
    fn test_missing_mandatory_key_rejected() {
        let mut json = serde_json::to_value(sample_device()).unwrap();
        json.as_object_mut().unwrap().remove("busNum");

        let err = serde_json::from_value::<DeviceRecord>(json).unwrap_err();
        assert!(err.to_string().contains("busNum"));
    }
}
