//! Event-transport boundary
//!
//! The transport delivers named notifications to subscribers on a thread it
//! owns. USB attach/detach notifications carry a JSON payload describing the
//! device; [`DeviceEvent::from_notification`] decodes it.

use crate::device_id::Identifier;
use crate::error::EventStatus;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Notification name published when a USB device is attached
pub const USB_DEVICE_ATTACHED: &str = "usual.event.hardware.usb.action.USB_DEVICE_ATTACHED";

/// Notification name published when a USB device is detached
pub const USB_DEVICE_DETACHED: &str = "usual.event.hardware.usb.action.USB_DEVICE_DETACHED";

/// A typed notification parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Long(i64),
    Bool(bool),
    Char(char),
    Double(f64),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    BoolArray(Vec<bool>),
    CharArray(Vec<char>),
    DoubleArray(Vec<f64>),
}

/// Typed key/value parameters attached to a notification
///
/// Getters return the caller's default when the key is missing or holds a
/// value of another type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: HashMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ParamValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn int(&self, key: &str, default: i32) -> i32 {
        match self.values.get(key) {
            Some(ParamValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn long(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(ParamValue::Long(v)) => *v,
            _ => default,
        }
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(ParamValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn char(&self, key: &str, default: char) -> char {
        match self.values.get(key) {
            Some(ParamValue::Char(v)) => *v,
            _ => default,
        }
    }

    pub fn double(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(ParamValue::Double(v)) => *v,
            _ => default,
        }
    }

    pub fn int_array(&self, key: &str) -> &[i32] {
        match self.values.get(key) {
            Some(ParamValue::IntArray(v)) => v,
            _ => &[],
        }
    }

    pub fn long_array(&self, key: &str) -> &[i64] {
        match self.values.get(key) {
            Some(ParamValue::LongArray(v)) => v,
            _ => &[],
        }
    }

    pub fn bool_array(&self, key: &str) -> &[bool] {
        match self.values.get(key) {
            Some(ParamValue::BoolArray(v)) => v,
            _ => &[],
        }
    }

    pub fn char_array(&self, key: &str) -> &[char] {
        match self.values.get(key) {
            Some(ParamValue::CharArray(v)) => v,
            _ => &[],
        }
    }

    pub fn double_array(&self, key: &str) -> &[f64] {
        match self.values.get(key) {
            Some(ParamValue::DoubleArray(v)) => v,
            _ => &[],
        }
    }
}

/// A notification delivered by the event transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub event: String,
    pub code: i32,
    /// Opaque string payload
    pub data: String,
    pub bundle_name: String,
    pub parameters: Parameters,
}

impl Notification {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            ..Default::default()
        }
    }
}

/// Opaque id of an active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Subscriber entry point, invoked on the transport's thread
pub type Receiver = Arc<dyn Fn(&Notification) + Send + Sync>;

/// The named-notification transport
pub trait EventTransport: Send + Sync {
    /// Subscribe `receiver` to the listed event names, in order
    fn subscribe(
        &self,
        events: &[&str],
        receiver: Receiver,
    ) -> Result<SubscriptionId, EventStatus>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventStatus>;
}

/// Bus position of a device named in a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceAddress {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.bus, self.address)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevicePayload {
    bus_num: u8,
    dev_address: u8,
    #[serde(default)]
    vendor_id: Option<u16>,
    #[serde(default)]
    product_id: Option<u16>,
}

/// A decoded attach or detach notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(DeviceAddress),
    Detached(DeviceAddress),
}

impl DeviceEvent {
    /// Decode a USB notification
    ///
    /// Returns `None` for other event names or a payload without
    /// `busNum`/`devAddress`.
    pub fn from_notification(notification: &Notification) -> Option<Self> {
        let attached = match notification.event.as_str() {
            USB_DEVICE_ATTACHED => true,
            USB_DEVICE_DETACHED => false,
            _ => return None,
        };

        let payload: DevicePayload = serde_json::from_str(&notification.data).ok()?;
        let address = DeviceAddress {
            bus: payload.bus_num,
            address: payload.dev_address,
            vendor_id: payload.vendor_id,
            product_id: payload.product_id,
        };

        Some(if attached {
            DeviceEvent::Attached(address)
        } else {
            DeviceEvent::Detached(address)
        })
    }

    pub fn address(&self) -> &DeviceAddress {
        match self {
            DeviceEvent::Attached(a) | DeviceEvent::Detached(a) => a,
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.address().identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_defaults() {
        let mut params = Parameters::new();
        params.set("count", ParamValue::Int(3));
        params.set("ids", ParamValue::LongArray(vec![1, 2]));

        assert!(params.has_key("count"));
        assert_eq!(params.int("count", 0), 3);
        assert_eq!(params.long("count", -1), -1); // wrong type
        assert_eq!(params.int("missing", 9), 9);
        assert_eq!(params.long_array("ids"), &[1, 2]);
        assert!(params.double_array("ids").is_empty());
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_decode_attach() {
        let n = Notification::new(
            USB_DEVICE_ATTACHED,
            r#"{"busNum":1,"devAddress":4,"vendorId":4660}"#,
        );
        let event = DeviceEvent::from_notification(&n).unwrap();
        assert!(matches!(event, DeviceEvent::Attached(_)));
        assert_eq!(event.identifier().as_str(), "001-004");
        assert_eq!(event.address().vendor_id, Some(0x1234));
        assert_eq!(event.address().product_id, None);
    }

    #[test]
    fn test_decode_detach() {
        let n = Notification::new(USB_DEVICE_DETACHED, r#"{"busNum":2,"devAddress":9}"#);
        let event = DeviceEvent::from_notification(&n).unwrap();
        assert_eq!(event, DeviceEvent::Detached(*event.address()));
        assert_eq!(event.identifier().as_str(), "002-009");
    }

    #[test]
    fn test_decode_rejects_unknown() {
        let other = Notification::new("usual.event.SCREEN_ON", r#"{"busNum":1,"devAddress":1}"#);
        assert!(DeviceEvent::from_notification(&other).is_none());

        let garbage = Notification::new(USB_DEVICE_ATTACHED, "not json");
        assert!(DeviceEvent::from_notification(&garbage).is_none());

        let partial = Notification::new(USB_DEVICE_ATTACHED, r#"{"busNum":1}"#);
        assert!(DeviceEvent::from_notification(&partial).is_none());
    }
}
