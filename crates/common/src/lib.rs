//! Common utilities for usb-topology
//!
//! This crate provides the boundaries the topology model is built against:
//! the driver-kit trait and its descriptor types, the event-transport trait
//! and notification types, device-id encoding, the shared error channel,
//! logging setup and the async notification bridge.

pub mod bridge;
pub mod ddk;
pub mod device_id;
pub mod error;
pub mod event;
pub mod logging;
pub mod test_utils;

pub use bridge::{NotificationReceiver, NotificationSender, create_notification_bridge};
pub use ddk::{
    ConfigDescriptor, ControlSetup, DdkConfigDescriptor, DdkInterface, DdkInterfaceDescriptor,
    DeviceDescriptor, Direction, DriverKit, EndpointDescriptor, InterfaceDescriptor, TransferKind,
};
pub use device_id::Identifier;
pub use error::{DdkStatus, Error, EventStatus, Result, check, check_event};
pub use event::{
    DeviceAddress, DeviceEvent, EventTransport, Notification, ParamValue, Parameters, Receiver,
    SubscriptionId, USB_DEVICE_ATTACHED, USB_DEVICE_DETACHED,
};
pub use logging::setup_logging;

/// Maximum number of devices returned by one enumeration
pub const MAX_USB_DEVICE_NUM: usize = 128;
