//! libusb-backed implementations of the driver-kit and event boundaries
//!
//! All USB operations go through `rusb`. Hot-plug notifications are pumped on
//! a dedicated thread per subscription, mirroring how the event transport
//! delivers notifications on a thread it owns.

mod hotplug;
mod libusb;

pub use hotplug::HotplugTransport;
pub use libusb::{RusbDriverKit, map_rusb_error};
