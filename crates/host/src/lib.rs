//! USB host topology
//!
//! Models attached USB devices as a descriptor tree, keeps a registry of them
//! up to date from attach/detach notifications, and hands out exclusive
//! interface claims for control I/O.
//!
//! The driver kit and event transport are injected as trait objects; the
//! [`backend`] module provides the libusb-backed implementations.

pub mod backend;
pub mod cache;
pub mod config;
pub mod handle;
pub mod listener;
pub mod manager;
pub mod model;

pub use cache::{CacheFormat, TopologyCache};
pub use config::HostConfig;
pub use handle::InterfaceHandle;
pub use listener::{Callback, EventListener};
pub use manager::{HostManager, SharedDevice};
pub use model::{Configuration, Device, DeviceInfo, Endpoint, Interface, InterfaceInfo, Provenance};
