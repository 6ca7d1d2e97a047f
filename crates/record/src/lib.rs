//! Topology records for usb-topology
//!
//! This crate defines the serialized form of a USB device tree as it is
//! exported to (and imported from) the topology cache. Records are plain data:
//! the live model in the `host` crate decides when a record may be produced.
//!
//! Two encodings are provided:
//! - JSON, the interchange format with camelCase keys
//! - a framed binary snapshot (postcard payload, CRC32 trailer)
//!
//! # Example
//!
//! ```
//! use record::{EndpointRecord, decode_json, encode_json};
//!
//! let endpoint = EndpointRecord {
//!     address: 0x81,
//!     attributes: 0x02,
//!     interval: 0,
//!     max_packet_size: 512,
//!     interface_id: 0,
//! };
//! let json = serde_json::to_string(&endpoint).unwrap();
//! assert!(json.contains("\"maxPacketSize\":512"));
//!
//! let devices = decode_json(&encode_json(&[]).unwrap()).unwrap();
//! assert!(devices.is_empty());
//! ```

pub mod codec;
pub mod error;
pub mod integrity;
pub mod records;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, SNAPSHOT_MAGIC, decode_device_json, decode_json, decode_snapshot,
    encode_device_json, encode_json, encode_snapshot, read_snapshot, write_snapshot,
};
pub use error::{RecordError, Result};
pub use records::{ConfigRecord, DeviceRecord, EndpointRecord, InterfaceRecord};
pub use version::{CURRENT_VERSION, SnapshotVersion};
