//! Device identity
//!
//! Three forms of device identity exist:
//!
//! - the **external id** surfaced to callers: bus number in bits 48-63, device
//!   number in bits 32-47, low 32 bits zero
//! - the **native id** used by the driver kit: `bus << 32 | dev`
//! - the textual [`Identifier`] `"BBB-DDD"`, the only key that stays stable
//!   across driver-kit re-initialization

use serde::{Deserialize, Serialize};
use std::fmt;

const BUS_SHIFT: u32 = 48;
const DEV_SHIFT: u32 = 32;
const FIELD_MASK: u64 = 0xFFFF;
const EXTERNAL_MASK: u64 = 0xFFFF_FFFF_0000_0000;

/// Pack a bus and device number into an external id
pub fn encode(bus: u16, dev: u16) -> u64 {
    ((bus as u64) << BUS_SHIFT) | ((dev as u64) << DEV_SHIFT)
}

/// Unpack an external id into (bus, dev)
pub fn decode(id: u64) -> (u16, u16) {
    (bus_of(id), dev_of(id))
}

pub fn bus_of(id: u64) -> u16 {
    ((id >> BUS_SHIFT) & FIELD_MASK) as u16
}

pub fn dev_of(id: u64) -> u16 {
    ((id >> DEV_SHIFT) & FIELD_MASK) as u16
}

/// Native id as understood by the driver kit
pub fn native_from_parts(bus: u16, dev: u16) -> u64 {
    ((bus as u64) << 32) | dev as u64
}

/// Translate an external id into the driver kit's native id
///
/// Only bits 32-63 are meaningful; the low half is discarded.
pub fn to_native(external: u64) -> u64 {
    let external = external & EXTERNAL_MASK;
    native_from_parts(bus_of(external), dev_of(external))
}

/// Translate a native id back into the external form
pub fn from_native(native: u64) -> u64 {
    let bus = ((native >> 32) & FIELD_MASK) as u16;
    let dev = (native & FIELD_MASK) as u16;
    encode(bus, dev)
}

/// Stable textual key of an attached device, `"BBB-DDD"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(bus: u8, address: u8) -> Self {
        Self(format!("{:03}-{:03}", bus, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
