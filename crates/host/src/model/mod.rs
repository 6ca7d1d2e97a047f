//! USB descriptor tree
//!
//! A [`Device`] owns its [`Configuration`]s, a configuration owns its primary
//! and alternate-setting [`Interface`]s, an interface owns its [`Endpoint`]s.
//! Every node is built either top-down from live descriptor queries
//! ([`Provenance::Discovered`]) or bottom-up from known values or an exported
//! record ([`Provenance::Cached`]). Only discovered nodes export a record.

mod configuration;
mod device;
mod endpoint;
mod interface;

pub use configuration::Configuration;
pub use device::{Device, DeviceInfo};
pub use endpoint::Endpoint;
pub use interface::{Interface, InterfaceInfo};

use common::DriverKit;
use tracing::warn;

/// Where a model node came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
    /// Built from a live descriptor query
    Discovered,
    /// Built from caller-supplied values or a previously exported record
    #[default]
    Cached,
}

impl Provenance {
    pub fn is_discovered(self) -> bool {
        self == Provenance::Discovered
    }
}

/// Range-checked child lookup
pub(crate) fn child<'a, T>(
    items: &'a [T],
    index: usize,
    what: &'static str,
) -> common::Result<&'a T> {
    items.get(index).ok_or(common::Error::IndexOutOfRange {
        what,
        index,
        len: items.len(),
    })
}

pub(crate) fn child_mut<'a, T>(
    items: &'a mut [T],
    index: usize,
    what: &'static str,
) -> common::Result<&'a mut T> {
    let len = items.len();
    items
        .get_mut(index)
        .ok_or(common::Error::IndexOutOfRange { what, index, len })
}

/// Best-effort string descriptor read; index 0 means "no string"
///
/// Many devices stall on string requests they advertise, so a failed read
/// yields an empty string instead of failing discovery. This is the only
/// descriptor query whose error is not propagated.
pub(crate) fn read_string(kit: &dyn DriverKit, device_id: u64, index: u8) -> String {
    if index == 0 {
        return String::new();
    }
    kit.string_descriptor(device_id, index)
        .unwrap_or_else(|status| {
            warn!(
                "String descriptor {} of device {:#x} unavailable: {}",
                index, device_id, status
            );
            String::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DdkStatus;
    use common::test_utils::{MockDriverKit, create_bulk_device, native_id};

    #[test]
    fn test_failed_string_read_is_empty() {
        let mock = MockDriverKit::new();
        mock.add_device(native_id(1, 2), create_bulk_device());
        assert!(!read_string(&mock, native_id(1, 2), 1).is_empty());

        mock.fail("string_descriptor", DdkStatus::IoFailed);
        assert_eq!(read_string(&mock, native_id(1, 2), 1), "");
        assert_eq!(read_string(&mock, native_id(1, 2), 0), "");
    }
}
