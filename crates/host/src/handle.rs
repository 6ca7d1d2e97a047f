//! Claimed interface handle
//!
//! An [`InterfaceHandle`] is the exclusive claim on one interface of one
//! device and the only way to issue control transfers or change the active
//! alternate setting. It names its interface by (device id, interface index)
//! and holds no reference into the descriptor tree.
//!
//! The claim is returned by [`InterfaceHandle::release`]. A handle dropped
//! without an explicit release returns its claim on drop; a failure there is
//! only logged.

use common::{ControlSetup, DriverKit, Error, Result, check};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct InterfaceHandle {
    kit: Arc<dyn DriverKit>,
    device_id: u64,
    interface_index: u8,
    raw: u64,
    released: bool,
}

impl InterfaceHandle {
    /// Take exclusive use of `interface_index` on `device_id`
    pub fn claim(kit: Arc<dyn DriverKit>, device_id: u64, interface_index: u8) -> Result<Self> {
        let raw = check(
            kit.claim_interface(device_id, interface_index),
            "claim interface",
        )?;

        debug!(
            "Claimed interface {} on device {:#x} (handle {})",
            interface_index, device_id, raw
        );

        Ok(Self {
            kit,
            device_id,
            interface_index,
            raw,
            released: false,
        })
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn interface_index(&self) -> u8 {
        self.interface_index
    }

    /// Driver-kit handle value
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Return the claim to the driver kit
    ///
    /// On failure the handle still holds the claim and the release may be
    /// retried. Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        check(self.kit.release_interface(self.raw), "release interface")?;
        self.released = true;
        debug!(
            "Released interface {} on device {:#x}",
            self.interface_index, self.device_id
        );
        Ok(())
    }

    pub fn select_alternate_setting(&self, setting: u8) -> Result<()> {
        check(
            self.kit.select_interface_setting(self.raw, setting),
            "select alternate setting",
        )?;
        debug!(
            "Interface {} on device {:#x} now uses setting {}",
            self.interface_index, self.device_id, setting
        );
        Ok(())
    }

    pub fn current_alternate_setting(&self) -> Result<u8> {
        check(
            self.kit.current_interface_setting(self.raw),
            "get alternate setting",
        )
    }

    /// Device-to-host control transfer into `data`
    ///
    /// `setup.length` is taken from the buffer. Returns the number of bytes
    /// read. A transfer exceeding `timeout` fails with a timeout status.
    pub fn control_read(
        &self,
        setup: ControlSetup,
        timeout: Duration,
        data: &mut [u8],
    ) -> Result<usize> {
        if !setup.is_device_to_host() {
            return Err(Error::InvalidRequest(format!(
                "request type {:#04x} is not device-to-host",
                setup.request_type
            )));
        }
        let setup = setup.with_length(data_length(data.len())?);
        let timeout_ms = timeout_ms(timeout)?;

        debug!(
            "Control read: type={:#04x} request={:#04x} value={:#06x} index={:#06x} len={}",
            setup.request_type, setup.request, setup.value, setup.index, setup.length
        );

        let result = check(
            self.kit.control_read(self.raw, &setup, timeout_ms, data),
            "control read",
        );
        if let Err(e) = &result {
            debug!("Control read failed: {}", e);
        }
        result
    }

    /// Host-to-device control transfer of `data`
    pub fn control_write(
        &self,
        setup: ControlSetup,
        timeout: Duration,
        data: &[u8],
    ) -> Result<usize> {
        if setup.is_device_to_host() {
            return Err(Error::InvalidRequest(format!(
                "request type {:#04x} is not host-to-device",
                setup.request_type
            )));
        }
        let setup = setup.with_length(data_length(data.len())?);
        let timeout_ms = timeout_ms(timeout)?;

        debug!(
            "Control write: type={:#04x} request={:#04x} value={:#06x} index={:#06x} len={}",
            setup.request_type, setup.request, setup.value, setup.index, setup.length
        );

        let result = check(
            self.kit.control_write(self.raw, &setup, timeout_ms, data),
            "control write",
        );
        if let Err(e) = &result {
            debug!("Control write failed: {}", e);
        }
        result
    }
}

impl Drop for InterfaceHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(status) = self.kit.release_interface(self.raw) {
            warn!(
                "Failed to release interface {} on device {:#x}: {}",
                self.interface_index, self.device_id, status
            );
        }
    }
}

impl fmt::Debug for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceHandle")
            .field("device_id", &self.device_id)
            .field("interface_index", &self.interface_index)
            .field("raw", &self.raw)
            .finish()
    }
}

fn data_length(len: usize) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| Error::InvalidRequest(format!("data stage of {} bytes exceeds wLength", len)))
}

/// Timeout in whole milliseconds, rounded up
///
/// The driver kit reads 0 as "wait forever", so a zero timeout is refused.
fn timeout_ms(timeout: Duration) -> Result<u32> {
    if timeout.is_zero() {
        return Err(Error::InvalidRequest(
            "control transfer timeout must be non-zero".to_string(),
        ));
    }
    let ms = timeout.as_micros().div_ceil(1000);
    Ok(u32::try_from(ms).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DdkStatus;
    use common::test_utils::{MockDriverKit, create_bulk_device, native_id};

    fn setup() -> (Arc<MockDriverKit>, Arc<dyn DriverKit>) {
        let mock = Arc::new(MockDriverKit::new());
        mock.add_device(native_id(1, 2), create_bulk_device());
        let kit: Arc<dyn DriverKit> = mock.clone();
        (mock, kit)
    }

    #[test]
    fn test_claim_and_release() {
        let (mock, kit) = setup();
        let mut handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();
        assert!(mock.is_claimed(native_id(1, 2), 0));

        handle.release().unwrap();
        assert_eq!(mock.active_claims(), 0);
        handle.release().unwrap();
    }

    #[test]
    fn test_failed_release_keeps_claim() {
        let (mock, kit) = setup();
        let mut handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();

        mock.fail("release_interface", DdkStatus::IoFailed);
        let err = handle.release().unwrap_err();
        assert_eq!(err.status(), Some(DdkStatus::IoFailed));
        assert!(mock.is_claimed(native_id(1, 2), 0));

        mock.clear_failure("release_interface");
        handle.release().unwrap();
        assert_eq!(mock.active_claims(), 0);
    }

    #[test]
    fn test_drop_releases_claim() {
        let (mock, kit) = setup();
        {
            let _handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();
            assert_eq!(mock.active_claims(), 1);
        }
        assert_eq!(mock.active_claims(), 0);
    }

    #[test]
    fn test_control_read_sets_length() {
        let (mock, kit) = setup();
        mock.set_read_payload(vec![0x5A]);
        let handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();

        let mut buf = [0u8; 4];
        let read = handle
            .control_read(ControlSetup::vendor_read(), Duration::from_secs(1), &mut buf)
            .unwrap();
        assert_eq!(read, 1);
        assert_eq!(buf[0], 0x5A);

        let calls = mock.control_calls();
        assert_eq!(calls[0].setup.length, 4);
        assert_eq!(calls[0].timeout_ms, 1000);
    }

    #[test]
    fn test_control_direction_checked() {
        let (_mock, kit) = setup();
        let handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();

        let mut buf = [0u8; 1];
        let err = handle
            .control_read(ControlSetup::vendor_write(), Duration::from_secs(1), &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = handle
            .control_write(ControlSetup::vendor_read(), Duration::from_secs(1), &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_control_timeout_no_retry() {
        let (mock, kit) = setup();
        mock.set_transfer_latency(Duration::from_millis(200));
        let handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();

        let err = handle
            .control_write(ControlSetup::vendor_write(), Duration::from_millis(50), &[])
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.status(), Some(DdkStatus::Timeout));
        assert!(mock.control_calls().is_empty());
    }

    #[test]
    fn test_timeout_never_rounds_to_zero() {
        let (mock, kit) = setup();
        let handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();

        let err = handle
            .control_write(ControlSetup::vendor_write(), Duration::ZERO, &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(mock.control_calls().is_empty());

        handle
            .control_write(ControlSetup::vendor_write(), Duration::from_micros(200), &[])
            .unwrap();
        handle
            .control_write(ControlSetup::vendor_write(), Duration::from_micros(1500), &[])
            .unwrap();

        let calls = mock.control_calls();
        assert_eq!(calls[0].timeout_ms, 1);
        assert_eq!(calls[1].timeout_ms, 2);
    }

    #[test]
    fn test_alternate_setting() {
        let (_mock, kit) = setup();
        let handle = InterfaceHandle::claim(kit, native_id(1, 2), 0).unwrap();
        assert_eq!(handle.current_alternate_setting().unwrap(), 0);
        handle.select_alternate_setting(1).unwrap();
        assert_eq!(handle.current_alternate_setting().unwrap(), 1);
    }
}
