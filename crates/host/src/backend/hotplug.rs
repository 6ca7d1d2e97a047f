//! Hot-plug event transport over libusb

use super::map_rusb_error;
use common::{
    DdkStatus, EventStatus, EventTransport, Notification, ParamValue, Receiver, SubscriptionId,
    USB_DEVICE_ATTACHED, USB_DEVICE_DETACHED,
};
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// One subscription's event pump
struct Pump {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Pump {
    fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hot-plug event thread panicked");
            }
        }
    }
}

/// [`EventTransport`] delivering libusb hot-plug events
///
/// Every subscription registers its own hot-plug callback and runs a thread
/// that pumps libusb events until the subscription is dropped. Receivers are
/// invoked on that thread.
pub struct HotplugTransport {
    context: Context,
    pumps: Mutex<HashMap<u64, Pump>>,
    next_id: AtomicU64,
}

impl HotplugTransport {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            pumps: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn pumps(&self) -> MutexGuard<'_, HashMap<u64, Pump>> {
        self.pumps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventTransport for HotplugTransport {
    fn subscribe(
        &self,
        events: &[&str],
        receiver: Receiver,
    ) -> Result<SubscriptionId, EventStatus> {
        if !rusb::has_hotplug() {
            warn!("libusb was built without hot-plug support");
            return Err(EventStatus::InitUndone);
        }

        let callback = HotplugCallback {
            events: events.iter().map(|e| e.to_string()).collect(),
            receiver,
        };
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let context = self.context.clone();
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                let registration = match HotplugBuilder::new()
                    .enumerate(false)
                    .register::<Context, _>(&context, Box::new(callback))
                {
                    Ok(registration) => {
                        let _ = ready_tx.send(Ok(()));
                        registration
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while flag.load(Ordering::Acquire) {
                    match context.handle_events(Some(PUMP_INTERVAL)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(PUMP_INTERVAL);
                        }
                    }
                }

                drop(registration);
                debug!("Hot-plug event thread stopped");
            })
            .expect("Failed to spawn hot-plug event thread");

        let pump = Pump {
            running,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                pump.stop();
                return Err(event_status(map_rusb_error(e)));
            }
            Err(_) => {
                pump.stop();
                return Err(EventStatus::SendingRequestFailed);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pumps().insert(id, pump);
        info!("Hot-plug subscription {} registered", id);
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventStatus> {
        let pump = self
            .pumps()
            .remove(&id.0)
            .ok_or(EventStatus::InvalidParameter)?;
        pump.stop();
        info!("Hot-plug subscription {} removed", id.0);
        Ok(())
    }
}

impl Drop for HotplugTransport {
    fn drop(&mut self) {
        let pumps: Vec<Pump> = self.pumps().drain().map(|(_, p)| p).collect();
        for pump in pumps {
            pump.stop();
        }
    }
}

struct HotplugCallback {
    events: Vec<String>,
    receiver: Receiver,
}

impl HotplugCallback {
    fn deliver<T: UsbContext>(&self, event: &str, device: &Device<T>) {
        if !self.events.iter().any(|e| e == event) {
            return;
        }
        let ids = device
            .device_descriptor()
            .ok()
            .map(|d| (d.vendor_id(), d.product_id()));
        let notification = device_notification(event, device.bus_number(), device.address(), ids);
        (self.receiver)(&notification);
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.deliver(USB_DEVICE_ATTACHED, &device);
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.deliver(USB_DEVICE_DETACHED, &device);
    }
}

/// Build the notification a transport delivers for a device event
fn device_notification(
    event: &str,
    bus: u8,
    address: u8,
    ids: Option<(u16, u16)>,
) -> Notification {
    let mut payload = serde_json::json!({
        "busNum": bus,
        "devAddress": address,
    });
    if let Some((vendor_id, product_id)) = ids {
        payload["vendorId"] = vendor_id.into();
        payload["productId"] = product_id.into();
    }

    let mut notification = Notification::new(event, payload.to_string());
    notification
        .parameters
        .set("busNum", ParamValue::Int(bus as i32));
    notification
        .parameters
        .set("devAddress", ParamValue::Int(address as i32));
    notification
}

fn event_status(status: DdkStatus) -> EventStatus {
    match status {
        DdkStatus::NoPermission => EventStatus::PermissionDenied,
        DdkStatus::MemoryError => EventStatus::AllocMemoryFailed,
        DdkStatus::InvalidOperation => EventStatus::InitUndone,
        DdkStatus::InvalidParameter => EventStatus::InvalidParameter,
        _ => EventStatus::SendingRequestFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DeviceEvent;

    #[test]
    fn test_attach_notification_decodes() {
        let notification = device_notification(USB_DEVICE_ATTACHED, 3, 7, Some((0x0781, 0x5581)));
        assert_eq!(notification.parameters.int("busNum", 0), 3);

        match DeviceEvent::from_notification(&notification) {
            Some(DeviceEvent::Attached(address)) => {
                assert_eq!(address.identifier().as_str(), "003-007");
                assert_eq!(address.vendor_id, Some(0x0781));
                assert_eq!(address.product_id, Some(0x5581));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_detach_without_descriptor() {
        let notification = device_notification(USB_DEVICE_DETACHED, 1, 2, None);
        let event = DeviceEvent::from_notification(&notification).unwrap();
        assert!(matches!(event, DeviceEvent::Detached(_)));
        assert_eq!(event.address().vendor_id, None);
    }

    #[test]
    fn test_event_status_mapping() {
        assert_eq!(
            event_status(DdkStatus::NoPermission),
            EventStatus::PermissionDenied
        );
        assert_eq!(
            event_status(DdkStatus::IoFailed),
            EventStatus::SendingRequestFailed
        );
    }
}
