//! Async bridge between the event transport thread and the Tokio runtime
//!
//! Listener callbacks run synchronously on the transport's thread. A
//! [`NotificationSender`] captured by those callbacks decodes each USB
//! notification and forwards it, without blocking, to a
//! [`NotificationReceiver`] awaited by a Tokio task.

use crate::event::{DeviceEvent, Notification};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, warn};

/// Capacity of the notification queue
pub const BRIDGE_CAPACITY: usize = 256;

/// Transport-side half (blocking context)
#[derive(Clone)]
pub struct NotificationSender {
    tx: Sender<DeviceEvent>,
}

impl NotificationSender {
    /// Decode and forward a notification
    ///
    /// Returns false when the notification was not a USB device event or the
    /// queue could not take it. Never blocks the transport thread.
    pub fn forward(&self, notification: &Notification) -> bool {
        let Some(event) = DeviceEvent::from_notification(notification) else {
            debug!("Ignoring notification {}", notification.event);
            return false;
        };

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Notification queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Notification receiver closed");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runtime-side half (async)
#[derive(Clone)]
pub struct NotificationReceiver {
    rx: Receiver<DeviceEvent>,
}

impl NotificationReceiver {
    /// Wait for the next device event
    pub async fn recv(&self) -> crate::Result<DeviceEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take a pending event without waiting
    pub fn try_recv(&self) -> Option<DeviceEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the bridge
///
/// Returns (NotificationSender for listener callbacks, NotificationReceiver for Tokio)
pub fn create_notification_bridge() -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = bounded(BRIDGE_CAPACITY);
    (NotificationSender { tx }, NotificationReceiver { rx })
}
