//! Attach/detach notification listener
//!
//! [`EventListener`] holds one callback per USB event name and a single
//! transport subscription covering the names that have a callback.
//! Callbacks run synchronously on the transport's delivery thread.

use crate::manager::lock;
use common::{
    EventTransport, Notification, Result, SubscriptionId, USB_DEVICE_ATTACHED,
    USB_DEVICE_DETACHED, check_event,
};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Notification callback; captured state plays the role of user data
pub type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    attach: Option<Callback>,
    detach: Option<Callback>,
}

impl Callbacks {
    fn for_event(&self, event: &str) -> Option<Callback> {
        match event {
            USB_DEVICE_ATTACHED => self.attach.clone(),
            USB_DEVICE_DETACHED => self.detach.clone(),
            _ => None,
        }
    }

    fn event_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(2);
        if self.attach.is_some() {
            names.push(USB_DEVICE_ATTACHED);
        }
        if self.detach.is_some() {
            names.push(USB_DEVICE_DETACHED);
        }
        names
    }
}

pub struct EventListener {
    transport: Arc<dyn EventTransport>,
    callbacks: Arc<RwLock<Callbacks>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl EventListener {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            callbacks: Arc::new(RwLock::new(Callbacks::default())),
            subscription: Mutex::new(None),
        }
    }

    /// Register the attach callback, replacing any previous one
    pub fn on_attach<F>(&self, callback: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.callbacks_mut().attach = Some(Arc::new(callback));
    }

    /// Register the detach callback, replacing any previous one
    pub fn on_detach<F>(&self, callback: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.callbacks_mut().detach = Some(Arc::new(callback));
    }

    /// Subscribe to every event name that has a callback
    ///
    /// Does nothing when already subscribed or when no callback is registered.
    pub fn start(&self) -> Result<()> {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            debug!("Event listener already started");
            return Ok(());
        }

        let names = self.callbacks_ref().event_names();
        if names.is_empty() {
            debug!("No callbacks registered, not subscribing");
            return Ok(());
        }

        let callbacks = self.callbacks.clone();
        let receiver = Arc::new(move |notification: &Notification| {
            dispatch(&callbacks, notification);
        });

        let id = check_event(
            self.transport.subscribe(&names, receiver),
            "subscribe to USB events",
        )?;
        *subscription = Some(id);

        info!("Subscribed to {}", names.join(", "));
        Ok(())
    }

    /// Drop the subscription; a no-op when not subscribed
    ///
    /// On failure the listener stays subscribed.
    pub fn reset(&self) -> Result<()> {
        let mut subscription = lock(&self.subscription);
        let Some(id) = subscription.take() else {
            return Ok(());
        };

        if let Err(e) = check_event(self.transport.unsubscribe(id), "unsubscribe from USB events") {
            *subscription = Some(id);
            return Err(e);
        }

        info!("Unsubscribed from USB events");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    fn callbacks_ref(&self) -> std::sync::RwLockReadGuard<'_, Callbacks> {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.callbacks.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            warn!("Failed to unsubscribe on drop: {}", e);
        }
    }
}

/// Invoke the callback registered for the notification's event name
fn dispatch(callbacks: &RwLock<Callbacks>, notification: &Notification) {
    let callback = callbacks
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .for_event(&notification.event);

    match callback {
        Some(callback) => callback(notification),
        None => debug!("No callback for event {}", notification.event),
    }
}
