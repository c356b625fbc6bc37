//! In-process publish/subscribe used by the client and transports.
//!
//! Dispatch is synchronous: `emit` runs every current subscriber of the event,
//! in subscription order, before returning. Nothing is buffered or replayed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde_json::Value;

pub const DEVICE_CONNECTED: &str = "device:connected";
pub const DEVICE_DISCONNECTED: &str = "device:disconnected";
pub const BUTTON_REQUEST: &str = "device:button-request";
pub const PIN_REQUEST: &str = "device:pin-request";
pub const PASSPHRASE_REQUEST: &str = "device:passphrase-request";
pub const WORD_REQUEST: &str = "device:word-request";
pub const DEVICE_FAILURE: &str = "device:failure";
pub const DEVICE_SUCCESS: &str = "device:success";
pub const TRANSACTION_SIGNED: &str = "transaction:signed";
pub const TRANSACTION_REJECTED: &str = "transaction:rejected";
pub const SWAP_INITIATED: &str = "swap:initiated";
pub const SWAP_COMPLETED: &str = "swap:completed";
pub const SECURITY_ALERT: &str = "security:alert";

pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`EventBus::on`]; pass it back to [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = self
            .subscribers
            .lock()
            .map(|subs| subs.iter().map(|(k, v)| (k.clone(), v.len())).collect())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subs.entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Unsubscribing something that is not subscribed is a no-op.
    pub fn off(&self, event: &str, id: SubscriptionId) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(list) = subs.get_mut(event) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                subs.remove(event);
            }
        }
    }

    pub fn emit(&self, event: &str, payload: &Value) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<Callback> = {
            let subs = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
            match subs.get(event) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        tracing::debug!(event, subscribers = callbacks.len(), "emitting event");
        for cb in callbacks {
            cb(payload);
        }
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
