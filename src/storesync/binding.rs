use std::sync::{Arc, RwLock};

use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::storesync::store::{ObservableStore, Subscription};

/// Per-key view of the store for UI-style consumers.
///
/// Holds the key's latest value, kept current by a subscription that lives as
/// long as the binding. `initial` only stands in when the key is absent at
/// creation; a later removal reads as `None`.
pub struct KeyBinding {
    store: Arc<ObservableStore>,
    key: String,
    current: Arc<RwLock<Option<Value>>>,
    subscription: Subscription,
}

impl KeyBinding {
    pub fn new(store: Arc<ObservableStore>, key: &str, initial: Option<Value>) -> Self {
        let current = Arc::new(RwLock::new(store.get(key).or(initial)));

        let slot = current.clone();
        let subscription = store.subscribe(key, move |value| {
            *slot.write().unwrap_or_else(|e| e.into_inner()) = value.cloned();
        });

        debug!("Bound key '{}'", key);
        Self {
            store,
            key: key.to_string(),
            current,
            subscription,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self) -> Option<Value> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set<T: Serialize + ?Sized>(&self, value: &T) {
        self.store.set(&self.key, value);
    }

    pub fn clear(&self) {
        self.store.remove(&self.key);
    }
}

impl Drop for KeyBinding {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        debug!("Unbound key '{}'", self.key);
    }
}
