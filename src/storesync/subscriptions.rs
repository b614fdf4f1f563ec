use std::collections::HashMap;

use dashmap::DashMap;
use log::debug;
use smallvec::SmallVec;
use uuid::Uuid;
use crate::storesync::types::{Key, Listener, SubscriptionId, Subscriptions};

/// Listener snapshot taken for one notification
pub type ListenerSnapshot = SmallVec<[Listener; 4]>;

/// Stores listener registrations per key in a thread-safe manner
#[derive(Default)]
pub struct SubscriptionManager {
    inner: Subscriptions,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Adds a listener for `key` and returns its registration id
    pub fn subscribe(&self, key: &str, listener: Listener) -> SubscriptionId {
        let id = Uuid::new_v4();

        self.inner
            .entry(key.to_string())
            .or_insert_with(HashMap::new)
            .insert(id, listener);

        debug!("Added listener {} for key '{}'", id, key);
        id
    }

    /// Removes one registration. Returns false when it was already gone.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let removed = match self.inner.get_mut(key) {
            Some(mut entry) => entry.remove(&id).is_some(),
            None => false,
        };

        if removed {
            debug!("Removed listener {} from key '{}'", id, key);
            // Re-check under the shard lock so a concurrent subscribe is never dropped
            if self.inner.remove_if(key, |_, listeners| listeners.is_empty()).is_some() {
                debug!("Removed empty key '{}' from registry", key);
            }
        } else {
            debug!("Listener {} not registered for key '{}'", id, key);
        }

        removed
    }

    /// Returns the listeners currently registered for a key
    pub fn listeners_for_key(&self, key: &str) -> ListenerSnapshot {
        match self.inner.get(key) {
            Some(entry) => {
                let listeners: ListenerSnapshot = entry.values().cloned().collect();
                debug!("Found {} listeners for key '{}'", listeners.len(), key);
                listeners
            },
            None => {
                debug!("No listeners for key '{}'", key);
                SmallVec::new()
            }
        }
    }

    pub fn has_listeners(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Keys that currently have at least one listener
    pub fn keys(&self) -> Vec<Key> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of listeners registered for a key
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.get(key).map_or(0, |entry| entry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
