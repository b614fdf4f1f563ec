use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storesync::binding::KeyBinding;
use crate::storesync::medium::BackingMedium;
use crate::storesync::subscriptions::SubscriptionManager;
use crate::storesync::types::{ChangeEvent, Key, Listener, SubscriptionId};

/// Single gateway to a backing medium that keeps subscribers informed of
/// every change, whether made here or by another context sharing the medium.
///
/// Operations never fail towards the caller: medium and serialization errors
/// are logged and turn into a no-op (writes) or an absent value (reads).
/// A stored JSON `null` is indistinguishable from an absent entry.
pub struct ObservableStore {
    medium: Arc<dyn BackingMedium>,
    subscriptions: Arc<SubscriptionManager>,
    changes: Mutex<Option<UnboundedReceiver<ChangeEvent>>>,
}

impl ObservableStore {
    pub fn new(medium: Arc<dyn BackingMedium>) -> Self {
        let changes = medium.watch();
        info!("Observable store ready");
        Self {
            medium,
            subscriptions: Arc::new(SubscriptionManager::new()),
            changes: Mutex::new(Some(changes)),
        }
    }

    /// Current value of `key`, `None` when absent or unreadable
    pub fn get(&self, key: &str) -> Option<Value> {
        let raw = match self.medium.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("get '{}': absent", key);
                return None;
            },
            Err(e) => {
                error!("get '{}': failed to read from medium: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                error!("get '{}': stored value is not valid JSON: {}", key, e);
                None
            }
        }
    }

    /// Typed variant of `get`; a value of the wrong shape reads as absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                error!("get '{}': value does not match the requested type: {}", key, e);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys currently held by the medium
    pub fn keys(&self) -> Vec<Key> {
        self.medium.keys().unwrap_or_else(|e| {
            error!("keys: failed to list medium: {}", e);
            Vec::new()
        })
    }

    /// Persists `value` under `key`, then notifies the key's listeners with it
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                error!("set '{}': failed to serialize value: {}", key, e);
                return;
            }
        };
        let raw = match serde_json::to_string(&value) {
            Ok(raw) => raw,
            Err(e) => {
                error!("set '{}': failed to encode value: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.medium.write(key, &raw) {
            error!("set '{}': failed to write {}: {}", key, raw, e);
            return;
        }

        debug!("set '{}' = {}", key, raw);
        self.notify(key, present(&value));
    }

    /// Deletes `key`, then notifies its listeners with absent
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.medium.delete(key) {
            error!("remove '{}': failed to delete: {}", key, e);
            return;
        }

        debug!("removed '{}'", key);
        self.notify(key, None);
    }

    /// Deletes every entry, then notifies every subscribed key with absent
    pub fn clear(&self) {
        if let Err(e) = self.medium.delete_all() {
            error!("clear: failed to delete all entries: {}", e);
            return;
        }

        let keys = self.subscriptions.keys();
        info!("Cleared medium, notifying {} subscribed keys", keys.len());
        for key in keys {
            self.notify(&key, None);
        }
    }

    /// Registers `listener` for changes of `key`
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.subscriptions.subscribe(key, listener);
        Subscription {
            key: key.to_string(),
            id,
            registry: Arc::downgrade(&self.subscriptions),
            active: AtomicBool::new(true),
        }
    }

    /// Binds `key` to a value tracked through its notifications
    pub fn bind(self: &Arc<Self>, key: &str, initial: Option<Value>) -> KeyBinding {
        KeyBinding::new(self.clone(), key, initial)
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.subscriptions.listener_count(key)
    }

    /// Invokes every listener registered for `key` once
    pub(crate) fn notify(&self, key: &str, value: Option<&Value>) {
        // Snapshot first so listeners may re-enter the store
        let listeners = self.subscriptions.listeners_for_key(key);
        if listeners.is_empty() {
            return;
        }

        debug!("Notifying {} listeners of '{}'", listeners.len(), key);
        for listener in listeners {
            listener(value);
        }
    }

    /// Applies a change made by another context sharing the medium
    pub fn handle_change_event(&self, event: ChangeEvent) {
        let Some(key) = event.key else {
            let keys = self.subscriptions.keys();
            info!("Medium cleared by another context, notifying {} keys", keys.len());
            for key in keys {
                self.notify(&key, None);
            }
            return;
        };

        if !self.subscriptions.has_listeners(&key) {
            debug!("Ignoring external change of '{}' without listeners", key);
            return;
        }

        let value = match event.new_value {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("External change of '{}' carries invalid JSON, treating as absent: {}", key, e);
                    None
                }
            },
            None => None,
        };

        debug!("External change of '{}'", key);
        self.notify(&key, value.as_ref().and_then(present));
    }

    /// Handles every change event already queued, without waiting.
    /// Returns the number handled. Does nothing once the listener task owns the channel.
    pub fn process_pending_changes(&self) -> usize {
        let mut guard = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rx) = guard.as_mut() else {
            return 0;
        };

        let mut pending = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drop(guard);

        let count = pending.len();
        for event in pending {
            self.handle_change_event(event);
        }
        count
    }

    /// Moves change handling onto a task that runs until `shutdown` fires.
    /// Returns `None` if the channel was already taken by an earlier call.
    pub fn spawn_change_listener(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self.changes.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let store = self.clone();

        Some(tokio::spawn(async move {
            info!("Change listener started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => store.handle_change_event(event),
                        None => {
                            warn!("Change-event channel closed");
                            break;
                        }
                    },
                }
            }
            info!("Change listener stopped");
        }))
    }
}

fn present(value: &Value) -> Option<&Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

/// Registration handle returned by `ObservableStore::subscribe`.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe`.
pub struct Subscription {
    key: Key,
    id: SubscriptionId,
    registry: Weak<SubscriptionManager>,
    active: AtomicBool,
}

impl Subscription {
    /// Removes this registration. Further calls do nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
