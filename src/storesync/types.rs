use std::collections::HashMap;
use std::sync::Arc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Key = name of an entry in the backing medium
pub type Key = String;

/// Identifies one listener registration
pub type SubscriptionId = Uuid;

/// Callback invoked with the new value of a key, `None` meaning absent
pub type Listener = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Mapping: Key → registered listeners
pub type Subscriptions = DashMap<Key, HashMap<SubscriptionId, Listener>>;

/// Change made to the shared medium by another context.
///
/// `key == None` reports that the other context cleared the whole medium.
/// `new_value` carries the raw serialized value, `None` when the entry was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: Option<Key>,
    pub new_value: Option<String>,
}

impl ChangeEvent {
    pub fn set(key: impl Into<Key>, raw: impl Into<String>) -> Self {
        Self { key: Some(key.into()), new_value: Some(raw.into()) }
    }

    pub fn removed(key: impl Into<Key>) -> Self {
        Self { key: Some(key.into()), new_value: None }
    }

    pub fn cleared() -> Self {
        Self { key: None, new_value: None }
    }
}
