//! Durable key-value media underneath the store.
//!
//! A medium stores raw serialized values under string keys and reports, through
//! its change-event channel, mutations made by *other* contexts sharing it.
//! Mutations made through a handle never echo back on that handle's channel.

pub mod file;
pub mod memory;
pub mod relay;

use std::sync::Mutex;

use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::types::{ChangeEvent, Key};

pub use file::FileMedium;
pub use memory::MemoryMedium;
pub use relay::RelayedMedium;

/// Synchronous string-keyed storage shared by one or more contexts
pub trait BackingMedium: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;

    fn write(&self, key: &str, raw: &str) -> Result<()>;

    /// Deleting a missing key succeeds
    fn delete(&self, key: &str) -> Result<()>;

    fn delete_all(&self) -> Result<()>;

    fn keys(&self) -> Result<Vec<Key>>;

    /// Opens a receiver for changes made by other contexts
    fn watch(&self) -> UnboundedReceiver<ChangeEvent>;
}

/// Fan-out of change events to every open watcher
#[derive(Default)]
pub struct ChangeFeed {
    senders: Mutex<Vec<UnboundedSender<ChangeEvent>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = unbounded_channel();
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }

    /// Sends to every live watcher, dropping the ones whose receiver is gone
    pub fn publish(&self, event: &ChangeEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        debug!("Published change for {:?} to {} watchers", event.key, senders.len());
    }

    pub fn watcher_count(&self) -> usize {
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Size an entry occupies against a quota
pub(crate) fn entry_size(key: &str, raw: &str) -> usize {
    key.len() + raw.len()
}

/// Fails with `QuotaExceeded` when replacing `previous` by `raw` under `key`
/// would push `used` past `quota`
pub(crate) fn check_quota(
    quota: Option<usize>,
    used: usize,
    key: &str,
    previous: Option<&str>,
    raw: &str,
) -> Result<()> {
    let Some(quota) = quota else {
        return Ok(());
    };

    let released = previous.map_or(0, |prev| entry_size(key, prev));
    let needed = used - released + entry_size(key, raw);
    if needed > quota {
        return Err(StoreError::new(
            ErrorCode::QuotaExceeded,
            format!("Writing key '{}' needs {} bytes, quota is {} bytes", key, needed, quota),
        ));
    }
    Ok(())
}
