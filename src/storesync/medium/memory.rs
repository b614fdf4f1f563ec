use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use log::{debug, info};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;
use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::medium::{check_quota, entry_size, BackingMedium, ChangeFeed};
use crate::storesync::types::{ChangeEvent, Key};

/// Storage area shared by every context handle
struct SharedArea {
    entries: RwLock<BTreeMap<Key, String>>,
    quota: Option<usize>,
    available: AtomicBool,
    feeds: DashMap<Uuid, Arc<ChangeFeed>>,
}

/// In-memory medium shared between contexts of one process.
///
/// Each handle is one context. A mutation through a handle fires change
/// events on every other handle, the way tabs observe each other's writes
/// to a shared local storage area.
pub struct MemoryMedium {
    area: Arc<SharedArea>,
    context_id: Uuid,
    feed: Arc<ChangeFeed>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Medium whose entries (key + raw value bytes) may not exceed `quota` bytes
    pub fn with_quota(quota: usize) -> Self {
        Self::build(Some(quota))
    }

    fn build(quota: Option<usize>) -> Self {
        let area = Arc::new(SharedArea {
            entries: RwLock::new(BTreeMap::new()),
            quota,
            available: AtomicBool::new(true),
            feeds: DashMap::new(),
        });
        Self::attach(area)
    }

    fn attach(area: Arc<SharedArea>) -> Self {
        let context_id = Uuid::new_v4();
        let feed = Arc::new(ChangeFeed::new());
        area.feeds.insert(context_id, feed.clone());
        debug!("Attached memory medium context {}", context_id);
        Self { area, context_id, feed }
    }

    /// Opens another context on the same storage area
    pub fn context(&self) -> Self {
        Self::attach(self.area.clone())
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Simulates the medium becoming unreachable (or reachable again) for every context
    pub fn set_available(&self, available: bool) {
        info!("Memory medium availability set to {}", available);
        self.area.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.area.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::new(ErrorCode::MediumUnavailable, "Memory medium is unavailable"))
        }
    }

    fn lock_error() -> StoreError {
        StoreError::new(ErrorCode::MediumUnavailable, "Memory medium lock poisoned")
    }

    /// Delivers a change to every context except this one
    fn announce(&self, event: ChangeEvent) {
        for entry in self.area.feeds.iter() {
            if *entry.key() != self.context_id {
                entry.value().publish(&event);
            }
        }
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryMedium {
    fn drop(&mut self) {
        self.area.feeds.remove(&self.context_id);
        debug!("Detached memory medium context {}", self.context_id);
    }
}

impl BackingMedium for MemoryMedium {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        let entries = self.area.entries.read().map_err(|_| Self::lock_error())?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, raw: &str) -> Result<()> {
        self.ensure_available()?;
        {
            let mut entries = self.area.entries.write().map_err(|_| Self::lock_error())?;
            let used = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
            check_quota(self.area.quota, used, key, entries.get(key).map(String::as_str), raw)?;
            entries.insert(key.to_string(), raw.to_string());
        }
        self.announce(ChangeEvent::set(key, raw));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        let existed = {
            let mut entries = self.area.entries.write().map_err(|_| Self::lock_error())?;
            entries.remove(key).is_some()
        };
        // Other contexts only hear about deletions that changed something
        if existed {
            self.announce(ChangeEvent::removed(key));
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.ensure_available()?;
        let had_entries = {
            let mut entries = self.area.entries.write().map_err(|_| Self::lock_error())?;
            let had_entries = !entries.is_empty();
            entries.clear();
            had_entries
        };
        if had_entries {
            self.announce(ChangeEvent::cleared());
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<Key>> {
        self.ensure_available()?;
        let entries = self.area.entries.read().map_err(|_| Self::lock_error())?;
        Ok(entries.keys().cloned().collect())
    }

    fn watch(&self) -> UnboundedReceiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_share_entries() {
        let tab_a = MemoryMedium::new();
        let tab_b = tab_a.context();

        tab_a.write("user", r#"{"name":"Ada"}"#).unwrap();
        assert_eq!(tab_b.read("user").unwrap().as_deref(), Some(r#"{"name":"Ada"}"#));
        assert_eq!(tab_b.keys().unwrap(), vec!["user".to_string()]);
    }

    #[test]
    fn change_events_skip_the_writing_context() {
        let tab_a = MemoryMedium::new();
        let tab_b = tab_a.context();
        let mut events_a = tab_a.watch();
        let mut events_b = tab_b.watch();

        tab_a.write("post", "1").unwrap();
        tab_a.delete("post").unwrap();
        tab_a.delete("post").unwrap();

        assert_eq!(events_b.try_recv().unwrap(), ChangeEvent::set("post", "1"));
        assert_eq!(events_b.try_recv().unwrap(), ChangeEvent::removed("post"));
        assert!(events_b.try_recv().is_err());
        assert!(events_a.try_recv().is_err());
    }

    #[test]
    fn clear_fires_keyless_event() {
        let tab_a = MemoryMedium::new();
        let tab_b = tab_a.context();
        let mut events_a = tab_a.watch();

        tab_b.write("k", "true").unwrap();
        tab_b.delete_all().unwrap();

        assert_eq!(events_a.try_recv().unwrap(), ChangeEvent::set("k", "true"));
        assert_eq!(events_a.try_recv().unwrap(), ChangeEvent::cleared());
        assert!(tab_a.read("k").unwrap().is_none());
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let medium = MemoryMedium::with_quota(8);
        medium.write("k", "1234").unwrap();
        let err = medium.write("other", "1234").unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuotaExceeded);
        assert!(medium.read("other").unwrap().is_none());
    }

    #[test]
    fn unavailable_medium_fails_every_operation() {
        let medium = MemoryMedium::new();
        medium.set_available(false);
        assert_eq!(medium.read("k").unwrap_err().code(), ErrorCode::MediumUnavailable);
        assert_eq!(medium.write("k", "1").unwrap_err().code(), ErrorCode::MediumUnavailable);
        assert_eq!(medium.delete_all().unwrap_err().code(), ErrorCode::MediumUnavailable);
        medium.set_available(true);
        assert!(medium.read("k").unwrap().is_none());
    }

    #[test]
    fn dropped_context_stops_receiving() {
        let tab_a = MemoryMedium::new();
        let tab_b = tab_a.context();
        drop(tab_b);
        tab_a.write("k", "1").unwrap();
        assert_eq!(tab_a.area.feeds.len(), 1);
    }
}
