use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fd_lock::RwLock;
use log::{debug, info, warn};
use tempfile::NamedTempFile;
use tokio::sync::mpsc::UnboundedReceiver;
use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::medium::{check_quota, entry_size, BackingMedium, ChangeFeed};
use crate::storesync::types::{ChangeEvent, Key};

type Document = BTreeMap<Key, String>;

/// Durable medium kept as a JSON document `{ key: raw }` on disk.
///
/// Every operation goes back to the file, so several handles (in this or
/// other processes) may share one document. Each mutation loads, modifies and
/// saves the document under an exclusive lock on `<document>.lock`, then
/// replaces the file atomically through a unique temp file.
///
/// Edits made through other handles are not reported on `watch` until
/// `reload` runs.
pub struct FileMedium {
    path: PathBuf,
    quota: Option<usize>,
    state: Mutex<HandleState>,
    feed: ChangeFeed,
}

struct HandleState {
    lock_file: RwLock<File>,
    /// Document as this handle last saw it, used by `reload`
    last_seen: Document,
}

impl FileMedium {
    /// Opens (or creates) the document at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_quota(path, None)
    }

    pub fn open_with_quota<P: AsRef<Path>>(path: P, quota: Option<usize>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::new(
                        ErrorCode::MediumUnavailable,
                        format!("Failed to create directory {}: {}", parent.display(), e),
                    )
                })?;
            }
        }

        let lock_path = lock_path(&path);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                StoreError::new(
                    ErrorCode::MediumUnavailable,
                    format!("Failed to open lock file {}: {}", lock_path.display(), e),
                )
            })?;

        let document = load_document(&path)?;
        info!("Opened file medium {} with {} entries", path.display(), document.len());

        Ok(Self {
            path,
            quota,
            state: Mutex::new(HandleState {
                lock_file: RwLock::new(lock_file),
                last_seen: document,
            }),
            feed: ChangeFeed::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the document and reports entries changed by other handles
    /// since this handle last touched it. Returns the number of events emitted.
    pub fn reload(&self) -> Result<usize> {
        let events = self.reload_changes()?;
        for event in &events {
            self.feed.publish(event);
        }
        Ok(events.len())
    }

    /// Same diff as `reload`, returned instead of published on `watch`
    pub fn reload_changes(&self) -> Result<Vec<ChangeEvent>> {
        let current = load_document(&self.path)?;
        let mut state = self.state()?;
        let last_seen = &mut state.last_seen;

        let mut events = Vec::new();
        if current.is_empty() && !last_seen.is_empty() {
            events.push(ChangeEvent::cleared());
        } else {
            for (key, raw) in &current {
                if last_seen.get(key) != Some(raw) {
                    events.push(ChangeEvent::set(key.clone(), raw.clone()));
                }
            }
            for key in last_seen.keys() {
                if !current.contains_key(key) {
                    events.push(ChangeEvent::removed(key.clone()));
                }
            }
        }

        *last_seen = current;
        debug!("Reload of {} produced {} change events", self.path.display(), events.len());
        Ok(events)
    }

    fn state(&self) -> Result<MutexGuard<'_, HandleState>> {
        self.state.lock().map_err(|_| {
            StoreError::new(ErrorCode::MediumUnavailable, "File medium lock poisoned")
        })
    }

    /// Applies `change` to the on-disk document and persists it
    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Document) -> Result<()>,
    {
        let mut guard = self.state()?;
        let state = &mut *guard;
        let _exclusive = state.lock_file.write().map_err(|e| {
            StoreError::new(
                ErrorCode::MediumUnavailable,
                format!("Failed to lock {}: {}", self.path.display(), e),
            )
        })?;

        let mut document = load_document(&self.path)?;
        change(&mut document)?;
        save_document(&self.path, &document)?;
        state.last_seen = document;
        Ok(())
    }
}

impl BackingMedium for FileMedium {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let document = load_document(&self.path)?;
        Ok(document.get(key).cloned())
    }

    fn write(&self, key: &str, raw: &str) -> Result<()> {
        let quota = self.quota;
        self.update(|document| {
            let used = document.iter().map(|(k, v)| entry_size(k, v)).sum();
            check_quota(quota, used, key, document.get(key).map(String::as_str), raw)?;
            document.insert(key.to_string(), raw.to_string());
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|document| {
            document.remove(key);
            Ok(())
        })
    }

    fn delete_all(&self) -> Result<()> {
        self.update(|document| {
            document.clear();
            Ok(())
        })
    }

    fn keys(&self) -> Result<Vec<Key>> {
        Ok(load_document(&self.path)?.into_keys().collect())
    }

    fn watch(&self) -> UnboundedReceiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn load_document(path: &Path) -> Result<Document> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
        Err(e) => {
            return Err(StoreError::new(
                ErrorCode::ReadFailed,
                format!("Failed to read {}: {}", path.display(), e),
            ))
        }
    };

    if content.trim().is_empty() {
        return Ok(Document::new());
    }

    serde_json::from_str(&content).map_err(|e| {
        warn!("Document {} is corrupt: {}", path.display(), e);
        StoreError::new(
            ErrorCode::DecodeFailed,
            format!("Failed to parse {}: {}", path.display(), e),
        )
    })
}

fn save_document(path: &Path, document: &Document) -> Result<()> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| StoreError::new(ErrorCode::EncodeFailed, format!("Failed to encode document: {}", e)))?;

    let write_error = |e: &dyn std::fmt::Display| {
        StoreError::new(
            ErrorCode::WriteFailed,
            format!("Failed to write {}: {}", path.display(), e),
        )
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_error(&e))?;
    tmp.write_all(content.as_bytes()).map_err(|e| write_error(&e))?;
    tmp.persist(path).map_err(|e| write_error(&e.error))?;
    Ok(())
}
