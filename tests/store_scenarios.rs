//! End-to-end scenarios for the store over the bundled media

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use storesync::{BackingMedium, ChangeEvent, ErrorCode, FileMedium, MemoryMedium, ObservableStore, Result};
use tokio::sync::mpsc::UnboundedReceiver;

type Calls = Arc<Mutex<Vec<Option<Value>>>>;

fn record(store: &ObservableStore, key: &str) -> (Calls, storesync::Subscription) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let subscription = store.subscribe(key, move |value| sink.lock().unwrap().push(value.cloned()));
    (calls, subscription)
}

#[test]
fn selection_persists_across_store_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selection.json");

    {
        let store = ObservableStore::new(Arc::new(FileMedium::open(&path).unwrap()));
        store.set("user", &json!({"name": "Ada", "company": {"name": "Analytical"}}));
        store.set("post", &json!({"id": 1, "title": "Notes"}));
        store.remove("post");
    }

    let store = ObservableStore::new(Arc::new(FileMedium::open(&path).unwrap()));
    assert_eq!(store.get("user"), Some(json!({"name": "Ada", "company": {"name": "Analytical"}})));
    assert_eq!(store.get("post"), None);
    assert_eq!(store.keys(), vec!["user".to_string()]);
}

#[test]
fn two_tabs_observe_each_other() {
    let tab_a = Arc::new(MemoryMedium::new());
    let tab_b = Arc::new(tab_a.context());
    let store_a = ObservableStore::new(tab_a);
    let store_b = ObservableStore::new(tab_b);

    let (seen_by_a, _sa) = record(&store_a, "user");
    let (seen_by_b, _sb) = record(&store_b, "user");

    store_b.set("user", &json!({"name": "Ada"}));
    // the writer hears its own write synchronously
    assert_eq!(*seen_by_b.lock().unwrap(), vec![Some(json!({"name": "Ada"}))]);
    // the other tab hears it once its change events are pumped
    assert!(seen_by_a.lock().unwrap().is_empty());
    store_a.process_pending_changes();
    assert_eq!(*seen_by_a.lock().unwrap(), vec![Some(json!({"name": "Ada"}))]);
    assert_eq!(store_a.get("user"), Some(json!({"name": "Ada"})));

    store_a.remove("user");
    store_b.process_pending_changes();
    assert_eq!(seen_by_b.lock().unwrap().last().cloned(), Some(None));
    assert_eq!(store_b.get("user"), None);
}

#[tokio::test]
async fn change_listener_task_delivers_and_stops() {
    let tab_a = Arc::new(MemoryMedium::new());
    let tab_b = Arc::new(tab_a.context());
    let store_a = Arc::new(ObservableStore::new(tab_a));
    let store_b = ObservableStore::new(tab_b);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = store_a.subscribe("theme", move |value| {
        let _ = tx.send(value.cloned());
    });

    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = store_a.spawn_change_listener(shutdown.clone()).unwrap();
    assert!(store_a.spawn_change_listener(shutdown.clone()).is_none());

    store_b.set("theme", &"dark");
    let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert_eq!(received, Some(Some(json!("dark"))));

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(store_a.process_pending_changes(), 0);
}

/// Medium that fails every mutation
struct BrokenMedium;

impl BackingMedium for BrokenMedium {
    fn read(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn write(&self, key: &str, _raw: &str) -> Result<()> {
        Err(storesync::StoreError::new(ErrorCode::QuotaExceeded, format!("no room for {}", key)))
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Err(storesync::StoreError::new(ErrorCode::MediumUnavailable, "gone"))
    }

    fn delete_all(&self) -> Result<()> {
        Err(storesync::StoreError::new(ErrorCode::MediumUnavailable, "gone"))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Err(storesync::StoreError::new(ErrorCode::MediumUnavailable, "gone"))
    }

    fn watch(&self) -> UnboundedReceiver<ChangeEvent> {
        tokio::sync::mpsc::unbounded_channel().1
    }
}

#[test]
fn failing_medium_never_notifies_or_panics() {
    let store = ObservableStore::new(Arc::new(BrokenMedium));
    let (calls, _sub) = record(&store, "user");

    store.set("user", &json!({"name": "Ada"}));
    store.remove("user");
    store.clear();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(store.get("user"), None);
    assert!(store.keys().is_empty());
}

#[test]
fn binding_follows_other_writers() {
    let store = Arc::new(ObservableStore::new(Arc::new(MemoryMedium::new())));
    let user = store.bind("user", None);
    assert_eq!(user.current(), None);

    store.set("user", &json!({"name": "Ada"}));
    assert_eq!(user.current(), Some(json!({"name": "Ada"})));

    store.clear();
    assert_eq!(user.current(), None);
}

#[test]
fn quota_overflow_leaves_value_and_listeners_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(FileMedium::open_with_quota(dir.path().join("small.json"), Some(32)).unwrap());
    let store = ObservableStore::new(medium.clone());
    let (calls, _sub) = record(&store, "note");

    store.set("note", &"short");
    store.set("note", &"x".repeat(64));

    // the oversized write is refused: the old value stays, nobody hears about it
    assert_eq!(store.get("note"), Some(json!("short")));
    assert_eq!(*calls.lock().unwrap(), vec![Some(json!("short"))]);
    let err = medium.write("note", &format!("\"{}\"", "x".repeat(64))).unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuotaExceeded);
}

#[test]
fn quota_overflow_is_not_seen_by_other_tabs() {
    let tab_a = Arc::new(MemoryMedium::with_quota(16));
    let tab_b = Arc::new(tab_a.context());
    let store_a = ObservableStore::new(tab_a);
    let store_b = ObservableStore::new(tab_b);
    let (seen_by_b, _sb) = record(&store_b, "draft");

    store_a.set("draft", &"a fairly long draft text");
    assert_eq!(store_b.process_pending_changes(), 0);
    assert!(seen_by_b.lock().unwrap().is_empty());
    assert_eq!(store_a.get("draft"), None);
}
