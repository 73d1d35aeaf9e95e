use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use uniqpost::store::{
    open_store, JsonKeyStore, KeyStore, RecordStatus, SqliteKeyStore, StoreBackend, StoreRecord,
};

fn record(id: &str, status: RecordStatus) -> StoreRecord {
    let at = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();
    StoreRecord::new(id, status, at)
}

fn exercise(store: &dyn KeyStore) {
    assert!(!store.has("id:a").unwrap());
    assert_eq!(store.get("id:a").unwrap(), None);

    let offered = record("a", RecordStatus::Offered);
    store
        .set_many(&["id:a".to_string(), "uh:1".to_string()], &offered)
        .unwrap();
    assert!(store.has("id:a").unwrap());
    assert!(store.has("uh:1").unwrap());
    assert_eq!(store.get("uh:1").unwrap(), Some(offered));

    let posted = record("a", RecordStatus::Posted);
    store.set("id:a", &posted).unwrap();
    assert_eq!(store.get("id:a").unwrap().unwrap().status, RecordStatus::Posted);
    // Keys written separately keep their own record.
    assert_eq!(store.get("uh:1").unwrap().unwrap().status, RecordStatus::Offered);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(
        snapshot.keys().cloned().collect::<Vec<_>>(),
        vec!["id:a".to_string(), "uh:1".to_string()]
    );
}

#[test]
fn test_json_store_contract() {
    let dir = tempdir().unwrap();
    exercise(&JsonKeyStore::new(dir.path().join("posted.json")));
}

#[test]
fn test_sqlite_store_contract() {
    let dir = tempdir().unwrap();
    exercise(&SqliteKeyStore::new(dir.path().join("posted.db")).unwrap());
    exercise(&SqliteKeyStore::in_memory().unwrap());
}

#[test]
fn test_json_file_shape() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.json");
    let store = JsonKeyStore::new(&path);
    let mut rec = record("https://e.com/1", RecordStatus::Posted);
    rec.link = Some("https://e.com/1".into());
    store.set("id:https://e.com/1", &rec).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entry = &value["items"]["id:https://e.com/1"];
    assert_eq!(entry["status"], "posted");
    assert_eq!(entry["link"], "https://e.com/1");
    assert_eq!(entry["postedAt"], "2024-04-01T10:00:00Z");
    assert!(!dir.path().join("posted.json.tmp").exists());
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    for backend in [StoreBackend::Json, StoreBackend::Sqlite] {
        let path = dir.path().join(backend.default_file_name());
        {
            let store = open_store(backend, &path).unwrap();
            store.set("ch:abc", &record("x", RecordStatus::Offered)).unwrap();
        }
        let reopened = open_store(backend, &path).unwrap();
        assert!(reopened.has("ch:abc").unwrap(), "{backend} lost a key");
    }
}

#[test]
fn test_store_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let json = JsonKeyStore::new(dir.path().join("a/b/posted.json"));
    json.set("id:1", &record("1", RecordStatus::Offered)).unwrap();
    assert!(dir.path().join("a/b/posted.json").exists());

    let sqlite = SqliteKeyStore::new(dir.path().join("c/d/posted.db")).unwrap();
    sqlite.set("id:1", &record("1", RecordStatus::Offered)).unwrap();
    assert!(dir.path().join("c/d/posted.db").exists());
}

#[test]
fn test_shared_handle_loses_no_writes() {
    let dir = tempdir().unwrap();
    for backend in [StoreBackend::Json, StoreBackend::Sqlite] {
        let path = dir.path().join(format!("shared-{}", backend.default_file_name()));
        let store: Arc<dyn KeyStore> = open_store(backend, &path).unwrap();

        let handles: Vec<_> = (0..6)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..5 {
                        let key = format!("id:{t}-{i}");
                        store.set(&key, &record(&key, RecordStatus::Offered)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.snapshot().unwrap().len(), 30, "{backend}");
    }
}
