use chrono::Utc;
use std::fs;
use tempfile::tempdir;
use uniqpost::store::{
    open_store, JsonKeyStore, KeyStore, RecordStatus, SqliteKeyStore, StoreBackend, StoreRecord,
};

#[test]
fn test_json_garbage_reads_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.json");
    fs::write(&path, "{ this is not json").unwrap();

    let store = JsonKeyStore::new(&path);
    assert!(store.load().is_empty());
    assert!(!store.has("id:x").unwrap());

    // The next write replaces the corrupt file with a valid one.
    store
        .set("id:x", &StoreRecord::new("x", RecordStatus::Offered, Utc::now()))
        .unwrap();
    assert!(JsonKeyStore::new(&path).has("id:x").unwrap());
}

#[test]
fn test_json_empty_file_reads_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.json");
    fs::write(&path, "   \n").unwrap();
    assert!(JsonKeyStore::new(&path).load().is_empty());
}

#[test]
fn test_json_bad_entries_are_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.json");
    fs::write(
        &path,
        r#"{"items": {
            "id:good": {"id": "good", "status": "posted"},
            "id:null": null,
            "id:bad": {"id": "bad", "status": "archived"},
            "id:worse": 42
        }}"#,
    )
    .unwrap();

    let map = JsonKeyStore::new(&path).load();
    assert_eq!(map.len(), 1);
    assert_eq!(map["id:good"].status, RecordStatus::Posted);
}

#[test]
fn test_json_missing_items_reads_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.json");
    fs::write(&path, "{}").unwrap();
    assert!(JsonKeyStore::new(&path).load().is_empty());
}

#[test]
fn test_corrupt_sqlite_is_moved_aside() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.db");
    fs::write(&path, "this is not a database ".repeat(300)).unwrap();

    let store = SqliteKeyStore::open_or_recover(&path).unwrap();
    assert!(store.snapshot().unwrap().is_empty());
    store
        .set("id:y", &StoreRecord::new("y", RecordStatus::Posted, Utc::now()))
        .unwrap();

    let quarantined: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("posted.db.corrupt-")
        })
        .collect();
    assert_eq!(quarantined.len(), 1);
}

#[test]
fn test_open_store_recovers_sqlite() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("posted.db");
    fs::write(&path, "garbage ".repeat(1000)).unwrap();

    let store = open_store(StoreBackend::Sqlite, &path).unwrap();
    assert!(!store.has("id:z").unwrap());
}
