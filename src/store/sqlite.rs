//! SQLite-backed key store.

use super::{acquire_lock, KeyStore, RecordStatus, StoreError, StoreMap, StoreRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS store_items (
    key TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    link TEXT,
    source TEXT,
    iso_date TEXT,
    status TEXT NOT NULL,
    offered_at TEXT,
    posted_at TEXT
)";

const SELECT_COLUMNS: &str =
    "SELECT key, id, link, source, iso_date, status, offered_at, posted_at FROM store_items";

/// Key store backed by an embedded SQLite database.
///
/// `set_many` upserts every key inside one transaction, so concurrent writers
/// (including other processes) never observe a half-written item.
///
/// # Concurrency Model
///
/// `rusqlite::Connection` is not `Sync`, so the connection sits behind a
/// mutex. WAL mode and a busy timeout handle contention with other processes.
#[derive(Debug)]
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteKeyStore {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened or is not
    /// a valid database.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// An in-memory store, gone when dropped.
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open the database at `path`, moving it aside and starting empty if it
    /// is corrupt.
    ///
    /// The corrupt file is renamed to `<name>.corrupt-<unix seconds>`.
    pub fn open_or_recover(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        match Self::new(&path) {
            Ok(store) => Ok(store),
            Err(StoreError::Database(e)) if path.exists() => {
                let quarantine = quarantine_path(&path);
                log::warn!(
                    "Store database {} is unusable ({}), moving it to {}",
                    path.display(),
                    e,
                    quarantine.display()
                );
                std::fs::rename(&path, &quarantine).map_err(|e| StoreError::io(&path, e))?;
                Self::new(path)
            }
            Err(e) => Err(e),
        }
    }

    /// Path of the database file, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let conn = acquire_lock(&self.conn);
        // journal_mode returns a row, so pragma_update errors are not fatal here.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        conn.execute(SCHEMA, [])?;
        Ok(())
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().timestamp()));
    path.with_file_name(name)
}

fn format_time(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(|t| t.to_rfc3339())
}

fn parse_time(key: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}

/// Raw column values of one row, decoded into a record afterwards so that
/// decoding errors can carry the key.
struct RecordRow {
    key: String,
    id: String,
    link: Option<String>,
    source: Option<String>,
    iso_date: Option<String>,
    status: String,
    offered_at: Option<String>,
    posted_at: Option<String>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            id: row.get(1)?,
            link: row.get(2)?,
            source: row.get(3)?,
            iso_date: row.get(4)?,
            status: row.get(5)?,
            offered_at: row.get(6)?,
            posted_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<(String, StoreRecord), StoreError> {
        let status: RecordStatus =
            self.status
                .parse()
                .map_err(|reason| StoreError::InvalidValue {
                    key: self.key.clone(),
                    reason,
                })?;
        let record = StoreRecord {
            id: self.id,
            link: self.link,
            source: self.source,
            iso_date: self.iso_date,
            status,
            offered_at: parse_time(&self.key, self.offered_at)?,
            posted_at: parse_time(&self.key, self.posted_at)?,
        };
        Ok((self.key, record))
    }
}

impl KeyStore for SqliteKeyStore {
    fn get(&self, key: &str) -> Result<Option<StoreRecord>, StoreError> {
        let conn = acquire_lock(&self.conn);
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE key = ?1"),
                params![key],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_record().map(|(_, record)| record))
            .transpose()
    }

    fn has(&self, key: &str) -> Result<bool, StoreError> {
        let conn = acquire_lock(&self.conn);
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM store_items WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn set_many(&self, keys: &[String], record: &StoreRecord) -> Result<(), StoreError> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO store_items (key, id, link, source, iso_date, status, offered_at, posted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(key) DO UPDATE SET
                    id = excluded.id,
                    link = excluded.link,
                    source = excluded.source,
                    iso_date = excluded.iso_date,
                    status = excluded.status,
                    offered_at = excluded.offered_at,
                    posted_at = excluded.posted_at",
            )?;
            for key in keys {
                stmt.execute(params![
                    key,
                    record.id,
                    record.link,
                    record.source,
                    record.iso_date,
                    record.status.as_str(),
                    format_time(record.offered_at),
                    format_time(record.posted_at),
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("Upserted {} keys for '{}'", keys.len(), record.id);
        Ok(())
    }

    fn snapshot(&self) -> Result<StoreMap, StoreError> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare(SELECT_COLUMNS)?;
        let rows = stmt.query_map([], RecordRow::from_row)?;

        let mut map = StoreMap::new();
        for row in rows {
            let (key, record) = row?.into_record()?;
            map.insert(key, record);
        }
        Ok(map)
    }
}
