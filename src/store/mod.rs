//! Persistent key store for dedup records.
//!
//! Maps dedup keys (`id:…`, `uh:…`, `ch:…`) to the record of the item that
//! produced them. Records survive restarts and are never deleted by the
//! crate; an item's status only moves from offered to posted.
//!
//! # Backends
//!
//! * [`json`]: a single JSON document `{"items": {key: record}}`, rewritten
//!   in full on every mutation.
//! * [`sqlite`]: an embedded database with per-key atomic upserts.
//!
//! Both implement [`KeyStore`], which is object safe so callers can share a
//! store as `Arc<dyn KeyStore>`.

pub mod json;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub use json::JsonKeyStore;
pub use sqlite::SqliteKeyStore;

/// All records, keyed by store key.
pub type StoreMap = BTreeMap<String, StoreRecord>;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The map could not be serialized.
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The embedded database reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored status or timestamp could not be interpreted.
    #[error("Invalid value in store for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Lifecycle of an item in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Shown to an operator, not yet published.
    #[default]
    Offered,
    /// Published.
    Posted,
}

impl RecordStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offered => "offered",
            Self::Posted => "posted",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "offered" => Ok(Self::Offered),
            "posted" => Ok(Self::Posted),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// What the store remembers about one item.
///
/// Field names are camelCase on disk. The time of the status change is kept
/// in `offeredAt` or `postedAt` depending on the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_date: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
}

impl StoreRecord {
    /// A record with `status` stamped at `at`.
    #[must_use]
    pub fn new(id: impl Into<String>, status: RecordStatus, at: DateTime<Utc>) -> Self {
        let (offered_at, posted_at) = match status {
            RecordStatus::Offered => (Some(at), None),
            RecordStatus::Posted => (None, Some(at)),
        };
        Self {
            id: id.into(),
            link: None,
            source: None,
            iso_date: None,
            status,
            offered_at,
            posted_at,
        }
    }

    /// When the current status was set, if known.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.status {
            RecordStatus::Offered => self.offered_at,
            RecordStatus::Posted => self.posted_at,
        }
    }
}

/// A persistent map from dedup key to record.
///
/// Implementations must make each method atomic with respect to other calls
/// on the same handle.
pub trait KeyStore: Send + Sync {
    /// The record stored under `key`.
    fn get(&self, key: &str) -> Result<Option<StoreRecord>, StoreError>;

    /// Whether `key` has a record.
    fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Store `record` under `key`, replacing any previous record.
    fn set(&self, key: &str, record: &StoreRecord) -> Result<(), StoreError> {
        self.set_many(&[key.to_string()], record)
    }

    /// Store `record` under every key in `keys` as one mutation.
    fn set_many(&self, keys: &[String], record: &StoreRecord) -> Result<(), StoreError>;

    /// Every record currently stored.
    fn snapshot(&self) -> Result<StoreMap, StoreError>;
}

/// Which [`KeyStore`] implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// [`JsonKeyStore`].
    #[default]
    Json,
    /// [`SqliteKeyStore`].
    Sqlite,
}

impl StoreBackend {
    /// File name used when no store path is configured.
    #[must_use]
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Json => "posted.json",
            Self::Sqlite => "posted.db",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Open the store at `path` with `backend`, shareable across threads.
///
/// A corrupt SQLite database is moved aside; a corrupt JSON file is read as
/// empty on first access.
pub fn open_store(backend: StoreBackend, path: &Path) -> Result<Arc<dyn KeyStore>, StoreError> {
    log::debug!("Opening {} store at {}", backend, path.display());
    let store: Arc<dyn KeyStore> = match backend {
        StoreBackend::Json => Arc::new(JsonKeyStore::new(path)),
        StoreBackend::Sqlite => Arc::new(SqliteKeyStore::open_or_recover(path)?),
    };
    Ok(store)
}

/// Lock a mutex, recovering the value if a previous holder panicked.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Store mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
