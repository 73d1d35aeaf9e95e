//! JSON-file key store.

use super::{acquire_lock, KeyStore, StoreError, StoreMap, StoreRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// On-disk envelope: `{"items": {key: record}}`.
#[derive(Debug, Serialize)]
struct StoreFile<'a> {
    items: &'a StoreMap,
}

/// Lenient reading shape. Records are decoded one by one so a single bad
/// entry does not discard the rest.
#[derive(Debug, Default, Deserialize)]
struct RawStoreFile {
    #[serde(default)]
    items: BTreeMap<String, serde_json::Value>,
}

/// Key store backed by a single JSON document.
///
/// Every mutation reloads the file, applies the change and rewrites the whole
/// document through a temporary sibling file that is then renamed over the
/// original. Mutations through one handle are serialized by an internal lock,
/// so sessions sharing the handle never lose each other's keys. Separate
/// processes writing the same file are not coordinated.
#[derive(Debug)]
pub struct JsonKeyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole map.
    ///
    /// Never fails: a missing, empty or unparsable file reads as an empty
    /// map, and unreadable entries are skipped. Problems are logged.
    pub fn load(&self) -> StoreMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Store file {} does not exist yet", self.path.display());
                return StoreMap::new();
            }
            Err(e) => {
                log::warn!("Failed to read store {}: {}", self.path.display(), e);
                return StoreMap::new();
            }
        };
        if raw.trim().is_empty() {
            return StoreMap::new();
        }

        let file: RawStoreFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                log::warn!(
                    "Store {} is corrupted, starting empty: {}",
                    self.path.display(),
                    e
                );
                return StoreMap::new();
            }
        };

        let mut map = StoreMap::new();
        for (key, value) in file.items {
            if value.is_null() {
                continue;
            }
            match serde_json::from_value::<StoreRecord>(value) {
                Ok(record) => {
                    map.insert(key, record);
                }
                Err(e) => log::warn!("Skipping unreadable store entry '{key}': {e}"),
            }
        }
        log::debug!("Loaded {} keys from {}", map.len(), self.path.display());
        map
    }

    /// Rewrite the whole file with `map`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory, temporary file or rename
    /// fails.
    pub fn save(&self, map: &StoreMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(&StoreFile { items: map })?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| StoreError::io(&tmp, e))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        log::debug!("Saved {} keys to {}", map.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("store.json"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl KeyStore for JsonKeyStore {
    fn get(&self, key: &str) -> Result<Option<StoreRecord>, StoreError> {
        let _guard = acquire_lock(&self.lock);
        Ok(self.load().remove(key))
    }

    fn set_many(&self, keys: &[String], record: &StoreRecord) -> Result<(), StoreError> {
        let _guard = acquire_lock(&self.lock);
        let mut map = self.load();
        for key in keys {
            map.insert(key.clone(), record.clone());
        }
        self.save(&map)
    }

    fn snapshot(&self) -> Result<StoreMap, StoreError> {
        let _guard = acquire_lock(&self.lock);
        Ok(self.load())
    }
}
