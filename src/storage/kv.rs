//! Size-capped key-value file store with in-memory caching.
//!
//! Each key is one file holding one string value. The sum of all value
//! lengths may not exceed the configured quota, mirroring the hard ceiling of
//! a browser-style key-value store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Result, StoreError};

/// Key-value store persisted as one file per key.
pub struct KvStore {
    base_path: PathBuf,
    quota_bytes: usize,
    cache: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("base_path", &self.base_path)
            .field("quota_bytes", &self.quota_bytes)
            .finish_non_exhaustive()
    }
}

impl KvStore {
    /// Open (or create) a store rooted at `base_path`, loading every existing key.
    pub fn open(base_path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let mut entries = HashMap::new();
        for entry in fs::read_dir(&base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                entries.insert(key.to_string(), fs::read_to_string(&path)?);
            }
        }

        log::debug!("Opened key-value store at {} ({} keys)", base_path.display(), entries.len());
        Ok(Self {
            base_path,
            quota_bytes,
            cache: RwLock::new(entries),
        })
    }

    /// Get the file path for a key.
    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let cache = self.cache.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(cache.get(key).cloned())
    }

    /// Store a value, refusing writes that would exceed the quota.
    pub fn set_item(&self, key: &str, value: String) -> Result<()> {
        let mut cache = self.cache.write().map_err(|e| StoreError::Storage(e.to_string()))?;

        let others: usize = cache.iter().filter(|(k, _)| k.as_str() != key).map(|(_, v)| v.len()).sum();
        let needed = others + value.len();
        if needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed_kb: needed as f64 / 1024.0,
                limit_kb: self.quota_bytes as f64 / 1024.0,
            });
        }

        // Write to a sibling file first so a crash never leaves a half-written value
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &value)?;
        fs::rename(&tmp, &path)?;

        cache.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        if cache.remove(key).is_some() {
            let path = self.key_path(key);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Length of the stored value in bytes (0 if absent)
    pub fn item_len(&self, key: &str) -> usize {
        self.cache
            .read()
            .map(|cache| cache.get(key).map_or(0, String::len))
            .unwrap_or(0)
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }
}
