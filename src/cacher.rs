//! Keyed snapshot store for model and optimizer state
//!
//! Used by the learning-rate finder to back up the pre-search state and roll
//! back to it when a trial is pruned. Snapshots live either in memory or as
//! JSON files under a caller-supplied directory.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

enum Backend {
    Memory(HashMap<String, serde_json::Value>),
    Disk { dir: PathBuf },
}

/// Snapshot store with an in-memory or on-disk backend
pub struct StateCacher {
    backend: Backend,
}

impl StateCacher {
    /// Keep snapshots in process memory
    pub fn in_memory() -> Self {
        Self { backend: Backend::Memory(HashMap::new()) }
    }

    /// Keep snapshots as JSON files under `dir` (created if missing)
    pub fn on_disk(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { backend: Backend::Disk { dir } })
    }

    /// Store a snapshot under `key`, replacing any previous one
    pub fn store<T: Serialize>(&mut self, key: &str, state: &T) -> Result<()> {
        let value = serde_json::to_value(state)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        match &mut self.backend {
            Backend::Memory(map) => {
                map.insert(key.to_string(), value);
            }
            Backend::Disk { dir } => {
                let data = serde_json::to_string(&value)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                fs::write(Self::entry_path(dir, key), data)?;
            }
        }
        Ok(())
    }

    /// Retrieve the snapshot stored under `key`.
    ///
    /// Non-consuming: a search loop may roll back to the same snapshot once
    /// per pruned trial. Use [`StateCacher::remove`] or
    /// [`StateCacher::clear`] to drop entries.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = match &self.backend {
            Backend::Memory(map) => map
                .get(key)
                .cloned()
                .ok_or_else(|| Error::CacheMiss(key.to_string()))?,
            Backend::Disk { dir } => {
                let path = Self::entry_path(dir, key);
                if !path.exists() {
                    return Err(Error::CacheMiss(key.to_string()));
                }
                let data = fs::read_to_string(path)?;
                serde_json::from_str(&data)
                    .map_err(|e| Error::Serialization(e.to_string()))?
            }
        };
        serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Whether a snapshot exists under `key`
    pub fn contains(&self, key: &str) -> bool {
        match &self.backend {
            Backend::Memory(map) => map.contains_key(key),
            Backend::Disk { dir } => Self::entry_path(dir, key).exists(),
        }
    }

    /// Drop the snapshot under `key`; returns whether one existed
    pub fn remove(&mut self, key: &str) -> bool {
        match &mut self.backend {
            Backend::Memory(map) => map.remove(key).is_some(),
            Backend::Disk { dir } => {
                let path = Self::entry_path(dir, key);
                path.exists() && fs::remove_file(path).is_ok()
            }
        }
    }

    /// Drop every stored snapshot
    pub fn clear(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Memory(map) => map.clear(),
            Backend::Disk { dir } => {
                for entry in fs::read_dir(&*dir)? {
                    let path = entry?.path();
                    if path.extension().is_some_and(|e| e == "json") {
                        fs::remove_file(path)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn entry_path(dir: &PathBuf, key: &str) -> PathBuf {
        dir.join(format!("{key}.json"))
    }
}
