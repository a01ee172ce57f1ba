//! Process-local store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pipeline::{KeyValueStore, StoreError};

/// [`KeyValueStore`] held in memory. Nothing survives the process.
///
/// Used by `--ephemeral` runs and by tests across the workspace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock("contains").is_ok_and(|m| m.contains_key(key))
    }

    fn lock(
        &self,
        key: &str,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Io {
            key: key.to_string(),
            message: "memory store lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock(key)?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock(key)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock(key)?.remove(key);
        Ok(())
    }
}
