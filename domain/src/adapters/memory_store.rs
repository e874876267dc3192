use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CoreError, KeyValueStore};

/// Map-backed store with Redis-like semantics. Every operation, `increment`
/// included, runs under one mutex, which makes the counter atomic.
pub struct InMemoryStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::StorageUnavailable("mutex poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, CoreError> {
        let mut map = self.lock()?;
        let current = match map.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                CoreError::StorageUnavailable("value is not an integer or out of range".into())
            })?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| CoreError::StorageUnavailable("increment would overflow".into()))?;
        map.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| {
            CoreError::StorageUnavailable(format!("invalid key pattern {pattern:?}: {e}"))
        })?;
        Ok(self
            .lock()?
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.lock().map(|_| ())
    }
}
