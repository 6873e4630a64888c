//! Storage backends for the persisted queue

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::LocalStorage;
use crate::error::{Error, Result};

/// Durable string storage addressed by fixed keys.
///
/// Every write replaces the whole value stored under a key. Several handles,
/// possibly in different processes, may share one store.
#[allow(async_fn_in_trait)]
pub trait QueueStore {
    /// Read the value under `key`
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Erase `key`
    async fn erase(&self, key: &str) -> Result<()>;

    /// Replace the value under `key` with `apply(current)` as one atomic step.
    ///
    /// `None` erases the key. No other writer can change the value between
    /// the read and the write; an error from `apply` leaves it untouched.
    async fn update<F>(&self, key: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<String>) -> Result<Option<String>>;
}

impl QueueStore for LocalStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.get_item(key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.set_item(key, value).await
    }

    async fn erase(&self, key: &str) -> Result<()> {
        self.remove_item(key).await
    }

    async fn update<F>(&self, key: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<String>) -> Result<Option<String>>,
    {
        self.update_item(key, apply).await
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, e.g. to simulate state left by an earlier run.
    pub fn with_item(self, key: &str, value: &str) -> Self {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.to_string(), value.to_string());
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.items
            .lock()
            .map_err(|error| Error::Database(format!("memory store poisoned: {error}")))
    }
}

impl QueueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn erase(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn update<F>(&self, key: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<String>) -> Result<Option<String>>,
    {
        let mut items = self.lock()?;
        match apply(items.get(key).cloned())? {
            Some(value) => {
                items.insert(key.to_string(), value);
            }
            None => {
                items.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.write("k", "v").await.unwrap();
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some("v"));
        store.erase("k").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.write("k", "v").await.unwrap();
        assert_eq!(other.read("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn memory_store_update_erases_and_keeps_value_on_error() {
        let store = MemoryStore::new().with_item("k", "v");

        let failed = store
            .update("k", |_| Err(Error::InvalidInput("rejected".to_string())))
            .await;
        assert!(failed.is_err());
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some("v"));

        store
            .update("k", |current| Ok(current.map(|value| format!("{value}v"))))
            .await
            .unwrap();
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some("vv"));

        store.update("k", |_| Ok(None)).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_storage_implements_queue_store() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStorage::new(&db);
        store.write("k", "v").await.unwrap();
        assert_eq!(QueueStore::read(&store, "k").await.unwrap().as_deref(), Some("v"));
        store.erase("k").await.unwrap();
        assert_eq!(QueueStore::read(&store, "k").await.unwrap(), None);
    }
}
