//! Key/value local storage backed by libSQL

use crate::error::Result;
use libsql::Connection;

use super::Database;

/// Browser-style `localStorage` over the `local_storage` table.
///
/// Values are opaque strings written whole; there are no partial updates.
#[derive(Clone)]
pub struct LocalStorage {
    conn: Connection,
}

impl LocalStorage {
    /// Create a storage handle sharing the database's connection
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection().clone(),
        }
    }

    /// Read the value stored under `key`
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM local_storage WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    /// Replace the value stored under `key`
    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO local_storage (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, now],
            )
            .await?;
        Ok(())
    }

    /// Remove `key`; absent keys are not an error
    pub async fn remove_item(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM local_storage WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    /// Read-modify-write `key` inside an immediate transaction
    ///
    /// `BEGIN IMMEDIATE` takes the write lock before reading, so writers on
    /// other connections to the same file wait instead of interleaving.
    /// `None` from `apply` removes the key.
    pub async fn update_item<F>(&self, key: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<String>) -> Result<Option<String>>,
    {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;

        if let Err(e) = self.apply_update(key, apply).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e);
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    async fn apply_update<F>(&self, key: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<String>) -> Result<Option<String>>,
    {
        let current = self.get_item(key).await?;
        match apply(current)? {
            Some(value) => self.set_item(key, &value).await,
            None => self.remove_item(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (Database, LocalStorage) {
        let db = Database::open_in_memory().await.unwrap();
        let storage = LocalStorage::new(&db);
        (db, storage)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_key_reads_none() {
        let (_db, storage) = setup().await;
        assert_eq!(storage.get_item("nope").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_overwrites_whole_value() {
        let (_db, storage) = setup().await;
        storage.set_item("k", "first").await.unwrap();
        storage.set_item("k", "second").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_item_rolls_back_on_error() {
        let (_db, storage) = setup().await;
        storage.set_item("k", "v").await.unwrap();

        let result = storage
            .update_item("k", |_| Err(crate::error::Error::InvalidInput("no".to_string())))
            .await;
        assert!(result.is_err());
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v"));

        storage
            .update_item("k", |current| Ok(current.map(|value| format!("{value}!"))))
            .await
            .unwrap();
        assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v!"));

        storage.update_item("k", |_| Ok(None)).await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_item_sees_writes_from_other_connections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("aido.db");
        let first_db = Database::open(&path).await.unwrap();
        let second_db = Database::open(&path).await.unwrap();
        let first = LocalStorage::new(&first_db);
        let second = LocalStorage::new(&second_db);

        first.set_item("k", "a").await.unwrap();
        second
            .update_item("k", |current| Ok(current.map(|value| format!("{value}b"))))
            .await
            .unwrap();
        first
            .update_item("k", |current| Ok(current.map(|value| format!("{value}c"))))
            .await
            .unwrap();

        assert_eq!(second.get_item("k").await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_is_idempotent() {
        let (_db, storage) = setup().await;
        storage.set_item("k", "v").await.unwrap();
        storage.remove_item("k").await.unwrap();
        storage.remove_item("k").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
    }
}
