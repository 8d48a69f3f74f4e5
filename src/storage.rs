//! Key-value persistence for exchange logs.
//!
//! [`MemoryStorage`] backs private contexts and tests; [`JsonFileStorage`]
//! keeps everything in one JSON object on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::utils::ensure_parent_dir;

#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// Every stored pair, ordered by key.
    async fn entries(&self) -> Result<Vec<(String, Value)>>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.items.write().await.clear();
        Ok(())
    }
}

/// A JSON object file, rewritten on every change.
pub struct JsonFileStorage {
    path: PathBuf,
    items: RwLock<BTreeMap<String, Value>>,
}

impl fmt::Debug for JsonFileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFileStorage").field("path", &self.path).finish()
    }
}

impl JsonFileStorage {
    /// Open `path`, starting empty when the file does not exist yet.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match tokio::fs::read(&path).await {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened log storage {} ({} entries)", path.display(), items.len());
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, items: &BTreeMap<String, Value>) -> Result<()> {
        ensure_parent_dir(&self.path)?;
        let data = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut items = self.items.write().await;
        items.insert(key.to_string(), value);
        self.flush(&items).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut items = self.items.write().await;
        if items.remove(key).is_some() {
            self.flush(&items).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut items = self.items.write().await;
        items.clear();
        self.flush(&items).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn memory_storage_basics() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").await.unwrap(), None);
        storage.set("b", json!(2)).await.unwrap();
        storage.set("a", json!({"x": 1})).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!({"x": 1})));

        let keys: Vec<String> = storage.entries().await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);

        storage.remove("a").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), None);
        storage.clear().await.unwrap();
        assert!(storage.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/logs.json");

        let storage = JsonFileStorage::open(&path).await.unwrap();
        assert!(storage.entries().await.unwrap().is_empty());
        storage.set("psshhttps://a.example", json!({"type": "WIDEVINE"})).await.unwrap();
        storage.set("gone", json!(null)).await.unwrap();
        storage.remove("gone").await.unwrap();
        drop(storage);

        let reopened = JsonFileStorage::open(&path).await.unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(
            reopened.get("psshhttps://a.example").await.unwrap(),
            Some(json!({"type": "WIDEVINE"}))
        );
        assert_eq!(reopened.get("gone").await.unwrap(), None);

        reopened.clear().await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "{}");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(JsonFileStorage::open(&path).await.is_err());
    }
}
