use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::Digest;
use tokio::sync::RwLock;

/// The single key the serialized spec payload lives under.
pub const CACHE_KEY: &str = "flagsync.cache";

/// Bookkeeping stored next to each cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub hash: String,
    pub written_at: String,
}

impl Meta {
    fn for_content(content: &str) -> Self {
        let mut hasher = sha1::Sha1::new();
        hasher.update(content.as_bytes());
        Self {
            hash: format!("{:x}", hasher.finalize()),
            written_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Externally supplied key-value store used to warm-start the client without
/// a network round trip. Implementations must be thread-safe.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str) -> Result<(), String>;

    async fn get_meta(&self, key: &str) -> Option<Meta>;

    /// Whether the background config poll should read from this store
    /// instead of the network (a shared store another writer keeps fresh).
    fn supports_polling(&self) -> bool {
        false
    }
}

/// In-memory adapter backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryDataStore {
    data: RwLock<HashMap<String, (String, Meta)>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn get(&self, key: &str) -> Option<String> {
        let data = self.data.read().await;
        data.get(key).map(|(content, _)| content.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), (value.to_string(), Meta::for_content(value)));
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Option<Meta> {
        let data = self.data.read().await;
        data.get(key).map(|(_, meta)| meta.clone())
    }
}

/// Persistent adapter backed by sled.
pub struct SledDataStore {
    db: sled::Db,
}

impl SledDataStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: &str) -> Result<Self, String> {
        let db = sled::open(data_dir).map_err(|e| format!("failed to open sled db: {}", e))?;
        Ok(Self::new(db))
    }

    fn value_key(key: &str) -> String {
        format!("specs:{}", key)
    }

    fn meta_key(key: &str) -> String {
        format!("meta:{}", key)
    }
}

#[async_trait]
impl DataStore for SledDataStore {
    async fn get(&self, key: &str) -> Option<String> {
        let ivec = self.db.get(Self::value_key(key)).ok()??;
        String::from_utf8(ivec.to_vec()).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let meta = Meta::for_content(value);
        let meta_bytes =
            serde_json::to_vec(&meta).map_err(|e| format!("failed to serialize meta: {}", e))?;

        self.db
            .insert(Self::value_key(key), value.as_bytes())
            .map_err(|e| format!("failed to store value: {}", e))?;

        self.db
            .insert(Self::meta_key(key), meta_bytes)
            .map_err(|e| format!("failed to store meta: {}", e))?;

        self.db
            .flush()
            .map_err(|e| format!("failed to flush: {}", e))?;

        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Option<Meta> {
        let ivec = self.db.get(Self::meta_key(key)).ok()??;
        serde_json::from_slice(&ivec).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip_with_meta() {
        let store = MemoryDataStore::new();
        assert!(store.get(CACHE_KEY).await.is_none());

        store.set(CACHE_KEY, "{\"hasUpdates\":true}").await.unwrap();
        assert_eq!(
            store.get(CACHE_KEY).await.as_deref(),
            Some("{\"hasUpdates\":true}")
        );

        let meta = store.get_meta(CACHE_KEY).await.unwrap();
        assert_eq!(meta.hash.len(), 40);
        assert!(!store.supports_polling());
    }

    #[tokio::test]
    async fn test_sled_round_trip_with_meta() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledDataStore::new(db);

        store.set(CACHE_KEY, "payload").await.unwrap();
        assert_eq!(store.get(CACHE_KEY).await.as_deref(), Some("payload"));

        let meta = store.get_meta(CACHE_KEY).await.unwrap();
        assert_eq!(meta.hash.len(), 40);
        assert!(store.get("other").await.is_none());
    }
}
