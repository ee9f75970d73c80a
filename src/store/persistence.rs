//! Key-value persistence backends: in-memory, JSON file and Redis

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[cfg(feature = "redis-support")]
use redis::{Commands, Connection};

use crate::config::settings::PersistenceConfig;
use crate::error::{Error, Result};

/// Key holding the serialized node pool
pub const NODE_POOL_KEY: &str = "node_pool";
/// Key holding the user-added node list
pub const CUSTOM_NODES_KEY: &str = "custom_nodes";
/// Key holding the service -> node id override map
pub const SERVICE_OVERRIDES_KEY: &str = "service_overrides";

/// Opaque key-value store used for the node pool and user preferences
pub trait PersistenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn store_info(&self) -> String;
}

impl<'a> dyn PersistenceStore + 'a {
    /// Typed read; a missing or unreadable entry yields `T::default()`
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Discarding unreadable persisted entry '{}': {}", key, e);
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                warn!("Failed to read persisted entry '{}': {}", key, e);
                T::default()
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory store; contents are lost on exit
#[derive(Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        debug!("Creating in-memory persistence store");
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn store_info(&self) -> String {
        format!("Memory store: {} entries", lock(&self.entries).len())
    }
}

/// JSON document on disk, one top-level field per key
pub struct FileStore {
    path: PathBuf,
    key_prefix: String,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P, key_prefix: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents).map_err(|e| {
                    Error::Persistence(format!("state file {} is corrupt: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!("Opened file persistence store at {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            key_prefix: key_prefix.into(),
            entries: Mutex::new(entries),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Write to a sibling temp file and rename over the target
    fn flush(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistenceStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.entries).get(&self.make_key(key)).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.insert(self.make_key(key), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(&self.make_key(key)).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn store_info(&self) -> String {
        format!(
            "File store: {} ({} entries)",
            self.path.display(),
            lock(&self.entries).len()
        )
    }
}

/// Redis-backed store
#[cfg(feature = "redis-support")]
pub struct RedisStore {
    connection: Mutex<Connection>,
    key_prefix: String,
}

#[cfg(feature = "redis-support")]
impl RedisStore {
    pub fn new(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Persistence(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_connection()
            .map_err(|e| Error::Persistence(format!("Failed to connect to Redis: {}", e)))?;

        let key_prefix = key_prefix.into();
        info!("Connected to Redis persistence store (prefix: {})", key_prefix);

        Ok(Self {
            connection: Mutex::new(connection),
            key_prefix,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[cfg(feature = "redis-support")]
impl PersistenceStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.make_key(key);
        let mut conn = lock(&self.connection);
        let raw: Option<String> = conn
            .get(&key)
            .map_err(|e| Error::Persistence(format!("Redis get error for {}: {}", key, e)))?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = self.make_key(key);
        let mut conn = lock(&self.connection);
        conn.set::<_, _, ()>(&key, value.to_string())
            .map_err(|e| Error::Persistence(format!("Redis set error for {}: {}", key, e)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let key = self.make_key(key);
        let mut conn = lock(&self.connection);
        conn.del::<_, i32>(&key)
            .map(|_| ())
            .map_err(|e| Error::Persistence(format!("Redis delete error for {}: {}", key, e)))
    }

    fn store_info(&self) -> String {
        format!("Redis store (prefix: {})", self.key_prefix)
    }
}

/// Build the backend named in configuration
pub fn open_store(config: &PersistenceConfig) -> Result<Arc<dyn PersistenceStore>> {
    match config.backend.as_str() {
        "memory" => {
            info!("🧠 Using in-memory persistence (state is not kept across runs)");
            Ok(Arc::new(MemoryStore::new()))
        }
        "file" => {
            let store = FileStore::open(&config.path, config.key_prefix.clone())?;
            info!("💾 Using file persistence: {}", config.path);
            Ok(Arc::new(store))
        }
        "redis" => {
            #[cfg(feature = "redis-support")]
            {
                let store = RedisStore::new(&config.redis_url, config.key_prefix.clone())?;
                info!("🚀 Using Redis persistence: {}", config.redis_url);
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "redis-support"))]
            {
                Err(Error::Config(
                    "Redis persistence configured but redis-support feature not enabled".to_string(),
                ))
            }
        }
        other => Err(Error::Config(format!(
            "Invalid persistence backend '{}'. Must be 'memory', 'file' or 'redis'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
        store.set("k", json!({"a": 1})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_get_or_default_on_missing_and_corrupt() {
        let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
        let empty: HashMap<String, String> = store.get_or_default(SERVICE_OVERRIDES_KEY);
        assert!(empty.is_empty());

        store.set(SERVICE_OVERRIDES_KEY, json!(42)).unwrap();
        let fallback: HashMap<String, String> = store.get_or_default(SERVICE_OVERRIDES_KEY);
        assert!(fallback.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("accel.json");

        let store = FileStore::open(&path, "accel:").unwrap();
        store.set(CUSTOM_NODES_KEY, json!(["https://mirror.example.com"])).unwrap();
        drop(store);

        let reopened = FileStore::open(&path, "accel:").unwrap();
        assert_eq!(
            reopened.get(CUSTOM_NODES_KEY).unwrap(),
            Some(json!(["https://mirror.example.com"]))
        );
        assert!(reopened.store_info().contains("1 entries"));
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accel.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(FileStore::open(&path, ""), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_open_store_by_backend_name() {
        let dir = tempdir().unwrap();
        let mut config = PersistenceConfig::default();

        config.backend = "memory".to_string();
        assert!(open_store(&config).unwrap().store_info().starts_with("Memory"));

        config.backend = "file".to_string();
        config.path = dir.path().join("s.json").to_string_lossy().to_string();
        assert!(open_store(&config).unwrap().store_info().starts_with("File"));

        config.backend = "sqlite".to_string();
        assert!(open_store(&config).is_err());
    }
}
