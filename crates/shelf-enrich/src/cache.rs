use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{EnrichError, Result};

/// Key-value store with a per-entry time to live. Last write wins.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn put(&self, key: &str, value: Value, ttl: Duration);
    /// Drops every entry. Returns how many were removed.
    async fn flush(&self) -> Result<usize>;
}

pub async fn get_typed<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let value = cache.get(key).await?;
    serde_json::from_value(value).ok()
}

pub async fn put_typed<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_value(value) {
        Ok(value) => cache.put(key, value, ttl).await,
        Err(err) => warn!(key, error = %err, "value not cacheable"),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ─── DiskCache ────────────────────────────────────────────────────────────────

pub struct DiskCache {
    dir: PathBuf,
}

fn cache_key_to_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hash = hasher.finish();
    dir.join(format!("{hash:016x}.json"))
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    expires_at: u64, // Unix timestamp millis
    value: Value,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "cannot create cache directory");
        }
        Self { dir }
    }

    /// Cache rooted at `<base>/<namespace>`.
    pub fn in_namespace(base: &Path, namespace: &str) -> Self {
        Self::new(base.join(namespace))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn invalidate(&self, key: &str) {
        let path = cache_key_to_path(&self.dir, key);
        let _ = tokio::fs::remove_file(&path).await;
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let path = cache_key_to_path(&self.dir, key);
        let data = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = serde_json::from_slice(&data).ok()?;
        if entry.key != key {
            return None;
        }
        if now_millis() >= entry.expires_at {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) {
        let path = cache_key_to_path(&self.dir, key);
        let entry = CacheEntry {
            key: key.to_string(),
            expires_at: now_millis().saturating_add(ttl.as_millis() as u64),
            value,
        };
        match serde_json::to_vec(&entry) {
            Ok(data) => {
                if let Err(err) = tokio::fs::write(&path, data).await {
                    warn!(key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(key, error = %err, "cache entry not serializable"),
        }
    }

    async fn flush(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(EnrichError::Cache(err.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EnrichError::Cache(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| EnrichError::Cache(e.to_string()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ─── MemoryCache ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (u64, Value)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let (expires_at, value) = entries.get(key)?.clone();
        if now_millis() >= expires_at {
            entries.remove(key);
            return None;
        }
        Some(value)
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = now_millis().saturating_add(ttl.as_millis() as u64);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (expires_at, value));
    }

    async fn flush(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
