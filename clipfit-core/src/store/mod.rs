mod memory;
mod redis_backend;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ClipfitConfig, StoreBackendKind};
use crate::media::{CompositeKey, MediaArtifact};

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use sqlite::{SqliteBackend, SqliteBackendBuilder};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },
    #[error("failed to open database {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value service with an expiring mutual-exclusion primitive.
///
/// `try_lock` never blocks; a lock whose hold time elapsed is free to take.
/// `unlock` only removes a lock still owned by `token`.
#[async_trait]
pub trait LockCacheBackend: Send + Sync {
    async fn try_lock(&self, key: &str, token: &str, hold: Duration) -> StoreResult<bool>;
    async fn unlock(&self, key: &str, token: &str) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

pub fn open_backend(config: &ClipfitConfig) -> StoreResult<Arc<dyn LockCacheBackend>> {
    match config.store.backend {
        StoreBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        StoreBackendKind::Sqlite => {
            let path = config.resolve_path(&config.store.sqlite_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let backend = SqliteBackend::new(&path)?;
            backend.initialize()?;
            Ok(Arc::new(backend))
        }
        StoreBackendKind::Redis => Ok(Arc::new(RedisBackend::new(&config.store.redis_url)?)),
    }
}

#[derive(Clone)]
pub struct ArtifactCache {
    backend: Arc<dyn LockCacheBackend>,
    poll_interval: Duration,
}

impl ArtifactCache {
    pub fn new(backend: Arc<dyn LockCacheBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub async fn acquire(
        &self,
        key: &CompositeKey,
        hold: Duration,
        wait: Duration,
    ) -> StoreResult<LockGuard> {
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let deadline = started + wait;
        loop {
            if self.backend.try_lock(&lock_key, &token, hold).await? {
                debug!(key = %lock_key, waited = ?started.elapsed(), "lock acquired");
                return Ok(LockGuard {
                    backend: Arc::clone(&self.backend),
                    key: lock_key,
                    token,
                    released: false,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout {
                    key: lock_key,
                    waited: now - started,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    pub async fn load(&self, key: &CompositeKey) -> StoreResult<Option<MediaArtifact>> {
        let cache_key = key.cache_key();
        let Some(bytes) = self.backend.get(&cache_key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<MediaArtifact>(&bytes) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(err) => {
                warn!(key = %cache_key, error = %err, "discarding undecodable cache entry");
                self.backend.delete(&cache_key).await?;
                Ok(None)
            }
        }
    }

    pub async fn store(&self, key: &CompositeKey, artifact: &MediaArtifact) -> StoreResult<()> {
        let bytes = serde_json::to_vec(artifact)?;
        self.backend.set(&key.cache_key(), &bytes).await
    }

    pub async fn invalidate(&self, key: &CompositeKey) -> StoreResult<()> {
        self.backend.delete(&key.cache_key()).await
    }
}

/// Held per-key lock. Prefer [`LockGuard::release`]; dropping an unreleased
/// guard schedules the release on the current runtime.
pub struct LockGuard {
    backend: Arc<dyn LockCacheBackend>,
    key: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.backend.unlock(&self.key, &self.token).await?;
        debug!(key = %self.key, "lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = backend.unlock(&key, &token).await {
                        warn!(key = %key, error = %err, "failed to release dropped lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "lock dropped outside a runtime, left to expire"),
        }
    }
}
