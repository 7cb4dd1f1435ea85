use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LockCacheBackend, StoreResult};

#[derive(Debug)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

/// Process-local backend. Locks only exclude tasks sharing this instance.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    locks: Mutex<HashMap<String, HeldLock>>,
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockCacheBackend for MemoryBackend {
    async fn try_lock(&self, key: &str, token: &str, hold: Duration) -> StoreResult<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if let Some(held) = locks.get(key) {
            if held.expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(
            key.to_string(),
            HeldLock {
                token: token.to_string(),
                expires_at: now + hold,
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|held| held.token == token) {
            locks.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}
