use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, Script};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{LockCacheBackend, StoreResult};

const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Shared backend for several workers: `SET NX PX` locks and plain string
/// values.
///
/// One reconnecting connection is opened on first use and shared by every
/// clone, lock polls included.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    unlock: Arc<Script>,
}

impl RedisBackend {
    pub fn new(url: &str) -> StoreResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
            unlock: Arc::new(Script::new(UNLOCK_SCRIPT)),
        })
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

fn lock_command(key: &str, token: &str, hold: Duration) -> Cmd {
    let hold_ms = hold.as_millis().max(1) as u64;
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(token).arg("NX").arg("PX").arg(hold_ms);
    cmd
}

#[async_trait]
impl LockCacheBackend for RedisBackend {
    async fn try_lock(&self, key: &str, token: &str, hold: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        // nil reply when someone else holds it
        let reply: Option<String> = lock_command(key, token, hold)
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!(key, acquired, "redis lock attempt");
        Ok(acquired)
    }

    async fn unlock(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _deleted: i32 = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
