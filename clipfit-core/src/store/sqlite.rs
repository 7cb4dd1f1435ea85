use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};

use super::{LockCacheBackend, StoreError, StoreResult};
use crate::sqlite::configure_connection;

const CACHE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artifact_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS acquisition_locks (
    key TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

#[derive(Debug, Clone, Default)]
pub struct SqliteBackendBuilder {
    path: Option<PathBuf>,
}

impl SqliteBackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> StoreResult<SqliteBackend> {
        let path = self.path.ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "sqlite backend needs a database path",
            ))
        })?;
        Ok(SqliteBackend { path })
    }
}

/// Single-host backend. Locks are rows with an expiry, taken inside an
/// immediate transaction so concurrent processes serialize on the database.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn builder() -> SqliteBackendBuilder {
        SqliteBackendBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteBackendBuilder::new().path(path).build()
    }

    fn open(&self) -> StoreResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CACHE_SCHEMA)?;
        Ok(())
    }

    pub fn try_lock_blocking(&self, key: &str, token: &str, hold: Duration) -> StoreResult<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(hold.as_millis() as i64);
        tx.execute(
            "DELETE FROM acquisition_locks WHERE key = ?1 AND expires_at <= ?2",
            params![key, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO acquisition_locks (key, token, expires_at) VALUES (?1, ?2, ?3)",
            params![key, token, expires_at],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    pub fn unlock_blocking(&self, key: &str, token: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM acquisition_locks WHERE key = ?1 AND token = ?2",
            params![key, token],
        )?;
        Ok(())
    }

    pub fn get_blocking(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.open()?;
        let value = conn
            .query_row(
                "SELECT value FROM artifact_cache WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_blocking(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO artifact_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now()],
        )?;
        Ok(())
    }

    pub fn delete_blocking(&self, key: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM artifact_cache WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn run_blocking<T, F>(&self, task: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteBackend) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || task(store))
            .await
            .map_err(|err| StoreError::Io(std::io::Error::other(err)))?
    }
}

#[async_trait]
impl LockCacheBackend for SqliteBackend {
    async fn try_lock(&self, key: &str, token: &str, hold: Duration) -> StoreResult<bool> {
        let key = key.to_string();
        let token = token.to_string();
        self.run_blocking(move |store| store.try_lock_blocking(&key, &token, hold))
            .await
    }

    async fn unlock(&self, key: &str, token: &str) -> StoreResult<()> {
        let key = key.to_string();
        let token = token.to_string();
        self.run_blocking(move |store| store.unlock_blocking(&key, &token))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run_blocking(move |store| store.get_blocking(&key)).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run_blocking(move |store| store.set_blocking(&key, &value))
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.run_blocking(move |store| store.delete_blocking(&key))
            .await
    }
}
