use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

const CACHE_TTL_SECS: i64 = 86400 * 30; // 30 days

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to create cache directory: {0}")]
    CreateDir(std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache connection poisoned")]
    Poisoned,
}

/// Shared cache of metadata API responses.
pub struct RequestsCache {
    conn: Mutex<Connection>,
    enabled: bool,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl RequestsCache {
    pub fn open(path: &Path, enabled: bool) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CacheError::CreateDir)?;
        }
        Self::with_connection(Connection::open(path)?, enabled)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, true)
    }

    fn with_connection(conn: Connection, enabled: bool) -> Result<Self, CacheError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS requests (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            enabled,
        })
    }

    /// Generate a cache key from the API name and query
    fn cache_key(api: &str, query: &str) -> String {
        let digest = Sha256::digest(query.as_bytes());
        format!("{api}_{}", hex::encode(digest))
    }

    /// Get a cached response if it exists and is not expired
    pub fn get<T: DeserializeOwned>(&self, api: &str, query: &str) -> Option<T> {
        self.get_at(api, query, now_secs())
    }

    fn get_at<T: DeserializeOwned>(&self, api: &str, query: &str, now: i64) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let key = Self::cache_key(api, query);
        let conn = self.conn.lock().ok()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, stored_at FROM requests WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .ok()?;
        let (value, stored_at) = row?;

        if now - stored_at > CACHE_TTL_SECS {
            debug!("cache entry {key} expired");
            let _ = conn.execute("DELETE FROM requests WHERE key = ?1", params![key]);
            return None;
        }
        serde_json::from_str(&value).ok()
    }

    /// Store a response in the cache
    pub fn set<T: Serialize>(&self, api: &str, query: &str, value: &T) -> Result<(), CacheError> {
        self.set_at(api, query, value, now_secs())
    }

    fn set_at<T: Serialize>(
        &self,
        api: &str,
        query: &str,
        value: &T,
        now: i64,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let content = serde_json::to_string(value)?;
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO requests (key, value, stored_at) VALUES (?1, ?2, ?3)",
            params![Self::cache_key(api, query), content, now],
        )?;
        Ok(())
    }

    /// Clear all cached data
    pub fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute("DELETE FROM requests", [])?;
        Ok(())
    }
}
