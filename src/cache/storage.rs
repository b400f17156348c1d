//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::CachedResponse;
use crate::config::Config;
use crate::error::{Error, Result};

/// Storage backend for cached responses, organized into namespaces that
/// can be enumerated and dropped as a unit.
pub trait CacheStorage: Send + Sync {
  /// Store a response snapshot under a namespace, keyed by request URL.
  fn put(&self, namespace: &str, url: &str, response: &CachedResponse) -> Result<()>;

  /// Most recent snapshot for a URL, with the time it was cached.
  fn get(&self, namespace: &str, url: &str) -> Result<Option<(CachedResponse, DateTime<Utc>)>>;

  /// Every namespace currently holding at least one entry.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a whole namespace.
  fn drop_namespace(&self, namespace: &str) -> Result<()>;
}

/// SQLite-backed response cache.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    namespace TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_namespace
    ON response_cache(namespace);
"#;

impl SqliteCacheStorage {
  /// Open or create the cache database at the default location.
  pub fn open() -> Result<Self> {
    let dir = Config::data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Self::open_at(&dir.join("cache.db"))
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    Self::init(Connection::open(path)?)
  }

  /// Transient cache for tests.
  pub fn open_in_memory() -> Result<Self> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(conn: Connection) -> Result<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| Error::Other("cache lock poisoned".into()))
  }
}

impl CacheStorage for SqliteCacheStorage {
  fn put(&self, namespace: &str, url: &str, response: &CachedResponse) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO response_cache
         (namespace, url_hash, url, status, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        url_key(url),
        url,
        response.status,
        response.content_type,
        response.body,
        Utc::now().to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn get(&self, namespace: &str, url: &str) -> Result<Option<(CachedResponse, DateTime<Utc>)>> {
    let conn = self.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, content_type, body, cached_at FROM response_cache
         WHERE namespace = ? AND url_hash = ?",
        params![namespace, url_key(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, content_type, body, cached_at)) => {
        let cached_at = DateTime::parse_from_rfc3339(&cached_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| Error::Other(format!("failed to parse cached_at '{}': {}", cached_at, e)))?;
        Ok(Some((CachedResponse::new(status, content_type, body), cached_at)))
      }
      None => Ok(None),
    }
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt =
      conn.prepare("SELECT DISTINCT namespace FROM response_cache ORDER BY namespace")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn drop_namespace(&self, namespace: &str) -> Result<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM response_cache WHERE namespace = ?", params![namespace])?;
    Ok(())
  }
}

/// SHA-256 hash for stable, fixed-length keys regardless of URL length.
fn url_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> CachedResponse {
    CachedResponse::new(200, "application/json", body.as_bytes().to_vec())
  }

  #[test]
  fn test_put_get_round_trip() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage.put("ns-v1", "https://example.com/a", &response("payload")).unwrap();

    let (cached, _) = storage.get("ns-v1", "https://example.com/a").unwrap().unwrap();
    assert_eq!(cached.body, b"payload");
    assert_eq!(cached.status, 200);

    assert!(storage.get("ns-v1", "https://example.com/other").unwrap().is_none());
    assert!(storage.get("ns-v2", "https://example.com/a").unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_previous_snapshot() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage.put("ns-v1", "https://example.com/a", &response("old")).unwrap();
    storage.put("ns-v1", "https://example.com/a", &response("new")).unwrap();

    let (cached, _) = storage.get("ns-v1", "https://example.com/a").unwrap().unwrap();
    assert_eq!(cached.body, b"new");
  }

  #[test]
  fn test_namespaces_and_drop() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage.put("static-v1", "https://example.com/a", &response("a")).unwrap();
    storage.put("dynamic-v1", "https://example.com/b", &response("b")).unwrap();

    assert_eq!(storage.namespaces().unwrap(), vec!["dynamic-v1", "static-v1"]);

    storage.drop_namespace("static-v1").unwrap();
    assert_eq!(storage.namespaces().unwrap(), vec!["dynamic-v1"]);
    assert!(storage.get("static-v1", "https://example.com/a").unwrap().is_none());
  }
}
