//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::key::RequestKey;
use crate::http::{Response, ResponseType};

/// A response read back from the store.
#[derive(Debug)]
pub struct CachedResponse {
  pub response: Response,
  /// Namespace the match was found in
  pub namespace: String,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A store holds named namespaces, each mapping request identities to
/// responses. Writes to the same key are last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create the namespace if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  fn has(&self, name: &str) -> Result<bool>;

  /// Namespace names, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a namespace and its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Rename `from` to `to`, replacing any namespace already called `to`.
  fn rename(&self, from: &str, to: &str) -> Result<()>;

  /// Request identities stored in a namespace.
  fn requests(&self, name: &str) -> Result<Vec<RequestKey>>;

  /// Look up a request in one namespace.
  fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up a request across all namespaces, oldest namespace first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response. Fails if the namespace does not exist.
  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// An in-memory store that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn namespace_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn
      .query_row(
        "SELECT id FROM namespaces WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up namespace {}: {}", name, e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache namespaces (e.g. static-v1, dynamic-v1)
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    namespace_id INTEGER NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    response_url TEXT,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace_id, request_hash),
    FOREIGN KEY (namespace_id) REFERENCES namespaces(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(request_hash);
"#;

const MATCH_COLUMNS: &str = "n.name, e.status, e.response_type, e.response_url, e.headers, e.body, e.cached_at";

/// Raw row contents, decoded outside the rusqlite row callback so decode
/// failures surface as eyre errors.
struct EntryRow {
  namespace: String,
  status: u16,
  response_type: String,
  response_url: Option<String>,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      namespace: row.get(0)?,
      status: row.get(1)?,
      response_type: row.get(2)?,
      response_url: row.get(3)?,
      headers: row.get(4)?,
      body: row.get(5)?,
      cached_at: row.get(6)?,
    })
  }

  fn decode(self) -> Result<CachedResponse> {
    let status = StatusCode::from_u16(self.status)
      .map_err(|e| eyre!("Invalid stored status {}: {}", self.status, e))?;
    let kind: ResponseType = self.response_type.parse()?;
    let pairs: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize stored headers: {}", e))?;

    let mut response = Response::new(status, self.body).with_kind(kind);
    response.headers = Response::headers_from_pairs(&pairs);
    response.url = self.response_url.and_then(|u| Url::parse(&u).ok());

    Ok(CachedResponse {
      response,
      namespace: self.namespace,
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open namespace {}: {}", name, e))?;

    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(Self::namespace_id(&conn, name)?.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM namespaces ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let Some(id) = Self::namespace_id(&tx, name)? else {
      return Ok(false);
    };

    tx.execute("DELETE FROM entries WHERE namespace_id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    tx.execute("DELETE FROM namespaces WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  fn rename(&self, from: &str, to: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let from_id = Self::namespace_id(&tx, from)?
      .ok_or_else(|| eyre!("Cache namespace does not exist: {}", from))?;

    if let Some(to_id) = Self::namespace_id(&tx, to)? {
      tx.execute("DELETE FROM entries WHERE namespace_id = ?", params![to_id])
        .map_err(|e| eyre!("Failed to clear namespace {}: {}", to, e))?;
      tx.execute("DELETE FROM namespaces WHERE id = ?", params![to_id])
        .map_err(|e| eyre!("Failed to replace namespace {}: {}", to, e))?;
    }

    tx.execute(
      "UPDATE namespaces SET name = ? WHERE id = ?",
      params![to, from_id],
    )
    .map_err(|e| eyre!("Failed to rename {} to {}: {}", from, to, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn requests(&self, name: &str) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT e.method, e.url FROM entries e
         INNER JOIN namespaces n ON n.id = e.namespace_id
         WHERE n.name = ?
         ORDER BY e.cached_at, e.url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list requests in {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read request key: {}", e))?;

    Ok(keys)
  }

  fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {MATCH_COLUMNS} FROM entries e
       INNER JOIN namespaces n ON n.id = e.namespace_id
       WHERE e.request_hash = ? AND n.name = ?"
    );

    let row = conn
      .query_row(&sql, params![key.cache_hash(), name], EntryRow::from_row)
      .optional()
      .map_err(|e| eyre!("Failed to match {} in {}: {}", key, name, e))?;

    row.map(EntryRow::decode).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {MATCH_COLUMNS} FROM entries e
       INNER JOIN namespaces n ON n.id = e.namespace_id
       WHERE e.request_hash = ?
       ORDER BY n.id
       LIMIT 1"
    );

    let row = conn
      .query_row(&sql, params![key.cache_hash()], EntryRow::from_row)
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", key, e))?;

    row.map(EntryRow::decode).transpose()
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let id = Self::namespace_id(&conn, name)?
      .ok_or_else(|| eyre!("Cache namespace does not exist: {}", name))?;

    let headers = serde_json::to_string(&response.header_pairs())
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries
           (namespace_id, request_hash, method, url, status, response_type, response_url, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          id,
          key.cache_hash(),
          key.method,
          key.url,
          response.status.as_u16(),
          response.kind.as_str(),
          response.url.as_ref().map(Url::as_str),
          headers,
          response.body().as_ref(),
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, name, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
