//! Server-side blob storage.
//!
//! Holds the raw binary payloads, addressed by opaque [`BlobKey`] tokens
//! minted at store time. Metadata records reference blobs by key only; the
//! vault never knows which resource a blob belongs to.

use crate::error::{ServerError, ServerResult};
use chrono::Utc;
use relica_types::BlobKey;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Blob byte store, SQLite-backed.
#[derive(Clone)]
pub struct BlobVault {
    conn: Arc<Mutex<Connection>>,
}

impl BlobVault {
    /// Opens (or creates) a vault at the given path.
    pub fn open(path: &Path) -> ServerResult<Self> {
        Self::with_conn(Connection::open(path)?)
    }

    /// Opens an in-memory vault.
    pub fn open_in_memory() -> ServerResult<Self> {
        Self::with_conn(Connection::open_in_memory()?)
    }

    /// Wraps an already-open connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> ServerResult<Self> {
        let vault = Self { conn };
        vault.ensure_tables()?;
        Ok(vault)
    }

    fn with_conn(conn: Connection) -> ServerResult<Self> {
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    fn lock(&self) -> ServerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ServerError::Storage(format!("connection lock poisoned: {e}")))
    }

    fn ensure_tables(&self) -> ServerResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blob (
                 key          TEXT PRIMARY KEY,
                 data         BLOB NOT NULL,
                 size         INTEGER NOT NULL,
                 content_hash TEXT NOT NULL,
                 created      INTEGER NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Stores a payload and returns the freshly minted key for it.
    pub fn store(&self, data: &[u8]) -> ServerResult<BlobKey> {
        let key = BlobKey::new(format!("blob-{}", Uuid::new_v4().simple()));
        let hash = hex::encode(Sha256::digest(data));
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO blob (key, data, size, content_hash, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_str(),
                data,
                data.len() as i64,
                hash,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(key)
    }

    /// Reads a payload back.
    pub fn read(&self, key: &BlobKey) -> ServerResult<Vec<u8>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM blob WHERE key = ?1",
            params![key.as_str()],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or_else(|| ServerError::BlobNotFound(key.clone()))
    }

    /// SHA-256 of the stored payload, hex-encoded.
    pub fn content_hash(&self, key: &BlobKey) -> ServerResult<String> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT content_hash FROM blob WHERE key = ?1",
            params![key.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| ServerError::BlobNotFound(key.clone()))
    }

    /// Deletes a blob. Errors when the key is unknown.
    pub fn delete(&self, key: &BlobKey) -> ServerResult<()> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM blob WHERE key = ?1", params![key.as_str()])?;
        if deleted == 0 {
            return Err(ServerError::BlobNotFound(key.clone()));
        }
        Ok(())
    }

    /// True when a blob exists under the key.
    pub fn contains(&self, key: &BlobKey) -> ServerResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blob WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of stored blobs.
    pub fn len(&self) -> ServerResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM blob", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// True when the vault holds nothing.
    pub fn is_empty(&self) -> ServerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// All stored keys.
    pub fn keys(&self) -> ServerResult<Vec<BlobKey>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM blob")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(BlobKey::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Deletes every blob and returns how many were removed.
    pub fn purge_all(&self) -> ServerResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM blob", [])?;
        Ok(deleted)
    }
}
