//! Structured record store for the authoritative server side.
//!
//! Two record families with different binding rules:
//!
//! - *Published resources*: one row per resource, a singleton blob and an
//!   optional companion blob addressed by a secondary id (a level's
//!   playable binary).
//! - *User resources*: one row per (resource, revision) pair, each with its
//!   own blob.
//!
//! Blob-key writes are last-write-wins upserts at the granularity of a
//! single row. Concurrent binding requests for the same row race safely;
//! the newest write replaces the reference without creating duplicates.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use relica_types::{BlobKey, ResourceId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// A published resource's metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    /// Primary resource id.
    pub resource_id: ResourceId,
    /// Secondary id addressing the companion blob, when the resource has one.
    pub companion_id: Option<ResourceId>,
    /// When the resource was published.
    pub created: DateTime<Utc>,
    /// Storage token of the primary blob.
    pub blob_key: Option<BlobKey>,
    /// Storage token of the companion blob.
    pub companion_blob_key: Option<BlobKey>,
}

/// One user-resource revision's metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRevisionRecord {
    /// The resource this revision belongs to.
    pub resource_id: ResourceId,
    /// Revision number.
    pub revision: u32,
    /// Client-side creation time.
    pub created: DateTime<Utc>,
    /// When the revision reached the server.
    pub uploaded: DateTime<Utc>,
    /// Storage token of the revision's blob.
    pub blob_key: Option<BlobKey>,
}

/// A single blob-to-record binding, produced by the bindery and persisted
/// by [`RecordStore::apply_bindings`] in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Bind a published resource's primary blob.
    Published {
        resource_id: ResourceId,
        blob_key: BlobKey,
    },
    /// Bind a published resource's companion blob. `resource_id` is the
    /// primary id of the row, not the companion id the upload addressed.
    Companion {
        resource_id: ResourceId,
        blob_key: BlobKey,
    },
    /// Bind one user-resource revision's blob.
    Revision {
        resource_id: ResourceId,
        revision: u32,
        blob_key: BlobKey,
    },
}

/// SQLite-backed store for published and user-revision records.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Opens (or creates) a record store at the given path.
    pub fn open(path: &Path) -> ServerResult<Self> {
        Self::with_conn(Connection::open(path)?)
    }

    /// Opens an in-memory record store.
    pub fn open_in_memory() -> ServerResult<Self> {
        Self::with_conn(Connection::open_in_memory()?)
    }

    /// Wraps an already-open connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> ServerResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
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
            "CREATE TABLE IF NOT EXISTS published_resource (
                 resource_id        TEXT PRIMARY KEY,
                 companion_id       TEXT UNIQUE,
                 created            INTEGER NOT NULL,
                 blob_key           TEXT,
                 companion_blob_key TEXT
             );
             CREATE TABLE IF NOT EXISTS user_revision (
                 resource_id TEXT NOT NULL,
                 revision    INTEGER NOT NULL,
                 created     INTEGER NOT NULL,
                 uploaded    INTEGER NOT NULL,
                 blob_key    TEXT,
                 PRIMARY KEY (resource_id, revision)
             );
             CREATE TABLE IF NOT EXISTS deleted_resource (
                 resource_id TEXT PRIMARY KEY,
                 deleted_at  INTEGER NOT NULL
             );",
        )?;
        Ok(())
    }

    // ── Published resources ──────────────────────────────────────

    /// Creates a published-resource row. The blob references arrive later
    /// through the bindery.
    pub fn insert_published(
        &self,
        resource_id: ResourceId,
        companion_id: Option<ResourceId>,
        created: DateTime<Utc>,
    ) -> ServerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO published_resource (resource_id, companion_id, created)
             VALUES (?1, ?2, ?3)",
            params![
                resource_id.to_string(),
                companion_id.map(|c| c.to_string()),
                created.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn published_from_row(row: &Row<'_>) -> rusqlite::Result<PublishedRecord> {
        let id: String = row.get(0)?;
        let companion: Option<String> = row.get(1)?;
        Ok(PublishedRecord {
            resource_id: ResourceId::parse(&id).map_err(|_| {
                rusqlite::Error::InvalidColumnType(0, "resource_id".into(), rusqlite::types::Type::Text)
            })?,
            companion_id: companion.and_then(|c| ResourceId::parse(&c).ok()),
            created: DateTime::from_timestamp_millis(row.get::<_, i64>(2)?)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            blob_key: row.get::<_, Option<String>>(3)?.map(BlobKey::new),
            companion_blob_key: row.get::<_, Option<String>>(4)?.map(BlobKey::new),
        })
    }

    const PUBLISHED_COLS: &'static str =
        "resource_id, companion_id, created, blob_key, companion_blob_key";

    /// Looks up a published resource by its primary id.
    pub fn get_published(&self, id: ResourceId) -> ServerResult<Option<PublishedRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM published_resource WHERE resource_id = ?1",
                Self::PUBLISHED_COLS
            ),
            params![id.to_string()],
            Self::published_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Looks up a published resource by its companion (secondary) id.
    pub fn find_by_companion(&self, id: ResourceId) -> ServerResult<Option<PublishedRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM published_resource WHERE companion_id = ?1",
                Self::PUBLISHED_COLS
            ),
            params![id.to_string()],
            Self::published_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Published resources created strictly after the given instant.
    pub fn published_since(&self, since: DateTime<Utc>) -> ServerResult<Vec<PublishedRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM published_resource WHERE created > ?1 ORDER BY created",
            Self::PUBLISHED_COLS
        ))?;
        let rows = stmt.query_map(params![since.timestamp_millis()], Self::published_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── User resource revisions ──────────────────────────────────

    /// Creates (or refreshes) one user-revision row. Upsert: a repeated
    /// upload of the same (resource, revision) replaces the timestamps
    /// rather than duplicating the row.
    pub fn insert_user_revision(
        &self,
        resource_id: ResourceId,
        revision: u32,
        created: DateTime<Utc>,
        uploaded: DateTime<Utc>,
    ) -> ServerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_revision (resource_id, revision, created, uploaded)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (resource_id, revision)
             DO UPDATE SET created = excluded.created, uploaded = excluded.uploaded",
            params![
                resource_id.to_string(),
                revision,
                created.timestamp_millis(),
                uploaded.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn user_revision_from_row(row: &Row<'_>) -> rusqlite::Result<UserRevisionRecord> {
        let id: String = row.get(0)?;
        Ok(UserRevisionRecord {
            resource_id: ResourceId::parse(&id).map_err(|_| {
                rusqlite::Error::InvalidColumnType(0, "resource_id".into(), rusqlite::types::Type::Text)
            })?,
            revision: row.get(1)?,
            created: DateTime::from_timestamp_millis(row.get::<_, i64>(2)?)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            uploaded: DateTime::from_timestamp_millis(row.get::<_, i64>(3)?)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            blob_key: row.get::<_, Option<String>>(4)?.map(BlobKey::new),
        })
    }

    const USER_COLS: &'static str = "resource_id, revision, created, uploaded, blob_key";

    /// All revision rows of one user resource, ascending by revision.
    pub fn user_revisions(&self, id: ResourceId) -> ServerResult<Vec<UserRevisionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_revision WHERE resource_id = ?1 ORDER BY revision",
            Self::USER_COLS
        ))?;
        let rows = stmt.query_map(params![id.to_string()], Self::user_revision_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// User revisions uploaded strictly after the given instant, ordered by
    /// upload time then revision.
    pub fn user_revisions_since(
        &self,
        since: DateTime<Utc>,
    ) -> ServerResult<Vec<UserRevisionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM user_revision WHERE uploaded > ?1 ORDER BY uploaded, revision",
            Self::USER_COLS
        ))?;
        let rows = stmt.query_map(params![since.timestamp_millis()], Self::user_revision_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Persists a batch of bindings in a single transaction. Each binding is
    /// an unconditional overwrite of one row's blob reference.
    pub fn apply_bindings(&self, bindings: &[Binding]) -> ServerResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut applied = 0;
        for binding in bindings {
            let changed = match binding {
                Binding::Published {
                    resource_id,
                    blob_key,
                } => tx.execute(
                    "UPDATE published_resource SET blob_key = ?2 WHERE resource_id = ?1",
                    params![resource_id.to_string(), blob_key.as_str()],
                )?,
                Binding::Companion {
                    resource_id,
                    blob_key,
                } => tx.execute(
                    "UPDATE published_resource SET companion_blob_key = ?2 WHERE resource_id = ?1",
                    params![resource_id.to_string(), blob_key.as_str()],
                )?,
                Binding::Revision {
                    resource_id,
                    revision,
                    blob_key,
                } => tx.execute(
                    "UPDATE user_revision SET blob_key = ?3
                     WHERE resource_id = ?1 AND revision = ?2",
                    params![resource_id.to_string(), revision, blob_key.as_str()],
                )?,
            };
            if changed == 0 {
                warn!("binding targeted a vanished row: {binding:?}");
            }
            applied += changed;
        }
        tx.commit()?;
        Ok(applied)
    }

    // ── Deletion tombstones ──────────────────────────────────────

    /// Records a deletion tombstone.
    pub fn mark_deleted(&self, id: ResourceId, at: DateTime<Utc>) -> ServerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO deleted_resource (resource_id, deleted_at) VALUES (?1, ?2)",
            params![id.to_string(), at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Resources deleted strictly after the given instant.
    pub fn deleted_since(&self, since: DateTime<Utc>) -> ServerResult<Vec<ResourceId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT resource_id FROM deleted_resource WHERE deleted_at > ?1 ORDER BY deleted_at",
        )?;
        let rows = stmt.query_map(params![since.timestamp_millis()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            match ResourceId::parse(&row?) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("skipping unparseable tombstone id: {e}"),
            }
        }
        Ok(ids)
    }

    /// Deletes every revision row of a user resource, records the tombstone,
    /// and returns the blob keys that now need removal from the vault.
    pub fn delete_user_resource(
        &self,
        id: ResourceId,
        at: DateTime<Utc>,
    ) -> ServerResult<Vec<BlobKey>> {
        let keys: Vec<BlobKey> = self
            .user_revisions(id)?
            .into_iter()
            .filter_map(|r| r.blob_key)
            .collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM user_revision WHERE resource_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO deleted_resource (resource_id, deleted_at) VALUES (?1, ?2)",
            params![id.to_string(), at.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(keys)
    }

    /// Every blob key referenced by any record row. Orphan-sweep support.
    pub fn referenced_blob_keys(&self) -> ServerResult<HashSet<BlobKey>> {
        let conn = self.lock()?;
        let mut keys = HashSet::new();

        let mut stmt = conn.prepare(
            "SELECT blob_key FROM published_resource WHERE blob_key IS NOT NULL
             UNION
             SELECT companion_blob_key FROM published_resource WHERE companion_blob_key IS NOT NULL
             UNION
             SELECT blob_key FROM user_revision WHERE blob_key IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            keys.insert(BlobKey::new(row?));
        }
        Ok(keys)
    }
}
