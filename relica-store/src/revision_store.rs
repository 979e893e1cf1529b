//! The local revision ledger.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use relica_types::{ResourceId, ResourceSlot, RevisionRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Durable, single-writer ledger of resource identities and revision history.
///
/// Backed by SQLite. The underlying connection has no internal locking
/// guarantee, so all access is serialized through one mutex; clones share
/// the same connection.
#[derive(Clone)]
pub struct RevisionStore {
    conn: Arc<Mutex<Connection>>,
}

impl RevisionStore {
    /// Opens (or creates) a ledger at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_conn(conn)
    }

    /// Opens an in-memory ledger. Used by tests and throwaway sessions.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_conn(Connection::open_in_memory()?)
    }

    /// Wraps an already-open connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> StoreResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    fn with_conn(conn: Connection) -> StoreResult<Self> {
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Storage(format!("connection lock poisoned: {e}")))
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS resource (
                 uuid      TEXT PRIMARY KEY,
                 slot      INTEGER NOT NULL,
                 published INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS resource_revision (
                 uuid     TEXT NOT NULL,
                 revision INTEGER NOT NULL,
                 date     INTEGER,
                 uploaded INTEGER NOT NULL DEFAULT 0,
                 PRIMARY KEY (uuid, revision)
             );
             CREATE TABLE IF NOT EXISTS resource_removed (
                 uuid TEXT PRIMARY KEY
             );",
        )?;
        Ok(())
    }

    // ── Existence tracking ───────────────────────────────────────

    /// Registers a resource's existence under a slot. Silent no-op when the
    /// resource is already tracked.
    pub fn add(&self, id: ResourceId, slot: ResourceSlot) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO resource (uuid, slot) VALUES (?1, ?2)",
            params![id.to_string(), slot.to_id()],
        )?;
        Ok(())
    }

    /// Deletes the resource's existence entry. Does not delete its revisions.
    pub fn remove(&self, id: ResourceId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM resource WHERE uuid = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Deletes all existence entries for a slot, including those resources'
    /// revisions. Entries in other slots are untouched.
    pub fn remove_all(&self, slot: ResourceSlot) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM resource_revision WHERE uuid IN
                 (SELECT uuid FROM resource WHERE slot = ?1)",
            params![slot.to_id()],
        )?;
        tx.execute("DELETE FROM resource WHERE slot = ?1", params![slot.to_id()])?;
        tx.commit()?;
        Ok(())
    }

    /// True when the resource has an existence entry.
    pub fn exists(&self, id: ResourceId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM resource WHERE uuid = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of resources tracked under a slot.
    pub fn count(&self, slot: ResourceSlot) -> StoreResult<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM resource WHERE slot = ?1",
            params![slot.to_id()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// All resource ids tracked under a slot.
    pub fn all(&self, slot: ResourceSlot) -> StoreResult<Vec<ResourceId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT uuid FROM resource WHERE slot = ?1")?;
        let rows = stmt.query_map(params![slot.to_id()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            match ResourceId::parse(&row?) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("skipping unparseable resource id in ledger: {e}"),
            }
        }
        Ok(ids)
    }

    /// The slot a resource was registered under.
    pub fn slot_of(&self, id: ResourceId) -> StoreResult<ResourceSlot> {
        let conn = self.lock()?;
        let slot_id: Option<i64> = conn
            .query_row(
                "SELECT slot FROM resource WHERE uuid = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        slot_id
            .and_then(ResourceSlot::from_id)
            .ok_or(StoreError::NotFound(id))
    }

    // ── Revision history ─────────────────────────────────────────

    /// Appends a revision record. `created_at` may be `None` for revisions
    /// the server hasn't timestamped yet.
    pub fn add_revision(
        &self,
        id: ResourceId,
        revision: u32,
        created_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO resource_revision (uuid, revision, date) VALUES (?1, ?2, ?3)",
            params![id.to_string(), revision, created_at.map(|t| t.timestamp_millis())],
        )?;
        Ok(())
    }

    /// Installs a batch of revisions in one transaction, marked as already
    /// synchronized. Used when applying a download; the batch lands
    /// atomically or not at all.
    pub fn install_revisions(&self, id: ResourceId, records: &[RevisionRecord]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT OR REPLACE INTO resource_revision (uuid, revision, date, uploaded)
                 VALUES (?1, ?2, ?3, 1)",
                params![
                    id.to_string(),
                    record.revision,
                    record.created_at.map(|t| t.timestamp_millis())
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// The highest-numbered revision of a resource.
    pub fn revision_latest(&self, id: ResourceId) -> StoreResult<RevisionRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT revision, date FROM resource_revision
             WHERE uuid = ?1 ORDER BY revision DESC LIMIT 1",
            params![id.to_string()],
            |row| {
                Ok(RevisionRecord::new(
                    id,
                    row.get::<_, u32>(0)?,
                    row.get::<_, Option<i64>>(1)?
                        .and_then(DateTime::from_timestamp_millis),
                ))
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound(id))
    }

    /// All revisions of a resource, ascending by revision number. Empty when
    /// the resource has none.
    pub fn revisions(&self, id: ResourceId) -> StoreResult<Vec<RevisionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT revision, date FROM resource_revision
             WHERE uuid = ?1 ORDER BY revision ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(RevisionRecord::new(
                id,
                row.get::<_, u32>(0)?,
                row.get::<_, Option<i64>>(1)?
                    .and_then(DateTime::from_timestamp_millis),
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Deletes every revision of a resource.
    pub fn remove_revisions(&self, id: ResourceId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM resource_revision WHERE uuid = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Deletes the given revision and every later one. Conflict-resolution
    /// support: discards the local tail before installing the remote one.
    pub fn remove_revisions_from(&self, id: ResourceId, from: u32) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM resource_revision WHERE uuid = ?1 AND revision >= ?2",
            params![id.to_string(), from],
        )?;
        Ok(())
    }

    // ── Published flag ───────────────────────────────────────────

    /// Whether the resource has been published.
    pub fn is_published(&self, id: ResourceId) -> StoreResult<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT published FROM resource WHERE uuid = ?1",
            params![id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(|v| v != 0)
        .ok_or(StoreError::NotFound(id))
    }

    /// Flags the resource as published or unpublished.
    pub fn set_published(&self, id: ResourceId, published: bool) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE resource SET published = ?2 WHERE uuid = ?1",
            params![id.to_string(), published as i64],
        )?;
        Ok(())
    }

    // ── Deletion tracking ────────────────────────────────────────

    /// Records that a resource was removed locally, so the deletion can be
    /// propagated on the next sync.
    pub fn mark_removed(&self, id: ResourceId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO resource_removed (uuid) VALUES (?1)",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Drops a resource from the removed set, once the deletion has been
    /// pushed to the server.
    pub fn unmark_removed(&self, id: ResourceId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM resource_removed WHERE uuid = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// All resources whose deletion still awaits propagation.
    pub fn removed_resources(&self) -> StoreResult<Vec<ResourceId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT uuid FROM resource_removed")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            match ResourceId::parse(&row?) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("skipping unparseable removed-resource id: {e}"),
            }
        }
        Ok(ids)
    }

    // ── Upload tracking ──────────────────────────────────────────

    /// Revisions that haven't been uploaded yet, grouped per resource and
    /// ascending by revision number.
    pub fn unsynced_revisions(&self) -> StoreResult<HashMap<ResourceId, Vec<RevisionRecord>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uuid, revision, date FROM resource_revision
             WHERE uploaded = 0 ORDER BY uuid, revision",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?;

        let mut unsynced: HashMap<ResourceId, Vec<RevisionRecord>> = HashMap::new();
        for row in rows {
            let (uuid, revision, date) = row?;
            let Ok(id) = ResourceId::parse(&uuid) else {
                warn!("skipping unparseable resource id in revision table: {uuid}");
                continue;
            };
            unsynced.entry(id).or_default().push(RevisionRecord::new(
                id,
                revision,
                date.and_then(DateTime::from_timestamp_millis),
            ));
        }
        Ok(unsynced)
    }

    /// Marks an inclusive revision range as uploaded.
    pub fn mark_synced(&self, id: ResourceId, from: u32, to: u32) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE resource_revision SET uploaded = 1
             WHERE uuid = ?1 AND revision >= ?2 AND revision <= ?3",
            params![id.to_string(), from, to],
        )?;
        Ok(())
    }
}
