use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::app::Result;
use crate::store::SqliteStore;

/// An encrypted change waiting to be pushed to the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedChange {
    /// Local insertion order.
    pub seq: i64,
    pub change_id: String,
    pub entity: String,
    pub entity_id: String,
    pub op: String,
    pub ts: DateTime<Utc>,
    /// Serialized envelope (JSON).
    pub envelope: String,
}

pub trait ChangeQueue {
    fn enqueue_change(&self, change: &QueuedChange) -> Result<i64>;
    fn pending_changes(&self, limit: usize) -> Result<Vec<QueuedChange>>;
    fn remove_changes(&self, change_ids: &[String]) -> Result<usize>;
    fn pending_count(&self) -> Result<i64>;
    fn get_state(&self, key: &str) -> Result<Option<String>>;
    fn set_state(&self, key: &str, value: &str) -> Result<()>;
}

impl ChangeQueue for SqliteStore {
    fn enqueue_change(&self, change: &QueuedChange) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_queue (change_id, entity, entity_id, op, ts, envelope, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                change.change_id,
                change.entity,
                change.entity_id,
                change.op,
                SqliteStore::format_datetime(&change.ts),
                change.envelope,
                SqliteStore::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn pending_changes(&self, limit: usize) -> Result<Vec<QueuedChange>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT seq, change_id, entity, entity_id, op, ts, envelope
             FROM sync_queue ORDER BY seq LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let changes = stmt
            .query_map(params![limit], |row| {
                Ok(QueuedChange {
                    seq: row.get(0)?,
                    change_id: row.get(1)?,
                    entity: row.get(2)?,
                    entity_id: row.get(3)?,
                    op: row.get(4)?,
                    ts: row
                        .get::<_, String>(5)
                        .ok()
                        .and_then(|s| SqliteStore::parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                    envelope: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    fn remove_changes(&self, change_ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM sync_queue WHERE change_id = ?1")?;
            for id in change_ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn pending_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?)
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
