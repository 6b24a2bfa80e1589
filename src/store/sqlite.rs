use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use rusqlite_migration::{Migrations, M};
use uuid::Uuid;

use crate::app::{DigestError, Result};
use crate::domain::{Entry, EntryFilter, Feed, NewEntry, ReadMark, ReadStateKey};
use crate::store::{FeedUpsert, ReadStateApply, Store, MIN_PREFIX_LEN};

const FEED_COLUMNS: &str = "id, url, title, folder, etag, last_modified, last_fetched_at, \
                            last_error, error_count, created_at";

const ENTRY_COLUMNS: &str = "id, feed_id, guid, title, link, author, published_at, content, \
                             read, read_at, read_state_at, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![
            M::up(include_str!("../../migrations/001-initial/up.sql")),
            M::up(include_str!("../../migrations/002-change-log/up.sql")),
        ]);

        let mut conn = self.lock()?;

        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| DigestError::Config(format!("database migration failed: {e}")))?;

        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            DigestError::Storage(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
        // Fixed width so that text comparison in SQL orders chronologically.
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn opt_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        Ok(row
            .get::<_, Option<String>>(idx)?
            .and_then(|s| Self::parse_datetime(&s)))
    }

    fn req_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        Ok(row
            .get::<_, String>(idx)
            .ok()
            .and_then(|s| Self::parse_datetime(&s))
            .unwrap_or_else(Utc::now))
    }

    fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
        Ok(Feed {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            folder: row.get(3)?,
            etag: row.get(4)?,
            last_modified: row.get(5)?,
            last_fetched_at: Self::opt_datetime(row, 6)?,
            last_error: row.get(7)?,
            error_count: row.get(8)?,
            created_at: Self::req_datetime(row, 9)?,
        })
    }

    fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
        Ok(Entry {
            id: row.get(0)?,
            feed_id: row.get(1)?,
            guid: row.get(2)?,
            title: row.get(3)?,
            link: row.get(4)?,
            author: row.get(5)?,
            published_at: Self::opt_datetime(row, 6)?,
            content: row.get(7)?,
            read: row.get::<_, i64>(8)? != 0,
            read_at: Self::opt_datetime(row, 9)?,
            read_state_at: Self::opt_datetime(row, 10)?,
            created_at: Self::req_datetime(row, 11)?,
        })
    }

    fn query_feed(conn: &Connection, clause: &str, param: &str) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE {clause}");
        Ok(conn
            .query_row(&sql, params![param], Self::feed_from_row)
            .optional()?)
    }

    fn query_entry(conn: &Connection, id: &str) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], Self::entry_from_row)
            .optional()?)
    }

    fn insert_entry(tx: &Connection, entry: &Entry) -> Result<usize> {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO entries
                 (id, feed_id, guid, title, link, author, published_at, content,
                  read, read_at, read_state_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id,
                entry.feed_id,
                entry.guid,
                entry.title,
                entry.link,
                entry.author,
                entry.published_at.as_ref().map(Self::format_datetime),
                entry.content,
                entry.read as i64,
                entry.read_at.as_ref().map(Self::format_datetime),
                entry.read_state_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&entry.created_at),
            ],
        )?;
        Ok(inserted)
    }

    /// Resolve a unique identifier by prefix in `table`.
    fn resolve_prefix(conn: &Connection, table: &str, prefix: &str) -> Result<String> {
        if prefix.len() < MIN_PREFIX_LEN {
            return Err(DigestError::InvalidInput(format!(
                "identifier prefix must be at least {MIN_PREFIX_LEN} characters"
            )));
        }

        let sql = format!("SELECT id FROM {table} WHERE substr(id, 1, length(?1)) = ?1 LIMIT 2");
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match ids.as_slice() {
            [] => Err(DigestError::NotFound(format!("no {table} matching {prefix}"))),
            [id] => Ok(id.clone()),
            _ => Err(DigestError::Ambiguous(format!(
                "{prefix} matches more than one in {table}"
            ))),
        }
    }

    fn set_read_state(
        tx: &Transaction<'_>,
        id: &str,
        read: bool,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let stamp = Self::format_datetime(&at);
        let read_at = read.then(|| stamp.clone());
        Ok(tx.execute(
            "UPDATE entries SET read = ?1, read_at = ?2, read_state_at = ?3 WHERE id = ?4",
            params![read as i64, read_at, stamp, id],
        )?)
    }

    fn mark_entry(&self, id: &str, read: bool) -> Result<Entry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if Self::set_read_state(&tx, id, read, Utc::now())? == 0 {
            return Err(DigestError::NotFound(format!("entry {id}")));
        }
        let entry = Self::query_entry(&tx, id)?
            .ok_or_else(|| DigestError::NotFound(format!("entry {id}")))?;
        tx.commit()?;
        Ok(entry)
    }

    fn validate_page(filter: &EntryFilter) -> Result<()> {
        if filter.limit.is_some_and(|l| l < 0) {
            return Err(DigestError::InvalidInput("limit must be non-negative".into()));
        }
        if filter.offset.is_some_and(|o| o < 0) {
            return Err(DigestError::InvalidInput("offset must be non-negative".into()));
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn create_feed(&self, feed: &Feed) -> Result<()> {
        let conn = self.lock()?;

        if Self::query_feed(&conn, "url = ?1", &feed.url)?.is_some() {
            return Err(DigestError::Duplicate(feed.url.clone()));
        }

        conn.execute(
            "INSERT INTO feeds (id, url, title, folder, etag, last_modified, last_fetched_at,
                                last_error, error_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                feed.id,
                feed.url,
                feed.title,
                feed.folder,
                feed.etag,
                feed.last_modified,
                feed.last_fetched_at.as_ref().map(Self::format_datetime),
                feed.last_error,
                feed.error_count,
                Self::format_datetime(&feed.created_at),
            ],
        )?;

        Ok(())
    }

    fn get_feed(&self, id: &str) -> Result<Feed> {
        let conn = self.lock()?;
        Self::query_feed(&conn, "id = ?1", id)?
            .ok_or_else(|| DigestError::NotFound(format!("feed {id}")))
    }

    fn get_feed_by_url(&self, url: &str) -> Result<Feed> {
        self.find_feed_by_url(url)?
            .ok_or_else(|| DigestError::NotFound(format!("feed {url}")))
    }

    fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let conn = self.lock()?;
        Self::query_feed(&conn, "url = ?1", url)
    }

    fn resolve_feed(&self, id_or_prefix: &str) -> Result<Feed> {
        let conn = self.lock()?;
        if let Some(feed) = Self::query_feed(&conn, "id = ?1", id_or_prefix)? {
            return Ok(feed);
        }
        let id = Self::resolve_prefix(&conn, "feeds", id_or_prefix)?;
        Self::query_feed(&conn, "id = ?1", &id)?
            .ok_or_else(|| DigestError::NotFound(format!("feed {id_or_prefix}")))
    }

    fn list_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY created_at, rowid"
        ))?;

        let feeds = stmt
            .query_map([], Self::feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(feeds)
    }

    fn update_feed(&self, feed: &Feed) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE feeds SET title = ?1, folder = ?2 WHERE id = ?3",
            params![feed.title, feed.folder, feed.id],
        )?;
        if updated == 0 {
            return Err(DigestError::NotFound(format!("feed {}", feed.id)));
        }
        Ok(())
    }

    fn update_feed_fetch_state(
        &self,
        id: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE feeds
             SET etag = ?1, last_modified = ?2, last_fetched_at = ?3,
                 last_error = NULL, error_count = 0
             WHERE id = ?4",
            params![etag, last_modified, Self::format_datetime(&fetched_at), id],
        )?;
        if updated == 0 {
            return Err(DigestError::NotFound(format!("feed {id}")));
        }
        Ok(())
    }

    fn update_feed_error(&self, id: &str, message: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE feeds SET last_error = ?1, error_count = error_count + 1 WHERE id = ?2",
            params![message, id],
        )?;
        if updated == 0 {
            return Err(DigestError::NotFound(format!("feed {id}")));
        }
        Ok(())
    }

    fn delete_feed(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE feed_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DigestError::NotFound(format!("feed {id}")));
        }
        tx.commit()?;
        Ok(())
    }

    fn last_fetched_feed(&self) -> Result<Option<Feed>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE last_fetched_at IS NOT NULL
             ORDER BY last_fetched_at DESC LIMIT 1"
        );
        Ok(conn.query_row(&sql, [], Self::feed_from_row).optional()?)
    }

    fn entry_exists(&self, feed_id: &str, guid: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE feed_id = ?1 AND guid = ?2",
            params![feed_id, guid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_entry(&self, entry: &Entry) -> Result<()> {
        let conn = self.lock()?;
        if Self::insert_entry(&conn, entry)? == 0 {
            return Err(DigestError::Duplicate(format!(
                "entry {} in feed {}",
                entry.guid, entry.feed_id
            )));
        }
        Ok(())
    }

    fn ingest_entries(&self, feed_id: &str, entries: Vec<NewEntry>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for parsed in entries {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM entries WHERE feed_id = ?1 AND guid = ?2)",
                params![feed_id, parsed.guid],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }
            count += Self::insert_entry(&tx, &parsed.into_entry(feed_id))?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn get_entry(&self, id: &str) -> Result<Entry> {
        let conn = self.lock()?;
        Self::query_entry(&conn, id)?.ok_or_else(|| DigestError::NotFound(format!("entry {id}")))
    }

    fn get_entry_by_prefix(&self, prefix: &str) -> Result<Entry> {
        let conn = self.lock()?;
        let id = Self::resolve_prefix(&conn, "entries", prefix)?;
        Self::query_entry(&conn, &id)?.ok_or_else(|| DigestError::NotFound(format!("entry {id}")))
    }

    fn resolve_entry(&self, id_or_prefix: &str) -> Result<Entry> {
        {
            let conn = self.lock()?;
            if let Some(entry) = Self::query_entry(&conn, id_or_prefix)? {
                return Ok(entry);
            }
        }
        self.get_entry_by_prefix(id_or_prefix)
    }

    fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        Self::validate_page(filter)?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref feed_id) = filter.feed_id {
            clauses.push("feed_id = ?");
            values.push(Value::Text(feed_id.clone()));
        }
        if let Some(ref guid) = filter.guid {
            clauses.push("guid = ?");
            values.push(Value::Text(guid.clone()));
        }
        if filter.unread_only {
            clauses.push("read = 0");
        }
        if let Some(ref since) = filter.since {
            clauses.push("published_at IS NOT NULL AND published_at >= ?");
            values.push(Value::Text(Self::format_datetime(since)));
        }
        if let Some(ref until) = filter.until {
            clauses.push("published_at IS NOT NULL AND published_at < ?");
            values.push(Value::Text(Self::format_datetime(until)));
        }

        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM entries");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY published_at IS NULL, published_at DESC, created_at DESC");

        if filter.limit.is_some() || filter.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(Value::Integer(filter.limit.unwrap_or(-1)));
            values.push(Value::Integer(filter.offset.unwrap_or(0)));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), Self::entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn count_entries(&self, feed_id: Option<&str>) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE ?1 IS NULL OR feed_id = ?1",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_unread_entries(&self, feed_id: Option<&str>) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE read = 0 AND (?1 IS NULL OR feed_id = ?1)",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn mark_entry_read(&self, id: &str) -> Result<Entry> {
        self.mark_entry(id, true)
    }

    fn mark_entry_unread(&self, id: &str) -> Result<Entry> {
        self.mark_entry(id, false)
    }

    fn mark_entries_read_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.mark_entries_read_before_returning(cutoff)?.len())
    }

    fn mark_entries_read_before_returning(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReadMark>> {
        let now = Utc::now();
        let cutoff = Self::format_datetime(&cutoff);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let marks = {
            let mut stmt = tx.prepare(
                "SELECT f.url, e.guid FROM entries e JOIN feeds f ON f.id = e.feed_id
                 WHERE e.read = 0 AND e.published_at IS NOT NULL AND e.published_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok(ReadMark {
                    key: ReadStateKey {
                        feed_url: row.get(0)?,
                        guid: row.get(1)?,
                    },
                    read: true,
                    at: now,
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let stamp = Self::format_datetime(&now);
        let updated = tx.execute(
            "UPDATE entries SET read = 1, read_at = ?1, read_state_at = ?1
             WHERE read = 0 AND published_at IS NOT NULL AND published_at < ?2",
            params![stamp, cutoff],
        )?;
        debug_assert_eq!(updated, marks.len());

        tx.commit()?;
        Ok(marks)
    }

    fn read_state_key(&self, entry_id: &str) -> Result<ReadStateKey> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT f.url, e.guid FROM entries e JOIN feeds f ON f.id = e.feed_id WHERE e.id = ?1",
            params![entry_id],
            |row| {
                Ok(ReadStateKey {
                    feed_url: row.get(0)?,
                    guid: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| DigestError::NotFound(format!("entry {entry_id}")))
    }

    fn delete_feed_by_url(&self, url: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM entries WHERE feed_id IN (SELECT id FROM feeds WHERE url = ?1)",
            params![url],
        )?;
        let deleted = tx.execute("DELETE FROM feeds WHERE url = ?1", params![url])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn upsert_replicated_feed(
        &self,
        url: &str,
        title: Option<&str>,
        folder: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<FeedUpsert> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE feeds SET title = COALESCE(?1, title), folder = ?2 WHERE url = ?3",
            params![title, folder, url],
        )?;

        let outcome = if updated > 0 {
            FeedUpsert::Updated
        } else {
            tx.execute(
                "INSERT INTO feeds (id, url, title, folder, error_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    url,
                    title,
                    folder,
                    Self::format_datetime(&created_at)
                ],
            )?;
            FeedUpsert::Created
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn apply_read_state(
        &self,
        key: &ReadStateKey,
        read: bool,
        at: DateTime<Utc>,
    ) -> Result<ReadStateApply> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE feed_id = (SELECT id FROM feeds WHERE url = ?1) AND guid = ?2"
        );
        let entry = tx
            .query_row(&sql, params![key.feed_url, key.guid], Self::entry_from_row)
            .optional()?;

        let Some(entry) = entry else {
            return Ok(ReadStateApply::Orphan);
        };
        if !entry.accepts_read_state(read, at) {
            return Ok(ReadStateApply::Skipped);
        }

        Self::set_read_state(&tx, &entry.id, read, at)?;
        tx.commit()?;
        Ok(ReadStateApply::Applied)
    }
}
