pub mod queue;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{Entry, EntryFilter, Feed, NewEntry, ReadMark, ReadStateKey};

pub use queue::{ChangeQueue, QueuedChange};
pub use sqlite::SqliteStore;

/// Minimum length of an identifier prefix accepted by prefix lookups.
pub const MIN_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUpsert {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadStateApply {
    /// No entry with that feed URL and guid exists yet.
    Orphan,
    /// The stored state is newer.
    Skipped,
    Applied,
}

pub trait Store {
    // Feed operations
    fn create_feed(&self, feed: &Feed) -> Result<()>;
    fn get_feed(&self, id: &str) -> Result<Feed>;
    fn get_feed_by_url(&self, url: &str) -> Result<Feed>;
    fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>>;
    fn resolve_feed(&self, id_or_prefix: &str) -> Result<Feed>;
    fn list_feeds(&self) -> Result<Vec<Feed>>;
    fn update_feed(&self, feed: &Feed) -> Result<()>;
    fn update_feed_fetch_state(
        &self,
        id: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;
    fn update_feed_error(&self, id: &str, message: &str) -> Result<()>;
    fn delete_feed(&self, id: &str) -> Result<()>;
    fn last_fetched_feed(&self) -> Result<Option<Feed>>;

    // Entry operations
    fn entry_exists(&self, feed_id: &str, guid: &str) -> Result<bool>;
    fn create_entry(&self, entry: &Entry) -> Result<()>;
    fn ingest_entries(&self, feed_id: &str, entries: Vec<NewEntry>) -> Result<usize>;
    fn get_entry(&self, id: &str) -> Result<Entry>;
    fn get_entry_by_prefix(&self, prefix: &str) -> Result<Entry>;
    fn resolve_entry(&self, id_or_prefix: &str) -> Result<Entry>;
    fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<Entry>>;
    fn count_entries(&self, feed_id: Option<&str>) -> Result<i64>;
    fn count_unread_entries(&self, feed_id: Option<&str>) -> Result<i64>;

    // Read state
    fn mark_entry_read(&self, id: &str) -> Result<Entry>;
    fn mark_entry_unread(&self, id: &str) -> Result<Entry>;
    fn mark_entries_read_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
    fn mark_entries_read_before_returning(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReadMark>>;
    fn read_state_key(&self, entry_id: &str) -> Result<ReadStateKey>;

    // Replication
    fn delete_feed_by_url(&self, url: &str) -> Result<bool>;
    fn upsert_replicated_feed(
        &self,
        url: &str,
        title: Option<&str>,
        folder: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<FeedUpsert>;
    fn apply_read_state(
        &self,
        key: &ReadStateKey,
        read: bool,
        at: DateTime<Utc>,
    ) -> Result<ReadStateApply>;
}
