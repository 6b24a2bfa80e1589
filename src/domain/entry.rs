use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub feed_id: String,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// When read state last changed, locally or through replication.
    #[serde(skip_serializing)]
    pub read_state_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }

    /// Timestamp used for last-writer-wins on read state.
    pub fn read_state_stamp(&self) -> Option<DateTime<Utc>> {
        self.read_state_at.or(self.read_at)
    }

    /// Whether a replicated read-state record should replace this entry's state.
    ///
    /// The later timestamp wins. On an exact tie `read = true` wins, so two
    /// devices converge regardless of arrival order.
    pub fn accepts_read_state(&self, read: bool, at: DateTime<Utc>) -> bool {
        match self.read_state_stamp() {
            None => true,
            Some(stored) if stored > at => false,
            Some(stored) if stored < at => true,
            Some(_) => read || !self.read,
        }
    }
}

/// A parsed entry ready for ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEntry {
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub categories: Vec<String>,
}

impl NewEntry {
    pub fn into_entry(self, feed_id: &str) -> Entry {
        Entry {
            id: Uuid::new_v4().to_string(),
            feed_id: feed_id.to_string(),
            guid: self.guid,
            title: self.title,
            link: self.link,
            author: self.author,
            published_at: self.published_at,
            content: self.content,
            read: false,
            read_at: None,
            read_state_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Natural key of an entry across devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadStateKey {
    pub feed_url: String,
    pub guid: String,
}

impl ReadStateKey {
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.feed_url, self.guid)
    }
}

/// Result of a read-state transition, as replicated.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadMark {
    pub key: ReadStateKey,
    pub read: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub feed_id: Option<String>,
    pub guid: Option<String>,
    pub unread_only: bool,
    /// Inclusive lower bound on `published_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `published_at`.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EntryFilter {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Default::default()
        }
    }
}
