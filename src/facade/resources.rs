use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::app::{DigestError, Result};
use crate::domain::EntryFilter;
use crate::facade::dates::start_of_day;
use crate::facade::Facade;
use crate::store::Store;

pub const FEEDS_URI: &str = "digest://feeds";
pub const UNREAD_URI: &str = "digest://entries/unread";
pub const TODAY_URI: &str = "digest://entries/today";
pub const STATS_URI: &str = "digest://stats";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

pub const RESOURCES: &[ResourceDescriptor] = &[
    ResourceDescriptor {
        uri: FEEDS_URI,
        name: "feeds",
        description: "Subscribed feeds with unread counts",
        mime_type: "application/json",
    },
    ResourceDescriptor {
        uri: UNREAD_URI,
        name: "unread entries",
        description: "All unread entries, newest first",
        mime_type: "application/json",
    },
    ResourceDescriptor {
        uri: TODAY_URI,
        name: "today's entries",
        description: "Entries published since local midnight",
        mime_type: "application/json",
    },
    ResourceDescriptor {
        uri: STATS_URI,
        name: "statistics",
        description: "Feed, entry and unread totals plus the last sync",
        mime_type: "application/json",
    },
];

fn links(self_uri: &str) -> Value {
    json!({
        "self": self_uri,
        "feeds": FEEDS_URI,
        "unread": UNREAD_URI,
        "today": TODAY_URI,
        "stats": STATS_URI,
    })
}

pub async fn read(facade: &Facade, uri: &str) -> Result<Value> {
    match uri {
        FEEDS_URI => feeds(facade).await,
        UNREAD_URI => unread(facade),
        TODAY_URI => today(facade),
        STATS_URI => stats(facade),
        other => Err(DigestError::NotFound(format!("resource {other}"))),
    }
}

async fn feeds(facade: &Facade) -> Result<Value> {
    let feeds = facade.list_feeds().await?;
    Ok(json!({
        "metadata": {
            "count": feeds.len(),
            "generated_at": Utc::now(),
        },
        "data": feeds,
        "links": links(FEEDS_URI),
    }))
}

fn unread(facade: &Facade) -> Result<Value> {
    let entries = facade.context().store.list_entries(&EntryFilter::unread())?;
    Ok(json!({
        "metadata": {
            "count": entries.len(),
            "filters": { "read": false },
        },
        "data": entries,
        "links": links(UNREAD_URI),
    }))
}

fn today(facade: &Facade) -> Result<Value> {
    let since = start_of_day(&Local::now());
    let entries = facade.context().store.list_entries(&EntryFilter {
        since: Some(since),
        ..Default::default()
    })?;
    Ok(json!({
        "metadata": {
            "count": entries.len(),
            "filters": { "published_since": since },
        },
        "data": entries,
        "links": links(TODAY_URI),
    }))
}

fn stats(facade: &Facade) -> Result<Value> {
    let store = &facade.context().store;
    let feeds = store.list_feeds()?;

    let by_feed = feeds
        .iter()
        .map(|feed| {
            Ok(json!({
                "feed_id": feed.id,
                "title": feed.display_title(),
                "url": feed.url,
                "entry_count": store.count_entries(Some(&feed.id))?,
                "unread_count": store.count_unread_entries(Some(&feed.id))?,
                "last_fetched_at": feed.last_fetched_at,
                "last_error": feed.last_error,
                "error_count": feed.error_count,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let last_sync = store.last_fetched_feed()?.map(|feed| {
        json!({
            "last_fetched_at": feed.last_fetched_at,
            "feed_id": feed.id,
            "feed_title": feed.display_title(),
        })
    });

    Ok(json!({
        "summary": {
            "total_feeds": feeds.len(),
            "total_entries": store.count_entries(None)?,
            "unread_count": store.count_unread_entries(None)?,
        },
        "by_feed": by_feed,
        "last_sync": last_sync,
    }))
}
