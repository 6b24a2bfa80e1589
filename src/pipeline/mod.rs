use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::app::{DigestError, Result};
use crate::domain::Feed;
use crate::fetcher::{FetchResult, Fetcher, Validators};
use crate::normalizer::Normalizer;
use crate::store::{SqliteStore, Store};

pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub new_entries: usize,
    pub was_cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedSyncResult {
    pub feed_id: String,
    pub url: String,
    pub title: String,
    pub new_entries: usize,
    pub was_cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total_feeds: usize,
    pub total_new: usize,
    pub total_cached: usize,
    pub total_errors: usize,
    pub results: Vec<FeedSyncResult>,
}

pub struct SyncPipeline {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    store: Arc<SqliteStore>,
    normalizer: Normalizer,
    workers: usize,
}

impl SyncPipeline {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>, store: Arc<SqliteStore>) -> Self {
        Self::with_workers(fetcher, store, DEFAULT_WORKERS)
    }

    pub fn with_workers(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        store: Arc<SqliteStore>,
        workers: usize,
    ) -> Self {
        Self {
            fetcher,
            store,
            normalizer: Normalizer::new(),
            workers: workers.max(1),
        }
    }

    /// Fetch, parse and ingest one feed.
    ///
    /// Fetch and parse failures are recorded on the feed before being returned.
    /// New entries are committed before the feed's fetch state moves forward,
    /// so an interrupted run is retried from the old validators.
    pub async fn sync_feed(&self, feed: &Feed, force: bool) -> Result<SyncOutcome> {
        let validators = if force {
            Validators::none()
        } else {
            Validators {
                etag: feed.etag.as_deref(),
                last_modified: feed.last_modified.as_deref(),
            }
        };

        let fetched = match self.fetcher.fetch(&feed.url, validators).await {
            Ok(result) => result,
            Err(e) => return Err(self.record_failure(feed, e)),
        };

        let (body, etag, last_modified) = match fetched {
            FetchResult::NotModified => {
                tracing::debug!("Feed {} not modified", feed.url);
                return Ok(SyncOutcome {
                    new_entries: 0,
                    was_cached: true,
                });
            }
            FetchResult::Content {
                body,
                etag,
                last_modified,
            } => (body, etag, last_modified),
        };

        let parsed = match self.normalizer.normalize(&body) {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.record_failure(feed, e)),
        };

        let adopted_title = if feed.has_title() {
            None
        } else {
            parsed.title.clone()
        };

        let new_entries = self.store.ingest_entries(&feed.id, parsed.entries)?;

        self.store.update_feed_fetch_state(
            &feed.id,
            etag.as_deref(),
            last_modified.as_deref(),
            Utc::now(),
        )?;

        if let Some(title) = adopted_title {
            let mut updated = self.store.get_feed(&feed.id)?;
            if !updated.has_title() {
                updated.title = Some(title);
                self.store.update_feed(&updated)?;
            }
        }

        tracing::info!("Added {} new entries from {}", new_entries, feed.url);

        Ok(SyncOutcome {
            new_entries,
            was_cached: false,
        })
    }

    fn record_failure(&self, feed: &Feed, error: DigestError) -> DigestError {
        tracing::warn!("Sync of {} failed: {}", feed.url, error);
        match self.store.update_feed_error(&feed.id, &error.to_string()) {
            Ok(()) => error,
            Err(record) => DigestError::FeedErrorNotRecorded {
                source: Box::new(error),
                record: Box::new(record),
            },
        }
    }

    /// Sync every feed with bounded concurrency. Per-feed failures are
    /// reported in the result, never propagated.
    pub async fn sync_all(&self, feeds: Vec<Feed>, force: bool) -> BatchReport {
        let results: Vec<FeedSyncResult> = stream::iter(feeds)
            .map(|feed| async move {
                let outcome = self.sync_feed(&feed, force).await;
                let title = match (&outcome, feed.has_title()) {
                    (Ok(_), false) => self
                        .store
                        .get_feed(&feed.id)
                        .map(|f| f.display_title().to_string())
                        .unwrap_or_else(|_| feed.display_title().to_string()),
                    _ => feed.display_title().to_string(),
                };
                let (new_entries, was_cached, error) = match outcome {
                    Ok(o) => (o.new_entries, o.was_cached, None),
                    Err(e) => (0, false, Some(e.to_string())),
                };
                FeedSyncResult {
                    feed_id: feed.id,
                    url: feed.url,
                    title,
                    new_entries,
                    was_cached,
                    error,
                }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let mut report = BatchReport {
            total_feeds: results.len(),
            ..Default::default()
        };
        for result in &results {
            report.total_new += result.new_entries;
            if result.was_cached {
                report.total_cached += 1;
            }
            if result.error.is_some() {
                report.total_errors += 1;
            }
        }
        report.results = results;

        tracing::info!(
            "Sync complete: {} feeds, {} new entries, {} cached, {} errors",
            report.total_feeds,
            report.total_new,
            report.total_cached,
            report.total_errors
        );
        report
    }
}
