//! Operations exposed to the agent protocol and the command line.
//!
//! Every operation that changes membership touches the store, the outline
//! and the change log together. The outline lock is held from the first
//! check until its file is written.

pub mod args;
pub mod dates;
pub mod resources;
pub mod tools;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::app::{AppContext, DigestError, Result};
use crate::changelog::{
    Applied, Change, FeedPayload, PullReport, PushReport, ReadStatePayload, SyncStatus,
    Synchronizer,
};
use crate::domain::{Entry, Feed};
use crate::outline::{Outline, OutlineFeed};
use crate::pipeline::{BatchReport, FeedSyncResult};
use crate::store::Store;

use args::{
    AddFeedArgs, BulkMarkReadArgs, EntryIdArgs, FeedUrlArgs, ListEntriesArgs, MoveFeedArgs,
    SyncAction, SyncChangesArgs, SyncFeedsArgs,
};

/// A store feed joined with its outline placement and unread count.
#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    #[serde(flatten)]
    pub feed: Feed,
    pub display_title: String,
    pub in_outline: bool,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddFeedResult {
    pub feed: Feed,
    pub folder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveFeedResult {
    pub url: String,
    pub removed_entries: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveFeedResult {
    pub url: String,
    pub folder: String,
    pub moved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: Entry,
    pub feed_url: String,
    pub feed_title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkMarkReadResult {
    pub marked: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncChangesResult {
    Push(PushReport),
    Pull(PullReport),
    Sync { push: PushReport, pull: PullReport },
    Status(SyncStatus),
}

#[derive(Clone)]
pub struct Facade {
    ctx: Arc<AppContext>,
}

impl Facade {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    async fn record(&self, change: Change) -> Result<()> {
        match &self.ctx.sync {
            Some(sync) => sync.record(&change).await.map(|_| ()),
            None => Ok(()),
        }
    }

    async fn record_read_state(&self, entry: &Entry) -> Result<()> {
        if self.ctx.sync.is_none() {
            return Ok(());
        }
        let key = self.ctx.store.read_state_key(&entry.id)?;
        self.record(Change::read_state(ReadStatePayload {
            feed_url: key.feed_url,
            guid: key.guid,
            read: entry.read,
            read_at: entry.read_state_stamp().unwrap_or_else(Utc::now),
        }))
        .await
    }

    fn feed_change(feed: &Feed, folder: &str) -> Change {
        Change::feed_upsert(
            FeedPayload {
                url: feed.url.clone(),
                title: feed.title.clone(),
                folder: Some(folder.to_string()),
                created_at: feed.created_at,
            },
            Utc::now(),
        )
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedView>> {
        let outline = self.ctx.outline.read().await;
        let feeds = self.ctx.store.list_feeds()?;

        feeds
            .into_iter()
            .map(|feed| {
                let placed = outline.outline().find(&feed.url);
                let display_title = match &placed {
                    Some(o) if o.title != o.url => o.title.clone(),
                    _ => feed.display_title().to_string(),
                };
                let unread_count = self.ctx.store.count_unread_entries(Some(&feed.id))?;
                let mut feed = feed;
                if let Some(o) = &placed {
                    feed.folder = (!o.folder.is_empty()).then(|| o.folder.clone());
                }
                Ok(FeedView {
                    feed,
                    display_title,
                    in_outline: placed.is_some(),
                    unread_count,
                })
            })
            .collect()
    }

    /// Subscribe to a feed. Fails with `Duplicate` only when both the store
    /// and the outline already know the URL; otherwise the missing side is
    /// filled in.
    pub async fn add_feed(&self, args: AddFeedArgs) -> Result<AddFeedResult> {
        let args = args.validate()?;
        let title = args.title.as_deref().map(str::trim).unwrap_or_default();
        let folder = args.folder.as_deref().map(str::trim).unwrap_or_default();

        let feed = {
            let mut outline = self.ctx.outline.write().await;
            let existing = self.ctx.store.find_feed_by_url(&args.url)?;
            let in_outline = outline.outline().contains(&args.url);
            if existing.is_some() && in_outline {
                return Err(DigestError::Duplicate(args.url));
            }

            let (mut feed, created) = match existing {
                Some(feed) => (feed, false),
                None => {
                    let mut feed =
                        Feed::new(args.url.clone()).with_title(Some(title.to_string()));
                    feed.folder = (!folder.is_empty()).then(|| folder.to_string());
                    self.ctx.store.create_feed(&feed)?;
                    (feed, true)
                }
            };

            if !in_outline {
                let outline_title = if title.is_empty() {
                    feed.display_title().to_string()
                } else {
                    title.to_string()
                };
                let added =
                    outline.modify(|o| o.add_feed(&feed.url, &outline_title, folder));
                if let Err(e) = added {
                    if created {
                        self.ctx.store.delete_feed(&feed.id)?;
                    }
                    return Err(e);
                }
            }

            let placed = (!folder.is_empty()).then(|| folder.to_string());
            if !created && feed.folder != placed {
                feed.folder = placed;
                self.ctx.store.update_feed(&feed)?;
            }
            feed
        };

        tracing::info!("Added feed {}", feed.url);
        self.record(Self::feed_change(&feed, folder)).await?;

        Ok(AddFeedResult {
            feed,
            folder: folder.to_string(),
        })
    }

    pub async fn remove_feed(&self, args: FeedUrlArgs) -> Result<RemoveFeedResult> {
        let args = args.validate()?;

        let removed_entries = {
            let mut outline = self.ctx.outline.write().await;
            let existing = self.ctx.store.find_feed_by_url(&args.url)?;
            let in_outline = outline.outline().contains(&args.url);
            if existing.is_none() && !in_outline {
                return Err(DigestError::NotFound(format!("feed {}", args.url)));
            }

            // Outline first: a failed write must not cost the entries.
            if in_outline {
                outline.modify(|o| o.remove_feed(&args.url).map(|_| ()))?;
            }
            let mut removed_entries = 0;
            if let Some(feed) = existing {
                removed_entries = self.ctx.store.count_entries(Some(&feed.id))?;
                self.ctx.store.delete_feed(&feed.id)?;
            }
            removed_entries
        };

        tracing::info!("Removed feed {} ({} entries)", args.url, removed_entries);
        self.record(Change::feed_delete(&args.url, Utc::now())).await?;

        Ok(RemoveFeedResult {
            url: args.url,
            removed_entries,
        })
    }

    pub async fn move_feed(&self, args: MoveFeedArgs) -> Result<MoveFeedResult> {
        let args = args.validate()?;

        let (moved, feed) = {
            let mut outline = self.ctx.outline.write().await;
            let moved = outline.modify(|o| o.move_feed(&args.url, &args.folder))?;

            let feed = match self.ctx.store.find_feed_by_url(&args.url)? {
                Some(mut feed) if moved => {
                    feed.folder = (!args.folder.is_empty()).then(|| args.folder.clone());
                    self.ctx.store.update_feed(&feed)?;
                    Some(feed)
                }
                other => other,
            };
            (moved, feed)
        };

        if moved {
            if let Some(feed) = &feed {
                self.record(Self::feed_change(feed, &args.folder)).await?;
            }
        }

        Ok(MoveFeedResult {
            url: args.url,
            folder: args.folder,
            moved,
        })
    }

    /// Sync one feed (errors propagate) or all feeds (errors are reported
    /// per feed).
    pub async fn sync_feeds(&self, args: SyncFeedsArgs) -> Result<BatchReport> {
        let args = args.validate()?;

        let report = match &args.url {
            Some(url) => {
                let feed = self.ctx.store.get_feed_by_url(url)?;
                let outcome = self.ctx.pipeline.sync_feed(&feed, args.force).await?;
                let title = self.ctx.store.get_feed(&feed.id)?.display_title().to_string();
                BatchReport {
                    total_feeds: 1,
                    total_new: outcome.new_entries,
                    total_cached: usize::from(outcome.was_cached),
                    total_errors: 0,
                    results: vec![FeedSyncResult {
                        feed_id: feed.id,
                        url: feed.url,
                        title,
                        new_entries: outcome.new_entries,
                        was_cached: outcome.was_cached,
                        error: None,
                    }],
                }
            }
            None => {
                let feeds = self.ctx.store.list_feeds()?;
                self.ctx.pipeline.sync_all(feeds, args.force).await
            }
        };

        self.adopt_titles(&report).await?;
        Ok(report)
    }

    /// Give outline entries still titled by their URL the title learned
    /// from the feed itself.
    async fn adopt_titles(&self, report: &BatchReport) -> Result<()> {
        let mut outline = self.ctx.outline.write().await;
        let renames: Vec<(String, String)> = report
            .results
            .iter()
            .filter(|r| r.error.is_none() && r.title != r.url)
            .filter(|r| {
                outline
                    .outline()
                    .find(&r.url)
                    .is_some_and(|o| o.title == o.url)
            })
            .map(|r| (r.url.clone(), r.title.clone()))
            .collect();

        if renames.is_empty() {
            return Ok(());
        }
        outline.modify(|o| {
            for (url, title) in &renames {
                o.rename_feed(url, title)?;
            }
            Ok(())
        })
    }

    pub fn list_entries(&self, args: ListEntriesArgs) -> Result<EntryPage> {
        let mut filter = args.to_filter()?;
        if let Some(feed_id) = args.feed_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter.feed_id = Some(self.ctx.store.resolve_feed(feed_id)?.id);
        }

        let entries = self.ctx.store.list_entries(&filter)?;
        Ok(EntryPage {
            count: entries.len(),
            entries,
        })
    }

    pub fn get_entry(&self, args: EntryIdArgs) -> Result<EntryView> {
        let args = args.validate()?;
        let entry = self.ctx.store.resolve_entry(args.entry_id.trim())?;
        let feed = self.ctx.store.get_feed(&entry.feed_id)?;
        Ok(EntryView {
            entry,
            feed_title: feed.display_title().to_string(),
            feed_url: feed.url,
        })
    }

    pub async fn mark_read(&self, args: EntryIdArgs) -> Result<Entry> {
        let args = args.validate()?;
        let entry = self.ctx.store.resolve_entry(args.entry_id.trim())?;
        let entry = self.ctx.store.mark_entry_read(&entry.id)?;
        self.record_read_state(&entry).await?;
        Ok(entry)
    }

    pub async fn mark_unread(&self, args: EntryIdArgs) -> Result<Entry> {
        let args = args.validate()?;
        let entry = self.ctx.store.resolve_entry(args.entry_id.trim())?;
        let entry = self.ctx.store.mark_entry_unread(&entry.id)?;
        self.record_read_state(&entry).await?;
        Ok(entry)
    }

    pub async fn bulk_mark_read(&self, args: BulkMarkReadArgs) -> Result<BulkMarkReadResult> {
        let cutoff = dates::parse_date(&args.before)?;
        let marks = self.ctx.store.mark_entries_read_before_returning(cutoff)?;

        if self.ctx.sync.is_some() {
            for mark in &marks {
                self.record(Change::read_state(ReadStatePayload {
                    feed_url: mark.key.feed_url.clone(),
                    guid: mark.key.guid.clone(),
                    read: mark.read,
                    read_at: mark.at,
                }))
                .await?;
            }
        }

        tracing::info!("Marked {} entries read", marks.len());
        Ok(BulkMarkReadResult {
            marked: marks.len(),
        })
    }

    pub async fn sync_changes(&self, args: SyncChangesArgs) -> Result<SyncChangesResult> {
        let sync = self.ctx.sync.as_ref().ok_or_else(|| {
            DigestError::NotConfigured("set seed_phrase, user_id and device_id under [sync]".into())
        })?;

        Ok(match args.action {
            SyncAction::Push => SyncChangesResult::Push(sync.push().await?),
            SyncAction::Pull => SyncChangesResult::Pull(self.pull_and_reconcile(sync).await?),
            SyncAction::Sync => {
                let push = sync.push().await?;
                let pull = self.pull_and_reconcile(sync).await?;
                SyncChangesResult::Sync { push, pull }
            }
            SyncAction::Status => SyncChangesResult::Status(sync.status()?),
        })
    }

    /// Pulled changes are committed one by one, so the outline follows
    /// whatever was applied even when the pull stops early.
    async fn pull_and_reconcile(&self, sync: &Synchronizer) -> Result<PullReport> {
        let mut report = PullReport::default();
        let pulled = sync.pull_into(&mut report).await;
        let reconciled = self.reconcile(&report.applied).await;
        pulled?;
        reconciled?;
        Ok(report)
    }

    /// Mirror applied remote membership changes into the outline.
    pub async fn reconcile(&self, applied: &[Applied]) -> Result<()> {
        if !applied
            .iter()
            .any(|a| matches!(a, Applied::FeedUpserted { .. } | Applied::FeedDeleted { .. }))
        {
            return Ok(());
        }

        let mut outline = self.ctx.outline.write().await;
        outline.modify(|o| {
            for change in applied {
                match change {
                    Applied::FeedUpserted {
                        url, title, folder, ..
                    } => {
                        let folder = folder.as_deref().unwrap_or_default();
                        match o.find(url) {
                            Some(current) => {
                                if current.folder != folder {
                                    o.move_feed(url, folder)?;
                                }
                                if let Some(title) = title.as_deref().filter(|t| !t.is_empty()) {
                                    if current.title != title {
                                        o.rename_feed(url, title)?;
                                    }
                                }
                            }
                            None => o.add_feed(url, title.as_deref().unwrap_or_default(), folder)?,
                        }
                    }
                    Applied::FeedDeleted { url, .. } => {
                        if o.contains(url) {
                            o.remove_feed(url)?;
                        }
                    }
                    Applied::ReadState { .. } | Applied::Ignored { .. } => {}
                }
            }
            Ok(())
        })
    }

    /// Merge every feed of `incoming` that is not yet subscribed.
    pub async fn import_outline(&self, incoming: &Outline) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut added: Vec<(Feed, OutlineFeed)> = Vec::new();

        {
            let mut outline = self.ctx.outline.write().await;
            for entry in incoming.all_feeds() {
                if outline.outline().contains(&entry.url)
                    || added.iter().any(|(_, e)| e.url == entry.url)
                {
                    report.skipped += 1;
                    continue;
                }
                if args::validate_url(&entry.url).is_err() {
                    tracing::warn!("Skipping outline entry with invalid url {:?}", entry.url);
                    report.skipped += 1;
                    continue;
                }

                let feed = match self.ctx.store.find_feed_by_url(&entry.url)? {
                    Some(feed) => feed,
                    None => {
                        let title = (entry.title != entry.url).then(|| entry.title.clone());
                        let mut feed = Feed::new(entry.url.clone()).with_title(title);
                        feed.folder = (!entry.folder.is_empty()).then(|| entry.folder.clone());
                        self.ctx.store.create_feed(&feed)?;
                        feed
                    }
                };
                added.push((feed, entry));
            }

            outline.modify(|o| {
                for (_, entry) in &added {
                    o.add_feed(&entry.url, &entry.title, &entry.folder)?;
                }
                Ok(())
            })?;
        }

        for (feed, entry) in &added {
            self.record(Self::feed_change(feed, &entry.folder)).await?;
        }

        report.added = added.len();
        tracing::info!(
            "Imported {} feeds, skipped {}",
            report.added,
            report.skipped
        );
        Ok(report)
    }

    pub async fn export_outline(&self) -> Outline {
        self.ctx.outline.read().await.outline().clone()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::harness;
    use super::*;
    use crate::changelog::{KeyMaterial, MemoryRelay, Synchronizer};
    use crate::outline::OutlineFile;
    use crate::pipeline::testing::{rss, ScriptedFetcher};
    use crate::store::{ChangeQueue, SqliteStore};

    const URL: &str = "https://example.com/feed.xml";

    fn add(url: &str, folder: &str) -> AddFeedArgs {
        AddFeedArgs {
            url: url.into(),
            title: None,
            folder: Some(folder.into()),
        }
    }

    fn synced_facade(relay: &Arc<MemoryRelay>, device: &str) -> (Facade, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let outline = OutlineFile::load(dir.path().join("feeds.opml")).unwrap();
        let sync = Synchronizer::new(
            store.clone(),
            KeyMaterial::derive("shared").unwrap(),
            "me",
            device,
        )
        .with_relay(relay.clone());
        let ctx = AppContext::with_parts(store, Arc::new(ScriptedFetcher::default()), outline, 2)
            .with_sync(Some(sync));
        (Facade::new(Arc::new(ctx)), dir)
    }

    #[tokio::test]
    async fn test_add_feed_populates_store_and_outline() {
        let h = harness();
        let result = h.facade.add_feed(add(URL, "Tech")).await.unwrap();
        assert_eq!(result.folder, "Tech");

        let feeds = h.facade.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert!(feeds[0].in_outline);
        assert_eq!(feeds[0].feed.folder.as_deref(), Some("Tech"));

        let on_disk = std::fs::read_to_string(h.dir.path().join("feeds.opml")).unwrap();
        assert!(on_disk.contains(URL));
    }

    #[tokio::test]
    async fn test_add_feed_rejects_bad_url_and_duplicates() {
        let h = harness();
        let err = h.facade.add_feed(add("ftp://example.com/feed", "")).await.unwrap_err();
        assert!(matches!(err, DigestError::InvalidInput(_)));

        h.facade.add_feed(add(URL, "")).await.unwrap();
        let err = h.facade.add_feed(add(URL, "Other")).await.unwrap_err();
        assert!(matches!(err, DigestError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_add_remove_add_round_trip() {
        let h = harness();
        h.facade.add_feed(add(URL, "Tech")).await.unwrap();
        h.facade
            .remove_feed(FeedUrlArgs { url: URL.into() })
            .await
            .unwrap();

        assert!(h.facade.export_outline().await.is_empty());
        assert!(h.facade.list_feeds().await.unwrap().is_empty());
        h.facade.add_feed(add(URL, "Tech")).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_unknown_feed_is_not_found() {
        let h = harness();
        let err = h
            .facade
            .remove_feed(FeedUrlArgs { url: URL.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_keeps_entries_when_outline_write_fails() {
        let h = harness();
        h.facade.add_feed(add(URL, "Tech")).await.unwrap();
        h.fetcher.push_body(URL, &rss("Example", &["g1", "g2"]), None);
        h.facade.sync_feeds(SyncFeedsArgs::default()).await.unwrap();
        let store = &h.facade.context().store;
        let feed_id = store.get_feed_by_url(URL).unwrap().id;

        // A directory in place of the file makes the rename fail.
        let path = h.dir.path().join("feeds.opml");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = h
            .facade
            .remove_feed(FeedUrlArgs { url: URL.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Io(_)));
        assert_eq!(store.count_entries(Some(&feed_id)).unwrap(), 2);
        assert!(h.facade.export_outline().await.contains(URL));
    }

    #[tokio::test]
    async fn test_add_feed_known_to_store_takes_requested_folder() {
        let h = harness();
        let store = &h.facade.context().store;
        store.create_feed(&Feed::new(URL)).unwrap();

        h.facade.add_feed(add(URL, "Tech")).await.unwrap();
        assert_eq!(
            store.get_feed_by_url(URL).unwrap().folder.as_deref(),
            Some("Tech")
        );
        assert_eq!(h.facade.export_outline().await.find(URL).unwrap().folder, "Tech");
    }

    #[tokio::test]
    async fn test_move_updates_store_folder() {
        let h = harness();
        h.facade.add_feed(add(URL, "Tech")).await.unwrap();

        let same = h
            .facade
            .move_feed(MoveFeedArgs {
                url: URL.into(),
                folder: "Tech".into(),
            })
            .await
            .unwrap();
        assert!(!same.moved);

        let moved = h
            .facade
            .move_feed(MoveFeedArgs {
                url: URL.into(),
                folder: "".into(),
            })
            .await
            .unwrap();
        assert!(moved.moved);
        let feed = h.facade.context().store.get_feed_by_url(URL).unwrap();
        assert_eq!(feed.folder, None);
        assert!(h.facade.export_outline().await.folders().is_empty());
    }

    #[tokio::test]
    async fn test_sync_feeds_adopts_titles_into_outline() {
        let h = harness();
        h.facade.add_feed(add(URL, "")).await.unwrap();
        h.fetcher.push_body(URL, &rss("Example Blog", &["g1"]), None);

        let report = h.facade.sync_feeds(SyncFeedsArgs::default()).await.unwrap();
        assert_eq!(report.total_new, 1);

        let outline = h.facade.export_outline().await;
        assert_eq!(outline.find(URL).unwrap().title, "Example Blog");
    }

    #[tokio::test]
    async fn test_sync_single_unknown_feed() {
        let h = harness();
        let err = h
            .facade
            .sync_feeds(SyncFeedsArgs {
                url: Some(URL.into()),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_entries_read_flow() {
        let h = harness();
        h.facade.add_feed(add(URL, "")).await.unwrap();
        h.fetcher.push_body(URL, &rss("Example", &["g1", "g2"]), None);
        h.facade.sync_feeds(SyncFeedsArgs::default()).await.unwrap();

        let page = h
            .facade
            .list_entries(ListEntriesArgs {
                unread_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.count, 2);

        let id = page.entries[0].id.clone();
        let prefix = id[..8].to_string();
        let read = h
            .facade
            .mark_read(EntryIdArgs {
                entry_id: prefix.clone(),
            })
            .await
            .unwrap();
        assert!(read.read && read.read_at.is_some());

        let view = h.facade.get_entry(EntryIdArgs { entry_id: prefix }).unwrap();
        assert_eq!(view.feed_url, URL);

        let unread = h
            .facade
            .mark_unread(EntryIdArgs { entry_id: id })
            .await
            .unwrap();
        assert!(!unread.read && unread.read_at.is_none());
    }

    #[tokio::test]
    async fn test_list_entries_limit_zero() {
        let h = harness();
        let page = h
            .facade
            .list_entries(ListEntriesArgs {
                limit: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.count, 0);
    }

    #[tokio::test]
    async fn test_sync_changes_without_identity() {
        let h = harness();
        let err = h
            .facade
            .sync_changes(SyncChangesArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_membership_replicates_into_peer_outline() {
        let relay = Arc::new(MemoryRelay::new());
        let (laptop, _d1) = synced_facade(&relay, "laptop");
        let (phone, _d2) = synced_facade(&relay, "phone");

        laptop.add_feed(add(URL, "Tech")).await.unwrap();
        laptop
            .move_feed(MoveFeedArgs {
                url: URL.into(),
                folder: "News".into(),
            })
            .await
            .unwrap();
        assert_eq!(laptop.context().store.pending_count().unwrap(), 2);

        laptop
            .sync_changes(SyncChangesArgs {
                action: SyncAction::Push,
            })
            .await
            .unwrap();
        phone.sync_changes(SyncChangesArgs::default()).await.unwrap();

        let outline = phone.export_outline().await;
        assert_eq!(outline.find(URL).unwrap().folder, "News");
        assert!(phone.context().store.find_feed_by_url(URL).unwrap().is_some());

        laptop
            .remove_feed(FeedUrlArgs { url: URL.into() })
            .await
            .unwrap();
        laptop.sync_changes(SyncChangesArgs::default()).await.unwrap();
        phone.sync_changes(SyncChangesArgs::default()).await.unwrap();

        assert!(phone.export_outline().await.is_empty());
        assert!(phone.context().store.find_feed_by_url(URL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_skips_known_feeds() {
        let h = harness();
        h.facade.add_feed(add(URL, "")).await.unwrap();

        let mut incoming = Outline::default();
        incoming.add_feed(URL, "Known", "").unwrap();
        incoming
            .add_feed("https://new.example/feed", "New", "Imported")
            .unwrap();

        let report = h.facade.import_outline(&incoming).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);

        let feed = h
            .facade
            .context()
            .store
            .get_feed_by_url("https://new.example/feed")
            .unwrap();
        assert_eq!(feed.title.as_deref(), Some("New"));
        assert_eq!(
            h.facade.export_outline().await.folders(),
            vec!["Imported".to_string()]
        );
    }
}
