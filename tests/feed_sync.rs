mod common;

use rssdigest::app::DigestError;
use rssdigest::domain::EntryFilter;
use rssdigest::facade::args::{
    EntryIdArgs, FeedUrlArgs, ListEntriesArgs, MoveFeedArgs, SyncFeedsArgs,
};
use rssdigest::store::Store;

use common::{add_args, device, rss};

const URL: &str = "https://example.com/feed.xml";

fn only(url: &str) -> SyncFeedsArgs {
    SyncFeedsArgs {
        url: Some(url.into()),
        force: false,
    }
}

#[tokio::test]
async fn fresh_fetch_then_not_modified() {
    let d = device();
    d.facade.add_feed(add_args(URL, "")).await.unwrap();

    d.fetcher.body(URL, rss(&["g1"]), Some("v1"));
    let first = d.facade.sync_feeds(only(URL)).await.unwrap();
    assert_eq!(first.total_new, 1);
    let feed = d.store.get_feed_by_url(URL).unwrap();
    assert_eq!(feed.etag.as_deref(), Some("v1"));
    assert_eq!(feed.title.as_deref(), Some("Example Blog"));

    d.fetcher.not_modified(URL);
    let second = d.facade.sync_feeds(only(URL)).await.unwrap();
    assert_eq!(second.results[0].new_entries, 0);
    assert!(second.results[0].was_cached);

    let seen = d.fetcher.seen();
    assert_eq!(seen[0].etag, None);
    assert_eq!(seen[1].etag.as_deref(), Some("v1"));

    let after = d.store.get_feed_by_url(URL).unwrap();
    assert_eq!(after.etag.as_deref(), Some("v1"));
    assert_eq!(d.store.count_entries(Some(&after.id)).unwrap(), 1);
}

#[tokio::test]
async fn duplicate_guids_across_runs() {
    let d = device();
    d.facade.add_feed(add_args(URL, "")).await.unwrap();

    d.fetcher.body(URL, rss(&["g1", "g2"]), None);
    d.facade.sync_feeds(only(URL)).await.unwrap();
    d.fetcher.body(URL, rss(&["g2", "g3"]), None);
    let second = d.facade.sync_feeds(only(URL)).await.unwrap();
    assert_eq!(second.total_new, 1);

    let mut guids: Vec<String> = d
        .store
        .list_entries(&EntryFilter::default())
        .unwrap()
        .into_iter()
        .map(|e| e.guid)
        .collect();
    guids.sort();
    assert_eq!(guids, ["g1", "g2", "g3"]);
}

#[tokio::test]
async fn remove_cascades_to_entries_and_outline() {
    let d = device();
    d.facade.add_feed(add_args(URL, "Tech")).await.unwrap();
    d.fetcher.body(URL, rss(&["a", "b", "c", "d", "e"]), None);
    d.facade.sync_feeds(only(URL)).await.unwrap();
    let feed_id = d.store.get_feed_by_url(URL).unwrap().id;
    assert_eq!(d.store.count_entries(Some(&feed_id)).unwrap(), 5);

    let removed = d
        .facade
        .remove_feed(FeedUrlArgs { url: URL.into() })
        .await
        .unwrap();
    assert_eq!(removed.removed_entries, 5);
    assert_eq!(d.store.count_entries(Some(&feed_id)).unwrap(), 0);

    let outline = d.facade.export_outline().await;
    assert!(!outline.contains(URL));
    assert!(outline.folders().is_empty());

    // The URL can be subscribed again.
    d.facade.add_feed(add_args(URL, "")).await.unwrap();
    assert!(d.facade.export_outline().await.contains(URL));
}

#[tokio::test]
async fn move_is_idempotent_and_prunes_empty_folders() {
    let d = device();
    let other = "https://other.example/rss";
    d.facade.add_feed(add_args(URL, "Tech")).await.unwrap();

    let same = d
        .facade
        .move_feed(MoveFeedArgs {
            url: URL.into(),
            folder: "Tech".into(),
        })
        .await
        .unwrap();
    assert!(!same.moved);

    let moved = d
        .facade
        .move_feed(MoveFeedArgs {
            url: URL.into(),
            folder: "News".into(),
        })
        .await
        .unwrap();
    assert!(moved.moved);

    let outline = d.facade.export_outline().await;
    assert_eq!(outline.find(URL).unwrap().folder, "News");
    assert!(outline.feeds_in_folder("Tech").is_empty());
    assert!(!outline.folders().contains(&"Tech".to_string()));

    // A folder that still holds another feed survives the move.
    d.facade.add_feed(add_args(other, "News")).await.unwrap();
    d.facade
        .move_feed(MoveFeedArgs {
            url: URL.into(),
            folder: "Tech".into(),
        })
        .await
        .unwrap();
    let outline = d.facade.export_outline().await;
    assert_eq!(outline.feeds_in_folder("News").len(), 1);
    assert_eq!(outline.feeds_in_folder("Tech").len(), 1);
}

#[tokio::test]
async fn outline_file_survives_reload() {
    let d = device();
    d.facade.add_feed(add_args(URL, "Tech")).await.unwrap();

    let bytes = std::fs::read(d.dir.path().join("feeds.opml")).unwrap();
    let reloaded = rssdigest::outline::Outline::parse(&bytes).unwrap();
    assert_eq!(reloaded, d.facade.export_outline().await);
}

#[tokio::test]
async fn read_flag_tracks_read_at() {
    let d = device();
    d.facade.add_feed(add_args(URL, "")).await.unwrap();
    d.fetcher.body(URL, rss(&["g1", "g2"]), None);
    d.facade.sync_feeds(only(URL)).await.unwrap();

    let entry_id = d.store.list_entries(&EntryFilter::default()).unwrap()[0]
        .id
        .clone();
    let args = || EntryIdArgs {
        entry_id: entry_id.clone(),
    };

    for read in [true, true, false, true, false, false] {
        let entry = if read {
            d.facade.mark_read(args()).await.unwrap()
        } else {
            d.facade.mark_unread(args()).await.unwrap()
        };
        assert_eq!(entry.read, read);
        assert_eq!(entry.read_at.is_some(), read);
    }
}

#[tokio::test]
async fn batch_sync_reports_failures_as_data() {
    let d = device();
    let broken = "https://broken.example/feed";
    d.facade.add_feed(add_args(URL, "")).await.unwrap();
    d.facade.add_feed(add_args(broken, "")).await.unwrap();
    d.fetcher.body(URL, rss(&["g1"]), None);

    let report = d.facade.sync_feeds(SyncFeedsArgs::default()).await.unwrap();
    assert_eq!(report.total_feeds, 2);
    assert_eq!(report.total_new, 1);
    assert_eq!(report.total_errors, 1);

    let feed = d.store.get_feed_by_url(broken).unwrap();
    assert_eq!(feed.error_count, 1);
    assert!(feed.last_error.is_some());

    // A single-feed sync propagates the failure.
    let err = d.facade.sync_feeds(only(broken)).await.unwrap_err();
    assert!(matches!(err, DigestError::Fetch(_)));
}

#[tokio::test]
async fn pagination_boundaries() {
    let d = device();
    d.facade.add_feed(add_args(URL, "")).await.unwrap();
    d.fetcher.body(URL, rss(&["g1", "g2", "g3"]), None);
    d.facade.sync_feeds(only(URL)).await.unwrap();

    let none = d
        .facade
        .list_entries(ListEntriesArgs {
            limit: Some(0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(none.count, 0);

    let beyond = d
        .facade
        .list_entries(ListEntriesArgs {
            offset: Some(10),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(beyond.count, 0);

    let err = d
        .facade
        .list_entries(ListEntriesArgs {
            limit: Some(-1),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DigestError::InvalidInput(_)));
}
