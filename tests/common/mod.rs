#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use rssdigest::app::{AppContext, DigestError, Result};
use rssdigest::changelog::{
    KeyMaterial, MemoryRelay, PulledRecord, Relay, RelayRecord, Synchronizer,
};
use rssdigest::facade::args::AddFeedArgs;
use rssdigest::facade::Facade;
use rssdigest::fetcher::{FetchResult, Fetcher, Validators};
use rssdigest::outline::OutlineFile;
use rssdigest::store::SqliteStore;

pub const SEED: &str = "correct horse battery staple";

/// Conditional headers seen by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub url: String,
    pub etag: Option<String>,
}

/// Serves queued responses per URL; fails when the queue is empty.
#[derive(Default)]
pub struct FakeFetcher {
    queue: Mutex<HashMap<String, VecDeque<FetchResult>>>,
    seen: Mutex<Vec<Seen>>,
}

impl FakeFetcher {
    pub fn body(&self, url: &str, body: String, etag: Option<&str>) {
        self.enqueue(
            url,
            FetchResult::Content {
                body: body.into_bytes(),
                etag: etag.map(String::from),
                last_modified: None,
            },
        );
    }

    pub fn not_modified(&self, url: &str) {
        self.enqueue(url, FetchResult::NotModified);
    }

    fn enqueue(&self, url: &str, result: FetchResult) {
        self.queue
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, validators: Validators<'_>) -> Result<FetchResult> {
        self.seen.lock().unwrap().push(Seen {
            url: url.to_string(),
            etag: validators.etag.map(String::from),
        });
        self.queue
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| DigestError::Fetch(format!("no response queued for {url}")))
    }
}

pub fn rss(guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| {
            format!(
                "<item><title>Post {g}</title><link>https://example.com/posts/{g}</link>\
                 <guid>{g}</guid><pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example Blog</title><link>https://example.com</link><description>Posts</description>{items}</channel></rss>"#
    )
}

/// Shares a [`MemoryRelay`] but drops the connection on the `fail_on`-th pull.
pub struct FlakyRelay {
    inner: Arc<MemoryRelay>,
    pulls: AtomicUsize,
    fail_on: usize,
}

impl FlakyRelay {
    pub fn new(inner: Arc<MemoryRelay>, fail_on: usize) -> Self {
        Self {
            inner,
            pulls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl Relay for FlakyRelay {
    async fn push(&self, records: &[RelayRecord]) -> Result<Vec<String>> {
        self.inner.push(records).await
    }

    async fn pull(&self, since: i64, limit: usize) -> Result<Vec<PulledRecord>> {
        if self.pulls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(DigestError::Transport("connection reset".into()));
        }
        self.inner.pull(since, limit).await
    }
}

pub fn add_args(url: &str, folder: &str) -> AddFeedArgs {
    AddFeedArgs {
        url: url.into(),
        title: None,
        folder: Some(folder.into()),
    }
}

/// One device: a facade over an in-memory store and an outline in a temp dir.
pub struct Device {
    pub facade: Facade,
    pub fetcher: Arc<FakeFetcher>,
    pub store: Arc<SqliteStore>,
    pub dir: TempDir,
}

fn build(sync: impl FnOnce(Arc<SqliteStore>) -> Option<Synchronizer>) -> Device {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let outline = OutlineFile::load(dir.path().join("feeds.opml")).unwrap();
    let ctx = AppContext::with_parts(store.clone(), fetcher.clone(), outline, 4)
        .with_sync(sync(store.clone()));
    Device {
        facade: Facade::new(Arc::new(ctx)),
        fetcher,
        store,
        dir,
    }
}

pub fn device() -> Device {
    build(|_| None)
}

pub fn synced_device(relay: &Arc<MemoryRelay>, device_id: &str) -> Device {
    synced_device_via(relay.clone(), device_id, 100)
}

pub fn synced_device_via(relay: Arc<dyn Relay>, device_id: &str, batch_size: usize) -> Device {
    build(move |store| {
        let keys = KeyMaterial::derive(SEED).unwrap();
        Some(
            Synchronizer::new(store, keys, "reader", device_id)
                .with_relay(relay)
                .with_batch_size(batch_size),
        )
    })
}
