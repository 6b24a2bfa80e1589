pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

impl FetchResult {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, FetchResult::NotModified)
    }
}

/// Validators from a previous fetch, sent as conditional request headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validators<'a> {
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

impl<'a> Validators<'a> {
    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str, validators: Validators<'_>) -> Result<FetchResult>;
}
