use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};

use crate::app::{DigestError, Result};
use crate::fetcher::{FetchResult, Fetcher, Validators};

pub const DEFAULT_USER_AGENT: &str = concat!("rssdigest/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_options(DEFAULT_USER_AGENT, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DigestError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn conditional_headers(validators: Validators<'_>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(etag) = validators.etag.filter(|v| !v.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        if let Some(last_modified) = validators.last_modified.filter(|v| !v.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, validators: Validators<'_>) -> Result<FetchResult> {
        let response = self
            .client
            .get(url)
            .headers(Self::conditional_headers(validators))
            .send()
            .await
            .map_err(|e| DigestError::Fetch(format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => return Ok(FetchResult::NotModified),
            StatusCode::OK => {}
            status => {
                return Err(DigestError::Fetch(format!("{url}: unexpected status {status}")));
            }
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| DigestError::Fetch(format!("{url}: {e}")))?
            .to_vec();

        Ok(FetchResult::Content {
            body,
            etag,
            last_modified,
        })
    }
}
