use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::app::{DigestError, Result};
use crate::domain::EntryFilter;
use crate::facade::dates::parse_date;

/// Decode a tool's argument object. Missing arguments count as `{}`.
pub fn parse_args<T: DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = match args {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| DigestError::InvalidInput(e.to_string()))
}

/// Check that `raw` is an absolute http(s) URL with a host. The URL is kept
/// as written (minus surrounding whitespace) since feeds are keyed by it.
pub fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| DigestError::InvalidInput(format!("invalid url {trimmed:?}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DigestError::InvalidInput(format!(
            "url scheme must be http or https, got {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(DigestError::InvalidInput(format!("url {trimmed:?} has no host")));
    }
    Ok(trimmed.to_string())
}

fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DigestError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFeedArgs {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

impl AddFeedArgs {
    pub fn validate(mut self) -> Result<Self> {
        self.url = validate_url(&self.url)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedUrlArgs {
    pub url: String,
}

impl FeedUrlArgs {
    pub fn validate(mut self) -> Result<Self> {
        self.url = validate_url(&self.url)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveFeedArgs {
    pub url: String,
    /// Target folder; empty means the root.
    pub folder: String,
}

impl MoveFeedArgs {
    pub fn validate(mut self) -> Result<Self> {
        self.url = validate_url(&self.url)?;
        self.folder = self.folder.trim().to_string();
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncFeedsArgs {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub force: bool,
}

impl SyncFeedsArgs {
    pub fn validate(mut self) -> Result<Self> {
        if let Some(url) = self.url.take() {
            self.url = Some(validate_url(&url)?);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEntriesArgs {
    #[serde(default)]
    pub feed_id: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ListEntriesArgs {
    /// Resolve into a store filter. `feed_id` is resolved by the caller.
    pub fn to_filter(&self) -> Result<EntryFilter> {
        if self.limit.is_some_and(|l| l < 0) {
            return Err(DigestError::InvalidInput("limit must be non-negative".into()));
        }
        if self.offset.is_some_and(|o| o < 0) {
            return Err(DigestError::InvalidInput("offset must be non-negative".into()));
        }

        Ok(EntryFilter {
            feed_id: None,
            guid: None,
            unread_only: self.unread_only,
            since: self.since.as_deref().map(parse_date).transpose()?,
            until: self.until.as_deref().map(parse_date).transpose()?,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryIdArgs {
    pub entry_id: String,
}

impl EntryIdArgs {
    pub fn validate(self) -> Result<Self> {
        non_empty("entry_id", &self.entry_id)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkMarkReadArgs {
    pub before: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Push,
    Pull,
    #[default]
    Sync,
    Status,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncChangesArgs {
    #[serde(default)]
    pub action: SyncAction,
}
