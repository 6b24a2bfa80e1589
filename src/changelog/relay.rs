use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{DigestError, Result};
use crate::changelog::crypto::Envelope;

const DEVICE_HEADER: &str = "X-Device-ID";
const RELAY_TIMEOUT_SECS: u64 = 30;

/// One change as the relay sees it. Only the envelope carries content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub change_id: String,
    pub user_id: String,
    pub device_id: String,
    pub ts: DateTime<Utc>,
    pub envelope: Envelope,
}

/// A record returned by a pull, tagged with the relay's sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulledRecord {
    pub seq: i64,
    #[serde(flatten)]
    pub record: RelayRecord,
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// Send records, returning the change ids the relay acknowledged.
    async fn push(&self, records: &[RelayRecord]) -> Result<Vec<String>>;

    /// Fetch up to `limit` records with `seq > since`, in ascending order.
    async fn pull(&self, since: i64, limit: usize) -> Result<Vec<PulledRecord>>;
}

#[derive(Serialize)]
struct PushRequest<'a> {
    changes: &'a [RelayRecord],
}

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    acked: Vec<String>,
}

#[derive(Deserialize)]
struct PullResponse {
    #[serde(default)]
    changes: Vec<PulledRecord>,
}

/// Relay reached over HTTPS with a bearer token.
pub struct HttpRelay {
    client: Client,
    changes_url: Url,
    token: String,
    device_id: String,
}

impl HttpRelay {
    pub fn new(base_url: &str, token: &str, device_id: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(DigestError::NotConfigured("relay token is empty".into()));
        }

        let mut base = Url::parse(base_url)
            .map_err(|e| DigestError::Config(format!("invalid relay url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let changes_url = base
            .join("changes")
            .map_err(|e| DigestError::Config(format!("invalid relay url {base_url}: {e}")))?;

        let client = Client::builder()
            .user_agent(crate::fetcher::http_fetcher::DEFAULT_USER_AGENT)
            .timeout(Duration::from_secs(RELAY_TIMEOUT_SECS))
            .build()
            .map_err(|e| DigestError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            changes_url,
            token: token.to_string(),
            device_id: device_id.to_string(),
        })
    }

    fn check_status(status: StatusCode) -> Result<()> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DigestError::NotConfigured(
                format!("relay rejected credentials ({status})"),
            )),
            s => Err(DigestError::Transport(format!("relay returned {s}"))),
        }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn push(&self, records: &[RelayRecord]) -> Result<Vec<String>> {
        let response = self
            .client
            .post(self.changes_url.clone())
            .bearer_auth(&self.token)
            .header(DEVICE_HEADER, &self.device_id)
            .json(&PushRequest { changes: records })
            .send()
            .await
            .map_err(|e| DigestError::Transport(e.to_string()))?;

        Self::check_status(response.status())?;
        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| DigestError::Transport(format!("invalid push response: {e}")))?;
        Ok(body.acked)
    }

    async fn pull(&self, since: i64, limit: usize) -> Result<Vec<PulledRecord>> {
        let mut url = self.changes_url.clone();
        url.query_pairs_mut()
            .append_pair("since", &since.to_string())
            .append_pair("limit", &limit.to_string());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(DEVICE_HEADER, &self.device_id)
            .send()
            .await
            .map_err(|e| DigestError::Transport(e.to_string()))?;

        Self::check_status(response.status())?;
        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| DigestError::Transport(format!("invalid pull response: {e}")))?;
        Ok(body.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RelayRecord {
        RelayRecord {
            change_id: id.into(),
            user_id: "user-1".into(),
            device_id: "laptop".into(),
            ts: Utc::now(),
            envelope: Envelope {
                key_id: "k".into(),
                nonce: "n".into(),
                ciphertext: "c".into(),
                aad: "a".into(),
            },
        }
    }

    #[test]
    fn test_http_relay_requires_token() {
        let result = HttpRelay::new("https://relay.example/api", " ", "laptop");
        assert!(matches!(result, Err(DigestError::NotConfigured(_))));
    }

    #[test]
    fn test_http_relay_changes_url() {
        let relay = HttpRelay::new("https://relay.example/api", "token", "laptop").unwrap();
        assert_eq!(relay.changes_url.as_str(), "https://relay.example/api/changes");

        let relay = HttpRelay::new("https://relay.example/api/", "token", "laptop").unwrap();
        assert_eq!(relay.changes_url.as_str(), "https://relay.example/api/changes");
    }

    #[test]
    fn test_status_mapping() {
        assert!(HttpRelay::check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            HttpRelay::check_status(StatusCode::UNAUTHORIZED),
            Err(DigestError::NotConfigured(_))
        ));
        assert!(matches!(
            HttpRelay::check_status(StatusCode::FORBIDDEN),
            Err(DigestError::NotConfigured(_))
        ));
        assert!(matches!(
            HttpRelay::check_status(StatusCode::BAD_GATEWAY),
            Err(DigestError::Transport(_))
        ));
    }

    #[test]
    fn test_pulled_record_wire_shape() {
        let pulled = PulledRecord {
            seq: 4,
            record: record("c1"),
        };
        let value = serde_json::to_value(&pulled).unwrap();
        assert_eq!(value["seq"], 4);
        assert_eq!(value["change_id"], "c1");
        assert_eq!(value["envelope"]["key_id"], "k");
    }
}
