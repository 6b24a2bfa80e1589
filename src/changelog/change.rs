use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::DigestError;
use crate::domain::ReadStateKey;

pub const ENTITY_FEED: &str = "feed";
pub const ENTITY_READ_STATE: &str = "read_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Upsert => "upsert",
            ChangeOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPayload {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStatePayload {
    pub feed_url: String,
    pub guid: String,
    pub read: bool,
    /// When the state was set. Unread changes carry the time of the unmark.
    pub read_at: DateTime<Utc>,
}

impl ReadStatePayload {
    pub fn key(&self) -> ReadStateKey {
        ReadStateKey {
            feed_url: self.feed_url.clone(),
            guid: self.guid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeBody {
    Feed(FeedPayload),
    FeedDeleted,
    ReadState(ReadStatePayload),
    /// An entity this build does not know about. Kept so it can be skipped
    /// on apply instead of failing the pull.
    Unknown {
        entity: String,
        payload: Option<Value>,
    },
}

/// A replicated change, decrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireChange", into = "WireChange")]
pub struct Change {
    pub entity_id: String,
    pub op: ChangeOp,
    pub deleted: bool,
    pub ts: DateTime<Utc>,
    pub body: ChangeBody,
}

impl Change {
    pub fn feed_upsert(payload: FeedPayload, ts: DateTime<Utc>) -> Self {
        Self {
            entity_id: payload.url.clone(),
            op: ChangeOp::Upsert,
            deleted: false,
            ts,
            body: ChangeBody::Feed(payload),
        }
    }

    pub fn feed_delete(url: &str, ts: DateTime<Utc>) -> Self {
        Self {
            entity_id: url.to_string(),
            op: ChangeOp::Delete,
            deleted: true,
            ts,
            body: ChangeBody::FeedDeleted,
        }
    }

    pub fn read_state(payload: ReadStatePayload) -> Self {
        Self {
            entity_id: payload.key().entity_id(),
            op: ChangeOp::Upsert,
            deleted: false,
            ts: payload.read_at,
            body: ChangeBody::ReadState(payload),
        }
    }

    pub fn entity(&self) -> &str {
        match &self.body {
            ChangeBody::Feed(_) | ChangeBody::FeedDeleted => ENTITY_FEED,
            ChangeBody::ReadState(_) => ENTITY_READ_STATE,
            ChangeBody::Unknown { entity, .. } => entity,
        }
    }
}

/// Plaintext shape of a change: `{ entity, entity_id, op, deleted, ts, payload }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireChange {
    entity: String,
    entity_id: String,
    op: ChangeOp,
    #[serde(default)]
    deleted: bool,
    ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

fn payload<T: serde::de::DeserializeOwned>(
    entity: &str,
    payload: Option<Value>,
) -> Result<T, DigestError> {
    let value = payload
        .ok_or_else(|| DigestError::Serialization(format!("{entity} change without payload")))?;
    Ok(serde_json::from_value(value)?)
}

impl TryFrom<WireChange> for Change {
    type Error = DigestError;

    fn try_from(wire: WireChange) -> Result<Self, Self::Error> {
        let body = match wire.entity.as_str() {
            ENTITY_FEED if wire.op == ChangeOp::Delete || wire.deleted => ChangeBody::FeedDeleted,
            ENTITY_FEED => ChangeBody::Feed(payload(&wire.entity, wire.payload)?),
            ENTITY_READ_STATE if wire.op == ChangeOp::Delete => {
                return Err(DigestError::Serialization(
                    "read_state changes cannot be deletes".into(),
                ))
            }
            ENTITY_READ_STATE => ChangeBody::ReadState(payload(&wire.entity, wire.payload)?),
            _ => ChangeBody::Unknown {
                entity: wire.entity,
                payload: wire.payload,
            },
        };

        Ok(Change {
            entity_id: wire.entity_id,
            op: wire.op,
            deleted: wire.deleted,
            ts: wire.ts,
            body,
        })
    }
}

impl From<Change> for WireChange {
    fn from(change: Change) -> Self {
        let entity = change.entity().to_string();
        let payload = match change.body {
            ChangeBody::Feed(p) => serde_json::to_value(p).ok(),
            ChangeBody::FeedDeleted => None,
            ChangeBody::ReadState(p) => serde_json::to_value(p).ok(),
            ChangeBody::Unknown { payload, .. } => payload,
        };
        WireChange {
            entity,
            entity_id: change.entity_id,
            op: change.op,
            deleted: change.deleted,
            ts: change.ts,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_feed_upsert_wire_shape() {
        let change = Change::feed_upsert(
            FeedPayload {
                url: "https://example.com/feed".into(),
                title: Some("Example".into()),
                folder: Some("Tech".into()),
                created_at: ts(),
            },
            ts(),
        );
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["entity"], "feed");
        assert_eq!(value["entity_id"], "https://example.com/feed");
        assert_eq!(value["op"], "upsert");
        assert_eq!(value["deleted"], false);
        assert_eq!(value["payload"]["folder"], "Tech");
    }

    #[test]
    fn test_feed_delete_has_no_payload() {
        let change = Change::feed_delete("https://example.com/feed", ts());
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["deleted"], true);
        assert!(value.get("payload").is_none());

        let parsed: Change = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.body, ChangeBody::FeedDeleted);
    }

    #[test]
    fn test_deleted_flag_wins_over_upsert_op() {
        let parsed: Change = serde_json::from_value(json!({
            "entity": "feed",
            "entity_id": "https://example.com/feed",
            "op": "upsert",
            "deleted": true,
            "ts": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(parsed.body, ChangeBody::FeedDeleted);
    }

    #[test]
    fn test_read_state_entity_id() {
        let change = Change::read_state(ReadStatePayload {
            feed_url: "https://example.com/feed".into(),
            guid: "g1".into(),
            read: true,
            read_at: ts(),
        });
        assert_eq!(change.entity_id, "https://example.com/feed:g1");
        assert_eq!(change.entity(), ENTITY_READ_STATE);
        assert_eq!(change.ts, ts());
    }

    #[test]
    fn test_unknown_entity_parses() {
        let parsed: Change = serde_json::from_value(json!({
            "entity": "tag",
            "entity_id": "rust",
            "op": "upsert",
            "ts": "2024-05-01T10:00:00Z",
            "payload": {"color": "orange"},
        }))
        .unwrap();
        assert_eq!(parsed.entity(), "tag");
        assert!(matches!(parsed.body, ChangeBody::Unknown { .. }));

        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["payload"]["color"], "orange");
    }

    #[test]
    fn test_known_entity_without_payload_fails() {
        let result: Result<Change, _> = serde_json::from_value(json!({
            "entity": "read_state",
            "entity_id": "u:g",
            "op": "upsert",
            "ts": "2024-05-01T10:00:00Z",
        }));
        assert!(result.is_err());
    }
}
