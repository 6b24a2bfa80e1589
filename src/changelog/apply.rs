use serde::Serialize;

use crate::app::Result;
use crate::changelog::change::{Change, ChangeBody};
use crate::store::{FeedUpsert, ReadStateApply, Store};

/// What applying one change did to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Applied {
    FeedUpserted {
        url: String,
        title: Option<String>,
        folder: Option<String>,
        created: bool,
    },
    FeedDeleted {
        url: String,
        existed: bool,
    },
    ReadState {
        entity_id: String,
        outcome: ReadStateOutcome,
    },
    Ignored {
        entity: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStateOutcome {
    Applied,
    Stale,
    Orphan,
}

impl From<ReadStateApply> for ReadStateOutcome {
    fn from(apply: ReadStateApply) -> Self {
        match apply {
            ReadStateApply::Applied => ReadStateOutcome::Applied,
            ReadStateApply::Skipped => ReadStateOutcome::Stale,
            ReadStateApply::Orphan => ReadStateOutcome::Orphan,
        }
    }
}

/// Apply a decrypted change. Applying the same change again leaves the store
/// as it was after the first application.
pub fn apply_change<S: Store + ?Sized>(store: &S, change: &Change) -> Result<Applied> {
    match &change.body {
        ChangeBody::FeedDeleted => {
            let url = change.entity_id.clone();
            let existed = store.delete_feed_by_url(&url)?;
            tracing::debug!("Replicated delete of {} (existed: {})", url, existed);
            Ok(Applied::FeedDeleted { url, existed })
        }
        ChangeBody::Feed(payload) => {
            let folder = payload.folder.as_deref().filter(|f| !f.is_empty());
            let upsert = store.upsert_replicated_feed(
                &payload.url,
                payload.title.as_deref(),
                folder,
                payload.created_at,
            )?;
            tracing::debug!("Replicated upsert of {} ({:?})", payload.url, upsert);
            Ok(Applied::FeedUpserted {
                url: payload.url.clone(),
                title: payload.title.clone(),
                folder: folder.map(String::from),
                created: upsert == FeedUpsert::Created,
            })
        }
        ChangeBody::ReadState(payload) => {
            let outcome = store.apply_read_state(&payload.key(), payload.read, payload.read_at)?;
            Ok(Applied::ReadState {
                entity_id: change.entity_id.clone(),
                outcome: outcome.into(),
            })
        }
        ChangeBody::Unknown { entity, .. } => {
            tracing::debug!("Ignoring change for unknown entity {}", entity);
            Ok(Applied::Ignored {
                entity: entity.clone(),
            })
        }
    }
}
