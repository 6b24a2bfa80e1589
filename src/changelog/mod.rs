//! Replication of subscriptions and read state through an untrusted relay.
//!
//! Local changes are encrypted and queued in the store, then pushed in
//! batches. Pulled changes are decrypted, checked against their associated
//! data and applied; the cursor only moves past records that applied.

pub mod apply;
pub mod change;
pub mod crypto;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod relay;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::app::{DigestError, Result};
use crate::store::{ChangeQueue, QueuedChange, SqliteStore};

pub use apply::{apply_change, Applied, ReadStateOutcome};
pub use change::{Change, ChangeBody, ChangeOp, FeedPayload, ReadStatePayload};
pub use crypto::{AssociatedData, Envelope, KeyMaterial};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryRelay;
pub use relay::{HttpRelay, PulledRecord, Relay, RelayRecord};

pub const CURSOR_KEY: &str = "last_pulled_seq";
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub pushed: usize,
    pub pending: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub seq: i64,
    pub change_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    pub applied: Vec<Applied>,
    /// Records written by this device, skipped.
    pub own: usize,
    pub cursor: i64,
    /// The record that stopped the pull, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub configured: bool,
    pub auto_sync: bool,
    pub user_id: String,
    pub device_id: String,
    pub key_id: String,
    pub pending: i64,
    pub cursor: i64,
}

pub struct Synchronizer {
    store: Arc<SqliteStore>,
    keys: KeyMaterial,
    user_id: String,
    device_id: String,
    relay: Option<Arc<dyn Relay>>,
    auto_sync: bool,
    batch_size: usize,
}

impl Synchronizer {
    pub fn new(
        store: Arc<SqliteStore>,
        keys: KeyMaterial,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            keys,
            user_id: user_id.into(),
            device_id: device_id.into(),
            relay: None,
            auto_sync: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn relay(&self) -> Result<&Arc<dyn Relay>> {
        self.relay
            .as_ref()
            .ok_or_else(|| DigestError::NotConfigured("no relay url or token configured".into()))
    }

    fn cursor(&self) -> Result<i64> {
        match self.store.get_state(CURSOR_KEY)? {
            Some(value) => value
                .parse()
                .map_err(|_| DigestError::Serialization(format!("invalid sync cursor {value:?}"))),
            None => Ok(0),
        }
    }

    /// Encrypt and queue a change. Returns the new change id.
    pub fn enqueue(&self, change: &Change) -> Result<String> {
        let change_id = Uuid::new_v4().to_string();
        let op = change.op.as_str();
        let aad = AssociatedData {
            user_id: &self.user_id,
            device_id: &self.device_id,
            entity: change.entity(),
            entity_id: &change.entity_id,
            op,
            ts: change.ts,
        }
        .to_bytes();

        let plaintext = serde_json::to_vec(change)?;
        let envelope = self.keys.seal(&plaintext, &aad)?;

        self.store.enqueue_change(&QueuedChange {
            seq: 0,
            change_id: change_id.clone(),
            entity: change.entity().to_string(),
            entity_id: change.entity_id.clone(),
            op: op.to_string(),
            ts: change.ts,
            envelope: serde_json::to_string(&envelope)?,
        })?;

        tracing::debug!("Queued {} {} change {}", change.entity(), op, change_id);
        Ok(change_id)
    }

    /// Queue a change and, with auto-sync on, push right away. A failed push
    /// leaves the change queued and is only logged.
    pub async fn record(&self, change: &Change) -> Result<String> {
        let change_id = self.enqueue(change)?;
        if self.auto_sync && self.relay.is_some() {
            if let Err(e) = self.push().await {
                tracing::warn!("Auto-sync push failed: {}", e);
            }
        }
        Ok(change_id)
    }

    pub async fn push(&self) -> Result<PushReport> {
        let relay = self.relay()?;
        let mut pushed = 0;

        loop {
            let batch = self.store.pending_changes(self.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let records = batch
                .iter()
                .map(|queued| self.relay_record(queued))
                .collect::<Result<Vec<_>>>()?;
            let acked: HashSet<String> = relay.push(&records).await?.into_iter().collect();

            let prefix: Vec<String> = batch
                .iter()
                .map(|queued| queued.change_id.clone())
                .take_while(|id| acked.contains(id))
                .collect();
            pushed += self.store.remove_changes(&prefix)?;

            if prefix.len() < batch.len() {
                tracing::warn!(
                    "Relay acknowledged {} of {} changes",
                    prefix.len(),
                    batch.len()
                );
                break;
            }
        }

        let pending = self.store.pending_count()?;
        tracing::info!("Pushed {} changes, {} pending", pushed, pending);
        Ok(PushReport { pushed, pending })
    }

    fn relay_record(&self, queued: &QueuedChange) -> Result<RelayRecord> {
        Ok(RelayRecord {
            change_id: queued.change_id.clone(),
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            ts: queued.ts,
            envelope: serde_json::from_str(&queued.envelope)?,
        })
    }

    pub async fn pull(&self) -> Result<PullReport> {
        let mut report = PullReport::default();
        self.pull_into(&mut report).await?;
        Ok(report)
    }

    /// Pull into `report`. Each applied change is committed together with
    /// the cursor, so on error `report` still lists what was applied.
    pub async fn pull_into(&self, report: &mut PullReport) -> Result<()> {
        let relay = self.relay()?;
        let mut cursor = self.cursor()?;
        report.cursor = cursor;

        'pages: loop {
            let page = relay.pull(cursor, self.batch_size).await?;
            let page_len = page.len();
            let start = cursor;

            for pulled in page {
                if pulled.seq <= cursor {
                    continue;
                }
                // Our own changes were applied when they were recorded.
                if pulled.record.device_id == self.device_id {
                    cursor = pulled.seq;
                    self.store.set_state(CURSOR_KEY, &cursor.to_string())?;
                    report.cursor = cursor;
                    report.own += 1;
                    continue;
                }
                let change = match self.open(&pulled.record) {
                    Ok(change) => change,
                    Err(e) => {
                        tracing::warn!(
                            "Stopping pull at seq {} ({}): {}",
                            pulled.seq,
                            pulled.record.change_id,
                            e
                        );
                        report.failed = Some(FailedRecord {
                            seq: pulled.seq,
                            change_id: pulled.record.change_id,
                            error: e.to_string(),
                        });
                        break 'pages;
                    }
                };

                report.applied.push(apply_change(self.store.as_ref(), &change)?);
                cursor = pulled.seq;
                self.store.set_state(CURSOR_KEY, &cursor.to_string())?;
                report.cursor = cursor;
            }

            if page_len < self.batch_size || cursor == start {
                break;
            }
        }

        tracing::info!(
            "Pulled {} changes, cursor at {}",
            report.applied.len(),
            cursor
        );
        Ok(())
    }

    fn open(&self, record: &RelayRecord) -> Result<Change> {
        if record.user_id != self.user_id {
            return Err(DigestError::Crypto(format!(
                "record belongs to user {}",
                record.user_id
            )));
        }

        let claimed = record.envelope.associated_data()?;
        let plaintext = self.keys.open(&record.envelope, &claimed)?;
        let change: Change = serde_json::from_slice(&plaintext)?;

        let expected = AssociatedData {
            user_id: &record.user_id,
            device_id: &record.device_id,
            entity: change.entity(),
            entity_id: &change.entity_id,
            op: change.op.as_str(),
            ts: change.ts,
        }
        .to_bytes();
        if expected != claimed {
            return Err(DigestError::Crypto("associated data mismatch".into()));
        }
        Ok(change)
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        let push = self.push().await?;
        let pull = self.pull().await?;
        Ok(SyncReport { push, pull })
    }

    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            configured: self.relay.is_some(),
            auto_sync: self.auto_sync,
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            key_id: self.keys.key_id().to_string(),
            pending: self.store.pending_count()?,
            cursor: self.cursor()?,
        })
    }
}
