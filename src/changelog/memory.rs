use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::app::{DigestError, Result};
use crate::changelog::crypto::Envelope;
use crate::changelog::relay::{PulledRecord, Relay, RelayRecord};

/// In-process relay. Deduplicates by change id like a real relay would.
#[derive(Default)]
pub struct MemoryRelay {
    inner: Mutex<MemoryRelayState>,
}

#[derive(Default)]
struct MemoryRelayState {
    records: Vec<PulledRecord>,
    seen: HashSet<String>,
    ack_limit: Option<usize>,
    unauthorized: bool,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge at most `limit` records per push.
    pub fn set_ack_limit(&self, limit: Option<usize>) {
        if let Ok(mut state) = self.inner.lock() {
            state.ack_limit = limit;
        }
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.unauthorized = unauthorized;
        }
    }

    pub fn records(&self) -> Vec<PulledRecord> {
        self.inner
            .lock()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    /// Replace the envelope of a stored record, as a hostile relay might.
    pub fn tamper(&self, seq: i64, edit: impl FnOnce(&mut Envelope)) {
        if let Ok(mut state) = self.inner.lock() {
            if let Some(r) = state.records.iter_mut().find(|r| r.seq == seq) {
                edit(&mut r.record.envelope);
            }
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryRelayState>> {
        self.inner
            .lock()
            .map_err(|_| DigestError::Transport("relay state poisoned".into()))
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn push(&self, records: &[RelayRecord]) -> Result<Vec<String>> {
        let mut state = self.state()?;
        if state.unauthorized {
            return Err(DigestError::NotConfigured("relay rejected credentials".into()));
        }

        let take = state.ack_limit.unwrap_or(records.len()).min(records.len());
        let mut acked = Vec::with_capacity(take);
        for record in &records[..take] {
            if state.seen.insert(record.change_id.clone()) {
                let seq = state.records.len() as i64 + 1;
                state.records.push(PulledRecord {
                    seq,
                    record: record.clone(),
                });
            }
            acked.push(record.change_id.clone());
        }
        Ok(acked)
    }

    async fn pull(&self, since: i64, limit: usize) -> Result<Vec<PulledRecord>> {
        let state = self.state()?;
        if state.unauthorized {
            return Err(DigestError::NotConfigured("relay rejected credentials".into()));
        }
        Ok(state
            .records
            .iter()
            .filter(|r| r.seq > since)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

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

    #[tokio::test]
    async fn test_memory_relay_deduplicates() {
        let relay = MemoryRelay::new();
        relay.push(&[record("c1"), record("c2")]).await.unwrap();
        let acked = relay.push(&[record("c2"), record("c3")]).await.unwrap();
        assert_eq!(acked, vec!["c2", "c3"]);

        let seqs: Vec<_> = relay.pull(0, 10).await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(relay.pull(2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_relay_partial_ack() {
        let relay = MemoryRelay::new();
        relay.set_ack_limit(Some(1));
        let acked = relay.push(&[record("c1"), record("c2")]).await.unwrap();
        assert_eq!(acked, vec!["c1"]);
    }
}
