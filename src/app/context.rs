use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::app::error::Result;
use crate::changelog::{HttpRelay, KeyMaterial, Synchronizer};
use crate::config::{Config, SyncConfig};
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::outline::OutlineFile;
use crate::pipeline::SyncPipeline;
use crate::store::sqlite::SqliteStore;

/// Shared handles for every operation.
///
/// The outline sits behind a single async `RwLock`: writers hold it across
/// both the in-memory change and the file write.
pub struct AppContext {
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub pipeline: SyncPipeline,
    pub outline: RwLock<OutlineFile>,
    pub sync: Option<Synchronizer>,
}

impl AppContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.db_path()?;
        ensure_parent(&db_path)?;
        let store = Arc::new(SqliteStore::new(&db_path)?);

        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::with_options(
            &config.fetch.user_agent,
            Duration::from_secs(config.fetch.timeout_secs),
        )?);

        let outline = OutlineFile::load(config.outline_path()?)?;
        let sync = Self::build_synchronizer(&config.sync, store.clone())?;

        tracing::debug!(
            "Opened {} and {}",
            db_path.display(),
            outline.path().display()
        );

        Ok(Self::with_parts(store, fetcher, outline, config.fetch.workers).with_sync(sync))
    }

    pub fn with_parts(
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        outline: OutlineFile,
        workers: usize,
    ) -> Self {
        let pipeline = SyncPipeline::with_workers(fetcher.clone(), store.clone(), workers);
        Self {
            store,
            fetcher,
            pipeline,
            outline: RwLock::new(outline),
            sync: None,
        }
    }

    pub fn with_sync(mut self, sync: Option<Synchronizer>) -> Self {
        self.sync = sync;
        self
    }

    fn build_synchronizer(
        config: &SyncConfig,
        store: Arc<SqliteStore>,
    ) -> Result<Option<Synchronizer>> {
        let Some((seed, user_id, device_id)) = config.identity() else {
            tracing::debug!("Change-log replication disabled: no seed phrase or identity");
            return Ok(None);
        };

        let keys = KeyMaterial::derive(seed)?;
        let mut sync = Synchronizer::new(store, keys, user_id, device_id)
            .with_auto_sync(config.auto_sync)
            .with_batch_size(config.batch_size);

        if let Some((relay_url, token)) = config.relay() {
            sync = sync.with_relay(Arc::new(HttpRelay::new(relay_url, token, device_id)?));
        }
        Ok(Some(sync))
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
