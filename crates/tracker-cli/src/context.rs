use anyhow::Context;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracker_core::{SyncConfig, TrackerResult};
use tracker_domain::{TimerRegistry, TimerSnapshot};
use tracker_persistence::{JsonFileStore, TimerStore};

pub struct CliContext {
    pub config: SyncConfig,
    timers: TimerStore,
}

impl CliContext {
    /// An explicit config file must parse; the platform default falls back silently.
    pub fn load_config(path: Option<&Path>) -> anyhow::Result<SyncConfig> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                SyncConfig::from_toml(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))
            }
            None => Ok(SyncConfig::load()),
        }
    }

    pub fn open(dir: &Path, config: SyncConfig) -> Self {
        let store = JsonFileStore::new(dir);
        let timers = TimerStore::new(Arc::new(store), config.timer_storage_key.clone());
        Self { config, timers }
    }

    /// Persisted timers, brought up to `now` the way a restarting session would.
    pub async fn registry(&self, now: DateTime<Utc>) -> TrackerResult<TimerRegistry> {
        let mut registry = TimerRegistry::new(self.config.min_log_hours);
        if let Some(snapshot) = self.timers.load().await? {
            registry.restore(snapshot, now, self.config.resume_gap);
        }
        Ok(registry)
    }

    pub async fn save(&self, snapshot: &TimerSnapshot) -> TrackerResult<()> {
        self.timers.save(snapshot).await?;
        Ok(())
    }
}
