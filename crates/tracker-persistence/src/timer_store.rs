//! Durable home of the timer registry.

use std::sync::Arc;
use tracker_core::TrackerResult;
use tracker_domain::TimerSnapshot;

use crate::serialization::JsonSerializer;
use crate::traits::{KeyValueStore, PersistenceMetadata, Serializer};

#[derive(Clone)]
pub struct TimerStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TimerStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn save(&self, snapshot: &TimerSnapshot) -> TrackerResult<PersistenceMetadata> {
        let bytes = JsonSerializer.serialize(snapshot)?;
        let metadata = self.store.set(&self.key, bytes).await?;
        tracing::debug!(
            "Persisted {} timers under '{}'",
            snapshot.timers.len(),
            self.key
        );
        Ok(metadata)
    }

    /// `None` when nothing has been saved under the key yet.
    pub async fn load(&self) -> TrackerResult<Option<TimerSnapshot>> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            tracing::debug!("No persisted timers under '{}'", self.key);
            return Ok(None);
        };
        let snapshot: TimerSnapshot = JsonSerializer.deserialize(&bytes)?;
        tracing::debug!(
            "Loaded {} timers from '{}'",
            snapshot.timers.len(),
            self.key
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::traits::MockKeyValueStore;
    use chrono::Utc;
    use tracker_core::TrackerError;
    use tracker_domain::{IssueStatus, TimerRegistry};

    #[tokio::test]
    async fn test_save_then_load() {
        let store = TimerStore::new(Arc::new(MemoryStore::new()), "issue_timers");
        let mut registry = TimerRegistry::default();
        registry.on_status_change(3, IssueStatus::InProgress, Some(1.0), Utc::now());

        store.save(&registry.snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, registry.snapshot());
    }

    #[tokio::test]
    async fn test_load_empty() {
        let store = TimerStore::new(Arc::new(MemoryStore::new()), "issue_timers");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uses_configured_key() {
        let mut backend = MockKeyValueStore::new();
        backend
            .expect_get()
            .withf(|key| key == "custom_key")
            .times(1)
            .returning(|_| Ok(None));

        let store = TimerStore::new(Arc::new(backend), "custom_key");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut backend = MockKeyValueStore::new();
        backend
            .expect_set()
            .returning(|_, _| Err(TrackerError::Persistence("disk full".into())));

        let store = TimerStore::new(Arc::new(backend), "issue_timers");
        let err = store.save(&TimerSnapshot::default()).await.unwrap_err();
        assert!(matches!(err, TrackerError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_corrupt_value_is_serialization_error() {
        let mut backend = MockKeyValueStore::new();
        backend
            .expect_get()
            .returning(|_| Ok(Some(b"[1,2,3]".to_vec())));

        let store = TimerStore::new(Arc::new(backend), "issue_timers");
        assert!(matches!(
            store.load().await,
            Err(TrackerError::Serialization(_))
        ));
    }
}
