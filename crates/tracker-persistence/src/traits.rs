use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracker_core::TrackerResult;
use uuid::Uuid;

/// Metadata written alongside every persisted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceMetadata {
    /// Version of the envelope format
    pub format_version: u32,
    /// ID of the process instance that performed the save
    pub instance_id: Uuid,
    /// When this value was saved
    pub saved_at: DateTime<Utc>,
}

impl PersistenceMetadata {
    pub fn new(format_version: u32, instance_id: Uuid) -> Self {
        Self {
            format_version,
            instance_id,
            saved_at: Utc::now(),
        }
    }
}

/// Durable local storage addressed by string keys.
///
/// Values are opaque serialized bytes. Implementations decide how they land
/// on disk (or nowhere, for the in-memory store).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if nothing was saved yet
    async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> TrackerResult<PersistenceMetadata>;

    /// Delete the value under `key`; returns whether anything was removed
    async fn remove(&self, key: &str) -> TrackerResult<bool>;
}

/// Trait for serialization/deserialization strategies
pub trait Serializer<T: Send + Sync>: Send + Sync {
    fn serialize(&self, data: &T) -> TrackerResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> TrackerResult<T>;
}
