use crate::store::atomic_writer::AtomicWriter;
use crate::traits::{KeyValueStore, PersistenceMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracker_core::{TrackerError, TrackerResult};
use uuid::Uuid;

pub const FORMAT_VERSION: u32 = 1;

/// JSON file-based key-value store.
/// Each key maps to `<dir>/<key>.json` holding one [`JsonEnvelope`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    instance_id: Uuid,
}

/// On-disk wrapper around a stored value
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub version: u32,
    pub metadata: PersistenceMetadata,
    pub data: serde_json::Value,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            instance_id: Uuid::new_v4(),
        }
    }

    /// Create a store with a specific instance ID
    /// (useful for testing or coordinating across instances)
    pub fn with_instance_id(dir: impl AsRef<Path>, instance_id: Uuid) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            instance_id,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`. Keys are restricted to `[A-Za-z0-9_.-]` and may
    /// not start with a dot, so they cannot escape the store directory.
    pub fn path_for(&self, key: &str) -> TrackerResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(TrackerError::Validation(format!(
                "invalid storage key '{}'",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Read the full envelope for `key`, metadata included.
    pub async fn load_envelope(&self, key: &str) -> TrackerResult<Option<JsonEnvelope>> {
        let path = self.path_for(key)?;
        let Some(file_bytes) = AtomicWriter::read_optional(&path).await? else {
            return Ok(None);
        };

        let envelope: JsonEnvelope = serde_json::from_slice(&file_bytes)
            .map_err(|e| TrackerError::Serialization(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(TrackerError::Serialization(format!(
                "Unsupported format version: {}",
                envelope.version
            )));
        }

        tracing::info!("Loaded {} bytes from {}", file_bytes.len(), path.display());
        Ok(Some(envelope))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>> {
        let Some(envelope) = self.load_envelope(key).await? else {
            return Ok(None);
        };
        let data = serde_json::to_vec(&envelope.data)
            .map_err(|e| TrackerError::Serialization(e.to_string()))?;
        Ok(Some(data))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> TrackerResult<PersistenceMetadata> {
        let path = self.path_for(key)?;

        let data: serde_json::Value = serde_json::from_slice(&value)
            .map_err(|e| TrackerError::Serialization(e.to_string()))?;
        let metadata = PersistenceMetadata::new(FORMAT_VERSION, self.instance_id);
        let envelope = JsonEnvelope {
            version: FORMAT_VERSION,
            metadata: metadata.clone(),
            data,
        };

        let json_bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| TrackerError::Serialization(e.to_string()))?;
        AtomicWriter::write_atomic(&path, &json_bytes)
            .await
            .map_err(|e| TrackerError::Persistence(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Saved {} bytes to {}", json_bytes.len(), path.display());
        Ok(metadata)
    }

    async fn remove(&self, key: &str) -> TrackerResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let value = json!({ "timers": [] });
        let metadata = store
            .set("issue_timers", serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();
        assert_eq!(metadata.format_version, FORMAT_VERSION);
        assert_eq!(metadata.instance_id, store.instance_id());
        assert!(dir.path().join("issue_timers.json").exists());

        let loaded = store.get("issue_timers").await.unwrap().unwrap();
        let loaded: serde_json::Value = serde_json::from_slice(&loaded).unwrap();
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("nothing").await.unwrap().is_none());
        assert!(!store.remove("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        for key in ["", "../escape", ".hidden", "a/b"] {
            assert!(
                matches!(store.get(key).await, Err(TrackerError::Validation(_))),
                "key {:?} accepted",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let envelope = json!({
            "version": 99,
            "metadata": {
                "format_version": 99,
                "instance_id": Uuid::new_v4(),
                "saved_at": "2026-01-01T00:00:00Z"
            },
            "data": {}
        });
        std::fs::write(
            dir.path().join("issue_timers.json"),
            serde_json::to_vec(&envelope).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.get("issue_timers").await,
            Err(TrackerError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_set_rejects_non_json() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = store.set("k", b"not json".to_vec()).await.unwrap_err();
        assert!(matches!(err, TrackerError::Serialization(_)));
    }
}
