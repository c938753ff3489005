use crate::store::json_file_store::FORMAT_VERSION;
use crate::traits::{KeyValueStore, PersistenceMetadata};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracker_core::TrackerResult;
use uuid::Uuid;

/// Process-local store, for tests and for sessions that opt out of disk persistence.
#[derive(Debug)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    instance_id: Uuid,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<Vec<u8>>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> TrackerResult<PersistenceMetadata> {
        self.values.lock().insert(key.to_string(), value);
        Ok(PersistenceMetadata::new(FORMAT_VERSION, self.instance_id))
    }

    async fn remove(&self, key: &str) -> TrackerResult<bool> {
        Ok(self.values.lock().remove(key).is_some())
    }
}
