use crate::traits::Serializer;
use tracker_core::{TrackerError, TrackerResult};

/// JSON serializer for persisted state
pub struct JsonSerializer;

impl<T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync> Serializer<T>
    for JsonSerializer
{
    fn serialize(&self, data: &T) -> TrackerResult<Vec<u8>> {
        serde_json::to_vec(data).map_err(|e| TrackerError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> TrackerResult<T> {
        serde_json::from_slice(bytes).map_err(|e| TrackerError::Serialization(e.to_string()))
    }
}
