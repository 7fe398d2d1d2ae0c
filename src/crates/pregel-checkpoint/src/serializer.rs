//! Serialization protocol used by savers to store checkpoints as bytes

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Converts checkpoint data to and from bytes
///
/// Savers store serialized bytes rather than live values, so a stored
/// checkpoint can't be mutated through a reference the caller still holds.
pub trait SerializerProtocol: Send + Sync {
    /// Short name recorded next to stored data
    fn name(&self) -> &'static str;

    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// JSON serializer (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};
    use serde_json::json;

    #[test]
    fn test_checkpoint_bytes_round_trip() {
        let serializer = JsonSerializer::new();
        let mut checkpoint = Checkpoint::empty();
        checkpoint
            .channel_values
            .insert("x".to_string(), json!({"kind": "last_value", "state": 3}));

        let bytes = serializer.dumps(&checkpoint).unwrap();
        let restored: Checkpoint = serializer.loads(&bytes).unwrap();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn test_metadata_extra_is_flattened() {
        let serializer = JsonSerializer::new();
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Loop)
            .with_extra("run".to_string(), json!("r-1"));

        let bytes = serializer.dumps(&metadata).unwrap();
        let raw: serde_json::Value = serializer.loads(&bytes).unwrap();
        assert_eq!(raw["run"], json!("r-1"));
        assert_eq!(raw["source"], json!("loop"));
    }

    #[test]
    fn test_loads_rejects_garbage() {
        let serializer = JsonSerializer::new();
        let result: Result<Checkpoint> = serializer.loads(b"not json");
        assert!(result.is_err());
    }
}
