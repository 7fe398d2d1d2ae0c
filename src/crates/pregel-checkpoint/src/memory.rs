//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every checkpoint of every thread in a
//! `tokio::sync::RwLock<HashMap>`. Checkpoints, metadata and write values are
//! stored as serialized bytes (see [`SerializerProtocol`]) so stored history is
//! isolated from values the caller keeps mutating.
//!
//! ```text
//! thread_id ──► Vec<StoredCheckpoint>       (insertion order, oldest first)
//!                 ├─ config (thread, ns, checkpoint id)
//!                 ├─ checkpoint bytes / metadata bytes
//!                 ├─ parent config
//!                 └─ writes: Vec<StoredWrite> (task id, index, channel, bytes)
//! ```
//!
//! Write bookkeeping per task:
//! - a `put_writes` call carrying regular writes replaces the task's earlier
//!   regular writes and clears its interrupt and error markers
//! - interrupt, resume and error markers replace the task's previous marker
//!   on the same channel
//!
//! Both rules make repeating a call a no-op.

use crate::{
    checkpoint::{
        ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
        PendingWrite, ERROR, INTERRUPT, RESUME,
    },
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fixed storage index of control writes; regular writes use their position
pub fn write_index(channel: &str, position: usize) -> i64 {
    match channel {
        ERROR => -1,
        INTERRUPT => -3,
        RESUME => -4,
        _ => position as i64,
    }
}

#[derive(Debug, Clone)]
struct StoredWrite {
    task_id: String,
    index: i64,
    channel: String,
    value: Vec<u8>,
}

impl StoredWrite {
    fn is_control(&self) -> bool {
        self.index < 0
    }
}

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    checkpoint_id: String,
    config: CheckpointConfig,
    parent_config: Option<CheckpointConfig>,
    checkpoint: Vec<u8>,
    metadata: Vec<u8>,
    writes: Vec<StoredWrite>,
}

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<StoredCheckpoint>>>>;

/// Thread-safe in-memory [`CheckpointSaver`]
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver<S = JsonSerializer> {
    storage: CheckpointStorage,
    serde: S,
}

impl InMemoryCheckpointSaver<JsonSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl Default for InMemoryCheckpointSaver<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SerializerProtocol> InMemoryCheckpointSaver<S> {
    pub fn with_serializer(serde: S) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            serde,
        }
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    /// Remove everything
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn to_tuple(&self, entry: &StoredCheckpoint) -> Result<CheckpointTuple> {
        let pending_writes = entry
            .writes
            .iter()
            .map(|w| {
                Ok(PendingWrite::new(
                    w.task_id.clone(),
                    w.channel.clone(),
                    self.serde.loads::<Value>(&w.value)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CheckpointTuple {
            config: entry.config.clone(),
            checkpoint: self.serde.loads(&entry.checkpoint)?,
            metadata: self.serde.loads(&entry.metadata)?,
            parent_config: entry.parent_config.clone(),
            pending_writes,
        })
    }
}

fn required_thread(config: &CheckpointConfig) -> Result<&str> {
    config
        .thread_id
        .as_deref()
        .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
}

#[async_trait]
impl<S: SerializerProtocol + 'static> CheckpointSaver for InMemoryCheckpointSaver<S> {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = required_thread(config)?;
        let storage = self.storage.read().await;
        let Some(entries) = storage.get(thread_id) else {
            return Ok(None);
        };

        let namespace = config.namespace();
        let mut in_namespace = entries
            .iter()
            .filter(|e| e.config.namespace() == namespace);
        let found = match &config.checkpoint_id {
            Some(id) => in_namespace.find(|e| &e.checkpoint_id == id),
            None => in_namespace.last(),
        };
        found.map(|entry| self.to_tuple(entry)).transpose()
    }

    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;

        let mut thread_ids: Vec<&String> = match config.and_then(|c| c.thread_id.as_ref()) {
            Some(thread_id) => vec![thread_id],
            None => storage.keys().collect(),
        };
        thread_ids.sort();
        let namespace = config.and_then(|c| c.checkpoint_ns.as_deref());
        let before_id = before.and_then(|b| b.checkpoint_id.as_deref());

        let mut results = Vec::new();
        'threads: for thread_id in thread_ids {
            let Some(entries) = storage.get(thread_id) else {
                continue;
            };
            // Checkpoints older than `before` sit at lower positions
            let end = match before_id {
                Some(id) => entries
                    .iter()
                    .position(|e| e.checkpoint_id == id)
                    .unwrap_or(entries.len()),
                None => entries.len(),
            };
            for entry in entries[..end].iter().rev() {
                if let Some(ns) = namespace {
                    if entry.config.namespace() != ns {
                        continue;
                    }
                }
                let tuple = self.to_tuple(entry)?;
                if let Some(filter) = &filter {
                    if !tuple.metadata.matches(filter) {
                        continue;
                    }
                }
                results.push(Ok(tuple));
                if limit.is_some_and(|limit| results.len() >= limit) {
                    break 'threads;
                }
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        let thread_id = required_thread(config)?.to_string();

        let checkpoint_config = CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_id: Some(checkpoint.id.clone()),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: config.extra.clone(),
        };
        let parent_config = config.checkpoint_id.as_ref().map(|parent_id| CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_id: Some(parent_id.clone()),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: HashMap::new(),
        });
        let checkpoint_bytes = self.serde.dumps(&checkpoint)?;
        let metadata_bytes = self.serde.dumps(&metadata)?;

        let mut storage = self.storage.write().await;
        let entries = storage.entry(thread_id).or_default();
        let namespace = config.namespace();
        match entries
            .iter_mut()
            .find(|e| e.checkpoint_id == checkpoint.id && e.config.namespace() == namespace)
        {
            // Repeated put of the same checkpoint: keep its writes
            Some(existing) => {
                existing.checkpoint = checkpoint_bytes;
                existing.metadata = metadata_bytes;
                existing.parent_config = parent_config;
            }
            None => entries.push(StoredCheckpoint {
                checkpoint_id: checkpoint.id.clone(),
                config: checkpoint_config.clone(),
                parent_config,
                checkpoint: checkpoint_bytes,
                metadata: metadata_bytes,
                writes: Vec::new(),
            }),
        }

        Ok(checkpoint_config)
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: String,
    ) -> Result<()> {
        let thread_id = required_thread(config)?;
        let checkpoint_id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        let mut encoded = Vec::with_capacity(writes.len());
        for (position, (channel, value)) in writes.into_iter().enumerate() {
            encoded.push(StoredWrite {
                task_id: task_id.clone(),
                index: write_index(&channel, position),
                channel,
                value: self.serde.dumps(&value)?,
            });
        }

        let mut storage = self.storage.write().await;
        let namespace = config.namespace();
        let entry = storage
            .get_mut(thread_id)
            .and_then(|entries| {
                entries
                    .iter_mut()
                    .find(|e| &e.checkpoint_id == checkpoint_id && e.config.namespace() == namespace)
            })
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.clone()))?;

        if encoded.iter().any(|w| !w.is_control()) {
            entry
                .writes
                .retain(|w| w.task_id != task_id || w.channel == RESUME);
        }
        for write in encoded {
            if write.is_control() {
                entry
                    .writes
                    .retain(|w| !(w.task_id == write.task_id && w.channel == write.channel));
            }
            entry.writes.push(write);
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}
