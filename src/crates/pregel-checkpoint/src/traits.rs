//! Checkpoint storage trait for pluggable persistence backends
//!
//! The superstep loop never talks to storage directly: it receives an
//! `Arc<dyn CheckpointSaver>` from its caller and goes through this trait for
//! every read and write. Backends (a SQL table, a key-value store, an object
//! store) implement it; [`crate::InMemoryCheckpointSaver`] is the reference
//! implementation.
//!
//! # Contract
//!
//! - **`put`** stores a checkpoint under `(thread_id, checkpoint_ns, checkpoint.id)`
//!   and returns the config addressing it. Puts are at-least-once: storing the
//!   same checkpoint id twice must replace the first copy, not duplicate it.
//! - **`put_writes`** attaches task writes to an existing checkpoint. A call
//!   with regular writes replaces the task's earlier regular writes and clears
//!   its interrupt and error markers; interrupt, resume and error markers
//!   replace the previous marker of the same task.
//! - **`get_tuple`** returns the checkpoint named by `checkpoint_id`, or the
//!   latest checkpoint of the thread/namespace when no id is given, together
//!   with its pending writes.
//! - **`list`** streams checkpoints newest first.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Superstep loop              │
//! │  • put() after each step     │
//! │  • put_writes() per task     │
//! └──────────────┬───────────────┘
//!                │ CheckpointSaver
//!                ↓
//! ┌──────────────────────────────┐
//! │  Backend                     │
//! │  (memory, SQL, KV, ...)      │
//! └──────────────────────────────┘
//! ```
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use pregel_checkpoint::*;
//!
//! struct SqlSaver { pool: Pool }
//!
//! #[async_trait]
//! impl CheckpointSaver for SqlSaver {
//!     async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
//!         // SELECT ... WHERE thread_id = $1 AND checkpoint_ns = $2 ORDER BY seq DESC LIMIT 1
//!         todo!()
//!     }
//!     // list, put, put_writes, delete_thread ...
//! }
//! ```

use crate::checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Stream of checkpoint tuples returned by [`CheckpointSaver::list`]
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send>>;

/// Persistence backend for checkpoints and pending writes
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a checkpoint with its metadata and pending writes
    ///
    /// Without `checkpoint_id` the latest checkpoint of the thread is returned.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints newest first
    ///
    /// # Arguments
    ///
    /// * `config` - restricts the listing to one thread (and namespace) when set
    /// * `filter` - metadata fields that must match exactly
    /// * `before` - only checkpoints older than this checkpoint
    /// * `limit` - maximum number of results
    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config addressing it
    ///
    /// `config.checkpoint_id`, when present, is recorded as the parent.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig>;

    /// Attach writes of one task to the checkpoint addressed by `config`
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: String,
    ) -> Result<()>;

    /// Remove every checkpoint and write of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
