//! Checkpoint persistence for a running loop
//!
//! The loop hands every checkpoint and every batch of task writes to a
//! [`CheckpointWriter`], which forwards them to the configured store according
//! to the run's durability mode:
//!
//! | Durability | Checkpoints and writes |
//! |------------|------------------------|
//! | `sync` | persisted before the loop moves on |
//! | `async` | queued to a background writer, persisted in order; failures are logged |
//! | `exit` | kept in memory, only the last checkpoint and its writes are persisted when the run stops |
//!
//! With `async`, the queue is drained before the run returns, so state APIs
//! called after `invoke` observe everything the run produced.

use crate::config::Durability;
use crate::error::Result;
use pregel_checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum WriteOp {
    Put {
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    },
    Writes {
        config: CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: String,
    },
}

impl WriteOp {
    async fn apply(self, saver: &dyn CheckpointSaver) -> Result<()> {
        match self {
            WriteOp::Put {
                config,
                checkpoint,
                metadata,
                new_versions,
            } => {
                saver.put(&config, checkpoint, metadata, new_versions).await?;
            }
            WriteOp::Writes {
                config,
                writes,
                task_id,
            } => {
                saver.put_writes(&config, writes, task_id).await?;
            }
        }
        Ok(())
    }
}

enum Mode {
    Disabled,
    Sync(Arc<dyn CheckpointSaver>),
    Async {
        tx: mpsc::UnboundedSender<WriteOp>,
        worker: JoinHandle<()>,
    },
    Exit {
        saver: Arc<dyn CheckpointSaver>,
        /// Config the final checkpoint is stored under as a child of
        parent: CheckpointConfig,
        last: Option<(Checkpoint, CheckpointMetadata)>,
        writes: Vec<(String, Vec<(String, Value)>)>,
    },
}

/// Forwards a loop's checkpoints and task writes to its store
pub(crate) struct CheckpointWriter {
    mode: Mode,
    /// Config addressing the loop's current checkpoint
    current: CheckpointConfig,
    /// Channel versions as of the last checkpoint handed over
    versions: ChannelVersions,
    /// Versions as of the last persisted checkpoint, for `exit` durability
    persisted_versions: ChannelVersions,
}

impl CheckpointWriter {
    pub(crate) fn new(
        saver: Option<Arc<dyn CheckpointSaver>>,
        durability: Durability,
        current: CheckpointConfig,
        versions: ChannelVersions,
    ) -> Self {
        let mode = match (saver, durability) {
            (None, _) => Mode::Disabled,
            (Some(saver), Durability::Sync) => Mode::Sync(saver),
            (Some(saver), Durability::Async) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
                let worker = tokio::spawn(async move {
                    while let Some(op) = rx.recv().await {
                        if let Err(error) = op.apply(saver.as_ref()).await {
                            tracing::warn!(error = %error, "Background checkpoint write failed");
                        }
                    }
                });
                Mode::Async { tx, worker }
            }
            (Some(saver), Durability::Exit) => Mode::Exit {
                saver,
                parent: current.clone(),
                last: None,
                writes: Vec::new(),
            },
        };
        Self {
            mode,
            current,
            persisted_versions: versions.clone(),
            versions,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        !matches!(self.mode, Mode::Disabled)
    }

    /// Config of the loop's current checkpoint
    pub(crate) fn current(&self) -> &CheckpointConfig {
        &self.current
    }

    /// Persist `checkpoint` as the child of the current checkpoint
    pub(crate) async fn put(
        &mut self,
        checkpoint: &Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        let new_versions = diff_versions(&self.versions, &checkpoint.channel_versions);
        self.versions = checkpoint.channel_versions.clone();
        let next = CheckpointConfig {
            thread_id: self.current.thread_id.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
            checkpoint_ns: self.current.checkpoint_ns.clone(),
            extra: self.current.extra.clone(),
        };

        match &mut self.mode {
            Mode::Disabled => {}
            Mode::Sync(saver) => {
                tracing::debug!(checkpoint_id = %checkpoint.id, "Putting checkpoint");
                self.current = saver
                    .put(&self.current, checkpoint.clone(), metadata, new_versions)
                    .await?;
                return Ok(());
            }
            Mode::Async { tx, .. } => {
                let op = WriteOp::Put {
                    config: self.current.clone(),
                    checkpoint: checkpoint.clone(),
                    metadata,
                    new_versions,
                };
                if tx.send(op).is_err() {
                    tracing::warn!(checkpoint_id = %checkpoint.id, "Checkpoint writer stopped; dropping checkpoint");
                }
            }
            Mode::Exit { last, writes, .. } => {
                *last = Some((checkpoint.clone(), metadata));
                writes.clear();
            }
        }
        self.current = next;
        Ok(())
    }

    /// Persist writes of one task against the current checkpoint
    pub(crate) async fn put_writes(
        &mut self,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<()> {
        match &mut self.mode {
            Mode::Disabled => {}
            Mode::Sync(saver) => {
                saver
                    .put_writes(&self.current, writes, task_id.to_string())
                    .await?;
            }
            Mode::Async { tx, .. } => {
                let op = WriteOp::Writes {
                    config: self.current.clone(),
                    writes,
                    task_id: task_id.to_string(),
                };
                if tx.send(op).is_err() {
                    tracing::warn!(task_id, "Checkpoint writer stopped; dropping writes");
                }
            }
            Mode::Exit { writes: buffered, .. } => {
                buffered.push((task_id.to_string(), writes));
            }
        }
        Ok(())
    }

    /// Drain queued work and persist what `exit` durability held back
    pub(crate) async fn flush(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Disabled) {
            Mode::Disabled | Mode::Sync(_) => {}
            Mode::Async { tx, worker } => {
                drop(tx);
                if let Err(error) = worker.await {
                    tracing::warn!(error = %error, "Checkpoint writer task failed");
                }
            }
            Mode::Exit {
                saver,
                parent,
                last,
                writes,
            } => {
                if let Some((checkpoint, metadata)) = last {
                    let new_versions =
                        diff_versions(&self.persisted_versions, &checkpoint.channel_versions);
                    tracing::debug!(checkpoint_id = %checkpoint.id, "Putting final checkpoint");
                    self.current = saver.put(&parent, checkpoint, metadata, new_versions).await?;
                }
                for (task_id, task_writes) in writes {
                    saver.put_writes(&self.current, task_writes, task_id).await?;
                }
            }
        }
        Ok(())
    }
}

/// Channels whose version differs from `previous`
pub(crate) fn diff_versions(previous: &ChannelVersions, current: &ChannelVersions) -> ChannelVersions {
    current
        .iter()
        .filter(|(channel, version)| previous.get(*channel) != Some(*version))
        .map(|(channel, version)| (channel.clone(), version.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pregel_checkpoint::{CheckpointSource, InMemoryCheckpointSaver};
    use serde_json::json;

    fn thread() -> CheckpointConfig {
        CheckpointConfig::new().with_thread_id("t")
    }

    #[tokio::test]
    async fn test_sync_put_chains_parents() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let mut writer = CheckpointWriter::new(
            Some(saver.clone()),
            Durability::Sync,
            thread(),
            ChannelVersions::new(),
        );
        let first = Checkpoint::empty();
        let second = first.successor(0, CheckpointSource::Loop);
        writer.put(&first, CheckpointMetadata::new()).await.unwrap();
        writer.put(&second, CheckpointMetadata::new()).await.unwrap();
        writer.put_writes("task", vec![("x".into(), json!(1))]).await.unwrap();

        let tuple = saver.get_tuple(&thread()).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, second.id);
        assert_eq!(tuple.parent_config.unwrap().checkpoint_id, Some(first.id));
        assert_eq!(tuple.pending_writes.len(), 1);
    }

    #[tokio::test]
    async fn test_async_flush_drains_queue() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let mut writer = CheckpointWriter::new(
            Some(saver.clone()),
            Durability::Async,
            thread(),
            ChannelVersions::new(),
        );
        let checkpoint = Checkpoint::empty();
        writer.put(&checkpoint, CheckpointMetadata::new()).await.unwrap();
        writer.put_writes("task", vec![("x".into(), json!(1))]).await.unwrap();
        assert_eq!(writer.current().checkpoint_id.as_deref(), Some(checkpoint.id.as_str()));
        writer.flush().await.unwrap();

        let tuple = saver.get_tuple(&thread()).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, checkpoint.id);
        assert_eq!(tuple.pending_writes.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_persists_only_last_checkpoint() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let mut writer = CheckpointWriter::new(
            Some(saver.clone()),
            Durability::Exit,
            thread(),
            ChannelVersions::new(),
        );
        let first = Checkpoint::empty();
        let second = first.successor(0, CheckpointSource::Loop);
        writer.put(&first, CheckpointMetadata::new()).await.unwrap();
        writer.put_writes("stale", vec![("x".into(), json!(1))]).await.unwrap();
        writer.put(&second, CheckpointMetadata::new()).await.unwrap();
        writer.put_writes("task", vec![("x".into(), json!(2))]).await.unwrap();
        assert_eq!(saver.checkpoint_count().await, 0);

        writer.flush().await.unwrap();
        assert_eq!(saver.checkpoint_count().await, 1);
        let tuple = saver.get_tuple(&thread()).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, second.id);
        assert_eq!(tuple.pending_writes.len(), 1);
        assert_eq!(tuple.pending_writes[0].task_id, "task");
    }

    #[test]
    fn test_diff_versions() {
        use pregel_checkpoint::ChannelVersion;
        let previous = ChannelVersions::from([("a".to_string(), ChannelVersion::Int(1))]);
        let current = ChannelVersions::from([
            ("a".to_string(), ChannelVersion::Int(1)),
            ("b".to_string(), ChannelVersion::Int(2)),
        ]);
        let diff = diff_versions(&previous, &current);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("b"));
    }
}
