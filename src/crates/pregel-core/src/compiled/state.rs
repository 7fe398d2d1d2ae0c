//! State inspection and modification
//!
//! All three operations need a checkpointer, either the graph's own or one
//! passed in the [`RunConfig`]; without one they fail with
//! [`GraphError::MissingCheckpointer`].

use super::{CompiledGraph, StateSnapshot, StateSnapshotStream};
use crate::config::RunConfig;
use crate::constants::{ERROR, START};
use crate::error::{GraphError, Result};
use crate::graph::PregelGraph;
use crate::pregel::algo::{
    apply_writes, carry_pending_writes, create_checkpoint, match_pending_writes,
    pending_interrupts, prepare_next_tasks, restore_channels,
};
use crate::pregel::checkpoint::diff_versions;
use crate::pregel::executor::validate_writes;
use crate::pregel::io::{node_writes, read_output, writes_to_update};
use crate::pregel::loop_impl::resolve_saver;
use crate::pregel::types::{PregelTask, PregelTaskWrites};
use futures::StreamExt;
use pregel_checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointSaver, CheckpointSource, CheckpointTuple,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

impl CompiledGraph {
    fn saver(&self, config: &RunConfig) -> Result<Arc<dyn CheckpointSaver>> {
        resolve_saver(&self.graph, config).ok_or(GraphError::MissingCheckpointer)
    }

    /// State of the thread at the checkpoint `config` addresses
    ///
    /// Without `checkpoint_id` this is the thread's latest checkpoint. A
    /// thread with no checkpoints yields an empty snapshot.
    pub async fn get_state(&self, config: &RunConfig) -> Result<StateSnapshot> {
        let saver = self.saver(config)?;
        let requested = config.checkpoint_config();
        match saver.get_tuple(&requested).await? {
            Some(tuple) => snapshot(&self.graph, tuple),
            None => {
                let channels = restore_channels(&self.graph, &Checkpoint::empty())?;
                Ok(StateSnapshot {
                    values: read_output(&self.graph.output, &channels),
                    next: Vec::new(),
                    config: requested,
                    metadata: None,
                    created_at: None,
                    parent_config: None,
                    tasks: Vec::new(),
                    interrupts: Vec::new(),
                })
            }
        }
    }

    /// Snapshots of the thread's checkpoints, newest first
    ///
    /// # Arguments
    ///
    /// * `filter` - metadata fields that must match exactly
    /// * `before` - only checkpoints older than this one
    /// * `limit` - maximum number of snapshots
    pub async fn get_state_history(
        &self,
        config: &RunConfig,
        filter: Option<HashMap<String, Value>>,
        before: Option<&RunConfig>,
        limit: Option<usize>,
    ) -> Result<StateSnapshotStream> {
        let saver = self.saver(config)?;
        let before = before.map(RunConfig::checkpoint_config);
        let tuples = saver
            .list(Some(&config.checkpoint_config()), filter, before.as_ref(), limit)
            .await?;
        let graph = self.graph.clone();
        let snapshots = tuples.map(move |tuple| snapshot(&graph, tuple?));
        Ok(Box::pin(snapshots))
    }

    /// Write `values` into the thread's state as a new checkpoint
    ///
    /// With `as_node`, `values` is treated as that node's output and routed
    /// through its write targets; the node is also marked as having seen its
    /// triggers, so the update does not schedule it again. Without `as_node`,
    /// `values` is an object keyed by channel name.
    ///
    /// Channel update rules apply as for a superstep. The new checkpoint is a
    /// child of the one `config` addresses, with a fresh id, so updating the
    /// same checkpoint twice forks it. The returned config addresses the new
    /// checkpoint.
    ///
    /// When `config` addresses the latest checkpoint, tasks waiting on it stay
    /// scheduled: their stored writes, interrupts and resume values move to the
    /// new checkpoint, unless the update changed one of their triggers.
    pub async fn update_state(
        &self,
        config: &RunConfig,
        values: Value,
        as_node: Option<&str>,
    ) -> Result<RunConfig> {
        let saver = self.saver(config)?;
        if config.thread_id.is_none() {
            return Err(GraphError::Configuration(
                "thread_id is required to update state".to_string(),
            ));
        }
        let requested = config.checkpoint_config();
        let at_latest = requested.checkpoint_id.is_none();
        let namespace = requested.namespace().to_string();
        let (mut checkpoint, step, parent, pending) = match saver.get_tuple(&requested).await? {
            Some(tuple) => {
                let step = tuple.metadata.step.map_or(-1, |step| step + 1);
                (tuple.checkpoint, step, tuple.config, tuple.pending_writes)
            }
            None => (Checkpoint::empty(), -1, requested, Vec::new()),
        };
        let previous_versions = checkpoint.channel_versions.clone();
        let mut channels = restore_channels(&self.graph, &checkpoint)?;

        let mut waiting = if at_latest && !pending.is_empty() {
            prepare_next_tasks(&checkpoint, &channels, &self.graph, step, &namespace, None)?
        } else {
            Vec::new()
        };
        match_pending_writes(&mut waiting, &pending);

        let writes = match as_node {
            Some(name) => {
                let spec = self.graph.node(name).ok_or_else(|| {
                    GraphError::InvalidInput(format!("unknown node '{}'", name))
                })?;
                node_writes(spec, &values)
            }
            None => {
                let Value::Object(object) = values else {
                    return Err(GraphError::InvalidInput(
                        "state update must be an object keyed by channel".to_string(),
                    ));
                };
                object.into_iter().collect()
            }
        };
        validate_writes(&self.graph, &writes)?;

        let task = PregelTaskWrites::new(as_node.unwrap_or(START), writes);
        apply_writes(
            &mut checkpoint,
            &mut channels,
            &[&task],
            &self.graph.trigger_to_nodes,
        )?;
        if let Some(spec) = as_node.and_then(|name| self.graph.node(name)) {
            let seen = checkpoint.versions_seen.entry(spec.name.clone()).or_default();
            for trigger in &spec.triggers {
                if let Some(version) = checkpoint.channel_versions.get(trigger) {
                    seen.insert(trigger.clone(), version.clone());
                }
            }
        }

        let next = create_checkpoint(&checkpoint, &channels, step, CheckpointSource::Update);
        let carried = if waiting.is_empty() {
            Vec::new()
        } else {
            let upcoming =
                prepare_next_tasks(&next, &channels, &self.graph, step + 1, &namespace, None)?;
            carry_pending_writes(&waiting, &upcoming, &pending)?
        };
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Update)
            .with_step(step);
        let new_versions = diff_versions(&previous_versions, &next.channel_versions);
        tracing::debug!(
            thread_id = ?config.thread_id,
            checkpoint_id = %next.id,
            as_node = ?as_node,
            carried_tasks = carried.len(),
            "Updating state"
        );
        let stored = saver.put(&parent, next, metadata, new_versions).await?;
        for (task_id, writes) in carried {
            saver.put_writes(&stored, writes, task_id).await?;
        }
        Ok(config.at(&stored))
    }
}

/// Snapshot of one stored checkpoint
fn snapshot(graph: &PregelGraph, tuple: CheckpointTuple) -> Result<StateSnapshot> {
    let channels = restore_channels(graph, &tuple.checkpoint)?;
    let step = tuple.metadata.step.map_or(-1, |step| step + 1);
    let namespace = tuple.config.namespace().to_string();
    let mut prepared =
        prepare_next_tasks(&tuple.checkpoint, &channels, graph, step, &namespace, None)?;
    match_pending_writes(&mut prepared, &tuple.pending_writes);

    let tasks: Vec<PregelTask> = prepared
        .iter()
        .map(|task| PregelTask {
            id: task.id.clone(),
            name: task.name.clone(),
            error: tuple
                .pending_writes
                .iter()
                .find(|w| w.task_id == task.id && w.channel == ERROR)
                .map(|w| w.value.as_str().map_or_else(|| w.value.to_string(), String::from)),
            interrupts: pending_interrupts(&tuple.pending_writes, &task.id),
            result: task.done.then(|| writes_to_update(&task.writes)),
        })
        .collect();

    Ok(StateSnapshot {
        values: read_output(&graph.output, &channels),
        next: tasks.iter().map(|task| task.name.clone()).collect(),
        interrupts: tasks.iter().flat_map(|task| task.interrupts.clone()).collect(),
        tasks,
        created_at: Some(tuple.checkpoint.ts),
        metadata: Some(tuple.metadata),
        parent_config: tuple.parent_config,
        config: tuple.config,
    })
}
