//! Types returned by the compiled graph's caller surface

use crate::error::Result;
use crate::pregel::{Interrupt, PregelTask};
use crate::stream::StreamChunk;
use chrono::{DateTime, Utc};
use futures::Stream;
use pregel_checkpoint::{CheckpointConfig, CheckpointMetadata};
use serde_json::Value;
use std::pin::Pin;

/// Point-in-time view of a thread, as stored at one checkpoint.
///
/// `next` lists the nodes the next superstep would run. It is empty once the
/// run is complete. `tasks` carries those same tasks together with whatever
/// is already known about them from stored pending writes: a task that
/// interrupted has its interrupts attached, a task that failed has its error,
/// and a task whose writes are stored has `result` set.
///
/// ```rust,ignore
/// let snapshot = compiled.get_state(&RunConfig::thread("support-42")).await?;
/// if snapshot.next.is_empty() {
///     println!("done: {}", snapshot.values);
/// } else {
///     for interrupt in &snapshot.interrupts {
///         println!("waiting on {}: {}", interrupt.id, interrupt.value);
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Output channel values at the checkpoint
    pub values: Value,

    /// Names of nodes scheduled for the next superstep
    pub next: Vec<String>,

    /// Config addressing the checkpoint; `checkpoint_id` is `None` for a
    /// thread with no checkpoints yet
    pub config: CheckpointConfig,

    /// `None` for a thread with no checkpoints yet
    pub metadata: Option<CheckpointMetadata>,

    pub created_at: Option<DateTime<Utc>>,

    pub parent_config: Option<CheckpointConfig>,

    /// Tasks of the next superstep
    pub tasks: Vec<PregelTask>,

    /// Interrupts raised by those tasks and not resumed yet
    pub interrupts: Vec<Interrupt>,
}

impl StateSnapshot {
    /// Whether the thread stopped at an interrupt or static breakpoint
    pub fn is_pending(&self) -> bool {
        !self.next.is_empty()
    }
}

/// Chunks emitted by [`CompiledGraph::stream`](super::CompiledGraph::stream)
///
/// A failing run ends the stream with one `Err` item.
pub type StreamChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Snapshots returned by
/// [`CompiledGraph::get_state_history`](super::CompiledGraph::get_state_history)
pub type StateSnapshotStream = Pin<Box<dyn Stream<Item = Result<StateSnapshot>> + Send>>;
