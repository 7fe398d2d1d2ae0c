//! Caller surface of a compiled graph
//!
//! A [`CompiledGraph`] is produced by [`GraphBuilder::compile`](crate::GraphBuilder::compile)
//! and can be run any number of times, on any number of threads:
//!
//! - [`invoke`](CompiledGraph::invoke) / [`run`](CompiledGraph::run): run to
//!   completion or interrupt
//! - [`stream`](CompiledGraph::stream): the same run, observed as it happens
//! - [`get_state`](CompiledGraph::get_state) /
//!   [`get_state_history`](CompiledGraph::get_state_history): inspect stored
//!   checkpoints
//! - [`update_state`](CompiledGraph::update_state): write into a thread's
//!   state between runs
//!
//! Runs are addressed by [`RunConfig`](crate::RunConfig). With a checkpointer
//! and a `thread_id`, each run continues the thread's latest checkpoint, or
//! the one named by `checkpoint_id`.

mod graph;
mod state;
mod streaming;
mod types;

pub use graph::CompiledGraph;
pub use types::{StateSnapshot, StateSnapshotStream, StreamChunkStream};
