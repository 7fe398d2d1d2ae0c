//! Pregel-style execution engine
//!
//! Execution is divided into **supersteps**. In each one:
//!
//! 1. Nodes whose trigger channels changed since they last ran become tasks
//! 2. Tasks run concurrently against a snapshot of channel state
//! 3. When all tasks settle, their writes are applied in task-name order
//! 4. The new channel state is checkpointed
//!
//! The run stops when no node is triggered, a node writes to `__end__`, a
//! node interrupts, or a static interrupt matches.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Superstep N                                      │
//! │                                                   │
//! │  prepare_next_tasks ──► TaskExecutor (parallel)   │
//! │          ▲                     │                  │
//! │          │                     ▼                  │
//! │   CheckpointWriter ◄──── apply_writes             │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`algo`]: task preparation, write application and interrupt bookkeeping.
//!   These functions are pure over a checkpoint and its channels.
//! - [`io`]: mapping between run input/output and channels.
//! - [`types`]: task types shared by the loop and the state APIs.
//! - `executor`: runs one task with retry, cache and panic isolation.
//! - `checkpoint`: forwards checkpoints to the store per durability mode.
//! - [`loop_impl`]: the superstep state machine.
//!
//! # Determinism
//!
//! Task ids derive from the checkpoint id, the step, the node name and the
//! versions of the node's triggers, so replaying from the same checkpoint
//! produces the same ids. Writes are applied in task-name order regardless
//! of completion order.

pub mod algo;
pub(crate) mod checkpoint;
pub(crate) mod executor;
pub mod io;
pub mod loop_impl;
pub mod types;

pub use algo::{apply_writes, prepare_next_tasks, task_id};
pub use loop_impl::{LoopStatus, RunOutcome};
pub use types::{
    Interrupt, NodeExecutor, NodeFuture, PregelExecutableTask, PregelTask, PregelTaskWrites,
    WritesProtocol,
};
