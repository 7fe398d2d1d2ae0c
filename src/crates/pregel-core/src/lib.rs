//! # pregel-core - Bulk-synchronous graph execution
//!
//! Runs graphs of nodes that communicate only through named, typed channels,
//! in discrete supersteps. Every superstep is checkpointed, so a run can stop
//! at an interrupt, be inspected and edited, and resume later on the same
//! thread.
//!
//! ## Core Concepts
//!
//! ### Channels
//!
//! Channels hold state between supersteps and define how concurrent writes
//! combine. They live in [`pregel_checkpoint`] and are re-exported here:
//!
//! | Channel | Writes per step | Value |
//! |---------|-----------------|-------|
//! | `LastValue` | at most one | the last write |
//! | `Topic` | any | all writes of the step, or of all steps when accumulating |
//! | `BinaryOperator` | any | writes folded through a reducer |
//! | `Ephemeral` | any | visible for one step only |
//! | `NamedBarrier` | producer names | available once every name has written |
//!
//! ### Nodes
//!
//! A node is an async function `Fn(Value, Runtime) -> Result<Value>` plus its
//! wiring: trigger channels, how its input is read, and where its output is
//! written. A node runs in a superstep when one of its triggers changed since
//! it last ran.
//!
//! ### Supersteps
//!
//! All triggered nodes run concurrently against the same channel snapshot.
//! Their writes are applied together, in node-name order, once every task has
//! finished; then the state is checkpointed.
//!
//! ## Quick Start
//!
//! ```rust
//! use pregel_core::{Channel, GraphBuilder, NodeSpec, RunConfig, Runtime, START};
//! use serde_json::{json, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> pregel_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_channel("doubled", Channel::last_value())
//!     .add_node(
//!         NodeSpec::new("double", |input: Value, _rt: Runtime| async move {
//!             Ok(json!(input.as_i64().unwrap_or(0) * 2))
//!         })
//!         .triggered_by([START])
//!         .writes_to("doubled"),
//!     );
//!
//! let graph = builder.compile()?;
//! let output = graph.invoke(json!(21), RunConfig::new()).await?;
//! assert_eq!(output, json!({"doubled": 42}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Human-in-the-Loop
//!
//! A node calls [`Runtime::interrupt`] to suspend. The run stops after every
//! other task of the step has finished, and their writes are kept. Resuming
//! with a [`Command`] re-runs the interrupted node, and this time the same
//! `interrupt` call returns the resume value:
//!
//! ```rust,ignore
//! let config = RunConfig::thread("support-42");
//! let outcome = graph.run(json!({"question": "refund?"}), config.clone()).await?;
//! assert!(outcome.is_interrupted());
//!
//! let output = graph.invoke(Command::resume(json!("approved")), config).await?;
//! ```
//!
//! Static breakpoints are set with
//! [`RunConfig::with_interrupt_before`] and [`RunConfig::with_interrupt_after`];
//! continue past them with [`GraphInput::Continue`].
//!
//! ## Modules
//!
//! - [`graph`] - graph definition and validation
//! - [`compiled`] - invoke, stream and the state APIs
//! - [`pregel`] - the superstep engine
//! - [`config`] - per-run configuration
//! - [`runtime`] - what a running node can do
//! - [`retry`] / [`cache`] - per-node retry and result caching
//! - [`stream`] - streamed event types
//! - [`yaml`] - graphs declared in YAML

pub mod cache;
pub mod command;
pub mod compiled;
pub mod config;
pub mod constants;
pub mod error;
pub mod graph;
pub mod pregel;
pub mod retry;
pub mod runtime;
pub mod stream;
pub mod yaml;

pub use cache::{Cache, CacheConfig, CacheMetrics, CachePolicy, EvictionPolicy, NodeCache};
pub use command::{Command, GraphInput, ResumeValue};
pub use compiled::{CompiledGraph, StateSnapshot, StateSnapshotStream, StreamChunkStream};
pub use config::{CheckpointerChoice, Durability, InterruptNodes, RunConfig};
pub use constants::{END, START};
pub use error::{GraphError, Result};
pub use graph::{
    ChannelSelection, Channels, GraphBuilder, NodeInput, NodeSpec, PregelGraph, WriteTarget,
};
pub use pregel::{Interrupt, LoopStatus, NodeExecutor, PregelTask, RunOutcome};
pub use retry::RetryPolicy;
pub use runtime::Runtime;
pub use stream::{StreamChunk, StreamEvent, StreamMode};
pub use yaml::{ChannelDefinition, GraphDefinition, HandlerRegistry, NodeDefinition};

pub use pregel_checkpoint::{
    BaseChannel, Channel, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    InMemoryCheckpointSaver, Reducer,
};
