//! Core types for Pregel execution

use crate::error::Result;
use crate::graph::NodeSpec;
use crate::runtime::Runtime;
use pregel_checkpoint::ChannelVersions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a node body
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// A node body
///
/// Implemented for every `Fn(Value, Runtime) -> impl Future<Output = Result<Value>>`,
/// so plain async functions and closures can be used directly.
pub trait NodeExecutor: Send + Sync {
    fn execute(&self, input: Value, runtime: Runtime) -> NodeFuture<'_>;
}

impl<F, Fut> NodeExecutor for F
where
    F: Fn(Value, Runtime) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn execute(&self, input: Value, runtime: Runtime) -> NodeFuture<'_> {
        Box::pin(self(input, runtime))
    }
}

/// A suspension raised by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,
    pub value: Value,
}

impl Interrupt {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Public view of a task, as reported in state snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregelTask {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupts: Vec<Interrupt>,
    /// Writes already stored for this task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// A task scheduled for the current superstep
pub struct PregelExecutableTask {
    pub id: String,
    pub name: String,
    /// Input snapshot taken when the task was prepared
    pub input: Value,
    pub triggers: Vec<String>,
    /// Trigger channel versions consulted when the task was prepared
    pub trigger_versions: ChannelVersions,
    pub spec: Arc<NodeSpec>,
    /// Resume list replayed into `Runtime::interrupt`
    pub resume: Vec<Value>,
    /// Writes produced by the task (or reused from pending writes)
    pub writes: Vec<(String, Value)>,
    /// Set when stored pending writes made execution unnecessary
    pub done: bool,
}

impl fmt::Debug for PregelExecutableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PregelExecutableTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("input", &self.input)
            .field("triggers", &self.triggers)
            .field("writes", &self.writes)
            .field("done", &self.done)
            .finish()
    }
}

/// Anything whose writes can be folded into channel state
pub trait WritesProtocol {
    fn name(&self) -> &str;
    fn writes(&self) -> &[(String, Value)];
    fn triggers(&self) -> &[String];

    /// Versions to record as seen; current versions are used when `None`
    fn trigger_versions(&self) -> Option<&ChannelVersions> {
        None
    }
}

impl WritesProtocol for PregelExecutableTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &[(String, Value)] {
        &self.writes
    }

    fn triggers(&self) -> &[String] {
        &self.triggers
    }

    fn trigger_versions(&self) -> Option<&ChannelVersions> {
        Some(&self.trigger_versions)
    }
}

/// Writes not tied to an executed task (input, manual state updates)
#[derive(Debug, Clone)]
pub struct PregelTaskWrites {
    pub name: String,
    pub writes: Vec<(String, Value)>,
    pub triggers: Vec<String>,
}

impl PregelTaskWrites {
    pub fn new(name: impl Into<String>, writes: Vec<(String, Value)>) -> Self {
        Self {
            name: name.into(),
            writes,
            triggers: Vec::new(),
        }
    }

    /// No writes for a prepared task that will not run
    ///
    /// Applying it marks the task's triggers as seen, so the task is not
    /// scheduled again.
    pub fn discarded(task: &PregelExecutableTask) -> Self {
        Self {
            name: task.name.clone(),
            writes: Vec::new(),
            triggers: task.triggers.clone(),
        }
    }
}

impl WritesProtocol for PregelTaskWrites {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &[(String, Value)] {
        &self.writes
    }

    fn triggers(&self) -> &[String] {
        &self.triggers
    }
}
