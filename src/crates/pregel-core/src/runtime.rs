//! Per-task runtime handle
//!
//! Every node body receives a [`Runtime`] for the task it runs as. It gives
//! access to the task identity and to the two side channels a node has besides
//! its return value:
//!
//! - [`Runtime::interrupt`] suspends the task and hands a value to the caller;
//!   on resume the same call returns the value the caller supplied
//! - [`Runtime::send`] emits an extra channel write
//!
//! # Interrupt replay
//!
//! A resumed task is executed again from the start. Its runtime carries the
//! task's resume list, and each `interrupt` call consumes the next entry by
//! position:
//!
//! ```text
//! resume = ["x"]          interrupt(1) -> "x"    interrupt(2) -> suspends
//! resume = ["x", "y"]     interrupt(1) -> "x"    interrupt(2) -> "y"
//! ```
//!
//! Code before the last answered interrupt therefore runs once per resume and
//! must be safe to repeat. Side effects belong after the interrupt calls, or
//! must be idempotent.

use crate::constants::INTERRUPT;
use crate::error::{GraphError, Result};
use crate::pregel::types::Interrupt;
use parking_lot::Mutex;
use pregel_checkpoint::derive_id;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Scratchpad {
    interrupt_counter: usize,
    resume: Vec<Value>,
    writes: Vec<(String, Value)>,
}

struct RuntimeInner {
    task_id: String,
    node: String,
    step: i32,
    scratchpad: Mutex<Scratchpad>,
}

/// Handle passed to node bodies; cheap to clone
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub(crate) fn new(
        task_id: impl Into<String>,
        node: impl Into<String>,
        step: i32,
        resume: Vec<Value>,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                task_id: task_id.into(),
                node: node.into(),
                step,
                scratchpad: Mutex::new(Scratchpad {
                    resume,
                    ..Scratchpad::default()
                }),
            }),
        }
    }

    /// Runtime for exercising a node body outside a graph run
    pub fn detached(node: impl Into<String>, resume: Vec<Value>) -> Self {
        let node = node.into();
        let task_id = derive_id(&node, "detached");
        Self::new(task_id, node, 0, resume)
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn node(&self) -> &str {
        &self.inner.node
    }

    pub fn step(&self) -> i32 {
        self.inner.step
    }

    /// Suspend the task with `value`, or return the resume value for this call
    ///
    /// The error must be propagated out of the node body with `?`:
    ///
    /// ```rust
    /// use pregel_core::{Result, Runtime};
    /// use serde_json::{json, Value};
    ///
    /// async fn approve(input: Value, runtime: Runtime) -> Result<Value> {
    ///     let answer = runtime.interrupt(json!({"question": "ship it?", "draft": input}))?;
    ///     Ok(json!({"approved": answer == json!("yes")}))
    /// }
    /// ```
    pub fn interrupt(&self, value: Value) -> Result<Value> {
        let mut pad = self.inner.scratchpad.lock();
        let idx = pad.interrupt_counter;
        pad.interrupt_counter += 1;
        if let Some(resumed) = pad.resume.get(idx) {
            tracing::debug!(task_id = %self.inner.task_id, idx, "Interrupt answered from resume list");
            return Ok(resumed.clone());
        }
        let id = interrupt_id(&self.inner.task_id, idx);
        Err(GraphError::Interrupted(vec![Interrupt::new(id, value)]))
    }

    /// Emit a write to `channel` in addition to the node's return value
    pub fn send(&self, channel: impl Into<String>, value: Value) {
        self.inner.scratchpad.lock().writes.push((channel.into(), value));
    }

    /// Resume values this task was started with
    pub fn resume_values(&self) -> Vec<Value> {
        self.inner.scratchpad.lock().resume.clone()
    }

    pub(crate) fn take_writes(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.inner.scratchpad.lock().writes)
    }
}

/// Id of the `idx`-th interrupt raised by a task
pub(crate) fn interrupt_id(task_id: &str, idx: usize) -> String {
    derive_id(task_id, &format!("{}:{}", INTERRUPT, idx))
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("task_id", &self.inner.task_id)
            .field("node", &self.inner.node)
            .field("step", &self.inner.step)
            .finish()
    }
}
