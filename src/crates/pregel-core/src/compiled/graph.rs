//! CompiledGraph struct and one-shot execution

use crate::command::GraphInput;
use crate::config::RunConfig;
use crate::constants::INTERRUPT;
use crate::error::Result;
use crate::graph::PregelGraph;
use crate::pregel::loop_impl::{PregelLoop, RunOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A validated graph ready for execution
///
/// Cheap to clone; every run shares the same immutable definition.
#[derive(Clone, Debug)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<PregelGraph>,
}

impl CompiledGraph {
    pub(crate) fn new(graph: PregelGraph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    /// The underlying graph definition
    pub fn graph(&self) -> &PregelGraph {
        &self.graph
    }

    /// Run until the graph finishes or interrupts and return the output
    ///
    /// When the run stops at interrupts raised by nodes, they are reported
    /// under the `__interrupt__` key of the output object. Use
    /// [`run`](Self::run) to get them as typed values.
    ///
    /// # Errors
    ///
    /// - [`GraphError::GraphRecursion`](crate::GraphError::GraphRecursion) if
    ///   `recursion_limit` supersteps ran without the graph stopping
    /// - [`GraphError::MissingCheckpointer`](crate::GraphError::MissingCheckpointer)
    ///   when resuming without a checkpointer
    /// - the first node failure of the failing step, after retries
    pub async fn invoke(&self, input: impl Into<GraphInput>, config: RunConfig) -> Result<Value> {
        let outcome = self.run(input, config).await?;
        if outcome.interrupts.is_empty() {
            return Ok(outcome.value);
        }
        let interrupts = serde_json::to_value(&outcome.interrupts)?;
        let mut output = match outcome.value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        output.insert(INTERRUPT.to_string(), interrupts);
        Ok(Value::Object(output))
    }

    /// Run until the graph finishes or interrupts
    pub async fn run(&self, input: impl Into<GraphInput>, config: RunConfig) -> Result<RunOutcome> {
        let input = input.into();
        tracing::debug!(thread_id = ?config.thread_id, "Starting run");
        PregelLoop::new(self.graph.clone(), config, None)
            .await?
            .run(input)
            .await
    }
}
