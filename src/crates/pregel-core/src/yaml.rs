//! YAML-based graph definitions
//!
//! Graph structure (channels, nodes and their wiring) can be declared in YAML;
//! node behavior is supplied in code through a [`HandlerRegistry`]:
//!
//! ```yaml
//! name: review
//! channels:
//!   draft: { kind: last_value }
//!   notes: { kind: topic, accumulate: true }
//!   score: { kind: binary_operator, reducer: sum, initial: 0 }
//! nodes:
//!   - name: write
//!     handler: write_draft
//!     triggers: [__start__]
//!     writes:
//!       - channel: draft
//!   - name: review
//!     handler: review_draft
//!     triggers: [draft]
//!     writes:
//!       - { channel: notes, field: note }
//!       - { channel: score, field: score }
//!     retry: { max_attempts: 3 }
//! output: [draft, notes, score]
//! ```
//!
//! Nodes are a list so declaration order, which decides task order, is kept.

use crate::cache::CachePolicy;
use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{ChannelSelection, GraphBuilder, NodeInput, NodeSpec, WriteTarget};
use crate::pregel::types::NodeExecutor;
use crate::retry::RetryPolicy;
use crate::runtime::Runtime;
use pregel_checkpoint::{BinaryOperatorChannel, Channel, Reducer, TopicChannel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Top-level YAML graph definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub channels: BTreeMap<String, ChannelDefinition>,

    pub nodes: Vec<NodeDefinition>,

    /// Defaults to `__start__`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ChannelSelection>,

    /// Defaults to every declared channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ChannelSelection>,
}

/// Channel definition, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelDefinition {
    LastValue,
    Topic {
        #[serde(default)]
        accumulate: bool,
        #[serde(default)]
        unique: bool,
    },
    BinaryOperator {
        reducer: Reducer,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial: Option<Value>,
    },
    Ephemeral,
    NamedBarrier {
        names: Vec<String>,
    },
    NamedBarrierAfterFinish {
        names: Vec<String>,
    },
}

impl ChannelDefinition {
    pub fn to_channel(&self) -> Channel {
        match self {
            ChannelDefinition::LastValue => Channel::last_value(),
            ChannelDefinition::Topic { accumulate, unique } => Channel::Topic(
                TopicChannel::new()
                    .with_accumulate(*accumulate)
                    .with_unique(*unique),
            ),
            ChannelDefinition::BinaryOperator { reducer, initial } => {
                let channel = BinaryOperatorChannel::new(*reducer);
                Channel::BinaryOperator(match initial {
                    Some(initial) => channel.with_initial(initial.clone()),
                    None => channel,
                })
            }
            ChannelDefinition::Ephemeral => Channel::ephemeral(),
            ChannelDefinition::NamedBarrier { names } => Channel::named_barrier(names.clone()),
            ChannelDefinition::NamedBarrierAfterFinish { names } => {
                Channel::named_barrier_after_finish(names.clone())
            }
        }
    }
}

/// Node definition in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,

    /// Key of the handler in the [`HandlerRegistry`]
    pub handler: String,

    pub triggers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<NodeInput>,

    #[serde(default)]
    pub writes: Vec<WriteTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
}

/// Node implementations available to YAML definitions, by handler name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Value, Runtime) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl GraphDefinition {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Builder holding this definition with handlers resolved from `registry`
    ///
    /// Structural checks happen when the builder is built or compiled; this
    /// only fails for handlers missing from the registry.
    pub fn to_builder(&self, registry: &HandlerRegistry) -> Result<GraphBuilder> {
        let mut builder = GraphBuilder::new();
        for (name, definition) in &self.channels {
            builder.add_channel(name.clone(), definition.to_channel());
        }
        for node in &self.nodes {
            let executor = registry.get(&node.handler).ok_or_else(|| {
                GraphError::Validation(format!(
                    "node '{}' uses unregistered handler '{}'",
                    node.name, node.handler
                ))
            })?;
            let mut spec = NodeSpec::with_executor(node.name.clone(), executor)
                .triggered_by(node.triggers.iter().cloned());
            spec.input = node.reads.clone();
            spec.writes = node.writes.clone();
            spec.retry_policy = node.retry.clone();
            spec.cache_policy = node.cache.clone();
            builder.add_node(spec);
        }
        if let Some(input) = &self.input {
            builder.set_input(input.clone());
        }
        if let Some(output) = &self.output {
            builder.set_output(output.clone());
        }
        Ok(builder)
    }

    pub fn compile(&self, registry: &HandlerRegistry) -> Result<CompiledGraph> {
        tracing::debug!(graph = %self.name, nodes = self.nodes.len(), "Compiling YAML graph");
        self.to_builder(registry)?.compile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use serde_json::json;

    const REVIEW: &str = r#"
name: review
channels:
  draft: { kind: last_value }
  notes: { kind: topic, accumulate: true }
  score: { kind: binary_operator, reducer: sum, initial: 0 }
nodes:
  - name: write
    handler: write_draft
    triggers: [__start__]
    writes:
      - channel: draft
  - name: review
    handler: review_draft
    triggers: [draft]
    writes:
      - { channel: notes, field: note }
      - { channel: score, field: score }
    retry: { max_attempts: 3 }
output: [draft, notes, score]
"#;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register("write_draft", |input: Value, _rt: Runtime| async move {
                Ok(json!(format!("draft: {}", input.as_str().unwrap_or_default())))
            })
            .register("review_draft", |_input: Value, _rt: Runtime| async move {
                Ok(json!({"note": "looks fine", "score": 7}))
            });
        registry
    }

    #[test]
    fn test_parse_definition() {
        let definition = GraphDefinition::from_str(REVIEW).unwrap();
        assert_eq!(definition.nodes.len(), 2);
        assert_eq!(definition.nodes[0].name, "write");
        assert_eq!(
            definition.channels["score"],
            ChannelDefinition::BinaryOperator {
                reducer: Reducer::Sum,
                initial: Some(json!(0)),
            }
        );
        assert_eq!(
            definition.nodes[1].writes[0],
            WriteTarget::Field {
                channel: "notes".into(),
                field: "note".into(),
            }
        );
        assert_eq!(definition.nodes[1].retry.as_ref().unwrap().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_compile_and_run() {
        let definition = GraphDefinition::from_str(REVIEW).unwrap();
        let compiled = definition.compile(&registry()).unwrap();
        let output = compiled.invoke(json!("hi"), RunConfig::new()).await.unwrap();
        assert_eq!(
            output,
            json!({"draft": "draft: hi", "notes": ["looks fine"], "score": 7})
        );
    }

    #[test]
    fn test_unregistered_handler() {
        let definition = GraphDefinition::from_str(REVIEW).unwrap();
        let result = definition.compile(&HandlerRegistry::new());
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_round_trip_keeps_node_order() {
        let definition = GraphDefinition::from_str(REVIEW).unwrap();
        let reparsed = GraphDefinition::from_str(&definition.to_yaml().unwrap()).unwrap();
        let names: Vec<_> = reparsed.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["write", "review"]);
    }
}
