//! Graph definition
//!
//! A graph is a set of named channels plus a list of nodes. Each node
//! subscribes to one or more trigger channels, reads an input assembled from
//! channels, and writes its result back to channels:
//!
//! ```text
//!                 ┌──────────── triggers ───────────┐
//!                 │                                 │
//!   __start__ ──► [a] ──► "left"  ──► [b] ──┐       ▼
//!                  │                        ├──► "join" (barrier {b, c}) ──► [d] ──► __end__
//!                  └────► "right" ──► [c] ──┘
//! ```
//!
//! Nodes never talk to each other directly. A node runs in superstep N+1 when
//! one of its trigger channels received a new version in superstep N.
//!
//! Two channels always exist: `__start__` (ephemeral; receives the run input
//! unless another input is selected) and `__end__` (writing to it ends the run
//! after the current superstep).
//!
//! # Example
//!
//! ```rust
//! use pregel_checkpoint::Channel;
//! use pregel_core::graph::{GraphBuilder, NodeSpec};
//! use pregel_core::{Runtime, START};
//! use serde_json::{json, Value};
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_channel("greeting", Channel::last_value())
//!     .add_node(
//!         NodeSpec::new("greet", |name: Value, _rt: Runtime| async move {
//!             Ok(json!(format!("hello {}", name.as_str().unwrap_or("?"))))
//!         })
//!         .triggered_by([START])
//!         .writes_to("greeting"),
//!     );
//! let graph = builder.compile().unwrap();
//! ```

use crate::cache::{CachePolicy, NodeCache};
use crate::compiled::CompiledGraph;
use crate::constants::{is_reserved, END, START};
use crate::error::{GraphError, Result};
use crate::pregel::types::NodeExecutor;
use crate::retry::RetryPolicy;
use crate::runtime::Runtime;
use pregel_checkpoint::{Channel, CheckpointSaver, LastValueChannel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Live channel set of a run, keyed by channel name
pub type Channels = BTreeMap<String, Channel>;

/// How a node's input is assembled from channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeInput {
    /// The value of one channel; fails with `EmptyChannel` when unavailable
    Channel(String),
    /// An object keyed by channel name; unavailable channels are left out
    Named(Vec<String>),
    /// An array in declaration order; every channel must be available
    Positional(Vec<String>),
}

impl NodeInput {
    pub fn channels(&self) -> Vec<&str> {
        match self {
            NodeInput::Channel(channel) => vec![channel.as_str()],
            NodeInput::Named(channels) | NodeInput::Positional(channels) => {
                channels.iter().map(String::as_str).collect()
            }
        }
    }
}

/// Where a node's result goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteTarget {
    /// Always write `value`, whatever the node returned
    Fixed { channel: String, value: Value },
    /// Write `output[field]` when the output is an object carrying that field
    Field { channel: String, field: String },
    /// Write the whole output unless it is null
    Channel { channel: String },
}

impl WriteTarget {
    pub fn channel(&self) -> &str {
        match self {
            WriteTarget::Fixed { channel, .. }
            | WriteTarget::Field { channel, .. }
            | WriteTarget::Channel { channel } => channel,
        }
    }
}

/// Immutable descriptor of one node
#[derive(Clone)]
pub struct NodeSpec {
    pub name: String,
    pub triggers: Vec<String>,
    /// Defaults to the single trigger, or all triggers by name
    pub input: Option<NodeInput>,
    pub writes: Vec<WriteTarget>,
    pub retry_policy: Option<RetryPolicy>,
    pub cache_policy: Option<CachePolicy>,
    pub executor: Arc<dyn NodeExecutor>,
}

impl NodeSpec {
    pub fn new<F, Fut>(name: impl Into<String>, executor: F) -> Self
    where
        F: Fn(Value, Runtime) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::with_executor(name, Arc::new(executor))
    }

    pub fn with_executor(name: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
            input: None,
            writes: Vec::new(),
            retry_policy: None,
            cache_policy: None,
            executor,
        }
    }

    pub fn triggered_by<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers.extend(channels.into_iter().map(Into::into));
        self
    }

    pub fn reads(mut self, input: NodeInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn writes_to(mut self, channel: impl Into<String>) -> Self {
        self.writes.push(WriteTarget::Channel {
            channel: channel.into(),
        });
        self
    }

    pub fn writes_field(mut self, channel: impl Into<String>, field: impl Into<String>) -> Self {
        self.writes.push(WriteTarget::Field {
            channel: channel.into(),
            field: field.into(),
        });
        self
    }

    pub fn writes_value(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.writes.push(WriteTarget::Fixed {
            channel: channel.into(),
            value,
        });
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_cache(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Input selection in effect for this node
    pub fn effective_input(&self) -> NodeInput {
        match &self.input {
            Some(input) => input.clone(),
            None if self.triggers.len() == 1 => NodeInput::Channel(self.triggers[0].clone()),
            None => NodeInput::Named(self.triggers.clone()),
        }
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("triggers", &self.triggers)
            .field("input", &self.input)
            .field("writes", &self.writes)
            .field("retry_policy", &self.retry_policy)
            .field("cache_policy", &self.cache_policy)
            .finish()
    }
}

/// One channel or several, for graph input and output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelection {
    Single(String),
    Many(Vec<String>),
}

impl ChannelSelection {
    pub fn channels(&self) -> Vec<&str> {
        match self {
            ChannelSelection::Single(channel) => vec![channel.as_str()],
            ChannelSelection::Many(channels) => channels.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for ChannelSelection {
    fn from(channel: &str) -> Self {
        ChannelSelection::Single(channel.to_string())
    }
}

impl From<Vec<&str>> for ChannelSelection {
    fn from(channels: Vec<&str>) -> Self {
        ChannelSelection::Many(channels.into_iter().map(String::from).collect())
    }
}

/// Validated, immutable graph
pub struct PregelGraph {
    /// Channel prototypes; runs restore live channels from these
    pub channels: Channels,
    /// Nodes in declaration order
    pub nodes: Vec<Arc<NodeSpec>>,
    pub node_index: HashMap<String, usize>,
    /// Trigger channel -> names of the nodes it schedules
    pub trigger_to_nodes: HashMap<String, Vec<String>>,
    pub input: ChannelSelection,
    pub output: ChannelSelection,
    pub checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub cache: Option<NodeCache>,
}

impl PregelGraph {
    pub fn node(&self, name: &str) -> Option<&Arc<NodeSpec>> {
        self.node_index.get(name).map(|idx| &self.nodes[*idx])
    }
}

impl fmt::Debug for PregelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PregelGraph")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("nodes", &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>())
            .field("input", &self.input)
            .field("output", &self.output)
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

/// Builder for [`PregelGraph`]s
pub struct GraphBuilder {
    channels: Channels,
    nodes: Vec<NodeSpec>,
    input: Option<ChannelSelection>,
    output: Option<ChannelSelection>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    cache: Option<NodeCache>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        let mut channels = Channels::new();
        channels.insert(START.to_string(), Channel::ephemeral());
        channels.insert(
            END.to_string(),
            Channel::LastValue(LastValueChannel::overwriting()),
        );
        Self {
            channels,
            nodes: Vec::new(),
            input: None,
            output: None,
            checkpointer: None,
            cache: None,
        }
    }

    pub fn add_channel(&mut self, name: impl Into<String>, channel: Channel) -> &mut Self {
        self.channels.insert(name.into(), channel);
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Channels the run input is written to; `__start__` by default
    pub fn set_input(&mut self, input: impl Into<ChannelSelection>) -> &mut Self {
        self.input = Some(input.into());
        self
    }

    /// Channels the run output is read from; every user channel by default
    pub fn set_output(&mut self, output: impl Into<ChannelSelection>) -> &mut Self {
        self.output = Some(output.into());
        self
    }

    /// Default checkpoint store of the compiled graph
    pub fn with_checkpointer(&mut self, checkpointer: Arc<dyn CheckpointSaver>) -> &mut Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Cache used by nodes that carry a cache policy
    pub fn with_cache(&mut self, cache: NodeCache) -> &mut Self {
        self.cache = Some(cache);
        self
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() || is_reserved(&node.name) {
                return Err(GraphError::Validation(format!(
                    "node name '{}' is reserved",
                    node.name
                )));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(GraphError::Validation(format!(
                    "duplicate node '{}'",
                    node.name
                )));
            }
            if node.triggers.is_empty() {
                return Err(GraphError::Validation(format!(
                    "node '{}' has no trigger channels",
                    node.name
                )));
            }
            let input = node.effective_input();
            for channel in node.triggers.iter().map(String::as_str).chain(input.channels()) {
                self.require_channel(&node.name, channel)?;
            }
            for target in &node.writes {
                let channel = target.channel();
                self.require_channel(&node.name, channel)?;
                if is_reserved(channel) && channel != END {
                    return Err(GraphError::Validation(format!(
                        "node '{}' writes to reserved channel '{}'",
                        node.name, channel
                    )));
                }
            }
        }

        for selection in [&self.input, &self.output].into_iter().flatten() {
            for channel in selection.channels() {
                if !self.channels.contains_key(channel) {
                    return Err(GraphError::Validation(format!(
                        "unknown channel '{}' in graph input/output",
                        channel
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_channel(&self, node: &str, channel: &str) -> Result<()> {
        if self.channels.contains_key(channel) {
            Ok(())
        } else {
            Err(GraphError::Validation(format!(
                "node '{}' references unknown channel '{}'",
                node, channel
            )))
        }
    }

    /// Validate the definition and freeze it into a runnable graph
    pub fn build(self) -> Result<PregelGraph> {
        self.validate()?;

        let mut trigger_to_nodes: HashMap<String, Vec<String>> = HashMap::new();
        let mut node_index = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            node_index.insert(node.name.clone(), idx);
            for trigger in &node.triggers {
                let subscribers = trigger_to_nodes.entry(trigger.clone()).or_default();
                if !subscribers.contains(&node.name) {
                    subscribers.push(node.name.clone());
                }
            }
        }

        let output = self.output.unwrap_or_else(|| {
            ChannelSelection::Many(
                self.channels
                    .keys()
                    .filter(|name| !is_reserved(name))
                    .cloned()
                    .collect(),
            )
        });

        tracing::debug!(
            nodes = self.nodes.len(),
            channels = self.channels.len(),
            "Graph validated"
        );

        Ok(PregelGraph {
            channels: self.channels,
            nodes: self.nodes.into_iter().map(Arc::new).collect(),
            node_index,
            trigger_to_nodes,
            input: self.input.unwrap_or_else(|| ChannelSelection::Single(START.to_string())),
            output,
            checkpointer: self.checkpointer,
            cache: self.cache,
        })
    }

    pub fn compile(self) -> Result<CompiledGraph> {
        Ok(CompiledGraph::new(self.build()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> NodeSpec {
        NodeSpec::new(name, |input: Value, _rt: Runtime| async move { Ok(input) })
    }

    #[test]
    fn test_default_input_and_output() {
        let mut builder = GraphBuilder::new();
        builder
            .add_channel("out", Channel::last_value())
            .add_node(noop("a").triggered_by([START]).writes_to("out"));
        let graph = builder.build().unwrap();

        assert_eq!(graph.input, ChannelSelection::Single(START.to_string()));
        assert_eq!(graph.output, ChannelSelection::Many(vec!["out".to_string()]));
        assert_eq!(graph.trigger_to_nodes[START], vec!["a".to_string()]);
        assert!(graph.channels.contains_key(END));
    }

    #[test]
    fn test_effective_input() {
        let single = noop("a").triggered_by(["x"]);
        assert_eq!(single.effective_input(), NodeInput::Channel("x".into()));

        let many = noop("b").triggered_by(["x", "y"]);
        assert_eq!(
            many.effective_input(),
            NodeInput::Named(vec!["x".into(), "y".into()])
        );
    }

    #[test]
    fn test_rejects_invalid_graphs() {
        let mut builder = GraphBuilder::new();
        builder.add_node(noop("a").triggered_by(["missing"]));
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));

        let mut builder = GraphBuilder::new();
        builder.add_node(noop("a"));
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));

        let mut builder = GraphBuilder::new();
        builder
            .add_node(noop("a").triggered_by([START]))
            .add_node(noop("a").triggered_by([START]));
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));

        let mut builder = GraphBuilder::new();
        builder.add_node(noop("__hidden").triggered_by([START]));
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));

        let mut builder = GraphBuilder::new();
        builder.add_node(noop("a").triggered_by([START]).writes_to(START));
        assert!(matches!(builder.build(), Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_end_is_writable() {
        let mut builder = GraphBuilder::new();
        builder.add_node(noop("a").triggered_by([START]).writes_value(END, json!(true)));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_write_target_deserialization() {
        let targets: Vec<WriteTarget> = serde_json::from_value(json!([
            {"channel": "a"},
            {"channel": "b", "field": "x"},
            {"channel": "c", "value": 1}
        ]))
        .unwrap();
        assert!(matches!(targets[0], WriteTarget::Channel { .. }));
        assert!(matches!(targets[1], WriteTarget::Field { .. }));
        assert!(matches!(targets[2], WriteTarget::Fixed { .. }));
    }
}
