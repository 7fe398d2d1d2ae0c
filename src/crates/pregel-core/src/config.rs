//! Per-run configuration
//!
//! [`RunConfig`] carries everything a single `invoke`/`stream` call can tune:
//! which thread and checkpoint to run against, the superstep ceiling, static
//! interrupt points, durability and an optional step timeout. The serializable
//! part loads from YAML:
//!
//! ```yaml
//! thread_id: support-42
//! recursion_limit: 10
//! interrupt_before: ["review"]
//! interrupt_after: "*"
//! durability: sync
//! step_timeout: 2500   # milliseconds
//! ```
//!
//! The checkpointer override and the cancellation token are runtime-only and
//! are set through the builder methods.

use crate::error::{GraphError, Result};
use pregel_checkpoint::{CheckpointConfig, CheckpointSaver};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default superstep ceiling
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Nodes selected for a static interrupt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InterruptNodes {
    #[default]
    None,
    /// Every node; written as `"*"`
    All,
    Nodes(Vec<String>),
}

impl InterruptNodes {
    pub fn nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        if nodes.is_empty() {
            Self::None
        } else {
            Self::Nodes(nodes)
        }
    }

    pub fn matches(&self, node: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Nodes(nodes) => nodes.iter().any(|n| n == node),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum InterruptNodesRepr {
    Wildcard(String),
    Nodes(Vec<String>),
}

impl Serialize for InterruptNodes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::None => InterruptNodesRepr::Nodes(Vec::new()).serialize(serializer),
            Self::All => InterruptNodesRepr::Wildcard("*".to_string()).serialize(serializer),
            Self::Nodes(nodes) => InterruptNodesRepr::Nodes(nodes.clone()).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for InterruptNodes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Option::<InterruptNodesRepr>::deserialize(deserializer)? {
            None => Ok(Self::None),
            Some(InterruptNodesRepr::Wildcard(s)) if s == "*" => Ok(Self::All),
            Some(InterruptNodesRepr::Wildcard(s)) => Ok(Self::Nodes(vec![s])),
            Some(InterruptNodesRepr::Nodes(nodes)) => Ok(Self::nodes(nodes)),
        }
    }
}

/// When checkpoints reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Each checkpoint is persisted before the next step starts
    Sync,
    /// Checkpoints are persisted in the background while the next step runs
    #[default]
    Async,
    /// Only the final checkpoint of the run is persisted
    Exit,
}

/// Checkpointer selection for one run
#[derive(Clone, Default)]
pub enum CheckpointerChoice {
    /// Use the store the graph was compiled with
    #[default]
    Inherit,
    /// Run without persistence
    Disabled,
    Use(Arc<dyn CheckpointSaver>),
}

impl fmt::Debug for CheckpointerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Use(_) => f.write_str("Use(<checkpointer>)"),
        }
    }
}

fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

/// Configuration of one graph run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    /// Checkpoint to start from; latest of the thread when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Maximum number of supersteps per run
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    #[serde(default)]
    pub interrupt_before: InterruptNodes,

    #[serde(default)]
    pub interrupt_after: InterruptNodes,

    #[serde(default)]
    pub durability: Durability,

    /// Per-step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout: Option<u64>,

    #[serde(skip)]
    pub checkpointer: CheckpointerChoice,

    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpoint_ns: None,
            checkpoint_id: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            interrupt_before: InterruptNodes::None,
            interrupt_after: InterruptNodes::None,
            durability: Durability::Async,
            step_timeout: None,
            checkpointer: CheckpointerChoice::Inherit,
            cancellation: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config addressing the latest checkpoint of `thread_id`
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::new().with_thread_id(thread_id)
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_interrupt_before(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_before = nodes;
        self
    }

    pub fn with_interrupt_after(mut self, nodes: InterruptNodes) -> Self {
        self.interrupt_after = nodes;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = CheckpointerChoice::Use(checkpointer);
        self
    }

    pub fn without_checkpointer(mut self) -> Self {
        self.checkpointer = CheckpointerChoice::Disabled;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn step_timeout_duration(&self) -> Option<Duration> {
        self.step_timeout.map(Duration::from_millis)
    }

    /// Addressing part of this config, as understood by checkpoint stores
    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            thread_id: self.thread_id.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
            checkpoint_ns: self.checkpoint_ns.clone(),
            extra: Default::default(),
        }
    }

    /// Copy of this config pointing at the checkpoint `config` addresses
    pub fn at(&self, config: &CheckpointConfig) -> Self {
        let mut next = self.clone();
        next.thread_id = config.thread_id.clone().or(next.thread_id);
        next.checkpoint_ns = config.checkpoint_ns.clone().or(next.checkpoint_ns);
        next.checkpoint_id = config.checkpoint_id.clone();
        next
    }

    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(GraphError::Configuration(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        if self.step_timeout == Some(0) {
            return Err(GraphError::Configuration(
                "step_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

impl From<CheckpointConfig> for RunConfig {
    fn from(config: CheckpointConfig) -> Self {
        RunConfig::default().at(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.recursion_limit, 25);
        assert_eq!(config.durability, Durability::Async);
        assert!(config.interrupt_before.is_empty());
        assert!(matches!(config.checkpointer, CheckpointerChoice::Inherit));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
thread_id: t-1
recursion_limit: 7
interrupt_before: [review]
interrupt_after: "*"
durability: exit
step_timeout: 1500
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.thread_id.as_deref(), Some("t-1"));
        assert_eq!(config.recursion_limit, 7);
        assert!(config.interrupt_before.matches("review"));
        assert!(!config.interrupt_before.matches("draft"));
        assert_eq!(config.interrupt_after, InterruptNodes::All);
        assert_eq!(config.durability, Durability::Exit);
        assert_eq!(config.step_timeout_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = RunConfig::from_yaml_str("thread_id: t-2").unwrap();
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
        assert_eq!(config.interrupt_after, InterruptNodes::None);
    }

    #[test]
    fn test_zero_recursion_limit_rejected() {
        let result = RunConfig::from_yaml_str("recursion_limit: 0");
        assert!(matches!(result, Err(GraphError::Configuration(_))));
    }

    #[test]
    fn test_interrupt_nodes_serialization() {
        let all = serde_json::to_value(InterruptNodes::All).unwrap();
        assert_eq!(all, serde_json::json!("*"));
        let some: InterruptNodes = serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(some, InterruptNodes::nodes(["a", "b"]));
        let none: InterruptNodes = serde_json::from_value(serde_json::json!([])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_at_checkpoint() {
        let base = RunConfig::thread("t-1").with_recursion_limit(3);
        let addressed = base.at(&CheckpointConfig::new().with_checkpoint_id("c-9"));
        assert_eq!(addressed.thread_id.as_deref(), Some("t-1"));
        assert_eq!(addressed.checkpoint_id.as_deref(), Some("c-9"));
        assert_eq!(addressed.recursion_limit, 3);
    }
}
