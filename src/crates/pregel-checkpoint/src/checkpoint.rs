//! Checkpoint data structures
//!
//! A [`Checkpoint`] is the durable snapshot taken at a superstep boundary:
//! serialized channel blobs, the version of every channel, and the versions
//! each node has already consumed. Writes produced by tasks of the step that
//! follows a checkpoint are stored next to it as [`PendingWrite`]s until the
//! step completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a checkpoint
pub type CheckpointId = String;

/// Reserved channel carrying a task's error marker
pub const ERROR: &str = "__error__";
/// Reserved channel carrying a task's interrupt markers
pub const INTERRUPT: &str = "__interrupt__";
/// Reserved channel carrying a task's resume list
pub const RESUME: &str = "__resume__";

/// A write produced by a task and not yet folded into channel state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

impl PendingWrite {
    pub fn new(task_id: impl Into<String>, channel: impl Into<String>, value: Value) -> Self {
        Self {
            task_id: task_id.into(),
            channel: channel.into(),
            value,
        }
    }

    /// Whether this write is an interrupt, resume or error marker
    pub fn is_control(&self) -> bool {
        matches!(self.channel.as_str(), ERROR | INTERRUPT | RESUME)
    }
}

/// Monotonically increasing version token
///
/// String versions are expected to be zero padded so that lexical order
/// matches numeric order; [`ChannelVersion::next`] keeps them that way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelVersion {
    Int(i64),
    String(String),
}

impl ChannelVersion {
    pub fn next(&self) -> Self {
        match self {
            ChannelVersion::Int(v) => ChannelVersion::Int(v + 1),
            ChannelVersion::String(s) => {
                let current = s
                    .split('.')
                    .next()
                    .and_then(|prefix| prefix.parse::<u64>().ok())
                    .unwrap_or(0);
                ChannelVersion::String(format!("{:032}", current + 1))
            }
        }
    }
}

impl Default for ChannelVersion {
    fn default() -> Self {
        ChannelVersion::Int(0)
    }
}

impl PartialOrd for ChannelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChannelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ChannelVersion::Int(a), ChannelVersion::Int(b)) => a.cmp(b),
            (ChannelVersion::String(a), ChannelVersion::String(b)) => a.cmp(b),
            (ChannelVersion::Int(_), ChannelVersion::String(_)) => Ordering::Less,
            (ChannelVersion::String(_), ChannelVersion::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for ChannelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelVersion::Int(v) => write!(f, "{}", v),
            ChannelVersion::String(s) => f.write_str(s),
        }
    }
}

/// Map of channel name to version
pub type ChannelVersions = HashMap<String, ChannelVersion>;

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Input written at the start of a run
    Input,
    /// End of a superstep
    Loop,
    /// Manual state update
    Update,
    /// Copy of another checkpoint
    Fork,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Loop => "loop",
            CheckpointSource::Update => "update",
            CheckpointSource::Fork => "fork",
        }
    }
}

/// Metadata stored alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// -1 for the input checkpoint, then one per superstep
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// Parent checkpoint ids keyed by namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<HashMap<String, String>>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_parents(mut self, parents: HashMap<String, String>) -> Self {
        self.parents = Some(parents);
        self
    }

    pub fn with_extra(mut self, key: String, value: Value) -> Self {
        self.extra.insert(key, value);
        self
    }

    /// Whether every entry of `filter` matches a field of this metadata
    pub fn matches(&self, filter: &HashMap<String, Value>) -> bool {
        let as_json = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return filter.is_empty(),
        };
        filter
            .iter()
            .all(|(key, expected)| as_json.get(key) == Some(expected))
    }
}

/// Snapshot of channel state at a superstep boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Format version
    pub v: i32,

    pub id: CheckpointId,

    pub ts: DateTime<Utc>,

    /// Tagged channel blobs; channels with nothing to persist are absent
    pub channel_values: HashMap<String, Value>,

    pub channel_versions: ChannelVersions,

    /// node name -> channel -> last version of that channel the node consumed
    pub versions_seen: HashMap<String, ChannelVersions>,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(
        id: CheckpointId,
        channel_values: HashMap<String, Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id,
            ts: Utc::now(),
            channel_values,
            channel_versions,
            versions_seen,
        }
    }

    /// An empty checkpoint with a random id, the root of a new thread
    pub fn empty() -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        )
    }

    /// Copy of this checkpoint under the id of its successor
    ///
    /// Input and loop successors get an id derived from the parent, so
    /// replaying from the same parent produces the same ids and repeated puts
    /// of a replayed step are idempotent. Updates and forks branch the
    /// history and always get a fresh id.
    pub fn successor(&self, step: i32, source: CheckpointSource) -> Self {
        let mut next = self.clone();
        next.id = match source {
            CheckpointSource::Input | CheckpointSource::Loop => {
                derive_id(&self.id, &format!("{}:{}", step, source.as_str()))
            }
            CheckpointSource::Update | CheckpointSource::Fork => Uuid::new_v4().to_string(),
        };
        next.ts = Utc::now();
        next
    }
}

/// UUID namespace used for ids derived from `id`
pub fn id_namespace(id: &str) -> Uuid {
    Uuid::parse_str(id).unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()))
}

/// Deterministic UUIDv5 of `name` within the namespace of `parent`
pub fn derive_id(parent: &str, name: &str) -> String {
    Uuid::new_v5(&id_namespace(parent), name.as_bytes()).to_string()
}

/// Addressing for checkpoint reads and writes
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    /// Namespace, with the root namespace as the empty string
    pub fn namespace(&self) -> &str {
        self.checkpoint_ns.as_deref().unwrap_or("")
    }
}

/// A checkpoint together with its addressing, metadata and pending writes
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
    pub pending_writes: Vec<PendingWrite>,
}

impl CheckpointTuple {
    pub fn new(config: CheckpointConfig, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
            pending_writes: Vec::new(),
        }
    }

    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }

    pub fn with_pending_writes(mut self, pending_writes: Vec<PendingWrite>) -> Self {
        self.pending_writes = pending_writes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = Checkpoint::empty();
        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert!(checkpoint.channel_values.is_empty());
        assert!(checkpoint.channel_versions.is_empty());
        assert!(checkpoint.versions_seen.is_empty());
    }

    #[test]
    fn test_channel_version_ordering() {
        let v1 = ChannelVersion::Int(1);
        assert_eq!(v1.next(), ChannelVersion::Int(2));
        assert!(v1.next() > v1);

        let s = ChannelVersion::String(format!("{:032}.0.5", 9));
        let next = s.next();
        assert_eq!(next, ChannelVersion::String(format!("{:032}", 10)));
        assert!(next > s);
    }

    #[test]
    fn test_successor_ids_are_deterministic() {
        let checkpoint = Checkpoint::empty();
        let a = checkpoint.successor(0, CheckpointSource::Loop);
        let b = checkpoint.successor(0, CheckpointSource::Loop);
        let c = checkpoint.successor(0, CheckpointSource::Input);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_ne!(a.id, checkpoint.id);
    }

    #[test]
    fn test_update_successors_branch() {
        let checkpoint = Checkpoint::empty();
        let first = checkpoint.successor(0, CheckpointSource::Update);
        let second = checkpoint.successor(0, CheckpointSource::Update);
        assert_ne!(first.id, second.id);
        assert_ne!(first.id, checkpoint.id);
    }

    #[test]
    fn test_metadata_matches_filter() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("user".to_string(), json!("ada"));

        let mut filter = HashMap::new();
        filter.insert("source".to_string(), json!("input"));
        filter.insert("user".to_string(), json!("ada"));
        assert!(metadata.matches(&filter));

        filter.insert("step".to_string(), json!(3));
        assert!(!metadata.matches(&filter));
    }

    #[test]
    fn test_pending_write_control_channels() {
        assert!(PendingWrite::new("t", INTERRUPT, json!([])).is_control());
        assert!(!PendingWrite::new("t", "messages", json!("hi")).is_control());
    }

    #[test]
    fn test_checkpoint_config() {
        let config = CheckpointConfig::new()
            .with_thread_id("thread-1")
            .with_checkpoint_id("checkpoint-1");

        assert_eq!(config.thread_id, Some("thread-1".to_string()));
        assert_eq!(config.checkpoint_id, Some("checkpoint-1".to_string()));
        assert_eq!(config.namespace(), "");
    }
}
