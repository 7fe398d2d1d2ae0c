//! Error types for graph construction and execution
//!
//! All errors implement `std::error::Error` via `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── InvalidUpdate        - a write violates a channel's update rule
//! ├── EmptyChannel         - read of a channel with nothing available
//! ├── GraphRecursion       - superstep ceiling exceeded
//! ├── Interrupted          - control-flow signal raised by `Runtime::interrupt`
//! ├── MissingCheckpointer  - state APIs used without a checkpoint store
//! ├── NodeExecution        - a node body failed
//! ├── Validation           - graph structure errors
//! ├── InvalidInput         - input or resume command can't be applied
//! ├── Timeout / Cancelled  - step aborted before all tasks resolved
//! ├── Checkpoint           - persistence errors
//! └── Serialization / Yaml / Io / Configuration
//! ```
//!
//! # Propagation
//!
//! Task-local failures (a node error, a rejected write) fail only their task;
//! they are surfaced after every sibling in the step has resolved, and the
//! siblings' writes are kept as pending writes. Loop-level failures
//! (`GraphRecursion`, `MissingCheckpointer`) are raised immediately.
//!
//! `Interrupted` is not a failure. Node bodies propagate it with `?` from
//! [`crate::Runtime::interrupt`]; the loop catches it and turns the run into an
//! interrupted state. It only reaches callers if a node wraps it into
//! something else.

use crate::pregel::types::Interrupt;
use pregel_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur during graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// A channel write violated the channel's update rule
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Read of a channel that has nothing available
    #[error("Channel '{0}' is empty")]
    EmptyChannel(String),

    /// The run needed more supersteps than allowed
    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    GraphRecursion { limit: usize },

    /// A node asked to suspend; carries the interrupt markers
    #[error("Graph interrupted with {} interrupt(s)", .0.len())]
    Interrupted(Vec<Interrupt>),

    /// A state API or a resumable feature was used without a checkpointer
    #[error("No checkpointer configured; state APIs and resume require one")]
    MissingCheckpointer,

    /// Node execution failed
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Graph structure is invalid
    #[error("Graph validation error: {0}")]
    Validation(String),

    /// Input or resume command can't be applied
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A superstep exceeded the configured step timeout
    #[error("Step {step} timed out after {duration_ms}ms")]
    Timeout { step: i32, duration_ms: u64 },

    /// The run was cancelled from outside
    #[error("Run cancelled during step {step}")]
    Cancelled { step: i32 },

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    /// Create a node execution error
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create an invalid-update error naming the offending channel
    pub fn invalid_update(channel: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUpdate(format!("channel '{}': {}", channel, reason))
    }

    /// Whether this is the interrupt signal rather than a failure
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Channel errors raised while touching `channel`
    pub(crate) fn from_channel(channel: &str, error: CheckpointError) -> Self {
        match error {
            CheckpointError::EmptyChannel(_) => Self::EmptyChannel(channel.to_string()),
            CheckpointError::InvalidUpdate(reason) => Self::invalid_update(channel, reason),
            other => Self::Checkpoint(other),
        }
    }
}

impl Clone for GraphError {
    /// Serialization and I/O sources are rebuilt from their message; the
    /// variant is always preserved
    fn clone(&self) -> Self {
        match self {
            Self::InvalidUpdate(message) => Self::InvalidUpdate(message.clone()),
            Self::EmptyChannel(channel) => Self::EmptyChannel(channel.clone()),
            Self::GraphRecursion { limit } => Self::GraphRecursion { limit: *limit },
            Self::Interrupted(interrupts) => Self::Interrupted(interrupts.clone()),
            Self::MissingCheckpointer => Self::MissingCheckpointer,
            Self::NodeExecution { node, error } => Self::NodeExecution {
                node: node.clone(),
                error: error.clone(),
            },
            Self::Validation(message) => Self::Validation(message.clone()),
            Self::InvalidInput(message) => Self::InvalidInput(message.clone()),
            Self::Timeout { step, duration_ms } => Self::Timeout {
                step: *step,
                duration_ms: *duration_ms,
            },
            Self::Cancelled { step } => Self::Cancelled { step: *step },
            Self::Checkpoint(error) => Self::Checkpoint(error.clone()),
            Self::Serialization(error) => {
                Self::Serialization(serde::de::Error::custom(error.to_string()))
            }
            Self::Yaml(error) => Self::Yaml(serde::de::Error::custom(error.to_string())),
            Self::Io(error) => Self::Io(std::io::Error::new(error.kind(), error.to_string())),
            Self::Configuration(message) => Self::Configuration(message.clone()),
        }
    }
}

impl From<CheckpointError> for GraphError {
    fn from(error: CheckpointError) -> Self {
        match error {
            CheckpointError::EmptyChannel(what) => Self::EmptyChannel(what),
            CheckpointError::InvalidUpdate(reason) => Self::InvalidUpdate(reason),
            other => Self::Checkpoint(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_errors_are_mapped() {
        let err = GraphError::from_channel("a", CheckpointError::EmptyChannel("LastValue".into()));
        assert!(matches!(err, GraphError::EmptyChannel(ref name) if name == "a"));

        let err: GraphError = CheckpointError::InvalidUpdate("two writes".into()).into();
        assert!(matches!(err, GraphError::InvalidUpdate(_)));

        let err: GraphError = CheckpointError::NotFound("x".into()).into();
        assert!(matches!(err, GraphError::Checkpoint(_)));
    }

    #[test]
    fn test_interrupt_is_not_a_failure() {
        let err = GraphError::Interrupted(vec![Interrupt::new("id", json!("ask"))]);
        assert!(err.is_interrupt());
        assert!(!GraphError::MissingCheckpointer.is_interrupt());
        assert_eq!(err.to_string(), "Graph interrupted with 1 interrupt(s)");
    }

    #[test]
    fn test_clone_keeps_variant() {
        let err: GraphError = CheckpointError::NotFound("abc".into()).into();
        assert!(matches!(
            err.clone(),
            GraphError::Checkpoint(CheckpointError::NotFound(ref id)) if id == "abc"
        ));

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = GraphError::Serialization(parse);
        let copy = err.clone();
        assert!(matches!(copy, GraphError::Serialization(_)));
        assert_eq!(copy.to_string(), err.to_string());

        let err = GraphError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err.clone(), GraphError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_recursion_reports_limit() {
        let err = GraphError::GraphRecursion { limit: 5 };
        assert!(err.to_string().contains('5'));
    }
}
