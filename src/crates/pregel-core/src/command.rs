//! Run inputs and resume commands
//!
//! A run starts from one of three inputs:
//!
//! - [`GraphInput::Values`]: new input, written to the graph's input channels
//! - [`GraphInput::Resume`]: a [`Command`] answering pending interrupts
//! - [`GraphInput::Continue`]: carry on from the stored checkpoint as is
//!   (after a static interrupt, or to replay from a past checkpoint)
//!
//! Resume values are appended to the interrupted task's resume list; the task
//! then re-runs and its interrupt calls are answered in order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Resume payload of a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResumeValue {
    /// Answers the only interrupted task
    Single(Value),
    /// Keyed by task id or interrupt id
    ByKey(HashMap<String, Value>),
}

/// Instruction to resume an interrupted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub resume: ResumeValue,
}

impl Command {
    pub fn resume(value: Value) -> Self {
        Self {
            resume: ResumeValue::Single(value),
        }
    }

    pub fn resume_by_key<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            resume: ResumeValue::ByKey(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

/// What a run starts from
#[derive(Debug, Clone, PartialEq)]
pub enum GraphInput {
    Values(Value),
    Resume(Command),
    Continue,
}

impl From<Value> for GraphInput {
    fn from(value: Value) -> Self {
        GraphInput::Values(value)
    }
}

impl From<Command> for GraphInput {
    fn from(command: Command) -> Self {
        GraphInput::Resume(command)
    }
}

impl From<Option<Value>> for GraphInput {
    fn from(value: Option<Value>) -> Self {
        value.map_or(GraphInput::Continue, GraphInput::Values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_conversions() {
        assert_eq!(GraphInput::from(json!(1)), GraphInput::Values(json!(1)));
        assert_eq!(GraphInput::from(None), GraphInput::Continue);
        assert!(matches!(
            GraphInput::from(Command::resume(json!("y"))),
            GraphInput::Resume(_)
        ));
    }

    #[test]
    fn test_keyed_resume() {
        let command = Command::resume_by_key([("task-1", json!(true))]);
        let ResumeValue::ByKey(map) = command.resume else {
            panic!("expected keyed resume");
        };
        assert_eq!(map["task-1"], json!(true));
    }
}
