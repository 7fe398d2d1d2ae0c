//! Stream events emitted while a graph runs
//!
//! `CompiledGraph::stream` hands back a stream of [`StreamChunk`]s. Each chunk
//! carries the mode that selected it and a [`StreamEvent`]:
//!
//! | Mode | Events |
//! |------|--------|
//! | `values` | `Values`: graph output after the input and after every superstep |
//! | `updates` | `Updates`: per node, the writes it produced; interrupts as node `__interrupt__` |
//! | `tasks` | `TaskStart`, `TaskEnd`, `TaskError` |
//! | `checkpoints` | `Checkpoint`: every checkpoint the loop creates |
//! | `debug` | everything `tasks` and `checkpoints` emit |
//!
//! Chunks of one superstep arrive in the order the loop produced them; the
//! `sequence` field is strictly increasing within a run.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// Selects which events a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Values,
    Updates,
    Tasks,
    Checkpoints,
    Debug,
}

/// An event emitted by the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Graph output at a step boundary
    Values { step: i32, values: Value },

    /// Writes of one node in the last superstep
    Updates { step: i32, node: String, update: Value },

    /// A checkpoint was created
    Checkpoint {
        step: i32,
        thread_id: Option<String>,
        namespace: String,
        checkpoint_id: String,
        source: String,
    },

    TaskStart {
        step: i32,
        task_id: String,
        node: String,
        input: Value,
        triggers: Vec<String>,
    },

    TaskEnd {
        step: i32,
        task_id: String,
        node: String,
        writes: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        interrupts: Vec<Value>,
    },

    TaskError {
        step: i32,
        task_id: String,
        node: String,
        error: String,
    },
}

impl StreamEvent {
    pub fn matches_mode(&self, mode: StreamMode) -> bool {
        match (mode, self) {
            (StreamMode::Values, StreamEvent::Values { .. }) => true,
            (StreamMode::Updates, StreamEvent::Updates { .. }) => true,
            (StreamMode::Checkpoints | StreamMode::Debug, StreamEvent::Checkpoint { .. }) => true,
            (
                StreamMode::Tasks | StreamMode::Debug,
                StreamEvent::TaskStart { .. } | StreamEvent::TaskEnd { .. } | StreamEvent::TaskError { .. },
            ) => true,
            _ => false,
        }
    }
}

/// An event together with the mode that selected it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Checkpoint namespace (empty for the root graph)
    pub namespace: String,
    pub mode: StreamMode,
    pub event: StreamEvent,
    pub sequence: u64,
}

/// Routes loop events to a stream consumer, filtered by mode
pub(crate) struct StreamMultiplexer {
    modes: BTreeSet<StreamMode>,
    namespace: String,
    sequence: u64,
    tx: mpsc::Sender<Result<StreamChunk>>,
}

impl StreamMultiplexer {
    pub(crate) fn new(
        modes: impl IntoIterator<Item = StreamMode>,
        namespace: impl Into<String>,
        tx: mpsc::Sender<Result<StreamChunk>>,
    ) -> Self {
        Self {
            modes: modes.into_iter().collect(),
            namespace: namespace.into(),
            sequence: 0,
            tx,
        }
    }

    pub(crate) fn wants(&self, mode: StreamMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Emit `event` once per enabled mode it matches
    pub(crate) async fn emit(&mut self, event: StreamEvent) {
        let modes: Vec<StreamMode> = self
            .modes
            .iter()
            .copied()
            .filter(|mode| event.matches_mode(*mode))
            .collect();
        for mode in modes {
            self.sequence += 1;
            let chunk = StreamChunk {
                namespace: self.namespace.clone(),
                mode,
                event: event.clone(),
                sequence: self.sequence,
            };
            if self.tx.send(Ok(chunk)).await.is_err() {
                tracing::debug!("Stream consumer dropped; discarding event");
                return;
            }
        }
    }

    /// Deliver the terminal error of the run
    pub(crate) async fn fail(&self, error: crate::error::GraphError) {
        let _ = self.tx.send(Err(error)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_start() -> StreamEvent {
        StreamEvent::TaskStart {
            step: 0,
            task_id: "t".into(),
            node: "a".into(),
            input: json!(null),
            triggers: vec![],
        }
    }

    #[test]
    fn test_debug_matches_tasks_and_checkpoints() {
        assert!(task_start().matches_mode(StreamMode::Debug));
        assert!(task_start().matches_mode(StreamMode::Tasks));
        assert!(!task_start().matches_mode(StreamMode::Values));
    }

    #[tokio::test]
    async fn test_emit_filters_and_sequences() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut mux = StreamMultiplexer::new([StreamMode::Tasks, StreamMode::Debug], "", tx);
        mux.emit(task_start()).await;
        mux.emit(StreamEvent::Values { step: 0, values: json!({}) }).await;
        drop(mux);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].mode, StreamMode::Tasks);
        assert_eq!(chunks[1].mode, StreamMode::Debug);
        assert!(chunks[0].sequence < chunks[1].sequence);
    }

    #[test]
    fn test_mode_serialization() {
        let mode: StreamMode = serde_json::from_value(json!("checkpoints")).unwrap();
        assert_eq!(mode, StreamMode::Checkpoints);
    }
}
