//! Main Pregel execution loop.
//!
//! One [`PregelLoop`] drives one run of a graph on one thread:
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────────┐
//!            ▼                                                          │
//!   Ready ──► prepare tasks ── none ──► Done                            │
//!            │                                                          │
//!            ├── interrupt_before ──► Interrupted                       │
//!            ▼                                                          │
//!         Running ── all tasks settled ──► ApplyingWrites ──► Checkpointing
//!            │                                                    │
//!            ├── interrupt raised ──► Interrupted                 ├── END written ──► Done
//!            └── task failed / timeout / cancel ──► Error         └── interrupt_after ──► Interrupted
//! ```
//!
//! Every task's outcome is stored as pending writes as soon as the task
//! settles, so an interrupt or failure in one task never loses the writes of
//! its siblings: the next run from the same checkpoint reuses them instead of
//! running those tasks again.

use crate::command::{Command, GraphInput, ResumeValue};
use crate::config::{CheckpointerChoice, RunConfig};
use crate::constants::{END, ERROR, INTERRUPT, NO_WRITES, RESUME, START};
use crate::error::{GraphError, Result};
use crate::graph::{Channels, PregelGraph};
use crate::pregel::algo::{
    apply_writes, create_checkpoint, mark_interrupt_seen, match_pending_writes,
    pending_interrupts, prepare_next_tasks, restore_channels, should_interrupt,
};
use crate::pregel::checkpoint::CheckpointWriter;
use crate::pregel::executor::{TaskExecutor, TaskJob, TaskOutcome};
use crate::pregel::io::{map_input, read_output, writes_to_update};
use crate::pregel::types::{Interrupt, PregelExecutableTask, PregelTaskWrites};
use crate::stream::{StreamEvent, StreamMode, StreamMultiplexer};
use pregel_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointSaver,
    CheckpointSource, PendingWrite,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Where the loop is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Ready,
    Running,
    ApplyingWrites,
    Checkpointing,
    Interrupted,
    Done,
    Error,
}

/// Result of a run that did not fail
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Done` or `Interrupted`
    pub status: LoopStatus,
    /// Graph output at the point the run stopped
    pub value: Value,
    /// Interrupts raised by tasks; empty for static interrupts
    pub interrupts: Vec<Interrupt>,
    /// Checkpoint the run stopped at; `None` without a checkpointer
    pub config: Option<CheckpointConfig>,
    pub step: i32,
}

impl RunOutcome {
    pub fn is_interrupted(&self) -> bool {
        self.status == LoopStatus::Interrupted
    }
}

enum Tick {
    Continue,
    Stop(LoopStatus, Vec<Interrupt>),
}

/// Resolve the store a run persists through
pub(crate) fn resolve_saver(
    graph: &PregelGraph,
    config: &RunConfig,
) -> Option<Arc<dyn CheckpointSaver>> {
    match &config.checkpointer {
        CheckpointerChoice::Inherit => graph.checkpointer.clone(),
        CheckpointerChoice::Disabled => None,
        CheckpointerChoice::Use(saver) => Some(saver.clone()),
    }
}

/// Superstep loop of a single run
pub(crate) struct PregelLoop {
    graph: Arc<PregelGraph>,
    config: RunConfig,
    has_saver: bool,
    namespace: String,
    checkpoint: Checkpoint,
    pending_writes: Vec<PendingWrite>,
    channels: Channels,
    /// Channels changed by the last write application of this run; `None`
    /// until this loop has applied writes itself
    updated_channels: Option<Vec<String>>,
    step: i32,
    steps_run: usize,
    status: LoopStatus,
    writer: CheckpointWriter,
    stream: Option<StreamMultiplexer>,
}

impl PregelLoop {
    /// Load the starting checkpoint and restore channels from it
    pub(crate) async fn new(
        graph: Arc<PregelGraph>,
        config: RunConfig,
        stream: Option<StreamMultiplexer>,
    ) -> Result<Self> {
        config.validate()?;
        let saver = resolve_saver(&graph, &config);
        if saver.is_some() && config.thread_id.is_none() {
            return Err(GraphError::Configuration(
                "thread_id is required when a checkpointer is configured".to_string(),
            ));
        }

        let requested = config.checkpoint_config();
        let tuple = match &saver {
            Some(saver) => saver.get_tuple(&requested).await?,
            None => None,
        };
        let (checkpoint, metadata, pending_writes, current) = match tuple {
            Some(tuple) => (
                tuple.checkpoint,
                tuple.metadata,
                tuple.pending_writes,
                tuple.config,
            ),
            None => {
                if let Some(id) = &requested.checkpoint_id {
                    return Err(CheckpointError::NotFound(id.clone()).into());
                }
                (
                    Checkpoint::empty(),
                    CheckpointMetadata::new(),
                    Vec::new(),
                    requested.clone(),
                )
            }
        };

        let channels = restore_channels(&graph, &checkpoint)?;
        let step = metadata.step.map_or(-1, |step| step + 1);
        let writer = CheckpointWriter::new(
            saver.clone(),
            config.durability,
            current,
            checkpoint.channel_versions.clone(),
        );

        tracing::debug!(
            thread_id = ?config.thread_id,
            checkpoint_id = %checkpoint.id,
            step,
            pending_writes = pending_writes.len(),
            "Loop initialized"
        );

        Ok(Self {
            namespace: requested.namespace().to_string(),
            has_saver: saver.is_some(),
            graph,
            config,
            checkpoint,
            pending_writes,
            channels,
            updated_channels: None,
            step,
            steps_run: 0,
            status: LoopStatus::Ready,
            writer,
            stream,
        })
    }

    /// Run to completion, interrupt or error
    ///
    /// Whatever the result, queued checkpoint work is flushed before returning.
    pub(crate) async fn run(mut self, input: GraphInput) -> Result<RunOutcome> {
        let result = self.run_inner(input).await;
        if result.is_err() {
            self.status = LoopStatus::Error;
        }
        let flushed = self.writer.flush().await;
        tracing::debug!(status = ?self.status, step = self.step, "Loop finished");

        let outcome = match (result, flushed) {
            (Ok(outcome), Ok(())) => Ok(RunOutcome {
                config: self.has_saver.then(|| self.writer.current().clone()),
                ..outcome
            }),
            (Err(error), _) | (Ok(_), Err(error)) => Err(error),
        };

        if let Some(stream) = &self.stream {
            if let Err(error) = &outcome {
                stream.fail(error.clone()).await;
            }
        }
        outcome
    }

    async fn run_inner(&mut self, input: GraphInput) -> Result<RunOutcome> {
        self.start(input).await?;
        loop {
            match self.tick().await? {
                Tick::Continue => continue,
                Tick::Stop(status, interrupts) => {
                    self.status = status;
                    tracing::info!(
                        step = self.step,
                        status = ?status,
                        interrupts = interrupts.len(),
                        "Run stopped"
                    );
                    return Ok(RunOutcome {
                        status,
                        value: read_output(&self.graph.output, &self.channels),
                        interrupts,
                        config: None,
                        step: self.step,
                    });
                }
            }
        }
    }

    async fn start(&mut self, input: GraphInput) -> Result<()> {
        match input {
            GraphInput::Values(value) => {
                let writes = map_input(&self.graph.input, value)?;
                // Tasks still pending on the checkpoint are dropped in favor
                // of the new input
                let pending = prepare_next_tasks(
                    &self.checkpoint,
                    &self.channels,
                    &self.graph,
                    self.step,
                    &self.namespace,
                    None,
                )?;
                if !pending.is_empty() {
                    tracing::debug!(
                        tasks = ?pending.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                        "Discarding pending tasks for new input"
                    );
                }
                let mut batch: Vec<PregelTaskWrites> =
                    pending.iter().map(PregelTaskWrites::discarded).collect();
                batch.push(PregelTaskWrites::new(START, writes));
                let refs: Vec<&PregelTaskWrites> = batch.iter().collect();
                let updated = apply_writes(
                    &mut self.checkpoint,
                    &mut self.channels,
                    &refs,
                    &self.graph.trigger_to_nodes,
                )?;
                self.updated_channels = Some(updated);
                self.put_checkpoint(CheckpointSource::Input).await?;
                self.step += 1;
                self.emit_values().await;
            }
            GraphInput::Resume(command) => {
                if !self.has_saver {
                    return Err(GraphError::MissingCheckpointer);
                }
                self.apply_resume(command).await?;
                mark_interrupt_seen(&mut self.checkpoint);
            }
            GraphInput::Continue => {
                mark_interrupt_seen(&mut self.checkpoint);
            }
        }
        Ok(())
    }

    /// Append resume values to the resume lists of interrupted tasks
    ///
    /// A single value with no interrupted task pending (a static breakpoint)
    /// resumes like [`GraphInput::Continue`]; the value is not used.
    async fn apply_resume(&mut self, command: Command) -> Result<()> {
        let mut tasks = prepare_next_tasks(
            &self.checkpoint,
            &self.channels,
            &self.graph,
            self.step,
            &self.namespace,
            None,
        )?;
        match_pending_writes(&mut tasks, &self.pending_writes);
        let interrupted: Vec<(&PregelExecutableTask, Vec<Interrupt>)> = tasks
            .iter()
            .map(|task| (task, pending_interrupts(&self.pending_writes, &task.id)))
            .filter(|(_, interrupts)| !interrupts.is_empty())
            .collect();

        let mut answers: Vec<(String, Vec<Value>)> = Vec::new();
        match command.resume {
            ResumeValue::Single(value) => match interrupted.as_slice() {
                [] => {
                    tracing::debug!("No interrupted task to resume; continuing");
                }
                [(task, _)] => {
                    let mut resume = task.resume.clone();
                    resume.push(value);
                    answers.push((task.id.clone(), resume));
                }
                _ => {
                    return Err(GraphError::InvalidInput(format!(
                        "a single resume value is ambiguous with {} interrupted tasks; \
                         resume by interrupt id instead",
                        interrupted.len()
                    )));
                }
            },
            ResumeValue::ByKey(values) => {
                let mut keys: Vec<&String> = values.keys().collect();
                keys.sort();
                for key in keys {
                    let found = interrupted.iter().find(|(task, interrupts)| {
                        &task.id == key || interrupts.iter().any(|i| &i.id == key)
                    });
                    let Some((task, _)) = found else {
                        return Err(GraphError::InvalidInput(format!(
                            "no interrupted task or interrupt with id '{}'",
                            key
                        )));
                    };
                    let slot = match answers.iter().position(|(id, _)| id == &task.id) {
                        Some(slot) => slot,
                        None => {
                            answers.push((task.id.clone(), task.resume.clone()));
                            answers.len() - 1
                        }
                    };
                    answers[slot].1.push(values[key].clone());
                }
            }
        }

        for (task_id, resume) in answers {
            tracing::debug!(task_id = %task_id, values = resume.len(), "Recording resume values");
            let value = Value::Array(resume);
            self.writer
                .put_writes(&task_id, vec![(RESUME.to_string(), value.clone())])
                .await?;
            self.pending_writes
                .retain(|w| !(w.task_id == task_id && w.channel == RESUME));
            self.pending_writes
                .push(PendingWrite::new(task_id, RESUME, value));
        }
        Ok(())
    }

    async fn tick(&mut self) -> Result<Tick> {
        self.status = LoopStatus::Ready;
        let mut tasks = prepare_next_tasks(
            &self.checkpoint,
            &self.channels,
            &self.graph,
            self.step,
            &self.namespace,
            self.updated_channels.as_deref(),
        )?;
        if tasks.is_empty() {
            return Ok(Tick::Stop(LoopStatus::Done, Vec::new()));
        }
        if self.steps_run >= self.config.recursion_limit {
            return Err(GraphError::GraphRecursion {
                limit: self.config.recursion_limit,
            });
        }
        match_pending_writes(&mut tasks, &self.pending_writes);

        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        if should_interrupt(&self.checkpoint, &self.config.interrupt_before, &name_refs) {
            tracing::info!(step = self.step, nodes = ?names, "Interrupting before nodes");
            return Ok(Tick::Stop(LoopStatus::Interrupted, Vec::new()));
        }

        tracing::debug!(step = self.step, tasks = tasks.len(), "Starting superstep");
        self.status = LoopStatus::Running;
        let outcomes = self.execute(&tasks).await?;

        let mut interrupts = Vec::new();
        let mut first_error = None;
        for (task, outcome) in tasks.iter_mut().zip(outcomes) {
            match outcome {
                None => {}
                Some(TaskOutcome::Success(writes)) => task.writes = writes,
                Some(TaskOutcome::Interrupted {
                    interrupts: raised, ..
                }) => interrupts.extend(raised),
                Some(TaskOutcome::Failed(error)) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        if !interrupts.is_empty() {
            self.emit(StreamEvent::Updates {
                step: self.step,
                node: INTERRUPT.to_string(),
                update: serde_json::to_value(&interrupts)?,
            })
            .await;
            return Ok(Tick::Stop(LoopStatus::Interrupted, interrupts));
        }

        self.status = LoopStatus::ApplyingWrites;
        let refs: Vec<&PregelExecutableTask> = tasks.iter().collect();
        let updated = apply_writes(
            &mut self.checkpoint,
            &mut self.channels,
            &refs,
            &self.graph.trigger_to_nodes,
        )?;
        tracing::debug!(step = self.step, updated = ?updated, "Writes applied");
        self.updated_channels = Some(updated);

        if self.wants(StreamMode::Updates) {
            for task in &tasks {
                self.emit(StreamEvent::Updates {
                    step: self.step,
                    node: task.name.clone(),
                    update: writes_to_update(&task.writes),
                })
                .await;
            }
        }

        self.status = LoopStatus::Checkpointing;
        self.put_checkpoint(CheckpointSource::Loop).await?;
        self.steps_run += 1;
        self.step += 1;
        self.emit_values().await;

        let ended = tasks
            .iter()
            .any(|task| task.writes.iter().any(|(channel, _)| channel == END));
        if ended {
            return Ok(Tick::Stop(LoopStatus::Done, Vec::new()));
        }
        if should_interrupt(&self.checkpoint, &self.config.interrupt_after, &name_refs) {
            tracing::info!(step = self.step, nodes = ?names, "Interrupting after nodes");
            return Ok(Tick::Stop(LoopStatus::Interrupted, Vec::new()));
        }
        Ok(Tick::Continue)
    }

    /// Run every task that is not done yet and record each outcome as it settles
    async fn execute(&mut self, tasks: &[PregelExecutableTask]) -> Result<Vec<Option<TaskOutcome>>> {
        let mut join_set = JoinSet::new();
        for (index, task) in tasks.iter().enumerate() {
            if task.done {
                tracing::debug!(task = %task.name, "Reusing stored writes");
                continue;
            }
            self.emit(StreamEvent::TaskStart {
                step: self.step,
                task_id: task.id.clone(),
                node: task.name.clone(),
                input: task.input.clone(),
                triggers: task.triggers.clone(),
            })
            .await;
            join_set.spawn(TaskExecutor::run(TaskJob::new(
                index,
                task,
                self.step,
                self.graph.clone(),
            )));
        }

        let step = self.step;
        let timeout = self.config.step_timeout_duration();
        let deadline = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        let token = self.config.cancellation.clone();
        let cancelled = async move {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(cancelled);

        let mut outcomes: Vec<Option<TaskOutcome>> = tasks.iter().map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    join_set.abort_all();
                    tracing::warn!(step, "Run cancelled; aborting in-flight tasks");
                    return Err(GraphError::Cancelled { step });
                }
                _ = &mut deadline => {
                    join_set.abort_all();
                    let duration_ms = self.config.step_timeout.unwrap_or_default();
                    tracing::warn!(step, duration_ms, "Step timed out; aborting in-flight tasks");
                    return Err(GraphError::Timeout { step, duration_ms });
                }
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(Ok((index, outcome))) => {
                        self.record(&tasks[index], &outcome).await?;
                        outcomes[index] = Some(outcome);
                    }
                    Some(Err(error)) => {
                        return Err(GraphError::node_execution("task", error.to_string()));
                    }
                }
            }
        }
        Ok(outcomes)
    }

    /// Store a settled task's outcome as pending writes of the current checkpoint
    async fn record(&mut self, task: &PregelExecutableTask, outcome: &TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Success(writes) => {
                let stored = if writes.is_empty() {
                    vec![(NO_WRITES.to_string(), Value::Null)]
                } else {
                    writes.clone()
                };
                self.writer.put_writes(&task.id, stored).await?;
                self.emit(StreamEvent::TaskEnd {
                    step: self.step,
                    task_id: task.id.clone(),
                    node: task.name.clone(),
                    writes: writes_to_update(writes),
                    interrupts: Vec::new(),
                })
                .await;
            }
            TaskOutcome::Interrupted { writes, interrupts } => {
                let mut stored = writes.clone();
                stored.push((INTERRUPT.to_string(), serde_json::to_value(interrupts)?));
                self.writer.put_writes(&task.id, stored).await?;
                self.emit(StreamEvent::TaskEnd {
                    step: self.step,
                    task_id: task.id.clone(),
                    node: task.name.clone(),
                    writes: writes_to_update(writes),
                    interrupts: interrupts
                        .iter()
                        .map(serde_json::to_value)
                        .collect::<std::result::Result<_, _>>()?,
                })
                .await;
            }
            TaskOutcome::Failed(error) => {
                self.writer
                    .put_writes(&task.id, vec![(ERROR.to_string(), json!(error.to_string()))])
                    .await?;
                self.emit(StreamEvent::TaskError {
                    step: self.step,
                    task_id: task.id.clone(),
                    node: task.name.clone(),
                    error: error.to_string(),
                })
                .await;
            }
        }
        Ok(())
    }

    async fn put_checkpoint(&mut self, source: CheckpointSource) -> Result<()> {
        let next = create_checkpoint(&self.checkpoint, &self.channels, self.step, source);
        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_step(self.step);
        self.checkpoint = next;
        self.pending_writes.clear();
        self.writer.put(&self.checkpoint, metadata).await?;

        if self.writer.is_enabled() {
            let config = self.writer.current().clone();
            self.emit(StreamEvent::Checkpoint {
                step: self.step,
                thread_id: config.thread_id.clone(),
                namespace: self.namespace.clone(),
                checkpoint_id: self.checkpoint.id.clone(),
                source: source.as_str().to_string(),
            })
            .await;
        }
        Ok(())
    }

    fn wants(&self, mode: StreamMode) -> bool {
        self.stream.as_ref().is_some_and(|s| s.wants(mode))
    }

    async fn emit(&mut self, event: StreamEvent) {
        if let Some(stream) = &mut self.stream {
            stream.emit(event).await;
        }
    }

    async fn emit_values(&mut self) {
        if self.wants(StreamMode::Values) {
            let values = read_output(&self.graph.output, &self.channels);
            self.emit(StreamEvent::Values {
                step: self.step - 1,
                values,
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, NodeSpec};
    use crate::runtime::Runtime;
    use pregel_checkpoint::{Channel, InMemoryCheckpointSaver};

    fn counter_graph(saver: Arc<InMemoryCheckpointSaver>) -> Arc<PregelGraph> {
        let mut builder = GraphBuilder::new();
        builder
            .add_channel("count", Channel::last_value())
            .add_node(
                NodeSpec::new("inc", |input: Value, _rt: Runtime| async move {
                    Ok(json!(input.as_i64().unwrap_or(0) + 1))
                })
                .triggered_by([START])
                .writes_to("count"),
            )
            .with_checkpointer(saver);
        Arc::new(builder.build().unwrap())
    }

    #[tokio::test]
    async fn test_run_creates_input_and_loop_checkpoints() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let graph = counter_graph(saver.clone());
        let config = RunConfig::thread("t").with_durability(crate::config::Durability::Sync);

        let pregel = PregelLoop::new(graph, config, None).await.unwrap();
        let outcome = pregel.run(GraphInput::Values(json!(1))).await.unwrap();

        assert_eq!(outcome.status, LoopStatus::Done);
        assert_eq!(outcome.value, json!({"count": 2}));
        assert_eq!(outcome.step, 1);
        assert_eq!(saver.checkpoint_count().await, 2);

        let latest = saver
            .get_tuple(&CheckpointConfig::new().with_thread_id("t"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.metadata.step, Some(0));
        assert_eq!(latest.metadata.source, Some(CheckpointSource::Loop));
        assert_eq!(outcome.config.unwrap().checkpoint_id, Some(latest.checkpoint.id));
    }

    #[tokio::test]
    async fn test_thread_id_required_with_checkpointer() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let result = PregelLoop::new(counter_graph(saver), RunConfig::new(), None).await;
        assert!(matches!(result, Err(GraphError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_resume_without_checkpointer() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let config = RunConfig::new().without_checkpointer();
        let pregel = PregelLoop::new(counter_graph(saver), config, None).await.unwrap();
        let result = pregel
            .run(GraphInput::Resume(Command::resume(json!(1))))
            .await;
        assert!(matches!(result, Err(GraphError::MissingCheckpointer)));
    }

    #[tokio::test]
    async fn test_unknown_checkpoint_id() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let config = RunConfig::thread("t").with_checkpoint_id("missing");
        let result = PregelLoop::new(counter_graph(saver), config, None).await;
        assert!(matches!(
            result,
            Err(GraphError::Checkpoint(CheckpointError::NotFound(_)))
        ));
    }
}
