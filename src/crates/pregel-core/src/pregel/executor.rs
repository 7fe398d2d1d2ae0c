//! Task executor for Pregel tasks.

use crate::cache::{cache_key, NodeCache};
use crate::constants::{is_reserved, END};
use crate::error::{GraphError, Result};
use crate::graph::{NodeSpec, PregelGraph};
use crate::pregel::io::node_writes;
use crate::pregel::types::{Interrupt, PregelExecutableTask};
use crate::retry::RetryState;
use crate::runtime::Runtime;
use futures::FutureExt;
use pregel_checkpoint::BaseChannel;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// How one task ended
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Success(Vec<(String, Value)>),
    /// Suspended; carries the writes sent before the interrupt
    Interrupted {
        writes: Vec<(String, Value)>,
        interrupts: Vec<Interrupt>,
    },
    Failed(GraphError),
}

/// Everything needed to run a task away from the loop
pub(crate) struct TaskJob {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub input: Value,
    pub step: i32,
    pub resume: Vec<Value>,
    pub spec: Arc<NodeSpec>,
    pub graph: Arc<PregelGraph>,
}

impl TaskJob {
    pub(crate) fn new(index: usize, task: &PregelExecutableTask, step: i32, graph: Arc<PregelGraph>) -> Self {
        Self {
            index,
            id: task.id.clone(),
            name: task.name.clone(),
            input: task.input.clone(),
            step,
            resume: task.resume.clone(),
            spec: task.spec.clone(),
            graph,
        }
    }
}

/// Executor for Pregel tasks with retry logic.
pub(crate) struct TaskExecutor;

impl TaskExecutor {
    /// Run a task to completion, interrupt or final failure
    ///
    /// A cached result short-circuits execution. Failures are retried in place
    /// per the node's retry policy; interrupts and invalid writes never are.
    pub(crate) async fn run(job: TaskJob) -> (usize, TaskOutcome) {
        let index = job.index;
        let cache = job.spec.cache_policy.as_ref().and(job.graph.cache.as_ref());
        let key = cache.map(|_| cache_key(&job.name, &job.input));

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(writes) = cache.get(key).await {
                tracing::debug!(task = %job.name, "Cache hit; reusing writes");
                return (index, TaskOutcome::Success(writes));
            }
        }

        let outcome = Self::execute_with_retry(&job).await;
        if let (TaskOutcome::Success(writes), Some(cache), Some(key)) = (&outcome, cache, key) {
            Self::store(cache, &job, key, writes.clone()).await;
        }
        (index, outcome)
    }

    async fn store(cache: &NodeCache, job: &TaskJob, key: String, writes: Vec<(String, Value)>) {
        let ttl = job.spec.cache_policy.as_ref().and_then(|p| p.ttl_duration());
        cache.put_with_ttl(key, writes, ttl).await;
    }

    async fn execute_with_retry(job: &TaskJob) -> TaskOutcome {
        let policy = job.spec.retry_policy.as_ref();
        let mut state = RetryState::new();

        loop {
            tracing::debug!(
                task = %job.name,
                task_id = %job.id,
                attempt = state.attempts + 1,
                "Executing task"
            );

            let runtime = Runtime::new(&job.id, &job.name, job.step, job.resume.clone());
            let result = AssertUnwindSafe(job.spec.executor.execute(job.input.clone(), runtime.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(GraphError::node_execution(&job.name, panic_message(panic))));

            match result {
                Ok(output) => {
                    let mut writes = runtime.take_writes();
                    writes.extend(node_writes(&job.spec, &output));
                    return match validate_writes(&job.graph, &writes) {
                        Ok(()) => {
                            if state.attempts > 0 {
                                tracing::info!(task = %job.name, attempts = state.attempts + 1, "Task succeeded after retry");
                            }
                            TaskOutcome::Success(writes)
                        }
                        Err(error) => TaskOutcome::Failed(error),
                    };
                }
                Err(GraphError::Interrupted(interrupts)) => {
                    let writes = runtime.take_writes();
                    if let Err(error) = validate_writes(&job.graph, &writes) {
                        return TaskOutcome::Failed(error);
                    }
                    tracing::debug!(task = %job.name, count = interrupts.len(), "Task interrupted");
                    return TaskOutcome::Interrupted { writes, interrupts };
                }
                Err(error) => {
                    state.record_attempt(Some(error.to_string()));
                    let retry = policy
                        .filter(|p| p.is_retryable(&error) && p.should_retry(state.attempts));
                    match retry {
                        Some(policy) => {
                            let delay = policy.calculate_delay(state.attempts - 1);
                            tracing::warn!(
                                task = %job.name,
                                attempt = state.attempts,
                                max_attempts = policy.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Task failed, retrying after delay"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(task = %job.name, attempts = state.attempts, error = %error, "Task failed");
                            return TaskOutcome::Failed(error);
                        }
                    }
                }
            }
        }
    }
}

/// Reject writes a channel would refuse, before they reach shared state
///
/// Each channel's writes from this task are tried against an empty copy of
/// the channel, so a task that writes a `LastValue` twice or names an unknown
/// barrier producer fails on its own instead of failing the step.
pub(crate) fn validate_writes(graph: &PregelGraph, writes: &[(String, Value)]) -> Result<()> {
    let mut grouped: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for (channel, value) in writes {
        if is_reserved(channel) && channel != END {
            return Err(GraphError::invalid_update(channel, "reserved channel"));
        }
        if !graph.channels.contains_key(channel) {
            return Err(GraphError::invalid_update(channel, "unknown channel"));
        }
        grouped.entry(channel).or_default().push(value.clone());
    }
    for (channel, values) in grouped {
        if let Some(prototype) = graph.channels.get(channel) {
            let mut scratch = prototype.empty().map_err(|e| GraphError::from_channel(channel, e))?;
            scratch
                .update(values)
                .map_err(|e| GraphError::from_channel(channel, e))?;
        }
    }
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => format!("panicked: {}", message),
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => format!("panicked: {}", message),
            Err(_) => "panicked".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CachePolicy, Cache};
    use crate::constants::START;
    use crate::graph::GraphBuilder;
    use crate::retry::RetryPolicy;
    use pregel_checkpoint::Channel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(graph: PregelGraph, node: &str, input: Value) -> TaskJob {
        let graph = Arc::new(graph);
        let spec = graph.node(node).cloned().unwrap();
        TaskJob {
            index: 0,
            id: "task".to_string(),
            name: node.to_string(),
            input,
            step: 0,
            resume: Vec::new(),
            spec,
            graph,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut builder = GraphBuilder::new();
        builder.add_channel("out", Channel::last_value()).add_node(
            NodeSpec::new("flaky", move |_input: Value, _rt: Runtime| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(GraphError::node_execution("flaky", "transient"))
                    } else {
                        Ok(serde_json::json!("ok"))
                    }
                }
            })
            .triggered_by([START])
            .writes_to("out")
            .with_retry(RetryPolicy::new(3).with_initial_interval(0.001).with_jitter(false)),
        );

        let (_, outcome) = TaskExecutor::run(job(builder.build().unwrap(), "flaky", Value::Null)).await;
        assert!(matches!(outcome, TaskOutcome::Success(ref w) if w[0].1 == "ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let mut builder = GraphBuilder::new();
        builder.add_node(
            NodeSpec::new("boom", |_input: Value, _rt: Runtime| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            })
            .triggered_by([START]),
        );
        let (_, outcome) = TaskExecutor::run(job(builder.build().unwrap(), "boom", Value::Null)).await;
        let TaskOutcome::Failed(GraphError::NodeExecution { error, .. }) = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_double_write_to_last_value_fails_task() {
        let mut builder = GraphBuilder::new();
        builder.add_channel("out", Channel::last_value()).add_node(
            NodeSpec::new("twice", |_input: Value, rt: Runtime| async move {
                rt.send("out", serde_json::json!(1));
                Ok(serde_json::json!(2))
            })
            .triggered_by([START])
            .writes_to("out"),
        );
        let (_, outcome) = TaskExecutor::run(job(builder.build().unwrap(), "twice", Value::Null)).await;
        assert!(matches!(outcome, TaskOutcome::Failed(GraphError::InvalidUpdate(_))));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: NodeCache = Cache::new(CacheConfig::default());
        let mut builder = GraphBuilder::new();
        builder
            .add_channel("out", Channel::last_value())
            .with_cache(cache.clone())
            .add_node(
                NodeSpec::new("cached", move |input: Value, _rt: Runtime| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(input) }
                })
                .triggered_by([START])
                .writes_to("out")
                .with_cache(CachePolicy::new()),
            );
        let graph = Arc::new(builder.build().unwrap());
        let spec = graph.node("cached").cloned().unwrap();
        for _ in 0..2 {
            let job = TaskJob {
                index: 0,
                id: "task".to_string(),
                name: "cached".to_string(),
                input: serde_json::json!(7),
                step: 0,
                resume: Vec::new(),
                spec: spec.clone(),
                graph: graph.clone(),
            };
            let (_, outcome) = TaskExecutor::run(job).await;
            assert!(matches!(outcome, TaskOutcome::Success(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().await.hits, 1);
    }
}
