//! Core Pregel algorithm functions.
//!
//! This module implements the heart of the Pregel execution model:
//! - Task preparation based on channel versions
//! - Write application with deterministic ordering
//! - Version increment logic
//!
//! Everything here is synchronous and free of I/O; the loop calls these
//! functions between the barrier and the checkpoint put.

use crate::config::InterruptNodes;
use crate::constants::{is_control_channel, INTERRUPT, NO_WRITES, PULL, RESUME};
use crate::error::{GraphError, Result};
use crate::graph::{Channels, NodeSpec, PregelGraph};
use crate::pregel::io::read_input;
use crate::pregel::types::{Interrupt, PregelExecutableTask, WritesProtocol};
use crate::runtime::interrupt_id;
use pregel_checkpoint::{
    derive_id, BaseChannel, ChannelVersion, Checkpoint, CheckpointSource, PendingWrite,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Deterministic id of a task
///
/// Derived from the checkpoint the task was prepared from, the namespace, the
/// step, the node name and the versions of its triggers. Preparing tasks from
/// the same checkpoint twice yields the same ids, which is what lets stored
/// writes and resume values find their task again.
pub fn task_id(
    checkpoint_id: &str,
    namespace: &str,
    step: i32,
    node: &str,
    trigger_versions: &BTreeMap<&str, &ChannelVersion>,
) -> String {
    let triggers: Vec<Value> = trigger_versions
        .iter()
        .map(|(channel, version)| json!([channel, version]))
        .collect();
    let name = json!([namespace, step, node, PULL, triggers]).to_string();
    derive_id(checkpoint_id, &name)
}

/// Whether `node` has a trigger channel it has not seen yet
fn is_triggered(node: &NodeSpec, checkpoint: &Checkpoint, channels: &Channels) -> bool {
    let null_version = ChannelVersion::default();
    let seen = checkpoint.versions_seen.get(&node.name);
    node.triggers.iter().any(|trigger| {
        let available = channels.get(trigger).is_some_and(|c| c.is_available());
        let newer = match checkpoint.channel_versions.get(trigger) {
            Some(version) => {
                let seen_version = seen
                    .and_then(|s| s.get(trigger))
                    .unwrap_or(&null_version);
                version > seen_version
            }
            None => false,
        };
        available && newer
    })
}

/// Determine the tasks of the next superstep
///
/// Every node with an available trigger channel whose version is newer than
/// the version the node last saw gets exactly one task, however many of its
/// triggers changed. Tasks come back in node declaration order.
///
/// `updated_channels` is what the running loop's previous write application
/// changed; when given, only nodes subscribed to those channels are
/// considered. A checkpoint read back from a store carries no such set, so
/// callers working from one pass `None` and every node is checked.
pub fn prepare_next_tasks(
    checkpoint: &Checkpoint,
    channels: &Channels,
    graph: &PregelGraph,
    step: i32,
    namespace: &str,
    updated_channels: Option<&[String]>,
) -> Result<Vec<PregelExecutableTask>> {
    let candidates: Option<BTreeSet<&str>> = updated_channels.map(|updated| {
        updated
            .iter()
            .filter_map(|channel| graph.trigger_to_nodes.get(channel))
            .flatten()
            .map(String::as_str)
            .collect()
    });

    let mut tasks = Vec::new();
    for spec in &graph.nodes {
        if let Some(candidates) = &candidates {
            if !candidates.contains(spec.name.as_str()) {
                continue;
            }
        }
        if !is_triggered(spec, checkpoint, channels) {
            continue;
        }

        let versions: BTreeMap<&str, &ChannelVersion> = spec
            .triggers
            .iter()
            .filter_map(|t| checkpoint.channel_versions.get(t).map(|v| (t.as_str(), v)))
            .collect();
        let id = task_id(&checkpoint.id, namespace, step, &spec.name, &versions);
        let input = read_input(&spec.effective_input(), channels)?;

        tasks.push(PregelExecutableTask {
            id,
            name: spec.name.clone(),
            input,
            triggers: spec.triggers.clone(),
            trigger_versions: versions
                .into_iter()
                .map(|(channel, version)| (channel.to_string(), version.clone()))
                .collect(),
            spec: spec.clone(),
            resume: Vec::new(),
            writes: Vec::new(),
            done: false,
        });
    }
    Ok(tasks)
}

/// Apply writes from completed tasks to channels and update versions.
///
/// ```text
///   tasks ──► sort by name ──► record versions_seen ──► consume triggers
///                                                            │
///   updated ◄── finish() if nothing ◄── update([]) on ◄── group writes,
///   channels     triggers a node         idle channels      update(), bump
/// ```
///
/// 1. Tasks are sorted by node name so the result does not depend on
///    completion order.
/// 2. For every task, `versions_seen[node][trigger]` advances to the version
///    the task was prepared with. It never moves backwards.
/// 3. Triggers are consumed (barriers reset once a subscriber ran).
/// 4. Writes are grouped per channel and applied with one `update` call per
///    channel. Control channels and unknown channels are skipped.
/// 5. When the batch came from real tasks (not input or a manual update),
///    channels that got no writes see an empty update, which is what clears
///    ephemeral values between steps.
/// 6. When none of the updated channels triggers a node, every channel is
///    told the run is finishing; after-finish barriers may become available.
///
/// Every channel that changed gets the same new version: one past the highest
/// version currently in the checkpoint. Returns the channels that changed and
/// are available, sorted.
///
/// # Errors
///
/// `InvalidUpdate` when a group of writes violates its channel's update rule.
pub fn apply_writes<T: WritesProtocol>(
    checkpoint: &mut Checkpoint,
    channels: &mut Channels,
    tasks: &[&T],
    trigger_to_nodes: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut tasks: Vec<&T> = tasks.to_vec();
    tasks.sort_by(|a, b| a.name().cmp(b.name()));
    let bump_step = tasks.iter().any(|task| !task.triggers().is_empty());

    for task in &tasks {
        let seen = checkpoint
            .versions_seen
            .entry(task.name().to_string())
            .or_default();
        for trigger in task.triggers() {
            let version = task
                .trigger_versions()
                .and_then(|versions| versions.get(trigger))
                .or_else(|| checkpoint.channel_versions.get(trigger));
            if let Some(version) = version {
                let advance = seen.get(trigger).map_or(true, |current| version > current);
                if advance {
                    seen.insert(trigger.clone(), version.clone());
                }
            }
        }
    }

    let next_version = checkpoint
        .channel_versions
        .values()
        .max()
        .map(ChannelVersion::next)
        .unwrap_or(ChannelVersion::Int(1));

    let consumed: BTreeSet<&str> = tasks
        .iter()
        .flat_map(|task| task.triggers().iter().map(String::as_str))
        .collect();
    for channel_name in consumed {
        if let Some(channel) = channels.get_mut(channel_name) {
            if channel.consume() {
                checkpoint
                    .channel_versions
                    .insert(channel_name.to_string(), next_version.clone());
            }
        }
    }

    let mut grouped: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for task in &tasks {
        for (channel, value) in task.writes() {
            if is_control_channel(channel) {
                continue;
            }
            if !channels.contains_key(channel) {
                tracing::warn!(node = task.name(), channel = %channel, "Skipping write to unknown channel");
                continue;
            }
            grouped.entry(channel.as_str()).or_default().push(value.clone());
        }
    }

    let mut updated: BTreeSet<String> = BTreeSet::new();
    for (channel_name, values) in &grouped {
        if let Some(channel) = channels.get_mut(*channel_name) {
            let changed = channel
                .update(values.clone())
                .map_err(|e| GraphError::from_channel(channel_name, e))?;
            if changed {
                checkpoint
                    .channel_versions
                    .insert(channel_name.to_string(), next_version.clone());
                if channel.is_available() {
                    updated.insert(channel_name.to_string());
                }
            }
        }
    }

    if bump_step {
        for (name, channel) in channels.iter_mut() {
            if grouped.contains_key(name.as_str()) || !channel.is_available() {
                continue;
            }
            let changed = channel
                .update(Vec::new())
                .map_err(|e| GraphError::from_channel(name, e))?;
            if changed {
                checkpoint
                    .channel_versions
                    .insert(name.clone(), next_version.clone());
                if channel.is_available() {
                    updated.insert(name.clone());
                }
            }
        }
    }

    if bump_step && !updated.iter().any(|c| trigger_to_nodes.contains_key(c)) {
        for (name, channel) in channels.iter_mut() {
            if channel.finish() {
                checkpoint
                    .channel_versions
                    .insert(name.clone(), next_version.clone());
                if channel.is_available() {
                    updated.insert(name.clone());
                }
            }
        }
    }

    Ok(updated.into_iter().collect())
}

/// Whether a static interrupt should fire for `tasks`
///
/// Fires only when some channel changed since the last time the run was
/// resumed, so continuing past a static interrupt does not stop again at the
/// same place.
pub fn should_interrupt(
    checkpoint: &Checkpoint,
    interrupt_nodes: &InterruptNodes,
    task_names: &[&str],
) -> bool {
    if interrupt_nodes.is_empty() {
        return false;
    }
    let null_version = ChannelVersion::default();
    let seen = checkpoint.versions_seen.get(INTERRUPT);
    let any_updates = checkpoint.channel_versions.iter().any(|(channel, version)| {
        version > seen.and_then(|s| s.get(channel)).unwrap_or(&null_version)
    });
    any_updates && task_names.iter().any(|name| interrupt_nodes.matches(name))
}

/// Mark the current channel versions as seen by the interrupt bookkeeping
pub fn mark_interrupt_seen(checkpoint: &mut Checkpoint) {
    let versions = checkpoint.channel_versions.clone();
    checkpoint
        .versions_seen
        .insert(INTERRUPT.to_string(), versions);
}

/// Rebuild live channels from a checkpoint
pub fn restore_channels(graph: &PregelGraph, checkpoint: &Checkpoint) -> Result<Channels> {
    graph
        .channels
        .iter()
        .map(|(name, prototype)| {
            let blob = checkpoint.channel_values.get(name).cloned();
            prototype
                .from_checkpoint(blob)
                .map(|channel| (name.clone(), channel))
                .map_err(|e| GraphError::from_channel(name, e))
        })
        .collect()
}

/// Successor of `current` holding the state of `channels`
pub fn create_checkpoint(
    current: &Checkpoint,
    channels: &Channels,
    step: i32,
    source: CheckpointSource,
) -> Checkpoint {
    let mut next = current.successor(step, source);
    next.channel_values = channels
        .iter()
        .filter_map(|(name, channel)| channel.checkpoint().map(|blob| (name.clone(), blob)))
        .collect();
    next
}

/// Attach stored pending writes to freshly prepared tasks
///
/// A task whose successful writes are already stored is marked done and
/// reuses them. Interrupted or failed tasks are executed again, with their
/// stored resume list.
pub fn match_pending_writes(tasks: &mut [PregelExecutableTask], pending: &[PendingWrite]) {
    for task in tasks.iter_mut() {
        let own: Vec<&PendingWrite> = pending.iter().filter(|w| w.task_id == task.id).collect();
        if own.is_empty() {
            continue;
        }
        if let Some(resume) = own.iter().find(|w| w.channel == RESUME) {
            task.resume = match &resume.value {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
        }
        let failed = own.iter().any(|w| w.is_control() && w.channel != RESUME);
        let regular: Vec<(String, Value)> = own
            .iter()
            .filter(|w| !w.is_control())
            .map(|w| (w.channel.clone(), w.value.clone()))
            .collect();
        if !failed && !regular.is_empty() {
            task.writes = regular.into_iter().filter(|(c, _)| c != NO_WRITES).collect();
            task.done = true;
        }
    }
}

/// Stored writes of `previous` tasks, re-addressed to the matching `next` tasks
///
/// Used when a checkpoint is replaced by a manual update: a task of the new
/// checkpoint takes over the pending writes of the task with the same node
/// name and the same trigger versions. Interrupt ids are re-derived from the
/// new task id so resuming by interrupt id keeps working. Tasks whose trigger
/// versions changed get nothing and run afresh.
pub fn carry_pending_writes(
    previous: &[PregelExecutableTask],
    next: &[PregelExecutableTask],
    pending: &[PendingWrite],
) -> Result<Vec<(String, Vec<(String, Value)>)>> {
    let mut carried = Vec::new();
    for task in next {
        let Some(old) = previous
            .iter()
            .find(|old| old.name == task.name && old.trigger_versions == task.trigger_versions)
        else {
            continue;
        };
        let mut writes = Vec::new();
        for write in pending.iter().filter(|w| w.task_id == old.id) {
            let value = if write.channel == INTERRUPT {
                let interrupts: Vec<Interrupt> = serde_json::from_value(write.value.clone())?;
                let renamed: Vec<Interrupt> = interrupts
                    .into_iter()
                    .enumerate()
                    .map(|(offset, interrupt)| {
                        let id = interrupt_id(&task.id, old.resume.len() + offset);
                        Interrupt::new(id, interrupt.value)
                    })
                    .collect();
                serde_json::to_value(renamed)?
            } else {
                write.value.clone()
            };
            writes.push((write.channel.clone(), value));
        }
        if !writes.is_empty() {
            carried.push((task.id.clone(), writes));
        }
    }
    Ok(carried)
}

/// Interrupts stored for `task_id`
pub fn pending_interrupts(pending: &[PendingWrite], task_id: &str) -> Vec<Interrupt> {
    pending
        .iter()
        .filter(|w| w.task_id == task_id && w.channel == INTERRUPT)
        .flat_map(|w| serde_json::from_value::<Vec<Interrupt>>(w.value.clone()).unwrap_or_default())
        .collect()
}
