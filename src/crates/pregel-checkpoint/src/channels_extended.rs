//! Step-scoped and barrier channel types.
//!
//! - [`EphemeralValueChannel`] holds a value for exactly one superstep
//! - [`NamedBarrierValueChannel`] becomes available once every required
//!   producer has written in the current epoch
//! - [`NamedBarrierValueAfterFinishChannel`] additionally waits for the run's
//!   finish signal, for two-phase joins

use crate::channels::BaseChannel;
use crate::error::{CheckpointError, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// EphemeralValue channel - stores a value written in the previous step, then clears.
///
/// With `guard` enabled (the default) more than one write per step is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralValueChannel {
    value: Option<Value>,
    guard: bool,
}

impl EphemeralValueChannel {
    pub fn new() -> Self {
        Self {
            value: None,
            guard: true,
        }
    }

    /// Keep the last of several writes in one step instead of rejecting them
    pub fn unguarded() -> Self {
        Self {
            value: None,
            guard: false,
        }
    }

    pub fn is_guarded(&self) -> bool {
        self.guard
    }
}

impl Default for EphemeralValueChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseChannel for EphemeralValueChannel {
    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel("EphemeralValue".to_string()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(self.value.take().is_some());
        }
        if values.len() > 1 && self.guard {
            return Err(CheckpointError::InvalidUpdate(format!(
                "EphemeralValue channel can receive only one value per step, got {}",
                values.len()
            )));
        }
        self.value = values.into_iter().last();
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        Ok(Self {
            value: checkpoint,
            guard: self.guard,
        })
    }
}

fn names_from(value: &Value, context: &str) -> Result<BTreeSet<String>> {
    let items = value.as_array().ok_or_else(|| {
        CheckpointError::Invalid(format!("{} checkpoint must list producer names", context))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                CheckpointError::Invalid(format!("{} checkpoint holds a non-string name", context))
            })
        })
        .collect()
}

/// Records one producer write, rejecting names outside `names`
fn record(names: &BTreeSet<String>, seen: &mut BTreeSet<String>, values: Vec<Value>) -> Result<bool> {
    let mut updated = false;
    for value in values {
        let name = value.as_str().ok_or_else(|| {
            CheckpointError::InvalidUpdate(format!(
                "barrier writes must be producer names, got {}",
                value
            ))
        })?;
        if !names.contains(name) {
            return Err(CheckpointError::InvalidUpdate(format!(
                "'{}' is not one of the barrier's producers {:?}",
                name, names
            )));
        }
        updated |= seen.insert(name.to_string());
    }
    Ok(updated)
}

fn unknown_names(names: &BTreeSet<String>, seen: &BTreeSet<String>) -> Result<()> {
    match seen.difference(names).next() {
        Some(extra) => Err(CheckpointError::Invalid(format!(
            "barrier checkpoint names unknown producer '{}'",
            extra
        ))),
        None => Ok(()),
    }
}

/// Waits until every named producer has written
#[derive(Debug, Clone, PartialEq)]
pub struct NamedBarrierValueChannel {
    names: BTreeSet<String>,
    seen: BTreeSet<String>,
}

impl NamedBarrierValueChannel {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            seen: BTreeSet::new(),
        }
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Producers that have written in the current epoch
    pub fn seen(&self) -> &BTreeSet<String> {
        &self.seen
    }
}

impl BaseChannel for NamedBarrierValueChannel {
    fn get(&self) -> Result<Value> {
        if self.seen != self.names {
            return Err(CheckpointError::EmptyChannel(format!(
                "NamedBarrierValue waiting on {:?}",
                self.names.difference(&self.seen).collect::<Vec<_>>()
            )));
        }
        Ok(Value::Null)
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        record(&self.names, &mut self.seen, values)
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.seen.is_empty() {
            None
        } else {
            Some(json!(self.seen))
        }
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        let seen = match checkpoint {
            Some(value) => names_from(&value, "NamedBarrierValue")?,
            None => BTreeSet::new(),
        };
        unknown_names(&self.names, &seen)?;
        Ok(Self {
            names: self.names.clone(),
            seen,
        })
    }

    fn is_available(&self) -> bool {
        self.seen == self.names
    }

    fn consume(&mut self) -> bool {
        if self.seen == self.names {
            self.seen.clear();
            true
        } else {
            false
        }
    }
}

/// Named barrier that only opens after the run's finish signal
///
/// `finish` is idempotent: once the barrier is finished, further calls are no-ops
/// until `consume` resets the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedBarrierValueAfterFinishChannel {
    names: BTreeSet<String>,
    seen: BTreeSet<String>,
    finished: bool,
}

impl NamedBarrierValueAfterFinishChannel {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            seen: BTreeSet::new(),
            finished: false,
        }
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl BaseChannel for NamedBarrierValueAfterFinishChannel {
    fn get(&self) -> Result<Value> {
        if !self.finished || self.seen != self.names {
            return Err(CheckpointError::EmptyChannel(
                "NamedBarrierValueAfterFinish is not finished".to_string(),
            ));
        }
        Ok(Value::Null)
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        record(&self.names, &mut self.seen, values)
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.seen.is_empty() && !self.finished {
            None
        } else {
            Some(json!({ "seen": self.seen, "finished": self.finished }))
        }
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        let (seen, finished) = match checkpoint {
            Some(value) => {
                let seen = match value.get("seen") {
                    Some(seen) => names_from(seen, "NamedBarrierValueAfterFinish")?,
                    None => BTreeSet::new(),
                };
                let finished = value.get("finished").and_then(Value::as_bool).unwrap_or(false);
                (seen, finished)
            }
            None => (BTreeSet::new(), false),
        };
        unknown_names(&self.names, &seen)?;
        Ok(Self {
            names: self.names.clone(),
            seen,
            finished,
        })
    }

    fn is_available(&self) -> bool {
        self.finished && self.seen == self.names
    }

    fn consume(&mut self) -> bool {
        if self.finished && self.seen == self.names {
            self.finished = false;
            self.seen.clear();
            true
        } else {
            false
        }
    }

    fn finish(&mut self) -> bool {
        if !self.finished && self.seen == self.names {
            self.finished = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_clears_next_step() {
        let mut channel = EphemeralValueChannel::new();
        assert!(channel.update(vec![json!("once")]).unwrap());
        assert_eq!(channel.get().unwrap(), json!("once"));

        assert!(channel.update(vec![]).unwrap());
        assert!(!channel.is_available());
        assert!(!channel.update(vec![]).unwrap());
    }

    #[test]
    fn test_ephemeral_guard() {
        let mut guarded = EphemeralValueChannel::new();
        assert!(matches!(
            guarded.update(vec![json!(1), json!(2)]),
            Err(CheckpointError::InvalidUpdate(_))
        ));

        let mut unguarded = EphemeralValueChannel::unguarded();
        unguarded.update(vec![json!(1), json!(2)]).unwrap();
        assert_eq!(unguarded.get().unwrap(), json!(2));
    }

    #[test]
    fn test_barrier_waits_for_all_names() {
        let mut barrier = NamedBarrierValueChannel::new(["A", "B", "C"]);
        assert!(barrier.update(vec![json!("A")]).unwrap());
        assert!(!barrier.is_available());
        assert!(barrier.update(vec![json!("B")]).unwrap());
        assert!(barrier.get().is_err());

        // Duplicate writes don't change the barrier
        assert!(!barrier.update(vec![json!("A")]).unwrap());

        assert!(barrier.update(vec![json!("C")]).unwrap());
        assert!(barrier.is_available());
        assert_eq!(barrier.get().unwrap(), Value::Null);

        assert!(barrier.consume());
        assert!(!barrier.is_available());
        assert!(!barrier.consume());
    }

    #[test]
    fn test_barrier_rejects_unknown_producer() {
        let mut barrier = NamedBarrierValueChannel::new(["A", "B"]);
        let err = barrier.update(vec![json!("Z")]).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidUpdate(_)));
        assert!(barrier.update(vec![json!(7)]).is_err());
    }

    #[test]
    fn test_barrier_checkpoint_round_trip() {
        let mut barrier = NamedBarrierValueChannel::new(["A", "B"]);
        barrier.update(vec![json!("A")]).unwrap();

        let restored = barrier.from_checkpoint(barrier.checkpoint()).unwrap();
        assert_eq!(restored.seen(), barrier.seen());
        assert_eq!(restored.is_available(), barrier.is_available());

        assert!(barrier.from_checkpoint(Some(json!(["Q"]))).is_err());
    }

    #[test]
    fn test_after_finish_two_phase() {
        let mut barrier = NamedBarrierValueAfterFinishChannel::new(["A", "B"]);
        assert!(!barrier.finish());

        barrier.update(vec![json!("A"), json!("B")]).unwrap();
        assert!(!barrier.is_available());

        assert!(barrier.finish());
        assert!(barrier.is_available());
        // Repeated finish is a no-op
        assert!(!barrier.finish());
        assert!(barrier.is_available());

        let restored = barrier.from_checkpoint(barrier.checkpoint()).unwrap();
        assert_eq!(restored, barrier);

        assert!(barrier.consume());
        assert!(!barrier.is_available());
        assert!(!barrier.is_finished());
    }
}
