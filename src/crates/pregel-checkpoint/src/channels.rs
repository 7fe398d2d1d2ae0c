//! Channel abstractions for superstep state
//!
//! A channel is a named, versioned cell that nodes communicate through. Each
//! variant owns one merge rule, and that rule is the only place where writes
//! from concurrent tasks of the same superstep are reconciled:
//!
//! - [`LastValueChannel`] rejects more than one write per step unless it was
//!   built with [`LastValueChannel::overwriting`]
//! - [`TopicChannel`] collects every write, optionally deduplicated and
//!   optionally accumulated across steps
//! - [`BinaryOperatorChannel`] folds writes through a fixed [`Reducer`]
//!
//! Barrier and ephemeral variants live in [`crate::channels_extended`].
//! The closed set of variants is [`crate::Channel`].

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Capability set shared by every channel variant
///
/// `update` is a pure in-memory transition and never performs I/O.
pub trait BaseChannel: Send + Sync + Debug + Clone {
    /// Get the current value of the channel
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::EmptyChannel`] if nothing is available
    fn get(&self) -> Result<Value>;

    /// Apply every write produced for this channel in one step
    ///
    /// The order of `values` is arbitrary. Returns `true` if the channel changed.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidUpdate`] if the writes violate the
    /// channel's update rule
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    /// Serializable state of the channel, or `None` when there is nothing to persist
    fn checkpoint(&self) -> Option<Value>;

    /// Build a new channel with this channel's configuration and the given state
    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self>
    where
        Self: Sized;

    /// Whether `get` would succeed
    fn is_available(&self) -> bool {
        self.get().is_ok()
    }

    /// Notify the channel that a task subscribed to it ran
    ///
    /// Returns `true` if the channel changed.
    fn consume(&mut self) -> bool {
        false
    }

    /// Notify the channel that the run is about to finish
    ///
    /// Returns `true` if the channel changed.
    fn finish(&mut self) -> bool {
        false
    }
}

/// Stores the most recent single write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LastValueChannel {
    value: Option<Value>,
    allow_overwrite: bool,
}

impl LastValueChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A LastValue channel that keeps the last of several writes in one step
    /// instead of rejecting them
    pub fn overwriting() -> Self {
        Self {
            value: None,
            allow_overwrite: true,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn allows_overwrite(&self) -> bool {
        self.allow_overwrite
    }
}

impl BaseChannel for LastValueChannel {
    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel("LastValue".to_string()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.len() > 1 && !self.allow_overwrite {
            return Err(CheckpointError::InvalidUpdate(format!(
                "LastValue channel can receive only one value per step, got {}",
                values.len()
            )));
        }
        match values.into_iter().last() {
            Some(value) => {
                self.value = Some(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        Ok(Self {
            value: checkpoint,
            allow_overwrite: self.allow_overwrite,
        })
    }
}

/// Pub/sub multiset of values
///
/// Array writes are flattened into their elements. Without `accumulate` the
/// topic is emptied at the start of every step that touches it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopicChannel {
    values: Vec<Value>,
    unique: bool,
    accumulate: bool,
}

impl TopicChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop values that are already present
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Keep values across steps instead of resetting each step
    pub fn with_accumulate(mut self, accumulate: bool) -> Self {
        self.accumulate = accumulate;
        self
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_accumulating(&self) -> bool {
        self.accumulate
    }

    fn push(&mut self, value: Value) -> bool {
        if self.unique && self.values.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }
}

impl BaseChannel for TopicChannel {
    fn get(&self) -> Result<Value> {
        if self.values.is_empty() {
            return Err(CheckpointError::EmptyChannel("Topic".to_string()));
        }
        Ok(Value::Array(self.values.clone()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        let mut updated = false;
        if !self.accumulate {
            updated = !self.values.is_empty();
            self.values.clear();
        }
        for value in values {
            match value {
                Value::Array(items) => {
                    for item in items {
                        updated |= self.push(item);
                    }
                }
                other => updated |= self.push(other),
            }
        }
        Ok(updated)
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.values.is_empty() {
            None
        } else {
            Some(Value::Array(self.values.clone()))
        }
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        let values = match checkpoint {
            None => Vec::new(),
            Some(Value::Array(values)) => values,
            Some(other) => {
                return Err(CheckpointError::Invalid(format!(
                    "Topic checkpoint must be an array, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            values,
            unique: self.unique,
            accumulate: self.accumulate,
        })
    }
}

/// Fold operation used by [`BinaryOperatorChannel`]
///
/// Every reducer is commutative over a step's writes except `Append`, whose
/// element order follows the order writes are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Numeric sum
    Sum,
    /// Numeric maximum
    Max,
    /// Numeric minimum
    Min,
    /// Concatenate into an array
    Append,
    /// Shallow merge of JSON objects, later keys win
    Merge,
}

impl Reducer {
    /// Fold `update` into `current`
    pub fn apply(&self, current: Value, update: Value) -> Result<Value> {
        match self {
            Reducer::Sum => {
                if let (Some(a), Some(b)) = (current.as_i64(), update.as_i64()) {
                    if let Some(sum) = a.checked_add(b) {
                        return Ok(Value::from(sum));
                    }
                }
                let (a, b) = numeric_pair(&current, &update, "sum")?;
                Ok(Value::from(a + b))
            }
            Reducer::Max => {
                let (a, b) = numeric_pair(&current, &update, "max")?;
                Ok(if b > a { update } else { current })
            }
            Reducer::Min => {
                let (a, b) = numeric_pair(&current, &update, "min")?;
                Ok(if b < a { update } else { current })
            }
            Reducer::Append => {
                let mut items = match current {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                match update {
                    Value::Array(more) => items.extend(more),
                    other => items.push(other),
                }
                Ok(Value::Array(items))
            }
            Reducer::Merge => match (current, update) {
                (Value::Object(mut base), Value::Object(patch)) => {
                    base.extend(patch);
                    Ok(Value::Object(base))
                }
                (_, update) => Err(CheckpointError::InvalidUpdate(format!(
                    "merge reducer expects objects, got {}",
                    update
                ))),
            },
        }
    }
}

fn numeric_pair(current: &Value, update: &Value, op: &str) -> Result<(f64, f64)> {
    match (current.as_f64(), update.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(CheckpointError::InvalidUpdate(format!(
            "{} reducer expects numbers, got {} and {}",
            op, current, update
        ))),
    }
}

/// Accumulates every write through a [`Reducer`]
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOperatorChannel {
    value: Option<Value>,
    reducer: Reducer,
}

impl BinaryOperatorChannel {
    pub fn new(reducer: Reducer) -> Self {
        Self {
            value: None,
            reducer,
        }
    }

    /// Start folding from `initial` instead of from the first write
    pub fn with_initial(mut self, initial: Value) -> Self {
        self.value = Some(initial);
        self
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }
}

impl BaseChannel for BinaryOperatorChannel {
    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel("BinaryOperator".to_string()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        for value in values {
            let next = match self.value.take() {
                Some(current) => self.reducer.apply(current, value)?,
                None if self.reducer == Reducer::Append => {
                    self.reducer.apply(Value::Array(Vec::new()), value)?
                }
                None => value,
            };
            self.value = Some(next);
        }
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        Ok(Self {
            value: checkpoint,
            reducer: self.reducer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_value_single_write() {
        let mut channel = LastValueChannel::new();
        assert!(channel.get().is_err());
        assert!(!channel.is_available());

        assert!(channel.update(vec![json!(42)]).unwrap());
        assert_eq!(channel.get().unwrap(), json!(42));
        assert!(channel.is_available());
    }

    #[test]
    fn test_last_value_rejects_concurrent_writes() {
        let mut channel = LastValueChannel::new();
        let err = channel.update(vec![json!(1), json!(2)]).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidUpdate(_)));
        assert!(!channel.is_available());
    }

    #[test]
    fn test_last_value_overwriting() {
        let mut channel = LastValueChannel::overwriting();
        assert!(channel.update(vec![json!(1), json!(2)]).unwrap());
        assert_eq!(channel.get().unwrap(), json!(2));
    }

    #[test]
    fn test_last_value_empty_update_is_noop() {
        let mut channel = LastValueChannel::new().with_value(json!("kept"));
        assert!(!channel.update(vec![]).unwrap());
        assert_eq!(channel.get().unwrap(), json!("kept"));
    }

    #[test]
    fn test_topic_resets_each_step() {
        let mut channel = TopicChannel::new();
        assert!(channel.update(vec![json!(1), json!([2, 3])]).unwrap());
        assert_eq!(channel.get().unwrap(), json!([1, 2, 3]));

        // An empty update at the next step clears a non-accumulating topic
        assert!(channel.update(vec![]).unwrap());
        assert!(channel.get().is_err());
        assert!(!channel.update(vec![]).unwrap());
    }

    #[test]
    fn test_topic_accumulate_unique() {
        let mut channel = TopicChannel::new().with_accumulate(true).with_unique(true);
        channel.update(vec![json!("a"), json!("b")]).unwrap();
        assert!(!channel.update(vec![json!("a")]).unwrap());
        channel.update(vec![json!("c")]).unwrap();
        assert_eq!(channel.get().unwrap(), json!(["a", "b", "c"]));
    }

    #[test]
    fn test_topic_checkpoint_round_trip() {
        let mut channel = TopicChannel::new().with_accumulate(true);
        channel.update(vec![json!({"x": 1})]).unwrap();

        let restored = channel.from_checkpoint(channel.checkpoint()).unwrap();
        assert_eq!(restored, channel);
        assert!(channel.from_checkpoint(Some(json!("bad"))).is_err());
    }

    #[test]
    fn test_binary_operator_sum() {
        let mut channel = BinaryOperatorChannel::new(Reducer::Sum).with_initial(json!(0));
        channel.update(vec![json!(1), json!(2)]).unwrap();
        channel.update(vec![json!(3)]).unwrap();
        assert_eq!(channel.get().unwrap(), json!(6));

        channel.update(vec![json!(0.5)]).unwrap();
        assert_eq!(channel.get().unwrap(), json!(6.5));
    }

    #[test]
    fn test_binary_operator_append_and_merge() {
        let mut list = BinaryOperatorChannel::new(Reducer::Append);
        list.update(vec![json!("a"), json!(["b", "c"])]).unwrap();
        assert_eq!(list.get().unwrap(), json!(["a", "b", "c"]));

        let mut map = BinaryOperatorChannel::new(Reducer::Merge);
        map.update(vec![json!({"a": 1}), json!({"b": 2})]).unwrap();
        assert_eq!(map.get().unwrap(), json!({"a": 1, "b": 2}));
        assert!(map.update(vec![json!(3)]).is_err());
    }

    #[test]
    fn test_binary_operator_min_max() {
        let mut max = BinaryOperatorChannel::new(Reducer::Max);
        max.update(vec![json!(3), json!(9), json!(4)]).unwrap();
        assert_eq!(max.get().unwrap(), json!(9));

        let mut min = BinaryOperatorChannel::new(Reducer::Min);
        min.update(vec![json!(3), json!(9), json!(-4)]).unwrap();
        assert_eq!(min.get().unwrap(), json!(-4));
        assert!(min.update(vec![json!("x")]).is_err());
    }
}
