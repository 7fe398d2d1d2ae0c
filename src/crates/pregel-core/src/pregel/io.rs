//! I/O operations for Pregel execution.
//!
//! Functions for mapping inputs/outputs to channel writes/reads.

use crate::constants::is_control_channel;
use crate::error::{GraphError, Result};
use crate::graph::{ChannelSelection, Channels, NodeInput, NodeSpec, WriteTarget};
use pregel_checkpoint::BaseChannel;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Assemble a node's input from channel snapshots
pub fn read_input(input: &NodeInput, channels: &Channels) -> Result<Value> {
    let read = |channel: &str| -> Result<Value> {
        channels
            .get(channel)
            .ok_or_else(|| GraphError::EmptyChannel(channel.to_string()))?
            .get()
            .map_err(|e| GraphError::from_channel(channel, e))
    };
    match input {
        NodeInput::Channel(channel) => read(channel),
        NodeInput::Named(names) => {
            let mut object = Map::new();
            for name in names {
                if let Some(value) = channels.get(name).and_then(|c| c.get().ok()) {
                    object.insert(name.clone(), value);
                }
            }
            Ok(Value::Object(object))
        }
        NodeInput::Positional(names) => names
            .iter()
            .map(|name| read(name))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
    }
}

/// Writes that feed the run input into the graph's input channels
pub fn map_input(selection: &ChannelSelection, input: Value) -> Result<Vec<(String, Value)>> {
    match selection {
        ChannelSelection::Single(channel) => Ok(vec![(channel.clone(), input)]),
        ChannelSelection::Many(names) => {
            let Value::Object(mut object) = input else {
                return Err(GraphError::InvalidInput(
                    "input must be an object keyed by input channel".to_string(),
                ));
            };
            let writes: Vec<(String, Value)> = names
                .iter()
                .filter_map(|name| object.remove(name).map(|value| (name.clone(), value)))
                .collect();
            if writes.is_empty() {
                return Err(GraphError::InvalidInput(format!(
                    "input has none of the input channels {:?}",
                    names
                )));
            }
            Ok(writes)
        }
    }
}

/// Graph output read from the live channels
pub fn read_output(selection: &ChannelSelection, channels: &Channels) -> Value {
    match selection {
        ChannelSelection::Single(name) => channels
            .get(name)
            .and_then(|c| c.get().ok())
            .unwrap_or(Value::Null),
        ChannelSelection::Many(names) => Value::Object(
            names
                .iter()
                .filter_map(|name| {
                    channels
                        .get(name)
                        .and_then(|c| c.get().ok())
                        .map(|value| (name.clone(), value))
                })
                .collect(),
        ),
    }
}

/// Writes a node produces for `output` according to its write targets
pub fn node_writes(spec: &NodeSpec, output: &Value) -> Vec<(String, Value)> {
    spec.writes
        .iter()
        .filter_map(|target| match target {
            WriteTarget::Fixed { channel, value } => Some((channel.clone(), value.clone())),
            WriteTarget::Field { channel, field } => output
                .get(field)
                .filter(|value| !value.is_null())
                .map(|value| (channel.clone(), value.clone())),
            WriteTarget::Channel { channel } => {
                (!output.is_null()).then(|| (channel.clone(), output.clone()))
            }
        })
        .collect()
}

/// Group writes into an `{channel: value}` object; repeated channels collect into arrays
pub fn writes_to_update(writes: &[(String, Value)]) -> Value {
    let mut grouped: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for (channel, value) in writes {
        if !is_control_channel(channel) {
            grouped.entry(channel).or_default().push(value);
        }
    }
    Value::Object(
        grouped
            .into_iter()
            .map(|(channel, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0).clone()
                } else {
                    Value::Array(values.into_iter().cloned().collect())
                };
                (channel.to_string(), value)
            })
            .collect(),
    )
}
