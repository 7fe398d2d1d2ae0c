//! The closed set of channel variants
//!
//! [`Channel`] is what graphs hold and what checkpoints persist. Its checkpoint
//! blob is tagged with the variant's [`ChannelKind`] so restoring a blob into a
//! channel of a different kind fails instead of silently reinterpreting state.

use crate::channels::{BaseChannel, BinaryOperatorChannel, LastValueChannel, Reducer, TopicChannel};
use crate::channels_extended::{
    EphemeralValueChannel, NamedBarrierValueAfterFinishChannel, NamedBarrierValueChannel,
};
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Discriminant of a [`Channel`], as stored in checkpoint blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    LastValue,
    Topic,
    BinaryOperator,
    Ephemeral,
    NamedBarrier,
    NamedBarrierAfterFinish,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::LastValue => "last_value",
            ChannelKind::Topic => "topic",
            ChannelKind::BinaryOperator => "binary_operator",
            ChannelKind::Ephemeral => "ephemeral",
            ChannelKind::NamedBarrier => "named_barrier",
            ChannelKind::NamedBarrierAfterFinish => "named_barrier_after_finish",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel of any supported kind
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    LastValue(LastValueChannel),
    Topic(TopicChannel),
    BinaryOperator(BinaryOperatorChannel),
    Ephemeral(EphemeralValueChannel),
    NamedBarrier(NamedBarrierValueChannel),
    NamedBarrierAfterFinish(NamedBarrierValueAfterFinishChannel),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Channel::LastValue($inner) => $body,
            Channel::Topic($inner) => $body,
            Channel::BinaryOperator($inner) => $body,
            Channel::Ephemeral($inner) => $body,
            Channel::NamedBarrier($inner) => $body,
            Channel::NamedBarrierAfterFinish($inner) => $body,
        }
    };
}

impl Channel {
    pub fn last_value() -> Self {
        Channel::LastValue(LastValueChannel::new())
    }

    pub fn topic() -> Self {
        Channel::Topic(TopicChannel::new())
    }

    pub fn accumulating_topic() -> Self {
        Channel::Topic(TopicChannel::new().with_accumulate(true))
    }

    pub fn binary_operator(reducer: Reducer) -> Self {
        Channel::BinaryOperator(BinaryOperatorChannel::new(reducer))
    }

    pub fn ephemeral() -> Self {
        Channel::Ephemeral(EphemeralValueChannel::new())
    }

    pub fn named_barrier<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Channel::NamedBarrier(NamedBarrierValueChannel::new(names))
    }

    pub fn named_barrier_after_finish<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Channel::NamedBarrierAfterFinish(NamedBarrierValueAfterFinishChannel::new(names))
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::LastValue(_) => ChannelKind::LastValue,
            Channel::Topic(_) => ChannelKind::Topic,
            Channel::BinaryOperator(_) => ChannelKind::BinaryOperator,
            Channel::Ephemeral(_) => ChannelKind::Ephemeral,
            Channel::NamedBarrier(_) => ChannelKind::NamedBarrier,
            Channel::NamedBarrierAfterFinish(_) => ChannelKind::NamedBarrierAfterFinish,
        }
    }

    /// A fresh, empty channel with the same configuration
    pub fn empty(&self) -> Result<Self> {
        dispatch!(self, c => c.from_checkpoint(None).map(Into::into))
    }
}

impl BaseChannel for Channel {
    fn get(&self) -> Result<Value> {
        dispatch!(self, c => c.get())
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        dispatch!(self, c => c.update(values))
    }

    /// Tagged blob: `{"kind": <kind>, "state": <variant state>}`
    fn checkpoint(&self) -> Option<Value> {
        let state = dispatch!(self, c => c.checkpoint())?;
        Some(json!({ "kind": self.kind(), "state": state }))
    }

    fn from_checkpoint(&self, checkpoint: Option<Value>) -> Result<Self> {
        let state = match checkpoint {
            None => None,
            Some(blob) => {
                let tag = blob.get("kind").cloned().ok_or_else(|| {
                    CheckpointError::Invalid("channel blob is missing its kind tag".to_string())
                })?;
                let kind: ChannelKind = serde_json::from_value(tag)?;
                if kind != self.kind() {
                    return Err(CheckpointError::Invalid(format!(
                        "checkpoint holds a {} channel where a {} channel is declared",
                        kind,
                        self.kind()
                    )));
                }
                blob.get("state").cloned()
            }
        };
        dispatch!(self, c => c.from_checkpoint(state).map(Into::into))
    }

    fn is_available(&self) -> bool {
        dispatch!(self, c => c.is_available())
    }

    fn consume(&mut self) -> bool {
        dispatch!(self, c => c.consume())
    }

    fn finish(&mut self) -> bool {
        dispatch!(self, c => c.finish())
    }
}

impl From<LastValueChannel> for Channel {
    fn from(channel: LastValueChannel) -> Self {
        Channel::LastValue(channel)
    }
}

impl From<TopicChannel> for Channel {
    fn from(channel: TopicChannel) -> Self {
        Channel::Topic(channel)
    }
}

impl From<BinaryOperatorChannel> for Channel {
    fn from(channel: BinaryOperatorChannel) -> Self {
        Channel::BinaryOperator(channel)
    }
}

impl From<EphemeralValueChannel> for Channel {
    fn from(channel: EphemeralValueChannel) -> Self {
        Channel::Ephemeral(channel)
    }
}

impl From<NamedBarrierValueChannel> for Channel {
    fn from(channel: NamedBarrierValueChannel) -> Self {
        Channel::NamedBarrier(channel)
    }
}

impl From<NamedBarrierValueAfterFinishChannel> for Channel {
    fn from(channel: NamedBarrierValueAfterFinishChannel) -> Self {
        Channel::NamedBarrierAfterFinish(channel)
    }
}
