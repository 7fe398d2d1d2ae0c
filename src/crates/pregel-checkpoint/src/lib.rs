//! # pregel-checkpoint - Channels and State Persistence for Superstep Execution
//!
//! This crate holds the pieces of the Pregel engine that deal with *state*:
//! the versioned channels nodes communicate through, the checkpoint that
//! snapshots them at every superstep boundary, and the storage trait the
//! superstep loop persists checkpoints through.
//!
//! ## Channels
//!
//! A channel is a typed cell with a merge rule. The set of variants is closed
//! ([`Channel`]) so that checkpoint blobs always decode to a known kind:
//!
//! | Kind | Rule |
//! |------|------|
//! | [`LastValueChannel`] | one write per step, or last-write-wins when built `overwriting` |
//! | [`TopicChannel`] | collects all writes; `unique` and `accumulate` flags |
//! | [`BinaryOperatorChannel`] | folds writes through a [`Reducer`] |
//! | [`EphemeralValueChannel`] | value lives for exactly one step |
//! | [`NamedBarrierValueChannel`] | available once every named producer wrote |
//! | [`NamedBarrierValueAfterFinishChannel`] | as above, and only after `finish()` |
//!
//! Every channel implements [`BaseChannel`]:
//! `update`, `get`, `checkpoint`, `from_checkpoint`, `is_available`,
//! `consume`, `finish`.
//!
//! ## Checkpoints
//!
//! A [`Checkpoint`] stores channel blobs, `channel_versions` and
//! `versions_seen` (per node, the last version of each channel it consumed).
//! Task writes of the step following a checkpoint are kept next to it as
//! [`PendingWrite`]s and come back in [`CheckpointTuple::pending_writes`].
//!
//! ## Storage
//!
//! [`CheckpointSaver`] is the persistence interface;
//! [`InMemoryCheckpointSaver`] is the reference backend.
//!
//! ```rust
//! use pregel_checkpoint::{BaseChannel, Channel};
//! use serde_json::json;
//!
//! let mut join = Channel::named_barrier(["left", "right"]);
//! join.update(vec![json!("left")]).unwrap();
//! assert!(!join.is_available());
//! join.update(vec![json!("right")]).unwrap();
//! assert!(join.is_available());
//!
//! let restored = join.from_checkpoint(join.checkpoint()).unwrap();
//! assert!(restored.is_available());
//! ```

pub mod channel;
pub mod channels;
pub mod channels_extended;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use channel::{Channel, ChannelKind};
pub use channels::{BaseChannel, BinaryOperatorChannel, LastValueChannel, Reducer, TopicChannel};
pub use channels_extended::{
    EphemeralValueChannel, NamedBarrierValueAfterFinishChannel, NamedBarrierValueChannel,
};
pub use checkpoint::{
    derive_id, id_namespace, ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig,
    CheckpointId, CheckpointMetadata, CheckpointSource, CheckpointTuple, PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
