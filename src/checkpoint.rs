//! Durable read position recorded per partition.

// self
use crate::{_prelude::*, lease::key::LeaseKey};

/// A durable marker of how far a consumer group has read a partition.
///
/// Checkpoints are written through [`CheckpointStore::update`](crate::store::CheckpointStore::update),
/// which fences the write against the caller's [`FencingToken`](crate::lease::token::FencingToken)
/// the same way lease mutations are fenced: a checkpoint from a host that no longer holds the
/// lease must be rejected, never silently applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
	/// Partition this checkpoint applies to.
	pub key: LeaseKey,
	/// Backend-defined offset (opaque, monotonically increasing within a partition).
	pub offset: String,
	/// Sequence number assigned by the event hub, used to order checkpoints cheaply.
	pub sequence_number: i64,
}
impl Checkpoint {
	/// Builds a checkpoint for `key` at the given offset and sequence number.
	pub fn new(key: LeaseKey, offset: impl Into<String>, sequence_number: i64) -> Self {
		Self { key, offset: offset.into(), sequence_number }
	}

	/// Returns `true` if `self` represents progress beyond `other` for the same partition.
	pub fn supersedes(&self, other: &Checkpoint) -> bool {
		self.sequence_number > other.sequence_number
	}
}
