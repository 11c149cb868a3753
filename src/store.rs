//! Storage contracts and built-in store implementations for leases and checkpoints.

pub mod file;
pub mod memory;

pub use file::FileLeaseStore;
pub use memory::InMemoryLeaseStore;

// self
use crate::{
	_prelude::*,
	checkpoint::Checkpoint,
	ids::{ConsumerGroupId, EventHubId, HostName},
	lease::{key::LeaseKey, record::Lease, token::FencingToken},
};

/// Future type returned by [`LeaseStore`] and [`CheckpointStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for partition leases.
///
/// Implementations must provide compare-and-set semantics on `acquire`/`renew`/`release`/`update`:
/// a caller whose fencing token no longer matches the stored token (lost to a steal, or never
/// held) must observe [`StoreError::Conflict`], never a silently applied write.
pub trait LeaseStore
where
	Self: Send + Sync,
{
	/// Creates the lease record for `key` if it does not already exist. Idempotent.
	fn ensure(&self, key: LeaseKey) -> StoreFuture<'_, ()>;

	/// Fetches the current record for `key`, if the store has seen it before.
	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Lease>>;

	/// Fetches every lease record tracked for the given event hub + consumer group.
	fn get_all<'a>(
		&'a self,
		event_hub: &'a EventHubId,
		consumer_group: &'a ConsumerGroupId,
	) -> StoreFuture<'a, Vec<Lease>>;

	/// Attempts to acquire `key` for `owner`. Succeeds if the lease is unowned or expired;
	/// otherwise fails with [`StoreError::Conflict`]. On success bumps the epoch and mints a
	/// fresh fencing token.
	fn acquire<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		ttl: Duration,
	) -> StoreFuture<'a, Lease>;

	/// Extends the TTL of a lease currently held by `owner` under `token`. Fails with
	/// [`StoreError::Conflict`] if `token` no longer matches the stored token.
	fn renew<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
		ttl: Duration,
	) -> StoreFuture<'a, Lease>;

	/// Releases a lease currently held by `owner` under `token`, clearing ownership without
	/// advancing the epoch. Fails with [`StoreError::Conflict`] if `token` is stale.
	fn release<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
	) -> StoreFuture<'a, ()>;

	/// Replaces the stored record for `key` wholesale, fenced on `token` matching the current
	/// owner's token. Used for out-of-band corrections; ordinary lifecycle transitions should
	/// prefer `acquire`/`renew`/`release`.
	fn update<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
		replacement: Lease,
	) -> StoreFuture<'a, Lease>;
}

/// Persistence contract for partition read checkpoints.
pub trait CheckpointStore
where
	Self: Send + Sync,
{
	/// Fetches the last checkpoint recorded for `key`, if any.
	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Checkpoint>>;

	/// Records `checkpoint`, fenced against `owner` currently holding `key` under `token`.
	/// Fails with [`StoreError::Conflict`] if the caller no longer owns the lease.
	fn update<'a>(
		&'a self,
		owner: &'a HostName,
		token: &'a FencingToken,
		checkpoint: Checkpoint,
	) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`LeaseStore`] and [`CheckpointStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Recoverable backend failure (I/O hiccup, serialization error, injected fault).
	#[error("Store operation failed transiently: {message}.")]
	Transient {
		/// Human-readable error payload.
		message: String,
	},
	/// A compare-and-set write lost a race: the caller's token, or the lease's current
	/// ownership/expiry state, no longer matched what the write expected.
	#[error("Store write conflicted with a concurrent writer.")]
	Conflict,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn store_conflict_converts_into_coordinator_error() {
		let error: Error = StoreError::Conflict.into();

		assert!(matches!(error, Error::Conflict));
	}

	#[test]
	fn store_error_can_be_serialized() {
		let payload = serde_json::to_string(&StoreError::Conflict)
			.expect("StoreError should serialize to JSON.");

		assert_eq!(payload, "\"Conflict\"");
	}
}
