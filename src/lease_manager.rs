//! Thin, injectable policy object implementing the acquire/renew/release/steal protocol on top
//! of an abstract [`LeaseStore`].

// self
use crate::{
	_prelude::*,
	error::Error,
	ids::{ConsumerGroupId, EventHubId, HostName},
	lease::{key::LeaseKey, record::Lease, token::FencingToken},
	obs::{Outcome, Stage, record_stage_outcome},
	store::{LeaseStore, StoreError},
};

const DEFAULT_RENEW_RETRY_LIMIT: u32 = 2;

/// Wraps an `Arc<dyn LeaseStore>` with the host identity and timing parameters needed to turn
/// raw store CAS results into the protocol-level decisions described by the lease manager
/// policies: acquire never retries in a tight loop, renew retries transient failures a bounded
/// number of times before treating the lease as lost, and a store conflict is always lost,
/// never an error worth logging above `debug`.
pub struct LeaseManager {
	store: Arc<dyn LeaseStore>,
	host: HostName,
	lease_duration: Duration,
	renew_retry_limit: u32,
}
impl LeaseManager {
	/// Builds a lease manager for `host`, writing `lease_duration` as the TTL on every
	/// acquire/renew.
	pub fn new(store: Arc<dyn LeaseStore>, host: HostName, lease_duration: Duration) -> Self {
		Self { store, host, lease_duration, renew_retry_limit: DEFAULT_RENEW_RETRY_LIMIT }
	}

	/// Overrides the number of immediate retries a transient renew failure gets before the
	/// lease is treated as lost.
	pub fn with_renew_retry_limit(mut self, renew_retry_limit: u32) -> Self {
		self.renew_retry_limit = renew_retry_limit;

		self
	}

	/// Host identity this manager acquires and renews leases on behalf of.
	pub fn host(&self) -> &HostName {
		&self.host
	}

	/// Idempotently creates the lease record for `key` if it does not yet exist.
	pub async fn ensure(&self, key: &LeaseKey) -> Result<(), Error> {
		Ok(self.store.ensure(key.clone()).await?)
	}

	/// Fetches the current record for `key`.
	pub async fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, Error> {
		Ok(self.store.get(key).await?)
	}

	/// Fetches every lease tracked for the given event hub + consumer group.
	pub async fn get_all(
		&self,
		event_hub: &EventHubId,
		consumer_group: &ConsumerGroupId,
	) -> Result<Vec<Lease>, Error> {
		Ok(self.store.get_all(event_hub, consumer_group).await?)
	}

	/// Attempts to acquire `key`. Returns `Ok(None)` on a lost CAS race — the caller must treat
	/// this as "not acquired this tick", never retry immediately.
	pub async fn acquire(&self, key: &LeaseKey) -> Result<Option<Lease>, Error> {
		record_stage_outcome(Stage::Acquire, Outcome::Attempt);

		match self.store.acquire(key, &self.host, self.lease_duration).await {
			Ok(lease) => {
				record_stage_outcome(Stage::Acquire, Outcome::Success);

				Ok(Some(lease))
			},
			Err(StoreError::Conflict) => Ok(None),
			Err(e) => {
				record_stage_outcome(Stage::Acquire, Outcome::Failure);

				Err(e.into())
			},
		}
	}

	/// Renews `key` under `token`, retrying transient failures up to the configured limit
	/// before surfacing [`Error::LeaseLost`]. A CAS conflict is always immediately lost.
	pub async fn renew(&self, key: &LeaseKey, token: &FencingToken) -> Result<Lease, Error> {
		record_stage_outcome(Stage::Renew, Outcome::Attempt);

		let mut attempt = 0;

		loop {
			match self.store.renew(key, &self.host, token, self.lease_duration).await {
				Ok(lease) => {
					record_stage_outcome(Stage::Renew, Outcome::Success);

					return Ok(lease);
				},
				Err(StoreError::Conflict) => {
					record_stage_outcome(Stage::Renew, Outcome::Failure);

					return Err(lease_lost(key));
				},
				Err(StoreError::Transient { .. }) if attempt < self.renew_retry_limit => {
					attempt += 1;
				},
				Err(_) => {
					record_stage_outcome(Stage::Renew, Outcome::Failure);

					return Err(lease_lost(key));
				},
			}
		}
	}

	/// Releases `key` currently held under `token`. A CAS conflict (already stolen) is not an
	/// error worth propagating — the caller has already lost the lease either way.
	pub async fn release(&self, key: &LeaseKey, token: &FencingToken) -> Result<(), Error> {
		record_stage_outcome(Stage::Release, Outcome::Attempt);

		match self.store.release(key, &self.host, token).await {
			Ok(()) | Err(StoreError::Conflict) => {
				record_stage_outcome(Stage::Release, Outcome::Success);

				Ok(())
			},
			Err(e) => {
				record_stage_outcome(Stage::Release, Outcome::Failure);

				Err(e.into())
			},
		}
	}

	/// Replaces the stored record for `key` wholesale, fenced on `token`.
	pub async fn update(
		&self,
		key: &LeaseKey,
		token: &FencingToken,
		replacement: Lease,
	) -> Result<Lease, Error> {
		match self.store.update(key, &self.host, token, replacement).await {
			Ok(lease) => Ok(lease),
			Err(StoreError::Conflict) => Err(lease_lost(key)),
			Err(e) => Err(e.into()),
		}
	}
}

fn lease_lost(key: &LeaseKey) -> Error {
	Error::LeaseLost { key: key.to_string() }
}
