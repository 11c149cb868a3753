//! Thread-safe in-memory [`LeaseStore`]/[`CheckpointStore`] for tests and local development.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	checkpoint::Checkpoint,
	ids::{ConsumerGroupId, EventHubId, HostName},
	lease::{key::LeaseKey, record::Lease, token::FencingToken},
	store::{CheckpointStore, LeaseStore, StoreError, StoreFuture},
};

/// Fault-injection probe consulted before every operation. Returning `Some(err)` for a given
/// operation name short-circuits the call with `err` instead of touching the backing maps;
/// used by tests to simulate transient backend failures (scenario S4).
pub type FaultProbe = Arc<dyn Fn(&str) -> Option<StoreError> + Send + Sync>;

#[derive(Default)]
struct Tables {
	leases: HashMap<LeaseKey, Lease>,
	checkpoints: HashMap<LeaseKey, Checkpoint>,
}

/// Thread-safe storage backend that keeps leases and checkpoints in-process.
#[derive(Clone, Default)]
pub struct InMemoryLeaseStore {
	tables: Arc<RwLock<Tables>>,
	fault: Option<FaultProbe>,
}
impl InMemoryLeaseStore {
	/// Builds an empty store with no fault injection.
	pub fn new() -> Self {
		Self::default()
	}

	/// Attaches a fault-injection probe, replacing any previously configured one.
	pub fn with_fault_probe(mut self, probe: FaultProbe) -> Self {
		self.fault = Some(probe);

		self
	}

	fn check_fault(&self, op: &'static str) -> Result<(), StoreError> {
		match self.fault.as_ref().and_then(|probe| probe(op)) {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	fn fresh_token() -> FencingToken {
		let value: u64 = rand::rng().random();

		FencingToken::new(format!("{value:016x}"))
	}
}
impl Debug for InMemoryLeaseStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InMemoryLeaseStore")
			.field("fault_injection", &self.fault.is_some())
			.finish()
	}
}
impl LeaseStore for InMemoryLeaseStore {
	fn ensure(&self, key: LeaseKey) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.check_fault("ensure")?;

			self.tables.write().leases.entry(key.clone()).or_insert_with(|| Lease::unowned(key));

			Ok(())
		})
	}

	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Lease>> {
		Box::pin(async move {
			self.check_fault("get")?;

			Ok(self.tables.read().leases.get(key).cloned())
		})
	}

	fn get_all<'a>(
		&'a self,
		event_hub: &'a EventHubId,
		consumer_group: &'a ConsumerGroupId,
	) -> StoreFuture<'a, Vec<Lease>> {
		Box::pin(async move {
			self.check_fault("get_all")?;

			let leases = self
				.tables
				.read()
				.leases
				.values()
				.filter(|lease| {
					&lease.key.event_hub == event_hub && &lease.key.consumer_group == consumer_group
				})
				.cloned()
				.collect();

			Ok(leases)
		})
	}

	fn acquire<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		ttl: Duration,
	) -> StoreFuture<'a, Lease> {
		Box::pin(async move {
			self.check_fault("acquire")?;

			let now = OffsetDateTime::now_utc();
			let mut guard = self.tables.write();
			let lease =
				guard.leases.entry(key.clone()).or_insert_with(|| Lease::unowned(key.clone()));

			if matches!(lease.status_at(now), crate::lease::record::LeaseStatus::Owned)
				&& !lease.is_owned_by_at(owner, now)
			{
				return Err(StoreError::Conflict);
			}

			lease.record_acquire(owner.clone(), Self::fresh_token(), ttl, now);

			Ok(lease.clone())
		})
	}

	fn renew<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
		ttl: Duration,
	) -> StoreFuture<'a, Lease> {
		Box::pin(async move {
			self.check_fault("renew")?;

			let now = OffsetDateTime::now_utc();
			let mut guard = self.tables.write();
			let lease = guard.leases.get_mut(key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			lease.record_renew(ttl, now);

			Ok(lease.clone())
		})
	}

	fn release<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.check_fault("release")?;

			let mut guard = self.tables.write();
			let lease = guard.leases.get_mut(key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			lease.record_release();

			Ok(())
		})
	}

	fn update<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
		replacement: Lease,
	) -> StoreFuture<'a, Lease> {
		Box::pin(async move {
			self.check_fault("update")?;

			let mut guard = self.tables.write();
			let current = guard.leases.get(key).ok_or(StoreError::Conflict)?;

			if current.owner.as_ref() != Some(owner) || current.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			guard.leases.insert(key.clone(), replacement.clone());

			Ok(replacement)
		})
	}
}
impl CheckpointStore for InMemoryLeaseStore {
	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Checkpoint>> {
		Box::pin(async move {
			self.check_fault("checkpoint_get")?;

			Ok(self.tables.read().checkpoints.get(key).cloned())
		})
	}

	fn update<'a>(
		&'a self,
		owner: &'a HostName,
		token: &'a FencingToken,
		checkpoint: Checkpoint,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.check_fault("checkpoint_update")?;

			let mut guard = self.tables.write();
			let lease = guard.leases.get(&checkpoint.key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			guard.checkpoints.insert(checkpoint.key.clone(), checkpoint);

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::ids::PartitionId;

	fn rt() -> Runtime {
		Runtime::new().expect("Failed to build Tokio runtime for in-memory store test.")
	}

	fn make_key() -> LeaseKey {
		LeaseKey::new(
			EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
			PartitionId::new("0").expect("Partition fixture should be valid."),
		)
	}

	#[test]
	fn acquire_then_second_acquire_conflicts() {
		let store = InMemoryLeaseStore::new();
		let key = make_key();
		let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
		let host_b = HostName::new("host-b").expect("Host fixture should be valid.");
		let rt = rt();

		rt.block_on(store.acquire(&key, &host_a, Duration::seconds(30)))
			.expect("First acquire should succeed against an unowned lease.");

		let result = rt.block_on(store.acquire(&key, &host_b, Duration::seconds(30)));

		assert!(matches!(result, Err(StoreError::Conflict)));
	}

	#[test]
	fn renew_with_stale_token_conflicts() {
		let store = InMemoryLeaseStore::new();
		let key = make_key();
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let rt = rt();
		let stale = FencingToken::new("stale");

		rt.block_on(store.acquire(&key, &host, Duration::seconds(30)))
			.expect("Acquire should succeed against an unowned lease.");

		let result = rt.block_on(store.renew(&key, &host, &stale, Duration::seconds(30)));

		assert!(matches!(result, Err(StoreError::Conflict)));
	}

	#[test]
	fn release_then_acquire_by_other_host_succeeds() {
		let store = InMemoryLeaseStore::new();
		let key = make_key();
		let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
		let host_b = HostName::new("host-b").expect("Host fixture should be valid.");
		let rt = rt();
		let lease = rt
			.block_on(store.acquire(&key, &host_a, Duration::seconds(30)))
			.expect("Acquire should succeed.");
		let token = lease.token.clone().expect("Acquired lease should carry a fencing token.");

		rt.block_on(store.release(&key, &host_a, &token)).expect("Release should succeed.");

		let reacquired = rt
			.block_on(store.acquire(&key, &host_b, Duration::seconds(30)))
			.expect("Acquire after release should succeed for a different host.");

		assert_eq!(reacquired.owner, Some(host_b));
		assert_eq!(reacquired.epoch, 2, "epoch must keep increasing across owners");
	}

	#[test]
	fn fault_probe_short_circuits_before_mutation() {
		let probe: FaultProbe =
			Arc::new(|op| (op == "acquire").then(|| StoreError::Transient { message: "down".into() }));
		let store = InMemoryLeaseStore::new().with_fault_probe(probe);
		let key = make_key();
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let rt = rt();

		let result = rt.block_on(store.acquire(&key, &host, Duration::seconds(30)));

		assert!(matches!(result, Err(StoreError::Transient { .. })));
		assert!(rt.block_on(store.get(&key)).expect("get should succeed").is_none());
	}

	#[test]
	fn checkpoint_update_requires_current_lease_ownership() {
		let store = InMemoryLeaseStore::new();
		let key = make_key();
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let rt = rt();
		let lease = rt
			.block_on(store.acquire(&key, &host, Duration::seconds(30)))
			.expect("Acquire should succeed.");
		let token = lease.token.clone().expect("Acquired lease should carry a fencing token.");
		let checkpoint = Checkpoint::new(key.clone(), "100", 1);

		rt.block_on(CheckpointStore::update(&store, &host, &token, checkpoint.clone()))
			.expect("Checkpoint update from the current owner should succeed.");

		let stale = FencingToken::new("stale");
		let rejected = rt.block_on(CheckpointStore::update(&store, &host, &stale, checkpoint));

		assert!(matches!(rejected, Err(StoreError::Conflict)));
	}
}
