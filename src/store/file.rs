//! Simple file-backed [`LeaseStore`]/[`CheckpointStore`] for single-process deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	checkpoint::Checkpoint,
	ids::{ConsumerGroupId, EventHubId, HostName},
	lease::{
		key::LeaseKey,
		record::{Lease, LeaseStatus},
		token::FencingToken,
	},
	store::{CheckpointStore, LeaseStore, StoreError, StoreFuture},
};

#[derive(Default)]
struct Tables {
	leases: HashMap<LeaseKey, Lease>,
	checkpoints: HashMap<LeaseKey, Checkpoint>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
	leases: Vec<(LeaseKey, Lease)>,
	checkpoints: Vec<(LeaseKey, Checkpoint)>,
}

/// Persists leases and checkpoints to a JSON file after every mutation.
pub struct FileLeaseStore {
	path: PathBuf,
	tables: RwLock<Tables>,
}
impl FileLeaseStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let tables = if path.exists() { Self::load_snapshot(&path)? } else { Tables::default() };

		Ok(Self { path, tables: RwLock::new(tables) })
	}

	fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
		let metadata = path.metadata().map_err(|e| StoreError::Transient {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Tables::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Transient {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let snapshot: Snapshot =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Transient {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(Tables {
			leases: snapshot.leases.into_iter().collect(),
			checkpoints: snapshot.checkpoints.into_iter().collect(),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Transient {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, tables: &Tables) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot = Snapshot {
			leases: tables.leases.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
			checkpoints: tables.checkpoints.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
		};
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Transient {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Transient {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Transient {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Transient {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Transient {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn fresh_token() -> FencingToken {
		let value: u64 = rand::rng().random();

		FencingToken::new(format!("{value:016x}"))
	}
}
impl Debug for FileLeaseStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FileLeaseStore").field("path", &self.path).finish()
	}
}
impl LeaseStore for FileLeaseStore {
	fn ensure(&self, key: LeaseKey) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.tables.write();

			if !guard.leases.contains_key(&key) {
				guard.leases.insert(key.clone(), Lease::unowned(key));
				self.persist_locked(&guard)?;
			}

			Ok(())
		})
	}

	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Lease>> {
		Box::pin(async move { Ok(self.tables.read().leases.get(key).cloned()) })
	}

	fn get_all<'a>(
		&'a self,
		event_hub: &'a EventHubId,
		consumer_group: &'a ConsumerGroupId,
	) -> StoreFuture<'a, Vec<Lease>> {
		Box::pin(async move {
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
			let now = OffsetDateTime::now_utc();
			let mut guard = self.tables.write();
			let lease =
				guard.leases.entry(key.clone()).or_insert_with(|| Lease::unowned(key.clone()));

			if matches!(lease.status_at(now), LeaseStatus::Owned) && !lease.is_owned_by_at(owner, now)
			{
				return Err(StoreError::Conflict);
			}

			lease.record_acquire(owner.clone(), Self::fresh_token(), ttl, now);

			let result = lease.clone();

			self.persist_locked(&guard)?;

			Ok(result)
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
			let now = OffsetDateTime::now_utc();
			let mut guard = self.tables.write();
			let lease = guard.leases.get_mut(key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			lease.record_renew(ttl, now);

			let result = lease.clone();

			self.persist_locked(&guard)?;

			Ok(result)
		})
	}

	fn release<'a>(
		&'a self,
		key: &'a LeaseKey,
		owner: &'a HostName,
		token: &'a FencingToken,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.tables.write();
			let lease = guard.leases.get_mut(key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			lease.record_release();

			self.persist_locked(&guard)
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
			let mut guard = self.tables.write();
			let current = guard.leases.get(key).ok_or(StoreError::Conflict)?;

			if current.owner.as_ref() != Some(owner) || current.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			guard.leases.insert(key.clone(), replacement.clone());
			self.persist_locked(&guard)?;

			Ok(replacement)
		})
	}
}
impl CheckpointStore for FileLeaseStore {
	fn get<'a>(&'a self, key: &'a LeaseKey) -> StoreFuture<'a, Option<Checkpoint>> {
		Box::pin(async move { Ok(self.tables.read().checkpoints.get(key).cloned()) })
	}

	fn update<'a>(
		&'a self,
		owner: &'a HostName,
		token: &'a FencingToken,
		checkpoint: Checkpoint,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.tables.write();
			let lease = guard.leases.get(&checkpoint.key).ok_or(StoreError::Conflict)?;

			if lease.owner.as_ref() != Some(owner) || lease.token.as_ref() != Some(token) {
				return Err(StoreError::Conflict);
			}

			guard.checkpoints.insert(checkpoint.key.clone(), checkpoint);

			self.persist_locked(&guard)
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::ids::PartitionId;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"partition_coordinator_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn make_key() -> LeaseKey {
		LeaseKey::new(
			EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
			PartitionId::new("0").expect("Partition fixture should be valid."),
		)
	}

	#[test]
	fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileLeaseStore::open(&path).expect("Failed to open file store snapshot.");
		let key = make_key();
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		let lease = rt
			.block_on(store.acquire(&key, &host, Duration::seconds(30)))
			.expect("Failed to acquire lease for file store test.");

		drop(store);

		let reopened = FileLeaseStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = rt
			.block_on(reopened.get(&key))
			.expect("Failed to fetch lease from reopened file store.")
			.expect("File store lost the lease record after reopen.");

		assert_eq!(fetched.owner, lease.owner);
		assert_eq!(fetched.epoch, lease.epoch);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
