//! Fleet-wide scan/acquire/rebalance/renew/reap control loop.

// crates.io
use tokio::{sync::oneshot, task::JoinSet};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::PartitionManagerOptions,
	ids::{ConsumerGroupId, EventHubId, HostName, PartitionId},
	lease::{
		key::LeaseKey,
		record::{Lease, LeaseStatus},
		token::FencingToken,
	},
	lease_manager::LeaseManager,
	obs::{Outcome, Stage, StageSpan, record_stage_outcome},
	processor::{CloseReason, EventProcessorFactory},
	pump::{PartitionPump, PumpHandle, PumpOutcome, PumpState},
	receiver::ReceiverFactory,
	store::CheckpointStore,
};

struct OwnedLease {
	token: FencingToken,
	epoch: u64,
}

/// Single control loop per host: scans the lease store, acquires unowned/expired partitions,
/// steals at most `max_steals_per_tick` partitions per tick to converge on an equal share, and
/// renews every partition this host currently owns.
///
/// `PartitionManager` exclusively owns the set of live pumps; the registry below (`handles`,
/// `owned`, `tasks`) is local to [`PartitionManager::run`] rather than a struct field, since no
/// task other than the control loop itself ever touches it (§5).
pub struct PartitionManager<RF, EPF>
where
	RF: ReceiverFactory,
	EPF: EventProcessorFactory,
{
	host: HostName,
	event_hub: EventHubId,
	consumer_group: ConsumerGroupId,
	partitions: Vec<PartitionId>,
	lease_manager: Arc<LeaseManager>,
	checkpoint_store: Arc<dyn CheckpointStore>,
	receiver_factory: Arc<RF>,
	processor_factory: Arc<EPF>,
	options: Arc<PartitionManagerOptions>,
}
impl<RF, EPF> PartitionManager<RF, EPF>
where
	RF: ReceiverFactory + Send + Sync + 'static,
	RF::Receiver: 'static,
	EPF: EventProcessorFactory + Send + Sync + 'static,
	EPF::Processor: 'static,
{
	/// Builds a manager for the given event hub / consumer group / fixed partition set.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		host: HostName,
		event_hub: EventHubId,
		consumer_group: ConsumerGroupId,
		partitions: Vec<PartitionId>,
		lease_manager: Arc<LeaseManager>,
		checkpoint_store: Arc<dyn CheckpointStore>,
		receiver_factory: Arc<RF>,
		processor_factory: Arc<EPF>,
		options: Arc<PartitionManagerOptions>,
	) -> Self {
		Self {
			host,
			event_hub,
			consumer_group,
			partitions,
			lease_manager,
			checkpoint_store,
			receiver_factory,
			processor_factory,
			options,
		}
	}

	/// Runs the control loop until `cancel` fires, then stops every owned pump with `Shutdown`
	/// and waits (up to `unregister_drain_timeout`) for them to drain.
	///
	/// `ready`, if given, is fired once the first scan/acquire tick has completed, letting a
	/// caller await initial readiness instead of only knowing the control loop was spawned.
	pub async fn run(&self, cancel: CancellationToken, mut ready: Option<oneshot::Sender<()>>) {
		let mut handles: HashMap<LeaseKey, PumpHandle> = HashMap::new();
		let mut owned: HashMap<LeaseKey, OwnedLease> = HashMap::new();
		let mut tasks: JoinSet<PumpOutcome> = JoinSet::new();
		let mut scan_ticker = tokio::time::interval(self.options.scan_interval.unsigned_abs());
		let mut renew_ticker = tokio::time::interval(self.options.renew_interval.unsigned_abs());

		scan_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		renew_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = scan_ticker.tick() => {
					self.tick(&mut handles, &mut owned, &mut tasks).await;

					if let Some(ready) = ready.take() {
						let _ = ready.send(());
					}
				},
				_ = renew_ticker.tick() => {
					self.renew_owned(&handles, &owned).await;
				},
				Some(result) = tasks.join_next() => {
					reap(result, &mut handles, &mut owned);
				},
			}
		}

		for handle in handles.values() {
			handle.stop(CloseReason::Shutdown);
		}

		let drain = tokio::time::timeout(
			self.options.unregister_drain_timeout.unsigned_abs(),
			drain_all(&mut tasks, &mut handles, &mut owned),
		);

		// Pumps that do not drain in time are abandoned; their leases are left to expire
		// naturally rather than forced, since we no longer hold a task to release them cleanly.
		let _ = drain.await;
	}

	async fn tick(
		&self,
		handles: &mut HashMap<LeaseKey, PumpHandle>,
		owned: &mut HashMap<LeaseKey, OwnedLease>,
		tasks: &mut JoinSet<PumpOutcome>,
	) {
		let span = StageSpan::new(Stage::Scan, "partition_manager_tick");

		span.instrument(self.tick_inner(handles, owned, tasks)).await
	}

	async fn tick_inner(
		&self,
		handles: &mut HashMap<LeaseKey, PumpHandle>,
		owned: &mut HashMap<LeaseKey, OwnedLease>,
		tasks: &mut JoinSet<PumpOutcome>,
	) {
		let leases = match self.lease_manager.get_all(&self.event_hub, &self.consumer_group).await
		{
			Ok(leases) => leases,
			Err(_) => return,
		};
		let mut by_key: HashMap<LeaseKey, Lease> =
			leases.into_iter().map(|lease| (lease.key.clone(), lease)).collect();

		for partition in &self.partitions {
			let key = LeaseKey::new(
				self.event_hub.clone(),
				self.consumer_group.clone(),
				partition.clone(),
			);

			if !by_key.contains_key(&key) && self.lease_manager.ensure(&key).await.is_ok() {
				by_key.insert(key.clone(), Lease::unowned(key));
			}
		}

		let now = OffsetDateTime::now_utc();
		let mut owned_by_others: HashMap<HostName, Vec<LeaseKey>> = HashMap::new();
		let mut unowned_or_expired: Vec<LeaseKey> = Vec::new();

		for lease in by_key.values() {
			match lease.status_at(now) {
				LeaseStatus::Owned if lease.is_owned_by_at(&self.host, now) => {},
				LeaseStatus::Owned => {
					if let Some(owner) = &lease.owner {
						owned_by_others.entry(owner.clone()).or_default().push(lease.key.clone());
					}
				},
				LeaseStatus::Unowned | LeaseStatus::Expired => {
					unowned_or_expired.push(lease.key.clone());
				},
			}
		}

		for key in unowned_or_expired {
			if let Ok(Some(lease)) = self.lease_manager.acquire(&key).await {
				self.start_pump(lease, handles, owned, tasks);
			}
		}

		let live_hosts: BTreeSet<HostName> = owned_by_others
			.keys()
			.cloned()
			.chain(std::iter::once(self.host.clone()))
			.collect();
		let targets = compute_targets(self.partitions.len(), &live_hosts);

		for _ in 0..self.options.max_steals_per_tick {
			let Some(victim) =
				pick_steal_victim(&self.host, owned.len(), &owned_by_others, &targets)
			else {
				break;
			};

			record_stage_outcome(Stage::Steal, Outcome::Attempt);

			match self.lease_manager.acquire(&victim).await {
				Ok(Some(lease)) => {
					record_stage_outcome(Stage::Steal, Outcome::Success);

					if let Some(leases) = owned_by_others.values_mut().find(|v| v.contains(&victim))
					{
						leases.retain(|k| k != &victim);
					}

					self.start_pump(lease, handles, owned, tasks);
				},
				_ => {
					record_stage_outcome(Stage::Steal, Outcome::Failure);

					break;
				},
			}
		}
	}

	/// Renews every currently-owned, still-running partition on `renew_interval`'s own cadence,
	/// independent of the scan tick — a `scan_interval` looser than `renew_interval` must not
	/// silently weaken renewal margins.
	async fn renew_owned(&self, handles: &HashMap<LeaseKey, PumpHandle>, owned: &HashMap<LeaseKey, OwnedLease>) {
		for (key, owned_lease) in owned.iter() {
			let Some(handle) = handles.get(key) else { continue };

			if handle.state() != PumpState::Running {
				continue;
			}

			if self.lease_manager.renew(key, &owned_lease.token).await.is_err() {
				handle.stop(CloseReason::LeaseLost);
			}
		}
	}

	fn start_pump(
		&self,
		lease: Lease,
		handles: &mut HashMap<LeaseKey, PumpHandle>,
		owned: &mut HashMap<LeaseKey, OwnedLease>,
		tasks: &mut JoinSet<PumpOutcome>,
	) {
		let key = lease.key.clone();
		let Some(token) = lease.token.clone() else { return };
		let epoch = lease.epoch;
		let (pump, handle) = PartitionPump::new(
			key.clone(),
			self.host.clone(),
			token.clone(),
			epoch,
			self.lease_manager.clone(),
			self.checkpoint_store.clone(),
			self.receiver_factory.clone(),
			self.processor_factory.clone(),
			self.options.clone(),
		);

		tasks.spawn(pump.run());
		handles.insert(key.clone(), handle);
		owned.insert(key, OwnedLease { token, epoch });
	}
}

async fn drain_all(
	tasks: &mut JoinSet<PumpOutcome>,
	handles: &mut HashMap<LeaseKey, PumpHandle>,
	owned: &mut HashMap<LeaseKey, OwnedLease>,
) {
	while let Some(result) = tasks.join_next().await {
		reap(result, handles, owned);
	}
}

fn reap(
	result: Result<PumpOutcome, tokio::task::JoinError>,
	handles: &mut HashMap<LeaseKey, PumpHandle>,
	owned: &mut HashMap<LeaseKey, OwnedLease>,
) {
	if let Ok(outcome) = result {
		handles.remove(&outcome.key);
		owned.remove(&outcome.key);
	}
}

/// Computes each live host's equal-share target partition count: `partitions / hosts.len()`,
/// with the remainder distributed one-each to the lexicographically smallest host names.
pub fn compute_targets(partitions: usize, hosts: &BTreeSet<HostName>) -> HashMap<HostName, usize> {
	let host_count = hosts.len();

	if host_count == 0 {
		return HashMap::new();
	}

	let base = partitions / host_count;
	let remainder = partitions % host_count;

	hosts
		.iter()
		.enumerate()
		.map(|(i, host)| (host.clone(), if i < remainder { base + 1 } else { base }))
		.collect()
}

/// Pure rebalance helper: picks at most one partition to steal this tick, or `None` if this
/// host is already at or above its target share, or no other host is over-quota by more than
/// one partition. Ties among victim partitions on the most-loaded host are broken by
/// lexicographically smallest partition id.
pub fn pick_steal_victim(
	self_host: &HostName,
	self_owned_count: usize,
	owned_by_others: &HashMap<HostName, Vec<LeaseKey>>,
	targets: &HashMap<HostName, usize>,
) -> Option<LeaseKey> {
	let self_target = *targets.get(self_host)?;

	if self_owned_count >= self_target {
		return None;
	}

	let mut candidates: Vec<(&HostName, &Vec<LeaseKey>)> = owned_by_others
		.iter()
		.filter(|(host, leases)| {
			*host != self_host && leases.len() > targets.get(*host).copied().unwrap_or(0) + 1
		})
		.collect();

	candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

	let (_, leases) = candidates.into_iter().next()?;

	leases.iter().min_by(|a, b| a.partition.cmp(&b.partition)).cloned()
}
