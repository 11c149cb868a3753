//! Top-level façade tying identity, storage, and the control loop together for one process.

// crates.io
use tokio::{sync::oneshot, task::JoinSet};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::PartitionManagerOptions,
	error::Error,
	ids::{ConsumerGroupId, EventHubId, HostName, PartitionId},
	lease_manager::LeaseManager,
	manager::PartitionManager,
	processor::EventProcessorFactory,
	receiver::ReceiverFactory,
	store::{CheckpointStore, LeaseStore},
};

/// Host-wide registration state. A host may register at most once, and once unregistered never
/// accepts another registration (§4.G).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Registration {
	Unregistered,
	Registered,
	Unregistering,
	Terminated,
}

/// Returned by [`Host::register`]; resolves once the control loop's first scan/acquire pass has
/// completed, or once `startup_scan_delay` elapses without one, whichever comes first.
pub struct RegistrationHandle {
	ready: oneshot::Receiver<()>,
	startup_scan_delay: Duration,
}
impl RegistrationHandle {
	/// Awaits initial readiness, bounded by the `startup_scan_delay` configured at registration.
	pub async fn ready(self) -> Result<(), Error> {
		match tokio::time::timeout(self.startup_scan_delay.unsigned_abs(), self.ready).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(_)) => {
				Err(Error::ProtocolFatal("control loop exited before completing its first scan".into()))
			},
			Err(_) => Err(Error::StartupTimedOut),
		}
	}
}

/// Identity, storage, and task-group owner for one coordinating process.
///
/// Owns a single `tokio::task::JoinSet` keyed by a host-scoped [`CancellationToken`], joined in
/// full during [`Host::unregister`], rather than sharing a process-wide executor across host
/// instances (REDESIGN FLAGS: structured concurrency replaces refcounted thread-pool sharing).
pub struct Host {
	host_name: HostName,
	event_hub: EventHubId,
	consumer_group: ConsumerGroupId,
	store: Arc<dyn LeaseStore>,
	checkpoint_store: Arc<dyn CheckpointStore>,
	cancel: CancellationToken,
	tasks: AsyncMutex<JoinSet<()>>,
	registration: Mutex<Registration>,
}
impl Host {
	/// Builds an unregistered host identity backed by the given store (used as both the lease
	/// and checkpoint backend, which every built-in store implements).
	pub fn new<Store>(
		host_name: HostName,
		event_hub: EventHubId,
		consumer_group: ConsumerGroupId,
		store: Arc<Store>,
	) -> Self
	where
		Store: LeaseStore + CheckpointStore + 'static,
	{
		Self {
			host_name,
			event_hub,
			consumer_group,
			store: store.clone(),
			checkpoint_store: store,
			cancel: CancellationToken::new(),
			tasks: AsyncMutex::new(JoinSet::new()),
			registration: Mutex::new(Registration::Unregistered),
		}
	}

	/// This host's identifier.
	pub fn host_name(&self) -> &HostName {
		&self.host_name
	}

	/// Starts the control loop for `partitions`, spawning one task that scans, acquires,
	/// rebalances, renews, and reaps pumps until [`Host::unregister`] is called.
	///
	/// May be called at most once per host instance; a second call, or a call after
	/// `unregister`, returns [`Error::ProtocolFatal`].
	pub async fn register<RF, EPF>(
		&self,
		partitions: Vec<PartitionId>,
		receiver_factory: Arc<RF>,
		processor_factory: Arc<EPF>,
		options: PartitionManagerOptions,
	) -> Result<RegistrationHandle, Error>
	where
		RF: ReceiverFactory + Send + Sync + 'static,
		RF::Receiver: 'static,
		EPF: EventProcessorFactory + Send + Sync + 'static,
		EPF::Processor: 'static,
	{
		{
			let mut registration = self.registration.lock();

			if *registration != Registration::Unregistered {
				return Err(Error::ProtocolFatal(
					"Host::register may only be called once, before unregister".into(),
				));
			}

			*registration = Registration::Registered;
		}

		let startup_scan_delay = options.startup_scan_delay;
		let lease_manager = Arc::new(LeaseManager::new(
			self.store.clone(),
			self.host_name.clone(),
			options.lease_duration,
		));
		let manager = Arc::new(PartitionManager::new(
			self.host_name.clone(),
			self.event_hub.clone(),
			self.consumer_group.clone(),
			partitions,
			lease_manager,
			self.checkpoint_store.clone(),
			receiver_factory,
			processor_factory,
			Arc::new(options),
		));
		let cancel = self.cancel.clone();
		let (ready_tx, ready_rx) = oneshot::channel();

		self.tasks.lock().await.spawn(async move { manager.run(cancel, Some(ready_tx)).await });

		Ok(RegistrationHandle { ready: ready_rx, startup_scan_delay })
	}

	/// Idempotently stops the control loop and waits for every spawned task — the manager's own
	/// loop, and transitively every pump it owns — to finish.
	pub async fn unregister(&self) {
		{
			let mut registration = self.registration.lock();

			match *registration {
				Registration::Unregistered
				| Registration::Unregistering
				| Registration::Terminated => return,
				Registration::Registered => *registration = Registration::Unregistering,
			}
		}

		self.cancel.cancel();

		let mut tasks = self.tasks.lock().await;

		while tasks.join_next().await.is_some() {}

		*self.registration.lock() = Registration::Terminated;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		config::StartingPosition,
		lease::key::LeaseKey,
		processor::{CloseReason, PartitionContext},
		receiver::Event,
		store::InMemoryLeaseStore,
	};

	struct NoopReceiver;
	impl crate::receiver::Receiver for NoopReceiver {
		fn receive(
			&mut self,
			_max: usize,
			_timeout: Duration,
		) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, Error>> + Send + '_>> {
			Box::pin(async { Ok(vec![]) })
		}

		fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}
	}

	struct NoopReceiverFactory;
	impl ReceiverFactory for NoopReceiverFactory {
		type Receiver = NoopReceiver;

		fn open<'a>(
			&'a self,
			_partition: &'a PartitionId,
			_starting_position: &'a StartingPosition,
			_prefetch_count: u32,
			_epoch: Option<u64>,
		) -> Pin<Box<dyn Future<Output = Result<Self::Receiver, Error>> + Send + 'a>> {
			Box::pin(async { Ok(NoopReceiver) })
		}
	}

	struct NoopProcessor;
	impl crate::processor::EventProcessor for NoopProcessor {
		fn open<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
			Box::pin(async { Ok(()) })
		}

		fn on_events<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
			_batch: Vec<Event>,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
			Box::pin(async { Ok(()) })
		}

		fn close<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
			_reason: CloseReason,
		) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
			Box::pin(async {})
		}

		fn on_error<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
			_error: &'a Error,
		) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
			Box::pin(async {})
		}
	}

	struct NoopProcessorFactory;
	impl EventProcessorFactory for NoopProcessorFactory {
		type Processor = NoopProcessor;

		fn create(&self, _key: &LeaseKey) -> Self::Processor {
			NoopProcessor
		}
	}

	#[tokio::test]
	async fn register_twice_is_rejected() {
		let host = Host::new(
			HostName::new("host-a").expect("Host fixture should be valid."),
			EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
			Arc::new(InMemoryLeaseStore::new()),
		);
		let partitions = vec![PartitionId::new("0").expect("Partition fixture should be valid.")];
		let options = PartitionManagerOptions::builder()
			.with_scan_interval(Duration::milliseconds(20))
			.build()
			.expect("Options fixture should be valid.");

		host.register(
			partitions.clone(),
			Arc::new(NoopReceiverFactory),
			Arc::new(NoopProcessorFactory),
			options.clone(),
		)
		.await
		.expect("First registration should succeed.")
		.ready()
		.await
		.expect("Control loop should become ready.");

		let second = host
			.register(partitions, Arc::new(NoopReceiverFactory), Arc::new(NoopProcessorFactory), options)
			.await;

		assert!(second.is_err());

		host.unregister().await;
	}

	#[tokio::test]
	async fn unregister_is_idempotent() {
		let host = Host::new(
			HostName::new("host-a").expect("Host fixture should be valid."),
			EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
			Arc::new(InMemoryLeaseStore::new()),
		);

		host.unregister().await;
		host.unregister().await;
	}
}
