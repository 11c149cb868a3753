//! Per-partition reader loop and user-callback dispatcher.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::{PartitionManagerOptions, StartingPosition},
	error::Error,
	ids::HostName,
	lease::{key::LeaseKey, token::FencingToken},
	lease_manager::LeaseManager,
	processor::{CloseReason, EventProcessor, EventProcessorFactory, PartitionContext},
	receiver::ReceiverFactory,
	store::CheckpointStore,
};

/// Lifecycle state of a [`PartitionPump`], observed by [`PartitionManager`](crate::manager::PartitionManager)
/// through a [`PumpHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
	/// Opening the receiver and the user processor.
	Starting,
	/// Delivering batches to the user processor.
	Running,
	/// Draining the in-flight `onEvents` call and closing the processor.
	Stopping,
	/// Terminal: closed cleanly (`Shutdown` or `LeaseLost`).
	Stopped,
	/// Terminal: the processor or receiver failed.
	Failed,
}

/// Outcome reported by a finished pump task.
#[derive(Debug)]
pub struct PumpOutcome {
	/// Partition this outcome describes.
	pub key: LeaseKey,
	/// Reason the pump stopped.
	pub reason: CloseReason,
	/// Startup or runtime error, if the pump reached [`PumpState::Failed`].
	pub error: Option<Error>,
}

/// Lightweight, `Clone`-able view retained by the manager while the pump itself runs inside a
/// spawned task. Only the handle — never the receiver or processor — crosses the task
/// boundary back to the manager, preserving "each pump exclusively owns its receiver and
/// processor for its lifetime".
#[derive(Clone)]
pub struct PumpHandle {
	key: LeaseKey,
	cancel: CancellationToken,
	stop_reason: Arc<Mutex<Option<CloseReason>>>,
	state: Arc<Mutex<PumpState>>,
}
impl PumpHandle {
	/// Partition this handle tracks.
	pub fn key(&self) -> &LeaseKey {
		&self.key
	}

	/// Current lifecycle state.
	pub fn state(&self) -> PumpState {
		*self.state.lock()
	}

	/// Requests the pump stop with the given reason. Idempotent; the first call wins.
	pub fn stop(&self, reason: CloseReason) {
		self.stop_reason.lock().get_or_insert(reason);
		self.cancel.cancel();
	}

	/// `true` once the pump has reached a terminal state.
	pub fn is_terminal(&self) -> bool {
		matches!(self.state(), PumpState::Stopped | PumpState::Failed)
	}
}

/// Per-partition reader + dispatch actor. Consumes its `ReceiverFactory`/`EventProcessorFactory`
/// once at construction and runs to completion inside [`PartitionPump::run`].
pub struct PartitionPump<RF, EPF>
where
	RF: ReceiverFactory,
	EPF: EventProcessorFactory,
{
	key: LeaseKey,
	host: HostName,
	token: FencingToken,
	epoch: u64,
	lease_manager: Arc<LeaseManager>,
	checkpoint_store: Arc<dyn CheckpointStore>,
	receiver_factory: Arc<RF>,
	processor_factory: Arc<EPF>,
	options: Arc<PartitionManagerOptions>,
	cancel: CancellationToken,
	stop_reason: Arc<Mutex<Option<CloseReason>>>,
	state: Arc<Mutex<PumpState>>,
}
impl<RF, EPF> PartitionPump<RF, EPF>
where
	RF: ReceiverFactory,
	EPF: EventProcessorFactory,
{
	/// Builds a pump for a just-acquired lease, returning it paired with the [`PumpHandle`] the
	/// manager retains to observe state and request a stop.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		key: LeaseKey,
		host: HostName,
		token: FencingToken,
		epoch: u64,
		lease_manager: Arc<LeaseManager>,
		checkpoint_store: Arc<dyn CheckpointStore>,
		receiver_factory: Arc<RF>,
		processor_factory: Arc<EPF>,
		options: Arc<PartitionManagerOptions>,
	) -> (Self, PumpHandle) {
		let cancel = CancellationToken::new();
		let stop_reason = Arc::new(Mutex::new(None));
		let state = Arc::new(Mutex::new(PumpState::Starting));
		let handle = PumpHandle {
			key: key.clone(),
			cancel: cancel.clone(),
			stop_reason: stop_reason.clone(),
			state: state.clone(),
		};
		let pump = Self {
			key,
			host,
			token,
			epoch,
			lease_manager,
			checkpoint_store,
			receiver_factory,
			processor_factory,
			options,
			cancel,
			stop_reason,
			state,
		};

		(pump, handle)
	}

	fn set_state(&self, next: PumpState) {
		*self.state.lock() = next;
	}

	/// Drives the `Starting → Running → Stopping → {Stopped | Failed}` lifecycle to completion.
	///
	/// Invariant P1 holds structurally: `on_events` is only ever awaited from this single task.
	/// Invariant P2 holds because every exit path below calls `processor.close` exactly once.
	/// Invariant P3 holds because no checkpoint can be issued once this function has returned;
	/// the `PartitionContext` handed to callbacks does not outlive them.
	pub async fn run(self) -> PumpOutcome {
		let checkpoint = match self.checkpoint_store.get(&self.key).await {
			Ok(checkpoint) => checkpoint,
			Err(e) => return self.fail_startup(e.into()).await,
		};
		let starting_position = checkpoint
			.map(|checkpoint| StartingPosition::Offset(checkpoint.offset))
			.unwrap_or_else(|| self.options.initial_position.clone());
		let mut receiver = match self
			.receiver_factory
			.open(&self.key.partition, &starting_position, self.options.prefetch_count, Some(self.epoch))
			.await
		{
			Ok(receiver) => receiver,
			Err(e) => return self.fail_startup(e).await,
		};
		let mut processor = self.processor_factory.create(&self.key);
		let ctx = PartitionContext::new(
			self.key.clone(),
			self.host.clone(),
			self.token.clone(),
			self.checkpoint_store.clone(),
		);

		if let Err(e) = processor.open(&ctx).await {
			processor.on_error(&ctx, &e).await;
			processor.close(&ctx, CloseReason::ProcessorFailure).await;
			let _ = receiver.close().await;
			self.set_state(PumpState::Failed);
			let _ = self.lease_manager.release(&self.key, &self.token).await;

			return PumpOutcome { key: self.key, reason: CloseReason::ProcessorFailure, error: Some(e) };
		}

		self.set_state(PumpState::Running);

		let mut runtime_error = None;
		let close_reason = loop {
			tokio::select! {
				_ = self.cancel.cancelled() => {
					break (*self.stop_reason.lock()).unwrap_or(CloseReason::Shutdown);
				},
				received = receiver.receive(self.options.max_batch_size, self.options.receive_timeout) => {
					match received {
						Ok(batch) if batch.is_empty() && !self.options.invoke_on_timeout => continue,
						Ok(batch) => {
							if let Err(e) = processor.on_events(&ctx, batch).await {
								processor.on_error(&ctx, &e).await;
								runtime_error = Some(e);

								break CloseReason::ProcessorFailure;
							}
						},
						Err(e) => {
							processor.on_error(&ctx, &e).await;
							runtime_error = Some(e);

							break CloseReason::ProcessorFailure;
						},
					}
				},
			}
		};

		self.set_state(PumpState::Stopping);
		processor.close(&ctx, close_reason).await;
		let _ = receiver.close().await;
		let _ = self.lease_manager.release(&self.key, &self.token).await;
		self.set_state(if matches!(close_reason, CloseReason::ProcessorFailure) {
			PumpState::Failed
		} else {
			PumpState::Stopped
		});

		PumpOutcome { key: self.key, reason: close_reason, error: runtime_error }
	}

	async fn fail_startup(self, error: Error) -> PumpOutcome {
		self.set_state(PumpState::Failed);
		let _ = self.lease_manager.release(&self.key, &self.token).await;

		PumpOutcome { key: self.key, reason: CloseReason::ProcessorFailure, error: Some(error) }
	}
}
