//! User-supplied event-processing contract.
//!
//! The core only specifies the `open → onEvents* → close` lifecycle; the concrete processor
//! logic is external (out of scope, §1).

// self
use crate::{
	_prelude::*,
	checkpoint::Checkpoint,
	error::Error,
	ids::HostName,
	lease::{key::LeaseKey, token::FencingToken},
	obs::{Outcome, Stage, record_stage_outcome},
	receiver::Event,
	store::CheckpointStore,
};

/// Reason a pump closed its [`EventProcessor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
	/// The host was cleanly unregistered.
	Shutdown,
	/// The lease was lost (expired and stolen, or a renew conflict).
	LeaseLost,
	/// The processor itself failed during `open` or `onEvents`.
	ProcessorFailure,
}

/// Read-only view of a pump's identity and checkpoint capability, passed to every
/// [`EventProcessor`] callback.
///
/// The fencing token captured at construction is the one minted by the acquire that started
/// this pump; a later lease theft invalidates it at the store, so `checkpoint` calls placed
/// after loss fail with [`Error::Fenced`] rather than silently succeeding (invariant C1).
pub struct PartitionContext {
	key: LeaseKey,
	owner: HostName,
	token: FencingToken,
	checkpoint_store: Arc<dyn CheckpointStore>,
}
impl PartitionContext {
	pub(crate) fn new(
		key: LeaseKey,
		owner: HostName,
		token: FencingToken,
		checkpoint_store: Arc<dyn CheckpointStore>,
	) -> Self {
		Self { key, owner, token, checkpoint_store }
	}

	/// Partition identifier this context belongs to.
	pub fn partition_id(&self) -> &str {
		&self.key.partition
	}

	/// Consumer group this context belongs to.
	pub fn consumer_group(&self) -> &str {
		&self.key.consumer_group
	}

	/// Event hub this context belongs to.
	pub fn event_hub(&self) -> &str {
		&self.key.event_hub
	}

	/// Host currently holding the owning lease.
	pub fn owner(&self) -> &HostName {
		&self.owner
	}

	/// Writes a checkpoint at the given offset and sequence number, fenced by the pump's lease
	/// token. Fails with [`Error::Fenced`] if the lease has since been lost.
	pub async fn checkpoint(
		&self,
		offset: impl Into<String>,
		sequence_number: i64,
	) -> Result<(), Error> {
		record_stage_outcome(Stage::Checkpoint, Outcome::Attempt);

		let checkpoint = Checkpoint::new(self.key.clone(), offset, sequence_number);
		let result = self.checkpoint_store.update(&self.owner, &self.token, checkpoint).await.map_err(|e| {
			use crate::store::StoreError;

			match e {
				StoreError::Conflict => Error::Fenced { key: self.key.to_string() },
				StoreError::Transient { message } =>
					Error::Transient(crate::error::TransientError::Store { message }),
			}
		});

		record_stage_outcome(
			Stage::Checkpoint,
			if result.is_ok() { Outcome::Success } else { Outcome::Failure },
		);

		result
	}
}

/// Lifecycle contract a caller-supplied event processor must implement.
///
/// Invariant P1/P2 (mutual exclusion + exactly-once close) are enforced by the pump that drives
/// this trait, not by the implementor: a correct pump never calls `on_events` concurrently with
/// itself, and calls `close` exactly once per successful `open`.
pub trait EventProcessor
where
	Self: Send,
{
	/// Called once before the first batch is delivered. Failure aborts pump startup.
	fn open<'a>(
		&'a mut self,
		ctx: &'a PartitionContext,
	) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

	/// Called with each batch of events in broker order. `batch` may be empty only when
	/// `invoke_on_timeout` is enabled and `receive_timeout` elapsed with nothing to deliver.
	fn on_events<'a>(
		&'a mut self,
		ctx: &'a PartitionContext,
		batch: Vec<Event>,
	) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

	/// Called exactly once to end the lifecycle, with the reason the pump stopped.
	fn close<'a>(
		&'a mut self,
		ctx: &'a PartitionContext,
		reason: CloseReason,
	) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

	/// Informational error notification; does not affect pump lifecycle.
	fn on_error<'a>(
		&'a mut self,
		ctx: &'a PartitionContext,
		error: &'a Error,
	) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Factory invoked once per pump start to obtain a fresh [`EventProcessor`] instance.
pub trait EventProcessorFactory
where
	Self: Send + Sync,
{
	/// The processor type this factory produces.
	type Processor: EventProcessor;

	/// Creates a processor for the partition described by `key`.
	fn create(&self, key: &LeaseKey) -> Self::Processor;
}
