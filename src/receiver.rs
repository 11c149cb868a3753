//! Broker-receive contract consumed by [`PartitionPump`](crate::pump::PartitionPump).
//!
//! The broker client itself — connection, AMQP framing, prefetch — is out of scope (§1); the
//! core only depends on this factory/receiver pair.

// self
use crate::{_prelude::*, config::StartingPosition, error::Error, ids::PartitionId};

/// A single event read from a partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
	/// Backend-defined offset of this event within its partition.
	pub offset: String,
	/// Broker-assigned sequence number, used to detect replay after resumption.
	pub sequence_number: i64,
	/// Opaque event payload.
	pub body: Vec<u8>,
}

/// An open read cursor on one partition.
pub trait Receiver
where
	Self: Send,
{
	/// Awaits up to `max` events, or until `timeout` elapses, whichever comes first. Returns an
	/// empty vector on timeout.
	fn receive(
		&mut self,
		max: usize,
		timeout: Duration,
	) -> Pin<Box<dyn Future<Output = Result<Vec<Event>, Error>> + Send + '_>>;

	/// Closes the underlying broker link.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// Opens [`Receiver`]s for the pump, threading the lease epoch through as the broker-side
/// receiver epoch where the backend supports it (§9 open question).
pub trait ReceiverFactory
where
	Self: Send + Sync,
{
	/// Concrete receiver type this factory produces.
	type Receiver: Receiver;

	/// Opens a receiver on `partition` starting from `starting_position`, requesting
	/// `prefetch_count` credits and, if the backend supports receiver epochs, fencing older
	/// receivers with `epoch`.
	fn open<'a>(
		&'a self,
		partition: &'a PartitionId,
		starting_position: &'a StartingPosition,
		prefetch_count: u32,
		epoch: Option<u64>,
	) -> Pin<Box<dyn Future<Output = Result<Self::Receiver, Error>> + Send + 'a>>;
}
