//! Lease identity helpers (event hub / consumer group / partition).

// self
use crate::{
	_prelude::*,
	ids::{ConsumerGroupId, EventHubId, PartitionId},
};

/// Identifies exactly one lease: an (event hub, consumer group, partition) tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
	/// Event hub the partition belongs to.
	pub event_hub: EventHubId,
	/// Consumer group sharing this partition set.
	pub consumer_group: ConsumerGroupId,
	/// Partition identifier.
	pub partition: PartitionId,
}
impl LeaseKey {
	/// Creates a key for the provided event hub, consumer group, and partition.
	pub fn new(
		event_hub: EventHubId,
		consumer_group: ConsumerGroupId,
		partition: PartitionId,
	) -> Self {
		Self { event_hub, consumer_group, partition }
	}
}
impl Display for LeaseKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}/{}", self.event_hub, self.consumer_group, self.partition)
	}
}
