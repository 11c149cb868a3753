//! Optional observability helpers for the coordination control loop.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `partition_coordinator.stage` with the
//!   `stage` (lifecycle step) and `detail` (call site) fields.
//! - Enable `metrics` to increment the `partition_coordinator_stage_total` counter for every
//!   attempt/success/failure, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Coordination lifecycle steps observed by the manager and pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
	/// Scanning the store to discover the current lease layout.
	Scan,
	/// Acquiring an unowned or expired lease.
	Acquire,
	/// Renewing a held lease before it expires.
	Renew,
	/// Releasing a held lease (graceful shutdown or rebalance handoff).
	Release,
	/// Stealing an expired lease from a host that failed to renew it.
	Steal,
	/// Writing a checkpoint for a partition.
	Checkpoint,
}
impl Stage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Stage::Scan => "scan",
			Stage::Acquire => "acquire",
			Stage::Renew => "renew",
			Stage::Release => "release",
			Stage::Steal => "steal",
			Stage::Checkpoint => "checkpoint",
		}
	}
}
impl Display for Stage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to a coordination step.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
