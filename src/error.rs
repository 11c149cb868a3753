//! Coordinator-wide error types shared across the lease store, pumps, and manager.

// self
use crate::_prelude::*;

/// Coordinator-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
	/// Transient failure; safe to retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// A compare-and-set write lost a race to a concurrent writer.
	#[error("Lease write conflicted with a concurrent writer.")]
	Conflict,
	/// The lease was lost (expired or stolen) before the in-flight operation completed.
	#[error("Lease for {key} was lost before the operation completed.")]
	LeaseLost {
		/// Key of the lease that was lost.
		key: String,
	},
	/// The fencing token presented by the caller was superseded by a newer epoch.
	#[error("Fencing token for {key} was superseded by a newer epoch.")]
	Fenced {
		/// Key of the lease whose token was superseded.
		key: String,
	},
	/// The user-supplied [`EventProcessor`](crate::processor::EventProcessor) returned an error.
	#[error("Event processor reported a failure.")]
	ProcessorFailure(#[source] BoxError),
	/// A peer violated the request/response channel protocol in a way that cannot be recovered.
	#[error("Protocol violation: {0}")]
	ProtocolFatal(String),
	/// The operation was cancelled before completion.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// The control loop's first scan/acquire pass did not complete within `startup_scan_delay`.
	#[error("Initial scan did not complete within the configured startup_scan_delay.")]
	StartupTimedOut,
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Configuration and validation failures raised when building a [`PartitionManagerOptions`](crate::config::PartitionManagerOptions).
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
	/// `renew_interval` must leave headroom before the lease expires.
	#[error(
		"renew_interval ({renew_interval:?}) must be strictly less than lease_duration ({lease_duration:?})."
	)]
	RenewNotBeforeLeaseDuration {
		/// Configured renew interval.
		renew_interval: Duration,
		/// Configured lease duration.
		lease_duration: Duration,
	},
	/// `max_steals_per_tick` of zero would prevent rebalancing from ever progressing.
	#[error("max_steals_per_tick must be at least 1.")]
	MaxStealsPerTickZero,
	/// `scan_interval` must be a positive duration.
	#[error("scan_interval must be positive.")]
	NonPositiveScanInterval,
	/// `lease_duration` must be a positive duration.
	#[error("lease_duration must be positive.")]
	NonPositiveLeaseDuration,
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// The lease store reported a recoverable failure.
	#[error("Lease store operation failed transiently: {message}.")]
	Store {
		/// Backend-supplied message summarizing the failure.
		message: String,
	},
	/// I/O failure surfaced by a file-backed store.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
impl From<crate::store::StoreError> for Error {
	fn from(e: crate::store::StoreError) -> Self {
		use crate::store::StoreError;

		match e {
			StoreError::Transient { message } => Error::Transient(TransientError::Store { message }),
			StoreError::Conflict => Error::Conflict,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_conflict_maps_to_error_conflict() {
		let error: Error = StoreError::Conflict.into();

		assert!(matches!(error, Error::Conflict));
	}

	#[test]
	fn store_transient_wraps_message() {
		let error: Error = StoreError::Transient { message: "unreachable".into() }.into();

		assert!(error.to_string().contains("unreachable"));
		assert!(matches!(error, Error::Transient(TransientError::Store { .. })));
	}

	#[test]
	fn config_error_reports_offending_durations() {
		let error = ConfigError::RenewNotBeforeLeaseDuration {
			renew_interval: Duration::seconds(30),
			lease_duration: Duration::seconds(20),
		};

		assert!(error.to_string().contains("30s") || error.to_string().contains("30"));
	}
}
