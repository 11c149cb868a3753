//! Builder-style configuration for [`PartitionManager`](crate::manager::PartitionManager) and
//! [`Host`](crate::host::Host).

// self
use crate::{_prelude::*, error::ConfigError};

/// Where a fresh pump should start reading a partition when no checkpoint exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StartingPosition {
	/// Start of the partition's retained event log.
	Start,
	/// End of the partition (only newly published events are delivered).
	End,
	/// A specific backend-defined offset.
	Offset(String),
	/// A specific broker sequence number.
	Sequence(i64),
	/// The first event at or after the given wall-clock instant.
	Time(OffsetDateTime),
}

/// Tunable timing, batching, and startup-position parameters for a [`Host`](crate::host::Host).
///
/// Construct with [`PartitionManagerOptions::builder`], chain `with_*` setters, then call
/// [`PartitionManagerOptionsBuilder::build`] — invalid combinations (e.g. `renew_interval`
/// not leaving headroom before `lease_duration`) are rejected synchronously with a
/// [`ConfigError`], never surfaced as a runtime failure.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionManagerOptions {
	/// TTL written on every successful acquire/renew.
	pub lease_duration: Duration,
	/// Cadence at which each owned partition's lease is renewed.
	pub renew_interval: Duration,
	/// Cadence of the partition-manager control-loop tick.
	pub scan_interval: Duration,
	/// Cap on how long the first scan may be delayed after `register`.
	pub startup_scan_delay: Duration,
	/// Maximum number of events delivered to `onEvents` per batch.
	pub max_batch_size: usize,
	/// How long a pump's receive call waits before yielding an (possibly empty) batch.
	pub receive_timeout: Duration,
	/// Prefetch credit requested from the `ReceiverFactory`.
	pub prefetch_count: u32,
	/// Whether a zero-event batch is still delivered to `onEvents` after `receive_timeout`.
	pub invoke_on_timeout: bool,
	/// Starting position used when a partition has no committed checkpoint.
	pub initial_position: StartingPosition,
	/// Wall-clock bound `unregister` waits for pumps to drain before abandoning them.
	pub unregister_drain_timeout: Duration,
	/// Maximum number of steal attempts per control-loop tick (damps oscillation).
	pub max_steals_per_tick: u32,
}
impl Default for PartitionManagerOptions {
	fn default() -> Self {
		Self {
			lease_duration: Duration::seconds(30),
			renew_interval: Duration::seconds(10),
			scan_interval: Duration::seconds(10),
			startup_scan_delay: Duration::seconds(30),
			max_batch_size: 10,
			receive_timeout: Duration::seconds(60),
			prefetch_count: 300,
			invoke_on_timeout: false,
			initial_position: StartingPosition::Start,
			unregister_drain_timeout: Duration::minutes(10),
			max_steals_per_tick: 1,
		}
	}
}
impl PartitionManagerOptions {
	/// Starts building options from the documented defaults.
	pub fn builder() -> PartitionManagerOptionsBuilder {
		PartitionManagerOptionsBuilder { inner: Self::default() }
	}
}

/// Builder returned by [`PartitionManagerOptions::builder`].
#[derive(Clone, Debug)]
pub struct PartitionManagerOptionsBuilder {
	inner: PartitionManagerOptions,
}
impl PartitionManagerOptionsBuilder {
	/// Overrides `lease_duration`.
	pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
		self.inner.lease_duration = lease_duration;

		self
	}

	/// Overrides `renew_interval`.
	pub fn with_renew_interval(mut self, renew_interval: Duration) -> Self {
		self.inner.renew_interval = renew_interval;

		self
	}

	/// Overrides `scan_interval`.
	pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
		self.inner.scan_interval = scan_interval;

		self
	}

	/// Overrides `startup_scan_delay`.
	pub fn with_startup_scan_delay(mut self, startup_scan_delay: Duration) -> Self {
		self.inner.startup_scan_delay = startup_scan_delay;

		self
	}

	/// Overrides `max_batch_size`.
	pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
		self.inner.max_batch_size = max_batch_size;

		self
	}

	/// Overrides `receive_timeout`.
	pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
		self.inner.receive_timeout = receive_timeout;

		self
	}

	/// Overrides `prefetch_count`.
	pub fn with_prefetch_count(mut self, prefetch_count: u32) -> Self {
		self.inner.prefetch_count = prefetch_count;

		self
	}

	/// Overrides `invoke_on_timeout`.
	pub fn with_invoke_on_timeout(mut self, invoke_on_timeout: bool) -> Self {
		self.inner.invoke_on_timeout = invoke_on_timeout;

		self
	}

	/// Overrides `initial_position`.
	pub fn with_initial_position(mut self, initial_position: StartingPosition) -> Self {
		self.inner.initial_position = initial_position;

		self
	}

	/// Overrides `unregister_drain_timeout`.
	pub fn with_unregister_drain_timeout(mut self, unregister_drain_timeout: Duration) -> Self {
		self.inner.unregister_drain_timeout = unregister_drain_timeout;

		self
	}

	/// Overrides `max_steals_per_tick`.
	pub fn with_max_steals_per_tick(mut self, max_steals_per_tick: u32) -> Self {
		self.inner.max_steals_per_tick = max_steals_per_tick;

		self
	}

	/// Validates the accumulated options and returns them, or a [`ConfigError`] describing the
	/// first invalid combination found.
	pub fn build(self) -> Result<PartitionManagerOptions, ConfigError> {
		let options = self.inner;

		if options.lease_duration <= Duration::ZERO {
			return Err(ConfigError::NonPositiveLeaseDuration);
		}
		if options.scan_interval <= Duration::ZERO {
			return Err(ConfigError::NonPositiveScanInterval);
		}
		if options.renew_interval >= options.lease_duration {
			return Err(ConfigError::RenewNotBeforeLeaseDuration {
				renew_interval: options.renew_interval,
				lease_duration: options.lease_duration,
			});
		}
		if options.max_steals_per_tick == 0 {
			return Err(ConfigError::MaxStealsPerTickZero);
		}

		Ok(options)
	}
}
