//! A distributed partition-coordination engine for partitioned event-stream consumers — fenced
//! CAS leases, a rebalancing control loop, and a correlated request/response channel.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod host;
pub mod ids;
pub mod lease;
pub mod lease_manager;
pub mod manager;
pub mod obs;
pub mod processor;
pub mod pump;
pub mod receiver;
pub mod store;

#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::StartingPosition,
		error::Error,
		ids::PartitionId,
		processor::{CloseReason, EventProcessor, EventProcessorFactory, PartitionContext},
		receiver::{Event, Receiver, ReceiverFactory},
	};

	/// A [`Receiver`] that never yields events, used to exercise pump lifecycle without a real
	/// broker backend.
	pub struct IdleReceiver;
	impl Receiver for IdleReceiver {
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

	/// A [`ReceiverFactory`] that always opens an [`IdleReceiver`].
	pub struct IdleReceiverFactory;
	impl ReceiverFactory for IdleReceiverFactory {
		type Receiver = IdleReceiver;

		fn open<'a>(
			&'a self,
			_partition: &'a PartitionId,
			_starting_position: &'a StartingPosition,
			_prefetch_count: u32,
			_epoch: Option<u64>,
		) -> Pin<Box<dyn Future<Output = Result<Self::Receiver, Error>> + Send + 'a>> {
			Box::pin(async { Ok(IdleReceiver) })
		}
	}

	/// An [`EventProcessor`] that records every lifecycle call it receives.
	#[derive(Default)]
	pub struct RecordingProcessor {
		/// `true` once `open` has been called.
		pub opened: bool,
		/// Number of batches delivered to `on_events`.
		pub batches: usize,
		/// The reason `close` was called with, if it has been.
		pub closed_with: Option<CloseReason>,
	}
	impl EventProcessor for RecordingProcessor {
		fn open<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
			self.opened = true;

			Box::pin(async { Ok(()) })
		}

		fn on_events<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
			_batch: Vec<Event>,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
			self.batches += 1;

			Box::pin(async { Ok(()) })
		}

		fn close<'a>(
			&'a mut self,
			_ctx: &'a PartitionContext,
			reason: CloseReason,
		) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
			self.closed_with = Some(reason);

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

	/// A factory that always returns a fresh [`RecordingProcessor`].
	pub struct RecordingProcessorFactory;
	impl EventProcessorFactory for RecordingProcessorFactory {
		type Processor = RecordingProcessor;

		fn create(&self, _key: &crate::lease::key::LeaseKey) -> Self::Processor {
			RecordingProcessor::default()
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeSet, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};

	pub use crate::error::{Error, Result};
}
