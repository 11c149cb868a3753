//! Correlated request/reply RPC multiplexed over a pair of unidirectional links.
//!
//! Used for out-of-band control operations (metadata lookups, token refresh) that do not fit
//! the partition-pump data path. The wire transport itself — AMQP framing, link credit — is out
//! of scope (§1); this module only depends on the [`SenderLink`]/[`ReceiverLink`] contracts.

// std
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
// crates.io
use rand::{RngCore, rngs::StdRng};
use tokio::{sync::mpsc, task::JoinHandle};
// self
use crate::{_prelude::*, error::Error};

/// A correlated request/reply message exchanged over a [`RequestResponseChannel`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
	/// Set by the channel when sending a `request`; must be `None` when passed in.
	pub id: Option<String>,
	/// Set by the channel when sending a `request`; must be `None` when passed in.
	pub reply_to: Option<String>,
	/// Set by the remote peer on a reply; matched against the issuing `request`'s id.
	pub correlation_id: Option<String>,
	/// Opaque message payload.
	pub body: Vec<u8>,
}

/// Outbound half of the channel's underlying session.
pub trait SenderLink
where
	Self: Send,
{
	/// Resolves once the remote end of this link reaches the Active state.
	fn activate(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

	/// Sends `message` on the wire.
	fn send(&mut self, message: Message) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

	/// Initiates a local close of this link.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// Inbound half of the channel's underlying session.
pub trait ReceiverLink
where
	Self: Send,
{
	/// Resolves once the remote end of this link reaches the Active state.
	fn activate(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

	/// Grants `credit` additional messages of flow control to the remote sender.
	fn flow(&mut self, credit: u32) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

	/// Awaits the next inbound message, or `Ok(None)` if the remote closed gracefully.
	fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Message>, Error>> + Send + '_>>;

	/// Initiates a local close of this link.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// Observed lifecycle state of a [`RequestResponseChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
	/// Activation of one or both links has not yet completed.
	Opening,
	/// Both links' local and remote endpoints are Active.
	Opened,
	/// A local or remote close has started but not yet finished on both links.
	Closing,
	/// Both links have reached Closed.
	Closed,
}

/// Two-participant refcount that fires exactly once, on the call that decrements it to zero.
///
/// Models "both remote ends reached Active" / "both links reached Closed" without requiring the
/// two completions to be observed in the same `await` point.
struct PairedLatch {
	remaining: AtomicU8,
}
impl PairedLatch {
	fn new() -> Self {
		Self { remaining: AtomicU8::new(2) }
	}

	/// Records one arrival. Returns `true` exactly once: on the call that brings the count to 0.
	fn arrive(&self) -> bool {
		self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
	}
}

enum Command {
	Request { message: Message, on_response: Box<dyn FnOnce(Result<Message, Error>) + Send> },
	Close { on_graceful: Box<dyn FnOnce() + Send> },
}

/// Multiplexes correlated request/reply exchanges over one sender link and one receiver link.
///
/// `request`'s in-flight table (`requestId → onResponse`) lives entirely inside the dispatcher
/// task spawned by [`RequestResponseChannel::open`] and is touched only from that task — no lock
/// guards the table, per the single-threaded-dispatcher design (§4.F).
pub struct RequestResponseChannel {
	reply_to: String,
	state: Arc<RwLock<ChannelState>>,
	commands: mpsc::UnboundedSender<Command>,
	dispatcher: JoinHandle<()>,
}
impl RequestResponseChannel {
	/// Opens `sender`/`receiver`, spawning the dispatcher task that drives the entire lifecycle.
	///
	/// `rng` must be the caller's per-host, cryptographically-seeded generator — never a
	/// process-wide mutable counter (see REDESIGN FLAGS) — since the reply-to address is drawn
	/// from it once, here, for this channel's lifetime.
	pub fn open<S, R>(
		sender: S,
		receiver: R,
		rng: &mut StdRng,
		on_open: impl FnOnce(Result<(), Error>) + Send + 'static,
		on_close: impl FnOnce() + Send + 'static,
	) -> Self
	where
		S: SenderLink + 'static,
		R: ReceiverLink + 'static,
	{
		let reply_to = format!("{:016x}", rng.next_u64());
		let state = Arc::new(RwLock::new(ChannelState::Opening));
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let dispatcher = tokio::spawn(run_dispatcher(
			sender,
			receiver,
			reply_to.clone(),
			state.clone(),
			commands_rx,
			on_open,
			on_close,
		));

		Self { reply_to, state, commands: commands_tx, dispatcher }
	}

	/// Private reply-to address this channel's replies are routed to.
	pub fn reply_to(&self) -> &str {
		&self.reply_to
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ChannelState {
		*self.state.read()
	}

	/// Issues a correlated request. `message.id` and `message.reply_to` must be `None`;
	/// `on_response` is invoked exactly once, either with the matching reply or an error.
	pub fn request(
		&self,
		message: Message,
		on_response: impl FnOnce(Result<Message, Error>) + Send + 'static,
	) -> Result<(), Error> {
		if message.id.is_some() || message.reply_to.is_some() {
			return Err(Error::ProtocolFatal(
				"request message must not pre-set id or reply_to".into(),
			));
		}

		self.commands
			.send(Command::Request { message, on_response: Box::new(on_response) })
			.map_err(|_| Error::Cancelled)
	}

	/// Initiates a graceful close; `on_graceful` fires once both local closes complete.
	pub fn close(&self, on_graceful: impl FnOnce() + Send + 'static) -> Result<(), Error> {
		self.commands
			.send(Command::Close { on_graceful: Box::new(on_graceful) })
			.map_err(|_| Error::Cancelled)
	}

	/// Aborts the dispatcher task without waiting for a graceful close. Used when a host shuts
	/// down its whole task group and channels need not drain individually.
	pub fn abort(&self) {
		self.dispatcher.abort();
	}
}

async fn run_dispatcher<S, R>(
	mut sender: S,
	mut receiver: R,
	reply_to: String,
	state: Arc<RwLock<ChannelState>>,
	mut commands: mpsc::UnboundedReceiver<Command>,
	on_open: impl FnOnce(Result<(), Error>) + Send + 'static,
	on_close: impl FnOnce() + Send + 'static,
) where
	S: SenderLink,
	R: ReceiverLink,
{
	let open_latch = PairedLatch::new();
	let (sender_opened, receiver_opened) = tokio::join!(sender.activate(), receiver.activate());

	open_latch.arrive();
	open_latch.arrive();

	let open_result = sender_opened.and(receiver_opened);
	let opened = open_result.is_ok();

	*state.write() = if opened { ChannelState::Opened } else { ChannelState::Closed };
	on_open(open_result);

	if !opened {
		on_close();
		return;
	}

	let mut inflight: HashMap<String, Box<dyn FnOnce(Result<Message, Error>) + Send>> =
		HashMap::new();
	let next_request_id = AtomicU64::new(1);

	loop {
		tokio::select! {
			command = commands.recv() => match command {
				Some(Command::Request { mut message, on_response }) => {
					let request_id = next_request_id.fetch_add(1, Ordering::Relaxed).to_string();

					message.id = Some(request_id.clone());
					message.reply_to = Some(reply_to.clone());

					if let Err(e) = receiver.flow(1).await {
						on_response(Err(e));
						continue;
					}
					if let Err(e) = sender.send(message).await {
						on_response(Err(e));
						continue;
					}

					inflight.insert(request_id, on_response);
				},
				Some(Command::Close { on_graceful }) => {
					*state.write() = ChannelState::Closing;

					let close_latch = PairedLatch::new();

					let _ = sender.close().await;
					close_latch.arrive();
					let _ = receiver.close().await;
					close_latch.arrive();

					*state.write() = ChannelState::Closed;
					fail_all(&mut inflight, || Error::Cancelled);
					on_graceful();
					on_close();

					return;
				},
				None => break,
			},
			received = receiver.recv() => match received {
				Ok(Some(message)) => {
					if let Some(correlation_id) = &message.correlation_id {
						if let Some(on_response) = inflight.remove(correlation_id) {
							on_response(Ok(message));
						}
					}
				},
				Ok(None) => break,
				Err(_) => {
					*state.write() = ChannelState::Closed;
					fail_all(&mut inflight, || {
						Error::ProtocolFatal("receiver link failed".into())
					});
					on_close();

					return;
				},
			},
		}
	}

	*state.write() = ChannelState::Closed;
	fail_all(&mut inflight, || Error::Cancelled);
	on_close();
}

fn fail_all(
	inflight: &mut HashMap<String, Box<dyn FnOnce(Result<Message, Error>) + Send>>,
	make_error: impl Fn() -> Error,
) {
	for (_, on_response) in inflight.drain() {
		on_response(Err(make_error()));
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicBool;
	// crates.io
	use rand::SeedableRng;
	use tokio::sync::oneshot;
	// self
	use super::*;

	#[test]
	fn paired_latch_fires_exactly_once_on_second_arrival() {
		let latch = PairedLatch::new();

		assert!(!latch.arrive());
		assert!(latch.arrive());
	}

	#[derive(Default)]
	struct MockSender {
		sent: Vec<Message>,
	}
	impl SenderLink for MockSender {
		fn activate(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}

		fn send(
			&mut self,
			message: Message,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			self.sent.push(message);

			Box::pin(async { Ok(()) })
		}

		fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}
	}

	#[derive(Default)]
	struct MockReceiver {
		inbox: std::collections::VecDeque<Message>,
	}
	impl ReceiverLink for MockReceiver {
		fn activate(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}

		fn flow(
			&mut self,
			_credit: u32,
		) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}

		fn recv(
			&mut self,
		) -> Pin<Box<dyn Future<Output = Result<Option<Message>, Error>> + Send + '_>> {
			Box::pin(async { Ok(self.inbox.pop_front()) })
		}

		fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
			Box::pin(async { Ok(()) })
		}
	}

	fn rng() -> StdRng {
		StdRng::from_rng(&mut rand::rng())
	}

	#[tokio::test]
	async fn open_then_close_fires_both_callbacks_exactly_once() {
		let opened = Arc::new(AtomicBool::new(false));
		let closed = Arc::new(AtomicBool::new(false));
		let opened_cb = opened.clone();
		let closed_cb = closed.clone();
		let channel = RequestResponseChannel::open(
			MockSender::default(),
			MockReceiver::default(),
			&mut rng(),
			move |result| {
				assert!(result.is_ok());
				opened_cb.store(true, Ordering::SeqCst);
			},
			move || closed_cb.store(true, Ordering::SeqCst),
		);

		let (tx, rx) = oneshot::channel();

		channel.close(move || { let _ = tx.send(()); }).expect("close should be accepted");
		rx.await.expect("graceful close callback should fire");

		assert!(opened.load(Ordering::SeqCst));
		assert!(closed.load(Ordering::SeqCst));
		assert_eq!(channel.state(), ChannelState::Closed);
	}

	#[tokio::test]
	async fn request_without_reply_resolves_with_cancelled_after_close() {
		let channel = RequestResponseChannel::open(
			MockSender::default(),
			MockReceiver::default(),
			&mut rng(),
			|_| {},
			|| {},
		);
		let (tx, rx) = oneshot::channel();

		channel
			.request(Message::default(), move |result| {
				let _ = tx.send(result);
			})
			.expect("request should be accepted while open");

		let (done_tx, done_rx) = oneshot::channel();

		channel.close(move || { let _ = done_tx.send(()); }).expect("close should be accepted");
		done_rx.await.expect("graceful close callback should fire");

		let result = rx.await.expect("pending request must resolve exactly once on close");

		assert!(result.is_err());
	}
}
