//! Fan-out dispatch of CAN frames to many independent consumers.
//!
//! A single [`Dispatcher`] owns the CAN socket. Everything else that needs to
//! see incoming frames (the SDO client's response wait, the NMT heartbeat
//! consumer, the EMCY consumer, RPDO reception, LSS...) subscribes to a
//! filtered stream instead of reading the socket directly, so only one task
//! ever calls `recv()` on the underlying socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use can_socket::tokio::CanSocket;
use can_socket::{CanFilter, CanFrame};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A received frame together with the monotonic instant it was received at.
pub type TimestampedFrame = (CanFrame, Instant);

/// The routing table: which subscribers want which frames.
///
/// Kept separate from the socket so the fan-out logic can be exercised by tests
/// with [`Router::route`] alone, without a real CAN interface.
#[derive(Default)]
struct Router {
	subscriptions: Mutex<Vec<Slot>>,
}

struct Slot {
	filter: CanFilter,
	tx: mpsc::Sender<TimestampedFrame>,
}

impl Router {
	fn subscribe(&self, filter: CanFilter, queue_capacity: usize) -> Subscription {
		let (tx, rx) = mpsc::channel(queue_capacity);
		self.subscriptions.lock().unwrap().push(Slot { filter, tx });
		Subscription { rx }
	}

	fn route(&self, frame: CanFrame, timestamp: Instant) {
		let mut subscriptions = self.subscriptions.lock().unwrap();
		subscriptions.retain(|slot| {
			if slot.tx.is_closed() {
				return false;
			}
			if !slot.filter.test(&frame) {
				return true;
			}
			if let Err(mpsc::error::TrySendError::Full(_)) = slot.tx.try_send((frame, timestamp)) {
				log::warn!("dropping frame for subscriber, queue is full: {frame:?}");
			}
			true
		});
	}
}

/// Shared handle to the dispatcher.
///
/// Cloning a `Dispatcher` is cheap; all clones share the same socket and subscription table.
#[derive(Clone)]
pub struct Dispatcher {
	inner: Arc<Inner>,
}

struct Inner {
	socket: CanSocket,
	router: Router,
}

/// A filtered stream of incoming CAN frames, each tagged with its reception timestamp.
///
/// Dropping the subscription removes it from the dispatcher's table; no unsubscribe call needed.
pub struct Subscription {
	rx: mpsc::Receiver<TimestampedFrame>,
}

impl Dispatcher {
	/// Wrap a CAN socket in a dispatcher.
	pub fn new(socket: CanSocket) -> Self {
		Self {
			inner: Arc::new(Inner {
				socket,
				router: Router::default(),
			}),
		}
	}

	/// Send a raw CAN frame.
	pub async fn send(&self, frame: &CanFrame) -> std::io::Result<()> {
		self.inner.socket.send(frame).await
	}

	/// Subscribe to frames matching `filter`.
	///
	/// `queue_capacity` bounds how many unconsumed frames are buffered before new ones are
	/// dropped (and logged at `warn`); a slow consumer never blocks the pump loop.
	pub fn subscribe(&self, filter: CanFilter, queue_capacity: usize) -> Subscription {
		self.inner.router.subscribe(filter, queue_capacity)
	}

	/// Run the receive pump until the socket errors out.
	///
	/// This must be polled continuously (e.g. spawned as its own task) for any subscription,
	/// or the one-shot request/response helpers in this crate, to ever see a frame.
	pub async fn run(&self) -> std::io::Result<()> {
		loop {
			let frame = self.inner.socket.recv().await?;
			self.inner.router.route(frame, Instant::now());
		}
	}

	/// Inject a frame as if it had just been received, tagged with `timestamp`.
	///
	/// This is the test-injection hook: it drives the exact same routing path as [`Self::run`],
	/// so tests can exercise subscribers (and anything built on top of them) without a real CAN
	/// interface.
	pub fn notify(&self, cob_id: impl Into<can_socket::CanId>, payload: &[u8], timestamp: Instant) {
		let frame = CanFrame::new(cob_id, payload);
		self.inner.router.route(frame, timestamp);
	}

	/// Spawn a task that sends a frame produced by `make_frame` at a fixed interval.
	///
	/// Returns a handle whose `stop()` cancels the task and waits for it to actually exit,
	/// so no frame is ever sent after `stop()` returns.
	pub fn add_periodic<F>(&self, period: Duration, mut make_frame: F) -> PeriodicTask
	where
		F: FnMut() -> CanFrame + Send + 'static,
	{
		let dispatcher = self.clone();
		let (stop_tx, mut stop_rx) = oneshot::channel();
		let join = tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			loop {
				tokio::select! {
					biased;
					_ = &mut stop_rx => return,
					_ = interval.tick() => {
						let frame = make_frame();
						if dispatcher.send(&frame).await.is_err() {
							return;
						}
					}
				}
			}
		});
		PeriodicTask {
			stop: Some(stop_tx),
			join: Some(join),
		}
	}
}

impl Subscription {
	/// Wait for the next matching frame, forever, along with its reception timestamp.
	pub async fn recv(&mut self) -> Option<TimestampedFrame> {
		self.rx.recv().await
	}

	/// Wait for the next matching frame, up to `timeout`.
	pub async fn recv_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<TimestampedFrame>> {
		self.recv_deadline(Instant::now() + timeout).await
	}

	/// Wait for the next matching frame, up to an absolute `deadline`.
	pub async fn recv_deadline(&mut self, deadline: Instant) -> std::io::Result<Option<TimestampedFrame>> {
		if Instant::now() >= deadline {
			return Ok(None);
		}
		match tokio::time::timeout_at(deadline, self.rx.recv()).await {
			Ok(frame) => Ok(frame),
			Err(_elapsed) => Ok(None),
		}
	}
}

/// Handle to a periodic send task spawned by [`Dispatcher::add_periodic`].
pub struct PeriodicTask {
	stop: Option<oneshot::Sender<()>>,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl PeriodicTask {
	/// Stop the periodic task and wait for it to exit.
	///
	/// After this returns, no further frame from this task will be sent.
	pub async fn stop(mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
		if let Some(join) = self.join.take() {
			let _ = join.await;
		}
	}
}

impl Drop for PeriodicTask {
	fn drop(&mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use can_socket::StandardId;

	fn frame(id: u16, data: &[u8]) -> CanFrame {
		CanFrame::new(StandardId::new(id).unwrap(), data)
	}

	#[tokio::test]
	async fn subscription_receives_matching_frames_only() {
		let router = Router::default();

		let mut heartbeat = router.subscribe(CanFilter::new(StandardId::new(0x700 + 5).unwrap().into()).match_exact_id(), 4);
		let mut other = router.subscribe(CanFilter::new(StandardId::new(0x700 + 6).unwrap().into()).match_exact_id(), 4);

		router.route(frame(0x700 + 5, &[0x05]), Instant::now());

		let (received, _timestamp) = heartbeat.recv().await.unwrap();
		assert_eq!(received.data().unwrap().as_slice(), &[0x05]);
		assert!(other.recv_timeout(Duration::from_millis(10)).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn full_queue_drops_newest_frame_instead_of_blocking() {
		let router = Router::default();
		let mut sub = router.subscribe(CanFilter::new(StandardId::new(0x181).unwrap().into()).match_exact_id(), 1);

		router.route(frame(0x181, &[1]), Instant::now());
		router.route(frame(0x181, &[2]), Instant::now()); // dropped, queue capacity is 1

		assert_eq!(sub.recv().await.unwrap().0.data().unwrap().as_slice(), &[1]);
		assert!(sub.recv_timeout(Duration::from_millis(10)).await.unwrap().is_none());
	}
}
