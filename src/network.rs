//! Top-level facade tying the dispatcher, the background consumers, and the request/response
//! SDO/NMT/LSS clients together into a single handle for a CANopen network.

use std::sync::Arc;
use std::time::Duration;

use can_socket::tokio::CanSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, PeriodicTask};
use crate::node::Node;
use crate::{emcy, lss, nmt, pdo, scanner, sdo, sync};
use crate::CanOpenSocket;

/// A handle to a CANopen network.
///
/// Internally this holds two independent CAN sockets bound to the same interface: one owned
/// exclusively by a [`CanOpenSocket`] for request/response exchanges (SDO, NMT, LSS), guarded by
/// a mutex so concurrent [`Node`] handles serialize their transfers; and one owned by a
/// [`Dispatcher`] whose background pump task fans received frames out to the heartbeat consumer,
/// the EMCY consumer, and any other subscriber, mirroring spec.md's "single socket owner, many
/// subscribers" receive-thread model for the passive side while keeping the request/response side
/// exactly as simple as the teacher's original `CanOpenSocket`.
#[allow(missing_debug_implementations)]
pub struct Network {
	bus: Mutex<CanOpenSocket>,
	dispatcher: Dispatcher,
	sdo: sdo::SdoAddress,
	heartbeats: Arc<nmt::HeartbeatConsumer>,
	emcy: Arc<emcy::EmcyConsumer>,
	rpdo: Arc<pdo::RpdoConsumer>,
	scanner: Arc<scanner::Scanner>,
	lss: lss::LssMaster,
	background: Vec<JoinHandle<()>>,
}

impl Network {
	/// Open a network using the standard SDO addressing scheme (`0x600`/`0x580`).
	///
	/// `request_socket` is used for SDO/NMT/LSS request-response exchanges; `dispatch_socket`
	/// feeds the background heartbeat and EMCY consumers. Both must be bound to the same CAN
	/// interface.
	pub fn new(request_socket: CanSocket, dispatch_socket: CanSocket) -> Self {
		Self::with_sdo_address(request_socket, dispatch_socket, sdo::SdoAddress::standard())
	}

	/// Open a network with a non-standard SDO addressing scheme.
	pub fn with_sdo_address(request_socket: CanSocket, dispatch_socket: CanSocket, sdo: sdo::SdoAddress) -> Self {
		let bus = Mutex::new(CanOpenSocket::new(request_socket));
		let dispatcher = Dispatcher::new(dispatch_socket);
		let heartbeats = Arc::new(nmt::HeartbeatConsumer::new());
		let emcy = Arc::new(emcy::EmcyConsumer::new());
		let rpdo = Arc::new(pdo::RpdoConsumer::new());
		let scanner = Arc::new(scanner::Scanner::new());
		let lss = lss::LssMaster::new(dispatcher.clone());

		let mut background = Vec::new();
		background.push(tokio::spawn({
			let dispatcher = dispatcher.clone();
			async move {
				if let Err(e) = dispatcher.run().await {
					log::warn!("dispatcher pump task exited: {e}");
				}
			}
		}));
		background.push(tokio::spawn({
			let heartbeats = Arc::clone(&heartbeats);
			let dispatcher = dispatcher.clone();
			async move { heartbeats.run(&dispatcher, Duration::from_secs(1)).await }
		}));
		background.push(tokio::spawn({
			let emcy = Arc::clone(&emcy);
			let dispatcher = dispatcher.clone();
			async move { emcy.run(&dispatcher).await }
		}));
		background.push(tokio::spawn({
			let rpdo = Arc::clone(&rpdo);
			let dispatcher = dispatcher.clone();
			async move { rpdo.run(&dispatcher).await }
		}));
		background.push(tokio::spawn({
			let scanner = Arc::clone(&scanner);
			let dispatcher = dispatcher.clone();
			async move { scanner.run(&dispatcher).await }
		}));

		Self { bus, dispatcher, sdo, heartbeats, emcy, rpdo, scanner, lss, background }
	}

	/// Get a handle to a single node on the network.
	pub fn node(&self, node_id: u8) -> Node<'_> {
		Node::new(self, node_id)
	}

	/// The SDO addressing scheme used for request/response exchanges.
	pub fn sdo_address(&self) -> sdo::SdoAddress {
		self.sdo
	}

	/// The shared dispatcher, for subscribing to raw frames directly (e.g. for RPDO reception).
	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// The heartbeat/node-guarding consumer.
	pub fn heartbeats(&self) -> &nmt::HeartbeatConsumer {
		&self.heartbeats
	}

	/// The EMCY consumer.
	pub fn emcy(&self) -> &emcy::EmcyConsumer {
		&self.emcy
	}

	/// The live RPDO reception consumer.
	pub fn rpdo(&self) -> &pdo::RpdoConsumer {
		&self.rpdo
	}

	/// The LSS master.
	pub fn lss(&self) -> &lss::LssMaster {
		&self.lss
	}

	/// The node IDs observed passively on the bus so far.
	pub fn discovered_nodes(&self) -> Vec<u8> {
		self.scanner.discovered()
	}

	/// Actively probe node IDs 1..=127 by attempting to read object 0x1000:0 from each.
	pub async fn scan(&self, timeout: Duration) -> Vec<u8> {
		let mut bus = self.bus.lock().await;
		self.scanner.search(&mut bus, timeout).await
	}

	/// Send a SYNC command to the network.
	pub async fn send_sync(&self, counter: Option<std::num::NonZeroU8>) -> Result<(), std::io::Error> {
		self.bus.lock().await.send_sync(counter).await
	}

	/// Send a TIME command to the network.
	pub async fn send_time(&self, time: sync::TimeOfDay) -> Result<(), std::io::Error> {
		self.bus.lock().await.send_time(time).await
	}

	/// Spawn a periodic SYNC producer on this network's dispatcher.
	pub fn spawn_sync_producer(&self, period: Duration) -> PeriodicTask {
		sync::spawn_sync_producer(&self.dispatcher, period)
	}

	/// Spawn a periodic TIME producer on this network's dispatcher.
	pub fn spawn_time_producer<F>(&self, period: Duration, now: F) -> PeriodicTask
	where
		F: FnMut() -> Duration + Send + 'static,
	{
		sync::spawn_time_producer(&self.dispatcher, period, now)
	}

	/// Lock the underlying request/response socket for exclusive use.
	///
	/// Used internally by [`Node`] to serialize SDO/NMT transfers across concurrent node handles.
	pub(crate) async fn bus(&self) -> tokio::sync::MutexGuard<'_, CanOpenSocket> {
		self.bus.lock().await
	}
}

impl Drop for Network {
	fn drop(&mut self) {
		for task in &self.background {
			task.abort();
		}
	}
}
