//! Network Management (NMT) master: state commands and heartbeat/node-guarding consumption.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use can_socket::{CanBaseId, CanFilter, CanFrame};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::dispatcher::Dispatcher;
use crate::CanOpenSocket;

const NMT_COB_ID: u8 = 0x000;
const FUNCTION_HEARTBEAT: u16 = 0x700;

fn heartbeat_id(node_id: u8) -> CanBaseId {
	CanBaseId::new(FUNCTION_HEARTBEAT | u16::from(node_id)).unwrap()
}

/// The NMT state of a CANopen device, as reported in its heartbeat/bootup messages.
#[repr(u8)]
#[derive(IntoPrimitive, TryFromPrimitive)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NmtState {
	/// The device is initializing and should automatically continue to `PreOperational`.
	Initializing = 0x00,

	/// The device is stopped. Only NMT and heartbeat/node-guarding services are active.
	Stopped = 0x04,

	/// The device is operational. All services are active.
	Operational = 0x05,

	/// The device has finished initialization and is waiting for a [`NmtCommand::Start`] command.
	PreOperational = 0x7F,
}

/// An NMT command sent by the master to move a node into a new state.
#[repr(u8)]
#[derive(IntoPrimitive, TryFromPrimitive)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NmtCommand {
	/// Command a CANopen device to go to the [`NmtState::Operational`] state.
	Start = 1,

	/// Command a CANopen device to go to the [`NmtState::Stopped`] state.
	Stop = 2,

	/// Command a CANopen device to go to the [`NmtState::PreOperational`] state.
	GoToPreOperational = 128,

	/// Command a CANopen device to go to the [`NmtState::Initializing`] state.
	Reset = 129,

	/// Command a CANopen device to go to the [`NmtState::Initializing`] state, resetting only communication parameters.
	ResetCommunication = 130,
}

impl NmtCommand {
	/// Get the state the device is expected to report after processing this command.
	fn expected_state(self) -> NmtState {
		match self {
			NmtCommand::Start => NmtState::Operational,
			NmtCommand::Stop => NmtState::Stopped,
			NmtCommand::GoToPreOperational => NmtState::PreOperational,
			NmtCommand::Reset => NmtState::Initializing,
			NmtCommand::ResetCommunication => NmtState::Initializing,
		}
	}
}

/// An error that can occur when sending an NMT command.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum NmtError {
	/// Failed to transmit the CAN frame.
	#[error("failed to send CAN frame: {0}")]
	SendFailed(std::io::Error),

	/// Failed to receive a CAN frame for the response.
	#[error("failed to receive CAN frame: {0}")]
	RecvFailed(std::io::Error),

	/// The timeout elapsed before the device reported the new state.
	#[error("timeout while waiting for reply")]
	Timeout,

	/// The response frame from the device contains invalid data.
	#[error("received malformed heartbeat response frame")]
	MalformedResponse,

	/// The new state of the device does not match the expected state.
	#[error(transparent)]
	UnexpectedState(#[from] UnexpectedState),
}

/// The new state of the device does not match the expected state.
#[derive(Debug)]
#[derive(thiserror::Error)]
#[error("state change failed: device reports state {actual} instead of {expected}")]
pub struct UnexpectedState {
	/// The expected state of the device.
	pub expected: NmtState,

	/// The actual state of the device.
	pub actual: NmtState,
}

/// Send an NMT command to a node (or all nodes, for `node_id == 0`) without waiting for any reply.
///
/// This is the operation CiA 301 itself defines: setting a node's state emits the command and
/// does not wait for confirmation. Use [`send_nmt_command`] if the caller additionally wants to
/// confirm the resulting state via the node's heartbeat.
pub(crate) async fn send_nmt_command_no_wait(
	bus: &mut CanOpenSocket,
	node_id: u8,
	command: NmtCommand,
) -> Result<(), NmtError> {
	log::debug!("Sending NMT command {command} to node 0x{node_id:02X}");
	let command_frame = CanFrame::new(NMT_COB_ID, [command as u8, node_id]);
	bus.send_frame(&command_frame).await.map_err(NmtError::SendFailed)
}

/// Send an NMT command to a node and wait for its heartbeat to confirm the new state.
///
/// A broadcast command (`node_id == 0`) addresses every node at once, so there is no single
/// heartbeat to confirm against; it is sent fire-and-forget, same as [`send_nmt_command_no_wait`].
pub(crate) async fn send_nmt_command(
	bus: &mut CanOpenSocket,
	node_id: u8,
	command: NmtCommand,
	timeout: Duration,
) -> Result<(), NmtError> {
	send_nmt_command_no_wait(bus, node_id, command).await?;

	if node_id == 0 {
		return Ok(());
	}

	let expected = command.expected_state();
	let frame = bus
		.recv_new_by_can_id(heartbeat_id(node_id), timeout)
		.await
		.map_err(NmtError::RecvFailed)?
		.ok_or(NmtError::Timeout)?;
	let state = parse_heartbeat(&frame)?;
	if state == expected {
		Ok(())
	} else {
		Err(UnexpectedState { expected, actual: state }.into())
	}
}

/// Parse a heartbeat (or bootup) frame into an [`NmtState`].
fn parse_heartbeat(frame: &CanFrame) -> Result<NmtState, NmtError> {
	let data = frame.data().ok_or(NmtError::MalformedResponse)?;
	let data = data.as_slice();
	if data.len() != 1 {
		Err(NmtError::MalformedResponse)
	} else {
		data[0].try_into().map_err(|_| NmtError::MalformedResponse)
	}
}

/// The liveness status of a node as tracked by a [`HeartbeatConsumer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeStatus {
	/// The node's last reported state, and when it was last heard from.
	Alive(NmtState),

	/// No heartbeat was seen within the configured heartbeat time; the node is presumed unreachable.
	Unreachable,
}

struct NodeEntry {
	status: NodeStatus,
	last_seen: Instant,
	heartbeat_time: Duration,
}

/// Tracks the NMT state of a set of nodes by consuming their heartbeat messages in the background.
///
/// Construct one per node being guarded (or reuse across nodes, keyed by node ID) and feed it from
/// a [`Dispatcher`] subscription; call [`Self::sweep`] periodically (e.g. from the same loop that
/// awaits new heartbeats) to transition nodes whose heartbeat time has elapsed to [`NodeStatus::Unreachable`].
pub struct HeartbeatConsumer {
	nodes: Arc<Mutex<HashMap<u8, NodeEntry>>>,
	notify: Notify,
}

impl HeartbeatConsumer {
	/// Create an empty consumer.
	pub fn new() -> Self {
		Self {
			nodes: Arc::new(Mutex::new(HashMap::new())),
			notify: Notify::new(),
		}
	}

	/// Start guarding `node_id`, expecting a heartbeat at least every `heartbeat_time`.
	///
	/// Until the first heartbeat arrives the node has no recorded status.
	pub fn guard(&self, node_id: u8, heartbeat_time: Duration) {
		self.nodes.lock().unwrap().insert(node_id, NodeEntry {
			status: NodeStatus::Unreachable,
			last_seen: Instant::now(),
			heartbeat_time,
		});
	}

	/// Stop guarding `node_id`.
	pub fn forget(&self, node_id: u8) {
		self.nodes.lock().unwrap().remove(&node_id);
	}

	/// Get the last known status of a guarded node.
	pub fn status(&self, node_id: u8) -> Option<NodeStatus> {
		self.nodes.lock().unwrap().get(&node_id).map(|entry| entry.status)
	}

	/// Feed one received CAN frame into the consumer.
	///
	/// No-ops if the frame is not a heartbeat from a guarded node.
	fn on_frame(&self, frame: &CanFrame) {
		if frame.is_rtr() {
			return;
		}
		let Ok(id) = frame.id().to_base() else { return };
		let raw = id.as_u16();
		if raw & !0x7F != FUNCTION_HEARTBEAT {
			return;
		}
		let node_id = (raw & 0x7F) as u8;

		let Ok(state) = parse_heartbeat(frame) else { return };
		let mut nodes = self.nodes.lock().unwrap();
		if let Some(entry) = nodes.get_mut(&node_id) {
			entry.status = NodeStatus::Alive(state);
			entry.last_seen = Instant::now();
			drop(nodes);
			self.notify.notify_waiters();
		}
	}

	/// Wait for the next heartbeat from a guarded node, up to `timeout`.
	///
	/// Returns the node's status as of that heartbeat. If a heartbeat for `node_id` arrived after
	/// `guard` was called but before this was called, it is reported immediately.
	pub async fn wait_for_heartbeat(&self, node_id: u8, timeout: Duration) -> Result<NodeStatus, NmtError> {
		let deadline = Instant::now() + timeout;
		let baseline = self.nodes.lock().unwrap().get(&node_id).map(|entry| entry.last_seen);

		loop {
			if let Some(entry_seen_at) = self.nodes.lock().unwrap().get(&node_id).map(|entry| (entry.status, entry.last_seen)) {
				let (status, last_seen) = entry_seen_at;
				if baseline.map_or(true, |baseline| last_seen > baseline) {
					return Ok(status);
				}
			}
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(NmtError::Timeout);
			}
			let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
		}
	}

	/// Mark any guarded node whose heartbeat time has elapsed since its last heartbeat as unreachable.
	///
	/// Returns the node IDs that transitioned to [`NodeStatus::Unreachable`] by this call.
	pub fn sweep(&self) -> Vec<u8> {
		let now = Instant::now();
		let mut newly_unreachable = Vec::new();
		let mut nodes = self.nodes.lock().unwrap();
		for (&node_id, entry) in nodes.iter_mut() {
			let overdue = now.duration_since(entry.last_seen) > entry.heartbeat_time;
			if overdue && entry.status != NodeStatus::Unreachable {
				entry.status = NodeStatus::Unreachable;
				newly_unreachable.push(node_id);
			}
		}
		newly_unreachable
	}

	/// Run the consumer loop against a dispatcher until its subscription ends.
	///
	/// Subscribes to all heartbeat COB-IDs (`0x700`..`0x77F`) and re-checks for overdue nodes
	/// every time a heartbeat arrives or `sweep_interval` elapses, whichever is first.
	pub async fn run(&self, dispatcher: &Dispatcher, sweep_interval: Duration) {
		let filter = CanFilter::new(CanBaseId::new(FUNCTION_HEARTBEAT).unwrap().into()).match_id_mask(0x780);
		let mut subscription = dispatcher.subscribe(filter, 64);
		loop {
			tokio::select! {
				frame = subscription.recv() => {
					match frame {
						Some((frame, _timestamp)) => self.on_frame(&frame),
						None => return,
					}
				}
				_ = tokio::time::sleep(sweep_interval) => {
					self.sweep();
				}
			}
		}
	}
}

impl Default for HeartbeatConsumer {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for NmtState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Initializing => write!(f, "initializing"),
			Self::Stopped => write!(f, "stopped"),
			Self::Operational => write!(f, "operational"),
			Self::PreOperational => write!(f, "pre-operational"),
		}
	}
}

impl std::fmt::Display for NmtCommand {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Start => write!(f, "start"),
			Self::Stop => write!(f, "stop"),
			Self::GoToPreOperational => write!(f, "go-to-pre-operational"),
			Self::Reset => write!(f, "reset"),
			Self::ResetCommunication => write!(f, "reset-communication"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn heartbeat_frame(node_id: u8, state: NmtState) -> CanFrame {
		CanFrame::new(heartbeat_id(node_id), [state as u8])
	}

	#[test]
	fn unguarded_heartbeat_is_ignored() {
		let consumer = HeartbeatConsumer::new();
		consumer.on_frame(&heartbeat_frame(5, NmtState::Operational));
		assert_eq!(consumer.status(5), None);
	}

	#[test]
	fn guarded_node_tracks_latest_state() {
		let consumer = HeartbeatConsumer::new();
		consumer.guard(5, Duration::from_millis(500));
		consumer.on_frame(&heartbeat_frame(5, NmtState::PreOperational));
		assert_eq!(consumer.status(5), Some(NodeStatus::Alive(NmtState::PreOperational)));

		consumer.on_frame(&heartbeat_frame(5, NmtState::Operational));
		assert_eq!(consumer.status(5), Some(NodeStatus::Alive(NmtState::Operational)));
	}

	#[test]
	fn sweep_marks_overdue_node_unreachable() {
		let consumer = HeartbeatConsumer::new();
		consumer.guard(5, Duration::from_millis(0));
		consumer.on_frame(&heartbeat_frame(5, NmtState::Operational));
		std::thread::sleep(Duration::from_millis(5));
		let newly_unreachable = consumer.sweep();
		assert_eq!(newly_unreachable, vec![5]);
		assert_eq!(consumer.status(5), Some(NodeStatus::Unreachable));
	}

	#[tokio::test]
	async fn wait_for_heartbeat_returns_once_one_arrives() {
		let consumer = Arc::new(HeartbeatConsumer::new());
		consumer.guard(5, Duration::from_secs(1));

		let waiter = tokio::spawn({
			let consumer = Arc::clone(&consumer);
			async move { consumer.wait_for_heartbeat(5, Duration::from_secs(1)).await }
		});

		tokio::time::sleep(Duration::from_millis(10)).await;
		consumer.on_frame(&heartbeat_frame(5, NmtState::Operational));

		let status = waiter.await.unwrap().unwrap();
		assert_eq!(status, NodeStatus::Alive(NmtState::Operational));
	}

	#[tokio::test]
	async fn wait_for_heartbeat_times_out_without_a_frame() {
		let consumer = HeartbeatConsumer::new();
		consumer.guard(5, Duration::from_secs(1));
		let result = consumer.wait_for_heartbeat(5, Duration::from_millis(10)).await;
		assert!(matches!(result, Err(NmtError::Timeout)));
	}

	#[tokio::test]
	async fn wait_for_heartbeat_reports_a_heartbeat_already_seen_before_the_call() {
		let consumer = HeartbeatConsumer::new();
		consumer.guard(5, Duration::from_secs(1));
		consumer.on_frame(&heartbeat_frame(5, NmtState::PreOperational));

		let status = consumer.wait_for_heartbeat(5, Duration::from_millis(10)).await.unwrap();
		assert_eq!(status, NodeStatus::Alive(NmtState::PreOperational));
	}
}
