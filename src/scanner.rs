//! Node discovery: passive observation of bus traffic and active SDO probing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use can_socket::{CanFilter, CanFrame};

use crate::dispatcher::Dispatcher;
use crate::sdo::SdoAddress;
use crate::{CanOpenSocket, ObjectIndex};

const FUNCTION_EMCY: u16 = 0x080;
const FUNCTION_SDO_RESPONSE: u16 = 0x580;
const FUNCTION_HEARTBEAT: u16 = 0x700;

/// Watches bus traffic for node IDs implied by well-known function codes, and can actively probe
/// the full node-ID range for devices that are present but otherwise silent.
#[derive(Default)]
pub struct Scanner {
	discovered: Arc<Mutex<BTreeSet<u8>>>,
}

impl Scanner {
	/// Create a scanner with no discovered nodes yet.
	pub fn new() -> Self {
		Self::default()
	}

	/// Get the set of node IDs discovered so far, from either passive observation or a search.
	pub fn discovered(&self) -> Vec<u8> {
		self.discovered.lock().unwrap().iter().copied().collect()
	}

	fn note_frame(&self, frame: &CanFrame) {
		let Ok(id) = frame.id().to_base() else { return };
		let raw = id.as_u16();
		let node_id = if raw & !0x7F == FUNCTION_EMCY {
			raw & 0x7F
		} else if raw & !0x7F == FUNCTION_SDO_RESPONSE {
			raw & 0x7F
		} else if raw & !0x7F == FUNCTION_HEARTBEAT {
			raw & 0x7F
		} else {
			return;
		};
		if node_id >= 1 && node_id <= 127 {
			self.discovered.lock().unwrap().insert(node_id as u8);
		}
	}

	/// Run passive discovery against a dispatcher until all its subscriptions end.
	///
	/// Subscribes to the EMCY, SDO response and heartbeat function codes and records the node ID
	/// implied by any frame seen on them. This never sends anything on the bus.
	///
	/// Each function code gets its own subscription rather than one mask covering all three:
	/// 0x080, 0x580 and 0x700 don't share a single contiguous set of high bits, so one mask
	/// could only ever match one of them.
	pub async fn run(&self, dispatcher: &Dispatcher) {
		let function_filter = |function: u16| {
			CanFilter::new(can_socket::CanBaseId::new(function).unwrap().into()).match_id_mask(0x780)
		};
		let mut emcy = dispatcher.subscribe(function_filter(FUNCTION_EMCY), 128);
		let mut sdo_response = dispatcher.subscribe(function_filter(FUNCTION_SDO_RESPONSE), 128);
		let mut heartbeat = dispatcher.subscribe(function_filter(FUNCTION_HEARTBEAT), 128);

		loop {
			tokio::select! {
				frame = emcy.recv() => match frame {
					Some((frame, _timestamp)) => self.note_frame(&frame),
					None => return,
				},
				frame = sdo_response.recv() => match frame {
					Some((frame, _timestamp)) => self.note_frame(&frame),
					None => return,
				},
				frame = heartbeat.recv() => match frame {
					Some((frame, _timestamp)) => self.note_frame(&frame),
					None => return,
				},
			}
		}
	}

	/// Actively probe node IDs `1..=127` by reading object 0x1000:0 (device type) from each, and
	/// record every node ID that responds.
	///
	/// `bus` is a single shared SDO client, so probes run one at a time; `timeout` bounds each
	/// individual SDO upload attempt.
	pub async fn search(&self, bus: &mut CanOpenSocket, timeout: Duration) -> Vec<u8> {
		let mut found = Vec::new();

		for node_id in 1..=127u8 {
			let result: Result<u32, _> = bus
				.sdo_upload(node_id, SdoAddress::standard(), ObjectIndex::new(0x1000, 0), timeout)
				.await;
			if result.is_ok() {
				found.push(node_id);
				self.discovered.lock().unwrap().insert(node_id);
			}
		}

		found
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use can_socket::CanBaseId;

	fn frame(function: u16, node_id: u8) -> CanFrame {
		CanFrame::new(CanBaseId::new(function | u16::from(node_id)).unwrap(), [])
	}

	#[test]
	fn passive_scan_records_node_ids_from_known_function_codes() {
		let scanner = Scanner::new();
		scanner.note_frame(&frame(FUNCTION_EMCY, 5));
		scanner.note_frame(&frame(FUNCTION_SDO_RESPONSE, 6));
		scanner.note_frame(&frame(FUNCTION_HEARTBEAT, 7));
		assert_eq!(scanner.discovered(), vec![5, 6, 7]);
	}

	#[test]
	fn unrelated_function_codes_are_ignored() {
		let scanner = Scanner::new();
		scanner.note_frame(&frame(0x200, 1));
		assert!(scanner.discovered().is_empty());
	}
}
