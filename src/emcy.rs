//! Emergency (EMCY) message consumption.

use can_socket::{CanBaseId, CanFilter, CanFrame};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dispatcher::Dispatcher;

const FUNCTION_EMCY: u16 = 0x080;

fn emcy_id(node_id: u8) -> CanBaseId {
	CanBaseId::new(FUNCTION_EMCY | u16::from(node_id)).unwrap()
}

/// The error register bits from CiA 301 object 0x1001, carried in every EMCY message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ErrorRegister {
	/// Raw bitmask as received.
	pub bits: u8,
}

impl ErrorRegister {
	/// Bit 0: generic error, always set if any error is active.
	pub fn generic(&self) -> bool {
		self.bits & 0x01 != 0
	}

	/// Bit 1: current error.
	pub fn current(&self) -> bool {
		self.bits & 0x02 != 0
	}

	/// Bit 2: voltage error.
	pub fn voltage(&self) -> bool {
		self.bits & 0x04 != 0
	}

	/// Bit 3: temperature error.
	pub fn temperature(&self) -> bool {
		self.bits & 0x08 != 0
	}

	/// Bit 4: communication error (overrun, error state).
	pub fn communication(&self) -> bool {
		self.bits & 0x10 != 0
	}

	/// Bit 5: device profile specific error.
	pub fn device_profile(&self) -> bool {
		self.bits & 0x20 != 0
	}

	/// Bit 7: manufacturer specific error.
	pub fn manufacturer_specific(&self) -> bool {
		self.bits & 0x80 != 0
	}
}

/// A subset of the standard CiA 301 emergency error codes (table 12).
///
/// Manufacturer-specific and profile-specific codes outside this list are kept as [`Self::Other`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[derive(IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum EmergencyErrorCode {
	/// No error, used to signal that all active errors have been resolved.
	NoError = 0x0000,
	/// Generic error.
	Generic = 0x1000,
	/// Current, generic.
	CurrentGeneric = 0x2000,
	/// Voltage, generic.
	VoltageGeneric = 0x3000,
	/// Temperature, generic.
	TemperatureGeneric = 0x4000,
	/// Device hardware.
	DeviceHardware = 0x5000,
	/// Device software, generic.
	DeviceSoftwareGeneric = 0x6000,
	/// Additional functions.
	AdditionalFunctions = 0x7000,
	/// Monitoring, generic.
	MonitoringGeneric = 0x8000,
	/// Communication, generic.
	CommunicationGeneric = 0x9000,
	/// Protocol error, generic.
	ProtocolErrorGeneric = 0xA000,
}

/// One emergency event, as received from the bus.
#[derive(Debug, Clone)]
pub struct EmergencyEvent {
	/// The node that raised the event.
	pub node_id: u8,

	/// The raw 16-bit error code.
	pub raw_error_code: u16,

	/// The decoded standard error code, if `raw_error_code` matches one of [`EmergencyErrorCode`]'s
	/// high nibble classes; otherwise `None` for manufacturer/profile specific codes.
	pub error_code: Option<EmergencyErrorCode>,

	/// The error register (object 0x1001) at the time the event was raised.
	pub error_register: ErrorRegister,

	/// 5 bytes of manufacturer-specific data.
	pub manufacturer_specific: [u8; 5],
}

impl EmergencyEvent {
	fn parse(node_id: u8, frame: &CanFrame) -> Option<Self> {
		let data = frame.data()?;
		let data = data.as_slice();
		if data.len() != 8 {
			return None;
		}
		let raw_error_code = u16::from_le_bytes([data[0], data[1]]);
		let error_code = EmergencyErrorCode::try_from(raw_error_code & 0xF000).ok();
		let error_register = ErrorRegister { bits: data[2] };
		let mut manufacturer_specific = [0u8; 5];
		manufacturer_specific.copy_from_slice(&data[3..8]);

		Some(Self {
			node_id,
			raw_error_code,
			error_code,
			error_register,
			manufacturer_specific,
		})
	}

	/// Whether this event clears all previously active errors (error code `0x0000`).
	pub fn is_reset(&self) -> bool {
		self.raw_error_code == 0x0000
	}
}

/// Tracks the currently-active and historical EMCY events per node.
///
/// CiA 301 keeps an "active error list" per node (object 0x1003) that this consumer mirrors:
/// a `0x0000` event clears the active list for that node, any other event is appended to both
/// the active list and an unbounded log.
#[derive(Default)]
pub struct EmcyConsumer {
	active: Mutex<HashMap<u8, Vec<EmergencyEvent>>>,
	log: Mutex<Vec<EmergencyEvent>>,
}

impl EmcyConsumer {
	/// Create a consumer with empty state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Feed one received CAN frame into the consumer. No-ops if it isn't a well-formed EMCY frame.
	pub fn on_frame(&self, frame: &CanFrame) {
		if frame.is_rtr() {
			return;
		}
		let Ok(id) = frame.id().to_base() else { return };
		let raw = id.as_u16();
		if raw & !0x7F != FUNCTION_EMCY {
			return;
		}
		let node_id = (raw & 0x7F) as u8;

		let Some(event) = EmergencyEvent::parse(node_id, frame) else { return };

		let mut active = self.active.lock().unwrap();
		if event.is_reset() {
			active.remove(&node_id);
		} else {
			active.entry(node_id).or_default().push(event.clone());
		}
		drop(active);

		self.log.lock().unwrap().push(event);
	}

	/// Get the currently active emergency events for a node, oldest first.
	pub fn active_errors(&self, node_id: u8) -> Vec<EmergencyEvent> {
		self.active.lock().unwrap().get(&node_id).cloned().unwrap_or_default()
	}

	/// Get the full, unbounded log of emergency events seen since this consumer was created.
	pub fn log(&self) -> Vec<EmergencyEvent> {
		self.log.lock().unwrap().clone()
	}

	/// Run the consumer loop against a dispatcher until its subscription ends.
	pub async fn run(&self, dispatcher: &Dispatcher) {
		let filter = CanFilter::new(CanBaseId::new(FUNCTION_EMCY).unwrap().into()).match_id_mask(0x780);
		let mut subscription = dispatcher.subscribe(filter, 64);
		while let Some((frame, _timestamp)) = subscription.recv().await {
			self.on_frame(&frame);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn emcy_frame(node_id: u8, code: u16, register: u8) -> CanFrame {
		let code = code.to_le_bytes();
		CanFrame::new(emcy_id(node_id), [code[0], code[1], register, 0, 0, 0, 0, 0])
	}

	#[test]
	fn active_error_is_tracked_until_reset() {
		let consumer = EmcyConsumer::new();
		consumer.on_frame(&emcy_frame(3, 0x5000, 0x01));
		assert_eq!(consumer.active_errors(3).len(), 1);
		assert_eq!(consumer.log().len(), 1);

		consumer.on_frame(&emcy_frame(3, 0x0000, 0x00));
		assert!(consumer.active_errors(3).is_empty());
		assert_eq!(consumer.log().len(), 2, "reset event is still logged");
	}

	#[test]
	fn error_register_bits_decode() {
		let register = ErrorRegister { bits: 0b1000_0101 };
		assert!(register.generic());
		assert!(register.voltage());
		assert!(register.manufacturer_specific());
		assert!(!register.current());
	}
}
