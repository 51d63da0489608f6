//! Layer Setting Services (LSS) master: out-of-band node-id and bitrate configuration.

use std::time::Duration;

use can_socket::{CanFilter, CanFrame, CanId};

use crate::dispatcher::Dispatcher;

const LSS_MASTER_TO_SLAVE: u16 = 0x7E5;
const LSS_SLAVE_TO_MASTER: u16 = 0x7E4;

const CS_SWITCH_MODE_GLOBAL: u8 = 0x04;
const CS_SWITCH_STATE_VENDOR: u8 = 0x40;
const CS_SWITCH_STATE_PRODUCT: u8 = 0x41;
const CS_SWITCH_STATE_REVISION: u8 = 0x42;
const CS_SWITCH_STATE_SERIAL: u8 = 0x43;
const CS_SWITCH_STATE_RESPONSE: u8 = 0x44;
const CS_CONFIGURE_NODE_ID: u8 = 0x11;
const CS_CONFIGURE_BIT_TIMING: u8 = 0x13;
const CS_STORE_CONFIGURATION: u8 = 0x17;
const CS_INQUIRE_VENDOR_ID: u8 = 0x5A;
const CS_INQUIRE_PRODUCT_CODE: u8 = 0x5B;
const CS_INQUIRE_REVISION: u8 = 0x5C;
const CS_INQUIRE_SERIAL: u8 = 0x5D;
const CS_INQUIRE_NODE_ID: u8 = 0x5E;
const CS_FASTSCAN: u8 = 0x51;
const CS_FASTSCAN_RESPONSE: u8 = 0x4F;

const FASTSCAN_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

fn master_id() -> CanId {
	CanId::new(u32::from(LSS_MASTER_TO_SLAVE)).unwrap()
}

fn slave_id() -> CanId {
	CanId::new(u32::from(LSS_SLAVE_TO_MASTER)).unwrap()
}

/// The operating state of an LSS slave.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LssState {
	/// The slave ignores all LSS commands except those that may switch it into configuration mode.
	Waiting,

	/// The slave accepts configuration commands.
	Configuration,
}

/// The four 32-bit identity words that make up a slave's LSS identity.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct LssIdentity {
	/// Object 0x1018:1, vendor ID.
	pub vendor_id: u32,
	/// Object 0x1018:2, product code.
	pub product_code: u32,
	/// Object 0x1018:3, revision number.
	pub revision: u32,
	/// Object 0x1018:4, serial number.
	pub serial: u32,
}

/// An error that can occur while performing an LSS operation.
#[derive(Debug, thiserror::Error)]
pub enum LssError {
	/// No response was received within the configured timeout.
	#[error("timeout waiting for LSS response")]
	Timeout,

	/// The slave reported an error for a configuration command.
	#[error("LSS slave reported error {error} (vendor detail {spec_error})")]
	ConfigError {
		/// Standard error code (meaning depends on the command that was sent).
		error: u8,
		/// Manufacturer-specific detail, only meaningful when `error == 0xFF`.
		spec_error: u8,
	},

	/// Fastscan found no unconfigured slave on the bus.
	#[error("fastscan found no unconfigured slave")]
	FastscanNoSlave,

	/// Failed to send a CAN frame.
	#[error("failed to send CAN frame: {0}")]
	Send(#[from] std::io::Error),
}

/// LSS master: sends configuration commands to one selected slave at a time.
pub struct LssMaster {
	dispatcher: Dispatcher,
}

impl LssMaster {
	/// Create a new LSS master bound to a dispatcher.
	pub fn new(dispatcher: Dispatcher) -> Self {
		Self { dispatcher }
	}

	async fn send(&self, payload: [u8; 8]) -> Result<(), LssError> {
		self.dispatcher.send(&CanFrame::new(master_id(), payload)).await?;
		Ok(())
	}

	async fn send_and_receive(&self, payload: [u8; 8], expect_cs: u8, timeout: Duration) -> Result<Option<[u8; 8]>, LssError> {
		let filter = CanFilter::new(slave_id()).match_exact_id();
		let mut subscription = self.dispatcher.subscribe(filter, 8);
		self.send(payload).await?;

		while let Ok(Some((frame, _timestamp))) = subscription.recv_timeout(timeout).await {
			if frame.is_rtr() {
				continue;
			}
			let Some(data) = frame.data() else { continue };
			let data = data.as_slice();
			if data.len() == 8 && data[0] == expect_cs {
				let mut buf = [0u8; 8];
				buf.copy_from_slice(data);
				return Ok(Some(buf));
			}
		}
		Ok(None)
	}

	/// Put every slave on the bus into the given global state (no response expected).
	pub async fn switch_mode_global(&self, state: LssState) -> Result<(), LssError> {
		let mode = match state {
			LssState::Waiting => 0,
			LssState::Configuration => 1,
		};
		self.send([CS_SWITCH_MODE_GLOBAL, mode, 0, 0, 0, 0, 0, 0]).await
	}

	/// Select exactly one slave by its full LSS identity and wait for it to confirm.
	///
	/// Returns [`LssError::Timeout`] if no slave with this identity responds.
	pub async fn switch_state_selective(&self, identity: LssIdentity, timeout: Duration) -> Result<(), LssError> {
		self.send(identity_frame(CS_SWITCH_STATE_VENDOR, identity.vendor_id)).await?;
		self.send(identity_frame(CS_SWITCH_STATE_PRODUCT, identity.product_code)).await?;
		self.send(identity_frame(CS_SWITCH_STATE_REVISION, identity.revision)).await?;

		let filter = CanFilter::new(slave_id()).match_exact_id();
		let mut subscription = self.dispatcher.subscribe(filter, 8);
		self.send(identity_frame(CS_SWITCH_STATE_SERIAL, identity.serial)).await?;

		while let Ok(Some((frame, _timestamp))) = subscription.recv_timeout(timeout).await {
			if frame.is_rtr() {
				continue;
			}
			if frame.data().map(|data| data.as_slice().first().copied()) == Some(Some(CS_SWITCH_STATE_RESPONSE)) {
				return Ok(());
			}
		}
		Err(LssError::Timeout)
	}

	/// Configure the node ID of the currently selected slave.
	pub async fn configure_node_id(&self, node_id: u8, timeout: Duration) -> Result<(), LssError> {
		let response = self
			.send_and_receive([CS_CONFIGURE_NODE_ID, node_id, 0, 0, 0, 0, 0, 0], CS_CONFIGURE_NODE_ID, timeout)
			.await?
			.ok_or(LssError::Timeout)?;
		check_config_response(response)
	}

	/// Configure the bit timing of the currently selected slave.
	pub async fn configure_bit_timing(&self, table: u8, index: u8, timeout: Duration) -> Result<(), LssError> {
		let response = self
			.send_and_receive([CS_CONFIGURE_BIT_TIMING, table, index, 0, 0, 0, 0, 0], CS_CONFIGURE_BIT_TIMING, timeout)
			.await?
			.ok_or(LssError::Timeout)?;
		check_config_response(response)
	}

	/// Ask the currently selected slave to persist its LSS configuration.
	pub async fn store_configuration(&self, timeout: Duration) -> Result<(), LssError> {
		let response = self
			.send_and_receive([CS_STORE_CONFIGURATION, 0, 0, 0, 0, 0, 0, 0], CS_STORE_CONFIGURATION, timeout)
			.await?
			.ok_or(LssError::Timeout)?;
		check_config_response(response)
	}

	/// Ask the currently selected slave to report its configured node ID.
	pub async fn inquire_node_id(&self, timeout: Duration) -> Result<u8, LssError> {
		let response = self
			.send_and_receive([CS_INQUIRE_NODE_ID, 0, 0, 0, 0, 0, 0, 0], CS_INQUIRE_NODE_ID, timeout)
			.await?
			.ok_or(LssError::Timeout)?;
		Ok(response[1])
	}

	/// Ask the currently selected slave to report one of its four identity words.
	async fn inquire_identity_word(&self, cs: u8, timeout: Duration) -> Result<u32, LssError> {
		let response = self
			.send_and_receive([cs, 0, 0, 0, 0, 0, 0, 0], cs, timeout)
			.await?
			.ok_or(LssError::Timeout)?;
		Ok(u32::from_le_bytes(response[1..5].try_into().unwrap()))
	}

	/// Ask the currently selected slave to report its full LSS identity.
	pub async fn inquire_identity(&self, timeout: Duration) -> Result<LssIdentity, LssError> {
		Ok(LssIdentity {
			vendor_id: self.inquire_identity_word(CS_INQUIRE_VENDOR_ID, timeout).await?,
			product_code: self.inquire_identity_word(CS_INQUIRE_PRODUCT_CODE, timeout).await?,
			revision: self.inquire_identity_word(CS_INQUIRE_REVISION, timeout).await?,
			serial: self.inquire_identity_word(CS_INQUIRE_SERIAL, timeout).await?,
		})
	}

	/// Discover one unconfigured slave's identity via the fastscan binary search, without
	/// requiring any prior knowledge of its identity, leaving it selected in configuration state.
	///
	/// Returns `Ok(None)` if no unconfigured slave answered (the bus has none, or they are all
	/// already configured).
	pub async fn fast_scan(&self) -> Result<Option<LssIdentity>, LssError> {
		let mut words = [0u32; 4];

		for field in 0u8..4 {
			let mut bit_check = 32u8;
			while bit_check > 0 {
				bit_check -= 1;
				let candidate = words[field as usize] | (1u32 << bit_check);
				if !self.fastscan_probe(candidate, bit_check, field, field).await? {
					words[field as usize] = candidate;
				}
			}
			let next = (field + 1) % 4;
			if !self.fastscan_probe(words[field as usize], 0, field, next).await? {
				return Ok(None);
			}
		}

		Ok(Some(LssIdentity {
			vendor_id: words[0],
			product_code: words[1],
			revision: words[2],
			serial: words[3],
		}))
	}

	/// Send one fastscan probe and report whether any slave answered within the probe timeout.
	///
	/// `bit_check` of 32 resets the fastscan state machine and confirms at least one unconfigured
	/// slave exists; lower values narrow the guess for `id_field` one bit at a time.
	async fn fastscan_probe(&self, id_field: u32, bit_check: u8, sub: u8, next: u8) -> Result<bool, LssError> {
		let id_field = id_field.to_le_bytes();
		let payload = [CS_FASTSCAN, id_field[0], id_field[1], id_field[2], id_field[3], bit_check, sub, next];

		let filter = CanFilter::new(slave_id()).match_exact_id();
		let mut subscription = self.dispatcher.subscribe(filter, 8);
		self.send(payload).await?;

		let mut answered = false;
		while let Ok(Some((frame, _timestamp))) = subscription.recv_timeout(FASTSCAN_PROBE_TIMEOUT).await {
			if frame.is_rtr() {
				continue;
			}
			if frame.data().map(|data| data.as_slice().first().copied()) == Some(Some(CS_FASTSCAN_RESPONSE)) {
				answered = true;
			}
		}
		Ok(answered)
	}
}

fn identity_frame(cs: u8, value: u32) -> [u8; 8] {
	let bytes = value.to_le_bytes();
	[cs, bytes[0], bytes[1], bytes[2], bytes[3], 0, 0, 0]
}

fn check_config_response(response: [u8; 8]) -> Result<(), LssError> {
	let error = response[1];
	if error == 0 {
		Ok(())
	} else {
		Err(LssError::ConfigError { error, spec_error: response[2] })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_frame_encodes_little_endian() {
		let frame = identity_frame(CS_SWITCH_STATE_VENDOR, 0x1122_3344);
		assert_eq!(frame, [CS_SWITCH_STATE_VENDOR, 0x44, 0x33, 0x22, 0x11, 0, 0, 0]);
	}

	#[test]
	fn config_response_reports_slave_error() {
		let response = [CS_CONFIGURE_NODE_ID, 1, 0, 0, 0, 0, 0, 0];
		assert!(matches!(check_config_response(response), Err(LssError::ConfigError { error: 1, .. })));
	}
}
