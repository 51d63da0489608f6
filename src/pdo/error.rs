use std::convert::Infallible;

use crate::sdo::{SdoError, UploadError};

/// Error that can occur while reading or writing the configuration of a PDO.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum PdoConfigError {
	/// The PDO number is not valid.
	///
	/// Only PDO numbers 1 through 4 have standard, pre-defined communication and mapping objects.
	#[error("invalid PDO number: {0}, only 1 through 4 are supported")]
	InvalidPdoNumber(u16),

	/// Reading an object from the remote node failed.
	#[error(transparent)]
	Upload(#[from] UploadError<Infallible>),

	/// Writing or reading a raw SDO object failed.
	#[error(transparent)]
	Sdo(#[from] SdoError),

	/// The remote node does not expose the inhibit time subindex, but a non-zero inhibit time was requested.
	#[error("the remote node does not support configuring the inhibit time")]
	InhibitTimeNotSupported,

	/// The remote node does not expose the deadline timer subindex, but a non-zero deadline timer was requested.
	#[error("the remote node does not support configuring the deadline timer")]
	DeadlineTimerNotSupported,

	/// The remote node does not expose the event timer subindex, but a non-zero event timer was requested.
	#[error("the remote node does not support configuring the event timer")]
	EventTimerNotSupported,

	/// The remote node does not expose the `start_sync` subindex, but a non-zero value was requested.
	#[error("the remote node does not support configuring the start sync value")]
	StartSyncNotSupported,

	/// Too many objects were mapped into the PDO to fit in the 8 available payload bytes.
	#[error("PDO mapping exceeds 64 bits: total mapped length is {0} bits")]
	MappingTooLong(u32),
}

/// A requested SYNC interval for a TPDO transmission type is out of range.
///
/// Valid synchronous transmission types are `1..=0xF0`.
#[derive(Debug)]
#[derive(thiserror::Error)]
#[error("invalid SYNC interval: {value}, must be between 1 and 0xF0")]
pub struct InvalidSyncInterval {
	/// The value that was out of range.
	pub value: u8,
}

/// Error that can occur while waiting for or reacting to a received PDO.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum PdoReceptionError {
	/// No RPDO is registered for live reception under the given node/PDO number.
	#[error("no RPDO reception registered for node 0x{node_id:02X} PDO {pdo}")]
	NotRegistered {
		/// The node that was queried.
		node_id: u8,
		/// The PDO number that was queried.
		pdo: u16,
	},

	/// The timeout elapsed before a matching frame arrived.
	#[error("timeout while waiting for PDO reception")]
	Timeout,

	/// A frame matching the configured COB-ID could not be unpacked according to the mapping.
	#[error(transparent)]
	Unpack(#[from] PdoConfigError),
}

/// A counter value passed to [`crate::sync::send_sync`] style APIs that is reserved by the protocol.
#[derive(Debug)]
#[derive(thiserror::Error)]
#[error("invalid SYNC counter: {value}, must be between 2 and 0xF0")]
pub struct InvalidNthSyncCounter {
	/// The value that was out of range.
	pub value: u8,
}
