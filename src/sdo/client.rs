//! Object-dictionary-aware SDO client: typed `raw`/`phys`/`desc`/`bits` views over a [`Variable`],
//! plus a streaming [`SdoStream`] that picks segmented or block transfer once at `open` time.
//!
//! Layered on top of the lower-level [`super::sdo_upload`]/[`super::sdo_download`] functions,
//! which operate on raw bytes and know nothing about the object dictionary.

use std::time::Duration;

use crate::dictionary::{DataType, Value, Variable};
use crate::{CanOpenSocket, ObjectIndex};

use super::{SdoAddress, SdoError};

const DEFAULT_BLOCK_SIZE: u8 = 32;

/// Error returned by the object-dictionary-aware SDO helpers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	/// The SDO transfer itself failed.
	#[error(transparent)]
	Transfer(#[from] SdoError),

	/// The data received from the server could not be interpreted as the variable's data type.
	#[error("received {received} bytes for a {data_type:?} value")]
	WrongSize {
		/// The data type the variable declares.
		data_type: DataType,
		/// The number of bytes actually received.
		received: usize,
	},

	/// This variable has neither `factor` nor `offset` defined, so it has no `phys` view.
	#[error("variable has no scaling factor/offset defined")]
	NoScaling,

	/// `phys_to_raw` could not convert the given value (e.g. `factor` is zero).
	#[error("{0} cannot be converted to a raw value for this variable")]
	InvalidPhys(f64),

	/// The variable's current raw value has no matching entry in its value-description table.
	#[error("raw value has no matching value description for this variable")]
	NoMatchingDesc,

	/// The given name is not one of this variable's value descriptions.
	#[error("{0:?} is not a named value for this variable")]
	UnknownDesc(String),

	/// The given name is not one of this variable's named bits.
	#[error("{0:?} is not a named bit for this variable")]
	UnknownBit(String),
}

/// Read the raw bytes of an object from an SDO server.
pub(crate) async fn read_raw(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	object: ObjectIndex,
	timeout: Duration,
) -> Result<Vec<u8>, SdoError> {
	let mut buffer = vec![0u8; 8];
	let len = bus.sdo_upload_raw(node_id, sdo, object, &mut buffer, timeout).await?;
	buffer.truncate(len);
	Ok(buffer)
}

/// Read the `raw` value of a [`Variable`] from an SDO server, converting it according to the
/// variable's declared data type. No scaling is applied; see [`read_phys`] for the scaled view.
pub(crate) async fn read_value(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	timeout: Duration,
) -> Result<Value, ClientError> {
	let object = ObjectIndex::new(variable.index, variable.sub_index);
	let data = read_raw(bus, node_id, sdo, object, timeout).await?;
	if variable.data_type.is_fixed_size() && data.len() != variable.data_type.size() {
		return Err(ClientError::WrongSize { data_type: variable.data_type, received: data.len() });
	}
	Ok(Value::from_bytes(&data))
}

/// Write the `raw` value of a [`Variable`] to an SDO server, with no scaling applied.
pub(crate) async fn write_value(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	value: &Value,
	timeout: Duration,
) -> Result<(), SdoError> {
	let object = ObjectIndex::new(variable.index, variable.sub_index);
	bus.sdo_download(node_id, sdo, object, value.as_bytes(), timeout).await
}

/// Read a variable's scaled engineering (`phys`) value: `phys = raw * factor + offset`.
pub(crate) async fn read_phys(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	timeout: Duration,
) -> Result<f64, ClientError> {
	let raw = read_value(bus, node_id, sdo, variable, timeout).await?;
	variable.raw_to_phys(&raw).ok_or(ClientError::NoScaling)
}

/// Write a scaled engineering (`phys`) value: `raw = round((phys - offset) / factor)`.
pub(crate) async fn write_phys(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	phys: f64,
	timeout: Duration,
) -> Result<(), ClientError> {
	let raw = variable.phys_to_raw(phys).ok_or(ClientError::InvalidPhys(phys))?;
	write_value(bus, node_id, sdo, variable, &raw, timeout).await.map_err(ClientError::from)
}

/// Read a variable's symbolic (`desc`) value, looked up from its current raw value.
pub(crate) async fn read_desc(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	timeout: Duration,
) -> Result<String, ClientError> {
	let raw = read_value(bus, node_id, sdo, variable, timeout).await?;
	variable.raw_to_desc(&raw).ok_or(ClientError::NoMatchingDesc)
}

/// Write a variable's symbolic (`desc`) value, looked up to the raw value it names.
pub(crate) async fn write_desc(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	desc: &str,
	timeout: Duration,
) -> Result<(), ClientError> {
	let raw = variable.desc_to_raw(desc).ok_or_else(|| ClientError::UnknownDesc(desc.to_owned()))?;
	write_value(bus, node_id, sdo, variable, &raw, timeout).await.map_err(ClientError::from)
}

/// Read a single named bit out of a variable's current raw value.
pub(crate) async fn read_bit(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	name: &str,
	timeout: Duration,
) -> Result<bool, ClientError> {
	let raw = read_value(bus, node_id, sdo, variable, timeout).await?;
	variable.read_bit(&raw, name).ok_or_else(|| ClientError::UnknownBit(name.to_owned()))
}

/// Set or clear a single named bit, as a read-modify-write against the variable's current raw value.
pub(crate) async fn write_bit(
	bus: &mut CanOpenSocket,
	node_id: u8,
	sdo: SdoAddress,
	variable: &Variable,
	name: &str,
	set: bool,
	timeout: Duration,
) -> Result<(), ClientError> {
	let raw = read_value(bus, node_id, sdo, variable, timeout).await?;
	let updated = variable.write_bit(&raw, name, set).ok_or_else(|| ClientError::UnknownBit(name.to_owned()))?;
	write_value(bus, node_id, sdo, variable, &updated, timeout).await.map_err(ClientError::from)
}

/// Which direction a [`SdoStream`] moves data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenMode {
	/// Upload (read) the object from the server.
	Read,
	/// Download (write) the object to the server.
	Write,
}

/// A streaming handle over an SDO object, picking segmented or block transfer once at `open` time.
///
/// This wraps the lower-level `upload`/`download`/block-transfer functions so a caller doesn't
/// have to choose between segmented and block transfer at every call site; the choice is fixed for
/// the lifetime of the stream.
pub struct SdoStream {
	node_id: u8,
	sdo: SdoAddress,
	object: ObjectIndex,
	mode: OpenMode,
	size_hint: Option<usize>,
	block_transfer: bool,
}

impl SdoStream {
	/// Open a streaming handle to `object`.
	///
	/// `size_hint`, if given, sizes the receive buffer for a segmented read; it has no effect on a
	/// block transfer or on writes. `block_transfer` selects SDO block transfer instead of plain
	/// segmented transfer.
	pub fn open(node_id: u8, sdo: SdoAddress, object: ObjectIndex, mode: OpenMode, size_hint: Option<usize>, block_transfer: bool) -> Self {
		Self { node_id, sdo, object, mode, size_hint, block_transfer }
	}

	/// Read the entire object. Only valid if this stream was opened with [`OpenMode::Read`].
	pub async fn read_to_end(&self, bus: &mut CanOpenSocket, timeout: Duration) -> Result<Vec<u8>, SdoError> {
		debug_assert_eq!(self.mode, OpenMode::Read);
		if self.block_transfer {
			bus.sdo_block_upload(self.node_id, self.sdo, self.object, DEFAULT_BLOCK_SIZE, timeout).await
		} else {
			let mut buffer = vec![0u8; self.size_hint.unwrap_or(8)];
			let len = bus.sdo_upload_raw(self.node_id, self.sdo, self.object, &mut buffer, timeout).await?;
			buffer.truncate(len);
			Ok(buffer)
		}
	}

	/// Write the entire object. Only valid if this stream was opened with [`OpenMode::Write`].
	pub async fn write_all(&self, bus: &mut CanOpenSocket, data: &[u8], timeout: Duration) -> Result<(), SdoError> {
		debug_assert_eq!(self.mode, OpenMode::Write);
		if self.block_transfer {
			bus.sdo_block_download(self.node_id, self.sdo, self.object, data, timeout).await
		} else {
			bus.sdo_download(self.node_id, self.sdo, self.object, data, timeout).await
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_size_rejects_mismatched_length() {
		assert!(DataType::Unsigned16.is_fixed_size());
		assert_eq!(DataType::Unsigned16.size(), 2);
		assert!(!DataType::VisibleString.is_fixed_size());
	}

	#[test]
	fn stream_open_records_the_chosen_transfer_mode() {
		let stream = SdoStream::open(5, SdoAddress::standard(), ObjectIndex::new(0x1008, 0), OpenMode::Read, Some(64), true);
		assert!(stream.block_transfer);
		assert_eq!(stream.mode, OpenMode::Read);
	}
}
