//! SDO block upload/download: the high-throughput transfer mode for large objects.
//!
//! Unlike expedited and segmented transfers, a block exchanges several segments before the
//! server acknowledges them, trading a round-trip per segment for a single CRC check at the end.

use can_socket::CanFrame;
use std::time::Duration;

use crate::{CanOpenSocket, ObjectIndex};

use super::{SdoAddress, SdoError};

const CMD_INITIATE_BLOCK_DOWNLOAD: u8 = 6 << 5;
const CMD_BLOCK_DOWNLOAD_RESPONSE: u8 = 5 << 5;
const CMD_END_BLOCK_DOWNLOAD: u8 = 6 << 5;
const CMD_INITIATE_BLOCK_UPLOAD: u8 = 5 << 5;
const CMD_BLOCK_UPLOAD_RESPONSE: u8 = 6 << 5;

/// Number of data bytes carried by one block segment frame.
const SEGMENT_SIZE: usize = 7;

fn crc_of(data: &[u8]) -> u16 {
	crc16::State::<crc16::XMODEM>::calculate(data)
}

async fn recv(bus: &mut CanOpenSocket, address: SdoAddress, node_id: u8, timeout: Duration) -> Result<[u8; 8], SdoError> {
	let frame = bus.recv_new_by_can_id(address.response_id(node_id), timeout)
		.await
		.map_err(SdoError::RecvFailed)?
		.ok_or(SdoError::Timeout)?;
	let data = frame.data()
		.ok_or(SdoError::MalformedResponse(super::MalformedResponse::WrongFrameSize(0)))?;
	let data = data.as_slice();
	data.try_into().map_err(|_| SdoError::MalformedResponse(super::MalformedResponse::WrongFrameSize(data.len())))
}

/// Perform an SDO block download (write a large object to the server).
pub(crate) async fn sdo_block_download(
	bus: &mut CanOpenSocket,
	node_id: u8,
	address: SdoAddress,
	object: ObjectIndex,
	data: &[u8],
	timeout: Duration,
) -> Result<(), SdoError> {
	let index = object.index.to_le_bytes();
	let size = (data.len() as u32).to_le_bytes();
	// ccs = 6, cc = 1 (crc supported), s = 1 (size indicated).
	let command = [
		CMD_INITIATE_BLOCK_DOWNLOAD | 0b0000_0110,
		index[0],
		index[1],
		object.subindex,
		size[0],
		size[1],
		size[2],
		size[3],
	];
	bus.send_frame(&CanFrame::new(address.command_id(node_id), command)).await.map_err(SdoError::SendFailed)?;

	let response = recv(bus, address, node_id, timeout).await?;
	if response[0] & 0b1110_0000 != CMD_BLOCK_DOWNLOAD_RESPONSE {
		return Err(SdoError::MalformedResponse(super::MalformedResponse::InvalidServerCommand(response[0])));
	}
	let mut blksize = response[4];

	let total_segments = data.len().div_ceil(SEGMENT_SIZE).max(1);
	let mut segment_num = 0usize;
	let mut block_start = 0usize;
	let mut seqnum = 1u8;

	while segment_num < total_segments {
		let start = segment_num * SEGMENT_SIZE;
		let len = (data.len() - start).min(SEGMENT_SIZE);
		let last = start + len == data.len();

		let mut payload = [0u8; 8];
		payload[0] = (u8::from(last) << 7) | seqnum;
		payload[1..1 + len].copy_from_slice(&data[start..start + len]);
		bus.send_frame(&CanFrame::new(address.command_id(node_id), payload)).await.map_err(SdoError::SendFailed)?;

		if last || seqnum == blksize {
			let response = recv(bus, address, node_id, timeout).await?;
			if response[0] & 0b1110_0000 != (5 << 5) || response[0] & 0b11 != 2 {
				return Err(SdoError::MalformedResponse(super::MalformedResponse::InvalidServerCommand(response[0])));
			}
			let ackseq = response[1];
			blksize = response[2];
			if ackseq == seqnum {
				seqnum = 1;
				segment_num += 1;
				block_start = segment_num;
			} else {
				seqnum = ackseq + 1;
				segment_num = block_start + ackseq as usize;
				if blksize < seqnum {
					return Err(SdoError::BlockSizeTooSmall { resend_from: seqnum, blksize });
				}
			}
		} else {
			seqnum += 1;
			segment_num += 1;
		}
	}

	let crc = crc_of(data);
	let n = ((SEGMENT_SIZE - data.len() % SEGMENT_SIZE) % SEGMENT_SIZE) as u8;
	let crc_bytes = crc.to_le_bytes();
	let end_command = [CMD_END_BLOCK_DOWNLOAD | 1 | (n << 2), crc_bytes[0], crc_bytes[1], 0, 0, 0, 0, 0];
	bus.send_frame(&CanFrame::new(address.command_id(node_id), end_command)).await.map_err(SdoError::SendFailed)?;

	let response = recv(bus, address, node_id, timeout).await?;
	if response[0] & 0b1110_0000 == (5 << 5) && response[0] & 0b11 == 1 {
		Ok(())
	} else {
		Err(SdoError::MalformedResponse(super::MalformedResponse::InvalidServerCommand(response[0])))
	}
}

/// Perform an SDO block upload (read a large object from the server).
pub(crate) async fn sdo_block_upload(
	bus: &mut CanOpenSocket,
	node_id: u8,
	address: SdoAddress,
	object: ObjectIndex,
	blksize: u8,
	timeout: Duration,
) -> Result<Vec<u8>, SdoError> {
	let index = object.index.to_le_bytes();
	// ccs = 5, cc = 1 (crc supported).
	let command = [CMD_INITIATE_BLOCK_UPLOAD | 0b0000_0100, index[0], index[1], object.subindex, blksize, 0, 0, 0];
	bus.send_frame(&CanFrame::new(address.command_id(node_id), command)).await.map_err(SdoError::SendFailed)?;

	let response = recv(bus, address, node_id, timeout).await?;
	if response[0] & 0b1110_0000 != CMD_BLOCK_UPLOAD_RESPONSE {
		return Err(SdoError::MalformedResponse(super::MalformedResponse::InvalidServerCommand(response[0])));
	}
	let crc_enabled = response[0] & 0b0000_0100 != 0;
	let size = u32::from_le_bytes(response[4..8].try_into().unwrap());

	// Start the upload by sending the "start block upload" sub-command (ccs = 5, cs = 3).
	let start = [(5 << 5) | 3, 0, 0, 0, 0, 0, 0, 0];
	bus.send_frame(&CanFrame::new(address.command_id(node_id), start)).await.map_err(SdoError::SendFailed)?;

	let mut buffer = Vec::with_capacity(size as usize);
	let mut seqnum_expected = 1u8;
	'blocks: loop {
		loop {
			let frame = bus.recv_new_by_can_id(address.response_id(node_id), timeout)
				.await
				.map_err(SdoError::RecvFailed)?
				.ok_or(SdoError::Timeout)?;
			let Some(data) = frame.data() else { continue };
			let data = data.as_slice();
			if data.len() != 8 {
				continue;
			}
			let seqnum = data[0] & 0x7F;
			let last = data[0] & 0x80 != 0;
			if seqnum == seqnum_expected {
				buffer.extend_from_slice(&data[1..8]);
				seqnum_expected += 1;
			}
			if last || seqnum_expected > blksize {
				let ackseq = if seqnum == seqnum_expected - 1 { seqnum } else { seqnum_expected.saturating_sub(2) };
				let ack = [(5 << 5) | 2, ackseq, blksize, 0, 0, 0, 0, 0];
				bus.send_frame(&CanFrame::new(address.command_id(node_id), ack)).await.map_err(SdoError::SendFailed)?;
				seqnum_expected = 1;
				if last {
					break 'blocks;
				}
				break;
			}
		}
	}

	let response = recv(bus, address, node_id, timeout).await?;
	if response[0] & 0b1110_0000 != (5 << 5) || response[0] & 0b11 != 1 {
		return Err(SdoError::MalformedResponse(super::MalformedResponse::InvalidServerCommand(response[0])));
	}
	let n = (response[0] >> 2) & 0b111;
	let end_len = buffer.len().saturating_sub(n as usize);
	buffer.truncate(end_len);
	buffer.truncate(size as usize);

	if crc_enabled {
		let expected = u16::from_le_bytes(response[1..3].try_into().unwrap());
		let actual = crc_of(&buffer);
		if expected != actual {
			return Err(SdoError::BlockCrcMismatch { expected, actual });
		}
	}

	Ok(buffer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn crc_matches_xmodem_reference_vector() {
		assert_eq!(crc_of(b"123456789"), 0x31C3);
	}
}
