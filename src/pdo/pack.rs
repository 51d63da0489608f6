//! Bit-level packing and unpacking of mapped values into a PDO payload.
//!
//! Fields are packed LSB-first into a running 64-bit cursor, in mapping order,
//! starting at bit 0 of the payload. This matches how CiA 301 devices lay out
//! non-byte-aligned mappings (e.g. two 4-bit fields sharing a byte).

use super::{PdoConfigError, PdoMapping};

/// Maximum payload size of a PDO, in bits.
const MAX_PDO_BITS: u32 = 64;

/// Pack a list of `(mapping, raw value)` pairs into an 8-byte PDO payload.
///
/// Each raw value is truncated to its mapping's `bit_length` before being inserted.
/// Returns an error if the mappings don't fit in 64 bits.
pub fn pack_pdo(fields: &[(PdoMapping, u64)]) -> Result<[u8; 8], PdoConfigError> {
	let mut payload: u64 = 0;
	let mut cursor: u32 = 0;

	for (mapping, value) in fields {
		let bits = mapping.bit_length as u32;
		if cursor + bits > MAX_PDO_BITS {
			return Err(PdoConfigError::MappingTooLong(cursor + bits));
		}

		let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
		payload |= (value & mask) << cursor;
		cursor += bits;
	}

	Ok(payload.to_le_bytes())
}

/// Unpack the raw values of each mapped field out of a received PDO payload.
///
/// Returns one raw `u64` per mapping, containing the `bit_length` low bits of that field.
/// The caller is responsible for reinterpreting each raw value according to the object's
/// [`crate::dictionary::DataType`] (sign-extension, float reinterpretation, etc).
pub fn unpack_pdo(mappings: &[PdoMapping], data: &[u8]) -> Result<Vec<u64>, PdoConfigError> {
	let mut buf = [0u8; 8];
	let len = data.len().min(8);
	buf[..len].copy_from_slice(&data[..len]);
	let payload = u64::from_le_bytes(buf);

	let mut cursor: u32 = 0;
	let mut values = Vec::with_capacity(mappings.len());

	for mapping in mappings {
		let bits = mapping.bit_length as u32;
		if cursor + bits > MAX_PDO_BITS {
			return Err(PdoConfigError::MappingTooLong(cursor + bits));
		}

		let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
		values.push((payload >> cursor) & mask);
		cursor += bits;
	}

	Ok(values)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ObjectIndex;

	fn mapping(bits: u8) -> PdoMapping {
		PdoMapping {
			object: ObjectIndex::new(0x6041, 0),
			bit_length: bits,
		}
	}

	#[test]
	fn statusword_and_velocity_pack_as_in_worked_example() {
		// Statusword = 0x0237 (UINT16), Velocity actual value = -250 (INT32).
		let velocity_raw = (-250i32) as u32 as u64;
		let fields = vec![
			(mapping(16), 0x0237u64),
			(mapping(32), velocity_raw),
		];
		let packed = pack_pdo(&fields).unwrap();
		assert_eq!(packed, [0x37, 0x02, 0x06, 0xFF, 0xFF, 0xFF, 0x00, 0x00]);
	}

	#[test]
	fn pack_unpack_roundtrip() {
		let fields = vec![(mapping(4), 0b1010u64), (mapping(4), 0b0110u64), (mapping(8), 0xABu64)];
		let packed = pack_pdo(&fields).unwrap();
		let mappings: Vec<_> = fields.iter().map(|(m, _)| *m).collect();
		let unpacked = unpack_pdo(&mappings, &packed).unwrap();
		assert_eq!(unpacked, vec![0b1010, 0b0110, 0xAB]);
	}

	#[test]
	fn overflowing_mapping_is_rejected() {
		let fields = vec![(mapping(32), 0u64), (mapping(32), 0u64), (mapping(8), 0u64)];
		assert!(matches!(pack_pdo(&fields), Err(PdoConfigError::MappingTooLong(_))));
	}
}
