use super::{parse_number, DataType};

#[derive(Clone, Debug)]
pub struct Value {
    data: Vec<u8>,
}

impl Value {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn from_str(raw_value: &str, kind: DataType) -> Result<Value, String> {
        match kind {
            DataType::Unknown => Err("Unknown data type!".into()),

            DataType::Boolean => {
                let val = match raw_value.to_lowercase().as_str() {
                    "true" | "1" => 1u8,
                    "false" | "0" => 0u8,
                    _ => return Err("Invalid bool value".into()),
                };

                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Integer8 => {
                let val: i8 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Integer16 => {
                let val: i16 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Integer32 => {
                let val: i32 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Integer64 => {
                let val: i64 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Unsigned8 => {
                let val: u8 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Unsigned16 => {
                let val: u16 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Unsigned32 => {
                let val: u32 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Unsigned64 => {
                let val: u64 = parse_number(raw_value);
                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Real32 => {
                let Ok(val) = raw_value.parse::<f32>() else {
                    return Err("Failed to parse f32".into());
                };

                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::Real64 => {
                let Ok(val) = raw_value.parse::<f64>() else {
                    return Err("Failed to parse f64".into());
                };

                Ok(Value::from_bytes(&val.to_le_bytes()))
            }

            DataType::VisibleString
            | DataType::OctetString
            | DataType::UnicodeString => Ok(Value {
                data: raw_value.as_bytes().to_vec(),
            }),

            DataType::Domain => {
                let Ok(val) = raw_value.parse::<i32>() else {
                    return Err("Failed to parse domain id".into());
                };

                Ok(Value::from_bytes(&val.to_le_bytes()))
            }
        }
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// The raw wire encoding of this value.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Interpret this value as a signed integer according to `kind`.
    ///
    /// Returns `None` for string, domain and floating point types.
    pub fn to_i64(&self, kind: DataType) -> Option<i64> {
        match kind {
            DataType::Boolean | DataType::Unsigned8 => self.data.first().map(|&b| i64::from(b)),
            DataType::Integer8 => self.data.first().map(|&b| i64::from(b as i8)),
            DataType::Unsigned16 => Some(i64::from(u16::from_le_bytes(self.data.get(0..2)?.try_into().ok()?))),
            DataType::Integer16 => Some(i64::from(i16::from_le_bytes(self.data.get(0..2)?.try_into().ok()?))),
            DataType::Unsigned32 => Some(i64::from(u32::from_le_bytes(self.data.get(0..4)?.try_into().ok()?))),
            DataType::Integer32 => Some(i64::from(i32::from_le_bytes(self.data.get(0..4)?.try_into().ok()?))),
            DataType::Unsigned64 => Some(u64::from_le_bytes(self.data.get(0..8)?.try_into().ok()?) as i64),
            DataType::Integer64 => Some(i64::from_le_bytes(self.data.get(0..8)?.try_into().ok()?)),
            _ => None,
        }
    }

    /// Interpret this value as a floating point number according to `kind`.
    ///
    /// Integer types are widened to `f64`; string, domain types return `None`.
    pub fn to_f64(&self, kind: DataType) -> Option<f64> {
        match kind {
            DataType::Real32 => Some(f64::from(f32::from_le_bytes(self.data.get(0..4)?.try_into().ok()?))),
            DataType::Real64 => Some(f64::from_le_bytes(self.data.get(0..8)?.try_into().ok()?)),
            _ => self.to_i64(kind).map(|v| v as f64),
        }
    }

    /// Build a value from a signed integer, encoded as `kind`'s wire representation.
    ///
    /// Returns `None` for string, domain and floating point types.
    pub fn from_i64(val: i64, kind: DataType) -> Option<Value> {
        match kind {
            DataType::Boolean | DataType::Unsigned8 => Some(Value::from_bytes(&(val as u8).to_le_bytes())),
            DataType::Integer8 => Some(Value::from_bytes(&(val as i8).to_le_bytes())),
            DataType::Unsigned16 => Some(Value::from_bytes(&(val as u16).to_le_bytes())),
            DataType::Integer16 => Some(Value::from_bytes(&(val as i16).to_le_bytes())),
            DataType::Unsigned32 => Some(Value::from_bytes(&(val as u32).to_le_bytes())),
            DataType::Integer32 => Some(Value::from_bytes(&(val as i32).to_le_bytes())),
            DataType::Unsigned64 => Some(Value::from_bytes(&(val as u64).to_le_bytes())),
            DataType::Integer64 => Some(Value::from_bytes(&val.to_le_bytes())),
            _ => None,
        }
    }

    /// Build a value from a floating point number, encoded as `kind`'s wire representation.
    ///
    /// Integer types round to the nearest integer; string, domain types return `None`.
    pub fn from_f64(val: f64, kind: DataType) -> Option<Value> {
        match kind {
            DataType::Real32 => Some(Value::from_bytes(&(val as f32).to_le_bytes())),
            DataType::Real64 => Some(Value::from_bytes(&val.to_le_bytes())),
            _ => Value::from_i64(val.round() as i64, kind),
        }
    }

    /// Read this value as an unsigned bitmask, for named bit-field access.
    ///
    /// Values wider than 8 bytes are truncated; CiA 301 objects used as bit-mapped flags
    /// (status/control words and similar) never exceed 64 bits.
    pub(crate) fn as_bitmask(&self) -> u64 {
        let mut buf = [0u8; 8];
        let len = self.data.len().min(8);
        buf[..len].copy_from_slice(&self.data[..len]);
        u64::from_le_bytes(buf)
    }

    /// Rebuild a value of the same byte length as `self` from an updated bitmask.
    pub(crate) fn with_bitmask(&self, mask: u64) -> Value {
        let len = self.data.len().min(8);
        Value::from_bytes(&mask.to_le_bytes()[..len])
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}
