use std::collections::HashMap;

use crate::dictionary::{dict::format_properties_value, parse_number};

use super::{dict::Properties, AccessType, DataType, Value};

/// A single named bit within a variable's raw value, e.g. a statusword flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BitDefinition {
    /// Position of the bit, counting from the least significant bit (0-based).
    pub position: u8,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub storage_location: String,
    pub data_type: DataType,
    pub value: Value,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub pdo_mappable: bool,
    pub access_type: AccessType,
    pub parameter_value: Option<Value>,
    pub index: u16,
    pub sub_index: u8,

    /// Linear scaling factor applied between the raw wire value and the engineering (`phys`) value.
    pub factor: Option<f64>,
    /// Linear scaling offset applied between the raw wire value and the engineering (`phys`) value.
    pub offset: Option<f64>,
    /// Symbolic names for specific raw values, e.g. `0 => "Off"`, `1 => "On"`.
    pub value_descriptions: HashMap<i64, String>,
    /// Named single-bit flags within the raw value, e.g. a statusword's `"ready"` bit.
    pub bit_definitions: HashMap<String, BitDefinition>,
}

impl Variable {
    pub fn new(
        properties: &Properties,
        node_id: u8,
        name: &str,
        index: u16,
        sub_index: Option<u8>,
    ) -> Self {
        let storage_location = properties
            .get("StorageLocation")
            .cloned()
            .unwrap_or_default();

        let access_type = properties
            .get("AcessType")
            .map(|line| AccessType::from_str(&line))
            .unwrap_or(AccessType::READ_WRITE);

        let pdo_mapping = properties
            .get("PDOMapping")
            .unwrap_or(&String::from("0"))
            .parse::<i32>()
            .unwrap_or(0)
            != 0;

        let dt = properties
            .get("DataType")
            .map(|line| parse_number(&line))
            .map(|raw_dt| DataType::from_u32(raw_dt))
            .expect("DataType is not present in dict");

        let min = format_properties_value(properties, "LowLimit", node_id, dt);

        let max = format_properties_value(properties, "HighLimit", node_id, dt);

        let default_value =
            format_properties_value(properties, "DefaultValue", node_id, dt)
                .unwrap_or(Value::from_bytes(&dt.as_default_bytes()));

        let parameter_value =
            format_properties_value(properties, "ParameterValue", node_id, dt);

        let factor = parse_f64_property(properties, "Factor");
        let offset = parse_f64_property(properties, "Offset");
        let value_descriptions = parse_value_descriptions(properties);
        let bit_definitions = parse_bit_definitions(properties);

        Variable {
            name: name.to_owned(),
            storage_location,
            data_type: dt,
            access_type,
            pdo_mappable: pdo_mapping,
            min,
            max,
            value: default_value,
            parameter_value,
            index,
            sub_index: sub_index.unwrap_or(0),
            factor,
            offset,
            value_descriptions,
            bit_definitions,
        }
    }

    /// Convert a raw wire value to its scaled engineering value: `phys = raw * factor + offset`.
    ///
    /// Returns `None` if the value can't be interpreted as a number under this variable's data
    /// type (string/domain types), or if neither `factor` nor `offset` is defined.
    pub fn raw_to_phys(&self, raw: &Value) -> Option<f64> {
        if self.factor.is_none() && self.offset.is_none() {
            return None;
        }
        let raw = raw.to_f64(self.data_type)?;
        Some(raw * self.factor.unwrap_or(1.0) + self.offset.unwrap_or(0.0))
    }

    /// Convert a scaled engineering value back to a raw wire value: `raw = round((phys - offset) / factor)`.
    pub fn phys_to_raw(&self, phys: f64) -> Option<Value> {
        let factor = self.factor.unwrap_or(1.0);
        if factor == 0.0 {
            return None;
        }
        let raw = (phys - self.offset.unwrap_or(0.0)) / factor;
        if matches!(self.data_type, DataType::Real32 | DataType::Real64) {
            Value::from_f64(raw, self.data_type)
        } else {
            Value::from_i64(raw.round() as i64, self.data_type)
        }
    }

    /// Look up the symbolic name for a raw value, if one is defined.
    pub fn raw_to_desc(&self, raw: &Value) -> Option<String> {
        let key = raw.to_i64(self.data_type)?;
        self.value_descriptions.get(&key).cloned()
    }

    /// Look up the raw value for a symbolic name, if one is defined.
    pub fn desc_to_raw(&self, desc: &str) -> Option<Value> {
        let (&key, _) = self.value_descriptions.iter().find(|(_, name)| name.as_str() == desc)?;
        Value::from_i64(key, self.data_type)
    }

    /// Read a named bit out of a raw value.
    pub fn read_bit(&self, raw: &Value, name: &str) -> Option<bool> {
        let bit = self.bit_definitions.get(name)?;
        Some(raw.as_bitmask() & (1u64 << bit.position) != 0)
    }

    /// Set or clear a named bit in a raw value, returning the updated value.
    pub fn write_bit(&self, raw: &Value, name: &str, set: bool) -> Option<Value> {
        let bit = self.bit_definitions.get(name)?;
        let mut mask = raw.as_bitmask();
        if set {
            mask |= 1u64 << bit.position;
        } else {
            mask &= !(1u64 << bit.position);
        }
        Some(raw.with_bitmask(mask))
    }
}

/// Parse a plain decimal scaling property (`Factor`, `Offset`). Unlike [`parse_number`], these are
/// never hex-prefixed in practice (EDS scaling factors are e.g. `0.1`, `-273.15`).
fn parse_f64_property(properties: &Properties, name: &str) -> Option<f64> {
    let raw = properties.get(name)?;
    match raw.trim().parse::<f64>() {
        Ok(val) => Some(val),
        Err(_) => {
            log::warn!("Failed to parse {name}={raw:?} as a floating point number");
            None
        }
    }
}

/// Parse `ValueDescriptionN=label` properties into a raw-value -> label map.
///
/// `ValueDescriptionN` is a standard EDS field (paired with `ValueN`, or implicitly `N` itself when
/// `ValueN` is absent) used by configuration tools to show a symbolic name for an enumerated value.
fn parse_value_descriptions(properties: &Properties) -> HashMap<i64, String> {
    let mut descriptions = HashMap::new();
    let mut n = 0u32;
    loop {
        let Some(label) = properties.get(&format!("ValueDescription{n}")) else { break };
        let raw = match properties.get(&format!("Value{n}")) {
            Some(raw) => parse_number::<i64>(raw),
            None => i64::from(n),
        };
        descriptions.insert(raw, label.clone());
        n += 1;
    }
    descriptions
}

/// Parse `BitN=name` properties into a name -> bit-position map.
///
/// Not a standard EDS field (CiA 301 has no named-bitfield convention), but modeled on the same
/// per-index-key shape as the standard `ValueDescriptionN` field above.
fn parse_bit_definitions(properties: &Properties) -> HashMap<String, BitDefinition> {
    let mut bits = HashMap::new();
    for position in 0u8..64 {
        if let Some(name) = properties.get(&format!("Bit{position}")) {
            bits.insert(name.clone(), BitDefinition { position });
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable_with(factor: Option<f64>, offset: Option<f64>, data_type: DataType) -> Variable {
        Variable {
            name: "test".to_string(),
            storage_location: String::new(),
            data_type,
            value: Value::from_bytes(&data_type.as_default_bytes()),
            min: None,
            max: None,
            pdo_mappable: false,
            access_type: AccessType::READ_WRITE,
            parameter_value: None,
            index: 0x2000,
            sub_index: 0,
            factor,
            offset,
            value_descriptions: HashMap::new(),
            bit_definitions: HashMap::new(),
        }
    }

    #[test]
    fn scaling_round_trips_through_raw() {
        let variable = variable_with(Some(0.1), Some(-10.0), DataType::Integer16);
        let raw = Value::from_i64(500, DataType::Integer16).unwrap();
        let phys = variable.raw_to_phys(&raw).unwrap();
        assert!((phys - 40.0).abs() < 1e-9);

        let back = variable.phys_to_raw(phys).unwrap();
        assert_eq!(back.to_i64(DataType::Integer16), Some(500));
    }

    #[test]
    fn no_scaling_defined_returns_none() {
        let variable = variable_with(None, None, DataType::Integer16);
        let raw = Value::from_i64(500, DataType::Integer16).unwrap();
        assert_eq!(variable.raw_to_phys(&raw), None);
    }

    #[test]
    fn value_descriptions_round_trip() {
        let mut variable = variable_with(None, None, DataType::Unsigned8);
        variable.value_descriptions.insert(0, "Off".to_string());
        variable.value_descriptions.insert(1, "On".to_string());

        let raw = variable.desc_to_raw("On").unwrap();
        assert_eq!(raw.to_i64(DataType::Unsigned8), Some(1));
        assert_eq!(variable.raw_to_desc(&raw), Some("On".to_string()));
    }

    #[test]
    fn named_bits_are_read_and_written_independently() {
        let mut variable = variable_with(None, None, DataType::Unsigned16);
        variable.bit_definitions.insert("ready".to_string(), BitDefinition { position: 0 });
        variable.bit_definitions.insert("fault".to_string(), BitDefinition { position: 3 });

        let raw = Value::from_i64(0, DataType::Unsigned16).unwrap();
        assert_eq!(variable.read_bit(&raw, "ready"), Some(false));

        let raw = variable.write_bit(&raw, "ready", true).unwrap();
        assert_eq!(variable.read_bit(&raw, "ready"), Some(true));
        assert_eq!(variable.read_bit(&raw, "fault"), Some(false));

        let raw = variable.write_bit(&raw, "fault", true).unwrap();
        assert_eq!(raw.to_i64(DataType::Unsigned16), Some(0b1001));
    }
}
