//! DBC file parser
//!
//! Parses Vector DBC files with the `can-dbc` crate and converts them into
//! our schema types: value descriptions become choice tables and the
//! `GenSigStartValue` attribute becomes the signal's initial value.

use crate::signals::database::{ByteOrder, MessageSchema, SignalSchema, ValueType};
use crate::types::{CanifError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// DBC marks extended identifiers by setting bit 31
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

const START_VALUE_ATTRIBUTE: &str = "GenSigStartValue";

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageSchema>> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        CanifError::DbcParse(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // DBC files are frequently Windows-1252; fall back to Latin-1
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc");

    let messages = parse_dbc_str(&content, source)?;
    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

/// Parse DBC text; `source` only labels error messages
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<MessageSchema>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        CanifError::DbcParse(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    let start_values = collect_start_values(&dbc);
    let extra_senders = collect_extra_senders(&dbc);

    dbc.messages()
        .iter()
        .map(|msg| convert_message(&dbc, msg, &start_values, &extra_senders))
        .collect()
}

/// (raw message id, signal name) -> raw start value
fn collect_start_values(dbc: &can_dbc::DBC) -> HashMap<(u32, String), f64> {
    let mut values = HashMap::new();
    for attr in dbc.attribute_values() {
        if attr.attribute_name() != START_VALUE_ATTRIBUTE {
            continue;
        }
        if let can_dbc::AttributeValuedForObjectType::SignalAttributeValue(
            message_id,
            signal_name,
            value,
        ) = attr.attribute_value()
        {
            if let Some(raw) = attribute_number(value) {
                values.insert((message_id.0, signal_name.clone()), raw);
            }
        }
    }
    values
}

/// Additional transmitters declared with `BO_TX_BU_`
fn collect_extra_senders(dbc: &can_dbc::DBC) -> HashMap<u32, Vec<String>> {
    let mut senders: HashMap<u32, Vec<String>> = HashMap::new();
    for entry in dbc.message_transmitters() {
        let names = senders.entry(entry.message_id().0).or_default();
        for transmitter in entry.transmitter() {
            if let can_dbc::Transmitter::NodeName(name) = transmitter {
                names.push(name.clone());
            }
        }
    }
    senders
}

fn attribute_number(value: &can_dbc::AttributeValue) -> Option<f64> {
    match value {
        can_dbc::AttributeValue::AttributeValueU64(v) => Some(*v as f64),
        can_dbc::AttributeValue::AttributeValueI64(v) => Some(*v as f64),
        can_dbc::AttributeValue::AttributeValueF64(v) => Some(*v),
        can_dbc::AttributeValue::AttributeValueCharString(_) => None,
    }
}

/// Convert a can-dbc message to our MessageSchema
fn convert_message(
    dbc: &can_dbc::DBC,
    dbc_msg: &can_dbc::Message,
    start_values: &HashMap<(u32, String), f64>,
    extra_senders: &HashMap<u32, Vec<String>>,
) -> Result<MessageSchema> {
    let raw_id = dbc_msg.message_id().0;

    let mut senders = BTreeSet::new();
    if let can_dbc::Transmitter::NodeName(name) = dbc_msg.transmitter() {
        senders.insert(name.to_string());
    }
    if let Some(names) = extra_senders.get(&raw_id) {
        senders.extend(names.iter().cloned());
    }

    let mut receivers = BTreeSet::new();
    let mut signals = Vec::with_capacity(dbc_msg.signals().len());
    for dbc_sig in dbc_msg.signals() {
        if matches!(
            dbc_sig.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::MultiplexedSignal(_)
        ) {
            log::warn!(
                "{}: multiplexed signal '{}' is treated as a plain signal",
                dbc_msg.message_name(),
                dbc_sig.name()
            );
        }
        receivers.extend(
            dbc_sig
                .receivers()
                .iter()
                .filter(|r| r.as_str() != "Vector__XXX")
                .cloned(),
        );

        let choices = dbc
            .value_descriptions_for_signal(can_dbc::MessageId(raw_id), dbc_sig.name())
            .map(|descriptions| {
                descriptions
                    .iter()
                    .map(|d| (*d.a() as i64, d.b().to_string()))
                    .collect::<BTreeMap<i64, String>>()
            });
        let raw_start = start_values
            .get(&(raw_id, dbc_sig.name().to_string()))
            .copied();

        signals.push(convert_signal(dbc_sig, choices, raw_start)?);
    }

    Ok(MessageSchema {
        frame_id: raw_id & !EXTENDED_ID_FLAG,
        is_extended: raw_id & EXTENDED_ID_FLAG != 0,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        signals,
        senders,
        receivers,
    })
}

/// Convert a can-dbc signal to our SignalSchema
fn convert_signal(
    dbc_sig: &can_dbc::Signal,
    choices: Option<BTreeMap<i64, String>>,
    raw_start: Option<f64>,
) -> Result<SignalSchema> {
    let length = *dbc_sig.signal_size();
    if length == 0 || length > 64 {
        return Err(CanifError::DbcParse(format!(
            "Signal '{}' has unsupported length {}",
            dbc_sig.name(),
            length
        )));
    }

    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let factor = *dbc_sig.factor();
    let offset = *dbc_sig.offset();

    Ok(SignalSchema {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: length as u16,
        byte_order,
        value_type,
        factor,
        offset,
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        choices: choices.filter(|c| !c.is_empty()),
        // start values are stored raw in the DBC
        initial: raw_start.map(|raw| raw * factor + offset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DBC: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_
    BA_DEF_DEF_

BS_:

BU_: ECU1 ECU2

BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
 SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2

BO_ 512 Control: 2 ECU2
 SG_ Mode : 0|2@1+ (1,0) [0|3] "" ECU1
 SG_ Setpoint : 8|8@1+ (0.5,0) [0|100] "%" ECU1

BO_ 2566844926 ExtendedMsg: 8 ECU1
 SG_ Value : 0|8@1+ (1,0) [0|255] "" ECU2

BA_DEF_ SG_  "GenSigStartValue" INT 0 65535;
BA_DEF_DEF_  "GenSigStartValue" 0;
BA_ "GenSigStartValue" SG_ 512 Setpoint 20;

VAL_ 512 Mode 0 "Off" 1 "On" 2 "Auto" ;
"#;

    #[test]
    fn test_parse_messages() {
        let messages = parse_dbc_str(DBC, "test.dbc").unwrap();
        assert_eq!(messages.len(), 3);

        let engine = messages.iter().find(|m| m.name == "EngineData").unwrap();
        assert_eq!(engine.frame_id, 291);
        assert_eq!(engine.size, 8);
        assert!(engine.senders.contains("ECU1"));
        assert!(engine.receivers.contains("ECU2"));
        assert_eq!(engine.signals.len(), 2);

        let temp = engine.signal("EngineTemp").unwrap();
        assert_eq!(temp.start_bit, 16);
        assert_eq!(temp.length, 8);
        assert_eq!(temp.offset, -40.0);
        assert_eq!(temp.unit, Some("C".to_string()));
        assert!(temp.choices.is_none());
    }

    #[test]
    fn test_choices_and_start_value() {
        let messages = parse_dbc_str(DBC, "test.dbc").unwrap();
        let control = messages.iter().find(|m| m.name == "Control").unwrap();

        let mode = control.signal("Mode").unwrap();
        let choices = mode.choices.as_ref().unwrap();
        assert_eq!(choices.get(&2), Some(&"Auto".to_string()));
        assert_eq!(mode.initial, None);

        // raw 20 scaled by 0.5
        let setpoint = control.signal("Setpoint").unwrap();
        assert_eq!(setpoint.initial, Some(10.0));
        assert_eq!(setpoint.default_value(), 10.0);
    }

    #[test]
    fn test_extended_id_masked() {
        let messages = parse_dbc_str(DBC, "test.dbc").unwrap();
        let ext = messages.iter().find(|m| m.name == "ExtendedMsg").unwrap();
        assert!(ext.is_extended);
        assert_eq!(ext.frame_id, 2566844926 & 0x1FFF_FFFF);
    }

    #[test]
    fn test_parse_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(DBC.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let result = parse_dbc_file(Path::new("/nonexistent/file.dbc"));
        assert!(matches!(result, Err(CanifError::DbcParse(_))));
    }
}
