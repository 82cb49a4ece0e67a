//! Message Codec
//!
//! Packs physical signal values into CAN payloads and extracts them back,
//! following the DBC bit layout: Intel (little-endian) signals count bits
//! upward from the LSB, Motorola (big-endian) signals start at the MSB and
//! walk the sawtooth bit numbering.

use crate::signals::database::{ByteOrder, MessageSchema, SignalSchema, ValueType};
use crate::types::{CanifError, Result, SignalMap};

/// Stateless encoder/decoder for one message layout
pub struct MessageCodec;

impl MessageCodec {
    /// Encode every signal of `message` from `values`
    ///
    /// Values outside the documented [min, max] range are packed as long as
    /// their raw representation fits the signal width.
    pub fn encode(message: &MessageSchema, values: &SignalMap) -> Result<Vec<u8>> {
        let mut data = vec![0u8; message.size];

        for signal in &message.signals {
            let value = values.get(&signal.name).copied().ok_or_else(|| {
                Self::encode_error(message, format!("missing signal '{}'", signal.name))
            })?;
            let raw = Self::physical_to_raw(message, signal, value)?;
            Self::check_fits(message, signal, &data)?;

            match signal.byte_order {
                ByteOrder::LittleEndian => {
                    Self::insert_little_endian(&mut data, signal.start_bit as usize, signal.length as usize, raw)
                }
                ByteOrder::BigEndian => {
                    Self::insert_big_endian(&mut data, signal.start_bit as usize, signal.length as usize, raw)
                }
            }
        }

        Ok(data)
    }

    /// Decode every signal of `message` from `data`
    pub fn decode(message: &MessageSchema, data: &[u8]) -> Result<SignalMap> {
        let mut values = SignalMap::with_capacity(message.signals.len());

        for signal in &message.signals {
            if let Err(reason) = Self::required_bytes(signal).and_then(|needed| {
                if needed > data.len() {
                    Err(format!(
                        "signal '{}' requires {} bytes but frame only has {} bytes",
                        signal.name,
                        needed,
                        data.len()
                    ))
                } else {
                    Ok(())
                }
            }) {
                return Err(CanifError::Decode {
                    message: message.name.clone(),
                    reason,
                });
            }

            let raw = Self::extract_signal_value(data, signal);
            values.insert(signal.name.clone(), signal.offset + signal.factor * raw);
        }

        Ok(values)
    }

    fn encode_error(message: &MessageSchema, reason: String) -> CanifError {
        CanifError::Encode {
            message: message.name.clone(),
            reason,
        }
    }

    fn check_fits(message: &MessageSchema, signal: &SignalSchema, data: &[u8]) -> Result<()> {
        match Self::required_bytes(signal) {
            Ok(needed) if needed <= data.len() => Ok(()),
            Ok(needed) => Err(Self::encode_error(
                message,
                format!(
                    "signal '{}' needs {} bytes but message size is {}",
                    signal.name,
                    needed,
                    data.len()
                ),
            )),
            Err(reason) => Err(Self::encode_error(message, reason)),
        }
    }

    /// Number of payload bytes a signal touches
    fn required_bytes(signal: &SignalSchema) -> std::result::Result<usize, String> {
        let start = signal.start_bit as usize;
        let length = signal.length as usize;
        match signal.byte_order {
            ByteOrder::LittleEndian => Ok((start + length).div_ceil(8)),
            ByteOrder::BigEndian => {
                // MSB lives at `start`; the remaining bits continue into the
                // following bytes
                let bits_in_first = start % 8 + 1;
                if length <= bits_in_first {
                    Ok(start / 8 + 1)
                } else {
                    Ok(start / 8 + 1 + (length - bits_in_first).div_ceil(8))
                }
            }
        }
    }

    /// Scale a physical value to the raw integer stored on the wire
    fn physical_to_raw(message: &MessageSchema, signal: &SignalSchema, value: f64) -> Result<u64> {
        if !value.is_finite() {
            return Err(Self::encode_error(
                message,
                format!("signal '{}' has non-finite value {}", signal.name, value),
            ));
        }
        if signal.factor == 0.0 {
            return Err(Self::encode_error(
                message,
                format!("signal '{}' has a zero scale factor", signal.name),
            ));
        }

        let raw = ((value - signal.offset) / signal.factor).round();
        let length = signal.length as u32;
        let (lo, hi) = match signal.value_type {
            ValueType::Unsigned => (0.0, 2f64.powi(length as i32) - 1.0),
            ValueType::Signed => (
                -(2f64.powi(length as i32 - 1)),
                2f64.powi(length as i32 - 1) - 1.0,
            ),
        };
        if raw < lo || raw > hi {
            return Err(Self::encode_error(
                message,
                format!(
                    "signal '{}' value {} (raw {}) does not fit in {} bits",
                    signal.name, value, raw, length
                ),
            ));
        }

        let mask = if length >= 64 { u64::MAX } else { (1u64 << length) - 1 };
        let bits = match signal.value_type {
            ValueType::Unsigned => raw as u64,
            ValueType::Signed => raw as i64 as u64,
        };
        Ok(bits & mask)
    }

    /// Extract the raw signal value from CAN frame data; signed values are
    /// sign-extended, unsigned values keep all 64 bits
    fn extract_signal_value(data: &[u8], signal: &SignalSchema) -> f64 {
        let start_bit = signal.start_bit as usize;
        let length = signal.length as usize;

        let raw_value = match signal.byte_order {
            ByteOrder::LittleEndian => Self::extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => Self::extract_big_endian(data, start_bit, length),
        };

        match signal.value_type {
            ValueType::Unsigned => raw_value as f64,
            ValueType::Signed => Self::sign_extend(raw_value, length) as f64,
        }
    }

    /// Next bit position of a Motorola signal, moving from MSB towards LSB
    fn next_motorola_bit(pos: usize) -> usize {
        if pos % 8 == 0 {
            pos + 15
        } else {
            pos - 1
        }
    }

    fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;

        for i in 0..length {
            let bit_pos = start_bit + i;
            let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
            result |= (bit_value as u64) << i;
        }

        result
    }

    fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
        let mut result: u64 = 0;
        let mut pos = start_bit;

        for i in 0..length {
            let bit_value = (data[pos / 8] >> (pos % 8)) & 0x01;
            result = (result << 1) | bit_value as u64;
            if i + 1 < length {
                pos = Self::next_motorola_bit(pos);
            }
        }

        result
    }

    fn insert_little_endian(data: &mut [u8], start_bit: usize, length: usize, raw: u64) {
        for i in 0..length {
            let bit_pos = start_bit + i;
            let mask = 1u8 << (bit_pos % 8);
            if (raw >> i) & 0x01 == 1 {
                data[bit_pos / 8] |= mask;
            } else {
                data[bit_pos / 8] &= !mask;
            }
        }
    }

    fn insert_big_endian(data: &mut [u8], start_bit: usize, length: usize, raw: u64) {
        let mut pos = start_bit;

        for i in 0..length {
            let mask = 1u8 << (pos % 8);
            if (raw >> (length - 1 - i)) & 0x01 == 1 {
                data[pos / 8] |= mask;
            } else {
                data[pos / 8] &= !mask;
            }
            if i + 1 < length {
                pos = Self::next_motorola_bit(pos);
            }
        }
    }

    /// Sign-extend a value from N bits to 64 bits
    fn sign_extend(value: u64, bit_length: usize) -> i64 {
        if bit_length >= 64 {
            return value as i64;
        }

        let sign_bit = 1u64 << (bit_length - 1);
        if (value & sign_bit) != 0 {
            let mask = !0u64 << bit_length;
            (value | mask) as i64
        } else {
            value as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn signal(name: &str, start_bit: u16, length: u16, order: ByteOrder) -> SignalSchema {
        SignalSchema {
            name: name.to_string(),
            start_bit,
            length,
            byte_order: order,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            choices: None,
            initial: None,
        }
    }

    fn message(size: usize, signals: Vec<SignalSchema>) -> MessageSchema {
        MessageSchema {
            frame_id: 0x100,
            is_extended: false,
            name: "Test".to_string(),
            size,
            signals,
            senders: BTreeSet::new(),
            receivers: BTreeSet::new(),
        }
    }

    fn values(pairs: &[(&str, f64)]) -> SignalMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(MessageCodec::extract_little_endian(&data, 0, 8), 0xAB);
        assert_eq!(MessageCodec::extract_little_endian(&data, 0, 16), 0xCDAB);
    }

    #[test]
    fn test_extract_big_endian() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        // 8 bits with MSB at bit 7 is byte 0
        assert_eq!(MessageCodec::extract_big_endian(&data, 7, 8), 0xAB);
        // 16 bits with MSB at bit 7 spans bytes 0..2 in network order
        assert_eq!(MessageCodec::extract_big_endian(&data, 7, 16), 0xABCD);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(MessageCodec::sign_extend(0x7F, 8), 127);
        assert_eq!(MessageCodec::sign_extend(0xFF, 8), -1);
        assert_eq!(MessageCodec::sign_extend(0x8000, 16), -32768);
    }

    #[test]
    fn test_encode_little_endian_layout() {
        let msg = message(
            4,
            vec![
                signal("A", 0, 16, ByteOrder::LittleEndian),
                signal("B", 16, 4, ByteOrder::LittleEndian),
            ],
        );
        let data = MessageCodec::encode(&msg, &values(&[("A", 0x1234 as f64), ("B", 5.0)])).unwrap();
        assert_eq!(data, vec![0x34, 0x12, 0x05, 0x00]);
    }

    #[test]
    fn test_encode_big_endian_layout() {
        let msg = message(2, vec![signal("A", 7, 16, ByteOrder::BigEndian)]);
        let data = MessageCodec::encode(&msg, &values(&[("A", 0xABCD as f64)])).unwrap();
        assert_eq!(data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_scaled_signed_value() {
        let mut temp = signal("Temp", 0, 8, ByteOrder::LittleEndian);
        temp.value_type = ValueType::Signed;
        temp.factor = 0.5;
        temp.offset = 10.0;
        let msg = message(1, vec![temp]);

        let data = MessageCodec::encode(&msg, &values(&[("Temp", 5.0)])).unwrap();
        // (5 - 10) / 0.5 = -10
        assert_eq!(data, vec![0xF6]);
        let decoded = MessageCodec::decode(&msg, &data).unwrap();
        assert_eq!(decoded["Temp"], 5.0);
    }

    #[test]
    fn test_encode_missing_signal() {
        let msg = message(1, vec![signal("A", 0, 8, ByteOrder::LittleEndian)]);
        let err = MessageCodec::encode(&msg, &SignalMap::new()).unwrap_err();
        assert!(matches!(err, CanifError::Encode { .. }));
    }

    #[test]
    fn test_encode_overflow_rejected() {
        let msg = message(1, vec![signal("A", 0, 4, ByteOrder::LittleEndian)]);
        assert!(MessageCodec::encode(&msg, &values(&[("A", 15.0)])).is_ok());
        assert!(MessageCodec::encode(&msg, &values(&[("A", 16.0)])).is_err());
        assert!(MessageCodec::encode(&msg, &values(&[("A", f64::NAN)])).is_err());
    }

    #[test]
    fn test_unsigned_64_bit_keeps_top_bit() {
        let msg = message(8, vec![signal("Big", 0, 64, ByteOrder::LittleEndian)]);
        let data = [0, 0, 0, 0, 0, 0, 0, 0x80];

        let decoded = MessageCodec::decode(&msg, &data).unwrap();
        assert_eq!(decoded["Big"], 9_223_372_036_854_775_808.0);

        let encoded = MessageCodec::encode(&msg, &decoded).unwrap();
        assert_eq!(encoded, data.to_vec());
    }

    #[test]
    fn test_signed_64_bit_negative() {
        let mut big = signal("Big", 0, 64, ByteOrder::LittleEndian);
        big.value_type = ValueType::Signed;
        let msg = message(8, vec![big]);

        let data = MessageCodec::encode(&msg, &values(&[("Big", -2.0)])).unwrap();
        assert_eq!(data, vec![0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(MessageCodec::decode(&msg, &data).unwrap()["Big"], -2.0);
    }

    #[test]
    fn test_decode_short_payload() {
        let msg = message(2, vec![signal("A", 0, 16, ByteOrder::LittleEndian)]);
        let err = MessageCodec::decode(&msg, &[0x01]).unwrap_err();
        assert!(matches!(err, CanifError::Decode { .. }));
    }
}
