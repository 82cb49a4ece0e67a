//! Signal database
//!
//! Holds the message and signal definitions loaded from a DBC file and
//! answers the lookups the rest of the library needs.

use crate::codec::MessageCodec;
use crate::signals::SchemaAdapter;
use crate::types::{CanifError, Result, SignalMap};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// A complete CAN message definition
#[derive(Debug, Clone)]
pub struct MessageSchema {
    /// CAN message ID (without the DBC extended-id flag)
    pub frame_id: u32,
    /// True if the frame uses a 29-bit identifier
    pub is_extended: bool,
    /// Message name
    pub name: String,
    /// Payload size in bytes
    pub size: usize,
    /// All signals in this message, in definition order
    pub signals: Vec<SignalSchema>,
    /// Nodes transmitting this message
    pub senders: BTreeSet<String>,
    /// Nodes receiving at least one signal of this message
    pub receivers: BTreeSet<String>,
}

impl MessageSchema {
    /// Find a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalSchema> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Frame id paired with its identifier format
    pub fn frame_key(&self) -> (u32, bool) {
        (self.frame_id, self.is_extended)
    }

    /// Signal names in definition order
    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.iter().map(|s| s.name.as_str())
    }
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalSchema {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit
    pub unit: Option<String>,
    /// Enumerated choices (raw value -> label)
    pub choices: Option<BTreeMap<i64, String>>,
    /// Declared initial value in physical units
    pub initial: Option<f64>,
}

impl SignalSchema {
    /// Label for a value, if the signal is enumerated and the value is known
    pub fn choice_label(&self, value: f64) -> Option<&str> {
        let table = self.choices.as_ref()?;
        if value.fract() != 0.0 {
            return None;
        }
        table.get(&(value as i64)).map(String::as_str)
    }

    /// Reverse choice lookup: label -> value
    pub fn choice_value(&self, label: &str) -> Option<f64> {
        self.choices
            .as_ref()?
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(v, _)| *v as f64)
    }

    /// Value used when nothing was persisted for this signal
    pub fn default_value(&self) -> f64 {
        self.initial.unwrap_or(0.0)
    }

    /// True if `value` lies inside the documented [min, max] range.
    /// A DBC range of [0|0] means "unspecified" and accepts everything.
    pub fn in_range(&self, value: f64) -> bool {
        if self.min == 0.0 && self.max == 0.0 {
            return true;
        }
        value >= self.min && value <= self.max
    }
}

/// Byte order for signal packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// The signal database
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// Messages sorted by descending frame id
    messages: Vec<MessageSchema>,
    /// (CAN ID, extended) -> index into `messages`
    by_id: HashMap<(u32, bool), usize>,
    /// Message name -> index into `messages`
    by_name: HashMap<String, usize>,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a DBC file
    pub fn from_dbc_file(path: &Path) -> Result<Self> {
        Ok(Self::from_messages(crate::signals::dbc::parse_dbc_file(path)?))
    }

    /// Load DBC definitions from text
    pub fn from_dbc_str(content: &str) -> Result<Self> {
        Ok(Self::from_messages(crate::signals::dbc::parse_dbc_str(
            content, "inline",
        )?))
    }

    /// Build a database from message definitions
    pub fn from_messages(messages: Vec<MessageSchema>) -> Self {
        let mut db = Self::new();
        for message in messages {
            db.add_message(message);
        }
        db
    }

    /// Add a message definition, replacing any earlier one with the same id.
    /// Standard and extended frames with equal ids are distinct messages.
    pub fn add_message(&mut self, message: MessageSchema) {
        if let Some(&idx) = self.by_id.get(&message.frame_key()) {
            log::warn!(
                "Duplicate frame id 0x{:X}: {} replaces {}",
                message.frame_id,
                message.name,
                self.messages[idx].name
            );
            self.messages.remove(idx);
        }
        self.messages.push(message);
        self.messages.sort_by(|a, b| b.frame_key().cmp(&a.frame_key()));
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
        for (idx, msg) in self.messages.iter().enumerate() {
            self.by_id.insert(msg.frame_key(), idx);
            self.by_name.insert(msg.name.clone(), idx);
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
        }
    }
}

impl SchemaAdapter for SignalDatabase {
    fn messages(&self) -> &[MessageSchema] {
        &self.messages
    }

    fn message_by_frame_id(&self, frame_id: u32, is_extended: bool) -> Result<&MessageSchema> {
        self.by_id
            .get(&(frame_id, is_extended))
            .map(|&idx| &self.messages[idx])
            .ok_or(CanifError::FrameIdNotFound(frame_id))
    }

    fn message_by_name(&self, name: &str) -> Result<&MessageSchema> {
        self.by_name
            .get(name)
            .map(|&idx| &self.messages[idx])
            .ok_or_else(|| CanifError::MessageNotFound(name.to_string()))
    }

    fn encode(&self, message: &MessageSchema, values: &SignalMap) -> Result<Vec<u8>> {
        MessageCodec::encode(message, values)
    }

    fn decode(&self, message: &MessageSchema, data: &[u8]) -> Result<SignalMap> {
        MessageCodec::decode(message, data)
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
