//! Signal database and DBC parser
//!
//! The [`SchemaAdapter`] trait is the contract the rest of the library
//! codes against; [`SignalDatabase`] implements it from DBC files.

pub mod database;
pub mod dbc;

use crate::types::{Result, SignalMap};

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, MessageSchema, SignalDatabase, SignalSchema, ValueType,
};

/// Message/signal metadata plus pure encode/decode
pub trait SchemaAdapter: Send + Sync {
    /// All messages, ordered by DESCENDING frame id
    fn messages(&self) -> &[MessageSchema];

    /// Resolve a frame id in the given identifier format
    fn message_by_frame_id(&self, frame_id: u32, is_extended: bool) -> Result<&MessageSchema>;

    /// Resolve a message name
    fn message_by_name(&self, name: &str) -> Result<&MessageSchema>;

    /// Encode a full signal map into a payload
    fn encode(&self, message: &MessageSchema, values: &SignalMap) -> Result<Vec<u8>>;

    /// Decode a payload into a full signal map (raw choice values, not labels)
    fn decode(&self, message: &MessageSchema, data: &[u8]) -> Result<SignalMap>;
}
