//! Core types shared by every canif component
//!
//! Frames delivered by a transport, the signal value map that flows between
//! the codec, the store and the dispatcher, and the single error enum used
//! across the library.

use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// Result type for canif operations
pub type Result<T> = std::result::Result<T, CanifError>;

/// Physical signal values of one message, keyed by signal name
pub type SignalMap = HashMap<String, f64>;

/// Highest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest extended (29-bit) CAN identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A CAN frame as delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    /// Receive timestamp, captured by the transport at receipt
    pub timestamp: Timestamp,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl CanFrame {
    /// Build a frame stamped with the current time
    pub fn new(can_id: u32, is_extended: bool, data: &[u8]) -> Self {
        Self::at(Utc::now(), can_id, is_extended, data)
    }

    /// Build a frame with an explicit receive timestamp
    pub fn at(timestamp: Timestamp, can_id: u32, is_extended: bool, data: &[u8]) -> Self {
        Self {
            timestamp,
            can_id,
            data: data.to_vec(),
            is_extended,
        }
    }

    /// True if `can_id` fits the identifier width of this frame
    pub fn has_valid_id(&self) -> bool {
        let max = if self.is_extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        self.can_id <= max
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self
            .data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        if self.is_extended {
            write!(f, "{:08X} [{}] {}", self.can_id, self.dlc(), data)
        } else {
            write!(f, "{:03X} [{}] {}", self.can_id, self.dlc(), data)
        }
    }
}

/// Format a timestamp as local `HH:MM:SS.mmm`
pub fn format_clock(ts: &Timestamp) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S%.3f").to_string()
}

/// Error categories, used by callers that react per class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown message, signal or frame id
    Schema,
    /// Encode or decode failure
    Codec,
    /// Request rejected before any transport call
    Validation,
    /// Configuration file read/write failure
    Persistence,
    /// Bus send/receive failure
    Transport,
}

/// Errors raised by canif operations
#[derive(Debug, thiserror::Error)]
pub enum CanifError {
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message not found: CAN ID 0x{0:X}")]
    FrameIdNotFound(u32),

    #[error("Signal '{signal}' is not part of message {message}")]
    UnknownSignal { message: String, signal: String },

    #[error("Invalid msg id '{0}'")]
    InvalidMessageId(String),

    #[error("Failed to parse DBC file: {0}")]
    DbcParse(String),

    #[error("Failed to encode {message}: {reason}")]
    Encode { message: String, reason: String },

    #[error("Failed to decode {message}: {reason}")]
    Decode { message: String, reason: String },

    #[error("Expected {expected} signals for {message} but received {received}")]
    SignalCountMismatch {
        message: String,
        expected: usize,
        received: usize,
    },

    #[error("Duplicate signal '{signal}' for message {message}")]
    DuplicateSignal { message: String, signal: String },

    #[error("Trying to set response message: 0x{frame_id:X} {message}")]
    NotTransmittable { message: String, frame_id: u32 },

    #[error("No estop directive configured")]
    NotConfigured,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to access config file {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CanifError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CanifError::MessageNotFound(_)
            | CanifError::FrameIdNotFound(_)
            | CanifError::UnknownSignal { .. }
            | CanifError::InvalidMessageId(_)
            | CanifError::DbcParse(_) => ErrorKind::Schema,
            CanifError::Encode { .. } | CanifError::Decode { .. } => ErrorKind::Codec,
            CanifError::SignalCountMismatch { .. }
            | CanifError::DuplicateSignal { .. }
            | CanifError::NotTransmittable { .. }
            | CanifError::NotConfigured
            | CanifError::InvalidCommand(_)
            | CanifError::InvalidArgument(_) => ErrorKind::Validation,
            CanifError::Persistence { .. } | CanifError::Json(_) => ErrorKind::Persistence,
            CanifError::Transport(_) | CanifError::Io(_) => ErrorKind::Transport,
        }
    }
}
