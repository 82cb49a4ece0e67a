//! Reception Tracker
//!
//! Turns inbound frames into store updates. Frames for ids outside the
//! database are expected noise and dropped quietly; frames that fail to
//! decode are logged and dropped without touching the store.

use crate::signals::SchemaAdapter;
use crate::store::SignalStore;
use crate::transport::FrameListener;
use crate::types::{CanFrame, CanifError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Frame counters, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounters {
    pub decoded: u64,
    pub unknown: u64,
    pub failed: u64,
}

/// Listener that keeps the signal store in sync with the bus
pub struct ReceptionTracker {
    schema: Arc<dyn SchemaAdapter>,
    store: Arc<SignalStore>,
    decoded: AtomicU64,
    unknown: AtomicU64,
    failed: AtomicU64,
}

impl ReceptionTracker {
    pub fn new(schema: Arc<dyn SchemaAdapter>, store: Arc<SignalStore>) -> Self {
        Self {
            schema,
            store,
            decoded: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Process one frame
    pub fn handle_frame(&self, frame: &CanFrame) {
        let message = match self
            .schema
            .message_by_frame_id(frame.can_id, frame.is_extended)
        {
            Ok(message) => message,
            Err(_) => {
                log::trace!("Unknown CAN ID: 0x{:X}, ignored", frame.can_id);
                self.unknown.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let decoded = match self.schema.decode(message, &frame.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("{}", e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.store.apply_frame(&message.name, &decoded, frame.timestamp);
        self.decoded.fetch_add(1, Ordering::Relaxed);
        log::trace!("RX {} ({} signals)", message.name, decoded.len());
    }

    pub fn counters(&self) -> TrackerCounters {
        TrackerCounters {
            decoded: self.decoded.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl FrameListener for ReceptionTracker {
    fn on_frame(&self, frame: &CanFrame) {
        self.handle_frame(frame);
    }

    fn on_error(&self, error: &CanifError) {
        log::error!("Listener: {}", error);
    }
}
