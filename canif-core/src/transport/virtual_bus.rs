//! In-process virtual bus
//!
//! Every frame sent on the bus is stamped and broadcast to all current
//! subscribers, including the sender's own subscription.

use crate::transport::{FrameSource, Transport};
use crate::types::{CanFrame, CanifError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct Hub {
    subscribers: Mutex<Vec<Sender<CanFrame>>>,
    closed: AtomicBool,
}

/// Cloneable handle to one virtual channel
#[derive(Clone)]
pub struct VirtualBus {
    channel: String,
    hub: Arc<Hub>,
}

impl VirtualBus {
    /// Create a new, empty channel
    pub fn new(channel: &str) -> Self {
        log::info!("Opening virtual CAN channel {}", channel);
        Self {
            channel: channel.to_string(),
            hub: Arc::new(Hub {
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Close the channel. Pending frames are still delivered, then every
    /// source reports closed.
    pub fn shutdown(&self) {
        self.hub.closed.store(true, Ordering::Relaxed);
        self.hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for VirtualBus {
    fn send(&self, can_id: u32, is_extended: bool, data: &[u8]) -> Result<()> {
        if self.hub.closed.load(Ordering::Relaxed) {
            return Err(CanifError::Transport(format!(
                "virtual channel {} is closed",
                self.channel
            )));
        }
        if data.len() > 64 {
            return Err(CanifError::Transport(format!(
                "payload of {} bytes exceeds the CAN-FD limit",
                data.len()
            )));
        }

        let frame = CanFrame::new(can_id, is_extended, data);
        if !frame.has_valid_id() {
            return Err(CanifError::Transport(format!(
                "Invalid CAN id 0x{:X} for a {} frame",
                can_id,
                if is_extended { "29-bit" } else { "11-bit" }
            )));
        }
        log::trace!("{} TX {}", self.channel, frame);

        let mut subscribers = self
            .hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Result<Box<dyn FrameSource>> {
        if self.hub.closed.load(Ordering::Relaxed) {
            return Err(CanifError::Transport(format!(
                "virtual channel {} is closed",
                self.channel
            )));
        }
        let (tx, rx) = mpsc::channel();
        self.hub
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(Box::new(VirtualSource { rx, closed: false }))
    }

    fn describe(&self) -> String {
        format!("virtual {}", self.channel)
    }
}

struct VirtualSource {
    rx: Receiver<CanFrame>,
    closed: bool,
}

impl FrameSource for VirtualSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
