//! CAN transports
//!
//! A [`Transport`] sends frames and hands out [`FrameSource`]s for the
//! inbound side. A [`Notifier`] drains a source on its own thread and
//! delivers every frame to the registered [`FrameListener`]s.

use crate::types::{CanFrame, CanifError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub mod virtual_bus;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use virtual_bus::VirtualBus;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use self::socketcan::SocketCanTransport;

/// How long a source may block before the notifier re-checks its stop flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outbound half of a bus
pub trait Transport: Send + Sync {
    /// Send one frame; never retries. `is_extended` selects the 29-bit
    /// identifier format.
    fn send(&self, can_id: u32, is_extended: bool, data: &[u8]) -> Result<()>;

    /// Open a new inbound subscription
    fn subscribe(&self) -> Result<Box<dyn FrameSource>>;

    /// Human-readable interface name
    fn describe(&self) -> String;
}

/// Inbound half of a bus
pub trait FrameSource: Send {
    /// Wait up to `timeout` for a frame. `Ok(None)` means nothing arrived.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>>;

    /// True once the source can never yield another frame
    fn is_closed(&self) -> bool {
        false
    }
}

/// Receives frames from a [`Notifier`]
pub trait FrameListener: Send + Sync {
    /// Called for every received frame
    fn on_frame(&self, frame: &CanFrame);

    /// Called for adapter-level faults; the notifier keeps running
    fn on_error(&self, error: &CanifError) {
        log::error!("Listener: {}", error);
    }
}

/// Background thread delivering frames to listeners
pub struct Notifier {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Start draining `source`
    pub fn start(mut source: Box<dyn FrameSource>, listeners: Vec<Arc<dyn FrameListener>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("canif-notifier".to_string())
            .spawn(move || {
                log::debug!("Notifier started with {} listener(s)", listeners.len());
                while !thread_stop.load(Ordering::Relaxed) {
                    match source.recv_timeout(POLL_INTERVAL) {
                        Ok(Some(frame)) => {
                            for listener in &listeners {
                                listener.on_frame(&frame);
                            }
                        }
                        Ok(None) => {
                            if source.is_closed() {
                                log::debug!("Frame source closed");
                                break;
                            }
                        }
                        Err(e) => {
                            for listener in &listeners {
                                listener.on_error(&e);
                            }
                        }
                    }
                }
                log::debug!("Notifier stopped");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn notifier thread: {}", e);
                None
            }
        };

        Self { stop, handle }
    }

    /// Wait for the thread to finish on its own (source closed)
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Notifier thread panicked");
            }
        }
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Notifier thread panicked");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        frames: Mutex<Vec<u32>>,
    }

    impl FrameListener for Collect {
        fn on_frame(&self, frame: &CanFrame) {
            self.frames.lock().unwrap().push(frame.can_id);
        }
    }

    #[test]
    fn test_notifier_delivers_until_closed() {
        let bus = VirtualBus::new("vcan-test");
        let source = bus.subscribe().unwrap();
        let listener = Arc::new(Collect::default());
        let notifier = Notifier::start(source, vec![listener.clone() as Arc<dyn FrameListener>]);

        bus.send(0x10, false, &[1]).unwrap();
        bus.send(0x20, false, &[2]).unwrap();
        bus.shutdown();
        notifier.join();

        assert_eq!(*listener.frames.lock().unwrap(), vec![0x10, 0x20]);
    }
}
