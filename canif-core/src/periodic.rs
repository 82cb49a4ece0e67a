//! Periodic renderer
//!
//! A background thread that runs a render callback every period. The
//! period is changed by message, so the thread is idle (not polling) while
//! disabled and wakes immediately on change or shutdown.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Render schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// No rendering
    Idle,
    /// Render once every interval
    Every(Duration),
    /// Exit the thread
    Shutdown,
}

impl Period {
    /// `0` disables, anything else is whole seconds
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Period::Idle
        } else {
            Period::Every(Duration::from_secs(secs))
        }
    }
}

pub struct PeriodicTask {
    tx: Sender<Period>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Start idle
    pub fn spawn<F>(render: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with(Period::Idle, render)
    }

    /// Start with an initial period
    pub fn spawn_with<F>(initial: Period, mut render: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Period>();
        let handle = thread::Builder::new()
            .name("canif-periodic".into())
            .spawn(move || {
                let mut period = initial;
                loop {
                    let next = match period {
                        Period::Shutdown => break,
                        Period::Idle => match rx.recv() {
                            Ok(next) => next,
                            Err(_) => break,
                        },
                        Period::Every(interval) => match rx.recv_timeout(interval) {
                            Ok(next) => next,
                            Err(RecvTimeoutError::Timeout) => {
                                render();
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        },
                    };
                    log::debug!("Periodic render: {:?}", next);
                    period = next;
                }
            })
            .ok();

        if handle.is_none() {
            log::error!("Failed to spawn periodic render thread");
        }
        Self { tx, handle }
    }

    /// Change the schedule; takes effect immediately
    pub fn set_period(&self, period: Period) {
        let _ = self.tx.send(period);
    }

    /// Stop the thread and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Period::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
