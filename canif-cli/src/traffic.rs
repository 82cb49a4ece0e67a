//! Test-traffic generator
//!
//! Pretends to be the far end of the bus: once per interval a counter runs
//! from 1 to 10; at 5 every message addressed to the node is sent with all
//! signals set to 1, at 10 with all signals set to 0, and the counter wraps.

use canif_core::{MessageSchema, SchemaAdapter, SignalMap, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STOP_POLL: Duration = Duration::from_millis(100);

/// Advance the counter; returns the new counter and the value to send, if any
fn tick(counter: u32) -> (u32, Option<f64>) {
    match counter + 1 {
        5 => (5, Some(1.0)),
        10 => (0, Some(0.0)),
        next => (next, None),
    }
}

pub struct TrafficGenerator {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TrafficGenerator {
    /// Start sending to every message whose receivers include `node`
    pub fn start(
        schema: Arc<dyn SchemaAdapter>,
        transport: Arc<dyn Transport>,
        node: &str,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let mut targets: Vec<MessageSchema> = schema
            .messages()
            .iter()
            .filter(|m| m.receivers.contains(node))
            .cloned()
            .collect();
        targets.sort_by_key(|m| m.frame_id);
        log::info!(
            "Test traffic: {} messages addressed to {}",
            targets.len(),
            node
        );

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("canif-traffic".into())
            .spawn(move || {
                let mut counter = 0;
                while !flag.load(Ordering::Relaxed) {
                    let deadline = Instant::now() + interval;
                    while !flag.load(Ordering::Relaxed) && Instant::now() < deadline {
                        thread::sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now())));
                    }
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }

                    let (next, value) = tick(counter);
                    counter = next;
                    if let Some(value) = value {
                        send_all(schema.as_ref(), transport.as_ref(), &targets, value);
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn send_all(schema: &dyn SchemaAdapter, transport: &dyn Transport, targets: &[MessageSchema], value: f64) {
    for message in targets {
        let values: SignalMap = message
            .signals
            .iter()
            .map(|s| (s.name.clone(), value))
            .collect();
        let result = schema
            .encode(message, &values)
            .and_then(|data| transport.send(message.frame_id, message.is_extended, &data));
        if let Err(e) = result {
            log::warn!("Test traffic: {} not sent: {}", message.name, e);
        }
    }
}
