//! Signal Store
//!
//! The single shared table of current signal values plus the receive
//! statistics of measurement messages. Both live behind one `RwLock`, so a
//! received frame's values and its statistics change together and readers
//! always see whole per-message snapshots.

use crate::persist::PersistedConfig;
use crate::roles::MessageRoles;
use crate::signals::SchemaAdapter;
use crate::types::{format_clock, CanifError, Result, SignalMap, Timestamp};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Receive statistics of one measurement message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RxStats {
    /// Timestamp of the latest receipt
    pub last_received: Option<Timestamp>,
    /// Seconds between the two latest receipts, millisecond precision
    pub cycle_time: f64,
    /// Number of decoded receipts
    pub count: u64,
    prev: Option<Timestamp>,
}

impl RxStats {
    /// False until the first frame is decoded
    pub fn is_seen(&self) -> bool {
        self.prev.is_some()
    }

    /// `HH:MM:SS.mmm` of the latest receipt, or `-` when unseen
    pub fn last_received_label(&self) -> String {
        self.last_received
            .as_ref()
            .map(format_clock)
            .unwrap_or_else(|| "-".to_string())
    }

    fn record(&mut self, now: Timestamp) {
        match self.prev {
            None => {
                self.cycle_time = 0.0;
                self.count = 1;
            }
            Some(prev) => {
                let micros = (now - prev).num_microseconds().unwrap_or(i64::MAX);
                self.cycle_time = (micros as f64 / 1_000.0).round() / 1_000.0;
                self.count += 1;
            }
        }
        self.prev = Some(now);
        self.last_received = Some(now);
    }
}

struct StoreState {
    values: HashMap<String, SignalMap>,
    rx_stats: HashMap<String, RxStats>,
}

/// Shared `message -> (signal -> value)` table
pub struct SignalStore {
    state: RwLock<StoreState>,
    /// Configuration messages with their signal names, ascending frame id
    config_layout: Vec<(String, Vec<String>)>,
    /// Measurement message names, ascending frame id
    measurement_order: Vec<String>,
}

impl SignalStore {
    /// Merge persisted values with database defaults
    pub fn initialize(
        schema: &dyn SchemaAdapter,
        roles: &MessageRoles,
        persisted: &PersistedConfig,
    ) -> Self {
        let mut values = HashMap::with_capacity(schema.messages().len());
        let mut restored = 0usize;

        for message in schema.messages() {
            let mut signals = SignalMap::with_capacity(message.signals.len());
            for signal in &message.signals {
                let value = match persisted.value(&message.name, &signal.name) {
                    Some(v) => {
                        restored += 1;
                        v
                    }
                    None => signal.default_value(),
                };
                signals.insert(signal.name.clone(), value);
            }
            values.insert(message.name.clone(), signals);
        }

        for name in persisted.message_names() {
            if !values.contains_key(name) {
                log::debug!("Ignoring persisted entry for unknown message {}", name);
            }
        }

        let config_layout = roles
            .configuration()
            .iter()
            .filter_map(|m| {
                schema.message_by_name(&m.name).ok().map(|msg| {
                    (
                        msg.name.clone(),
                        msg.signal_names().map(str::to_string).collect(),
                    )
                })
            })
            .collect();

        let measurement_order: Vec<String> =
            roles.measurement().iter().map(|m| m.name.clone()).collect();
        let rx_stats = measurement_order
            .iter()
            .map(|name| (name.clone(), RxStats::default()))
            .collect();

        log::info!(
            "Signal store initialized: {} messages, {} persisted values restored",
            values.len(),
            restored
        );

        Self {
            state: RwLock::new(StoreState { values, rx_stats }),
            config_layout,
            measurement_order,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of one message's signals
    pub fn get(&self, message: &str) -> Result<SignalMap> {
        self.read()
            .values
            .get(message)
            .cloned()
            .ok_or_else(|| CanifError::MessageNotFound(message.to_string()))
    }

    /// Current value of one signal
    pub fn signal(&self, message: &str, signal: &str) -> Result<f64> {
        let state = self.read();
        let signals = state
            .values
            .get(message)
            .ok_or_else(|| CanifError::MessageNotFound(message.to_string()))?;
        signals
            .get(signal)
            .copied()
            .ok_or_else(|| CanifError::UnknownSignal {
                message: message.to_string(),
                signal: signal.to_string(),
            })
    }

    /// Overwrite the decoded signals of a message. Unknown messages are
    /// ignored and reported through the return value.
    pub fn apply_received(&self, message: &str, decoded: &SignalMap) -> bool {
        let mut state = self.write();
        Self::overwrite(&mut state, message, decoded)
    }

    /// Apply a received frame and, for measurement messages, update its
    /// statistics under the same lock
    pub fn apply_frame(&self, message: &str, decoded: &SignalMap, received_at: Timestamp) -> bool {
        let mut state = self.write();
        if !Self::overwrite(&mut state, message, decoded) {
            return false;
        }
        if let Some(stats) = state.rx_stats.get_mut(message) {
            stats.record(received_at);
        }
        true
    }

    /// Write values accepted by a confirmed send
    pub(crate) fn write_sent(&self, message: &str, sent: &SignalMap) -> bool {
        let mut state = self.write();
        Self::overwrite(&mut state, message, sent)
    }

    /// Write a single signal accepted by a confirmed send
    pub(crate) fn write_signal(&self, message: &str, signal: &str, value: f64) -> bool {
        let mut state = self.write();
        match state
            .values
            .get_mut(message)
            .and_then(|signals| signals.get_mut(signal))
        {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn overwrite(state: &mut StoreState, message: &str, values: &SignalMap) -> bool {
        let Some(signals) = state.values.get_mut(message) else {
            log::trace!("Ignoring values for unknown message {}", message);
            return false;
        };
        for (name, value) in values {
            match signals.get_mut(name) {
                Some(slot) => *slot = *value,
                None => log::trace!("Ignoring unknown signal {}.{}", message, name),
            }
        }
        true
    }

    /// Statistics of one measurement message
    pub fn rx_stats(&self, message: &str) -> Option<RxStats> {
        self.read().rx_stats.get(message).cloned()
    }

    /// Statistics of every measurement message, ascending frame id
    pub fn rx_stats_all(&self) -> Vec<(String, RxStats)> {
        let state = self.read();
        self.measurement_order
            .iter()
            .filter_map(|name| state.rx_stats.get(name).map(|s| (name.clone(), s.clone())))
            .collect()
    }

    /// Persistable form: configuration messages only, ascending frame id,
    /// signals in definition order
    pub fn serialize(&self) -> PersistedConfig {
        let state = self.read();
        let mut config = PersistedConfig::new();
        for (message, signal_names) in &self.config_layout {
            let Some(values) = state.values.get(message) else {
                continue;
            };
            config.insert_message(
                message,
                signal_names
                    .iter()
                    .map(|s| (s.as_str(), values.get(s).copied().unwrap_or(0.0))),
            );
        }
        config
    }
}
