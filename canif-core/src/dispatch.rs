//! Dispatch Engine
//!
//! Validates outbound requests against the schema, encodes them, hands the
//! payload to the transport and only then records the sent values in the
//! signal store. A request that fails anywhere leaves the store untouched.

use crate::config::EstopDirective;
use crate::roles::MessageRoles;
use crate::signals::{MessageSchema, SchemaAdapter};
use crate::store::SignalStore;
use crate::transport::Transport;
use crate::types::{CanifError, Result, SignalMap, Timestamp};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Node-specific "save via bus message" hook
pub trait ConfigSaveHook: Send + Sync {
    /// Ask the device to persist its current configuration
    fn save_config(&self, dispatcher: &Dispatcher) -> Result<()>;
}

/// Where a save ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The save hook handled it on the bus
    Bus,
    /// Written to the parameter file
    File(PathBuf),
}

/// Per-message results of [`Dispatcher::send_all`]
#[derive(Debug, Default)]
pub struct SendReport {
    pub sent: Vec<String>,
    pub failed: Vec<(String, CanifError)>,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// When each kind of operator action last succeeded
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastActions {
    pub send: Option<Timestamp>,
    pub send_all: Option<Timestamp>,
    pub estop: Option<Timestamp>,
    pub save: Option<Timestamp>,
}

pub struct Dispatcher {
    schema: Arc<dyn SchemaAdapter>,
    store: Arc<SignalStore>,
    roles: Arc<MessageRoles>,
    transport: Arc<dyn Transport>,
    estop: Option<EstopDirective>,
    params_path: PathBuf,
    save_hook: Option<Box<dyn ConfigSaveHook>>,
    last: Mutex<LastActions>,
}

impl Dispatcher {
    pub fn new(
        schema: Arc<dyn SchemaAdapter>,
        store: Arc<SignalStore>,
        roles: Arc<MessageRoles>,
        transport: Arc<dyn Transport>,
        params_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schema,
            store,
            roles,
            transport,
            estop: None,
            params_path: params_path.into(),
            save_hook: None,
            last: Mutex::new(LastActions::default()),
        }
    }

    /// Arm an estop directive. The message must be a configuration message
    /// and the signal must belong to it.
    pub fn with_estop(mut self, directive: EstopDirective) -> Result<Self> {
        let message = self.schema.message_by_name(&directive.message)?;
        if message.signal(&directive.signal).is_none() {
            return Err(CanifError::UnknownSignal {
                message: directive.message.clone(),
                signal: directive.signal.clone(),
            });
        }
        self.ensure_transmittable(message)?;
        log::info!("Estop armed: {}", directive);
        self.estop = Some(directive);
        Ok(self)
    }

    /// Install a node-specific save hook
    pub fn with_save_hook(mut self, hook: Box<dyn ConfigSaveHook>) -> Self {
        self.save_hook = Some(hook);
        self
    }

    pub fn estop(&self) -> Option<&EstopDirective> {
        self.estop.as_ref()
    }

    pub fn params_path(&self) -> &Path {
        &self.params_path
    }

    pub fn last_actions(&self) -> LastActions {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, update: impl FnOnce(&mut LastActions, Timestamp)) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut last, Utc::now());
    }

    fn ensure_transmittable(&self, message: &MessageSchema) -> Result<()> {
        if self.roles.is_measurement(message.frame_id, message.is_extended) {
            return Err(CanifError::NotTransmittable {
                message: message.name.clone(),
                frame_id: message.frame_id,
            });
        }
        Ok(())
    }

    /// Send one configuration message. `requested` must name every signal
    /// of the message exactly once.
    pub fn send_message(&self, message_name: &str, requested: &[(String, f64)]) -> Result<()> {
        let message = self.schema.message_by_name(message_name)?;

        if requested.len() != message.signals.len() {
            return Err(CanifError::SignalCountMismatch {
                message: message.name.clone(),
                expected: message.signals.len(),
                received: requested.len(),
            });
        }
        self.ensure_transmittable(message)?;

        let mut values = SignalMap::with_capacity(requested.len());
        for (signal, value) in requested {
            if message.signal(signal).is_none() {
                return Err(CanifError::UnknownSignal {
                    message: message.name.clone(),
                    signal: signal.clone(),
                });
            }
            if values.insert(signal.clone(), *value).is_some() {
                return Err(CanifError::DuplicateSignal {
                    message: message.name.clone(),
                    signal: signal.clone(),
                });
            }
        }

        self.transmit(message, &values)?;
        self.store.write_sent(&message.name, &values);
        self.touch(|last, now| last.send = Some(now));
        Ok(())
    }

    /// Send every configuration message with its stored values, ascending
    /// frame id. Failures are collected, not fatal.
    pub fn send_all(&self) -> SendReport {
        let mut report = SendReport::default();

        for entry in self.roles.configuration() {
            let result = self.resend_stored(&entry.name);
            match result {
                Ok(()) => report.sent.push(entry.name.clone()),
                Err(e) => {
                    log::warn!("Send all: {} failed: {}", entry.name, e);
                    report.failed.push((entry.name.clone(), e));
                }
            }
        }

        log::info!(
            "Send all: {} sent, {} failed",
            report.sent.len(),
            report.failed.len()
        );
        self.touch(|last, now| last.send_all = Some(now));
        report
    }

    fn resend_stored(&self, message_name: &str) -> Result<()> {
        let message = self.schema.message_by_name(message_name)?;
        let stored = self.store.get(message_name)?;
        let requested: Vec<(String, f64)> = message
            .signals
            .iter()
            .map(|s| (s.name.clone(), stored.get(&s.name).copied().unwrap_or(0.0)))
            .collect();
        self.send_message(message_name, &requested)
    }

    /// Send the estop message: stored values with the directive's signal
    /// overridden. Only that signal is written back.
    pub fn send_estop(&self) -> Result<()> {
        let directive = self.estop.as_ref().ok_or(CanifError::NotConfigured)?;
        let message = self.schema.message_by_name(&directive.message)?;
        self.ensure_transmittable(message)?;

        let mut values = self.store.get(&directive.message)?;
        values.insert(directive.signal.clone(), directive.value);

        self.transmit(message, &values)?;
        self.store
            .write_signal(&directive.message, &directive.signal, directive.value);
        log::warn!("ESTOP sent: {}", directive);
        self.touch(|last, now| last.estop = Some(now));
        Ok(())
    }

    /// Persist the current configuration: through the save hook when one
    /// is installed, otherwise to the parameter file
    pub fn save_configuration(&self) -> Result<SaveOutcome> {
        let outcome = match &self.save_hook {
            Some(hook) => {
                hook.save_config(self)?;
                SaveOutcome::Bus
            }
            None => {
                self.store.serialize().save(&self.params_path)?;
                SaveOutcome::File(self.params_path.clone())
            }
        };
        self.touch(|last, now| last.save = Some(now));
        Ok(outcome)
    }

    /// Encode and send; the shared tail of every send path
    fn transmit(&self, message: &MessageSchema, values: &SignalMap) -> Result<()> {
        for signal in &message.signals {
            if let Some(value) = values.get(&signal.name) {
                if !signal.in_range(*value) {
                    log::warn!(
                        "{}.{} = {} is outside [{}, {}]",
                        message.name,
                        signal.name,
                        value,
                        signal.min,
                        signal.max
                    );
                }
            }
        }

        let data = self.schema.encode(message, values)?;
        self.transport
            .send(message.frame_id, message.is_extended, &data)?;
        log::debug!("TX {} 0x{:X} {:02X?}", message.name, message.frame_id, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::PersistedConfig;
    use crate::roles::RoleSource;
    use crate::signals::SignalDatabase;
    use crate::transport::FrameSource;
    use crate::types::CanFrame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    const DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: HOST DEV

BO_ 512 Drive: 2 HOST
 SG_ sigA : 0|8@1+ (1,0) [0|100] "" DEV
 SG_ sigB : 8|8@1+ (1,0) [0|100] "" DEV

BO_ 256 Limits: 1 HOST
 SG_ MaxCurrent : 0|8@1+ (1,0) [0|50] "A" DEV

BO_ 768 Status: 1 DEV
 SG_ State : 0|8@1+ (1,0) [0|10] "" HOST
"#;

    /// Captures sent frames; can be told to fail
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<CanFrame>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        fn frames(&self) -> Vec<(u32, Vec<u8>)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|f| (f.can_id, f.data.clone()))
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, can_id: u32, is_extended: bool, data: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(CanifError::Transport("bus off".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push(CanFrame::new(can_id, is_extended, data));
            Ok(())
        }

        fn subscribe(&self) -> Result<Box<dyn FrameSource>> {
            Err(CanifError::Transport("not supported".into()))
        }

        fn describe(&self) -> String {
            "recording".into()
        }
    }

    struct Fixture {
        store: Arc<SignalStore>,
        transport: Arc<RecordingTransport>,
        dispatcher: Dispatcher,
    }

    fn fixture(params_path: PathBuf) -> Fixture {
        let db: Arc<dyn SchemaAdapter> = Arc::new(SignalDatabase::from_dbc_str(DBC).unwrap());
        let roles = Arc::new(MessageRoles::assign(db.as_ref(), &RoleSource::Node("HOST".into())));
        let store = Arc::new(SignalStore::initialize(db.as_ref(), &roles, &PersistedConfig::new()));
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(
            db,
            Arc::clone(&store),
            roles,
            transport.clone() as Arc<dyn Transport>,
            params_path,
        );
        Fixture {
            store,
            transport,
            dispatcher,
        }
    }

    fn pairs(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_send_message_encodes_and_stores() {
        let f = fixture(PathBuf::from("unused.json"));
        f.dispatcher
            .send_message("Drive", &pairs(&[("sigB", 2.0), ("sigA", 1.0)]))
            .unwrap();

        assert_eq!(f.transport.frames(), vec![(512, vec![1, 2])]);
        assert_eq!(f.store.signal("Drive", "sigA").unwrap(), 1.0);
        assert_eq!(f.store.signal("Drive", "sigB").unwrap(), 2.0);
        assert!(f.dispatcher.last_actions().send.is_some());
    }

    #[test]
    fn test_count_mismatch_has_no_side_effects() {
        let f = fixture(PathBuf::from("unused.json"));
        let err = f
            .dispatcher
            .send_message("Drive", &pairs(&[("sigA", 1.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            CanifError::SignalCountMismatch {
                expected: 2,
                received: 1,
                ..
            }
        ));
        assert!(f.transport.frames().is_empty());
        assert_eq!(f.store.signal("Drive", "sigA").unwrap(), 0.0);
    }

    #[test]
    fn test_validation_errors() {
        let f = fixture(PathBuf::from("unused.json"));
        let err = f
            .dispatcher
            .send_message("Drive", &pairs(&[("sigA", 1.0), ("sigA", 2.0)]))
            .unwrap_err();
        assert!(matches!(err, CanifError::DuplicateSignal { .. }));

        let err = f
            .dispatcher
            .send_message("Drive", &pairs(&[("sigA", 1.0), ("sigZ", 2.0)]))
            .unwrap_err();
        assert!(matches!(err, CanifError::UnknownSignal { .. }));

        let err = f
            .dispatcher
            .send_message("Status", &pairs(&[("State", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, CanifError::NotTransmittable { frame_id: 768, .. }));

        let err = f.dispatcher.send_message("Nope", &[]).unwrap_err();
        assert!(matches!(err, CanifError::MessageNotFound(_)));

        assert!(f.transport.frames().is_empty());
    }

    #[test]
    fn test_out_of_range_accepted() {
        let f = fixture(PathBuf::from("unused.json"));
        f.dispatcher
            .send_message("Limits", &pairs(&[("MaxCurrent", 200.0)]))
            .unwrap();
        assert_eq!(f.store.signal("Limits", "MaxCurrent").unwrap(), 200.0);
    }

    #[test]
    fn test_encode_failure_skips_store() {
        let f = fixture(PathBuf::from("unused.json"));
        let err = f
            .dispatcher
            .send_message("Limits", &pairs(&[("MaxCurrent", 300.0)]))
            .unwrap_err();
        assert!(matches!(err, CanifError::Encode { .. }));
        assert_eq!(f.store.signal("Limits", "MaxCurrent").unwrap(), 0.0);
    }

    #[test]
    fn test_transport_failure_skips_store() {
        let f = fixture(PathBuf::from("unused.json"));
        f.transport.fail.store(true, Ordering::Relaxed);
        let err = f
            .dispatcher
            .send_message("Limits", &pairs(&[("MaxCurrent", 5.0)]))
            .unwrap_err();
        assert!(matches!(err, CanifError::Transport(_)));
        assert_eq!(f.store.signal("Limits", "MaxCurrent").unwrap(), 0.0);
    }

    #[test]
    fn test_send_all_ascending() {
        let f = fixture(PathBuf::from("unused.json"));
        let report = f.dispatcher.send_all();
        assert!(report.is_complete());
        assert_eq!(report.sent, vec!["Limits".to_string(), "Drive".to_string()]);
        let ids: Vec<u32> = f.transport.frames().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![256, 512]);
    }

    #[test]
    fn test_send_all_continues_after_failure() {
        let f = fixture(PathBuf::from("unused.json"));
        f.store.apply_received("Limits", &[("MaxCurrent".to_string(), 999.0)].into());
        let report = f.dispatcher.send_all();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Limits");
        assert_eq!(report.sent, vec!["Drive".to_string()]);
    }

    #[test]
    fn test_estop_isolation() {
        let f = fixture(PathBuf::from("unused.json"));
        let dispatcher = f
            .dispatcher
            .with_estop(EstopDirective::new("Drive", "sigB", 0.0))
            .unwrap();
        dispatcher
            .send_message("Drive", &pairs(&[("sigA", 5.0), ("sigB", 7.0)]))
            .unwrap();

        dispatcher.send_estop().unwrap();

        assert_eq!(f.transport.frames().last(), Some(&(512, vec![5, 0])));
        assert_eq!(f.store.signal("Drive", "sigA").unwrap(), 5.0);
        assert_eq!(f.store.signal("Drive", "sigB").unwrap(), 0.0);
        assert!(dispatcher.last_actions().estop.is_some());
    }

    #[test]
    fn test_estop_not_configured() {
        let f = fixture(PathBuf::from("unused.json"));
        assert!(matches!(
            f.dispatcher.send_estop(),
            Err(CanifError::NotConfigured)
        ));
    }

    #[test]
    fn test_estop_directive_validated() {
        let f = fixture(PathBuf::from("unused.json"));
        let result = f
            .dispatcher
            .with_estop(EstopDirective::new("Status", "State", 0.0));
        assert!(matches!(result, Err(CanifError::NotTransmittable { .. })));
    }

    #[test]
    fn test_save_configuration_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data/params.json");
        let f = fixture(path.clone());
        f.dispatcher
            .send_message("Limits", &pairs(&[("MaxCurrent", 12.0)]))
            .unwrap();

        let outcome = f.dispatcher.save_configuration().unwrap();
        assert_eq!(outcome, SaveOutcome::File(path.clone()));

        let saved = PersistedConfig::load(&path);
        assert_eq!(saved.value("Limits", "MaxCurrent"), Some(12.0));
        assert!(!saved.contains_message("Status"));
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let f = fixture(blocker.join("params.json"));
        let err = f.dispatcher.save_configuration().unwrap_err();
        assert!(matches!(err, CanifError::Persistence { .. }));
    }

    struct BusSave;

    impl ConfigSaveHook for BusSave {
        fn save_config(&self, dispatcher: &Dispatcher) -> Result<()> {
            dispatcher.send_message("Limits", &[("MaxCurrent".to_string(), 1.0)])
        }
    }

    #[test]
    fn test_save_hook_preferred() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        let f = fixture(path.clone());
        let dispatcher = f.dispatcher.with_save_hook(Box::new(BusSave));

        assert_eq!(dispatcher.save_configuration().unwrap(), SaveOutcome::Bus);
        assert!(!path.exists());
        assert_eq!(f.transport.frames(), vec![(256, vec![1])]);
    }

    #[test]
    fn test_extended_message_keeps_id_format() {
        let db: Arc<dyn SchemaAdapter> = Arc::new(
            SignalDatabase::from_dbc_str(
                r#"
VERSION ""

NS_ :

BS_:

BU_: HOST DEV

BO_ 256 StdCmd: 1 HOST
 SG_ A : 0|8@1+ (1,0) [0|255] "" DEV

BO_ 2147483904 ExtCmd: 1 HOST
 SG_ B : 0|8@1+ (1,0) [0|255] "" DEV
"#,
            )
            .unwrap(),
        );
        let roles = Arc::new(MessageRoles::assign(db.as_ref(), &RoleSource::Node("HOST".into())));
        let store = Arc::new(SignalStore::initialize(db.as_ref(), &roles, &PersistedConfig::new()));
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(
            db,
            Arc::clone(&store),
            roles,
            transport.clone() as Arc<dyn Transport>,
            PathBuf::from("unused.json"),
        );

        dispatcher.send_message("ExtCmd", &pairs(&[("B", 1.0)])).unwrap();
        dispatcher.send_message("StdCmd", &pairs(&[("A", 2.0)])).unwrap();

        let sent: Vec<(u32, bool, Vec<u8>)> = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| (f.can_id, f.is_extended, f.data.clone()))
            .collect();
        assert_eq!(sent, vec![(0x100, true, vec![1]), (0x100, false, vec![2])]);
        assert_eq!(store.signal("ExtCmd", "B").unwrap(), 1.0);
        assert_eq!(store.signal("StdCmd", "A").unwrap(), 2.0);
    }
}
