//! Session wiring
//!
//! A [`Session`] owns every shared component of a running tool: schema,
//! role split, signal store, dispatcher and reception tracker.

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::persist::PersistedConfig;
use crate::roles::MessageRoles;
use crate::signals::SchemaAdapter;
use crate::store::SignalStore;
use crate::tracker::ReceptionTracker;
use crate::transport::{FrameListener, Notifier, Transport};
use crate::types::Result;
use std::sync::Arc;

pub struct Session {
    schema: Arc<dyn SchemaAdapter>,
    roles: Arc<MessageRoles>,
    store: Arc<SignalStore>,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<ReceptionTracker>,
    vitals: Vec<String>,
}

impl Session {
    /// Build a session, restoring transmit defaults from
    /// `config.params_path`
    pub fn new(
        schema: Arc<dyn SchemaAdapter>,
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let persisted = PersistedConfig::load(&config.params_path);
        Self::with_persisted(schema, transport, config, &persisted)
    }

    /// Build a session from already loaded persisted values
    pub fn with_persisted(
        schema: Arc<dyn SchemaAdapter>,
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
        persisted: &PersistedConfig,
    ) -> Result<Self> {
        let roles = Arc::new(MessageRoles::assign(schema.as_ref(), &config.roles));
        let store = Arc::new(SignalStore::initialize(schema.as_ref(), &roles, persisted));

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&schema),
            Arc::clone(&store),
            Arc::clone(&roles),
            transport,
            config.params_path.clone(),
        );
        if let Some(directive) = &config.estop {
            dispatcher = dispatcher.with_estop(directive.clone())?;
        }

        let tracker = Arc::new(ReceptionTracker::new(
            Arc::clone(&schema),
            Arc::clone(&store),
        ));
        let vitals = select_vitals(&roles, &config.vitals);

        Ok(Self {
            schema,
            roles,
            store,
            dispatcher: Arc::new(dispatcher),
            tracker,
            vitals,
        })
    }

    /// Subscribe to `transport` and start delivering frames to the tracker
    pub fn listen(&self, transport: &dyn Transport) -> Result<Notifier> {
        let source = transport.subscribe()?;
        let listener: Arc<dyn FrameListener> = self.tracker.clone();
        log::info!("Listening on {}", transport.describe());
        Ok(Notifier::start(source, vec![listener]))
    }

    pub fn schema(&self) -> &dyn SchemaAdapter {
        self.schema.as_ref()
    }

    pub fn roles(&self) -> &MessageRoles {
        &self.roles
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &ReceptionTracker {
        &self.tracker
    }

    /// Vitals messages that survived validation, ascending frame id
    pub fn vitals(&self) -> &[String] {
        &self.vitals
    }
}

/// Keep only names of measurement messages. Unknown names are dropped with
/// a warning.
fn select_vitals(roles: &MessageRoles, requested: &[String]) -> Vec<String> {
    for name in requested {
        if !roles.measurement().iter().any(|m| &m.name == name) {
            log::warn!("Vitals: '{}' is not a measurement message, ignored", name);
        }
    }
    roles
        .measurement()
        .iter()
        .filter(|m| requested.contains(&m.name))
        .map(|m| m.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstopDirective;
    use crate::signals::SignalDatabase;
    use crate::transport::VirtualBus;
    use crate::types::CanifError;

    const DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: HOST DEV

BO_ 16 Command: 1 HOST
 SG_ Run : 0|8@1+ (1,0) [0|1] "" DEV

BO_ 48 Faults: 1 DEV
 SG_ Code : 0|8@1+ (1,0) [0|255] "" HOST

BO_ 32 Telemetry: 1 DEV
 SG_ Current : 0|8@1+ (1,0) [0|255] "A" HOST
"#;

    fn schema() -> Arc<dyn SchemaAdapter> {
        Arc::new(SignalDatabase::from_dbc_str(DBC).unwrap())
    }

    #[test]
    fn test_vitals_filtered_and_ordered() {
        let config = SessionConfig::new()
            .with_node("HOST")
            .with_vitals(["Faults", "Bogus", "Command", "Telemetry"]);
        let session = Session::with_persisted(
            schema(),
            Arc::new(VirtualBus::new("vcan0")),
            &config,
            &PersistedConfig::new(),
        )
        .unwrap();

        assert_eq!(session.vitals(), &["Telemetry".to_string(), "Faults".to_string()]);
    }

    #[test]
    fn test_invalid_estop_rejected() {
        let config = SessionConfig::new()
            .with_node("HOST")
            .with_estop(EstopDirective::new("Command", "Missing", 0.0));
        let result = Session::with_persisted(
            schema(),
            Arc::new(VirtualBus::new("vcan0")),
            &config,
            &PersistedConfig::new(),
        );
        assert!(matches!(result, Err(CanifError::UnknownSignal { .. })));
    }

    #[test]
    fn test_persisted_values_restored() {
        let persisted = PersistedConfig::from_json(r#"{"Command": {"Run": 1}}"#).unwrap();
        let session = Session::with_persisted(
            schema(),
            Arc::new(VirtualBus::new("vcan0")),
            &SessionConfig::new().with_node("HOST"),
            &persisted,
        )
        .unwrap();
        assert_eq!(session.store().signal("Command", "Run").unwrap(), 1.0);
    }
}
