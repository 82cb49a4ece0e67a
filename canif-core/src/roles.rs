//! Message role assignment
//!
//! Every database message is either a configuration message (this node
//! transmits it) or a measurement message (received and displayed only).
//! Roles are decided once at startup and never change.

use crate::signals::{MessageSchema, SchemaAdapter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Where the role split comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// No information: every message is a configuration message
    #[default]
    Unassigned,
    /// Messages whose sender set contains this node are configuration
    Node(String),
    /// Listed frame ids are configuration, everything else is measurement
    TransmitIds(BTreeSet<u32>),
    /// Listed frame ids are measurement, everything else is configuration
    ReceiveIds(BTreeSet<u32>),
}

impl RoleSource {
    fn is_configuration(&self, message: &MessageSchema) -> bool {
        match self {
            RoleSource::Unassigned => true,
            RoleSource::Node(node) => message.senders.contains(node),
            RoleSource::TransmitIds(ids) => ids.contains(&message.frame_id),
            RoleSource::ReceiveIds(ids) => !ids.contains(&message.frame_id),
        }
    }
}

/// A message name with its frame id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub frame_id: u32,
    pub name: String,
}

/// The immutable role split, both lists in ascending frame-id order
#[derive(Debug, Clone, Default)]
pub struct MessageRoles {
    configuration: Vec<MessageRef>,
    measurement: Vec<MessageRef>,
    measurement_ids: HashSet<(u32, bool)>,
}

impl MessageRoles {
    /// Classify every message of `schema`
    pub fn assign(schema: &dyn SchemaAdapter, source: &RoleSource) -> Self {
        let mut configuration = Vec::new();
        let mut measurement = Vec::new();
        let mut measurement_ids = HashSet::new();

        for message in schema.messages() {
            let entry = MessageRef {
                frame_id: message.frame_id,
                name: message.name.clone(),
            };
            if source.is_configuration(message) {
                configuration.push(entry);
            } else {
                measurement_ids.insert(message.frame_key());
                measurement.push(entry);
            }
        }

        // the adapter's native order is not trusted
        configuration.sort_by_key(|m| m.frame_id);
        measurement.sort_by_key(|m| m.frame_id);

        log::info!(
            "Roles assigned from {:?}: {} configuration, {} measurement",
            source,
            configuration.len(),
            measurement.len()
        );

        Self {
            configuration,
            measurement,
            measurement_ids,
        }
    }

    /// Configuration messages, ascending frame id
    pub fn configuration(&self) -> &[MessageRef] {
        &self.configuration
    }

    /// Measurement messages, ascending frame id
    pub fn measurement(&self) -> &[MessageRef] {
        &self.measurement
    }

    /// True if the frame id, in the given format, belongs to a measurement
    /// message
    pub fn is_measurement(&self, frame_id: u32, is_extended: bool) -> bool {
        self.measurement_ids.contains(&(frame_id, is_extended))
    }

    /// True if the message name belongs to a configuration message
    pub fn is_configuration_name(&self, name: &str) -> bool {
        self.configuration.iter().any(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalDatabase;

    const DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: HOST DEV

BO_ 100 CfgA: 1 HOST
 SG_ A : 0|8@1+ (1,0) [0|255] "" DEV

BO_ 300 CfgB: 1 HOST
 SG_ B : 0|8@1+ (1,0) [0|255] "" DEV

BO_ 200 Status: 1 DEV
 SG_ S : 0|8@1+ (1,0) [0|255] "" HOST
"#;

    fn names(list: &[MessageRef]) -> Vec<&str> {
        list.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_node_roles_ascending() {
        let db = SignalDatabase::from_dbc_str(DBC).unwrap();
        let roles = MessageRoles::assign(&db, &RoleSource::Node("HOST".into()));
        assert_eq!(names(roles.configuration()), vec!["CfgA", "CfgB"]);
        assert_eq!(names(roles.measurement()), vec!["Status"]);
        assert!(roles.is_measurement(200, false));
        assert!(!roles.is_measurement(200, true));
        assert!(!roles.is_measurement(100, false));
        assert!(roles.is_configuration_name("CfgB"));
    }

    #[test]
    fn test_receive_ids() {
        let db = SignalDatabase::from_dbc_str(DBC).unwrap();
        let roles = MessageRoles::assign(&db, &RoleSource::ReceiveIds(BTreeSet::from([100, 300])));
        assert_eq!(names(roles.configuration()), vec!["Status"]);
        assert_eq!(names(roles.measurement()), vec!["CfgA", "CfgB"]);
    }

    #[test]
    fn test_transmit_ids() {
        let db = SignalDatabase::from_dbc_str(DBC).unwrap();
        let roles = MessageRoles::assign(&db, &RoleSource::TransmitIds(BTreeSet::from([200])));
        assert_eq!(names(roles.configuration()), vec!["Status"]);
    }

    #[test]
    fn test_unassigned_is_all_configuration() {
        let db = SignalDatabase::from_dbc_str(DBC).unwrap();
        let roles = MessageRoles::assign(&db, &RoleSource::Unassigned);
        assert_eq!(roles.configuration().len(), 3);
        assert!(roles.measurement().is_empty());
    }
}
