//! Session configuration types
//!
//! Everything a session needs besides the schema and the transport: how
//! roles are assigned, which measurement messages are vitals, the optional
//! estop directive and where transmit defaults are persisted.

use crate::persist::default_params_path;
use crate::roles::RoleSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Configuration for a canif session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How messages are split into configuration and measurement roles
    #[serde(default)]
    pub roles: RoleSource,

    /// Measurement messages highlighted by periodic renders
    #[serde(default)]
    pub vitals: Vec<String>,

    /// Optional emergency-stop override
    #[serde(default)]
    pub estop: Option<EstopDirective>,

    /// Persisted transmit defaults
    #[serde(default = "default_params_path")]
    pub params_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            roles: RoleSource::default(),
            vitals: Vec::new(),
            estop: None,
            params_path: default_params_path(),
        }
    }
}

/// A pre-armed single-signal override sent by `estop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstopDirective {
    pub message: String,
    pub signal: String,
    pub value: f64,
}

impl EstopDirective {
    pub fn new(message: impl Into<String>, signal: impl Into<String>, value: f64) -> Self {
        Self {
            message: message.into(),
            signal: signal.into(),
            value,
        }
    }
}

impl fmt::Display for EstopDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} = {}", self.message, self.signal, self.value)
    }
}

impl SessionConfig {
    /// Create a new session configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: derive roles from a node identity
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.roles = RoleSource::Node(node.into());
        self
    }

    /// Builder method: explicit measurement ids
    pub fn with_receive_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.roles = RoleSource::ReceiveIds(ids.into_iter().collect::<BTreeSet<_>>());
        self
    }

    /// Builder method: explicit configuration ids
    pub fn with_transmit_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.roles = RoleSource::TransmitIds(ids.into_iter().collect::<BTreeSet<_>>());
        self
    }

    /// Builder method: vitals message names
    pub fn with_vitals<I, S>(mut self, vitals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vitals = vitals.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method: arm an estop directive
    pub fn with_estop(mut self, directive: EstopDirective) -> Self {
        self.estop = Some(directive);
        self
    }

    /// Builder method: parameter file location
    pub fn with_params_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.params_path = path.into();
        self
    }
}
