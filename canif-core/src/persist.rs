//! Persisted transmit defaults
//!
//! The file is a JSON object `{message: {signal: number}}` written with
//! four-space indentation. Key order is kept as written so saved files
//! diff cleanly between sessions.

use crate::types::{CanifError, Result};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the parameter file, relative to the working directory
pub const DEFAULT_PARAMS_PATH: &str = "data/canif_config.json";

/// Default location as a path
pub fn default_params_path() -> PathBuf {
    PathBuf::from(DEFAULT_PARAMS_PATH)
}

/// Ordered `{message: {signal: number}}` document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedConfig {
    messages: Map<String, Value>,
}

impl PersistedConfig {
    /// An empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a parameter file. A missing or unparsable file yields an empty
    /// configuration and a warning.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Config file not found at {:?}: {}", path, e);
                return Self::new();
            }
        };

        match Self::from_json(&content) {
            Ok(config) => {
                log::info!("Read config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("Error reading configuration file {:?}: {}", path, e);
                Self::new()
            }
        }
    }

    /// Parse a document. Only the top level must be an object; entries with
    /// the wrong shape are skipped later, signal by signal.
    pub fn from_json(content: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(content)? {
            Value::Object(messages) => Ok(Self { messages }),
            other => Err(CanifError::InvalidArgument(format!(
                "expected a JSON object at top level, found {}",
                kind_name(&other)
            ))),
        }
    }

    /// Persisted value of one signal, if present and numeric
    pub fn value(&self, message: &str, signal: &str) -> Option<f64> {
        self.messages.get(message)?.as_object()?.get(signal)?.as_f64()
    }

    /// True if the message has an entry (of any shape)
    pub fn contains_message(&self, message: &str) -> bool {
        self.messages.contains_key(message)
    }

    /// Message names in document order
    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    /// Append or replace a message entry
    pub fn insert_message<'a, I>(&mut self, message: &str, signals: I)
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut entry = Map::new();
        for (name, value) in signals {
            entry.insert(name.to_string(), number_value(value));
        }
        self.messages.insert(message.to_string(), Value::Object(entry));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Render as indented JSON
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.messages.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| CanifError::InvalidArgument(e.to_string()))
    }

    /// Write the document, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CanifError::Persistence {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| CanifError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Wrote updated params to {:?}", path);
        Ok(())
    }
}

/// Integral values are written as JSON integers so files stay readable
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
