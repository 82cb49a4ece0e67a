//! Application configuration file
//!
//! Optional TOML file with the same settings as the command line. Every
//! field is optional; command-line flags override whatever is set here.

use anyhow::{Context, Result};
use canif_core::EstopDirective;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub estop: Option<EstopDirective>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BusConfig {
    /// `virtual` or `socketcan`
    pub interface: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionSection {
    pub dbc: Option<PathBuf>,
    pub node: Option<String>,
    #[serde(default)]
    pub rx_ids: Vec<u32>,
    #[serde(default)]
    pub vitals: Vec<String>,
    pub params: Option<PathBuf>,
    #[serde(default)]
    pub dashboard: bool,
    #[serde(default)]
    pub test_traffic: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application log file; stderr when unset
    pub file: Option<PathBuf>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
