//! Controller configuration file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use beamer_commands::ProtocolConfig;
use beamer_devices::{MqttConfig, SerialConfig};

/// Complete controller configuration, every section optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub protocol: ProtocolConfig,
}

impl ControllerConfig {
    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        self.mqtt.validate()?;
        self.protocol.validate()?;
        Ok(())
    }
}
