//! Emulator configuration (TOML)
//!
//! One file describes the interface and every hosted ECU:
//!
//! ```toml
//! [transport]
//! interface = "vcan0"
//!
//! [[ecus]]
//! name = "engine"
//! rx_id = "0x7E0"
//! tx_id = "0x7E8"
//! store_file = "engine_params.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid CAN ID '{0}'")]
    InvalidCanId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default)]
    pub transport: TransportSection,
    pub ecus: Vec<EcuDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            bitrate: default_bitrate(),
        }
    }
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_bitrate() -> u32 {
    500_000
}

/// One hosted virtual ECU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcuDef {
    pub name: String,
    /// Identifier the ECU listens on (tester transmits to this).
    pub rx_id: String,
    /// Identifier the ECU answers from.
    pub tx_id: String,
    /// JSON file holding the DID parameter mapping.
    pub store_file: PathBuf,
    /// Inbound frame queue depth; router default when omitted.
    #[serde(default)]
    pub queue_depth: Option<usize>,
}

impl EmulatorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Parse a CAN identifier written as hex, with or without `0x`.
pub fn parse_can_id(s: &str) -> Result<u32, ConfigError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidCanId(s.to_string()))
}
