//! Load receiver and radio settings from a TOML file.
//!
//! Both tables are optional and every key has a default:
//!
//! ```toml
//! [receiver]
//! chunk_size = 200
//! retransmission_timeout_ms = 10000
//! max_retransmit_rounds = 20
//!
//! [rf]
//! spreading_factor = 9
//! power_dbm = 20
//! ```

use anyhow::{Context, Result};
use lorapic_core::{ReceiverConfig, RfConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete tool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LorapicConfig {
    /// Receiver timing and protocol settings
    pub receiver: ReceiverConfig,
    /// Modem radio settings
    pub rf: RfConfig,
}

impl LorapicConfig {
    /// Parse configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse configuration")?;
        config.receiver.validate()?;
        config.rf.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path))
    }
}
