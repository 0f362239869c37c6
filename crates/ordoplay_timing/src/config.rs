// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing configuration.
//!
//! Settings are stored as RON. Every field has a default, so a partial file
//! (or an empty `()`) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by timing objects and converters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Seconds between periodic `timeupdate` events while moving
    pub timeupdate_interval: f64,
    /// Seconds a local converter waits for its update to be confirmed
    pub local_timeout: f64,
    /// Schedule automatic clamps when motion reaches a range bound
    pub range_timeouts: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            timeupdate_interval: 0.2,
            local_timeout: 1.0,
            range_timeouts: true,
        }
    }
}

impl TimingConfig {
    /// Parse from a RON string
    pub fn from_ron(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(content)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);

        let content = ron::ser::to_string_pretty(self, config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(path, content)
    }
}

/// Settings for the in-process [`LoopbackProvider`](crate::provider::LoopbackProvider)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Seconds between an update request and its acceptance
    pub latency: f64,
}
