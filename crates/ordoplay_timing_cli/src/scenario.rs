// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scenario files.
//!
//! A scenario describes one timing object (range, initial motion, settings),
//! the converter chain stacked on it, the cues to sequence against the end of
//! that chain, and a script of timed steps. Scenarios are stored as RON.

use crate::error::CliError;
use ordoplay_timing::{ConverterKind, LoopbackConfig, PartialVector, Range, TimingConfig, Vector};
use ordoplay_timing_sequencer::Cue;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One scripted action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    /// Time at which the step runs
    pub at: f64,
    /// Motion update requested on the timing object
    pub update: Option<PartialVector>,
    /// New range requested on the timing object
    pub range: Option<Range>,
    /// Cues added to the axis
    pub add_cues: Vec<Cue>,
    /// Keys of cues removed from the axis
    pub remove_cues: Vec<String>,
}

/// A complete scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Range of the timing object
    pub range: Range,
    /// Motion at time zero
    pub initial: Vector,
    /// Timing settings
    pub config: TimingConfig,
    /// Provider settings
    pub loopback: LoopbackConfig,
    /// Converters stacked on the timing object, innermost first
    pub converters: Vec<ConverterKind>,
    /// Cues sequenced against the end of the converter chain
    pub cues: Vec<Cue>,
    /// Scripted steps
    pub steps: Vec<Step>,
    /// Time at which the run stops
    pub until: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            range: Range::infinite(),
            initial: Vector::default(),
            config: TimingConfig::default(),
            loopback: LoopbackConfig::default(),
            converters: Vec::new(),
            cues: Vec::new(),
            steps: Vec::new(),
            until: 10.0,
        }
    }
}

impl Scenario {
    /// Parse from a RON string
    pub fn from_ron(content: &str) -> Result<Self, CliError> {
        Ok(ron::from_str(content)?)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scenario_uses_defaults() {
        let scenario = Scenario::from_ron("()").unwrap();
        assert_eq!(scenario, Scenario::default());
    }

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_ron(
            r#"(
                range: (low: Some(0.0), high: Some(20.0)),
                initial: (position: 1.0, velocity: 0.0, acceleration: 0.0),
                loopback: (latency: 0.1),
                converters: [Skew(2.0), RangeClamp(None)],
                cues: [
                    (key: "a", interval: (low: Some(0.0), high: Some(5.0)), data: {"title": "A"}),
                ],
                steps: [
                    (at: 1.0, update: Some((velocity: Some(1.0)))),
                    (at: 3.0, remove_cues: ["a"]),
                ],
                until: 12.0,
            )"#,
        )
        .unwrap();
        assert_eq!(scenario.range, Range::new(0.0, 20.0).unwrap());
        assert_eq!(scenario.initial.position, 1.0);
        assert_eq!(scenario.loopback.latency, 0.1);
        assert_eq!(scenario.converters, vec![ConverterKind::Skew(2.0), ConverterKind::RangeClamp(None)]);
        assert_eq!(scenario.cues[0].data["title"], "A");
        assert_eq!(scenario.steps[0].update, Some(PartialVector::velocity(1.0)));
        assert_eq!(scenario.steps[1].remove_cues, vec!["a".to_string()]);
        assert_eq!(scenario.until, 12.0);
    }

    #[test]
    fn test_invalid_scenario() {
        let err = Scenario::from_ron("(range: (low: Some(5.0), high: Some(1.0)))").unwrap_err();
        assert!(matches!(err, CliError::Scenario(_)));

        let err = Scenario::load(Path::new("/nonexistent/scenario.ron")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
