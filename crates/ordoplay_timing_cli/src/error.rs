// SPDX-License-Identifier: MIT OR Apache-2.0
//! CLI errors.

use ordoplay_timing::TimingError;
use ordoplay_timing_sequencer::SequencerError;
use std::path::PathBuf;
use thiserror::Error;

/// Anything that stops a scenario run
#[derive(Debug, Error)]
pub enum CliError {
    /// Scenario file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Scenario file is not valid RON for a scenario
    #[error("invalid scenario: {0}")]
    Scenario(#[from] ron::error::SpannedError),

    /// Timing setup failed
    #[error(transparent)]
    Timing(#[from] TimingError),

    /// Sequencer setup failed
    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    /// Output could not be encoded
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
