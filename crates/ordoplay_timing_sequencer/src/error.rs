// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for the sequencer crate.

use ordoplay_timing::TimingError;
use thiserror::Error;

/// Result alias for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Errors raised by intervals, cues and sequencers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequencerError {
    /// Interval bounds or flags are inconsistent
    #[error("invalid interval [{low}, {high}]: {reason}")]
    InvalidInterval {
        /// Lower bound as given
        low: f64,
        /// Upper bound as given
        high: f64,
        /// What is wrong with it
        reason: &'static str,
    },

    /// A bound timing source failed
    #[error(transparent)]
    Timing(#[from] TimingError),
}
