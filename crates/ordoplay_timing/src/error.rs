// SPDX-License-Identifier: MIT OR Apache-2.0
//! Errors raised by timing objects and converters.

use thiserror::Error;

/// Timing errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    /// No vector has been accepted from the provider yet
    #[error("Timing source is not ready")]
    NotReady,

    /// Update attempted on a read-only timing source
    #[error("Illegal update: {0}")]
    IllegalUpdate(&'static str),

    /// Range bounds are inverted or not numbers
    #[error("Invalid range: [{low}, {high}]")]
    InvalidRange {
        /// Requested low bound
        low: f64,
        /// Requested high bound
        high: f64,
    },

    /// Converter parameter outside of its domain
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The timing source was closed
    #[error("Timing source is closed")]
    Closed,
}

/// Result type for timing operations
pub type Result<T> = std::result::Result<T, TimingError>;
