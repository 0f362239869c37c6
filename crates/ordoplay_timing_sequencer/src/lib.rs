// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cue sequencing over OrdoPlay timing objects.
//!
//! Cues are keyed intervals on a timeline axis. A sequencer bound to an axis
//! and a timing source keeps track of which cues contain the current position
//! and reports enter and exit transitions exactly when the motion crosses a
//! cue boundary.
//!
//! ## Architecture
//!
//! - [`Interval`] and [`Cue`]: the timeline content
//! - [`CueIndex`]: sorted endpoints with point and interval lookup
//! - [`Axis`]: a shared, observable [`CueIndex`]
//! - [`Sequencer`]: active cues of one position or of the interval between two

pub mod axis;
pub mod cue;
pub mod error;
pub mod index;
pub mod interval;
pub mod sequencer;

pub use axis::{Axis, AxisEvent, AxisEventKind};
pub use cue::{Cue, CueChange};
pub use error::{Result, SequencerError};
pub use index::{CueIndex, Point, PointRole};
pub use interval::Interval;
pub use sequencer::{Sequencer, SequencerEvent, SequencerEventKind, SNAP_TOLERANCE};
