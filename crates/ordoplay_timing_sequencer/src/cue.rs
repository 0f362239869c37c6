// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cues: keyed intervals carrying arbitrary data.

use crate::interval::Interval;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// A keyed interval with attached data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Identity of the cue on its axis
    pub key: String,
    /// Where the cue is active
    pub interval: Interval,
    /// Payload
    #[serde(default)]
    pub data: Value,
}

impl Cue {
    /// Create a cue without data
    pub fn new(key: impl Into<String>, interval: Interval) -> Self {
        Self {
            key: key.into(),
            interval,
            data: Value::Null,
        }
    }

    /// Attach data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.interval)
    }
}

/// Transition of one cue.
///
/// `old` only: removed or exited. `new` only: added or entered. Both: the
/// cue was replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct CueChange {
    /// Key of the cue
    pub key: String,
    /// State after the transition
    pub new: Option<Rc<Cue>>,
    /// State before the transition
    pub old: Option<Rc<Cue>>,
}

impl CueChange {
    /// The cue appeared
    pub fn added(cue: Rc<Cue>) -> Self {
        Self {
            key: cue.key.clone(),
            new: Some(cue),
            old: None,
        }
    }

    /// The cue went away
    pub fn removed(cue: Rc<Cue>) -> Self {
        Self {
            key: cue.key.clone(),
            new: None,
            old: Some(cue),
        }
    }

    /// The cue was replaced by `new`
    pub fn replaced(old: Rc<Cue>, new: Rc<Cue>) -> Self {
        Self {
            key: new.key.clone(),
            new: Some(new),
            old: Some(old),
        }
    }

    /// Whether this transition removes the cue
    pub fn is_removal(&self) -> bool {
        self.new.is_none()
    }
}
