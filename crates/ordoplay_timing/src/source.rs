// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability shared by timing objects and converters.

use crate::config::TimingConfig;
use crate::error::Result;
use crate::motion::{PartialVector, Range, Vector};
use crate::notifier::{Event, SubscriptionId};
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlates an update request with the provider confirmation it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId(pub Uuid);

impl UpdateId {
    /// Create a new random update ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Readiness of a timing source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadyState {
    /// Waiting for the first vector
    #[default]
    NotReady,
    /// Holding a valid vector
    Ready,
    /// Closed; no further events
    Closed,
}

/// Payload of a `change` event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeInfo {
    /// The newly accepted vector
    pub vector: Vector,
    /// Update that produced this vector, if it came from one
    pub update_id: Option<UpdateId>,
    /// False for the synthetic event replayed to a new subscriber
    pub live: bool,
}

/// Events emitted by a timing source
#[derive(Debug, Clone, PartialEq)]
pub enum TimingEvent {
    /// A new vector was accepted
    Change(ChangeInfo),
    /// Periodic position report while moving, and after each change
    TimeUpdate(Vector),
    /// Readiness changed
    ReadyStateChange(ReadyState),
    /// Range changed
    RangeChange(Range),
}

/// Kinds of [`TimingEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingEventKind {
    /// [`TimingEvent::Change`]
    Change,
    /// [`TimingEvent::TimeUpdate`]
    TimeUpdate,
    /// [`TimingEvent::ReadyStateChange`]
    ReadyStateChange,
    /// [`TimingEvent::RangeChange`]
    RangeChange,
}

impl Event for TimingEvent {
    type Kind = TimingEventKind;

    fn kind(&self) -> TimingEventKind {
        match self {
            Self::Change(_) => TimingEventKind::Change,
            Self::TimeUpdate(_) => TimingEventKind::TimeUpdate,
            Self::ReadyStateChange(_) => TimingEventKind::ReadyStateChange,
            Self::RangeChange(_) => TimingEventKind::RangeChange,
        }
    }
}

/// Event handler accepted by [`TimingSource::on`]
pub type TimingHandler = Box<dyn FnMut(&TimingEvent)>;

/// Anything that exposes a motion vector: timing objects and converters.
///
/// Converters hold their source as `Rc<dyn TimingSource>`, so chains of any
/// depth share one contract.
pub trait TimingSource {
    /// Current vector, extrapolated to now and kept inside the range
    fn query(&self) -> Result<Vector>;

    /// Request a change of motion; returns the vector that was requested
    fn update(&self, update: PartialVector) -> Result<Vector>;

    /// Allowed positions
    fn range(&self) -> Range;

    /// Last accepted vector, not extrapolated
    fn vector(&self) -> Option<Vector>;

    /// Readiness
    fn ready_state(&self) -> ReadyState;

    /// Whether a vector is available
    fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::Ready
    }

    /// Scheduler driving this source
    fn scheduler(&self) -> Scheduler;

    /// Current time on the shared clock
    fn now(&self) -> f64 {
        self.scheduler().now()
    }

    /// Settings in effect
    fn config(&self) -> TimingConfig;

    /// Whether every update is refused with `IllegalUpdate`
    fn read_only(&self) -> bool {
        false
    }

    /// Subscribe to events of `kind`.
    ///
    /// A ready source first replays its current state to the new handler.
    fn on(&self, kind: TimingEventKind, handler: TimingHandler) -> SubscriptionId;

    /// Remove a subscription
    fn off(&self, id: SubscriptionId) -> bool;

    /// Stop emitting events and release resources
    fn close(&self);
}
