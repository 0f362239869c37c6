// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared cue axis.
//!
//! An [`Axis`] is a cloneable handle to one [`CueIndex`]. Every mutating call
//! reports the resulting cue changes to subscribers, which is how sequencers
//! bound to the axis learn that their active set may have changed.

use crate::cue::{Cue, CueChange};
use crate::index::CueIndex;
use crate::interval::Interval;
use ordoplay_timing::{Direction, Event, Notifier, SubscriptionId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Events emitted by an [`Axis`]
#[derive(Debug, Clone)]
pub enum AxisEvent {
    /// Cues were added, replaced or removed
    Changed(Rc<Vec<CueChange>>),
}

/// Kind of an [`AxisEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisEventKind {
    /// [`AxisEvent::Changed`]
    Changed,
}

impl Event for AxisEvent {
    type Kind = AxisEventKind;

    fn kind(&self) -> AxisEventKind {
        match self {
            Self::Changed(_) => AxisEventKind::Changed,
        }
    }
}

struct AxisInner {
    index: RefCell<CueIndex>,
    notifier: Notifier<AxisEvent>,
}

/// Shared, observable cue index
#[derive(Clone)]
pub struct Axis {
    inner: Rc<AxisInner>,
}

impl fmt::Debug for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Axis")
            .field("cues", &self.len())
            .field("subscribers", &self.inner.notifier.subscriber_count())
            .finish()
    }
}

impl Default for Axis {
    fn default() -> Self {
        Self::new()
    }
}

impl Axis {
    /// Create an empty axis
    pub fn new() -> Self {
        Self {
            inner: Rc::new(AxisInner {
                index: RefCell::new(CueIndex::new()),
                notifier: Notifier::new(),
            }),
        }
    }

    /// Insert or replace cues
    pub fn add_cues(&self, batch: impl IntoIterator<Item = Cue>) -> Vec<CueChange> {
        let changes = self.inner.index.borrow_mut().add_cues(batch);
        self.publish(&changes);
        changes
    }

    /// Remove cues by key
    pub fn remove_cues<K: AsRef<str>>(&self, keys: impl IntoIterator<Item = K>) -> Vec<CueChange> {
        let changes = self.inner.index.borrow_mut().remove_cues(keys);
        self.publish(&changes);
        changes
    }

    /// Remove every cue
    pub fn clear(&self) -> Vec<CueChange> {
        let changes = self.inner.index.borrow_mut().clear();
        self.publish(&changes);
        changes
    }

    fn publish(&self, changes: &[CueChange]) {
        if changes.is_empty() {
            return;
        }
        self.inner
            .notifier
            .emit(AxisEvent::Changed(Rc::new(changes.to_vec())));
    }

    /// Run `f` against the index
    pub fn with_index<R>(&self, f: impl FnOnce(&CueIndex) -> R) -> R {
        f(&self.inner.index.borrow())
    }

    /// Copy of the current index
    pub fn snapshot(&self) -> CueIndex {
        self.inner.index.borrow().clone()
    }

    /// Number of cues
    pub fn len(&self) -> usize {
        self.inner.index.borrow().len()
    }

    /// Whether the axis holds no cues
    pub fn is_empty(&self) -> bool {
        self.inner.index.borrow().is_empty()
    }

    /// Cue stored under `key`
    pub fn get(&self, key: &str) -> Option<Rc<Cue>> {
        self.inner.index.borrow().get(key)
    }

    /// Cues with an endpoint at exactly `value`
    pub fn lookup_point(&self, value: f64) -> Vec<Rc<Cue>> {
        self.inner.index.borrow().lookup_point(value)
    }

    /// Cues overlapping `interval`
    pub fn lookup_interval(&self, interval: &Interval) -> Vec<Rc<Cue>> {
        self.inner.index.borrow().lookup_interval(interval)
    }

    /// Cues containing `value`
    pub fn covering(&self, value: f64) -> Vec<Rc<Cue>> {
        self.inner.index.borrow().covering(value)
    }

    /// Cues containing the positions just past `value` in `direction`
    pub fn covering_side(&self, value: f64, direction: Direction) -> Vec<Rc<Cue>> {
        self.inner.index.borrow().covering_side(value, direction)
    }

    /// Nearest point values below and above `value`
    pub fn neighbors(&self, value: f64) -> (Option<f64>, Option<f64>) {
        self.inner.index.borrow().neighbors(value)
    }

    /// Point value within `tolerance` of `value`
    pub fn point_near(&self, value: f64, tolerance: f64) -> Option<f64> {
        self.inner.index.borrow().point_near(value, tolerance)
    }

    /// Subscribe to cue changes
    pub fn on(&self, handler: impl FnMut(&AxisEvent) + 'static) -> SubscriptionId {
        self.inner.notifier.on(AxisEventKind::Changed, handler)
    }

    /// Remove a subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.off(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cue(key: &str, low: f64, high: f64) -> Cue {
        Cue::new(key, Interval::from_bounds(low, high).unwrap())
    }

    #[test]
    fn test_changes_are_published() {
        let axis = Axis::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        axis.on(move |event| {
            let AxisEvent::Changed(changes) = event;
            sink.borrow_mut().push(changes.len());
        });

        axis.add_cues([cue("a", 0.0, 1.0), cue("b", 1.0, 2.0)]);
        axis.add_cues([cue("a", 0.0, 1.0)]);
        axis.remove_cues(["a", "missing"]);
        axis.clear();
        assert_eq!(*seen.borrow(), vec![2, 1, 1]);
        assert!(axis.is_empty());
    }

    #[test]
    fn test_mutation_from_handler() {
        let axis = Axis::new();
        let handle = axis.clone();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        axis.on(move |_event| {
            counter.set(counter.get() + 1);
            if handle.get("echo").is_none() {
                handle.add_cues([cue("echo", 5.0, 6.0)]);
            }
        });
        axis.add_cues([cue("a", 0.0, 1.0)]);
        assert_eq!(calls.get(), 2);
        assert_eq!(axis.len(), 2);
        axis.with_index(|index| index.check_invariants()).unwrap();
    }

    #[test]
    fn test_clones_share_state() {
        let axis = Axis::new();
        let other = axis.clone();
        other.add_cues([cue("a", 0.0, 1.0)]);
        assert_eq!(axis.covering(0.5).len(), 1);
        assert_eq!(axis.snapshot().len(), 1);
    }
}
