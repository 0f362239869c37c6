// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sequencer: active cues of a moving position, or of a moving interval.
//!
//! The active set is recomputed whenever a bound timing source changes, the
//! axis changes, or the motion reaches the next point on the axis. That next
//! crossing is predicted from the motion law, so the sequencer never polls.
//!
//! A single sequencer evaluates its position in up to two stages: at the
//! position itself, then just past it in the direction of motion. Passing a
//! singular cue therefore yields an enter immediately followed by an exit.
//! Positions within [`SNAP_TOLERANCE`] of an axis point are treated as being
//! on it.
//!
//! A double sequencer tracks the interval spanned by two sources. When both
//! positions coincide only singular cues at that position are active.

use crate::axis::{Axis, AxisEvent};
use crate::cue::{Cue, CueChange};
use crate::error::Result;
use crate::interval::Interval;
use indexmap::IndexMap;
use ordoplay_timing::motion::{direction, time_to_position};
use ordoplay_timing::{
    Direction, Event, Notifier, Scheduler, SubscriptionId, Timeout, TimingEvent, TimingEventKind,
    TimingSource, Vector,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Distance within which a position counts as being on an axis point
pub const SNAP_TOLERANCE: f64 = 1e-6;

/// Events emitted by a [`Sequencer`]
#[derive(Debug, Clone)]
pub enum SequencerEvent {
    /// A cue became active, or an active cue was replaced
    Change(CueChange),
    /// A cue stopped being active
    Remove(CueChange),
    /// All transitions of one evaluation, in order
    Events(Rc<Vec<CueChange>>),
}

/// Kind of a [`SequencerEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencerEventKind {
    /// [`SequencerEvent::Change`]
    Change,
    /// [`SequencerEvent::Remove`]
    Remove,
    /// [`SequencerEvent::Events`]
    Events,
}

impl Event for SequencerEvent {
    type Kind = SequencerEventKind;

    fn kind(&self) -> SequencerEventKind {
        match self {
            Self::Change(_) => SequencerEventKind::Change,
            Self::Remove(_) => SequencerEventKind::Remove,
            Self::Events(_) => SequencerEventKind::Events,
        }
    }
}

type ActiveSet = IndexMap<String, Rc<Cue>>;

struct SequencerInner {
    axis: Axis,
    sources: Vec<Rc<dyn TimingSource>>,
    active: RefCell<ActiveSet>,
    notifier: Notifier<SequencerEvent>,
    wakeup: Timeout,
    source_subscriptions: RefCell<Vec<SubscriptionId>>,
    axis_subscription: Cell<Option<SubscriptionId>>,
    closed: Cell<bool>,
}

/// Active cue tracker bound to an [`Axis`] and one or two timing sources
pub struct Sequencer {
    inner: Rc<SequencerInner>,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("double", &self.is_double())
            .field("active", &self.keys())
            .field("axis", &self.inner.axis)
            .finish()
    }
}

impl Sequencer {
    /// Track the cues containing the position of `source`
    pub fn single(axis: &Axis, source: Rc<dyn TimingSource>) -> Self {
        Self::build(axis, vec![source])
    }

    /// Track the cues overlapping the interval between the positions of `a` and `b`
    pub fn double(axis: &Axis, a: Rc<dyn TimingSource>, b: Rc<dyn TimingSource>) -> Self {
        Self::build(axis, vec![a, b])
    }

    fn build(axis: &Axis, sources: Vec<Rc<dyn TimingSource>>) -> Self {
        let scheduler: Scheduler = sources[0].scheduler();
        let inner = Rc::new(SequencerInner {
            axis: axis.clone(),
            sources,
            active: RefCell::new(IndexMap::new()),
            notifier: Notifier::new(),
            wakeup: Timeout::new(scheduler),
            source_subscriptions: RefCell::new(Vec::new()),
            axis_subscription: Cell::new(None),
            closed: Cell::new(false),
        });
        SequencerInner::connect(&inner);
        Self { inner }
    }

    /// Whether this sequencer tracks an interval between two sources
    pub fn is_double(&self) -> bool {
        self.inner.sources.len() == 2
    }

    /// The axis this sequencer reads
    pub fn axis(&self) -> &Axis {
        &self.inner.axis
    }

    /// Current position of every bound source
    pub fn positions(&self) -> Result<Vec<f64>> {
        let mut positions = Vec::with_capacity(self.inner.sources.len());
        for source in &self.inner.sources {
            positions.push(source.query()?.position);
        }
        Ok(positions)
    }

    /// Active cues in activation order
    pub fn active_cues(&self) -> Vec<Rc<Cue>> {
        self.inner.active.borrow().values().cloned().collect()
    }

    /// Keys of the active cues
    pub fn keys(&self) -> Vec<String> {
        self.inner.active.borrow().keys().cloned().collect()
    }

    /// Whether the cue under `key` is active
    pub fn has(&self, key: &str) -> bool {
        self.inner.active.borrow().contains_key(key)
    }

    /// Active cue under `key`
    pub fn get(&self, key: &str) -> Option<Rc<Cue>> {
        self.inner.active.borrow().get(key).cloned()
    }

    /// Number of active cues
    pub fn len(&self) -> usize {
        self.inner.active.borrow().len()
    }

    /// Whether no cue is active
    pub fn is_empty(&self) -> bool {
        self.inner.active.borrow().is_empty()
    }

    /// Whether a re-evaluation is scheduled
    pub fn is_scheduled(&self) -> bool {
        self.inner.wakeup.is_set()
    }

    /// Subscribe to events of `kind`.
    ///
    /// The current active set is delivered first: one `Change` per active
    /// cue, and one `Events` batch holding all of them.
    pub fn on(
        &self,
        kind: SequencerEventKind,
        handler: impl FnMut(&SequencerEvent) + 'static,
    ) -> SubscriptionId {
        let entered: Vec<CueChange> = self
            .inner
            .active
            .borrow()
            .values()
            .map(|cue| CueChange::added(Rc::clone(cue)))
            .collect();
        let mut replay: Vec<SequencerEvent> =
            entered.iter().cloned().map(SequencerEvent::Change).collect();
        if !entered.is_empty() {
            replay.push(SequencerEvent::Events(Rc::new(entered)));
        }
        self.inner.notifier.on_with_replay(kind, handler, replay)
    }

    /// Remove a subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.off(id)
    }

    /// Detach from the sources and the axis.
    ///
    /// No further events are emitted and the active set is dropped silently.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.inner.unsubscribe();
        self.inner.wakeup.clear();
        self.inner.active.borrow_mut().clear();
        self.inner.notifier.clear();
        tracing::debug!("sequencer closed");
    }
}

impl Drop for SequencerInner {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl SequencerInner {
    fn connect(this: &Rc<Self>) {
        let weak: Weak<Self> = Rc::downgrade(this);
        let id = this.axis.on(move |event: &AxisEvent| {
            if let (Some(inner), AxisEvent::Changed(changes)) = (weak.upgrade(), event) {
                tracing::trace!(changes = changes.len(), "axis changed");
                inner.evaluate();
            }
        });
        this.axis_subscription.set(Some(id));

        for source in &this.sources {
            let weak = Rc::downgrade(this);
            let id = source.on(
                TimingEventKind::Change,
                Box::new(move |event: &TimingEvent| {
                    if let (Some(inner), TimingEvent::Change(_)) = (weak.upgrade(), event) {
                        inner.evaluate();
                    }
                }),
            );
            this.source_subscriptions.borrow_mut().push(id);
        }
        this.evaluate();
    }

    fn unsubscribe(&self) {
        let ids: Vec<SubscriptionId> = self.source_subscriptions.borrow_mut().drain(..).collect();
        for (source, id) in self.sources.iter().zip(ids) {
            source.off(id);
        }
        if let Some(id) = self.axis_subscription.take() {
            self.axis.off(id);
        }
    }

    /// Snapshot of every source at one instant, each position snapped onto a
    /// nearby axis point
    fn snapshots(&self) -> Option<Vec<Vector>> {
        let now = self.sources.first()?.now();
        let mut vectors = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.query() {
                Ok(vector) => vectors.push(self.snap(vector.extrapolate(now))),
                Err(err) => {
                    tracing::trace!(%err, "sequencer source not available");
                    return None;
                }
            }
        }
        Some(vectors)
    }

    fn snap(&self, vector: Vector) -> Vector {
        match self.axis.point_near(vector.position, SNAP_TOLERANCE) {
            Some(position) => Vector { position, ..vector },
            None => vector,
        }
    }

    fn evaluate(self: &Rc<Self>) {
        if self.closed.get() {
            return;
        }
        let Some(vectors) = self.snapshots() else {
            self.wakeup.clear();
            return;
        };

        let stages = match vectors.as_slice() {
            [single] => self.single_stages(single),
            [a, b] => self.double_stages(a, b),
            _ => Vec::new(),
        };

        let mut transitions = Vec::new();
        {
            let mut active = self.active.borrow_mut();
            for stage in stages {
                diff(&active, &stage, &mut transitions);
                *active = stage;
            }
        }
        self.schedule(&vectors);

        if transitions.is_empty() {
            return;
        }
        tracing::debug!(
            transitions = transitions.len(),
            active = self.active.borrow().len(),
            "active cues changed"
        );
        for change in &transitions {
            let event = if change.is_removal() {
                SequencerEvent::Remove(change.clone())
            } else {
                SequencerEvent::Change(change.clone())
            };
            self.notifier.emit(event);
        }
        self.notifier
            .emit(SequencerEvent::Events(Rc::new(transitions)));
    }

    fn single_stages(&self, vector: &Vector) -> Vec<ActiveSet> {
        let at = vector.position;
        let mut stages = vec![collect(self.axis.covering(at))];
        let heading = direction(vector);
        if heading != Direction::Still {
            stages.push(collect(self.axis.covering_side(at, heading)));
        }
        stages
    }

    fn double_stages(&self, a: &Vector, b: &Vector) -> Vec<ActiveSet> {
        let (low, high) = if a.position <= b.position {
            (a, b)
        } else {
            (b, a)
        };
        if low.position < high.position {
            let span = Interval::closed(low.position, high.position);
            return match span {
                Ok(span) => vec![collect(self.axis.lookup_interval(&span))],
                Err(err) => {
                    tracing::warn!(%err, "cannot evaluate sequencer interval");
                    Vec::new()
                }
            };
        }

        let at = low.position;
        let singular = self
            .axis
            .lookup_point(at)
            .into_iter()
            .filter(|cue| cue.interval.is_singular())
            .collect();
        let mut stages = vec![collect(singular)];

        let (heading_a, heading_b) = (direction(a), direction(b));
        let separating = relative(a, b).is_some_and(|rel| direction(&rel) != Direction::Still);
        if separating {
            let mut after = Vec::new();
            if heading_a != heading_b || heading_a == Direction::Still {
                after.extend(self.axis.covering(at));
            }
            for heading in [heading_a, heading_b] {
                if heading != Direction::Still {
                    after.extend(self.axis.covering_side(at, heading));
                }
            }
            stages.push(collect(after));
        }
        stages
    }

    /// Arm the wake-up for the earliest time any source reaches its own point
    /// or a neighboring point, or the two sources cross each other.
    fn schedule(self: &Rc<Self>, vectors: &[Vector]) {
        let mut next: Option<f64> = None;
        let mut consider = |dt: Option<f64>| {
            if let Some(dt) = dt {
                next = Some(next.map_or(dt, |current: f64| current.min(dt)));
            }
        };
        for vector in vectors {
            if direction(vector) == Direction::Still {
                continue;
            }
            let (below, above) = self.axis.neighbors(vector.position);
            for target in [Some(vector.position), below, above].into_iter().flatten() {
                consider(time_to_position(vector, target));
            }
        }
        if let [a, b] = vectors {
            if let Some(rel) = relative(a, b) {
                consider(time_to_position(&rel, 0.0));
            }
        }

        let (Some(dt), Some(sampled)) = (next, vectors.first()) else {
            self.wakeup.clear();
            return;
        };
        let at = sampled.timestamp + dt;
        tracing::trace!(at, "sequencer wake-up");
        let weak = Rc::downgrade(self);
        self.wakeup.set(at, move || {
            if let Some(inner) = weak.upgrade() {
                inner.evaluate();
            }
        });
    }
}

fn collect(cues: Vec<Rc<Cue>>) -> ActiveSet {
    cues.into_iter()
        .map(|cue| (cue.key.clone(), cue))
        .collect()
}

/// Motion of `a` relative to `b`, if both are taken at the same time
fn relative(a: &Vector, b: &Vector) -> Option<Vector> {
    ((a.timestamp - b.timestamp).abs() <= ordoplay_timing::EPSILON).then(|| Vector {
        position: a.position - b.position,
        velocity: a.velocity - b.velocity,
        acceleration: a.acceleration - b.acceleration,
        timestamp: a.timestamp,
    })
}

/// Append the transitions from `before` to `after`: exits, then replaced
/// cues, then enters.
fn diff(before: &ActiveSet, after: &ActiveSet, out: &mut Vec<CueChange>) {
    for (key, cue) in before {
        if !after.contains_key(key) {
            out.push(CueChange::removed(Rc::clone(cue)));
        }
    }
    for (key, cue) in after {
        if let Some(old) = before.get(key) {
            if !Rc::ptr_eq(old, cue) {
                out.push(CueChange::replaced(Rc::clone(old), Rc::clone(cue)));
            }
        }
    }
    for (key, cue) in after {
        if !before.contains_key(key) {
            out.push(CueChange::added(Rc::clone(cue)));
        }
    }
}
