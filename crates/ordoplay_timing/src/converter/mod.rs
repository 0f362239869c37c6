// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing converters.
//!
//! A converter is a timing source derived from another one. It re-emits a
//! mapped `change` for every change of its source and maps updates back, so
//! consumers cannot tell a converter from a timing object. Chains compose to
//! any depth:
//!
//! ```ignore
//! let shifted = Converter::skew(Rc::new(timing.clone()), 10.0)?;
//! let looped = Converter::looping(Rc::new(shifted), Range::new(0.0, 60.0)?)?;
//! ```
//!
//! ## Kinds
//!
//! | Kind | View | Updates |
//! |------|------|---------|
//! | `Skew` / `PositionShift` | position offset | offset removed |
//! | `Scale` | position, velocity, acceleration scaled | scaled back |
//! | `TimeShift` | source as it will be after an offset | shifted back |
//! | `Delay` | source as it was an offset ago | rejected |
//! | `Loop` | position folded into a range | same loop cycle |
//! | `RangeClamp` | source, stopped at the range bounds | forwarded |
//! | `Derivative` | velocity as position | rejected |
//! | `Local` | speculative vector until confirmed | applied at once, forwarded later |

mod delay;
mod local;
pub(crate) mod mapping;
mod range;

use crate::config::TimingConfig;
use crate::error::{Result, TimingError};
use crate::motion::{PartialVector, Range, RangeState, Vector};
use crate::notifier::SubscriptionId;
use crate::scheduler::{Scheduler, Timeout};
use crate::source::{
    ChangeInfo, ReadyState, TimingEvent, TimingEventKind, TimingHandler, TimingSource, UpdateId,
};
use crate::state::{BoundaryPolicy, Incoming, TimingCore};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// Transformation applied by a [`Converter`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConverterKind {
    /// Add a constant to the position
    Skew(f64),
    /// Add a constant to the position
    PositionShift(f64),
    /// Multiply the motion by a non-zero factor
    Scale(f64),
    /// Look ahead (positive) or behind (negative) in time
    TimeShift(f64),
    /// Replay source vectors after a positive delay
    Delay(f64),
    /// Fold the position into a finite range
    Loop(Range),
    /// Stop at the bounds of a range, narrowed to the source range
    RangeClamp(Option<Range>),
    /// Velocity as position, acceleration as velocity
    Derivative,
    /// Apply updates locally before the source confirms them
    Local,
}

impl ConverterKind {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Skew(_) => "skew",
            Self::PositionShift(_) => "position_shift",
            Self::Scale(_) => "scale",
            Self::TimeShift(_) => "time_shift",
            Self::Delay(_) => "delay",
            Self::Loop(_) => "loop",
            Self::RangeClamp(_) => "range",
            Self::Derivative => "derivative",
            Self::Local => "local",
        }
    }

    /// Whether updates through this kind are refused
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Delay(_) | Self::Derivative)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(TimingError::InvalidParameter(reason));
        match *self {
            Self::Skew(value) | Self::PositionShift(value) | Self::TimeShift(value)
                if !value.is_finite() =>
            {
                invalid(format!("{} offset must be finite, got {value}", self.name()))
            }
            Self::Scale(factor) if !factor.is_finite() || factor == 0.0 => {
                invalid(format!("scale factor must be finite and non-zero, got {factor}"))
            }
            Self::Delay(delay) if !delay.is_finite() || delay <= 0.0 => {
                invalid(format!("delay must be positive, got {delay}"))
            }
            Self::Loop(range) if !range.is_finite() || range.width() <= 0.0 => {
                invalid(format!("loop range must be finite and non-empty, got {range}"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skew(v) | Self::PositionShift(v) | Self::Scale(v) | Self::TimeShift(v) | Self::Delay(v) => {
                write!(f, "{}({v})", self.name())
            }
            Self::Loop(range) => write!(f, "loop{range}"),
            Self::RangeClamp(Some(range)) => write!(f, "range{range}"),
            Self::RangeClamp(None) => write!(f, "range"),
            Self::Derivative | Self::Local => write!(f, "{}", self.name()),
        }
    }
}

/// Source vector waiting for its delayed replay
#[derive(Debug, Clone, Copy)]
struct Delayed {
    vector: Vector,
    update_id: Option<UpdateId>,
}

/// Per-kind mutable state
#[derive(Debug, Default)]
enum KindState {
    #[default]
    Stateless,
    /// Side of the clamp range the source was on at the last evaluation
    Clamp(Option<RangeState>),
    /// Source vectors not yet due
    Delay(VecDeque<Delayed>),
    /// Update applied locally and not yet confirmed
    Local(Option<UpdateId>),
}

pub(crate) struct ConverterInner {
    kind: ConverterKind,
    core: Rc<TimingCore>,
    source: Rc<dyn TimingSource>,
    /// Source of the clamp range; differs from `source` for range-limited time shifts
    reference: Option<Rc<dyn TimingSource>>,
    subscriptions: RefCell<Vec<(Rc<dyn TimingSource>, SubscriptionId)>>,
    state: RefCell<KindState>,
    watch: Timeout,
}

/// Timing source derived from another one.
///
/// Clones share the same converter. The converter unsubscribes from its source
/// when the last clone is dropped or on [`TimingSource::close`].
#[derive(Clone)]
pub struct Converter {
    inner: Rc<ConverterInner>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("kind", &self.inner.kind)
            .field("core", &self.inner.core)
            .finish()
    }
}

impl Converter {
    /// Build a converter of any kind.
    ///
    /// `TimeShift` is range-limited to the source range, as with
    /// [`Converter::time_shift`].
    pub fn new(source: Rc<dyn TimingSource>, kind: ConverterKind) -> Result<Self> {
        match kind {
            ConverterKind::TimeShift(offset) => Self::time_shift(source, offset),
            kind => Self::build(source, kind, None),
        }
    }

    /// Position offset by `skew`
    pub fn skew(source: Rc<dyn TimingSource>, skew: f64) -> Result<Self> {
        Self::build(source, ConverterKind::Skew(skew), None)
    }

    /// Position offset by `offset`
    pub fn position_shift(source: Rc<dyn TimingSource>, offset: f64) -> Result<Self> {
        Self::build(source, ConverterKind::PositionShift(offset), None)
    }

    /// Motion multiplied by `factor`
    pub fn scale(source: Rc<dyn TimingSource>, factor: f64) -> Result<Self> {
        Self::build(source, ConverterKind::Scale(factor), None)
    }

    /// Source motion `offset` seconds ahead, clamped to the source range
    pub fn time_shift(source: Rc<dyn TimingSource>, offset: f64) -> Result<Self> {
        let shifted = Self::build(Rc::clone(&source), ConverterKind::TimeShift(offset), None)?;
        Self::build(Rc::new(shifted), ConverterKind::RangeClamp(None), Some(source))
    }

    /// Source motion `offset` seconds ahead, clamped to `range`
    pub fn time_shift_with_range(
        source: Rc<dyn TimingSource>,
        offset: f64,
        range: Range,
    ) -> Result<Self> {
        let shifted = Self::build(Rc::clone(&source), ConverterKind::TimeShift(offset), None)?;
        Self::build(Rc::new(shifted), ConverterKind::RangeClamp(Some(range)), Some(source))
    }

    /// Source motion as it was `delay` seconds ago. Read-only.
    pub fn delay(source: Rc<dyn TimingSource>, delay: f64) -> Result<Self> {
        Self::build(source, ConverterKind::Delay(delay), None)
    }

    /// Position folded into `range`, wrapping at the bounds while moving
    pub fn looping(source: Rc<dyn TimingSource>, range: Range) -> Result<Self> {
        Self::build(source, ConverterKind::Loop(range), None)
    }

    /// Source motion stopped at the bounds of `range`
    pub fn range(source: Rc<dyn TimingSource>, range: Range) -> Result<Self> {
        Self::build(source, ConverterKind::RangeClamp(Some(range)), None)
    }

    /// Velocity of the source as position. Read-only.
    pub fn derivative(source: Rc<dyn TimingSource>) -> Self {
        Self::assemble(source, ConverterKind::Derivative, None)
    }

    /// Updates applied immediately, then confirmed or reverted by the source
    pub fn local(source: Rc<dyn TimingSource>) -> Self {
        Self::assemble(source, ConverterKind::Local, None)
    }

    fn build(
        source: Rc<dyn TimingSource>,
        kind: ConverterKind,
        reference: Option<Rc<dyn TimingSource>>,
    ) -> Result<Self> {
        kind.validate()?;
        Ok(Self::assemble(source, kind, reference))
    }

    fn assemble(
        source: Rc<dyn TimingSource>,
        kind: ConverterKind,
        reference: Option<Rc<dyn TimingSource>>,
    ) -> Self {
        let scheduler = source.scheduler();
        let policy = match kind {
            ConverterKind::Loop(_) => BoundaryPolicy::Wrap,
            _ => BoundaryPolicy::Off,
        };
        let reference_range = reference.as_ref().unwrap_or(&source).range();
        let core = TimingCore::new(
            kind.name(),
            scheduler.clone(),
            source.config(),
            policy,
            mapping::view_range(&kind, &reference_range),
        );
        let state = match kind {
            ConverterKind::RangeClamp(_) => KindState::Clamp(None),
            ConverterKind::Delay(_) => KindState::Delay(VecDeque::new()),
            ConverterKind::Local => KindState::Local(None),
            _ => KindState::Stateless,
        };
        let inner = Rc::new(ConverterInner {
            kind,
            core,
            source,
            reference,
            subscriptions: RefCell::new(Vec::new()),
            state: RefCell::new(state),
            watch: Timeout::new(scheduler),
        });
        ConverterInner::connect(&inner);
        tracing::debug!(converter = %kind, "converter created");
        Self { inner }
    }

    /// Transformation applied by this converter
    pub fn kind(&self) -> ConverterKind {
        self.inner.kind
    }

    /// The timing source this converter derives from
    pub fn source(&self) -> Rc<dyn TimingSource> {
        Rc::clone(&self.inner.source)
    }

    /// Vector at `ts` in this converter's coordinates
    pub fn query_at(&self, ts: f64) -> Result<Vector> {
        self.inner.core.query_at(ts)
    }

    /// Whether a local update is waiting for confirmation
    pub fn is_speculative(&self) -> bool {
        matches!(*self.inner.state.borrow(), KindState::Local(Some(_)))
    }
}

impl ConverterInner {
    fn connect(this: &Rc<Self>) {
        let mut subscriptions = Vec::new();

        let weak = Rc::downgrade(this);
        let id = this.source.on(
            TimingEventKind::RangeChange,
            Box::new(move |event: &TimingEvent| {
                if let (Some(inner), TimingEvent::RangeChange(range)) = (weak.upgrade(), event) {
                    inner.on_source_range(*range);
                }
            }),
        );
        subscriptions.push((Rc::clone(&this.source), id));

        if let Some(reference) = &this.reference {
            let weak = Rc::downgrade(this);
            let id = reference.on(
                TimingEventKind::RangeChange,
                Box::new(move |event: &TimingEvent| {
                    if let (Some(inner), TimingEvent::RangeChange(_)) = (weak.upgrade(), event) {
                        range::evaluate(&inner, None);
                    }
                }),
            );
            subscriptions.push((Rc::clone(reference), id));
        }

        let weak: Weak<Self> = Rc::downgrade(this);
        let id = this.source.on(
            TimingEventKind::Change,
            Box::new(move |event: &TimingEvent| {
                if let (Some(inner), TimingEvent::Change(info)) = (weak.upgrade(), event) {
                    inner.on_source_change(info);
                }
            }),
        );
        subscriptions.push((Rc::clone(&this.source), id));

        *this.subscriptions.borrow_mut() = subscriptions;
    }

    fn scheduler(&self) -> &Scheduler {
        self.core.scheduler()
    }

    fn on_source_change(self: &Rc<Self>, info: &ChangeInfo) {
        match self.kind {
            ConverterKind::RangeClamp(_) => range::evaluate(self, info.update_id),
            ConverterKind::Delay(_) => delay::on_source_change(self, info),
            ConverterKind::Local => local::on_source_change(self, info),
            kind => {
                let vector = mapping::to_view(&kind, &info.vector);
                self.core.process(Incoming::vector(vector, info.update_id));
            }
        }
    }

    fn on_source_range(self: &Rc<Self>, range: Range) {
        match self.kind {
            ConverterKind::RangeClamp(_) => range::evaluate(self, None),
            ConverterKind::TimeShift(_) | ConverterKind::Derivative | ConverterKind::Loop(_) => {}
            kind => self.core.process(Incoming::range(mapping::view_range(&kind, &range))),
        }
    }

    fn update(self: &Rc<Self>, update: PartialVector) -> Result<Vector> {
        if self.kind.is_read_only() {
            return Err(TimingError::IllegalUpdate(match self.kind {
                ConverterKind::Delay(_) => "delay converter is read-only",
                _ => "derivative converter is read-only",
            }));
        }
        let current = self.core.ensure_ready()?;
        match self.kind {
            ConverterKind::Local => local::update(self, current, update),
            ConverterKind::RangeClamp(_) => self.source.update(update),
            kind => {
                let ts = update.timestamp.unwrap_or_else(|| self.scheduler().now());
                let view = update.merge(&current.extrapolate(ts));
                let source_now = self.source.vector().map(|vector| vector.extrapolate(ts));
                let target = mapping::to_source(&kind, &view, source_now.as_ref())?;
                let forward = PartialVector {
                    update_id: update.update_id,
                    ..PartialVector::from_vector(&target)
                };
                let accepted = self.source.update(forward)?;
                Ok(mapping::to_view(&kind, &accepted))
            }
        }
    }

    fn read_only(&self) -> bool {
        self.kind.is_read_only() || self.source.read_only()
    }

    fn unsubscribe(&self) {
        for (source, id) in self.subscriptions.borrow_mut().drain(..) {
            source.off(id);
        }
    }
}

impl Drop for ConverterInner {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl TimingSource for Converter {
    fn query(&self) -> Result<Vector> {
        self.inner.core.query()
    }

    fn update(&self, update: PartialVector) -> Result<Vector> {
        self.inner.update(update)
    }

    fn range(&self) -> Range {
        self.inner.core.range()
    }

    fn vector(&self) -> Option<Vector> {
        self.inner.core.vector()
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.core.ready_state()
    }

    fn scheduler(&self) -> Scheduler {
        self.inner.core.scheduler().clone()
    }

    fn config(&self) -> TimingConfig {
        self.inner.core.config()
    }

    fn read_only(&self) -> bool {
        self.inner.read_only()
    }

    fn on(&self, kind: TimingEventKind, handler: TimingHandler) -> SubscriptionId {
        self.inner.core.subscribe(kind, handler)
    }

    fn off(&self, id: SubscriptionId) -> bool {
        self.inner.core.unsubscribe(id)
    }

    fn close(&self) {
        self.inner.unsubscribe();
        self.inner.watch.clear();
        self.inner.core.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LoopbackConfig;
    use crate::provider::{LoopbackProvider, SharedProvider};
    use crate::timing_object::TimingObject;

    fn setup(range: Range, latency: f64) -> (Scheduler, LoopbackProvider, TimingObject) {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let provider = LoopbackProvider::new(
            scheduler.clone(),
            Vector::at_rest(0.0, 0.0),
            range,
            LoopbackConfig { latency },
        );
        let timing = TimingObject::new(Rc::new(provider.clone()), scheduler.clone());
        (scheduler, provider, timing)
    }

    fn start_moving(scheduler: &Scheduler, timing: &TimingObject, update: PartialVector) {
        timing.update(update).unwrap();
        scheduler.poll();
    }

    fn live_changes(source: &dyn TimingSource) -> Rc<RefCell<Vec<Vector>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        source.on(
            TimingEventKind::Change,
            Box::new(move |event: &TimingEvent| {
                if let TimingEvent::Change(info) = event {
                    if info.live {
                        sink.borrow_mut().push(info.vector);
                    }
                }
            }),
        );
        log
    }

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_skew_follows_source_and_maps_updates() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        let skew = Converter::skew(Rc::new(timing.clone()), 2.0).unwrap();
        assert!(skew.is_ready());
        assert_eq!(skew.query().unwrap().position, 2.0);

        let requested = skew.update(PartialVector::position(10.0)).unwrap();
        assert_eq!(requested.position, 10.0);
        scheduler.poll();
        assert_eq!(timing.query().unwrap().position, 8.0);
        assert_eq!(skew.query().unwrap().position, 10.0);
    }

    #[test]
    fn test_skew_shifts_range() {
        let (_scheduler, _provider, timing) = setup(Range::new(0.0, 10.0).unwrap(), 0.0);
        let skew = Converter::position_shift(Rc::new(timing), -5.0).unwrap();
        assert_eq!(skew.range(), Range::new(-5.0, 5.0).unwrap());
    }

    #[test]
    fn test_scale_chain_is_identity() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::motion(3.0, 1.5, 0.25));
        let up = Converter::scale(Rc::new(timing.clone()), 4.0).unwrap();
        let down = Converter::scale(Rc::new(up), 0.25).unwrap();

        scheduler.advance_to(2.0);
        let direct = timing.query().unwrap();
        let through = down.query().unwrap();
        assert!(close_to(direct.position, through.position));
        assert!(close_to(direct.velocity, through.velocity));
        assert!(close_to(direct.acceleration, through.acceleration));
    }

    #[test]
    fn test_invalid_parameters() {
        let (_scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        let source: Rc<dyn TimingSource> = Rc::new(timing);
        assert!(matches!(
            Converter::scale(Rc::clone(&source), 0.0),
            Err(TimingError::InvalidParameter(_))
        ));
        assert!(matches!(
            Converter::delay(Rc::clone(&source), 0.0),
            Err(TimingError::InvalidParameter(_))
        ));
        assert!(matches!(
            Converter::looping(Rc::clone(&source), Range::infinite()),
            Err(TimingError::InvalidParameter(_))
        ));
        assert!(matches!(
            Converter::skew(source, f64::NAN),
            Err(TimingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_derivative_is_read_only_through_the_chain() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::motion(0.0, 1.0, 0.5));
        let derivative = Converter::derivative(Rc::new(timing));
        scheduler.advance_to(2.0);
        let view = derivative.query().unwrap();
        assert!(close_to(view.position, 2.0));
        assert!(close_to(view.velocity, 0.5));
        assert_eq!(view.acceleration, 0.0);

        assert!(matches!(
            derivative.update(PartialVector::position(1.0)),
            Err(TimingError::IllegalUpdate(_))
        ));
        let derivative: Rc<dyn TimingSource> = Rc::new(derivative);
        let skew = Converter::skew(Rc::clone(&derivative), 1.0).unwrap();
        assert!(matches!(
            skew.update(PartialVector::position(1.0)),
            Err(TimingError::IllegalUpdate(_))
        ));
        let local = Converter::local(derivative);
        assert!(matches!(
            local.update(PartialVector::position(1.0)),
            Err(TimingError::IllegalUpdate(_))
        ));
    }

    #[test]
    fn test_loop_wraps_while_moving() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::velocity(1.0));
        let looped = Converter::looping(Rc::new(timing), Range::new(0.0, 10.0).unwrap()).unwrap();
        let changes = live_changes(&looped);

        scheduler.advance_to(13.0);
        assert!(close_to(looped.query().unwrap().position, 3.0));
        assert_eq!(changes.borrow().len(), 1);
        assert_eq!(changes.borrow()[0].position, 0.0);
    }

    #[test]
    fn test_loop_wraps_from_bound_heading_out() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::motion(20.0, -1.0, 0.0));
        let looped = Converter::looping(Rc::new(timing), Range::new(0.0, 10.0).unwrap()).unwrap();
        assert_eq!(looped.query().unwrap().position, 10.0);
        assert!(scheduler.pending() > 0);
        let changes = live_changes(&looped);

        scheduler.advance_to(25.0);
        let wraps: Vec<(f64, f64)> = changes
            .borrow()
            .iter()
            .map(|vector| (vector.timestamp, vector.position))
            .collect();
        assert_eq!(wraps.len(), 2);
        assert!(close_to(wraps[0].0, 10.0) && wraps[0].1 == 10.0);
        assert!(close_to(wraps[1].0, 20.0) && wraps[1].1 == 10.0);
        assert!(close_to(looped.query().unwrap().position, 5.0));
    }

    #[test]
    fn test_loop_seek_to_start_and_play_backward() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::position(3.0));
        let looped = Converter::looping(Rc::new(timing), Range::new(0.0, 10.0).unwrap()).unwrap();
        looped.update(PartialVector::motion(0.0, -1.0, 0.0)).unwrap();
        scheduler.poll();
        assert_eq!(looped.query().unwrap().position, 10.0);

        scheduler.advance_to(12.0);
        assert!(close_to(looped.query().unwrap().position, 8.0));
    }

    #[test]
    fn test_loop_update_stays_in_cycle() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::position(37.0));
        let looped = Converter::looping(Rc::new(timing.clone()), Range::new(0.0, 10.0).unwrap()).unwrap();
        assert_eq!(looped.query().unwrap().position, 7.0);
        looped.update(PartialVector::position(2.0)).unwrap();
        scheduler.poll();
        assert_eq!(timing.query().unwrap().position, 32.0);
    }

    #[test]
    fn test_range_clamp_enters_and_leaves() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::velocity(1.0));
        let clamp = Converter::range(Rc::new(timing), Range::new(5.0, 8.0).unwrap()).unwrap();
        let changes = live_changes(&clamp);

        scheduler.advance_to(2.0);
        assert_eq!(clamp.query().unwrap(), Vector::at_rest(5.0, 2.0));
        scheduler.advance_to(6.0);
        let inside = clamp.query().unwrap();
        assert!(close_to(inside.position, 6.0));
        assert_eq!(inside.velocity, 1.0);
        scheduler.advance_to(9.0);
        assert_eq!(clamp.query().unwrap(), Vector::at_rest(8.0, 9.0));

        assert_eq!(changes.borrow().len(), 2);
        assert_eq!(changes.borrow()[1], Vector::at_rest(8.0, 8.0));
    }

    #[test]
    fn test_time_shift_is_clamped_to_source_range() {
        let (scheduler, _provider, timing) = setup(Range::new(0.0, 100.0).unwrap(), 0.0);
        start_moving(&scheduler, &timing, PartialVector::velocity(1.0));
        let ahead = Converter::time_shift(Rc::new(timing), 5.0).unwrap();
        assert!(close_to(ahead.query().unwrap().position, 5.0));
        assert_eq!(ahead.range(), Range::new(0.0, 100.0).unwrap());

        scheduler.advance_to(96.0);
        let view = ahead.query().unwrap();
        assert_eq!(view.position, 100.0);
        assert_eq!(view.velocity, 0.0);
    }

    #[test]
    fn test_delay_replays_source_later() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        let delayed = Converter::delay(Rc::new(timing.clone()), 2.0).unwrap();
        assert_eq!(delayed.query().unwrap().position, 0.0);

        scheduler.advance_to(1.0);
        start_moving(&scheduler, &timing, PartialVector::velocity(1.0));
        scheduler.advance_to(2.5);
        assert_eq!(delayed.query().unwrap().velocity, 0.0);
        scheduler.advance_to(4.0);
        let view = delayed.query().unwrap();
        assert_eq!(view.velocity, 1.0);
        assert!(close_to(view.position, 1.0));

        assert!(matches!(
            delayed.update(PartialVector::velocity(0.0)),
            Err(TimingError::IllegalUpdate(_))
        ));
    }

    #[test]
    fn test_local_applies_then_confirms() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.5);
        let local = Converter::local(Rc::new(timing.clone()));
        let changes = live_changes(&local);

        local.update(PartialVector::velocity(1.0)).unwrap();
        assert!(local.is_speculative());
        assert_eq!(local.query().unwrap().velocity, 1.0);
        assert_eq!(timing.query().unwrap().velocity, 0.0);

        scheduler.advance_to(0.5);
        assert!(!local.is_speculative());
        assert_eq!(timing.query().unwrap().velocity, 1.0);
        assert_eq!(changes.borrow().len(), 1);
    }

    #[test]
    fn test_local_reverts_when_not_confirmed() {
        let (scheduler, provider, timing) = setup(Range::infinite(), 0.0);
        provider.set_rejecting(true);
        let local = Converter::local(Rc::new(timing));
        let changes = live_changes(&local);

        local.update(PartialVector::velocity(3.0)).unwrap();
        assert_eq!(local.query().unwrap().velocity, 3.0);
        scheduler.advance_to(1.0);
        assert!(!local.is_speculative());
        assert_eq!(local.query().unwrap().velocity, 0.0);
        assert_eq!(changes.borrow().len(), 2);
    }

    #[test]
    fn test_converter_waits_for_source() {
        let (provider, handle) = SharedProvider::new();
        let provider = Rc::new(provider);
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let timing = TimingObject::new(provider.clone(), scheduler);
        let skew = Converter::skew(Rc::new(timing), 1.0).unwrap();
        assert_eq!(skew.query(), Err(TimingError::NotReady));

        handle.publish(Vector::at_rest(4.0, 0.0), None);
        provider.pump();
        assert_eq!(skew.query().unwrap().position, 5.0);
    }

    #[test]
    fn test_close_leaves_source_running() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        let skew = Converter::skew(Rc::new(timing.clone()), 1.0).unwrap();
        skew.close();
        assert_eq!(skew.ready_state(), ReadyState::Closed);
        start_moving(&scheduler, &timing, PartialVector::velocity(2.0));
        assert_eq!(timing.query().unwrap().velocity, 2.0);
        assert_eq!(skew.query(), Err(TimingError::Closed));
    }
}
