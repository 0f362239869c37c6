// SPDX-License-Identifier: MIT OR Apache-2.0
//! State and event plumbing shared by timing objects and converters.

use crate::config::TimingConfig;
use crate::error::{Result, TimingError};
use crate::motion::{check_range, range_state, time_to_range_boundary, Range, RangeState, Vector};
use crate::notifier::{Notifier, SubscriptionId};
use crate::scheduler::{Scheduler, Timeout};
use crate::source::{ChangeInfo, ReadyState, TimingEvent, TimingEventKind, UpdateId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// What happens when the motion reaches a range bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundaryPolicy {
    /// Stop exactly at the bound and emit a change
    Clamp,
    /// Jump to the opposite bound, keeping the motion
    Wrap,
    /// Nothing is scheduled; queries are still clamped
    Off,
}

/// Input to [`TimingCore::process`]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Incoming {
    pub vector: Option<Vector>,
    pub range: Option<Range>,
    pub update_id: Option<UpdateId>,
}

impl Incoming {
    pub fn vector(vector: Vector, update_id: Option<UpdateId>) -> Self {
        Self {
            vector: Some(vector),
            range: None,
            update_id,
        }
    }

    pub fn range(range: Range) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct CoreState {
    vector: Option<Vector>,
    old_vector: Option<Vector>,
    range: Range,
    ready: ReadyState,
}

/// Authoritative vector, range and readiness of one timing source, with its
/// notifier and boundary timers.
pub(crate) struct TimingCore {
    label: &'static str,
    weak_self: Weak<TimingCore>,
    state: RefCell<CoreState>,
    notifier: Notifier<TimingEvent>,
    scheduler: Scheduler,
    config: TimingConfig,
    policy: BoundaryPolicy,
    boundary: Timeout,
    ticker: Timeout,
}

impl std::fmt::Debug for TimingCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingCore")
            .field("label", &self.label)
            .field("state", &self.state.borrow())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Position wrapped into `range`, motion kept.
///
/// A position on a bound and heading out is moved to the opposite bound.
fn wrap(vector: &Vector, range: &Range) -> Vector {
    let mut wrapped = *vector;
    if !range.contains(vector.position) {
        wrapped.position = range.wrap(vector.position);
    }
    if range.is_finite() && range.width() > 0.0 {
        match range_state(&wrapped, range) {
            RangeState::OutsideLow => wrapped.position = range.high(),
            RangeState::OutsideHigh => wrapped.position = range.low(),
            RangeState::Inside => {}
        }
    }
    wrapped
}

impl TimingCore {
    pub fn new(
        label: &'static str,
        scheduler: Scheduler,
        config: TimingConfig,
        policy: BoundaryPolicy,
        range: Range,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            label,
            weak_self: weak_self.clone(),
            state: RefCell::new(CoreState {
                range,
                ..CoreState::default()
            }),
            notifier: Notifier::new(),
            boundary: Timeout::new(scheduler.clone()),
            ticker: Timeout::new(scheduler.clone()),
            scheduler,
            config,
            policy,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> TimingConfig {
        self.config
    }

    pub fn vector(&self) -> Option<Vector> {
        self.state.borrow().vector
    }

    pub fn old_vector(&self) -> Option<Vector> {
        self.state.borrow().old_vector
    }

    pub fn range(&self) -> Range {
        self.state.borrow().range
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready
    }

    /// Fail unless a vector is available
    pub fn ensure_ready(&self) -> Result<Vector> {
        let state = self.state.borrow();
        match (state.ready, state.vector) {
            (ReadyState::Closed, _) => Err(TimingError::Closed),
            (ReadyState::Ready, Some(vector)) => Ok(vector),
            _ => Err(TimingError::NotReady),
        }
    }

    /// Vector at `ts`, kept inside the range. Never mutates.
    pub fn query_at(&self, ts: f64) -> Result<Vector> {
        let vector = self.ensure_ready()?.extrapolate(ts);
        let range = self.range();
        Ok(match self.policy {
            BoundaryPolicy::Wrap => wrap(&vector, &range),
            BoundaryPolicy::Clamp | BoundaryPolicy::Off => check_range(&vector, &range),
        })
    }

    pub fn query(&self) -> Result<Vector> {
        self.query_at(self.scheduler.now())
    }

    /// Apply a new vector and/or range, then emit events in order:
    /// readiness, range, change, timeupdate.
    pub fn process(&self, incoming: Incoming) {
        let now = self.scheduler.now();
        let mut events = Vec::with_capacity(4);
        {
            let mut state = self.state.borrow_mut();
            if state.ready == ReadyState::Closed {
                return;
            }
            let mut range_changed = false;
            if let Some(range) = incoming.range.filter(|range| *range != state.range) {
                state.range = range;
                range_changed = true;
                events.push(TimingEvent::RangeChange(range));
            }
            // a new range may leave the current vector out of bounds
            let candidate = match incoming.vector {
                Some(vector) => Some((vector, true)),
                None if range_changed => state.vector.map(|vector| (vector.extrapolate(now), false)),
                None => None,
            };
            if let Some((vector, explicit)) = candidate {
                let shaped = match self.policy {
                    BoundaryPolicy::Clamp => check_range(&vector, &state.range),
                    BoundaryPolicy::Wrap => wrap(&vector, &state.range),
                    BoundaryPolicy::Off => vector,
                };
                if explicit || shaped != vector {
                    state.old_vector = state.vector.replace(shaped);
                    events.push(TimingEvent::Change(ChangeInfo {
                        vector: shaped,
                        update_id: incoming.update_id,
                        live: true,
                    }));
                }
            }
            if state.ready == ReadyState::NotReady && state.vector.is_some() {
                state.ready = ReadyState::Ready;
                events.insert(0, TimingEvent::ReadyStateChange(ReadyState::Ready));
            }
        }

        let changed = events.iter().any(|event| matches!(event, TimingEvent::Change(_)));
        let renew = changed || events.iter().any(|event| matches!(event, TimingEvent::RangeChange(_)));
        for event in events {
            if let TimingEvent::Change(info) = &event {
                tracing::debug!(source = self.label, vector = %info.vector, "change");
            }
            self.notifier.emit(event);
        }
        if changed {
            if let Ok(now) = self.query() {
                self.notifier.emit(TimingEvent::TimeUpdate(now));
            }
        }
        if renew {
            self.renew_timers();
        }
    }

    fn renew_timers(&self) {
        self.boundary.clear();
        self.ticker.clear();
        let Some(vector) = self.vector() else {
            return;
        };
        let now = self.scheduler.now();
        let current = vector.extrapolate(now);
        if current.is_moving() {
            self.renew_ticker();
        }

        let armed = match self.policy {
            BoundaryPolicy::Clamp => self.config.range_timeouts,
            BoundaryPolicy::Wrap => true,
            BoundaryPolicy::Off => false,
        };
        if !armed || !current.is_moving() {
            return;
        }
        let range = self.range();
        let at = if range_state(&current, &range) != RangeState::Inside {
            Some(now)
        } else {
            time_to_range_boundary(&current, &range).map(|(dt, _)| now + dt)
        };
        if let Some(at) = at {
            let weak = self.weak_self.clone();
            self.boundary.set(at, move || {
                if let Some(core) = weak.upgrade() {
                    core.on_boundary();
                }
            });
        }
    }

    fn on_boundary(&self) {
        let Some(vector) = self.vector() else {
            return;
        };
        let range = self.range();
        let current = vector.extrapolate(self.scheduler.now());
        let next = match self.policy {
            BoundaryPolicy::Clamp => {
                let clamped = check_range(&current, &range);
                tracing::debug!(source = self.label, position = clamped.position, "range clamp");
                clamped
            }
            BoundaryPolicy::Wrap => {
                let bound_high = (current.position - range.high()).abs()
                    <= (current.position - range.low()).abs();
                let position = if bound_high { range.low() } else { range.high() };
                tracing::debug!(source = self.label, position, "range wrap");
                Vector { position, ..current }
            }
            BoundaryPolicy::Off => return,
        };
        self.process(Incoming::vector(next, None));
    }

    fn renew_ticker(&self) {
        let interval = self.config.timeupdate_interval;
        if interval <= 0.0 || !self.notifier.has_subscribers(TimingEventKind::TimeUpdate) {
            return;
        }
        let weak = self.weak_self.clone();
        self.ticker.set(self.scheduler.now() + interval, move || {
            if let Some(core) = weak.upgrade() {
                core.on_tick();
            }
        });
    }

    fn on_tick(&self) {
        let Ok(vector) = self.query() else {
            return;
        };
        self.notifier.emit(TimingEvent::TimeUpdate(vector));
        if vector.is_moving() {
            self.renew_ticker();
        }
    }

    /// Events describing the current state, replayed to a new subscriber
    fn replay(&self, kind: TimingEventKind) -> Vec<TimingEvent> {
        let state = self.state.borrow();
        let ready = state.ready == ReadyState::Ready;
        match kind {
            TimingEventKind::Change => state
                .vector
                .filter(|_| ready)
                .map(|vector| {
                    TimingEvent::Change(ChangeInfo {
                        vector,
                        update_id: None,
                        live: false,
                    })
                })
                .into_iter()
                .collect(),
            TimingEventKind::TimeUpdate => {
                drop(state);
                self.query().map(TimingEvent::TimeUpdate).into_iter().collect()
            }
            TimingEventKind::ReadyStateChange => vec![TimingEvent::ReadyStateChange(state.ready)],
            TimingEventKind::RangeChange => vec![TimingEvent::RangeChange(state.range)],
        }
    }

    pub fn subscribe(
        &self,
        kind: TimingEventKind,
        handler: impl FnMut(&TimingEvent) + 'static,
    ) -> SubscriptionId {
        let replay = self.replay(kind);
        let id = self.notifier.on_with_replay(kind, handler, replay);
        if kind == TimingEventKind::TimeUpdate && !self.ticker.is_set() {
            if let Ok(vector) = self.query() {
                if vector.is_moving() {
                    self.renew_ticker();
                }
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.off(id)
    }

    pub fn close(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.ready == ReadyState::Closed {
                return;
            }
            state.ready = ReadyState::Closed;
        }
        self.boundary.clear();
        self.ticker.clear();
        tracing::debug!(source = self.label, "closed");
        self.notifier
            .emit(TimingEvent::ReadyStateChange(ReadyState::Closed));
        self.notifier.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn core(policy: BoundaryPolicy, range: Range) -> (Scheduler, Rc<TimingCore>) {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let core = TimingCore::new("test", scheduler.clone(), TimingConfig::default(), policy, range);
        (scheduler, core)
    }

    fn kinds(log: &Rc<RefCell<Vec<TimingEvent>>>) -> Vec<TimingEventKind> {
        use crate::notifier::Event;
        log.borrow().iter().map(Event::kind).collect()
    }

    #[test]
    fn test_not_ready_until_first_vector() {
        let (_scheduler, core) = core(BoundaryPolicy::Clamp, Range::infinite());
        assert_eq!(core.query(), Err(TimingError::NotReady));
        core.process(Incoming::vector(Vector::at_rest(3.0, 0.0), None));
        assert_eq!(core.ready_state(), ReadyState::Ready);
        assert_eq!(core.query().unwrap().position, 3.0);
    }

    #[test]
    fn test_first_vector_emits_ready_then_change() {
        let (_scheduler, core) = core(BoundaryPolicy::Clamp, Range::infinite());
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [
            TimingEventKind::ReadyStateChange,
            TimingEventKind::Change,
            TimingEventKind::TimeUpdate,
        ] {
            let sink = Rc::clone(&log);
            core.subscribe(kind, move |event| sink.borrow_mut().push(event.clone()));
        }
        log.borrow_mut().clear();

        core.process(Incoming::vector(Vector::at_rest(1.0, 0.0), None));
        assert_eq!(
            kinds(&log),
            vec![
                TimingEventKind::ReadyStateChange,
                TimingEventKind::Change,
                TimingEventKind::TimeUpdate,
            ]
        );
    }

    #[test]
    fn test_clamp_at_range_boundary() {
        let range = Range::new(0.0, 100.0).unwrap();
        let (scheduler, core) = core(BoundaryPolicy::Clamp, range);
        core.process(Incoming::vector(Vector::new(0.0, 1.0, 0.0, 0.0), None));

        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&changes);
        core.subscribe(TimingEventKind::Change, move |event| {
            if let TimingEvent::Change(info) = event {
                if info.live {
                    sink.borrow_mut().push(info.vector);
                }
            }
        });

        scheduler.advance_to(10.0);
        let at_ten = core.query().unwrap();
        assert!((at_ten.position - 10.0).abs() < 1e-9);
        assert_eq!(at_ten.velocity, 1.0);
        assert!(changes.borrow().is_empty());

        scheduler.advance_to(150.0);
        assert_eq!(*changes.borrow(), vec![Vector::at_rest(100.0, 100.0)]);
        assert_eq!(core.query().unwrap(), Vector::at_rest(100.0, 150.0));
    }

    #[test]
    fn test_wrap_keeps_moving() {
        let range = Range::new(0.0, 10.0).unwrap();
        let (scheduler, core) = core(BoundaryPolicy::Wrap, range);
        core.process(Incoming::vector(Vector::new(5.0, 1.0, 0.0, 0.0), None));
        scheduler.advance_to(5.0);
        let wrapped = core.vector().unwrap();
        assert_eq!(wrapped.position, 0.0);
        assert_eq!(wrapped.velocity, 1.0);
        scheduler.advance_to(7.5);
        assert!((core.query().unwrap().position - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_late_subscriber_gets_current_state() {
        let (_scheduler, core) = core(BoundaryPolicy::Off, Range::infinite());
        core.process(Incoming::vector(Vector::at_rest(7.0, 0.0), None));
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        core.subscribe(TimingEventKind::Change, move |event| sink.borrow_mut().push(event.clone()));
        assert_eq!(
            *log.borrow(),
            vec![TimingEvent::Change(ChangeInfo {
                vector: Vector::at_rest(7.0, 0.0),
                update_id: None,
                live: false,
            })]
        );
    }

    #[test]
    fn test_timeupdate_ticks_while_moving() {
        let (scheduler, core) = core(BoundaryPolicy::Off, Range::infinite());
        core.process(Incoming::vector(Vector::new(0.0, 1.0, 0.0, 0.0), None));
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        core.subscribe(TimingEventKind::TimeUpdate, move |_| *sink.borrow_mut() += 1);
        *count.borrow_mut() = 0;
        scheduler.advance_to(1.05);
        assert_eq!(*count.borrow(), 5);

        core.process(Incoming::vector(Vector::at_rest(1.05, 1.05), None));
        *count.borrow_mut() = 0;
        scheduler.advance_to(2.0);
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_close_stops_events() {
        let (scheduler, core) = core(BoundaryPolicy::Clamp, Range::infinite());
        core.process(Incoming::vector(Vector::new(0.0, 1.0, 0.0, 0.0), None));
        core.close();
        assert_eq!(core.query(), Err(TimingError::Closed));
        assert_eq!(scheduler.pending(), 0);
    }
}
