// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing object: a shared motion whose authority is a provider.

use crate::config::{LoopbackConfig, TimingConfig};
use crate::error::{Result, TimingError};
use crate::motion::{check_range, MotionDelta, PartialVector, Range, Vector};
use crate::notifier::SubscriptionId;
use crate::provider::{LoopbackProvider, ProviderEvent, TimingProvider, UpdateRequest};
use crate::scheduler::Scheduler;
use crate::source::{ReadyState, TimingEventKind, TimingHandler, TimingSource, UpdateId};
use crate::state::{BoundaryPolicy, Incoming, TimingCore};
use std::cell::RefCell;
use std::rc::Rc;

struct ObjectInner {
    core: Rc<TimingCore>,
    provider: RefCell<Option<Rc<dyn TimingProvider>>>,
}

/// Motion state shared by every consumer holding a clone.
///
/// Updates are forwarded to the provider; the vector only changes when the
/// provider confirms, or when the motion reaches a range bound and the object
/// stops it there.
#[derive(Clone)]
pub struct TimingObject {
    inner: Rc<ObjectInner>,
}

impl std::fmt::Debug for TimingObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingObject")
            .field("core", &self.inner.core)
            .finish()
    }
}

impl TimingObject {
    /// Create a timing object backed by `provider`
    pub fn new(provider: Rc<dyn TimingProvider>, scheduler: Scheduler) -> Self {
        Self::with_config(provider, scheduler, TimingConfig::default())
    }

    /// Create a timing object with explicit settings
    pub fn with_config(
        provider: Rc<dyn TimingProvider>,
        scheduler: Scheduler,
        config: TimingConfig,
    ) -> Self {
        let core = TimingCore::new(
            "timing_object",
            scheduler,
            config,
            BoundaryPolicy::Clamp,
            Range::infinite(),
        );

        let weak = Rc::downgrade(&core);
        provider.connect(Box::new(move |event: ProviderEvent| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            match event {
                ProviderEvent::VectorChange {
                    vector,
                    range,
                    update_id,
                } => core.process(Incoming {
                    vector: Some(vector),
                    range,
                    update_id,
                }),
                ProviderEvent::ReadyStateChange(ReadyState::Closed) => core.close(),
                ProviderEvent::ReadyStateChange(state) => {
                    tracing::trace!(?state, "provider readiness");
                }
            }
        }));

        Self {
            inner: Rc::new(ObjectInner {
                core,
                provider: RefCell::new(Some(provider)),
            }),
        }
    }

    /// Timing object over an in-process provider
    pub fn loopback(scheduler: Scheduler, initial: Vector, range: Range) -> Self {
        let provider = LoopbackProvider::new(scheduler.clone(), initial, range, LoopbackConfig::default());
        Self::new(Rc::new(provider), scheduler)
    }

    fn provider(&self) -> Result<Rc<dyn TimingProvider>> {
        self.inner.provider.borrow().clone().ok_or(TimingError::Closed)
    }

    /// Vector at `ts`, kept inside the range
    pub fn query_at(&self, ts: f64) -> Result<Vector> {
        self.inner.core.query_at(ts)
    }

    /// Request a new range
    pub fn update_range(&self, range: Range) -> Result<UpdateId> {
        self.inner.core.ensure_ready()?;
        let update_id = UpdateId::new();
        self.provider()?.request_update(UpdateRequest {
            vector: None,
            range: Some(range),
            update_id,
        })?;
        Ok(update_id)
    }

    /// Vector before the last change
    pub fn old_vector(&self) -> Option<Vector> {
        self.inner.core.old_vector()
    }

    /// Nature of the last change
    pub fn motion_delta(&self) -> Option<MotionDelta> {
        let vector = self.inner.core.vector()?;
        Some(MotionDelta::new(self.old_vector().as_ref(), &vector))
    }
}

impl TimingSource for TimingObject {
    fn query(&self) -> Result<Vector> {
        self.inner.core.query()
    }

    fn update(&self, update: PartialVector) -> Result<Vector> {
        let current = self.inner.core.ensure_ready()?;
        let ts = update.timestamp.unwrap_or_else(|| self.inner.core.scheduler().now());
        let merged = update.merge(&current.extrapolate(ts));
        let vector = check_range(&merged, &self.inner.core.range());
        let update_id = update.update_id.unwrap_or_default();
        tracing::debug!(%vector, %update_id, "update requested");
        self.provider()?.request_update(UpdateRequest {
            vector: Some(vector),
            range: None,
            update_id,
        })?;
        Ok(vector)
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

    fn on(&self, kind: TimingEventKind, handler: TimingHandler) -> SubscriptionId {
        self.inner.core.subscribe(kind, handler)
    }

    fn off(&self, id: SubscriptionId) -> bool {
        self.inner.core.unsubscribe(id)
    }

    fn close(&self) {
        self.inner.provider.borrow_mut().take();
        self.inner.core.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::SharedProvider;
    use crate::source::{ChangeInfo, TimingEvent};

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

    fn record_changes(timing: &TimingObject) -> Rc<RefCell<Vec<ChangeInfo>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        timing.on(
            TimingEventKind::Change,
            Box::new(move |event: &TimingEvent| {
                if let TimingEvent::Change(info) = event {
                    if info.live {
                        sink.borrow_mut().push(*info);
                    }
                }
            }),
        );
        log
    }

    #[test]
    fn test_ready_after_connect() {
        let (_scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        assert!(timing.is_ready());
        assert_eq!(timing.query().unwrap(), Vector::at_rest(0.0, 0.0));
    }

    #[test]
    fn test_update_waits_for_provider() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.1);
        let changes = record_changes(&timing);

        let requested = timing.update(PartialVector::velocity(1.0)).unwrap();
        assert_eq!(requested, Vector::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(timing.query().unwrap().velocity, 0.0);

        scheduler.advance_to(0.1);
        assert_eq!(changes.borrow().len(), 1);
        assert!(changes.borrow()[0].update_id.is_some());
        assert_eq!(timing.query().unwrap().velocity, 1.0);
    }

    #[test]
    fn test_range_self_clamp() {
        let range = Range::new(0.0, 100.0).unwrap();
        let (scheduler, _provider, timing) = setup(range, 0.0);
        let changes = record_changes(&timing);

        timing.update(PartialVector::motion(0.0, 1.0, 0.0)).unwrap();
        scheduler.advance_to(10.0);
        let at_ten = timing.query().unwrap();
        assert!((at_ten.position - 10.0).abs() < 1e-9);
        assert_eq!(at_ten.velocity, 1.0);
        assert_eq!(at_ten.acceleration, 0.0);

        scheduler.advance_to(200.0);
        let last = changes.borrow().last().copied().unwrap();
        assert_eq!(last.vector.position, 100.0);
        assert_eq!(last.vector.velocity, 0.0);
        assert_eq!(last.vector.timestamp, 100.0);
        assert_eq!(timing.query().unwrap().position, 100.0);
    }

    #[test]
    fn test_update_is_clamped_into_range() {
        let range = Range::new(0.0, 10.0).unwrap();
        let (_scheduler, _provider, timing) = setup(range, 0.0);
        let requested = timing.update(PartialVector::position(25.0).with_velocity(2.0)).unwrap();
        assert_eq!(requested, Vector::at_rest(10.0, 0.0));
    }

    #[test]
    fn test_rejected_update_leaves_vector() {
        let (scheduler, provider, timing) = setup(Range::infinite(), 0.0);
        let changes = record_changes(&timing);
        provider.set_rejecting(true);
        timing.update(PartialVector::velocity(3.0)).unwrap();
        scheduler.advance_by(1.0);
        assert!(changes.borrow().is_empty());
        assert_eq!(timing.query().unwrap(), Vector::at_rest(0.0, 1.0));
    }

    #[test]
    fn test_update_range() {
        let (scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        timing.update(PartialVector::motion(50.0, 0.0, 0.0)).unwrap();
        scheduler.poll();
        timing.update_range(Range::new(0.0, 20.0).unwrap()).unwrap();
        scheduler.poll();
        assert_eq!(timing.range(), Range::new(0.0, 20.0).unwrap());
        assert_eq!(timing.query().unwrap().position, 20.0);
    }

    #[test]
    fn test_not_ready_without_provider_vector() {
        let (provider, handle) = SharedProvider::new();
        let provider = Rc::new(provider);
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let timing = TimingObject::new(provider.clone(), scheduler);
        assert_eq!(timing.query(), Err(TimingError::NotReady));
        assert_eq!(
            timing.update(PartialVector::velocity(1.0)),
            Err(TimingError::NotReady)
        );

        handle.publish(Vector::new(1.0, 1.0, 0.0, 0.0), None);
        provider.pump();
        assert!(timing.is_ready());
    }

    #[test]
    fn test_close() {
        let (_scheduler, _provider, timing) = setup(Range::infinite(), 0.0);
        timing.close();
        assert_eq!(timing.ready_state(), ReadyState::Closed);
        assert_eq!(timing.query(), Err(TimingError::Closed));
        assert_eq!(
            timing.update(PartialVector::velocity(1.0)),
            Err(TimingError::Closed)
        );
    }
}
