// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing providers.
//!
//! A provider is the authority behind a [`TimingObject`](crate::TimingObject):
//! the object forwards update requests to it and only changes its vector when
//! the provider reports an accepted one.
//!
//! - [`LoopbackProvider`] keeps the authoritative state in process.
//! - [`SharedProvider`] bridges to a transport on another thread through a
//!   [`ProviderHandle`].

use crate::config::LoopbackConfig;
use crate::error::{Result, TimingError};
use crate::motion::{check_range, Range, Vector};
use crate::scheduler::Scheduler;
use crate::source::{ReadyState, UpdateId};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

/// Notification from a provider to its timing objects
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A vector (and possibly a range) was accepted
    VectorChange {
        /// Authoritative vector
        vector: Vector,
        /// New range, if it changed
        range: Option<Range>,
        /// Request that produced this vector
        update_id: Option<UpdateId>,
    },
    /// Provider readiness changed
    ReadyStateChange(ReadyState),
}

/// Request from a timing object to its provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRequest {
    /// Requested vector
    pub vector: Option<Vector>,
    /// Requested range
    pub range: Option<Range>,
    /// Correlation id echoed in the confirmation
    pub update_id: UpdateId,
}

/// Callback receiving [`ProviderEvent`]s
pub type ProviderListener = Box<dyn FnMut(ProviderEvent)>;

type SharedListener = Rc<RefCell<dyn FnMut(ProviderEvent)>>;

/// Authority for a timing object's vector and range
pub trait TimingProvider {
    /// Register a listener. A provider that already holds a vector delivers it
    /// to the new listener before returning.
    fn connect(&self, listener: ProviderListener);

    /// Ask for a new vector and/or range
    fn request_update(&self, request: UpdateRequest) -> Result<()>;

    /// Readiness
    fn ready_state(&self) -> ReadyState;

    /// Stop accepting requests and notify listeners
    fn close(&self);
}

fn notify(listeners: &[SharedListener], event: &ProviderEvent) {
    for listener in listeners {
        match listener.try_borrow_mut() {
            Ok(mut listener) => (&mut *listener)(event.clone()),
            Err(_) => tracing::warn!("provider listener re-entered, event skipped"),
        }
    }
}

#[derive(Debug)]
struct LoopbackState {
    vector: Vector,
    range: Range,
    ready: ReadyState,
    rejecting: bool,
}

struct LoopbackInner {
    scheduler: Scheduler,
    config: LoopbackConfig,
    state: RefCell<LoopbackState>,
    listeners: RefCell<Vec<SharedListener>>,
}

/// In-process provider.
///
/// Accepts requests after the configured latency, on the scheduler. Clones
/// share the same state.
#[derive(Clone)]
pub struct LoopbackProvider {
    inner: Rc<LoopbackInner>,
}

impl std::fmt::Debug for LoopbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackProvider")
            .field("state", &self.inner.state.borrow())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl LoopbackProvider {
    /// Create a provider holding `vector` within `range`
    pub fn new(scheduler: Scheduler, vector: Vector, range: Range, config: LoopbackConfig) -> Self {
        Self {
            inner: Rc::new(LoopbackInner {
                scheduler,
                config,
                state: RefCell::new(LoopbackState {
                    vector: check_range(&vector, &range),
                    range,
                    ready: ReadyState::Ready,
                    rejecting: false,
                }),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Provider at rest at position 0 with an unbounded range
    pub fn at_rest(scheduler: Scheduler) -> Self {
        let now = scheduler.now();
        Self::new(scheduler, Vector::at_rest(0.0, now), Range::infinite(), LoopbackConfig::default())
    }

    /// Authoritative vector
    pub fn vector(&self) -> Vector {
        self.inner.state.borrow().vector
    }

    /// Authoritative range
    pub fn range(&self) -> Range {
        self.inner.state.borrow().range
    }

    /// Drop every request instead of accepting it
    pub fn set_rejecting(&self, rejecting: bool) {
        self.inner.state.borrow_mut().rejecting = rejecting;
    }

    fn accept(inner: &LoopbackInner, request: UpdateRequest) {
        let event = {
            let mut state = inner.state.borrow_mut();
            if state.ready == ReadyState::Closed {
                return;
            }
            let range = request.range.filter(|range| *range != state.range);
            if let Some(range) = range {
                state.range = range;
            }
            let vector = request.vector.unwrap_or(state.vector);
            state.vector = check_range(&vector, &state.range);
            tracing::debug!(vector = %state.vector, update_id = %request.update_id, "loopback accepted update");
            ProviderEvent::VectorChange {
                vector: state.vector,
                range,
                update_id: Some(request.update_id),
            }
        };
        let listeners = inner.listeners.borrow().clone();
        notify(&listeners, &event);
    }
}

impl TimingProvider for LoopbackProvider {
    fn connect(&self, listener: ProviderListener) {
        let listener: SharedListener = Rc::new(RefCell::new(listener));
        self.inner.listeners.borrow_mut().push(Rc::clone(&listener));
        let initial = {
            let state = self.inner.state.borrow();
            (state.ready == ReadyState::Ready).then_some(ProviderEvent::VectorChange {
                vector: state.vector,
                range: Some(state.range),
                update_id: None,
            })
        };
        if let Some(event) = initial {
            notify(&[listener], &event);
        }
    }

    fn request_update(&self, request: UpdateRequest) -> Result<()> {
        {
            let state = self.inner.state.borrow();
            if state.ready == ReadyState::Closed {
                return Err(TimingError::Closed);
            }
            if state.rejecting {
                tracing::warn!(update_id = %request.update_id, "loopback provider rejected update");
                return Ok(());
            }
            let same_vector = request.vector.map_or(true, |vector| {
                let current = state.vector.extrapolate(vector.timestamp);
                vector.same_motion(&current)
            });
            let same_range = request.range.map_or(true, |range| range == state.range);
            if same_vector && same_range {
                tracing::debug!(update_id = %request.update_id, "loopback dropped no-op update");
                return Ok(());
            }
        }

        let inner = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule_after(self.inner.config.latency, move || {
            if let Some(inner) = inner.upgrade() {
                Self::accept(&inner, request);
            }
        });
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.state.borrow().ready
    }

    fn close(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.ready == ReadyState::Closed {
                return;
            }
            state.ready = ReadyState::Closed;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        notify(&listeners, &ProviderEvent::ReadyStateChange(ReadyState::Closed));
    }
}

#[derive(Debug, Default)]
struct SharedState {
    inbound: VecDeque<ProviderEvent>,
    outbound: Vec<UpdateRequest>,
    ready: ReadyState,
}

/// Thread-safe side of a [`SharedProvider`], held by the transport.
///
/// Clones share the same queues.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    shared: Arc<Mutex<SharedState>>,
}

impl ProviderHandle {
    /// Publish an authoritative vector
    pub fn publish(&self, vector: Vector, range: Option<Range>) {
        self.push(ProviderEvent::VectorChange {
            vector,
            range,
            update_id: None,
        });
    }

    /// Publish the vector of an accepted request, echoing its update ID
    pub fn confirm(&self, request: &UpdateRequest, vector: Vector) {
        self.push(ProviderEvent::VectorChange {
            vector,
            range: request.range,
            update_id: Some(request.update_id),
        });
    }

    /// Change readiness
    pub fn set_ready(&self, ready: ReadyState) {
        let mut shared = self.shared.lock();
        shared.ready = ready;
        shared.inbound.push_back(ProviderEvent::ReadyStateChange(ready));
    }

    /// Drain requests made by timing objects since the last call
    pub fn take_requests(&self) -> Vec<UpdateRequest> {
        std::mem::take(&mut self.shared.lock().outbound)
    }

    fn push(&self, event: ProviderEvent) {
        let mut shared = self.shared.lock();
        if shared.ready == ReadyState::NotReady {
            shared.ready = ReadyState::Ready;
        }
        shared.inbound.push_back(event);
    }
}

/// Provider fed from another thread.
///
/// The transport publishes through a [`ProviderHandle`]; events reach timing
/// objects when the owning thread calls [`SharedProvider::pump`].
pub struct SharedProvider {
    shared: Arc<Mutex<SharedState>>,
    listeners: RefCell<Vec<SharedListener>>,
    last: RefCell<Option<(Vector, Range)>>,
}

impl std::fmt::Debug for SharedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedProvider")
            .field("last", &self.last.borrow())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl SharedProvider {
    /// Create a provider and the handle its transport uses
    pub fn new() -> (Self, ProviderHandle) {
        let shared = Arc::new(Mutex::new(SharedState::default()));
        let provider = Self {
            shared: Arc::clone(&shared),
            listeners: RefCell::new(Vec::new()),
            last: RefCell::new(None),
        };
        (provider, ProviderHandle { shared })
    }

    /// Deliver every event published since the last pump. Returns the count.
    pub fn pump(&self) -> usize {
        let events: Vec<ProviderEvent> = self.shared.lock().inbound.drain(..).collect();
        for event in &events {
            if let ProviderEvent::VectorChange { vector, range, .. } = event {
                let mut last = self.last.borrow_mut();
                let range = range.or(last.map(|(_, range)| range)).unwrap_or_default();
                *last = Some((*vector, range));
            }
            let listeners = self.listeners.borrow().clone();
            notify(&listeners, event);
        }
        events.len()
    }
}

impl TimingProvider for SharedProvider {
    fn connect(&self, listener: ProviderListener) {
        let listener: SharedListener = Rc::new(RefCell::new(listener));
        self.listeners.borrow_mut().push(Rc::clone(&listener));
        let last = *self.last.borrow();
        if let Some((vector, range)) = last {
            notify(
                &[listener],
                &ProviderEvent::VectorChange {
                    vector,
                    range: Some(range),
                    update_id: None,
                },
            );
        }
    }

    fn request_update(&self, request: UpdateRequest) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.ready == ReadyState::Closed {
            return Err(TimingError::Closed);
        }
        shared.outbound.push(request);
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.lock().ready
    }

    fn close(&self) {
        self.shared.lock().ready = ReadyState::Closed;
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        notify(&listeners, &ProviderEvent::ReadyStateChange(ReadyState::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn recorder() -> (Rc<RefCell<Vec<ProviderEvent>>>, ProviderListener) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, Box::new(move |event: ProviderEvent| sink.borrow_mut().push(event)))
    }

    #[test]
    fn test_loopback_delivers_initial_state_on_connect() {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let provider = LoopbackProvider::at_rest(scheduler);
        let (log, listener) = recorder();
        provider.connect(listener);
        assert_eq!(log.borrow().len(), 1);
        assert!(matches!(
            log.borrow()[0],
            ProviderEvent::VectorChange { update_id: None, .. }
        ));
    }

    #[test]
    fn test_loopback_accepts_after_latency() {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let provider = LoopbackProvider::new(
            scheduler.clone(),
            Vector::at_rest(0.0, 0.0),
            Range::infinite(),
            LoopbackConfig { latency: 0.5 },
        );
        let (log, listener) = recorder();
        provider.connect(listener);

        let update_id = UpdateId::new();
        provider
            .request_update(UpdateRequest {
                vector: Some(Vector::new(0.0, 1.0, 0.0, 0.0)),
                range: None,
                update_id,
            })
            .unwrap();
        scheduler.advance_to(0.4);
        assert_eq!(log.borrow().len(), 1);
        scheduler.advance_to(0.5);
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(
            log.borrow()[1],
            ProviderEvent::VectorChange {
                vector: Vector::new(0.0, 1.0, 0.0, 0.0),
                range: None,
                update_id: Some(update_id),
            }
        );
    }

    #[test]
    fn test_loopback_drops_noop_and_rejected_requests() {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let provider = LoopbackProvider::at_rest(scheduler.clone());
        let (log, listener) = recorder();
        provider.connect(listener);

        let noop = UpdateRequest {
            vector: Some(Vector::at_rest(0.0, 0.0)),
            range: None,
            update_id: UpdateId::new(),
        };
        provider.request_update(noop).unwrap();
        assert_eq!(scheduler.pending(), 0);

        provider.set_rejecting(true);
        let moving = UpdateRequest {
            vector: Some(Vector::new(0.0, 1.0, 0.0, 0.0)),
            ..noop
        };
        provider.request_update(moving).unwrap();
        scheduler.advance_by(1.0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(provider.vector(), Vector::at_rest(0.0, 0.0));
    }

    #[test]
    fn test_closed_loopback_refuses_requests() {
        let scheduler = Scheduler::manual(ManualClock::new(0.0));
        let provider = LoopbackProvider::at_rest(scheduler);
        let (log, listener) = recorder();
        provider.connect(listener);
        provider.close();
        assert_eq!(
            log.borrow().last(),
            Some(&ProviderEvent::ReadyStateChange(ReadyState::Closed))
        );
        let request = UpdateRequest {
            vector: Some(Vector::new(1.0, 0.0, 0.0, 0.0)),
            range: None,
            update_id: UpdateId::new(),
        };
        assert_eq!(provider.request_update(request), Err(TimingError::Closed));
    }

    #[test]
    fn test_shared_provider_crosses_threads() {
        let (provider, handle) = SharedProvider::new();
        let (log, listener) = recorder();
        provider.connect(listener);
        assert_eq!(provider.ready_state(), ReadyState::NotReady);

        let transport = handle.clone();
        std::thread::spawn(move || {
            transport.publish(Vector::new(5.0, 1.0, 0.0, 0.0), Range::new(0.0, 10.0).ok());
        })
        .join()
        .unwrap();

        assert!(log.borrow().is_empty());
        assert_eq!(provider.pump(), 1);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(provider.ready_state(), ReadyState::Ready);

        let request = UpdateRequest {
            vector: Some(Vector::at_rest(7.0, 1.0)),
            range: None,
            update_id: UpdateId::new(),
        };
        provider.request_update(request).unwrap();
        let requests = handle.take_requests();
        assert_eq!(requests, vec![request]);
        assert!(handle.take_requests().is_empty());
    }
}
