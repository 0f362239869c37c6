// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronous event notifier.
//!
//! Handlers run on the emitting call stack. An event emitted from inside a
//! handler is queued and delivered once the current event has reached every
//! handler, so each subscriber observes events in the order they were emitted.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// An event type with a discriminating kind used for subscriptions
pub trait Event: Clone + 'static {
    /// Event kind
    type Kind: Copy + Eq + fmt::Debug + 'static;

    /// Kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`Notifier::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct Subscription<E: Event> {
    id: SubscriptionId,
    kind: E::Kind,
    handler: Handler<E>,
    /// First event sequence number this subscription may receive
    since: u64,
}

/// Per-object list of event handlers
pub struct Notifier<E: Event> {
    subscriptions: RefCell<Vec<Subscription<E>>>,
    queue: RefCell<VecDeque<(u64, E)>>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
    next_seq: Cell<u64>,
}

impl<E: Event> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}

impl<E: Event> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets the dispatching flag even if a handler panics
struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<E: Event> Notifier<E> {
    /// Create a notifier with no subscribers
    pub fn new() -> Self {
        Self {
            subscriptions: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            next_id: Cell::new(0),
            next_seq: Cell::new(0),
        }
    }

    /// Subscribe to events of `kind`
    pub fn on(&self, kind: E::Kind, handler: impl FnMut(&E) + 'static) -> SubscriptionId {
        self.register(kind, Rc::new(RefCell::new(handler)))
    }

    /// Subscribe to events of `kind`, first delivering `replay` to this handler only.
    ///
    /// Events already queued when the subscription is made are not delivered to
    /// it: the replay stands in for them.
    pub fn on_with_replay(
        &self,
        kind: E::Kind,
        handler: impl FnMut(&E) + 'static,
        replay: Vec<E>,
    ) -> SubscriptionId {
        let handler: Handler<E> = Rc::new(RefCell::new(handler));
        for event in replay.iter().filter(|event| event.kind() == kind) {
            (&mut *handler.borrow_mut())(event);
        }
        self.register(kind, handler)
    }

    fn register(&self, kind: E::Kind, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            kind,
            handler,
            since: self.next_seq.get(),
        });
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }

    /// Remove every subscription and drop queued events
    pub fn clear(&self) {
        self.subscriptions.borrow_mut().clear();
        self.queue.borrow_mut().clear();
    }

    /// Number of registered subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    /// Whether anyone listens to `kind`
    pub fn has_subscribers(&self, kind: E::Kind) -> bool {
        self.subscriptions.borrow().iter().any(|sub| sub.kind == kind)
    }

    /// Deliver `event` to every handler subscribed to its kind
    pub fn emit(&self, event: E) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.queue.borrow_mut().push_back((seq, event));
        if self.dispatching.get() {
            return;
        }

        self.dispatching.set(true);
        let _guard = DispatchGuard(&self.dispatching);
        loop {
            let Some((seq, event)) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            self.dispatch(seq, &event);
        }
    }

    fn dispatch(&self, seq: u64, event: &E) {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Handler<E>)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.kind == kind && sub.since <= seq)
            .map(|sub| (sub.id, Rc::clone(&sub.handler)))
            .collect();
        tracing::trace!(?kind, handlers = targets.len(), "dispatch");

        for (id, handler) in targets {
            let still_subscribed = self.subscriptions.borrow().iter().any(|sub| sub.id == id);
            if !still_subscribed {
                continue;
            }
            match handler.try_borrow_mut() {
                Ok(mut handler) => (&mut *handler)(event),
                Err(_) => tracing::warn!(?kind, "handler re-entered, event skipped"),
            };
        }
    }
}
