// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-threaded task scheduler and one-shot timeouts.
//!
//! Every wake-up in the crate (range clamps, periodic `timeupdate`, provider
//! round trips, sequencer crossings) is a task on a [`Scheduler`]. The host
//! drives the scheduler with [`Scheduler::poll`] from its own loop, or with
//! [`Scheduler::advance_to`] when time is simulated with a [`ManualClock`].

use crate::clock::{Clock, ManualClock};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type Task = Box<dyn FnOnce()>;

/// Heap entry, ordered so that the earliest (then oldest) entry is on top
#[derive(Debug, Clone, Copy)]
struct Entry {
    at: f64,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    tasks: HashMap<u64, Task>,
    next_seq: u64,
}

impl Queue {
    /// Drop cancelled entries from the top of the heap
    fn prune(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.tasks.contains_key(&top.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Cooperative scheduler over a clock.
///
/// Clones share the same task queue.
#[derive(Clone)]
pub struct Scheduler {
    clock: Rc<dyn Clock>,
    manual: Option<ManualClock>,
    queue: Rc<RefCell<Queue>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("manual", &self.manual.is_some())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler over any clock
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            manual: None,
            queue: Rc::new(RefCell::new(Queue::default())),
        }
    }

    /// Create a scheduler over a manual clock, enabling [`Scheduler::advance_to`]
    pub fn manual(clock: ManualClock) -> Self {
        Self {
            clock: Rc::new(clock.clone()),
            manual: Some(clock),
            queue: Rc::new(RefCell::new(Queue::default())),
        }
    }

    /// Current time of the underlying clock
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// The shared clock
    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    /// Schedule `task` to run once the clock reaches `at`
    pub fn schedule_at(&self, at: f64, task: impl FnOnce() + 'static) -> TimerId {
        let mut queue = self.queue.borrow_mut();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry { at, seq });
        queue.tasks.insert(seq, Box::new(task));
        TimerId(seq)
    }

    /// Schedule `task` to run `delay` seconds from now
    pub fn schedule_after(&self, delay: f64, task: impl FnOnce() + 'static) -> TimerId {
        self.schedule_at(self.now() + delay.max(0.0), task)
    }

    /// Run `task` on the next poll
    pub fn defer(&self, task: impl FnOnce() + 'static) -> TimerId {
        self.schedule_at(self.now(), task)
    }

    /// Cancel a scheduled task. Returns false if it already ran or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        self.queue.borrow_mut().tasks.remove(&id.0).is_some()
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Time of the earliest pending task
    pub fn next_due(&self) -> Option<f64> {
        let mut queue = self.queue.borrow_mut();
        queue.prune();
        queue.heap.peek().map(|entry| entry.at)
    }

    /// Run every task that is due, in time order.
    ///
    /// Tasks scheduled while polling run in the same poll if they are due.
    /// Returns the number of tasks run.
    pub fn poll(&self) -> usize {
        let mut fired = 0;
        while let Some(task) = self.pop_due(self.now()) {
            task();
            fired += 1;
        }
        fired
    }

    /// Advance a manual clock to `t`, stepping through every due task on the way.
    ///
    /// Each task observes the clock at its own scheduled time. Without a manual
    /// clock this is a plain [`Scheduler::poll`].
    pub fn advance_to(&self, t: f64) -> usize {
        let Some(manual) = &self.manual else {
            tracing::warn!("advance_to({t}) on a scheduler without a manual clock");
            return self.poll();
        };

        let mut fired = 0;
        while let Some(at) = self.next_due() {
            if at > t {
                break;
            }
            if at > manual.now() {
                manual.set(at);
            }
            fired += self.poll();
        }
        if t > manual.now() {
            manual.set(t);
        }
        fired + self.poll()
    }

    /// Advance a manual clock by `delta` seconds
    pub fn advance_by(&self, delta: f64) -> usize {
        self.advance_to(self.now() + delta)
    }

    fn pop_due(&self, now: f64) -> Option<Task> {
        let mut queue = self.queue.borrow_mut();
        queue.prune();
        let top = *queue.heap.peek()?;
        if top.at > now {
            return None;
        }
        queue.heap.pop();
        queue.tasks.remove(&top.seq)
    }
}

#[derive(Debug, Default)]
struct TimeoutState {
    pending: Option<TimerId>,
    generation: u64,
}

/// At most one pending wake-up.
///
/// Setting a new wake-up always cancels the previous one, and a wake-up that
/// was replaced never runs its task.
#[derive(Debug)]
pub struct Timeout {
    scheduler: Scheduler,
    state: Rc<RefCell<TimeoutState>>,
}

impl Timeout {
    /// Create an idle timeout on `scheduler`
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            state: Rc::new(RefCell::new(TimeoutState::default())),
        }
    }

    /// Replace any pending wake-up with `task` at time `at`
    pub fn set(&self, at: f64, task: impl FnOnce() + 'static) {
        self.clear();
        let generation = self.state.borrow().generation;
        let state = Rc::clone(&self.state);
        let id = self.scheduler.schedule_at(at, move || {
            let live = {
                let mut state = state.borrow_mut();
                if state.generation == generation {
                    state.pending = None;
                    true
                } else {
                    false
                }
            };
            if live {
                task();
            }
        });
        self.state.borrow_mut().pending = Some(id);
    }

    /// Cancel the pending wake-up, if any
    pub fn clear(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.pending.take()
        };
        if let Some(id) = pending {
            self.scheduler.cancel(id);
        }
    }

    /// Whether a wake-up is pending
    pub fn is_set(&self) -> bool {
        self.state.borrow().pending.is_some()
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        self.clear();
    }
}
