// SPDX-License-Identifier: MIT OR Apache-2.0
//! Callbacks in position space.
//!
//! [`PointCallback`] runs once, when the motion of a source first reaches or
//! passes a position. [`IntervalCallback`] runs every time the motion reaches
//! a position `offset + k * stride`. Both predict the next crossing from the
//! current vector and arm a single [`Timeout`], so nothing polls while the
//! motion is steady. A new vector from the source re-arms them.
//!
//! A tangential touch (the motion reaches the position and turns back) is not
//! a crossing, the same rule the sequencer applies to cue bounds.

use crate::error::{Result, TimingError};
use crate::motion::{time_to_position, Vector, EPSILON};
use crate::notifier::SubscriptionId;
use crate::scheduler::Timeout;
use crate::source::{TimingEvent, TimingEventKind, TimingSource};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type PositionHandler = RefCell<Box<dyn FnMut(f64)>>;

/// Which side of a position the motion is on, looking a moment ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Below,
    Above,
}

fn side(vector: &Vector, point: f64) -> Option<Side> {
    let delta = vector.position - point;
    let sign = if delta.abs() > EPSILON {
        delta
    } else if vector.velocity.abs() > EPSILON {
        vector.velocity
    } else {
        vector.acceleration
    };
    if sign > EPSILON {
        Some(Side::Above)
    } else if sign < -EPSILON {
        Some(Side::Below)
    } else {
        None
    }
}

fn subscribe<T: 'static>(
    source: &dyn TimingSource,
    weak: Weak<T>,
    on_change: fn(&Rc<T>),
) -> SubscriptionId {
    source.on(
        TimingEventKind::Change,
        Box::new(move |event: &TimingEvent| {
            if let (Some(inner), TimingEvent::Change(_)) = (weak.upgrade(), event) {
                on_change(&inner);
            }
        }),
    )
}

struct PointInner {
    source: Rc<dyn TimingSource>,
    point: f64,
    handler: PositionHandler,
    timeout: Timeout,
    side: Cell<Option<Side>>,
    subscription: Cell<Option<SubscriptionId>>,
    done: Cell<bool>,
}

impl PointInner {
    fn on_change(self: &Rc<Self>) {
        self.timeout.clear();
        if self.done.get() {
            return;
        }
        let Ok(vector) = self.source.query() else {
            return;
        };
        let current = side(&vector, self.point);
        match self.side.get() {
            None => {
                // paused exactly on the point: wait for the next change
                if current.is_none() {
                    return;
                }
                self.side.set(current);
            }
            Some(side) if current != Some(side) => {
                self.finish(Some(vector.position));
                return;
            }
            Some(_) => {}
        }

        if let Some(dt) = time_to_position(&vector, self.point) {
            let weak = Rc::downgrade(self);
            self.timeout.set(vector.timestamp + dt, move || {
                if let Some(inner) = weak.upgrade() {
                    let point = inner.point;
                    inner.finish(Some(point));
                }
            });
        }
    }

    fn finish(&self, position: Option<f64>) {
        if self.done.replace(true) {
            return;
        }
        self.timeout.clear();
        if let Some(id) = self.subscription.take() {
            self.source.off(id);
        }
        if let Some(position) = position {
            tracing::debug!(point = self.point, position, "point callback");
            (self.handler.borrow_mut())(position);
        }
    }
}

impl Drop for PointInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.source.off(id);
        }
    }
}

/// Runs a handler once, the first time the motion reaches or passes a position.
///
/// The handler receives the position at which it fired: the point itself when
/// the motion runs into it, or the new position when an update jumps across
/// it. A source paused exactly on the point waits for its next change to
/// decide which side it is on. Dropping the callback cancels it.
pub struct PointCallback {
    inner: Rc<PointInner>,
}

impl PointCallback {
    /// Watch `source` for the motion reaching `point`
    pub fn new(source: Rc<dyn TimingSource>, point: f64, handler: impl FnMut(f64) + 'static) -> Self {
        let scheduler = source.scheduler();
        let inner = Rc::new(PointInner {
            source,
            point,
            handler: RefCell::new(Box::new(handler)),
            timeout: Timeout::new(scheduler),
            side: Cell::new(None),
            subscription: Cell::new(None),
            done: Cell::new(false),
        });
        let id = subscribe(inner.source.as_ref(), Rc::downgrade(&inner), PointInner::on_change);
        if inner.done.get() {
            inner.source.off(id);
        } else {
            inner.subscription.set(Some(id));
        }
        Self { inner }
    }

    /// The watched position
    pub fn point(&self) -> f64 {
        self.inner.point
    }

    /// Whether the handler ran or the callback was cancelled
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }

    /// Whether a crossing is predicted
    pub fn is_scheduled(&self) -> bool {
        self.inner.timeout.is_set()
    }

    /// Stop watching without running the handler
    pub fn cancel(&self) {
        self.inner.finish(None);
    }
}

struct IntervalInner {
    source: Rc<dyn TimingSource>,
    stride: f64,
    offset: f64,
    handler: PositionHandler,
    timeout: Timeout,
    subscription: Cell<Option<SubscriptionId>>,
    cancelled: Cell<bool>,
}

impl IntervalInner {
    /// Neighboring points below and above `position`, and the point
    /// `position` sits on, if any
    fn neighbors(&self, position: f64) -> (f64, Option<f64>, f64) {
        let steps = (position - self.offset) / self.stride;
        let nearest = steps.round();
        let on = self.offset + nearest * self.stride;
        if (on - position).abs() <= EPSILON {
            let below = self.offset + (nearest - 1.0) * self.stride;
            let above = self.offset + (nearest + 1.0) * self.stride;
            (below, Some(on), above)
        } else {
            let below = steps.floor();
            (
                self.offset + below * self.stride,
                None,
                self.offset + (below + 1.0) * self.stride,
            )
        }
    }

    fn on_change(this: &Rc<Self>) {
        let Ok(vector) = this.source.query() else {
            this.timeout.clear();
            return;
        };
        this.renew(vector.position);
    }

    fn renew(self: &Rc<Self>, position: f64) {
        self.timeout.clear();
        if self.cancelled.get() {
            return;
        }
        let (below, on, above) = self.neighbors(position);
        if let Some(point) = on {
            tracing::trace!(point, "interval callback");
            // a handler that moves the source synchronously lands here again
            if let Ok(mut handler) = self.handler.try_borrow_mut() {
                handler(point);
            }
            if self.cancelled.get() {
                return;
            }
        }

        let Ok(vector) = self.source.query() else {
            return;
        };
        let range = self.source.range();
        let next = [below, above]
            .into_iter()
            .filter(|target| range.contains(*target))
            .filter_map(|target| time_to_position(&vector, target).map(|dt| (dt, target)))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((dt, target)) = next {
            let weak = Rc::downgrade(self);
            self.timeout.set(vector.timestamp + dt, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.renew(target);
                }
            });
        }
    }
}

impl Drop for IntervalInner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.source.off(id);
        }
    }
}

/// Runs a handler every time the motion reaches `offset + k * stride`, for
/// any integer `k` inside the source range.
///
/// The handler receives the point reached. It also runs when an update lands
/// exactly on a point, so pausing on a point and resuming from it reports
/// the point twice. Dropping the callback cancels it.
pub struct IntervalCallback {
    inner: Rc<IntervalInner>,
}

impl IntervalCallback {
    /// Watch `source` for every multiple of `stride` from `offset`
    pub fn new(
        source: Rc<dyn TimingSource>,
        stride: f64,
        offset: f64,
        handler: impl FnMut(f64) + 'static,
    ) -> Result<Self> {
        if !stride.is_finite() || stride <= 0.0 {
            return Err(TimingError::InvalidParameter(format!(
                "stride must be positive and finite, got {stride}"
            )));
        }
        if !offset.is_finite() {
            return Err(TimingError::InvalidParameter(format!("offset must be finite, got {offset}")));
        }
        let scheduler = source.scheduler();
        let inner = Rc::new(IntervalInner {
            source,
            stride,
            offset,
            handler: RefCell::new(Box::new(handler)),
            timeout: Timeout::new(scheduler),
            subscription: Cell::new(None),
            cancelled: Cell::new(false),
        });
        let id = subscribe(inner.source.as_ref(), Rc::downgrade(&inner), IntervalInner::on_change);
        inner.subscription.set(Some(id));
        Ok(Self { inner })
    }

    /// Distance between points
    pub fn stride(&self) -> f64 {
        self.inner.stride
    }

    /// Position of point zero
    pub fn offset(&self) -> f64 {
        self.inner.offset
    }

    /// Whether the next point is predicted
    pub fn is_scheduled(&self) -> bool {
        self.inner.timeout.is_set()
    }

    /// Stop watching
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
        self.inner.timeout.clear();
        if let Some(id) = self.inner.subscription.take() {
            self.inner.source.off(id);
        }
    }
}
