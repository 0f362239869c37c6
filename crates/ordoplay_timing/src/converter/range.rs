// SPDX-License-Identifier: MIT OR Apache-2.0
//! Range clamp evaluation.
//!
//! The clamped view follows the source while the source is inside the range
//! and rests on the nearest bound while it is outside. The source itself is
//! never clamped, so the view has to be re-evaluated whenever the source
//! motion crosses a bound, in either direction.

use super::{mapping, ConverterInner, ConverterKind, KindState};
use crate::motion::{check_range, range_state, time_to_range_boundary, RangeState};
use crate::source::UpdateId;
use crate::state::Incoming;
use std::rc::Rc;

pub(super) fn evaluate(inner: &Rc<ConverterInner>, update_id: Option<UpdateId>) {
    let ConverterKind::RangeClamp(limit) = inner.kind else {
        return;
    };
    let reference = inner.reference.as_ref().unwrap_or(&inner.source).range();
    let range = mapping::effective_range(limit.as_ref(), &reference);

    let Some(source) = inner.source.vector() else {
        inner.core.process(Incoming::range(range));
        return;
    };
    let now = inner.scheduler().now();
    let current = source.extrapolate(now);
    let side = range_state(&current, &range);

    let previous = match &mut *inner.state.borrow_mut() {
        KindState::Clamp(last) => last.replace(side),
        _ => None,
    };
    let view = match side {
        RangeState::Inside => source,
        RangeState::OutsideLow | RangeState::OutsideHigh => check_range(&current, &range),
    };
    let clamped_moved = inner
        .core
        .vector()
        .map_or(true, |last| !last.same_motion(&view));

    let redundant = previous == Some(side)
        && !clamped_moved
        && (side != RangeState::Inside || update_id.is_none());
    if redundant {
        tracing::trace!(?side, "clamp view unchanged");
        inner.core.process(Incoming::range(range));
    } else {
        if previous.is_some() && previous != Some(side) {
            tracing::debug!(from = ?previous, to = ?side, "clamp range crossing");
        }
        inner.core.process(Incoming {
            vector: Some(view),
            range: Some(range),
            update_id,
        });
    }

    match time_to_range_boundary(&current, &range) {
        Some((dt, bound)) => {
            let weak = Rc::downgrade(inner);
            tracing::trace!(at = now + dt, bound, "clamp watch");
            inner.watch.set(now + dt, move || {
                if let Some(inner) = weak.upgrade() {
                    evaluate(&inner, None);
                }
            });
        }
        None => inner.watch.clear(),
    }
}
