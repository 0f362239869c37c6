// SPDX-License-Identifier: MIT OR Apache-2.0
//! Speculative local updates.
//!
//! An update is applied to the converter at once and forwarded to the source
//! on the next scheduler poll. Until the source confirms it (a change carrying
//! the same update ID) other source changes are held back. If no confirmation
//! arrives within `local_timeout`, or forwarding fails, the converter falls
//! back to the source vector.

use super::{ConverterInner, KindState};
use crate::error::{Result, TimingError};
use crate::motion::{check_range, PartialVector, Vector};
use crate::source::{ChangeInfo, UpdateId};
use crate::state::Incoming;
use std::rc::Rc;

fn pending(inner: &ConverterInner) -> Option<UpdateId> {
    match &*inner.state.borrow() {
        KindState::Local(pending) => *pending,
        _ => None,
    }
}

fn set_pending(inner: &ConverterInner, update_id: Option<UpdateId>) {
    if let KindState::Local(pending) = &mut *inner.state.borrow_mut() {
        *pending = update_id;
    }
}

pub(super) fn update(
    inner: &Rc<ConverterInner>,
    current: Vector,
    update: PartialVector,
) -> Result<Vector> {
    if inner.source.read_only() {
        return Err(TimingError::IllegalUpdate("local converter source is read-only"));
    }
    let now = inner.scheduler().now();
    let ts = update.timestamp.unwrap_or(now);
    let vector = check_range(&update.merge(&current.extrapolate(ts)), &inner.core.range());
    let update_id = update.update_id.unwrap_or_default();

    set_pending(inner, Some(update_id));
    inner.core.process(Incoming::vector(vector, Some(update_id)));

    let forward = PartialVector {
        update_id: Some(update_id),
        ..PartialVector::from_vector(&vector)
    };
    let weak = Rc::downgrade(inner);
    inner.scheduler().defer(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Err(err) = inner.source.update(forward) {
            tracing::warn!(%update_id, %err, "local update rejected by source");
            revert(&inner, update_id);
        }
    });

    let weak = Rc::downgrade(inner);
    inner.watch.set(now + inner.core.config().local_timeout, move || {
        if let Some(inner) = weak.upgrade() {
            tracing::warn!(%update_id, "local update not confirmed in time");
            revert(&inner, update_id);
        }
    });
    Ok(vector)
}

pub(super) fn on_source_change(inner: &Rc<ConverterInner>, info: &ChangeInfo) {
    match pending(inner) {
        None => inner.core.process(Incoming::vector(info.vector, info.update_id)),
        Some(id) if info.update_id == Some(id) => {
            set_pending(inner, None);
            inner.watch.clear();
            let speculative = inner.core.vector();
            if speculative.map_or(true, |vector| !vector.same_motion(&info.vector)) {
                inner.core.process(Incoming::vector(info.vector, info.update_id));
            } else {
                tracing::trace!(%id, "local update confirmed");
            }
        }
        Some(id) => {
            tracing::trace!(%id, "source change held back while local update is pending");
        }
    }
}

fn revert(inner: &Rc<ConverterInner>, update_id: UpdateId) {
    if pending(inner) != Some(update_id) {
        return;
    }
    set_pending(inner, None);
    inner.watch.clear();
    let Some(vector) = inner.source.vector() else {
        return;
    };
    let unchanged = inner.core.vector().is_some_and(|current| current.same_motion(&vector));
    if !unchanged {
        inner.core.process(Incoming::vector(vector, None));
    }
}
