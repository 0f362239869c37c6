// SPDX-License-Identifier: MIT OR Apache-2.0
//! Delayed replay of source vectors.

use super::{ConverterInner, ConverterKind, Delayed, KindState};
use crate::motion::Vector;
use crate::source::ChangeInfo;
use crate::state::Incoming;
use std::rc::Rc;

pub(super) fn on_source_change(inner: &Rc<ConverterInner>, info: &ChangeInfo) {
    let ConverterKind::Delay(delay) = inner.kind else {
        return;
    };
    let delayed = Delayed {
        vector: Vector {
            timestamp: info.vector.timestamp + delay,
            ..info.vector
        },
        update_id: info.update_id,
    };

    // the state the source had before this converter existed is shown at once
    if !info.live || inner.core.vector().is_none() {
        inner.core.process(Incoming::vector(delayed.vector, delayed.update_id));
        return;
    }
    if let KindState::Delay(buffer) = &mut *inner.state.borrow_mut() {
        buffer.push_back(delayed);
    }
    schedule_next(inner);
}

fn schedule_next(inner: &Rc<ConverterInner>) {
    let next_due = match &*inner.state.borrow() {
        KindState::Delay(buffer) => buffer.front().map(|next| next.vector.timestamp),
        _ => None,
    };
    let Some(due) = next_due else {
        return;
    };
    if inner.watch.is_set() {
        return;
    }
    let weak = Rc::downgrade(inner);
    inner.watch.set(due, move || {
        if let Some(inner) = weak.upgrade() {
            release_due(&inner);
        }
    });
}

fn release_due(inner: &Rc<ConverterInner>) {
    let now = inner.scheduler().now();
    let due: Vec<Delayed> = match &mut *inner.state.borrow_mut() {
        KindState::Delay(buffer) => {
            let count = buffer
                .iter()
                .take_while(|next| next.vector.timestamp <= now)
                .count();
            buffer.drain(..count).collect()
        }
        _ => Vec::new(),
    };
    for delayed in due {
        tracing::trace!(vector = %delayed.vector, "delayed vector due");
        inner.core.process(Incoming::vector(delayed.vector, delayed.update_id));
    }
    schedule_next(inner);
}
