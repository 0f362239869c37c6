// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stateless coordinate mappings between a converter and its source.

use super::ConverterKind;
use crate::error::{Result, TimingError};
use crate::motion::{Range, Vector};

/// Map a source vector into the converter's coordinates
pub(crate) fn to_view(kind: &ConverterKind, source: &Vector) -> Vector {
    match kind {
        ConverterKind::Skew(offset) | ConverterKind::PositionShift(offset) => Vector {
            position: source.position + offset,
            ..*source
        },
        ConverterKind::Scale(factor) => Vector {
            position: source.position * factor,
            velocity: source.velocity * factor,
            acceleration: source.acceleration * factor,
            timestamp: source.timestamp,
        },
        ConverterKind::TimeShift(offset) => Vector {
            timestamp: source.timestamp,
            ..source.extrapolate(source.timestamp + offset)
        },
        ConverterKind::Loop(range) => Vector {
            position: range.wrap(source.position),
            ..*source
        },
        ConverterKind::Derivative => Vector {
            position: source.velocity,
            velocity: source.acceleration,
            acceleration: 0.0,
            timestamp: source.timestamp,
        },
        ConverterKind::Delay(_) | ConverterKind::RangeClamp(_) | ConverterKind::Local => *source,
    }
}

/// Map a vector in the converter's coordinates back to the source.
///
/// `source` is the source vector evaluated at `view.timestamp`, needed by
/// mappings that are not one-to-one.
pub(crate) fn to_source(kind: &ConverterKind, view: &Vector, source: Option<&Vector>) -> Result<Vector> {
    Ok(match kind {
        ConverterKind::Skew(offset) | ConverterKind::PositionShift(offset) => Vector {
            position: view.position - offset,
            ..*view
        },
        ConverterKind::Scale(factor) => Vector {
            position: view.position / factor,
            velocity: view.velocity / factor,
            acceleration: view.acceleration / factor,
            timestamp: view.timestamp,
        },
        ConverterKind::TimeShift(offset) => Vector {
            timestamp: view.timestamp,
            ..view.extrapolate(view.timestamp - offset)
        },
        ConverterKind::Loop(range) => {
            let phase = range.wrap(view.position) - range.low();
            let position = match source {
                Some(source) => {
                    let cycle_start = source.position - (range.wrap(source.position) - range.low());
                    cycle_start + phase
                }
                None => range.low() + phase,
            };
            Vector { position, ..*view }
        }
        ConverterKind::Delay(_) => return Err(TimingError::IllegalUpdate("delay converter is read-only")),
        ConverterKind::Derivative => {
            return Err(TimingError::IllegalUpdate("derivative converter is read-only"))
        }
        ConverterKind::RangeClamp(_) | ConverterKind::Local => *view,
    })
}

/// Range of the converter given the range of its source
pub(crate) fn view_range(kind: &ConverterKind, source: &Range) -> Range {
    match kind {
        ConverterKind::Skew(offset) | ConverterKind::PositionShift(offset) => source.shifted(*offset),
        ConverterKind::Scale(factor) => source.scaled(*factor),
        ConverterKind::TimeShift(_) | ConverterKind::Derivative => Range::infinite(),
        ConverterKind::Loop(range) => *range,
        ConverterKind::RangeClamp(limit) => effective_range(limit.as_ref(), source),
        ConverterKind::Delay(_) | ConverterKind::Local => *source,
    }
}

/// Clamp range: the limit narrowed to the reference range
pub(crate) fn effective_range(limit: Option<&Range>, reference: &Range) -> Range {
    match limit {
        Some(limit) => limit.intersect(reference).unwrap_or(*limit),
        None => *reference,
    }
}
