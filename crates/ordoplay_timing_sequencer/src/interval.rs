// SPDX-License-Identifier: MIT OR Apache-2.0
//! Intervals on the timeline axis.
//!
//! Bounds carry their own include flags. A few normalizations always apply:
//! a singular interval (`low == high`) is closed on both sides and an
//! infinite bound is always closed.

use crate::error::{Result, SequencerError};
use ordoplay_timing::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Span of axis positions with per-side include flags
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub struct Interval {
    low: f64,
    high: f64,
    low_inclusive: bool,
    high_inclusive: bool,
}

/// Serialized form of [`Interval`]; a missing bound is infinite
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct IntervalRepr {
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low_inclusive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high_inclusive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    singular: Option<bool>,
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = SequencerError;

    fn try_from(repr: IntervalRepr) -> Result<Self> {
        let low = repr.low.unwrap_or(f64::NEG_INFINITY);
        let high = match (repr.high, repr.singular) {
            (None, Some(true)) => low,
            (high, _) => high.unwrap_or(f64::INFINITY),
        };
        let interval = Interval::new(
            low,
            high,
            repr.low_inclusive.unwrap_or(true),
            repr.high_inclusive.unwrap_or(false),
        )?;
        match repr.singular {
            Some(true) if !interval.is_singular() => Err(SequencerError::InvalidInterval {
                low,
                high,
                reason: "marked singular but low != high",
            }),
            Some(false) if interval.is_singular() => Err(SequencerError::InvalidInterval {
                low,
                high,
                reason: "low == high but marked not singular",
            }),
            _ => Ok(interval),
        }
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        let singular = interval.is_singular();
        Self {
            low: interval.low.is_finite().then_some(interval.low),
            high: interval.high.is_finite().then_some(interval.high),
            low_inclusive: (!singular).then_some(interval.low_inclusive),
            high_inclusive: (!singular).then_some(interval.high_inclusive),
            singular: singular.then_some(true),
        }
    }
}

impl Interval {
    /// Create an interval with explicit include flags
    pub fn new(low: f64, high: f64, low_inclusive: bool, high_inclusive: bool) -> Result<Self> {
        if low.is_nan() || high.is_nan() {
            return Err(SequencerError::InvalidInterval {
                low,
                high,
                reason: "bound is NaN",
            });
        }
        if low > high {
            return Err(SequencerError::InvalidInterval {
                low,
                high,
                reason: "low > high",
            });
        }
        if low == high && low.is_infinite() {
            return Err(SequencerError::InvalidInterval {
                low,
                high,
                reason: "singular interval at infinity",
            });
        }
        let singular = low == high;
        Ok(Self {
            low,
            high,
            low_inclusive: low_inclusive || singular || low.is_infinite(),
            high_inclusive: high_inclusive || singular || high.is_infinite(),
        })
    }

    /// `[low, high)`, the default shape of a cue interval
    pub fn from_bounds(low: f64, high: f64) -> Result<Self> {
        Self::new(low, high, true, false)
    }

    /// `[low, high]`
    pub fn closed(low: f64, high: f64) -> Result<Self> {
        Self::new(low, high, true, true)
    }

    /// `[value]`
    pub fn singular(value: f64) -> Result<Self> {
        Self::new(value, value, true, true)
    }

    /// Lower bound
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Upper bound
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Whether `low` belongs to the interval
    pub fn low_inclusive(&self) -> bool {
        self.low_inclusive
    }

    /// Whether `high` belongs to the interval
    pub fn high_inclusive(&self) -> bool {
        self.high_inclusive
    }

    /// `low == high`
    pub fn is_singular(&self) -> bool {
        self.low == self.high
    }

    /// Both bounds finite
    pub fn is_finite(&self) -> bool {
        self.low.is_finite() && self.high.is_finite()
    }

    /// `high - low`
    pub fn length(&self) -> f64 {
        self.high - self.low
    }

    /// Whether `x` lies in the interval
    pub fn covers(&self, x: f64) -> bool {
        let above_low = x > self.low || (x == self.low && self.low_inclusive);
        let below_high = x < self.high || (x == self.high && self.high_inclusive);
        above_low && below_high
    }

    /// Whether positions just past `x`, moving in `direction`, lie in the interval.
    ///
    /// With [`Direction::Still`] this is [`covers`](Self::covers). A singular
    /// interval is never covered on either side.
    pub fn covers_side(&self, x: f64, direction: Direction) -> bool {
        match direction {
            Direction::Still => self.covers(x),
            Direction::Forward => x >= self.low && x < self.high,
            Direction::Backward => x > self.low && x <= self.high,
        }
    }

    /// Whether the two intervals share at least one position
    pub fn overlaps(&self, other: &Interval) -> bool {
        let starts_before_other_ends = self.low < other.high
            || (self.low == other.high && self.low_inclusive && other.high_inclusive);
        let ends_after_other_starts = self.high > other.low
            || (self.high == other.low && self.high_inclusive && other.low_inclusive);
        starts_before_other_ends && ends_after_other_starts
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_singular() {
            return write!(f, "[{}]", self.low);
        }
        let open = if self.low_inclusive { '[' } else { '(' };
        let close = if self.high_inclusive { ']' } else { ')' };
        write!(f, "{open}{},{}{close}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let point = Interval::new(3.0, 3.0, false, false).unwrap();
        assert!(point.is_singular());
        assert!(point.low_inclusive() && point.high_inclusive());

        let open_ended = Interval::new(0.0, f64::INFINITY, false, false).unwrap();
        assert!(!open_ended.low_inclusive());
        assert!(open_ended.high_inclusive());
        assert!(!open_ended.is_finite());
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(matches!(
            Interval::from_bounds(5.0, 1.0),
            Err(SequencerError::InvalidInterval { reason: "low > high", .. })
        ));
        assert!(Interval::from_bounds(f64::NAN, 1.0).is_err());
        assert!(Interval::singular(f64::INFINITY).is_err());
    }

    #[test]
    fn test_covers_respects_flags() {
        let interval = Interval::from_bounds(0.0, 5.0).unwrap();
        assert!(interval.covers(0.0));
        assert!(interval.covers(4.999));
        assert!(!interval.covers(5.0));
        assert!(!interval.covers(-0.1));

        let open = Interval::new(0.0, 5.0, false, true).unwrap();
        assert!(!open.covers(0.0));
        assert!(open.covers(5.0));
    }

    #[test]
    fn test_covers_side() {
        let interval = Interval::from_bounds(0.0, 5.0).unwrap();
        assert!(interval.covers_side(0.0, Direction::Forward));
        assert!(!interval.covers_side(0.0, Direction::Backward));
        assert!(interval.covers_side(5.0, Direction::Backward));
        assert!(!interval.covers_side(5.0, Direction::Forward));

        let open = Interval::new(0.0, 5.0, false, false).unwrap();
        assert!(open.covers_side(0.0, Direction::Forward));
        assert!(!open.covers(0.0));

        let point = Interval::singular(2.0).unwrap();
        assert!(point.covers_side(2.0, Direction::Still));
        assert!(!point.covers_side(2.0, Direction::Forward));
        assert!(!point.covers_side(2.0, Direction::Backward));
    }

    #[test]
    fn test_overlaps() {
        let a = Interval::from_bounds(0.0, 5.0).unwrap();
        let b = Interval::from_bounds(5.0, 10.0).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));

        let c = Interval::closed(0.0, 5.0).unwrap();
        assert!(c.overlaps(&b));
        assert!(b.overlaps(&c));

        let inner = Interval::closed(2.0, 3.0).unwrap();
        assert!(a.overlaps(&inner));
        assert!(inner.overlaps(&a));
        assert!(a.overlaps(&Interval::singular(0.0).unwrap()));
        assert!(!a.overlaps(&Interval::singular(5.0).unwrap()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Interval::from_bounds(0.0, 5.0).unwrap().to_string(), "[0,5)");
        assert_eq!(Interval::new(0.0, 5.0, false, true).unwrap().to_string(), "(0,5]");
        assert_eq!(Interval::singular(3.0).unwrap().to_string(), "[3]");
    }

    #[test]
    fn test_json_form() {
        let interval: Interval = serde_json::from_str(r#"{"low": 1.0, "high": 4.0}"#).unwrap();
        assert_eq!(interval, Interval::from_bounds(1.0, 4.0).unwrap());

        let point: Interval = serde_json::from_str(r#"{"low": 2.0, "singular": true}"#).unwrap();
        assert_eq!(point, Interval::singular(2.0).unwrap());

        let unbounded: Interval = serde_json::from_str(r#"{"low": 1.0}"#).unwrap();
        assert_eq!(unbounded.high(), f64::INFINITY);

        let text = serde_json::to_string(&point).unwrap();
        let back: Interval = serde_json::from_str(&text).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_singular_flag_is_checked() {
        assert!(serde_json::from_str::<Interval>(r#"{"low": 1.0, "high": 4.0, "singular": true}"#).is_err());
        assert!(serde_json::from_str::<Interval>(r#"{"low": 1.0, "high": 1.0, "singular": false}"#).is_err());
        assert!(serde_json::from_str::<Interval>(r#"{"low": 4.0, "high": 1.0}"#).is_err());
    }
}
