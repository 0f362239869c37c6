// SPDX-License-Identifier: MIT OR Apache-2.0
//! Motion model.
//!
//! A [`Vector`] describes quadratic motion sampled at a timestamp:
//! `p(t) = p + v·Δt + ½·a·Δt²`. Everything here is pure: extrapolation,
//! root finding for "when will the position reach x", and range checks.
//!
//! ## Numeric policy
//!
//! All tolerance checks use [`EPSILON`]: near-zero velocity, acceleration and
//! discriminants, near-boundary positions, and the minimum positive time delta
//! that counts as a future event.

use crate::error::{Result, TimingError};
use crate::source::UpdateId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance used by every motion comparison
pub const EPSILON: f64 = 1e-9;

/// Position, velocity and acceleration sampled at a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    /// Position
    pub position: f64,
    /// Velocity (position units per second)
    pub velocity: f64,
    /// Acceleration (position units per second²)
    pub acceleration: f64,
    /// Sample time in seconds
    #[serde(default)]
    pub timestamp: f64,
}

impl Vector {
    /// Create a new vector
    pub fn new(position: f64, velocity: f64, acceleration: f64, timestamp: f64) -> Self {
        Self {
            position,
            velocity,
            acceleration,
            timestamp,
        }
    }

    /// A vector at rest
    pub fn at_rest(position: f64, timestamp: f64) -> Self {
        Self::new(position, 0.0, 0.0, timestamp)
    }

    /// Evaluate the motion at time `ts`
    pub fn extrapolate(&self, ts: f64) -> Vector {
        extrapolate(self, ts)
    }

    /// Whether velocity or acceleration is non-zero
    pub fn is_moving(&self) -> bool {
        self.velocity.abs() > EPSILON || self.acceleration.abs() > EPSILON
    }

    /// Current direction of motion
    pub fn direction(&self) -> Direction {
        direction(self)
    }

    /// Compare position, velocity and acceleration within [`EPSILON`]
    pub fn same_motion(&self, other: &Vector) -> bool {
        let other = other.extrapolate(self.timestamp);
        (self.position - other.position).abs() <= EPSILON
            && (self.velocity - other.velocity).abs() <= EPSILON
            && (self.acceleration - other.acceleration).abs() <= EPSILON
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(p={:.6}, v={:.6}, a={:.6} @ {:.6})",
            self.position, self.velocity, self.acceleration, self.timestamp
        )
    }
}

/// Evaluate `vector` at time `ts`
pub fn extrapolate(vector: &Vector, ts: f64) -> Vector {
    let dt = ts - vector.timestamp;
    Vector {
        position: vector.position + vector.velocity * dt + 0.5 * vector.acceleration * dt * dt,
        velocity: vector.velocity + vector.acceleration * dt,
        acceleration: vector.acceleration,
        timestamp: ts,
    }
}

/// Update payload: fields left out keep their current value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialVector {
    /// New position
    pub position: Option<f64>,
    /// New velocity
    pub velocity: Option<f64>,
    /// New acceleration
    pub acceleration: Option<f64>,
    /// Time at which the update applies (defaults to now)
    pub timestamp: Option<f64>,
    /// Correlation id; assigned by the timing object when missing
    #[serde(skip)]
    pub update_id: Option<UpdateId>,
}

impl PartialVector {
    /// Update only the position
    pub fn position(position: f64) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    /// Update only the velocity
    pub fn velocity(velocity: f64) -> Self {
        Self {
            velocity: Some(velocity),
            ..Self::default()
        }
    }

    /// Update every motion field
    pub fn motion(position: f64, velocity: f64, acceleration: f64) -> Self {
        Self {
            position: Some(position),
            velocity: Some(velocity),
            acceleration: Some(acceleration),
            ..Self::default()
        }
    }

    /// Set the velocity
    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Set the acceleration
    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Full vector from an update that sets every field
    pub fn from_vector(vector: &Vector) -> Self {
        Self {
            position: Some(vector.position),
            velocity: Some(vector.velocity),
            acceleration: Some(vector.acceleration),
            timestamp: Some(vector.timestamp),
            update_id: None,
        }
    }

    /// Merge over `base`, which must already be evaluated at the update time
    pub fn merge(&self, base: &Vector) -> Vector {
        Vector {
            position: self.position.unwrap_or(base.position),
            velocity: self.velocity.unwrap_or(base.velocity),
            acceleration: self.acceleration.unwrap_or(base.acceleration),
            timestamp: base.timestamp,
        }
    }

    /// True if no motion field is set
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.velocity.is_none() && self.acceleration.is_none()
    }
}

/// Allowed positions `[low, high]`; bounds may be infinite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "RangeRepr")]
pub struct Range {
    low: f64,
    high: f64,
}

/// Serialized form of [`Range`]; a missing bound is infinite
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RangeRepr {
    #[serde(default)]
    low: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
}

impl TryFrom<RangeRepr> for Range {
    type Error = TimingError;

    fn try_from(repr: RangeRepr) -> Result<Self> {
        Range::new(
            repr.low.unwrap_or(f64::NEG_INFINITY),
            repr.high.unwrap_or(f64::INFINITY),
        )
    }
}

impl From<Range> for RangeRepr {
    fn from(range: Range) -> Self {
        Self {
            low: range.low.is_finite().then_some(range.low),
            high: range.high.is_finite().then_some(range.high),
        }
    }
}

impl Range {
    /// Create a range, rejecting inverted or NaN bounds
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if low.is_nan() || high.is_nan() || low > high {
            return Err(TimingError::InvalidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// The unbounded range
    pub const fn infinite() -> Self {
        Self {
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
        }
    }

    /// Low bound
    pub fn low(&self) -> f64 {
        self.low
    }

    /// High bound
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Distance between the bounds
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    /// Whether both bounds are finite
    pub fn is_finite(&self) -> bool {
        self.low.is_finite() && self.high.is_finite()
    }

    /// Whether `position` lies within the bounds
    pub fn contains(&self, position: f64) -> bool {
        self.low <= position && position <= self.high
    }

    /// Nearest position within the bounds
    pub fn clamp(&self, position: f64) -> f64 {
        position.max(self.low).min(self.high)
    }

    /// Both bounds moved by `offset`; infinite bounds stay put
    pub fn shifted(&self, offset: f64) -> Range {
        Range {
            low: self.low + offset,
            high: self.high + offset,
        }
    }

    /// Both bounds multiplied by `factor`, reordered when the factor is negative
    pub fn scaled(&self, factor: f64) -> Range {
        let a = self.low * factor;
        let b = self.high * factor;
        Range {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// `position` folded into `[low, high)`; unbounded or empty ranges leave it unchanged
    pub fn wrap(&self, position: f64) -> f64 {
        if !self.is_finite() || self.width() <= 0.0 {
            return position;
        }
        self.low + (position - self.low).rem_euclid(self.width())
    }

    /// Overlap of two ranges
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let low = self.low.max(other.low);
        let high = self.high.min(other.high);
        (low <= high).then_some(Range { low, high })
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::infinite()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// Direction of motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Position decreasing
    Backward,
    /// No motion
    Still,
    /// Position increasing
    Forward,
}

impl Direction {
    /// -1, 0 or 1
    pub fn signum(self) -> f64 {
        match self {
            Self::Backward => -1.0,
            Self::Still => 0.0,
            Self::Forward => 1.0,
        }
    }
}

/// Direction from velocity, or from acceleration when velocity is zero
pub fn direction(vector: &Vector) -> Direction {
    let sign = if vector.velocity.abs() > EPSILON {
        vector.velocity
    } else if vector.acceleration.abs() > EPSILON {
        vector.acceleration
    } else {
        0.0
    };
    if sign > 0.0 {
        Direction::Forward
    } else if sign < 0.0 {
        Direction::Backward
    } else {
        Direction::Still
    }
}

/// Position of a vector relative to a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeState {
    /// Within the range, or on a bound and not moving out
    Inside,
    /// Below the range, or on the low bound moving down
    OutsideLow,
    /// Above the range, or on the high bound moving up
    OutsideHigh,
}

/// Classify a snapshot vector against a range
pub fn range_state(vector: &Vector, range: &Range) -> RangeState {
    let p = vector.position;
    if p > range.high + EPSILON {
        return RangeState::OutsideHigh;
    }
    if p < range.low - EPSILON {
        return RangeState::OutsideLow;
    }
    match direction(vector) {
        Direction::Forward if (p - range.high).abs() <= EPSILON => RangeState::OutsideHigh,
        Direction::Backward if (p - range.low).abs() <= EPSILON => RangeState::OutsideLow,
        _ => RangeState::Inside,
    }
}

/// Clamp a snapshot vector into range.
///
/// A vector outside the range, or on a bound and heading out, is moved onto
/// the nearest bound and stopped. Vectors inside are returned unchanged.
pub fn check_range(vector: &Vector, range: &Range) -> Vector {
    match range_state(vector, range) {
        RangeState::Inside => *vector,
        RangeState::OutsideLow => Vector::at_rest(range.low, vector.timestamp),
        RangeState::OutsideHigh => Vector::at_rest(range.high, vector.timestamp),
    }
}

/// Real solutions Δt of `p + v·Δt + ½·a·Δt² = x`, ascending.
///
/// A double root is returned once.
pub fn real_solutions(p: f64, v: f64, a: f64, x: f64) -> Vec<f64> {
    if a.abs() <= EPSILON {
        if v.abs() <= EPSILON {
            return if (p - x).abs() <= EPSILON { vec![0.0] } else { Vec::new() };
        }
        return vec![(x - p) / v];
    }
    let discriminant = v * v - 2.0 * a * (p - x);
    let tolerance = EPSILON * v.abs().max(1.0);
    if discriminant < -tolerance {
        return Vec::new();
    }
    if discriminant <= tolerance {
        return vec![-v / a];
    }
    let root = discriminant.sqrt();
    let d1 = (-v + root) / a;
    let d2 = (-v - root) / a;
    vec![d1.min(d2), d1.max(d2)]
}

/// Smallest Δt > [`EPSILON`] at which the motion crosses `target`.
///
/// A double root is a tangential touch (the position reaches `target` and
/// turns back) and does not count as a crossing.
pub fn time_to_position(vector: &Vector, target: f64) -> Option<f64> {
    let (p, v, a) = (vector.position, vector.velocity, vector.acceleration);
    let solutions = real_solutions(p, v, a, target);
    if a.abs() > EPSILON && solutions.len() == 1 {
        return None;
    }
    solutions.into_iter().find(|dt| *dt > EPSILON)
}

/// Earliest Δt at which the motion reaches either bound, with the bound reached
pub fn time_to_range_boundary(vector: &Vector, range: &Range) -> Option<(f64, f64)> {
    [range.low(), range.high()]
        .into_iter()
        .filter(|bound| bound.is_finite())
        .filter_map(|bound| time_to_position(vector, bound).map(|dt| (dt, bound)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Change in position between two vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosDelta {
    /// Continuous position
    Noop,
    /// Position jumped
    Change,
}

/// Change in movement between two vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDelta {
    /// Not moving before or after
    Noop,
    /// Moving the same way before and after
    NoopMoving,
    /// Not moving -> moving
    Start,
    /// Moving before and after, differently
    Change,
    /// Moving -> not moving
    Stop,
}

/// Nature of the transition from one vector to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionDelta {
    /// Position aspect
    pub position: PosDelta,
    /// Movement aspect
    pub movement: MoveDelta,
}

impl MotionDelta {
    /// Classify the switch from `old` to `new` at `new.timestamp`
    pub fn new(old: Option<&Vector>, new: &Vector) -> Self {
        let is_moving = new.is_moving();
        let Some(old) = old else {
            return Self {
                position: PosDelta::Change,
                movement: if is_moving { MoveDelta::Start } else { MoveDelta::Noop },
            };
        };

        let end = old.extrapolate(new.timestamp);
        let position = if (end.position - new.position).abs() > EPSILON {
            PosDelta::Change
        } else {
            PosDelta::Noop
        };
        let movement = match (end.is_moving(), is_moving) {
            (true, true) => {
                let changed = (end.velocity - new.velocity).abs() > EPSILON
                    || (end.acceleration - new.acceleration).abs() > EPSILON;
                if changed {
                    MoveDelta::Change
                } else {
                    MoveDelta::NoopMoving
                }
            }
            (false, true) => MoveDelta::Start,
            (true, false) => MoveDelta::Stop,
            (false, false) => MoveDelta::Noop,
        };
        Self { position, movement }
    }
}

impl fmt::Display for MotionDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.position == PosDelta::Change {
            write!(f, "jump, ")?;
        }
        let movement = match self.movement {
            MoveDelta::Start => "movement started",
            MoveDelta::Change => "movement changed",
            MoveDelta::Stop => "movement stopped",
            MoveDelta::NoopMoving => "still moving",
            MoveDelta::Noop => "still at rest",
        };
        write!(f, "{movement}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_extrapolate_quadratic() {
        let v = Vector::new(1.0, 2.0, 4.0, 10.0);
        let later = v.extrapolate(12.0);
        assert!(approx(later.position, 1.0 + 4.0 + 8.0));
        assert!(approx(later.velocity, 10.0));
        assert_eq!(later.acceleration, 4.0);
        assert_eq!(later.timestamp, 12.0);
    }

    #[test]
    fn test_extrapolation_composes() {
        let vectors = [
            Vector::new(0.0, 1.0, 0.0, 0.0),
            Vector::new(-3.0, 2.5, -0.75, 1.5),
            Vector::new(100.0, -4.0, 0.3, -2.0),
        ];
        for v in vectors {
            for (t1, t2) in [(0.5, 1.0), (2.0, 7.25), (-1.0, 3.0)] {
                let twice = v.extrapolate(t1).extrapolate(t2);
                let once = v.extrapolate(t2);
                assert!(approx(twice.position, once.position), "{v} {t1} {t2}");
                assert!(approx(twice.velocity, once.velocity));
                assert_eq!(twice.acceleration, once.acceleration);
            }
        }
    }

    #[test]
    fn test_time_to_position_linear() {
        let v = Vector::new(0.0, 2.0, 0.0, 0.0);
        assert!(approx(time_to_position(&v, 10.0).unwrap(), 5.0));
        assert_eq!(time_to_position(&v, -1.0), None);
        assert_eq!(time_to_position(&v, 0.0), None);

        let still = Vector::at_rest(3.0, 0.0);
        assert_eq!(time_to_position(&still, 5.0), None);
    }

    #[test]
    fn test_time_to_position_quadratic_picks_smallest_positive_root() {
        // p(t) = 5t - 0.5t², reaches 8 at t=2 and t=8
        let v = Vector::new(0.0, 5.0, -1.0, 0.0);
        assert!(approx(time_to_position(&v, 8.0).unwrap(), 2.0));
        // turns back at t=5 and crosses 0 again at t=10
        assert!(approx(time_to_position(&v, 0.0).unwrap(), 10.0));
        // never reaches 20
        assert_eq!(time_to_position(&v, 20.0), None);
    }

    #[test]
    fn test_tangential_touch_is_not_a_crossing() {
        // p(t) = 2t - 0.5t², peaks at exactly 2 when t=2
        let v = Vector::new(0.0, 2.0, -1.0, 0.0);
        assert_eq!(time_to_position(&v, 2.0), None);
        assert!(approx(time_to_position(&v, 1.5).unwrap(), 1.0));
    }

    #[test]
    fn test_time_to_range_boundary() {
        let range = Range::new(0.0, 100.0).unwrap();
        let v = Vector::new(0.0, 1.0, 0.0, 0.0);
        let (dt, bound) = time_to_range_boundary(&v, &range).unwrap();
        assert!(approx(dt, 100.0));
        assert_eq!(bound, 100.0);

        let back = Vector::new(50.0, -5.0, 0.0, 0.0);
        assert_eq!(time_to_range_boundary(&back, &range), Some((10.0, 0.0)));
        assert_eq!(time_to_range_boundary(&back, &Range::infinite()), None);
    }

    #[test]
    fn test_check_range_clamps_and_stops() {
        let range = Range::new(0.0, 10.0).unwrap();
        let above = Vector::new(12.0, 1.0, 0.0, 3.0);
        assert_eq!(check_range(&above, &range), Vector::at_rest(10.0, 3.0));

        let leaving = Vector::new(0.0, -1.0, 0.0, 0.0);
        assert_eq!(range_state(&leaving, &range), RangeState::OutsideLow);
        assert_eq!(check_range(&leaving, &range), Vector::at_rest(0.0, 0.0));

        let entering = Vector::new(0.0, 1.0, 0.0, 0.0);
        assert_eq!(check_range(&entering, &range), entering);
    }

    #[test]
    fn test_range_validation() {
        assert!(Range::new(5.0, 1.0).is_err());
        assert!(Range::new(f64::NAN, 1.0).is_err());
        assert!(Range::new(1.0, 1.0).is_ok());
        let r = Range::new(-1.0, 2.0).unwrap();
        assert_eq!(r.scaled(-2.0), Range::new(-4.0, 2.0).unwrap());
        assert_eq!(Range::infinite().shifted(3.0), Range::infinite());
        let ten = Range::new(0.0, 10.0).unwrap();
        assert_eq!(ten.wrap(23.0), 3.0);
        assert_eq!(ten.wrap(-1.0), 9.0);
        assert_eq!(ten.wrap(10.0), 0.0);
        assert_eq!(
            r.intersect(&Range::new(0.0, 5.0).unwrap()),
            Some(Range::new(0.0, 2.0).unwrap())
        );
    }

    #[test]
    fn test_range_ron_uses_missing_bounds_for_infinity() {
        let range: Range = ron::from_str("(low: Some(0.0))").unwrap();
        assert_eq!(range.low(), 0.0);
        assert_eq!(range.high(), f64::INFINITY);
        assert!(ron::from_str::<Range>("(low: Some(3.0), high: Some(1.0))").is_err());
    }

    #[test]
    fn test_partial_vector_merge() {
        let base = Vector::new(4.0, 1.0, 0.5, 2.0);
        let merged = PartialVector::velocity(-2.0).merge(&base);
        assert_eq!(merged, Vector::new(4.0, -2.0, 0.5, 2.0));
    }

    #[test]
    fn test_motion_delta() {
        let old = Vector::new(0.0, 1.0, 0.0, 0.0);
        let paused = Vector::at_rest(5.0, 5.0);
        let delta = MotionDelta::new(Some(&old), &paused);
        assert_eq!(delta.position, PosDelta::Noop);
        assert_eq!(delta.movement, MoveDelta::Stop);

        let jump = MotionDelta::new(Some(&paused), &Vector::new(50.0, 1.0, 0.0, 6.0));
        assert_eq!(jump.position, PosDelta::Change);
        assert_eq!(jump.movement, MoveDelta::Start);
        assert_eq!(jump.to_string(), "jump, movement started");
    }
}
