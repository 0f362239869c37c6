// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sorted point index over a set of cues.
//!
//! Every cue contributes its endpoints to one sorted vector of [`Point`]s: two
//! points for a regular interval, one for a singular interval. A multimap
//! from point value to cue keys answers exact point lookups, and the longest
//! cue length bounds how far back an interval lookup has to scan for cues
//! that span the whole lookup interval.

use crate::cue::{Cue, CueChange};
use crate::interval::Interval;
use indexmap::{IndexMap, IndexSet};
use ordoplay_timing::Direction;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Batches at least this large are merged into the point vector in one pass
const MERGE_THRESHOLD: usize = 32;

/// Which end of its cue a point is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointRole {
    /// Lower bound of a regular interval
    Low,
    /// The only point of a singular interval
    Singular,
    /// Upper bound of a regular interval
    High,
}

/// One endpoint of one cue
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Position on the axis
    pub value: f64,
    /// Key of the owning cue
    pub key: String,
    /// Which end of the cue
    pub role: PointRole,
}

impl Point {
    fn order(&self, other: &Point) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.role.cmp(&other.role))
    }
}

fn endpoints(cue: &Cue) -> Vec<Point> {
    let interval = &cue.interval;
    if interval.is_singular() {
        return vec![Point {
            value: interval.low(),
            key: cue.key.clone(),
            role: PointRole::Singular,
        }];
    }
    vec![
        Point {
            value: interval.low(),
            key: cue.key.clone(),
            role: PointRole::Low,
        },
        Point {
            value: interval.high(),
            key: cue.key.clone(),
            role: PointRole::High,
        },
    ]
}

/// Multimap key of a point value; both zeros share one slot
fn slot(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Cues indexed by their endpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueIndex {
    cues: IndexMap<String, Rc<Cue>>,
    points: Vec<Point>,
    multimap: HashMap<u64, IndexSet<String>>,
    max_length: f64,
}

impl CueIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cues
    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// Whether there are no cues
    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Cue stored under `key`
    pub fn get(&self, key: &str) -> Option<Rc<Cue>> {
        self.cues.get(key).cloned()
    }

    /// Whether a cue is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.cues.contains_key(key)
    }

    /// All cues in insertion order
    pub fn cues(&self) -> impl Iterator<Item = &Rc<Cue>> {
        self.cues.values()
    }

    /// The sorted point vector
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Insert or replace cues.
    ///
    /// Within one batch the last cue for a key wins. Re-adding a cue identical
    /// to the stored one changes nothing and is not reported.
    pub fn add_cues(&mut self, batch: impl IntoIterator<Item = Cue>) -> Vec<CueChange> {
        let mut incoming: IndexMap<String, Cue> = IndexMap::new();
        for cue in batch {
            incoming.insert(cue.key.clone(), cue);
        }

        let mut changes = Vec::new();
        let mut replaced = HashSet::new();
        let mut fresh = Vec::new();
        for (key, cue) in incoming {
            let cue = Rc::new(cue);
            match self.cues.get(&key) {
                Some(old) if **old == *cue => continue,
                Some(old) => {
                    changes.push(CueChange::replaced(Rc::clone(old), Rc::clone(&cue)));
                    replaced.insert(key);
                }
                None => changes.push(CueChange::added(Rc::clone(&cue))),
            }
            fresh.push(cue);
        }
        if fresh.is_empty() {
            return changes;
        }

        if !replaced.is_empty() {
            for key in &replaced {
                if let Some(old) = self.cues.get(key).cloned() {
                    self.unlink(&old);
                }
            }
            self.points.retain(|point| !replaced.contains(&point.key));
        }

        let mut new_points: Vec<Point> = fresh.iter().flat_map(|cue| endpoints(cue)).collect();
        for point in &new_points {
            self.multimap
                .entry(slot(point.value))
                .or_default()
                .insert(point.key.clone());
        }
        if self.points.is_empty() {
            if !is_sorted(&new_points) {
                new_points.sort_by(Point::order);
            }
            self.points = new_points;
        } else if new_points.len() >= MERGE_THRESHOLD {
            new_points.sort_by(Point::order);
            self.points = merge(std::mem::take(&mut self.points), new_points);
        } else {
            for point in new_points {
                let at = self
                    .points
                    .partition_point(|existing| existing.order(&point) != Ordering::Greater);
                self.points.insert(at, point);
            }
        }

        for cue in fresh {
            self.max_length = self.max_length.max(cue.interval.length());
            self.cues.insert(cue.key.clone(), cue);
        }
        if !replaced.is_empty() {
            self.refresh_max_length();
        }
        tracing::debug!(changes = changes.len(), cues = self.cues.len(), "cues added");
        changes
    }

    /// Remove cues by key; absent keys are ignored
    pub fn remove_cues<K: AsRef<str>>(&mut self, keys: impl IntoIterator<Item = K>) -> Vec<CueChange> {
        let mut removed = Vec::new();
        for key in keys {
            if let Some(cue) = self.cues.shift_remove(key.as_ref()) {
                self.unlink(&cue);
                removed.push(cue);
            }
        }
        if removed.is_empty() {
            return Vec::new();
        }

        let keys: HashSet<&str> = removed.iter().map(|cue| cue.key.as_str()).collect();
        self.points.retain(|point| !keys.contains(point.key.as_str()));
        self.refresh_max_length();
        tracing::debug!(removed = removed.len(), cues = self.cues.len(), "cues removed");
        removed.into_iter().map(CueChange::removed).collect()
    }

    /// Remove every cue
    pub fn clear(&mut self) -> Vec<CueChange> {
        let keys: Vec<String> = self.cues.keys().cloned().collect();
        self.remove_cues(keys)
    }

    fn unlink(&mut self, cue: &Cue) {
        for point in endpoints(cue) {
            let slot = slot(point.value);
            if let Some(keys) = self.multimap.get_mut(&slot) {
                keys.shift_remove(&point.key);
                if keys.is_empty() {
                    self.multimap.remove(&slot);
                }
            }
        }
    }

    fn refresh_max_length(&mut self) {
        self.max_length = self
            .cues
            .values()
            .map(|cue| cue.interval.length())
            .fold(0.0, f64::max);
    }

    /// Cues with an endpoint at exactly `value`
    pub fn lookup_point(&self, value: f64) -> Vec<Rc<Cue>> {
        self.multimap
            .get(&slot(value))
            .map(|keys| keys.iter().filter_map(|key| self.get(key)).collect())
            .unwrap_or_default()
    }

    /// Keys of cues that may touch `[low, high]`, in point order.
    ///
    /// Includes every cue with an endpoint in the range and every cue whose low
    /// point lies within the longest cue length below `low`.
    fn candidates(&self, low: f64, high: f64) -> IndexSet<&str> {
        let start = self.points.partition_point(|point| point.value < low);
        let end = self.points.partition_point(|point| point.value <= high);
        let reach = low - self.max_length;
        let scan_from = if reach.is_finite() {
            self.points.partition_point(|point| point.value < reach)
        } else {
            0
        };

        let mut keys = IndexSet::new();
        for point in &self.points[scan_from.min(start)..start] {
            if point.role == PointRole::Low {
                keys.insert(point.key.as_str());
            }
        }
        for point in &self.points[start..end.max(start)] {
            keys.insert(point.key.as_str());
        }
        keys
    }

    /// Cues overlapping `interval`, include flags respected
    pub fn lookup_interval(&self, interval: &Interval) -> Vec<Rc<Cue>> {
        self.candidates(interval.low(), interval.high())
            .into_iter()
            .filter_map(|key| self.cues.get(key))
            .filter(|cue| cue.interval.overlaps(interval))
            .cloned()
            .collect()
    }

    /// Cues whose interval contains `value`
    pub fn covering(&self, value: f64) -> Vec<Rc<Cue>> {
        self.covering_side(value, Direction::Still)
    }

    /// Cues containing the positions just past `value` in `direction`
    pub fn covering_side(&self, value: f64, direction: Direction) -> Vec<Rc<Cue>> {
        if value.is_nan() {
            return Vec::new();
        }
        self.candidates(value, value)
            .into_iter()
            .filter_map(|key| self.cues.get(key))
            .filter(|cue| cue.interval.covers_side(value, direction))
            .cloned()
            .collect()
    }

    /// Nearest point values strictly below and strictly above `value`
    pub fn neighbors(&self, value: f64) -> (Option<f64>, Option<f64>) {
        let below = self.points.partition_point(|point| point.value < value);
        let above = self.points.partition_point(|point| point.value <= value);
        let lower = below.checked_sub(1).map(|at| self.points[at].value);
        let upper = self.points.get(above).map(|point| point.value);
        (lower, upper)
    }

    /// Point value closest to `value`, if within `tolerance`
    pub fn point_near(&self, value: f64, tolerance: f64) -> Option<f64> {
        let at = self.points.partition_point(|point| point.value < value);
        let candidates = [at.checked_sub(1), Some(at)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|at| self.points.get(at))
            .map(|point| point.value)
            .filter(|point| (point - value).abs() <= tolerance)
            .min_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()))
    }

    /// Verify the structural invariants, describing the first violation found
    pub fn check_invariants(&self) -> Result<(), String> {
        if !is_sorted(&self.points) {
            return Err("points are not sorted".into());
        }
        let expected: usize = self
            .cues
            .values()
            .map(|cue| if cue.interval.is_singular() { 1 } else { 2 })
            .sum();
        if self.points.len() != expected {
            return Err(format!("{} points for {expected} cue endpoints", self.points.len()));
        }
        for point in &self.points {
            let Some(cue) = self.cues.get(&point.key) else {
                return Err(format!("point {} has no cue {}", point.value, point.key));
            };
            if !endpoints(cue).contains(point) {
                return Err(format!("point {} is not an endpoint of {cue}", point.value));
            }
            let linked = self
                .multimap
                .get(&slot(point.value))
                .is_some_and(|keys| keys.contains(&point.key));
            if !linked {
                return Err(format!("point {} of {} missing from multimap", point.value, point.key));
            }
        }
        let linked: usize = self.multimap.values().map(IndexSet::len).sum();
        let distinct: HashSet<(u64, &str)> = self
            .points
            .iter()
            .map(|point| (slot(point.value), point.key.as_str()))
            .collect();
        if linked != distinct.len() {
            return Err(format!("multimap holds {linked} entries, expected {}", distinct.len()));
        }
        Ok(())
    }
}

fn is_sorted(points: &[Point]) -> bool {
    points
        .windows(2)
        .all(|pair| pair[0].order(&pair[1]) != Ordering::Greater)
}

fn merge(left: Vec<Point>, right: Vec<Point>) -> Vec<Point> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.order(r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}
