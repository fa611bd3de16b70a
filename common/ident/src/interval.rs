// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};

use crate::Version;

/// A half-open version interval `[low, high)`.
///
/// `high == None` means the interval is unbounded above.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionInterval {
    low: Version,
    high: Option<Version>,
}

impl VersionInterval {
    pub fn new(low: Version, high: Option<Version>) -> Self {
        Self { low, high }
    }

    pub fn low(&self) -> &Version {
        &self.low
    }

    pub fn high(&self) -> Option<&Version> {
        self.high.as_ref()
    }

    pub fn contains(&self, version: &Version) -> bool {
        if *version < self.low {
            return false;
        }
        match &self.high {
            Some(high) => version < high,
            None => true,
        }
    }

    fn is_empty(&self) -> bool {
        match &self.high {
            Some(high) => *high <= self.low,
            None => false,
        }
    }
}

/// A normalized union of disjoint [`VersionInterval`]s.
///
/// This is the constraint algebra the solver works in: intervals are kept
/// sorted, non-overlapping and non-adjacent, so structural equality is
/// semantic equality.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct IntervalSet {
    intervals: Vec<VersionInterval>,
}

impl IntervalSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The set of all versions.
    pub fn any() -> Self {
        Self {
            intervals: vec![VersionInterval::new(Version::min_value(), None)],
        }
    }

    /// The set containing exactly `version` (up to build metadata).
    pub fn exact(version: &Version) -> Self {
        Self::of(version.clone(), Some(version.epsilon_successor()))
    }

    /// The set `[low, high)`.
    pub fn of(low: Version, high: Option<Version>) -> Self {
        let interval = VersionInterval::new(low, high);
        if interval.is_empty() {
            return Self::empty();
        }
        Self {
            intervals: vec![interval],
        }
    }

    /// The set `[low, ∞)`.
    pub fn at_least(low: Version) -> Self {
        Self::of(low, None)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.intervals.iter().any(|iv| iv.contains(version))
    }

    pub fn intervals(&self) -> &[VersionInterval] {
        &self.intervals
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut intervals: Vec<VersionInterval> = self
            .intervals
            .iter()
            .chain(other.intervals.iter())
            .cloned()
            .collect();
        intervals.sort_by(|a, b| a.low.cmp(&b.low));

        let mut merged: Vec<VersionInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                // Overlapping or touching intervals coalesce; `[a, b)` and
                // `[b, c)` cover `[a, c)` with nothing in between.
                Some(last) if last.high.is_none() => {}
                Some(last) if last.high.as_ref().unwrap() >= &interval.low => {
                    if interval.high.is_none()
                        || interval.high.as_ref() > last.high.as_ref()
                    {
                        last.high = interval.high;
                    }
                }
                _ => merged.push(interval),
            }
        }
        Self { intervals: merged }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut result = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                let low = std::cmp::max(&a.low, &b.low).clone();
                let high = match (&a.high, &b.high) {
                    (Some(x), Some(y)) => Some(std::cmp::min(x, y).clone()),
                    (Some(x), None) => Some(x.clone()),
                    (None, Some(y)) => Some(y.clone()),
                    (None, None) => None,
                };
                let interval = VersionInterval::new(low, high);
                if !interval.is_empty() {
                    result.push(interval);
                }
            }
        }
        result.sort_by(|a, b| a.low.cmp(&b.low));
        Self { intervals: result }
    }

    pub fn complement(&self) -> Self {
        let mut result = Vec::new();
        let mut cursor = Some(Version::min_value());
        for interval in &self.intervals {
            let start = match cursor.take() {
                Some(start) => start,
                None => break,
            };
            if start < interval.low {
                result.push(VersionInterval::new(start, Some(interval.low.clone())));
            }
            cursor = interval.high.clone();
        }
        if let Some(start) = cursor {
            result.push(VersionInterval::new(start, None));
        }
        Self { intervals: result }
    }

    pub fn difference(&self, other: &Self) -> Self {
        self.intersect(&other.complement())
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.intersect(other).is_empty()
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.intersect(other) == *self
    }
}

impl Display for VersionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unbounded_below = self.low == Version::min_value();
        match (&self.high, unbounded_below) {
            (None, true) => f.write_str("any"),
            (None, false) => write!(f, ">={}", self.low),
            (Some(high), _) => {
                if *high == self.low.epsilon_successor() {
                    // An exact pin reads better as the bare version.
                    write!(f, "{}", self.low)
                } else if unbounded_below {
                    write!(f, "<{}", high)
                } else {
                    write!(f, ">={} <{}", self.low, high)
                }
            }
        }
    }
}

impl Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return f.write_str("(no versions)");
        }
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn v(s: &str) -> Version {
        Version::try_new(s).unwrap()
    }

    fn set(low: &str, high: Option<&str>) -> IntervalSet {
        IntervalSet::of(v(low), high.map(v))
    }

    #[test]
    fn contains_respects_bounds() {
        let s = set("1.2.3", Some("2.0.0"));
        assert!(!s.contains(&v("1.2.2")));
        assert!(s.contains(&v("1.2.3")));
        assert!(s.contains(&v("1.9.9")));
        assert!(!s.contains(&v("2.0.0")));
    }

    #[test]
    fn union_merges_touching_intervals() {
        let a = set("1.0.0", Some("1.5.0"));
        let b = set("1.5.0", Some("2.0.0"));
        assert_eq!(a.union(&b), set("1.0.0", Some("2.0.0")));
    }

    #[test]
    fn union_keeps_gaps() {
        let a = set("1.0.0", Some("1.1.0"));
        let b = set("2.0.0", None);
        let u = a.union(&b);
        assert_eq!(2, u.intervals().len());
        assert!(u.contains(&v("1.0.5")));
        assert!(!u.contains(&v("1.5.0")));
        assert!(u.contains(&v("3.0.0")));
    }

    #[test]
    fn intersect_narrows() {
        let a = set("1.0.0", Some("2.0.0"));
        let b = set("1.5.0", Some("3.0.0"));
        assert_eq!(a.intersect(&b), set("1.5.0", Some("2.0.0")));

        let c = set("2.5.0", Some("3.0.0"));
        assert!(a.intersect(&c).is_empty());
    }

    #[test]
    fn complement_roundtrip() {
        let a = set("1.0.0", Some("2.0.0")).union(&set("3.0.0", None));
        let c = a.complement();
        assert!(!c.contains(&v("1.5.0")));
        assert!(c.contains(&v("0.9.0")));
        assert!(c.contains(&v("2.5.0")));
        assert!(!c.contains(&v("3.5.0")));
        assert_eq!(a, a.complement().complement());
    }

    #[test]
    fn complement_of_any_is_empty() {
        assert!(IntervalSet::any().complement().is_empty());
        assert_eq!(IntervalSet::empty().complement(), IntervalSet::any());
    }

    #[test]
    fn subset_relation() {
        let narrow = set("1.2.0", Some("1.3.0"));
        let wide = set("1.0.0", Some("2.0.0"));
        assert!(narrow.is_subset_of(&wide));
        assert!(!wide.is_subset_of(&narrow));
        assert!(IntervalSet::empty().is_subset_of(&narrow));
    }

    #[test]
    fn exact_contains_only_that_version() {
        let s = IntervalSet::exact(&v("1.2.3"));
        assert!(s.contains(&v("1.2.3")));
        assert!(!s.contains(&v("1.2.4")));
        assert!(!s.contains(&v("1.2.3-rc.1")));
    }

    #[test]
    fn display_forms() {
        assert_eq!("any", IntervalSet::any().to_string());
        assert_eq!("(no versions)", IntervalSet::empty().to_string());
        assert_eq!("1.2.3", IntervalSet::exact(&v("1.2.3")).to_string());
        assert_eq!(">=1.2.3", IntervalSet::at_least(v("1.2.3")).to_string());
        assert_eq!(
            ">=1.2.3 <2.0.0-0",
            set("1.2.3", Some("2.0.0-0")).to_string()
        );
    }
}
