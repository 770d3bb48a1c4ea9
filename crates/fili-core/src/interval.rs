//! # Intervals
//!
//! Half-open time ranges and the simplified interval lists used for
//! availability, missing-data and volatility arithmetic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Errors raised while building intervals or interval lists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("interval end {end} precedes start {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("unparseable interval '{0}'")]
    Unparseable(String),

    #[error("intervals are not sorted: {previous} is followed by {next}")]
    Unsorted { previous: String, next: String },

    #[error("intervals overlap: {first} and {second}")]
    Overlapping { first: String, second: String },
}

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, IntervalError> {
        if end < start {
            return Err(IntervalError::EndBeforeStart {
                start: format_instant(&start),
                end: format_instant(&end),
            });
        }
        Ok(Self { start, end })
    }

    /// Build from epoch milliseconds.
    pub fn from_millis(start: i64, end: i64) -> Result<Self, IntervalError> {
        let start_dt = Utc
            .timestamp_millis_opt(start)
            .single()
            .ok_or_else(|| IntervalError::Unparseable(start.to_string()))?;
        let end_dt = Utc
            .timestamp_millis_opt(end)
            .single()
            .ok_or_else(|| IntervalError::Unparseable(end.to_string()))?;
        Self::new(start_dt, end_dt)
    }

    /// Parse `start/end` where each side is an ISO-8601 date or date-time.
    pub fn parse(text: &str) -> Result<Self, IntervalError> {
        let (start, end) = text
            .trim()
            .split_once('/')
            .ok_or_else(|| IntervalError::Unparseable(text.to_string()))?;
        let start = parse_instant(start).ok_or_else(|| IntervalError::Unparseable(text.into()))?;
        let end = parse_instant(end).ok_or_else(|| IntervalError::Unparseable(text.into()))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// True when `other` lies entirely within this interval.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True when the two intervals share at least one instant.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn abuts(&self, other: &Interval) -> bool {
        self.end == other.start || other.end == self.start
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            format_instant(&self.start),
            format_instant(&self.end)
        )
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Interval::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// ISO-8601 with millisecond precision, `Z` suffixed.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339, zone-less date-times (read as UTC) and bare dates.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Simplified interval list
// =============================================================================

/// Sorted, non-overlapping, non-abutting list of non-empty intervals.
///
/// Every constructor either simplifies its input or validates it, so the
/// invariant holds for every value of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SimplifiedIntervalList(Vec<Interval>);

impl SimplifiedIntervalList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sort and merge arbitrary intervals. Empty intervals are dropped.
    pub fn simplify<I: IntoIterator<Item = Interval>>(intervals: I) -> Self {
        let mut sorted: Vec<Interval> = intervals.into_iter().filter(|i| !i.is_empty()).collect();
        sorted.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
        for interval in sorted {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => {
                    if interval.end > last.end {
                        last.end = interval.end;
                    }
                }
                _ => merged.push(interval),
            }
        }
        Self(merged)
    }

    /// Accept externally reported intervals that must already be ordered and
    /// disjoint. Abutting neighbours are merged; empty intervals are dropped.
    pub fn try_from_sorted(intervals: Vec<Interval>) -> Result<Self, IntervalError> {
        for pair in intervals.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if next.start < previous.start {
                return Err(IntervalError::Unsorted {
                    previous: previous.to_string(),
                    next: next.to_string(),
                });
            }
            if next.start < previous.end {
                return Err(IntervalError::Overlapping {
                    first: previous.to_string(),
                    second: next.to_string(),
                });
            }
        }
        Ok(Self::simplify(intervals))
    }

    pub fn single(interval: Interval) -> Self {
        Self::simplify([interval])
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Interval> {
        self.0
    }

    /// Smallest interval containing every member.
    pub fn span(&self) -> Option<Interval> {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) => Some(Interval {
                start: first.start,
                end: last.end,
            }),
            _ => None,
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::simplify(self.0.iter().chain(other.0.iter()).copied())
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            let (a, b) = (&self.0[i], &other.0[j]);
            if let Some(overlap) = a.intersection(b) {
                out.push(overlap);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self(out)
    }

    /// Every instant of `self` that is not in `other`.
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        let mut j = 0;
        for interval in &self.0 {
            let mut cursor = interval.start;
            while j < other.0.len() && other.0[j].end <= cursor {
                j += 1;
            }
            let mut k = j;
            while k < other.0.len() && other.0[k].start < interval.end {
                let hole = &other.0[k];
                if hole.start > cursor {
                    out.push(Interval {
                        start: cursor,
                        end: hole.start,
                    });
                }
                if hole.end > cursor {
                    cursor = hole.end;
                }
                if cursor >= interval.end {
                    break;
                }
                k += 1;
            }
            if cursor < interval.end {
                out.push(Interval {
                    start: cursor,
                    end: interval.end,
                });
            }
        }
        Self(out)
    }

    /// True when the interval is entirely inside a single member.
    pub fn covers(&self, interval: &Interval) -> bool {
        if interval.is_empty() {
            return true;
        }
        self.0.iter().any(|member| member.contains(interval))
    }

    pub fn overlaps(&self, interval: &Interval) -> bool {
        self.0.iter().any(|member| member.overlaps(interval))
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.0.iter().any(|member| member.contains_instant(instant))
    }
}

impl<'a> IntoIterator for &'a SimplifiedIntervalList {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Interval> for SimplifiedIntervalList {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        Self::simplify(iter)
    }
}

impl Serialize for SimplifiedIntervalList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SimplifiedIntervalList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let intervals = Vec::<Interval>::deserialize(deserializer)?;
        Self::try_from_sorted(intervals).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(text: &str) -> Interval {
        Interval::parse(text).unwrap()
    }

    fn list(items: &[&str]) -> SimplifiedIntervalList {
        SimplifiedIntervalList::simplify(items.iter().map(|s| iv(s)))
    }

    #[test]
    fn test_parse_date_only_and_display() {
        let i = iv("2015-09-12/2015-09-13");
        assert_eq!(
            i.to_string(),
            "2015-09-12T00:00:00.000Z/2015-09-13T00:00:00.000Z"
        );
        assert_eq!(i.duration(), chrono::Duration::days(1));
    }

    #[test]
    fn test_parse_rejects_reversed_interval() {
        assert!(matches!(
            Interval::parse("2015-09-13/2015-09-12"),
            Err(IntervalError::EndBeforeStart { .. })
        ));
        assert!(Interval::parse("garbage").is_err());
    }

    #[test]
    fn test_simplify_merges_overlapping_and_abutting() {
        let l = list(&[
            "2015-09-05/2015-09-07",
            "2015-09-01/2015-09-03",
            "2015-09-03/2015-09-04",
            "2015-09-06/2015-09-10",
        ]);
        assert_eq!(
            l,
            list(&["2015-09-01/2015-09-04", "2015-09-05/2015-09-10"])
        );
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn test_try_from_sorted_rejects_bad_input() {
        let unsorted = vec![iv("2015-09-05/2015-09-07"), iv("2015-09-01/2015-09-03")];
        assert!(matches!(
            SimplifiedIntervalList::try_from_sorted(unsorted),
            Err(IntervalError::Unsorted { .. })
        ));

        let overlapping = vec![iv("2015-09-01/2015-09-05"), iv("2015-09-03/2015-09-07")];
        assert!(matches!(
            SimplifiedIntervalList::try_from_sorted(overlapping),
            Err(IntervalError::Overlapping { .. })
        ));
    }

    #[test]
    fn test_subtract_punches_holes() {
        let requested = list(&["2015-09-01/2015-09-10"]);
        let available = list(&["2015-09-02/2015-09-03", "2015-09-05/2015-09-12"]);
        assert_eq!(
            requested.subtract(&available),
            list(&["2015-09-01/2015-09-02", "2015-09-03/2015-09-05"])
        );
    }

    #[test]
    fn test_subtract_with_nothing_left() {
        let requested = list(&["2015-09-12/2015-09-13"]);
        let available = list(&["2015-09-01/2015-09-20"]);
        assert!(requested.subtract(&available).is_empty());
    }

    #[test]
    fn test_intersect() {
        let a = list(&["2015-09-01/2015-09-05", "2015-09-08/2015-09-12"]);
        let b = list(&["2015-09-04/2015-09-09"]);
        assert_eq!(
            a.intersect(&b),
            list(&["2015-09-04/2015-09-05", "2015-09-08/2015-09-09"])
        );
    }

    #[test]
    fn test_covers_requires_single_member() {
        let l = list(&["2015-09-01/2015-09-05", "2015-09-06/2015-09-10"]);
        assert!(l.covers(&iv("2015-09-02/2015-09-04")));
        assert!(!l.covers(&iv("2015-09-04/2015-09-07")));
    }

    #[test]
    fn test_serde_round_trip_uses_iso_text() {
        let l = list(&["2015-09-01/2015-09-05"]);
        let json = serde_json::to_string(&l).unwrap();
        assert_eq!(json, "[\"2015-09-01T00:00:00.000Z/2015-09-05T00:00:00.000Z\"]");
        let back: SimplifiedIntervalList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, l);
    }
}
