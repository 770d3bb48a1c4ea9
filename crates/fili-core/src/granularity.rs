//! # Time Grains
//!
//! Bucketing granularities understood by both the API and Druid.

use crate::interval::Interval;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    All,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    /// Start of the bucket containing `instant`. `All` has no alignment.
    pub fn round_floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        match self {
            Self::All => instant,
            Self::Minute => instant
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(instant),
            Self::Hour => instant
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(instant),
            Self::Day => midnight(date),
            Self::Week => {
                let back = i64::from(date.weekday().num_days_from_monday());
                midnight(date - Duration::days(back))
            }
            Self::Month => midnight(date.with_day(1).unwrap_or(date)),
            Self::Year => midnight(
                NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
            ),
        }
    }

    /// Start of the bucket after the one starting at `bucket_start`.
    /// `None` for `All`, which has a single unbounded bucket.
    pub fn increment(&self, bucket_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::All => None,
            Self::Minute => bucket_start.checked_add_signed(Duration::minutes(1)),
            Self::Hour => bucket_start.checked_add_signed(Duration::hours(1)),
            Self::Day => bucket_start.checked_add_signed(Duration::days(1)),
            Self::Week => bucket_start.checked_add_signed(Duration::weeks(1)),
            Self::Month => bucket_start.checked_add_months(Months::new(1)),
            Self::Year => bucket_start.checked_add_months(Months::new(12)),
        }
    }

    /// The grain buckets touching `interval`, in order. Buckets are whole
    /// (not clipped to the interval). `All` yields the interval itself.
    pub fn buckets(&self, interval: &Interval) -> Vec<Interval> {
        if interval.is_empty() {
            return Vec::new();
        }
        let Some(_) = self.increment(interval.start()) else {
            return vec![*interval];
        };

        let mut out = Vec::new();
        let mut cursor = self.round_floor(interval.start());
        while cursor < interval.end() {
            let Some(next) = self.increment(cursor) else {
                break;
            };
            if let Ok(bucket) = Interval::new(cursor, next) {
                out.push(bucket);
            }
            cursor = next;
        }
        out
    }

    /// Number of buckets across all given intervals.
    pub fn bucket_count<'a, I: IntoIterator<Item = &'a Interval>>(&self, intervals: I) -> u64 {
        intervals
            .into_iter()
            .map(|i| self.buckets(i).len() as u64)
            .sum()
    }

    /// True when both ends of the interval fall on bucket boundaries.
    pub fn is_aligned(&self, interval: &Interval) -> bool {
        self.round_floor(interval.start()) == interval.start()
            && self.round_floor(interval.end()) == interval.end()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(text: &str) -> Interval {
        Interval::parse(text).unwrap()
    }

    #[test]
    fn test_day_buckets() {
        let buckets = Granularity::Day.buckets(&iv("2015-09-12/2015-09-15"));
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0], iv("2015-09-12/2015-09-13"));
        assert_eq!(buckets[2], iv("2015-09-14/2015-09-15"));
    }

    #[test]
    fn test_all_is_single_bucket() {
        let i = iv("2015-09-12/2015-09-15");
        assert_eq!(Granularity::All.buckets(&i), vec![i]);
        assert!(Granularity::All.buckets(&iv("2015-09-12/2015-09-12")).is_empty());
    }

    #[test]
    fn test_week_floor_is_monday() {
        // 2015-09-12 is a Saturday.
        let floor = Granularity::Week.round_floor(iv("2015-09-12/2015-09-13").start());
        assert_eq!(floor, iv("2015-09-07/2015-09-08").start());
    }

    #[test]
    fn test_month_buckets_cover_partial_months() {
        let buckets = Granularity::Month.buckets(&iv("2015-01-15/2015-03-01"));
        assert_eq!(
            buckets,
            vec![iv("2015-01-01/2015-02-01"), iv("2015-02-01/2015-03-01")]
        );
    }

    #[test]
    fn test_alignment() {
        assert!(Granularity::Day.is_aligned(&iv("2015-09-12/2015-09-13")));
        assert!(!Granularity::Day.is_aligned(&iv("2015-09-12T06:00:00Z/2015-09-13")));
        assert!(Granularity::Hour.is_aligned(&iv("2015-09-12T06:00:00Z/2015-09-13")));
    }
}
