//! # fili-verify — interval list invariants
//!
//! Availability, volatility and partial-data decisions are all set algebra
//! over [`SimplifiedIntervalList`]. The checks below state the laws that
//! algebra must obey. They run two ways: as Kani proof harnesses over
//! symbolic millisecond bounds (`cargo kani --package fili-verify`), and as
//! exhaustive tests over every small list on a short integer timeline.
//!
//! Membership is probed with unit intervals `[t, t + 1)`: with integral
//! bounds, a list covers the unit interval exactly when it contains `t`.

use fili_core::{Interval, SimplifiedIntervalList};

pub fn unit(t: i64) -> Option<Interval> {
    Interval::from_millis(t, t + 1).ok()
}

pub fn contains(list: &SimplifiedIntervalList, t: i64) -> bool {
    unit(t).map(|u| list.covers(&u)).unwrap_or(false)
}

/// Sorted, non-empty, neither overlapping nor abutting.
pub fn is_simplified(list: &SimplifiedIntervalList) -> bool {
    list.iter().all(|i| !i.is_empty())
        && list
            .as_slice()
            .windows(2)
            .all(|w| w[0].end() < w[1].start())
}

pub fn union_holds(a: &SimplifiedIntervalList, b: &SimplifiedIntervalList, t: i64) -> bool {
    let u = a.union(b);
    is_simplified(&u) && contains(&u, t) == (contains(a, t) || contains(b, t))
}

pub fn intersect_holds(a: &SimplifiedIntervalList, b: &SimplifiedIntervalList, t: i64) -> bool {
    let i = a.intersect(b);
    is_simplified(&i) && contains(&i, t) == (contains(a, t) && contains(b, t))
}

pub fn subtract_holds(a: &SimplifiedIntervalList, b: &SimplifiedIntervalList, t: i64) -> bool {
    let d = a.subtract(b);
    is_simplified(&d) && contains(&d, t) == (contains(a, t) && !contains(b, t))
}

/// Missing data plus what is still there rebuilds the original request.
pub fn partition_holds(requested: &SimplifiedIntervalList, available: &SimplifiedIntervalList) -> bool {
    let missing = requested.subtract(available);
    let present = requested.intersect(available);
    missing.intersect(&present).is_empty() && missing.union(&present) == *requested
}

#[cfg(kani)]
mod proofs {
    use super::*;

    fn any_interval() -> Interval {
        let start: i8 = kani::any();
        let len: u8 = kani::any();
        kani::assume(len > 0 && len <= 16);
        match Interval::from_millis(start as i64, start as i64 + len as i64) {
            Ok(interval) => interval,
            Err(_) => unreachable!(),
        }
    }

    fn any_list() -> SimplifiedIntervalList {
        if kani::any() {
            SimplifiedIntervalList::simplify([any_interval()])
        } else {
            SimplifiedIntervalList::simplify([any_interval(), any_interval()])
        }
    }

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_simplify_normalizes() {
        assert!(is_simplified(&any_list()));
    }

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_union() {
        let t: i8 = kani::any();
        assert!(union_holds(&any_list(), &any_list(), t as i64));
    }

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_intersect() {
        let t: i8 = kani::any();
        assert!(intersect_holds(&any_list(), &any_list(), t as i64));
    }

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_subtract() {
        let t: i8 = kani::any();
        assert!(subtract_holds(&any_list(), &any_list(), t as i64));
    }

    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_missing_and_present_partition_the_request() {
        assert!(partition_holds(&any_list(), &any_list()));
    }
}
