//! Generic interval algebra.
//!
//! Run-length extraction turns a time-ordered series of samples into maximal
//! intervals of equal value; sweep-line intersection combines two sorted,
//! non-overlapping interval sets. Both assume well-formed input: sorted
//! ascending by begin and already merged. Violating that is a caller bug,
//! checked only in debug builds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A span of time tagged with a value. Invariant: `begin <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval<T> {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: T,
}

impl<T> Interval<T> {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>, value: T) -> Self {
        debug_assert!(begin <= end);
        Self { begin, end, value }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.begin
    }
}

/// An untagged span.
pub type Span = Interval<()>;

/// Construct an untagged span.
pub fn span(begin: DateTime<Utc>, end: DateTime<Utc>) -> Span {
    Interval::new(begin, end, ())
}

/// Whether two intervals overlap or touch.
///
/// Degenerate zero-length intervals intersect a touching interval:
/// `[1,1]` intersects `[1,1]`, and `[1,7]` intersects `[1,2]`.
pub fn is_intersecting<A, B>(a: &Interval<A>, b: &Interval<B>) -> bool {
    // assume a begins before b, otherwise swap
    if a.begin > b.begin {
        return is_intersecting(b, a);
    }
    a.end >= b.begin
}

/// Run-length encode a time-ordered series into maximal intervals.
///
/// Each interval's end is exclusive: it is the timestamp of the next
/// differing sample. The final run extends to `until` when a bound is
/// supplied; without one its end is indeterminate and the run is dropped.
/// A single sample therefore yields no intervals unless `until` is given.
pub fn extract_intervals<V: PartialEq + Clone>(
    series: &[(DateTime<Utc>, V)],
    until: Option<DateTime<Utc>>,
) -> Vec<Interval<V>> {
    debug_assert!(series.windows(2).all(|w| w[0].0 <= w[1].0));

    let mut intervals = Vec::new();
    let Some((first_ts, first_value)) = series.first() else {
        return intervals;
    };

    let mut run_begin = *first_ts;
    let mut run_value = first_value.clone();
    for (ts, value) in &series[1..] {
        if *value != run_value {
            intervals.push(Interval::new(run_begin, *ts, run_value));
            run_begin = *ts;
            run_value = value.clone();
        }
    }

    if let Some(until) = until {
        debug_assert!(until >= run_begin);
        intervals.push(Interval::new(run_begin, until, run_value));
    }

    intervals
}

/// Sweep-line intersection of two sorted, non-overlapping interval sets.
///
/// Output is sorted, non-overlapping, and exactly the set-intersection of
/// the two input unions. O(|a| + |b|).
pub fn intersect<A, B>(a: &[Interval<A>], b: &[Interval<B>]) -> Vec<Span> {
    debug_assert!(a.windows(2).all(|w| w[0].end <= w[1].begin));
    debug_assert!(b.windows(2).all(|w| w[0].end <= w[1].begin));

    let mut intersections = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let (x, y) = (&a[i], &b[j]);

        if !is_intersecting(x, y) {
            if x.begin < y.begin {
                i += 1;
            } else {
                j += 1;
            }
            continue;
        }

        intersections.push(span(x.begin.max(y.begin), x.end.min(y.end)));

        // Advance whichever interval ends first; the other may still
        // intersect a later interval on the opposite side. On an end tie
        // advance both: keeping either side could only re-emit its shared
        // endpoint as a zero-length span, and only on one argument order.
        if x.end == y.end {
            i += 1;
            j += 1;
        } else if x.end < y.end {
            i += 1;
        } else {
            j += 1;
        }
    }

    intersections
}
