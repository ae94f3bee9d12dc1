//! Connectivity reconstruction from heartbeat timestamps.
//!
//! Devices never report connected/disconnected intervals directly; they send
//! periodic heartbeats. A gap larger than `max_delay` between consecutive
//! heartbeats marks a disconnected stretch. Runs of equal classification are
//! merged into alternating connected/disconnected intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Presentation tag for connected intervals.
pub const CONNECTED_COLOR: &str = "#a1eca4";
/// Presentation tag for disconnected intervals.
pub const DISCONNECTED_COLOR: &str = "#ff0000";

/// A reconstructed connectivity interval.
///
/// `duration` is always `end - begin`. `color` is consumed only by the
/// presentation layer but is part of the output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityInterval {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub connected: bool,
    #[serde(with = "crate::engine::duration_serde")]
    pub duration: Duration,
    pub color: String,
}

impl ConnectivityInterval {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>, connected: bool) -> Self {
        debug_assert!(begin <= end);
        Self {
            begin,
            end,
            connected,
            duration: end - begin,
            color: if connected {
                CONNECTED_COLOR.to_string()
            } else {
                DISCONNECTED_COLOR.to_string()
            },
        }
    }

    fn extend_to(&mut self, end: DateTime<Utc>) {
        self.end = end;
        self.duration = self.end - self.begin;
    }

    fn clip(&mut self, begin: DateTime<Utc>, end: DateTime<Utc>) {
        self.begin = self.begin.max(begin);
        self.end = self.end.min(end);
        self.duration = self.end - self.begin;
    }
}

/// Reconstruct connectivity intervals from sorted heartbeat timestamps.
///
/// The stretch between two consecutive heartbeats is connected when its
/// length is at most `max_delay`; runs of equal classification merge into
/// one interval. The first heartbeat has no predecessor and opens a
/// connected run, so no phantom disconnected stretch precedes it. Fewer
/// than two heartbeats span no time and yield no intervals.
pub fn reconstruct(
    heartbeats: &[DateTime<Utc>],
    max_delay: Duration,
) -> Vec<ConnectivityInterval> {
    debug_assert!(heartbeats.windows(2).all(|w| w[0] <= w[1]));

    let mut intervals: Vec<ConnectivityInterval> = Vec::new();
    for pair in heartbeats.windows(2) {
        let connected = pair[1] - pair[0] <= max_delay;
        match intervals.last_mut() {
            Some(last) if last.connected == connected => last.extend_to(pair[1]),
            _ => intervals.push(ConnectivityInterval::new(pair[0], pair[1], connected)),
        }
    }

    debug!(
        heartbeats = heartbeats.len(),
        intervals = intervals.len(),
        "reconstructed connectivity"
    );

    intervals
}

/// Connectivity for a device over the query window `[start, end]`.
///
/// - With no overlapping data the whole window is a single disconnected
///   interval: a device without heartbeat evidence is not assumed connected.
/// - `cut_intervals` clips boundary intervals to the window and recomputes
///   their durations.
/// - A device whose last known interval is connected but ends before `end`
///   gets a trailing disconnected interval covering the gap.
pub fn connection(
    heartbeats: &[DateTime<Utc>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_delay: Duration,
    cut_intervals: bool,
) -> Vec<ConnectivityInterval> {
    debug_assert!(start <= end);

    let mut intervals: Vec<ConnectivityInterval> = reconstruct(heartbeats, max_delay)
        .into_iter()
        .filter(|iv| start <= iv.end && iv.begin <= end)
        .collect();

    if intervals.is_empty() {
        return vec![ConnectivityInterval::new(start, end, false)];
    }

    if cut_intervals {
        for interval in &mut intervals {
            interval.clip(start, end);
        }
    }

    // A device that stopped sending heartbeats is not assumed connected.
    if let Some(last) = intervals.last() {
        if last.connected && last.end < end {
            let gap_begin = last.end;
            intervals.push(ConnectivityInterval::new(gap_begin, end, false));
        }
    }

    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn max_delay() -> Duration {
        Duration::seconds(2)
    }

    #[test]
    fn test_reconstruct_empty_and_single() {
        assert!(reconstruct(&[], max_delay()).is_empty());
        assert!(reconstruct(&[ts(5)], max_delay()).is_empty());
    }

    #[test]
    fn test_reconstruct_merges_runs() {
        let heartbeats = vec![ts(0), ts(1), ts(2), ts(10), ts(11), ts(12)];
        let intervals = reconstruct(&heartbeats, max_delay());

        assert_eq!(
            intervals,
            vec![
                ConnectivityInterval::new(ts(0), ts(2), true),
                ConnectivityInterval::new(ts(2), ts(10), false),
                ConnectivityInterval::new(ts(10), ts(12), true),
            ]
        );
        assert_eq!(intervals[1].duration, Duration::seconds(8));
        assert_eq!(intervals[1].color, DISCONNECTED_COLOR);
    }

    #[test]
    fn test_reconstruct_all_connected() {
        let heartbeats = vec![ts(0), ts(2), ts(4), ts(6)];
        let intervals = reconstruct(&heartbeats, max_delay());
        assert_eq!(
            intervals,
            vec![ConnectivityInterval::new(ts(0), ts(6), true)]
        );
    }

    #[test]
    fn test_connection_no_data_default() {
        let intervals = connection(&[], ts(100), ts(200), max_delay(), false);
        assert_eq!(
            intervals,
            vec![ConnectivityInterval::new(ts(100), ts(200), false)]
        );
    }

    #[test]
    fn test_connection_no_overlap_default() {
        // All heartbeats end before the window starts.
        let heartbeats = vec![ts(0), ts(1), ts(2)];
        let intervals = connection(&heartbeats, ts(100), ts(200), max_delay(), false);
        assert_eq!(
            intervals,
            vec![ConnectivityInterval::new(ts(100), ts(200), false)]
        );
    }

    #[test]
    fn test_connection_cut_intervals() {
        let heartbeats = vec![ts(0), ts(1), ts(2), ts(10), ts(11), ts(12)];
        let intervals = connection(&heartbeats, ts(1), ts(11), max_delay(), true);

        assert_eq!(
            intervals,
            vec![
                ConnectivityInterval::new(ts(1), ts(2), true),
                ConnectivityInterval::new(ts(2), ts(10), false),
                ConnectivityInterval::new(ts(10), ts(11), true),
            ]
        );
        // Durations recomputed after clipping.
        assert_eq!(intervals[0].duration, Duration::seconds(1));
    }

    #[test]
    fn test_connection_trailing_disconnected_gap() {
        // Device goes quiet at t=12 but the window extends to t=60.
        let heartbeats = vec![ts(10), ts(11), ts(12)];
        let intervals = connection(&heartbeats, ts(0), ts(60), max_delay(), false);

        assert_eq!(
            intervals,
            vec![
                ConnectivityInterval::new(ts(10), ts(12), true),
                ConnectivityInterval::new(ts(12), ts(60), false),
            ]
        );
        // The synthetic interval's duration is its own span.
        assert_eq!(intervals[1].duration, Duration::seconds(48));
    }

    #[test]
    fn test_connection_no_trailing_gap_when_disconnected() {
        let heartbeats = vec![ts(0), ts(1), ts(30)];
        let intervals = connection(&heartbeats, ts(0), ts(60), max_delay(), false);

        // Last interval is already disconnected; nothing is appended.
        assert_eq!(
            intervals,
            vec![
                ConnectivityInterval::new(ts(0), ts(1), true),
                ConnectivityInterval::new(ts(1), ts(30), false),
            ]
        );
    }
}
