//! Half-open time windows used to bound remote queries and store lookups

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open time range `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window. An inverted range is collapsed to an empty window at `from`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to: to.max(from),
        }
    }

    /// The live-poll window `[now - lookback, now)`
    pub fn lookback(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self::new(now - lookback, now)
    }

    /// Window covering `[earliest - pad, latest + pad]`, both ends included.
    ///
    /// Timestamps are persisted at millisecond precision, so the inclusive
    /// upper bound is expressed as one millisecond past `latest + pad`.
    pub fn padded(earliest: DateTime<Utc>, latest: DateTime<Utc>, pad: Duration) -> Self {
        Self::new(
            earliest - pad,
            latest + pad + Duration::milliseconds(1),
        )
    }

    /// Split `[start, end)` into consecutive windows of `chunk` length, oldest first.
    ///
    /// The final chunk is clipped to `end`.
    pub fn chunks(start: DateTime<Utc>, end: DateTime<Utc>, chunk: Duration) -> Vec<TimeWindow> {
        let mut windows = Vec::new();
        if chunk <= Duration::zero() {
            return windows;
        }

        let mut from = start;
        while from < end {
            let to = (from + chunk).min(end);
            windows.push(TimeWindow { from, to });
            from = to;
        }
        windows
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}
