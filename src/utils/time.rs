use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: f64 = 1e9;

/// Signed time span with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration {
    nanos: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration { nanos: 0 };

    pub fn from_sec(sec: f64) -> Duration {
        Duration {
            nanos: (sec * NANOS_PER_SEC).round() as i64,
        }
    }

    pub fn from_nanos(nanos: i64) -> Duration {
        Duration { nanos }
    }

    pub fn to_sec(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration::from_nanos(self.nanos.saturating_add(rhs.nanos))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(rhs.nanos))
    }
}

/// Opaque monotonic timestamp. Only differences and ordering carry meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TimePoint {
    nanos: i64,
}

impl TimePoint {
    pub const MIN: TimePoint = TimePoint { nanos: i64::MIN };
    pub const MAX: TimePoint = TimePoint { nanos: i64::MAX };

    pub fn from_sec(sec: f64) -> TimePoint {
        TimePoint {
            nanos: (sec * NANOS_PER_SEC).round() as i64,
        }
    }

    pub fn from_nanos(nanos: i64) -> TimePoint {
        TimePoint { nanos }
    }

    /// Seconds since the (arbitrary) clock origin.
    pub fn to_sec(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }
}

impl Sub for TimePoint {
    type Output = Duration;
    fn sub(self, rhs: TimePoint) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(rhs.nanos))
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;
    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint::from_nanos(self.nanos.saturating_add(rhs.as_nanos()))
    }
}

impl Sub<Duration> for TimePoint {
    type Output = TimePoint;
    fn sub(self, rhs: Duration) -> TimePoint {
        TimePoint::from_nanos(self.nanos.saturating_sub(rhs.as_nanos()))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.15}", self.to_sec())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.15}s", self.to_sec())
    }
}

/// Midpoint between the earliest and latest time of the set.
pub fn center_time(times: &BTreeSet<TimePoint>) -> Option<TimePoint> {
    let first = *times.first()?;
    let last = *times.last()?;
    let half = Duration::from_nanos((last - first).as_nanos() / 2);
    Some(first + half)
}

/// Wall-clock stopwatch for profiling estimation steps.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: std::time::Instant,
    last: std::time::Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

impl Timer {
    pub fn new() -> Timer {
        let start = std::time::Instant::now();
        Timer { start, last: start }
    }

    /// Seconds since the previous call (or since construction).
    pub fn incremental(&mut self) -> f64 {
        let now = std::time::Instant::now();
        let incr = (now - self.last).as_secs_f64();
        self.last = now;
        incr
    }

    /// Seconds since construction.
    pub fn full(&mut self) -> f64 {
        self.last = std::time::Instant::now();
        (self.last - self.start).as_secs_f64()
    }
}
