//! Nanosecond-precision timestamps
//!
//! A [`TimeStamp`] is the `(seconds, nanoseconds)` pair returned by
//! `clock_gettime`, with the nanosecond part always kept in `0..1e9`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nanoseconds per second
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Timestamp with nanosecond precision
///
/// # Example
/// ```
/// use timedcapture_core::timing::TimeStamp;
///
/// let ts = TimeStamp::new(2, 500_000_000).unwrap();
/// assert_eq!(ts.total_ns(), 2_500_000_000);
/// assert_eq!(ts.total_ms(), 2500.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeStamp {
    seconds: i64,
    nanoseconds: u32,
}

impl TimeStamp {
    /// Create a timestamp, rejecting a nanosecond part outside `0..1e9`
    pub fn new(seconds: i64, nanoseconds: u32) -> Option<Self> {
        if i64::from(nanoseconds) >= NANOS_PER_SEC {
            return None;
        }
        Some(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Split a nanosecond count into seconds and nanoseconds
    ///
    /// Uses floor division so negative counts still carry a nanosecond
    /// part in range (`-1 ns` is `(-1 s, 999_999_999 ns)`).
    pub fn from_ns(total_ns: i64) -> Self {
        Self {
            seconds: total_ns.div_euclid(NANOS_PER_SEC),
            nanoseconds: total_ns.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    /// Whole seconds since the clock's epoch
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second nanoseconds
    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// Total time in nanoseconds
    ///
    /// Saturates at `i64::MIN`/`i64::MAX` outside roughly ±292 years.
    pub fn total_ns(&self) -> i64 {
        self.seconds
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(i64::from(self.nanoseconds))
    }

    /// Total time in microseconds
    pub fn total_us(&self) -> f64 {
        self.total_ns() as f64 / 1_000.0
    }

    /// Total time in milliseconds
    pub fn total_ms(&self) -> f64 {
        self.total_ns() as f64 / 1_000_000.0
    }

    /// Total time in seconds
    pub fn total_seconds(&self) -> f64 {
        self.seconds as f64 + f64::from(self.nanoseconds) / NANOS_PER_SEC as f64
    }

    /// Interpret as a UTC wall-clock instant
    ///
    /// Only meaningful for epoch-based domains (Realtime, TAI); a TAI
    /// reading comes out ahead of UTC by the current leap-second offset.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}
