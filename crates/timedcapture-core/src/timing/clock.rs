//! Multi-domain clock access
//!
//! Provides low-overhead reads of the system clock domains used to
//! timestamp SDR samples:
//! - `Realtime` / `Monotonic` / `MonotonicRaw` / `Boottime`
//! - `Tai`, which follows the PTP hardware clock when `phc2sys` disciplines it
//!
//! Every domain may be missing on a given host. Reads never abort; an
//! unsupported domain surfaces as [`ClockUnavailable`] so callers can fall
//! back to another domain.

use super::timestamp::TimeStamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Warm-up reads before a latency measurement
const LATENCY_WARMUP_CALLS: usize = 10;

/// Clock domain identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockDomain {
    /// Wall-clock time (UTC, steps on NTP/PTP corrections)
    Realtime,
    /// Low-resolution wall clock served from the vDSO
    RealtimeCoarse,
    /// Monotonic time, slewed by NTP
    Monotonic,
    /// Low-resolution monotonic clock served from the vDSO
    MonotonicCoarse,
    /// Raw hardware monotonic time, never slewed
    MonotonicRaw,
    /// Monotonic time including suspend
    Boottime,
    /// International Atomic Time, PTP-disciplined on synchronized hosts
    Tai,
}

impl ClockDomain {
    /// Domains reported by [`ClockSource::availability`]
    pub const CANONICAL: [ClockDomain; 5] = [
        ClockDomain::Realtime,
        ClockDomain::Monotonic,
        ClockDomain::MonotonicRaw,
        ClockDomain::Tai,
        ClockDomain::Boottime,
    ];

    /// POSIX-style name of the domain
    pub fn name(&self) -> &'static str {
        match self {
            ClockDomain::Realtime => "CLOCK_REALTIME",
            ClockDomain::RealtimeCoarse => "CLOCK_REALTIME_COARSE",
            ClockDomain::Monotonic => "CLOCK_MONOTONIC",
            ClockDomain::MonotonicCoarse => "CLOCK_MONOTONIC_COARSE",
            ClockDomain::MonotonicRaw => "CLOCK_MONOTONIC_RAW",
            ClockDomain::Boottime => "CLOCK_BOOTTIME",
            ClockDomain::Tai => "CLOCK_TAI",
        }
    }

    /// Whether readings count from the Unix epoch
    pub fn is_epoch_based(&self) -> bool {
        matches!(
            self,
            ClockDomain::Realtime | ClockDomain::RealtimeCoarse | ClockDomain::Tai
        )
    }
}

impl fmt::Display for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The requested clock domain cannot be read on this host
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("clock domain {domain} is unavailable")]
pub struct ClockUnavailable {
    pub domain: ClockDomain,
}

/// Backend that reads a clock domain
///
/// This is the OS clock capability: `clock_gettime(domain)` or nothing.
pub trait TimeSource: Send + Sync {
    /// Read the domain, or `None` if it is not supported
    fn get_time(&self, domain: ClockDomain) -> Option<TimeStamp>;
}

/// Operating-system clocks via `clock_gettime`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsClock;

impl OsClock {
    #[cfg(unix)]
    fn clock_id(domain: ClockDomain) -> Option<libc::clockid_t> {
        match domain {
            ClockDomain::Realtime => Some(libc::CLOCK_REALTIME),
            ClockDomain::Monotonic => Some(libc::CLOCK_MONOTONIC),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClockDomain::RealtimeCoarse => Some(libc::CLOCK_REALTIME_COARSE),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClockDomain::MonotonicCoarse => Some(libc::CLOCK_MONOTONIC_COARSE),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClockDomain::MonotonicRaw => Some(libc::CLOCK_MONOTONIC_RAW),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClockDomain::Boottime => Some(libc::CLOCK_BOOTTIME),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClockDomain::Tai => Some(libc::CLOCK_TAI),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl TimeSource for OsClock {
    #[cfg(unix)]
    fn get_time(&self, domain: ClockDomain) -> Option<TimeStamp> {
        let id = Self::clock_id(domain)?;
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let rc = unsafe { libc::clock_gettime(id, &mut ts) };
        if rc != 0 {
            return None;
        }
        TimeStamp::new(ts.tv_sec as i64, ts.tv_nsec as u32)
    }

    #[cfg(not(unix))]
    fn get_time(&self, domain: ClockDomain) -> Option<TimeStamp> {
        match domain {
            ClockDomain::Realtime => system_time_ns().map(TimeStamp::from_ns),
            _ => None,
        }
    }
}

/// Realtime nanoseconds from `SystemTime`, the generic OS fallback
pub fn system_time_ns() -> Option<i64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_nanos()).ok())
}

/// Near-simultaneous reading of the three domains used for alignment
///
/// Back-to-back reads, not atomic. `None` marks an unavailable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    pub tai_ns: Option<i64>,
    pub realtime_ns: Option<i64>,
    pub monotonic_ns: Option<i64>,
}

impl ClockReading {
    /// Whether the TAI domain answered
    pub fn tai_available(&self) -> bool {
        self.tai_ns.is_some()
    }

    /// TAI − UTC in seconds (the leap-second offset, 37 s since 2017)
    ///
    /// Reads 0 when the kernel TAI offset was never set, which usually
    /// means no PTP daemon is disciplining the clock.
    pub fn tai_utc_offset_seconds(&self) -> Option<f64> {
        match (self.tai_ns, self.realtime_ns) {
            (Some(tai), Some(real)) => Some((tai - real) as f64 / 1e9),
            _ => None,
        }
    }
}

/// Clock call cost statistics in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub iterations: usize,
    pub min_ns: u64,
    pub median_ns: u64,
    pub mean_ns: f64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

/// Clock reader shared by the session and its collaborators
///
/// # Example
/// ```
/// use timedcapture_core::timing::{ClockDomain, ClockSource};
///
/// let clock = ClockSource::system();
/// assert!(clock.probe(ClockDomain::Realtime));
/// let now = clock.now_ns(ClockDomain::Realtime).unwrap();
/// assert!(now > 0);
/// ```
#[derive(Clone)]
pub struct ClockSource {
    backend: Arc<dyn TimeSource>,
}

impl ClockSource {
    /// Create a clock source over the given backend
    pub fn new(backend: Arc<dyn TimeSource>) -> Self {
        Self { backend }
    }

    /// Clock source over the operating-system clocks
    pub fn system() -> Self {
        Self::new(Arc::new(OsClock))
    }

    /// Check whether a domain can be read
    pub fn probe(&self, domain: ClockDomain) -> bool {
        self.backend.get_time(domain).is_some()
    }

    /// Read a domain
    pub fn now(&self, domain: ClockDomain) -> Result<TimeStamp, ClockUnavailable> {
        self.backend
            .get_time(domain)
            .ok_or(ClockUnavailable { domain })
    }

    /// Read a domain as nanoseconds since its epoch
    pub fn now_ns(&self, domain: ClockDomain) -> Result<i64, ClockUnavailable> {
        self.now(domain).map(|ts| ts.total_ns())
    }

    /// Read TAI, Realtime and Monotonic back to back
    pub fn now_multi(&self) -> ClockReading {
        let tai_ns = self.now_ns(ClockDomain::Tai).ok();
        let realtime_ns = self.now_ns(ClockDomain::Realtime).ok();
        let monotonic_ns = self.now_ns(ClockDomain::Monotonic).ok();
        ClockReading {
            tai_ns,
            realtime_ns,
            monotonic_ns,
        }
    }

    /// Availability of the canonical domains on this host
    pub fn availability(&self) -> Vec<(ClockDomain, bool)> {
        ClockDomain::CANONICAL
            .iter()
            .map(|&domain| (domain, self.probe(domain)))
            .collect()
    }

    /// Measure the cost of reading a domain
    ///
    /// Runs a short warm-up, then times `iterations` reads individually.
    /// Zero iterations are treated as one.
    ///
    /// # Returns
    /// Latency distribution, or [`ClockUnavailable`] if the domain cannot be read
    pub fn measure_latency(
        &self,
        domain: ClockDomain,
        iterations: usize,
    ) -> Result<LatencyStats, ClockUnavailable> {
        self.now(domain)?;
        let iterations = iterations.max(1);

        for _ in 0..LATENCY_WARMUP_CALLS {
            let _ = self.backend.get_time(domain);
        }

        let mut latencies: Vec<u64> = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            let _ = std::hint::black_box(self.backend.get_time(domain));
            latencies.push(start.elapsed().as_nanos() as u64);
        }
        latencies.sort_unstable();

        let len = latencies.len();
        let percentile = |p: f64| latencies[((len as f64 * p) as usize).min(len - 1)];
        let sum: u64 = latencies.iter().sum();

        let stats = LatencyStats {
            iterations: len,
            min_ns: latencies[0],
            median_ns: latencies[len / 2],
            mean_ns: sum as f64 / len as f64,
            p95_ns: percentile(0.95),
            p99_ns: percentile(0.99),
            max_ns: latencies[len - 1],
        };

        tracing::debug!(
            domain = %domain,
            median_ns = stats.median_ns,
            p99_ns = stats.p99_ns,
            "clock_latency_measured"
        );

        Ok(stats)
    }
}

impl fmt::Debug for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSource").finish_non_exhaustive()
    }
}

/// Hand-driven clock for deterministic tests
///
/// Each domain holds a fixed nanosecond value until set or advanced.
/// Domains never set read as unavailable.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    values: std::sync::Mutex<std::collections::HashMap<ClockDomain, i64>>,
}

#[cfg(any(test, feature = "testing"))]
impl ManualClock {
    /// Create a clock with no available domains
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a domain's current value, making it available
    pub fn set(&self, domain: ClockDomain, ns: i64) {
        self.lock().insert(domain, ns);
    }

    /// Make a domain unavailable
    pub fn remove(&self, domain: ClockDomain) {
        self.lock().remove(&domain);
    }

    /// Advance every available domain
    pub fn advance(&self, delta_ns: i64) {
        for value in self.lock().values_mut() {
            *value += delta_ns;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, std::collections::HashMap<ClockDomain, i64>> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(any(test, feature = "testing"))]
impl TimeSource for ManualClock {
    fn get_time(&self, domain: ClockDomain) -> Option<TimeStamp> {
        self.lock().get(&domain).copied().map(TimeStamp::from_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_is_available() {
        let clock = ClockSource::system();
        assert!(clock.probe(ClockDomain::Realtime));
        let ns = clock.now_ns(ClockDomain::Realtime).unwrap();
        // After 2020-01-01
        assert!(ns > 1_577_836_800_000_000_000);
    }

    #[test]
    fn test_unavailable_domain_is_typed_error() {
        let manual = Arc::new(ManualClock::new());
        manual.set(ClockDomain::Realtime, 10);
        let clock = ClockSource::new(manual);

        let err = clock.now_ns(ClockDomain::Tai).unwrap_err();
        assert_eq!(err.domain, ClockDomain::Tai);
        assert!(!clock.probe(ClockDomain::Tai));
    }

    #[test]
    fn test_monotonic_does_not_go_backwards() {
        let clock = ClockSource::system();
        let a = clock.now_ns(ClockDomain::Monotonic).unwrap();
        let b = clock.now_ns(ClockDomain::Monotonic).unwrap();
        assert!(b >= a);
    }

    #[test]
    fn test_now_multi_marks_missing_domains() {
        let manual = Arc::new(ManualClock::new());
        manual.set(ClockDomain::Realtime, 1_000);
        manual.set(ClockDomain::Monotonic, 50);
        let clock = ClockSource::new(manual);

        let reading = clock.now_multi();
        assert_eq!(reading.tai_ns, None);
        assert_eq!(reading.realtime_ns, Some(1_000));
        assert_eq!(reading.monotonic_ns, Some(50));
        assert!(!reading.tai_available());
        assert!(reading.tai_utc_offset_seconds().is_none());
    }

    #[test]
    fn test_tai_utc_offset() {
        let manual = Arc::new(ManualClock::new());
        manual.set(ClockDomain::Realtime, 1_000_000_000_000);
        manual.set(ClockDomain::Tai, 1_037_000_000_000);
        let clock = ClockSource::new(manual);

        let offset = clock.now_multi().tai_utc_offset_seconds().unwrap();
        assert!((offset - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_availability_lists_canonical_domains() {
        let availability = ClockSource::system().availability();
        assert_eq!(availability.len(), ClockDomain::CANONICAL.len());
        assert!(availability
            .iter()
            .any(|&(d, ok)| d == ClockDomain::Realtime && ok));
    }

    #[test]
    fn test_measure_latency_ordering() {
        let clock = ClockSource::system();
        let stats = clock
            .measure_latency(ClockDomain::Monotonic, 500)
            .unwrap();
        assert_eq!(stats.iterations, 500);
        assert!(stats.min_ns <= stats.median_ns);
        assert!(stats.median_ns <= stats.p95_ns);
        assert!(stats.p95_ns <= stats.p99_ns);
        assert!(stats.p99_ns <= stats.max_ns);
        assert!(stats.mean_ns >= stats.min_ns as f64);
    }

    #[test]
    fn test_measure_latency_unavailable() {
        let clock = ClockSource::new(Arc::new(ManualClock::new()));
        assert!(clock.measure_latency(ClockDomain::Tai, 10).is_err());
    }

    #[test]
    fn test_manual_clock_advance() {
        let manual = Arc::new(ManualClock::new());
        manual.set(ClockDomain::Monotonic, 100);
        manual.advance(25);
        let clock = ClockSource::new(manual.clone());
        assert_eq!(clock.now_ns(ClockDomain::Monotonic).unwrap(), 125);

        manual.remove(ClockDomain::Monotonic);
        assert!(!clock.probe(ClockDomain::Monotonic));
    }
}
