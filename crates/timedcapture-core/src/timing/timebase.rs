//! Synchronized time base and per-session timing context

use super::clock::{ClockDomain, ClockSource, ClockUnavailable};
use std::sync::{Arc, Mutex, PoisonError};

/// Time base aligned to an external reference
///
/// Reads one clock domain and adds an offset so that the result tracks a
/// reference time supplied by the caller (for example a timestamp from a
/// remote PTP grandmaster). The domain is resolved once at construction:
/// when the preferred domain cannot be read, Realtime is used instead.
#[derive(Debug)]
pub struct SynchronizedTimeBase {
    clock: ClockSource,
    domain: ClockDomain,
    offset_ns: Mutex<i64>,
}

impl SynchronizedTimeBase {
    /// Create a time base over `preferred`, falling back to Realtime
    pub fn new(clock: ClockSource, preferred: ClockDomain) -> Self {
        let domain = if clock.probe(preferred) {
            preferred
        } else {
            tracing::warn!(
                preferred = %preferred,
                fallback = %ClockDomain::Realtime,
                "Preferred clock domain unavailable, falling back"
            );
            ClockDomain::Realtime
        };

        Self {
            clock,
            domain,
            offset_ns: Mutex::new(0),
        }
    }

    /// Domain actually in use after fallback resolution
    pub fn domain(&self) -> ClockDomain {
        self.domain
    }

    /// Current offset between the reference and the local domain
    pub fn offset_ns(&self) -> i64 {
        *self.offset_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Align the time base so that "now" reads as `reference_ns`
    pub fn set_reference_time(&self, reference_ns: i64) -> Result<(), ClockUnavailable> {
        let mut offset = self.offset_ns.lock().unwrap_or_else(PoisonError::into_inner);
        let local = self.clock.now_ns(self.domain)?;
        *offset = reference_ns - local;
        tracing::debug!(domain = %self.domain, offset_ns = *offset, "Reference time set");
        Ok(())
    }

    /// Current time in the reference frame
    pub fn get_synchronized_ns(&self) -> Result<i64, ClockUnavailable> {
        let offset = self.offset_ns.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.clock.now_ns(self.domain)? + *offset)
    }

    /// Reference-frame time `delay_ns` from now
    pub fn schedule_ns(&self, delay_ns: i64) -> Result<i64, ClockUnavailable> {
        Ok(self.get_synchronized_ns()? + delay_ns)
    }

    /// Nanoseconds until `target_ns` in the reference frame (negative if past)
    pub fn time_until_ns(&self, target_ns: i64) -> Result<i64, ClockUnavailable> {
        Ok(target_ns - self.get_synchronized_ns()?)
    }
}

/// Clock and time base shared by one capture session and its collaborators
#[derive(Debug)]
pub struct TimingContext {
    clock: ClockSource,
    timebase: SynchronizedTimeBase,
}

impl TimingContext {
    /// Build a context whose time base prefers `preferred`
    pub fn new(clock: ClockSource, preferred: ClockDomain) -> Self {
        let timebase = SynchronizedTimeBase::new(clock.clone(), preferred);
        Self { clock, timebase }
    }

    /// Context over the OS clocks with a TAI-preferring time base
    pub fn system() -> Arc<Self> {
        Arc::new(Self::new(ClockSource::system(), ClockDomain::Tai))
    }

    pub fn clock(&self) -> &ClockSource {
        &self.clock
    }

    pub fn timebase(&self) -> &SynchronizedTimeBase {
        &self.timebase
    }
}
