//! Timing module
//!
//! Multi-domain clock reads, nanosecond timestamps and a synchronized
//! time base for aligning captures to an external reference.

pub mod clock;
pub mod timebase;
pub mod timestamp;

#[cfg(any(test, feature = "testing"))]
pub use clock::ManualClock;
pub use clock::{
    system_time_ns, ClockDomain, ClockReading, ClockSource, ClockUnavailable, LatencyStats,
    OsClock, TimeSource,
};
pub use timebase::{SynchronizedTimeBase, TimingContext};
pub use timestamp::{TimeStamp, NANOS_PER_SEC};
