//! Timedcapture - Timed SDR streaming capture
//!
//! This library re-exports the capture engine, clock abstraction and delay
//! measurement from `timedcapture-core`.

pub use timedcapture_core::analysis;
pub use timedcapture_core::capture;
pub use timedcapture_core::config;
pub use timedcapture_core::stats;
pub use timedcapture_core::timing;
pub use timedcapture_core::units;

pub use timedcapture_core::{
    measure_delay, Complex32, CaptureConfig, CircularTimestampBuffer, ClockDomain, ClockSource,
    DelayEstimator, DelayMeasurement, StreamingSession, TimeStamp, TimingContext,
    WindowExtractor,
};
pub use timedcapture_core::{
    DEFAULT_BUFFER_DURATION_SECS, DEFAULT_CENTER_FREQ, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE,
    VERSION,
};
