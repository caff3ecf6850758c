//! Timedcapture Core - Timed SDR streaming capture and delay measurement
//!
//! This library continuously pulls I/Q sample chunks from an SDR device on a
//! background thread, timestamps them against the system clock domains
//! (realtime, monotonic, PTP-disciplined TAI), and keeps a sliding window of
//! them in a circular buffer that concurrent readers can query by absolute
//! time. A correlation-based delay measurement validates round-trip timing.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod stats;
pub mod timing;
pub mod units;

/// Complex float32 I/Q sample
pub use rustfft::num_complex::Complex32;

pub use analysis::{measure_delay, DelayEstimator, DelayMeasurement};
pub use capture::{CircularTimestampBuffer, StreamingSession, WindowExtractor};
pub use config::CaptureConfig;
pub use timing::{ClockDomain, ClockSource, TimeStamp, TimingContext};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate (20 MS/s, HackRF maximum)
pub const DEFAULT_SAMPLE_RATE: f64 = 20e6;

/// Default center frequency in Hz
pub const DEFAULT_CENTER_FREQ: f64 = 100e6;

/// Default buffer retention in seconds
pub const DEFAULT_BUFFER_DURATION_SECS: f64 = 10.0;

/// Default samples per device read
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
