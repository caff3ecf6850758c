//! SDR device capability surface
//!
//! The capture engine treats the radio as an opaque capability:
//! open, configure, stream, read, close. Protocol details live behind
//! these traits.

use rustfft::num_complex::Complex32;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Device open / configure / I/O errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Device configuration error: {0}")]
    Config(String),

    #[error("Device I/O error: {0}")]
    Io(String),
}

/// Errors from a single stream read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No samples arrived within the read timeout
    #[error("stream read timed out")]
    Timeout,

    /// The device dropped samples because the host did not keep up
    #[error("stream overflow")]
    Overflow,

    /// Any other driver error, fatal to the session
    #[error("stream error {code}: {message}")]
    Device { code: i32, message: String },
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Rx,
    Tx,
}

/// Host-side sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Complex float32 (CF32)
    ComplexF32,
}

/// Opaque handle returned by [`SdrDevice::setup_stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u32);

/// Stream read flags
pub mod flags {
    /// The driver supplied a hardware timestamp
    pub const HAS_TIME: u32 = 1 << 2;
    /// End of a burst
    pub const END_BURST: u32 = 1 << 1;
}

/// Successful stream read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    /// Number of samples written into the caller's buffer
    pub count: usize,
    /// Hardware timestamp, when the driver supplies one
    pub timestamp_ns: Option<i64>,
    pub flags: u32,
}

/// Factory for devices (the driver registry)
pub trait DeviceDriver: Send + Sync {
    /// Open a device from a driver argument string such as `driver=hackrf`
    fn open(&self, args: &str) -> Result<Box<dyn SdrDevice>, DeviceError>;
}

/// An open SDR device
///
/// Owned by one thread at a time; moved into the read loop once streaming.
pub trait SdrDevice: Send {
    /// Apply RX sample rate and center frequency
    fn configure(&mut self, sample_rate: f64, center_freq: f64) -> Result<(), DeviceError>;

    /// Sample rate actually in effect
    fn sample_rate(&self) -> f64;

    /// Names of the RX gain elements
    fn list_gain_stages(&self) -> Vec<String>;

    /// Set one named gain element in dB
    fn set_gain(&mut self, stage: &str, value_db: f64) -> Result<(), DeviceError>;

    /// Set the overall gain in dB, distributed by the driver
    fn set_overall_gain(&mut self, value_db: f64) -> Result<(), DeviceError>;

    /// Select the RX antenna
    fn set_antenna(&mut self, name: &str) -> Result<(), DeviceError>;

    fn setup_stream(
        &mut self,
        direction: StreamDirection,
        format: SampleFormat,
        channels: &[usize],
    ) -> Result<StreamHandle, DeviceError>;

    fn activate(&mut self, stream: StreamHandle) -> Result<(), DeviceError>;

    /// Read up to `buf.len()` samples, waiting at most `timeout`
    fn read(
        &mut self,
        stream: StreamHandle,
        buf: &mut [Complex32],
        timeout: Duration,
    ) -> Result<ReadResult, StreamError>;

    fn deactivate(&mut self, stream: StreamHandle) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

impl fmt::Debug for dyn SdrDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdrDevice")
            .field("sample_rate", &self.sample_rate())
            .finish_non_exhaustive()
    }
}

/// Bounded read timeout for a chunk: twice the chunk span, at least 1 ms
pub fn read_timeout(chunk_size: usize, sample_rate: f64) -> Duration {
    let floor = Duration::from_millis(1);
    if sample_rate <= 0.0 || !sample_rate.is_finite() {
        return floor;
    }
    let secs = 2.0 * chunk_size as f64 / sample_rate;
    Duration::from_secs_f64(secs).max(floor)
}
