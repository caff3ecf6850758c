//! Analysis module
//!
//! Pulse generation and FFT correlation for round-trip delay measurement.

pub mod delay;
pub mod pulse;

pub use delay::{measure_delay, DelayError, DelayEstimator, DelayMeasurement};
pub use pulse::{
    argmax, correlate_full, cross_correlate_peak, generate_sinc_pulse, normalize_samples, sinc,
};
