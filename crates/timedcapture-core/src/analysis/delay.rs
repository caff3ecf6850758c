//! Round-trip delay measurement
//!
//! Locates a known transmitted pulse inside a received capture and converts
//! the peak positions into absolute times using the capture timestamps.
//!
//! # Algorithm
//!
//! ```text
//! 1. blank the first 1% of rx with its complex mean (T/R switch transient)
//! 2. normalize both: remove DC, magnitude, peak = 1
//! 3. rx_peak = argmax(rx_norm), tx_peak = argmax(tx_norm)
//! 4. alignment = argmax |corr(rx_norm, tx_norm)| - len(tx) + 1
//!    corr_peak = alignment + tx_peak
//! 5. |corr_peak - rx_peak| > len(tx) / 4  => ambiguous
//! 6. delta = (rx_start + rx_peak / rate) - (tx_start + tx_peak / rate)
//! ```
//!
//! Step 5 rejects captures where the strongest sample is not where the
//! pulse shape fits best, which is what pure noise looks like.

use super::pulse::{argmax, complex_mean, correlation_peak, normalize_samples};
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fraction of the rx capture blanked at the front (1 / N)
const BLANK_DIVISOR: usize = 100;

/// Delay measurement errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DelayError {
    #[error("empty {0} samples")]
    EmptyInput(&'static str),

    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f64),

    #[error("rx capture ({rx} samples) shorter than tx pulse ({tx} samples)")]
    LengthMismatch { tx: usize, rx: usize },

    #[error(
        "correlation peak ({correlation_index}) does not match argmax ({argmax_index}), \
         probably bad data"
    )]
    AmbiguousCorrelation {
        correlation_index: isize,
        argmax_index: usize,
    },
}

/// Result of a successful delay measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayMeasurement {
    /// rx peak time minus tx peak time
    pub time_delta_ns: i64,
    pub tx_peak_index: usize,
    pub rx_peak_index: usize,
    /// rx position of the tx peak under the best correlation alignment
    pub corr_peak_index: isize,
    pub tx_peak_time_ns: i64,
    pub rx_peak_time_ns: i64,
    /// Correlation value at the best alignment
    pub correlation_peak: f64,
}

impl DelayMeasurement {
    pub fn time_delta_us(&self) -> f64 {
        self.time_delta_ns as f64 / 1e3
    }

    pub fn time_delta_ms(&self) -> f64 {
        self.time_delta_ns as f64 / 1e6
    }

    /// Delay expressed in samples at `sample_rate`
    pub fn delta_samples(&self, sample_rate: f64) -> f64 {
        self.time_delta_ns as f64 * sample_rate / 1e9
    }
}

impl fmt::Display for DelayMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delta {:.3} us (tx peak {} @ {} ns, rx peak {} @ {} ns)",
            self.time_delta_us(),
            self.tx_peak_index,
            self.tx_peak_time_ns,
            self.rx_peak_index,
            self.rx_peak_time_ns
        )
    }
}

/// Reusable delay estimator
///
/// Keeps the FFT planner so repeated measurements with the same capture
/// sizes reuse cached plans.
pub struct DelayEstimator {
    planner: FftPlanner<f64>,
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DelayEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayEstimator").finish_non_exhaustive()
    }
}

impl DelayEstimator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Measure the delay of `tx` inside `rx`
    ///
    /// # Arguments
    /// * `tx` - Transmitted pulse
    /// * `rx` - Received capture, at least as long as `tx`
    /// * `tx_start_ns` - Time of `tx[0]`
    /// * `rx_start_ns` - Time of `rx[0]`, in the same clock domain
    /// * `sample_rate` - Sample rate shared by both, in Hz
    ///
    /// # Returns
    /// The measurement, or [`DelayError::AmbiguousCorrelation`] when the
    /// capture does not contain a clean copy of the pulse
    pub fn measure(
        &mut self,
        tx: &[Complex32],
        rx: &[Complex32],
        tx_start_ns: i64,
        rx_start_ns: i64,
        sample_rate: f64,
    ) -> Result<DelayMeasurement, DelayError> {
        if tx.is_empty() {
            return Err(DelayError::EmptyInput("tx"));
        }
        if rx.is_empty() {
            return Err(DelayError::EmptyInput("rx"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DelayError::InvalidSampleRate(sample_rate));
        }
        if rx.len() < tx.len() {
            return Err(DelayError::LengthMismatch {
                tx: tx.len(),
                rx: rx.len(),
            });
        }

        let mut rx_work = rx.to_vec();
        let blank = rx.len() / BLANK_DIVISOR;
        let mean = complex_mean(rx);
        rx_work[..blank].fill(mean);

        let rx_norm = normalize_samples(&rx_work);
        let tx_norm = normalize_samples(tx);

        let ambiguous_input = || DelayError::AmbiguousCorrelation {
            correlation_index: 0,
            argmax_index: 0,
        };
        let rx_peak_index = argmax(&rx_norm).ok_or_else(ambiguous_input)?;
        let tx_peak_index = argmax(&tx_norm).ok_or_else(ambiguous_input)?;

        let (alignment, correlation_peak) =
            correlation_peak(&mut self.planner, &rx_norm, &tx_norm).ok_or_else(ambiguous_input)?;
        let corr_peak_index = alignment + tx_peak_index as isize;

        let mismatch = (corr_peak_index - rx_peak_index as isize).unsigned_abs();
        tracing::debug!(
            rx_peak_index,
            tx_peak_index,
            corr_peak_index,
            mismatch,
            "Correlation computed"
        );
        if mismatch as f64 > tx.len() as f64 / 4.0 {
            return Err(DelayError::AmbiguousCorrelation {
                correlation_index: corr_peak_index,
                argmax_index: rx_peak_index,
            });
        }

        let tx_peak_time_ns = tx_start_ns + (tx_peak_index as f64 / sample_rate * 1e9) as i64;
        let rx_peak_time_ns = rx_start_ns + (rx_peak_index as f64 / sample_rate * 1e9) as i64;

        let measurement = DelayMeasurement {
            time_delta_ns: rx_peak_time_ns - tx_peak_time_ns,
            tx_peak_index,
            rx_peak_index,
            corr_peak_index,
            tx_peak_time_ns,
            rx_peak_time_ns,
            correlation_peak,
        };
        tracing::info!(
            time_delta_ns = measurement.time_delta_ns,
            rx_peak_index,
            "Delay measured"
        );
        Ok(measurement)
    }
}

/// One-shot [`DelayEstimator::measure`]
pub fn measure_delay(
    tx: &[Complex32],
    rx: &[Complex32],
    tx_start_ns: i64,
    rx_start_ns: i64,
    sample_rate: f64,
) -> Result<DelayMeasurement, DelayError> {
    DelayEstimator::new().measure(tx, rx, tx_start_ns, rx_start_ns, sample_rate)
}
