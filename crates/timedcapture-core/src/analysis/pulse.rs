//! Pulse generation, normalization and correlation
//!
//! Building blocks for round-trip delay measurement. Correlation runs in the
//! frequency domain so a 10k-sample capture against a 200-sample pulse stays
//! cheap.

use rustfft::num_complex::{Complex, Complex32};
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Normalized sinc: `sin(πx) / (πx)`, 1 at x = 0
pub fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Sinc pulse sampled at `num_samps` evenly spaced points over `[-width, width]`
///
/// Both endpoints are included. The pulse is real-valued, stored as I/Q
/// with zero quadrature, and scaled by `scale`.
///
/// # Example
/// ```
/// use timedcapture_core::analysis::generate_sinc_pulse;
///
/// let pulse = generate_sinc_pulse(201, 5.0, 0.3);
/// assert_eq!(pulse.len(), 201);
/// assert!((pulse[100].re - 0.3).abs() < 1e-6);
/// ```
pub fn generate_sinc_pulse(num_samps: usize, width: f64, scale: f32) -> Vec<Complex32> {
    match num_samps {
        0 => Vec::new(),
        1 => vec![Complex32::new(sinc(-width) as f32 * scale, 0.0)],
        n => {
            let step = 2.0 * width / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let t = -width + step * i as f64;
                    Complex32::new(sinc(t) as f32 * scale, 0.0)
                })
                .collect()
        }
    }
}

/// Complex mean of a sample slice (zero when empty)
pub fn complex_mean(samples: &[Complex32]) -> Complex32 {
    if samples.is_empty() {
        return Complex32::new(0.0, 0.0);
    }
    let sum = samples
        .iter()
        .fold(Complex::<f64>::new(0.0, 0.0), |acc, s| {
            acc + Complex::new(f64::from(s.re), f64::from(s.im))
        });
    let mean = sum / samples.len() as f64;
    Complex32::new(mean.re as f32, mean.im as f32)
}

/// Remove DC, take magnitude, and scale so the peak is 1
///
/// An all-zero (after DC removal) input stays all-zero.
pub fn normalize_samples(samples: &[Complex32]) -> Vec<f32> {
    let mean = complex_mean(samples);
    let mut magnitudes: Vec<f32> = samples.iter().map(|&s| (s - mean).norm()).collect();
    let peak = magnitudes.iter().copied().fold(0.0f32, f32::max);
    if peak > 0.0 {
        for m in &mut magnitudes {
            *m /= peak;
        }
    }
    magnitudes
}

/// Index of the first maximum, ignoring NaN
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Full linear cross-correlation via FFT
///
/// Output index `k` corresponds to lag `k - (template.len() - 1)`: entry
/// `k` is `Σ signal[n + k - (M-1)] · template[n]`, the same layout as a
/// "full"-mode correlate.
pub fn correlate_full(
    planner: &mut FftPlanner<f64>,
    signal: &[f32],
    template: &[f32],
) -> Vec<f64> {
    if signal.is_empty() || template.is_empty() {
        return Vec::new();
    }

    let n = signal.len();
    let m = template.len();
    let full_len = n + m - 1;
    let fft_size = full_len.next_power_of_two();

    let to_complex = |x: &[f32]| -> Vec<Complex<f64>> {
        x.iter()
            .map(|&v| Complex::new(f64::from(v), 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect()
    };
    let mut sig = to_complex(signal);
    let mut tpl = to_complex(template);

    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut sig);
    fft.process(&mut tpl);

    // R = S · conj(T) gives circular lag s at index s mod L
    for (s, t) in sig.iter_mut().zip(&tpl) {
        *s *= t.conj();
    }

    let ifft = planner.plan_fft_inverse(fft_size);
    ifft.process(&mut sig);

    let norm = 1.0 / fft_size as f64;
    (0..full_len)
        .map(|k| {
            let lag = k as isize - (m as isize - 1);
            let idx = lag.rem_euclid(fft_size as isize) as usize;
            sig[idx].re * norm
        })
        .collect()
}

/// Peak of the full correlation of `signal` against `template`
///
/// # Returns
/// `(offset, value)` where `offset` is the start position of `template`
/// within `signal` at the best alignment (negative when the template hangs
/// off the front), or `None` if either input is empty.
pub fn cross_correlate_peak(signal: &[f32], template: &[f32]) -> Option<(isize, f64)> {
    let mut planner = FftPlanner::new();
    correlation_peak(&mut planner, signal, template)
}

pub(crate) fn correlation_peak(
    planner: &mut FftPlanner<f64>,
    signal: &[f32],
    template: &[f32],
) -> Option<(isize, f64)> {
    let corr = correlate_full(planner, signal, template);

    let mut best: Option<(usize, f64)> = None;
    for (k, &v) in corr.iter().enumerate() {
        match best {
            Some((_, b)) if v.abs() <= b.abs() => {}
            _ => best = Some((k, v)),
        }
    }

    best.map(|(k, v)| (k as isize - (template.len() as isize - 1), v))
}
