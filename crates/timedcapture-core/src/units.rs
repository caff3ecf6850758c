//! Human-readable formatting for frequencies, rates and durations

/// Format a frequency in Hz with an SI prefix
///
/// # Example
/// ```
/// use timedcapture_core::units::format_frequency;
///
/// assert_eq!(format_frequency(2.4e9), "2.400 GHz");
/// assert_eq!(format_frequency(100e6), "100.000 MHz");
/// ```
pub fn format_frequency(hz: f64) -> String {
    let abs = hz.abs();
    if abs >= 1e9 {
        format!("{:.3} GHz", hz / 1e9)
    } else if abs >= 1e6 {
        format!("{:.3} MHz", hz / 1e6)
    } else if abs >= 1e3 {
        format!("{:.3} kHz", hz / 1e3)
    } else {
        format!("{hz:.1} Hz")
    }
}

/// Format a sample rate in samples per second
pub fn format_sample_rate(rate: f64) -> String {
    let abs = rate.abs();
    if abs >= 1e6 {
        format!("{:.3} MSPS", rate / 1e6)
    } else if abs >= 1e3 {
        format!("{:.3} kSPS", rate / 1e3)
    } else {
        format!("{rate:.1} SPS")
    }
}

/// Format a nanosecond duration in the largest unit that keeps it above 1
pub fn format_duration_ns(ns: i64) -> String {
    let abs = ns.unsigned_abs();
    let value = ns as f64;
    if abs >= 1_000_000_000 {
        format!("{:.3} s", value / 1e9)
    } else if abs >= 1_000_000 {
        format!("{:.3} ms", value / 1e6)
    } else if abs >= 1_000 {
        format!("{:.3} us", value / 1e3)
    } else {
        format!("{ns} ns")
    }
}
