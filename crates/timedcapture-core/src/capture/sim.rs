//! Simulated SDR driver
//!
//! Produces a deterministic tone plus noise at the configured sample rate.
//! The device-side FIFO is a lock-free ring buffer: in real-time pacing the
//! "hardware" fills it as wall-clock time passes, and if the host does not
//! drain it fast enough the excess is dropped and the next read reports an
//! overflow, the way USB radios behave.
//!
//! Faults can be scripted for tests (open/activate failures, fatal read
//! errors, periodic overflows, stalled streams, failing gain setters).

use super::device::{
    flags, DeviceDriver, DeviceError, ReadResult, SampleFormat, SdrDevice, StreamDirection,
    StreamError, StreamHandle,
};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex32;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default device FIFO capacity in samples
pub const DEFAULT_FIFO_CAPACITY: usize = 1 << 20;

/// Shortest sleep while waiting for the FIFO to fill
const MIN_POLL: Duration = Duration::from_micros(100);

/// How samples are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Samples accrue with wall-clock time at the sample rate
    RealTime,
    /// Every read is satisfied immediately
    Unthrottled,
}

/// Simulated device behavior
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub pacing: Pacing,
    /// Gain element names the device reports
    pub gain_stages: Vec<String>,
    pub antennas: Vec<String>,
    pub tone_freq_hz: f64,
    pub tone_amplitude: f32,
    pub noise_amplitude: f32,
    pub seed: u32,
    pub fifo_capacity: usize,
    /// Attach sample-counter timestamps to reads
    pub hardware_timestamps: bool,
    /// `open` fails with this message
    pub fail_open: Option<String>,
    /// `activate` fails with this message
    pub fail_activate: Option<String>,
    /// Reads after this many return a fatal device error
    pub fatal_after_reads: Option<usize>,
    /// Reads after this many panic inside the driver
    pub panic_after_reads: Option<usize>,
    /// Every Nth read reports an overflow
    pub overflow_every: Option<usize>,
    /// Stream never delivers samples; every read times out
    pub stalled: bool,
    /// Individual gain setters fail
    pub fail_gain_setters: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::RealTime,
            gain_stages: vec!["AMP".to_string(), "LNA".to_string(), "VGA".to_string()],
            antennas: vec!["TX/RX".to_string()],
            tone_freq_hz: 100e3,
            tone_amplitude: 0.5,
            noise_amplitude: 0.05,
            seed: 0x5eed,
            fifo_capacity: DEFAULT_FIFO_CAPACITY,
            hardware_timestamps: true,
            fail_open: None,
            fail_activate: None,
            fatal_after_reads: None,
            panic_after_reads: None,
            overflow_every: None,
            stalled: false,
            fail_gain_setters: false,
        }
    }
}

/// Lifecycle counters shared between a driver and the devices it opens
#[derive(Debug, Default)]
pub struct SimulatedStats {
    opens: AtomicUsize,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
}

impl SimulatedStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

/// Driver that opens [`SimulatedDevice`]s
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    config: SimulatedConfig,
    stats: Arc<SimulatedStats>,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            stats: Arc::new(SimulatedStats::default()),
        }
    }

    /// Counters across every device this driver opened
    pub fn stats(&self) -> Arc<SimulatedStats> {
        self.stats.clone()
    }
}

impl DeviceDriver for SimulatedDriver {
    fn open(&self, args: &str) -> Result<Box<dyn SdrDevice>, DeviceError> {
        if let Some(message) = &self.config.fail_open {
            return Err(DeviceError::Open(message.clone()));
        }
        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(args, "Simulated device opened");
        Ok(Box::new(SimulatedDevice::with_stats(
            self.config.clone(),
            self.stats.clone(),
        )))
    }
}

/// Deterministic tone + LCG noise source
#[derive(Debug, Clone)]
struct SignalGenerator {
    index: u64,
    noise_state: u32,
}

impl SignalGenerator {
    fn new(seed: u32) -> Self {
        Self {
            index: 0,
            noise_state: seed,
        }
    }

    fn noise(&mut self) -> f32 {
        self.noise_state = self
            .noise_state
            .wrapping_mul(1103515245)
            .wrapping_add(12345);
        let bits = (self.noise_state >> 16) & 0x7FFF;
        (bits as f32 / 16384.0) - 1.0
    }

    fn fill(&mut self, out: &mut [Complex32], config: &SimulatedConfig, sample_rate: f64) {
        let step = 2.0 * PI * config.tone_freq_hz / sample_rate;
        for sample in out.iter_mut() {
            let phase = step * self.index as f64;
            let tone = Complex32::new(phase.cos() as f32, phase.sin() as f32)
                * config.tone_amplitude;
            let noise = Complex32::new(self.noise(), self.noise()) * config.noise_amplitude;
            *sample = tone + noise;
            self.index += 1;
        }
    }

    fn skip(&mut self, count: u64) {
        self.index += count;
    }
}

/// In-process SDR stand-in
pub struct SimulatedDevice {
    config: SimulatedConfig,
    stats: Arc<SimulatedStats>,
    sample_rate: f64,
    center_freq: f64,
    gains: HashMap<String, f64>,
    overall_gain: Option<f64>,
    antenna: Option<String>,
    stream: Option<StreamHandle>,
    active: bool,
    producer: HeapProd<Complex32>,
    consumer: HeapCons<Complex32>,
    generator: SignalGenerator,
    activated_at: Option<Instant>,
    produced: u64,
    consumed: u64,
    reads: usize,
    overflow_pending: bool,
    dropped: u64,
    scratch: Vec<Complex32>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatedConfig) -> Self {
        Self::with_stats(config, Arc::new(SimulatedStats::default()))
    }

    fn with_stats(config: SimulatedConfig, stats: Arc<SimulatedStats>) -> Self {
        let ring = HeapRb::<Complex32>::new(config.fifo_capacity.max(1));
        let (producer, consumer) = ring.split();
        let generator = SignalGenerator::new(config.seed);
        Self {
            config,
            stats,
            sample_rate: 0.0,
            center_freq: 0.0,
            gains: HashMap::new(),
            overall_gain: None,
            antenna: None,
            stream: None,
            active: false,
            producer,
            consumer,
            generator,
            activated_at: None,
            produced: 0,
            consumed: 0,
            reads: 0,
            overflow_pending: false,
            dropped: 0,
            scratch: Vec::new(),
        }
    }

    /// Last value set on a gain element
    pub fn gain(&self, stage: &str) -> Option<f64> {
        self.gains.get(stage).copied()
    }

    pub fn overall_gain(&self) -> Option<f64> {
        self.overall_gain
    }

    pub fn antenna(&self) -> Option<&str> {
        self.antenna.as_deref()
    }

    pub fn center_freq(&self) -> f64 {
        self.center_freq
    }

    /// Samples discarded because the FIFO was full
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    /// Move samples the "hardware" has produced since activation into the FIFO
    fn refill_real_time(&mut self) {
        let Some(activated_at) = self.activated_at else {
            return;
        };
        let due_total = (activated_at.elapsed().as_secs_f64() * self.sample_rate) as u64;
        let due = due_total.saturating_sub(self.produced);
        if due == 0 {
            return;
        }

        let vacant = self.producer.vacant_len() as u64;
        let fits = due.min(vacant) as usize;
        self.push_generated(fits);

        if due > vacant {
            let lost = due - vacant;
            self.generator.skip(lost);
            self.dropped += lost;
            self.overflow_pending = true;
        }
        self.produced += due;
    }

    fn push_generated(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.scratch.resize(count, Complex32::new(0.0, 0.0));
        self.generator
            .fill(&mut self.scratch, &self.config, self.sample_rate);
        self.producer.push_slice(&self.scratch);
    }

    fn pop_into(&mut self, buf: &mut [Complex32]) -> ReadResult {
        let first_index = self.consumed;
        let count = self.consumer.pop_slice(buf);
        self.consumed += count as u64;

        let timestamp_ns = self
            .config
            .hardware_timestamps
            .then(|| (first_index as f64 * 1e9 / self.sample_rate) as i64);
        ReadResult {
            count,
            timestamp_ns,
            flags: if timestamp_ns.is_some() { flags::HAS_TIME } else { 0 },
        }
    }

    fn read_real_time(
        &mut self,
        buf: &mut [Complex32],
        timeout: Duration,
    ) -> Result<ReadResult, StreamError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.refill_real_time();
            if self.overflow_pending {
                self.overflow_pending = false;
                return Err(StreamError::Overflow);
            }

            let available = self.consumer.occupied_len();
            let now = Instant::now();
            if available >= buf.len() || (available > 0 && now >= deadline) {
                return Ok(self.pop_into(buf));
            }
            if now >= deadline {
                return Err(StreamError::Timeout);
            }

            let missing = (buf.len() - available) as f64;
            let wait = Duration::from_secs_f64(missing / self.sample_rate)
                .min(deadline - now)
                .max(MIN_POLL);
            std::thread::sleep(wait);
        }
    }

    fn read_unthrottled(&mut self, buf: &mut [Complex32]) -> ReadResult {
        let wanted = buf.len().saturating_sub(self.consumer.occupied_len());
        let fits = wanted.min(self.producer.vacant_len());
        self.push_generated(fits);
        self.produced += fits as u64;
        self.pop_into(buf)
    }
}

impl SdrDevice for SimulatedDevice {
    fn configure(&mut self, sample_rate: f64, center_freq: f64) -> Result<(), DeviceError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DeviceError::Config(format!(
                "unsupported sample rate {sample_rate}"
            )));
        }
        self.sample_rate = sample_rate;
        self.center_freq = center_freq;
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn list_gain_stages(&self) -> Vec<String> {
        self.config.gain_stages.clone()
    }

    fn set_gain(&mut self, stage: &str, value_db: f64) -> Result<(), DeviceError> {
        if self.config.fail_gain_setters {
            return Err(DeviceError::Config(format!("cannot set {stage}")));
        }
        self.gains.insert(stage.to_string(), value_db);
        Ok(())
    }

    fn set_overall_gain(&mut self, value_db: f64) -> Result<(), DeviceError> {
        self.overall_gain = Some(value_db);
        Ok(())
    }

    fn set_antenna(&mut self, name: &str) -> Result<(), DeviceError> {
        if !self.config.antennas.iter().any(|a| a == name) {
            return Err(DeviceError::Config(format!("unknown antenna {name}")));
        }
        self.antenna = Some(name.to_string());
        Ok(())
    }

    fn setup_stream(
        &mut self,
        direction: StreamDirection,
        _format: SampleFormat,
        channels: &[usize],
    ) -> Result<StreamHandle, DeviceError> {
        if direction != StreamDirection::Rx {
            return Err(DeviceError::Config("only RX streams are simulated".to_string()));
        }
        if channels != [0] {
            return Err(DeviceError::Config(format!(
                "unsupported channels {channels:?}"
            )));
        }
        let handle = StreamHandle(1);
        self.stream = Some(handle);
        Ok(handle)
    }

    fn activate(&mut self, stream: StreamHandle) -> Result<(), DeviceError> {
        if self.stream != Some(stream) {
            return Err(DeviceError::Io("unknown stream handle".to_string()));
        }
        if let Some(message) = &self.config.fail_activate {
            return Err(DeviceError::Io(message.clone()));
        }
        if self.sample_rate <= 0.0 {
            return Err(DeviceError::Config("device not configured".to_string()));
        }
        self.active = true;
        self.activated_at = Some(Instant::now());
        self.produced = 0;
        self.stats.activations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read(
        &mut self,
        stream: StreamHandle,
        buf: &mut [Complex32],
        timeout: Duration,
    ) -> Result<ReadResult, StreamError> {
        if !self.active || self.stream != Some(stream) {
            return Err(StreamError::Device {
                code: -2,
                message: "stream not active".to_string(),
            });
        }

        self.reads += 1;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(limit) = self.config.panic_after_reads {
            if self.reads > limit {
                panic!("simulated driver fault after {limit} reads");
            }
        }
        if let Some(limit) = self.config.fatal_after_reads {
            if self.reads > limit {
                return Err(StreamError::Device {
                    code: -1,
                    message: "simulated device failure".to_string(),
                });
            }
        }
        if let Some(every) = self.config.overflow_every {
            if every > 0 && self.reads % every == 0 {
                return Err(StreamError::Overflow);
            }
        }
        if self.config.stalled {
            std::thread::sleep(timeout);
            return Err(StreamError::Timeout);
        }
        if buf.is_empty() {
            return Ok(ReadResult {
                count: 0,
                timestamp_ns: None,
                flags: 0,
            });
        }

        match self.config.pacing {
            Pacing::RealTime => self.read_real_time(buf, timeout),
            Pacing::Unthrottled => Ok(self.read_unthrottled(buf)),
        }
    }

    fn deactivate(&mut self, stream: StreamHandle) -> Result<(), DeviceError> {
        if self.stream != Some(stream) {
            return Err(DeviceError::Io("unknown stream handle".to_string()));
        }
        self.active = false;
        self.activated_at = None;
        self.stats.deactivations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.stream = None;
        self.active = false;
        self.stats.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_device(config: SimulatedConfig, rate: f64) -> (SimulatedDevice, StreamHandle) {
        let mut dev = SimulatedDevice::new(config);
        dev.configure(rate, 100e6).unwrap();
        let stream = dev
            .setup_stream(StreamDirection::Rx, SampleFormat::ComplexF32, &[0])
            .unwrap();
        dev.activate(stream).unwrap();
        (dev, stream)
    }

    #[test]
    fn test_unthrottled_fills_request() {
        let config = SimulatedConfig {
            pacing: Pacing::Unthrottled,
            ..SimulatedConfig::default()
        };
        let (mut dev, stream) = active_device(config, 1e6);
        let mut buf = vec![Complex32::new(0.0, 0.0); 1024];
        let result = dev.read(stream, &mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(result.count, 1024);
        assert_eq!(result.timestamp_ns, Some(0));
        assert!(buf.iter().any(|s| s.norm() > 0.1));

        let result = dev.read(stream, &mut buf, Duration::from_millis(10)).unwrap();
        // 1024 samples at 1 MS/s
        assert_eq!(result.timestamp_ns, Some(1_024_000));
    }

    #[test]
    fn test_real_time_read_waits_for_samples() {
        let (mut dev, stream) = active_device(SimulatedConfig::default(), 1e6);
        let mut buf = vec![Complex32::new(0.0, 0.0); 2_000];
        let start = Instant::now();
        let result = dev.read(stream, &mut buf, Duration::from_millis(500)).unwrap();
        assert_eq!(result.count, 2_000);
        // 2000 samples at 1 MS/s need ~2 ms of device time
        assert!(start.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn test_full_fifo_reports_overflow() {
        let config = SimulatedConfig {
            fifo_capacity: 64,
            ..SimulatedConfig::default()
        };
        let (mut dev, stream) = active_device(config, 1e6);
        std::thread::sleep(Duration::from_millis(5));
        let mut buf = vec![Complex32::new(0.0, 0.0); 16];
        let err = dev.read(stream, &mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, StreamError::Overflow);
        assert!(dev.dropped_samples() > 0);
    }

    #[test]
    fn test_scripted_overflow() {
        let config = SimulatedConfig {
            pacing: Pacing::Unthrottled,
            overflow_every: Some(2),
            ..SimulatedConfig::default()
        };
        let (mut dev, stream) = active_device(config, 1e6);
        let mut buf = vec![Complex32::new(0.0, 0.0); 16];
        assert!(dev.read(stream, &mut buf, Duration::from_millis(1)).is_ok());
        assert_eq!(
            dev.read(stream, &mut buf, Duration::from_millis(1)),
            Err(StreamError::Overflow)
        );
        assert!(dev.read(stream, &mut buf, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_stalled_stream_times_out() {
        let config = SimulatedConfig {
            stalled: true,
            ..SimulatedConfig::default()
        };
        let (mut dev, stream) = active_device(config, 1e6);
        let mut buf = vec![Complex32::new(0.0, 0.0); 16];
        let err = dev.read(stream, &mut buf, Duration::from_millis(2)).unwrap_err();
        assert_eq!(err, StreamError::Timeout);
    }

    #[test]
    fn test_fatal_after_reads() {
        let config = SimulatedConfig {
            pacing: Pacing::Unthrottled,
            fatal_after_reads: Some(1),
            ..SimulatedConfig::default()
        };
        let (mut dev, stream) = active_device(config, 1e6);
        let mut buf = vec![Complex32::new(0.0, 0.0); 16];
        assert!(dev.read(stream, &mut buf, Duration::from_millis(1)).is_ok());
        assert!(matches!(
            dev.read(stream, &mut buf, Duration::from_millis(1)),
            Err(StreamError::Device { code: -1, .. })
        ));
    }

    #[test]
    fn test_read_requires_active_stream() {
        let mut dev = SimulatedDevice::new(SimulatedConfig::default());
        let mut buf = vec![Complex32::new(0.0, 0.0); 4];
        assert!(matches!(
            dev.read(StreamHandle(1), &mut buf, Duration::from_millis(1)),
            Err(StreamError::Device { .. })
        ));
    }

    #[test]
    fn test_configure_rejects_bad_rate() {
        let mut dev = SimulatedDevice::new(SimulatedConfig::default());
        assert!(matches!(
            dev.configure(0.0, 1e6),
            Err(DeviceError::Config(_))
        ));
    }

    #[test]
    fn test_driver_counts_lifecycle() {
        let driver = SimulatedDriver::new(SimulatedConfig::default());
        let mut dev = driver.open("driver=sim").unwrap();
        dev.configure(1e6, 1e6).unwrap();
        let stream = dev
            .setup_stream(StreamDirection::Rx, SampleFormat::ComplexF32, &[0])
            .unwrap();
        dev.activate(stream).unwrap();
        dev.deactivate(stream).unwrap();
        dev.close().unwrap();

        let stats = driver.stats();
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.activations(), 1);
        assert_eq!(stats.deactivations(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_driver_open_failure() {
        let driver = SimulatedDriver::new(SimulatedConfig {
            fail_open: Some("no device".to_string()),
            ..SimulatedConfig::default()
        });
        assert!(matches!(
            driver.open("driver=hackrf"),
            Err(DeviceError::Open(msg)) if msg == "no device"
        ));
    }

    #[test]
    fn test_antenna_selection() {
        let mut dev = SimulatedDevice::new(SimulatedConfig::default());
        dev.set_antenna("TX/RX").unwrap();
        assert_eq!(dev.antenna(), Some("TX/RX"));
        assert!(dev.set_antenna("RX2").is_err());
    }
}
