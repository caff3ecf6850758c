//! Streaming session
//!
//! Owns the device and a background read loop that pulls fixed-size chunks,
//! timestamps each one before the read in the configured clock domain, and
//! appends it to the shared circular buffer.
//!
//! The device is opened, configured and activated on the caller's thread so
//! setup errors come back from [`StreamingSession::start`]. It is then moved
//! into the read-loop thread, which deactivates and closes it on exit.

use super::buffer::{BufferInfo, CircularTimestampBuffer, Window};
use super::device::{
    read_timeout, DeviceDriver, DeviceError, SampleFormat, SdrDevice, StreamDirection,
    StreamError, StreamHandle,
};
use super::gain::{apply_gains, GainOutcome};
use crate::config::{CaptureConfig, ConfigError};
use crate::stats::{CounterSnapshot, OverflowEvent, SessionCounters};
use crate::timing::{system_time_ns, ClockDomain, TimingContext};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rustfft::num_complex::Complex32;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by session control
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Failed to spawn read loop: {0}")]
    Spawn(String),

    #[error("Previous read loop has not released the device yet")]
    PreviousLoopAlive,
}

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Starting => f.write_str("starting"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopping => f.write_str("stopping"),
            SessionState::Stopped => f.write_str("stopped"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Snapshot of session health
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub counters: CounterSnapshot,
    pub buffer: BufferInfo,
}

/// State shared between the control side and the read loop
#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    counters: SessionCounters,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        transition(&mut self.state(), next);
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    if *state != next {
        let from = state.to_string();
        tracing::info!(from = %from, to = %next, "Session state changed");
        *state = next;
    }
}

/// Handle to a read-loop thread, kept until the thread is joined
struct Worker {
    /// Stop request for this loop only; never reset once set
    stop: Arc<AtomicBool>,
    /// Disconnects when the loop has released the device and exited
    done: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Continuous capture from one SDR device into a time-bounded buffer
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use timedcapture_core::capture::{SimulatedConfig, SimulatedDriver, StreamingSession};
/// use timedcapture_core::config::CaptureConfig;
/// use timedcapture_core::timing::TimingContext;
///
/// let driver = SimulatedDriver::new(SimulatedConfig::default());
/// let config = CaptureConfig {
///     sample_rate: 1e6,
///     chunk_size: 1024,
///     ..CaptureConfig::default()
/// };
/// let session = StreamingSession::new(config, Arc::new(driver), TimingContext::system());
///
/// session.start().unwrap();
/// assert!(session.wait_for_data(Duration::from_secs(2)));
/// session.stop();
/// assert!(session.get_buffer_info().total_samples > 0);
/// ```
pub struct StreamingSession {
    config: CaptureConfig,
    driver: Arc<dyn DeviceDriver>,
    timing: Arc<TimingContext>,
    buffer: Arc<CircularTimestampBuffer>,
    shared: Arc<Shared>,
    started: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<Worker>>,
}

impl StreamingSession {
    /// Create an idle session; the buffer is allocated here
    pub fn new(
        config: CaptureConfig,
        driver: Arc<dyn DeviceDriver>,
        timing: Arc<TimingContext>,
    ) -> Self {
        let buffer = Arc::new(CircularTimestampBuffer::new(config.buffer_duration()));
        Self {
            config,
            driver,
            timing,
            buffer,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                counters: SessionCounters::new(),
            }),
            started: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Open the device and start the read loop
    ///
    /// No-op while already starting or running. A stopped or failed session
    /// can be started again; the buffer keeps its contents. If a previous
    /// loop still holds its device after one join timeout, the start is
    /// refused with [`SessionError::PreviousLoopAlive`].
    pub fn start(&self) -> Result<(), SessionError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if self.shared.state().is_running() {
            tracing::debug!("Session already running");
            return Ok(());
        }

        self.config.validate()?;

        // A loop that exited on its own, or was detached by `stop`, still
        // needs joining before another one may own a device
        if let Some(previous) = worker.take() {
            if let Some(alive) = reap(previous, self.config.join_timeout()) {
                tracing::warn!("Previous read loop still running, refusing to start");
                *worker = Some(alive);
                return Err(SessionError::PreviousLoopAlive);
            }
        }

        self.shared.set_state(SessionState::Starting);
        tracing::info!(
            device = %self.config.device_args,
            sample_rate = self.config.sample_rate,
            center_freq = self.config.center_freq,
            "Starting streaming session"
        );

        let mut device = match self.driver.open(&self.config.device_args) {
            Ok(device) => device,
            Err(e) => return Err(self.fail_start(e)),
        };

        let (stream, actual_rate) = match self.prepare_device(device.as_mut()) {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(close_err) = device.close() {
                    tracing::warn!(error = %close_err, "Failed to close device after setup error");
                }
                return Err(self.fail_start(e));
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let read_loop = ReadLoop {
            device,
            stream,
            buffer: Arc::clone(&self.buffer),
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
            timing: Arc::clone(&self.timing),
            domain: self.config.timestamp_domain,
            chunk_size: self.config.chunk_size,
            timeout: read_timeout(self.config.chunk_size, actual_rate),
        };

        self.shared.set_state(SessionState::Running);

        let spawned = std::thread::Builder::new()
            .name("timedcapture-reader".into())
            .spawn(move || read_loop.run_guarded(started_tx, done_tx));

        match spawned {
            Ok(thread) => {
                *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(started_rx);
                *worker = Some(Worker {
                    stop,
                    done: done_rx,
                    thread,
                });
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(error = %reason, "Failed to spawn read loop");
                self.shared.set_state(SessionState::Failed(reason.clone()));
                Err(SessionError::Spawn(reason))
            }
        }
    }

    /// Configure, set gains and activate the RX stream
    fn prepare_device(
        &self,
        device: &mut dyn SdrDevice,
    ) -> Result<(StreamHandle, f64), DeviceError> {
        device.configure(self.config.sample_rate, self.config.center_freq)?;
        let actual_rate = device.sample_rate();
        tracing::info!(
            requested = self.config.sample_rate,
            actual = actual_rate,
            "Sample rate configured"
        );

        let outcome = apply_gains(device, &self.config.gains);
        if let GainOutcome::DeviceDefaults {
            reason: Some(reason),
        } = &outcome
        {
            tracing::warn!(reason = %reason, "Gain configuration degraded to device defaults");
        }

        if let Some(antenna) = &self.config.antenna {
            match device.set_antenna(antenna) {
                Ok(()) => tracing::info!(antenna = %antenna, "Antenna selected"),
                Err(e) => tracing::warn!(antenna = %antenna, error = %e, "Could not set antenna"),
            }
        }

        let stream = device.setup_stream(StreamDirection::Rx, SampleFormat::ComplexF32, &[0])?;
        device.activate(stream)?;
        Ok((stream, actual_rate))
    }

    fn fail_start(&self, error: DeviceError) -> SessionError {
        tracing::error!(error = %error, "Failed to start streaming session");
        self.shared.set_state(SessionState::Failed(error.to_string()));
        SessionError::Device(error)
    }

    /// Stop the read loop and wait for it to release the device
    ///
    /// Waits at most the configured join timeout. A loop that does not exit
    /// in time keeps running until its current read returns; the session
    /// stays `Stopping` until that loop has released the device, then moves
    /// to `Stopped` on its own. No-op when nothing is running. A failed
    /// session stays failed.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = worker.take() else {
            return;
        };

        {
            let mut state = self.shared.state();
            if state.is_running() {
                transition(&mut state, SessionState::Stopping);
            }
        }
        current.stop.store(true, Ordering::SeqCst);

        if let Some(alive) = reap(current, self.config.join_timeout()) {
            *worker = Some(alive);
            return;
        }

        {
            let mut state = self.shared.state();
            if !state.is_failed() {
                transition(&mut state, SessionState::Stopped);
            }
        }
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let counters = self.shared.counters.snapshot();
        tracing::info!(
            chunks = counters.chunks,
            samples = counters.samples,
            timeouts = counters.timeouts,
            overflows = counters.overflows,
            "Streaming session stopped"
        );
    }

    /// Alias of [`start`](Self::start)
    pub fn start_streaming(&self) -> Result<(), SessionError> {
        self.start()
    }

    /// Alias of [`stop`](Self::stop)
    pub fn stop_streaming(&self) {
        self.stop()
    }

    /// Wait until the read loop has started and the buffer holds data
    ///
    /// Returns `false` if `timeout` elapses first, or if the session is not
    /// running and the buffer is empty. Wake latency is about one poll
    /// interval.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let started = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(started) = started {
            if let Err(RecvTimeoutError::Timeout) = started.recv_deadline(deadline) {
                return false;
            }
        }

        let poll = self.config.poll_interval().max(Duration::from_millis(1));
        loop {
            if !self.buffer.is_empty() {
                return true;
            }
            if !self.shared.state().is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(poll.min(deadline - now));
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state().clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            counters: self.shared.counters.snapshot(),
            buffer: self.buffer.get_buffer_info(),
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Recent device overflows, oldest first
    pub fn overflow_events(&self) -> Vec<OverflowEvent> {
        self.shared.counters.overflow_events()
    }

    pub fn get_buffer_info(&self) -> BufferInfo {
        self.buffer.get_buffer_info()
    }

    /// Samples from chunks timestamped within `[start_ns, end_ns]`
    pub fn get_samples_in_range(&self, start_ns: i64, end_ns: i64) -> Window {
        self.buffer.query_range(start_ns, end_ns)
    }

    /// Shared handle to the sample buffer; stays valid after the session ends
    pub fn buffer(&self) -> Arc<CircularTimestampBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn timing(&self) -> &Arc<TimingContext> {
        &self.timing
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("state", &self.state())
            .field("device_args", &self.config.device_args)
            .field("buffer", &self.buffer.get_buffer_info())
            .finish_non_exhaustive()
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for a loop to finish and join it
///
/// Returns the worker back if it is still running after `timeout`.
fn reap(worker: Worker, timeout: Duration) -> Option<Worker> {
    match worker.done.recv_timeout(timeout) {
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Read loop did not exit in time, leaving it to finish"
            );
            Some(worker)
        }
        _ => {
            if worker.thread.join().is_err() {
                tracing::warn!("Read loop thread terminated abnormally");
            }
            None
        }
    }
}

/// The producer side: owns the device for the life of the thread
struct ReadLoop {
    device: Box<dyn SdrDevice>,
    stream: StreamHandle,
    buffer: Arc<CircularTimestampBuffer>,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    timing: Arc<TimingContext>,
    domain: ClockDomain,
    chunk_size: usize,
    timeout: Duration,
}

impl ReadLoop {
    /// Run the loop, converting a panic into a failed session
    fn run_guarded(mut self, started: Sender<()>, done: Sender<()>) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.run(started)));

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(panic = %msg, "Read loop PANICKED");
                Some(format!("read loop panicked: {msg}"))
            }
        };

        if failure.is_some() {
            self.shared.set_state(SessionState::Stopping);
        }
        self.release();
        match failure {
            Some(reason) => self.shared.set_state(SessionState::Failed(reason)),
            None => {
                // Finishes a stop whose join timed out
                let mut state = self.shared.state();
                if *state == SessionState::Stopping {
                    transition(&mut state, SessionState::Stopped);
                }
                tracing::info!("Read loop exited normally");
            }
        }
        drop(done);
    }

    fn run(&mut self, started: Sender<()>) -> Result<(), String> {
        let mut chunk = vec![Complex32::new(0.0, 0.0); self.chunk_size];
        let mut warned_fallback = false;

        tracing::info!(
            domain = %self.domain,
            chunk_size = self.chunk_size,
            timeout_us = self.timeout.as_micros() as u64,
            "Read loop running"
        );
        drop(started);

        while !self.stop.load(Ordering::SeqCst) {
            let timestamp_ns = self.timestamp_ns(&mut warned_fallback);
            self.shared.counters.record_read();

            match self.device.read(self.stream, &mut chunk, self.timeout) {
                Ok(result) => {
                    let count = result.count.min(chunk.len());
                    if count == 0 {
                        continue;
                    }
                    match self.buffer.append(timestamp_ns, &chunk[..count]) {
                        Ok(()) => {
                            self.shared.counters.record_chunk(count);
                            tracing::trace!(timestamp_ns, count, "Chunk appended");
                        }
                        Err(e) => {
                            self.shared.counters.record_rejected();
                            tracing::warn!(error = %e, "Chunk rejected by buffer");
                        }
                    }
                }
                Err(StreamError::Timeout) => {
                    self.shared.counters.record_timeout();
                    tracing::trace!("Stream read timed out");
                }
                Err(StreamError::Overflow) => {
                    let event = self.shared.counters.record_overflow(timestamp_ns);
                    tracing::warn!(sequence = event.sequence, timestamp_ns, "Stream overflow");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Fatal stream error");
                    return Err(e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Pre-read timestamp in the session domain, or system time if unavailable
    fn timestamp_ns(&self, warned_fallback: &mut bool) -> i64 {
        match self.timing.clock().now_ns(self.domain) {
            Ok(ns) => ns,
            Err(e) => {
                if !*warned_fallback {
                    tracing::warn!(error = %e, "Timestamp domain unavailable, using system time");
                    *warned_fallback = true;
                }
                system_time_ns().unwrap_or_default()
            }
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.device.deactivate(self.stream) {
            tracing::warn!(error = %e, "Failed to deactivate stream");
        }
        if let Err(e) = self.device.close() {
            tracing::warn!(error = %e, "Failed to close device");
        }
        tracing::debug!("Device released");
    }
}
