//! Time-bounded circular buffer of timestamped sample chunks
//!
//! One writer (the session read loop) appends chunks; any number of readers
//! query absolute time ranges concurrently. Readers only hold the lock long
//! enough to clone `Arc` handles, so a large query never stalls the writer.

use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors from buffer appends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("chunk timestamp {timestamp_ns} is older than newest {newest_ns}")]
    OutOfOrder { timestamp_ns: i64, newest_ns: i64 },
}

/// One device read, timestamped once
#[derive(Debug, Clone)]
pub struct SampleChunk {
    pub timestamp_ns: i64,
    pub samples: Arc<[Complex32]>,
}

impl SampleChunk {
    pub fn new(timestamp_ns: i64, samples: &[Complex32]) -> Self {
        Self {
            timestamp_ns,
            samples: Arc::from(samples),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Samples extracted for a time range
///
/// `timestamps[i]` is the timestamp of the chunk that sample `i` came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    pub samples: Vec<Complex32>,
    pub timestamps: Vec<i64>,
    chunk_count: usize,
}

impl Window {
    /// Concatenate chunk snapshots into a window
    pub fn from_chunks(chunks: &[SampleChunk]) -> Self {
        let total: usize = chunks.iter().map(SampleChunk::len).sum();
        let mut samples = Vec::with_capacity(total);
        let mut timestamps = Vec::with_capacity(total);
        for chunk in chunks {
            samples.extend_from_slice(&chunk.samples);
            timestamps.extend(std::iter::repeat(chunk.timestamp_ns).take(chunk.len()));
        }
        Self {
            samples,
            timestamps,
            chunk_count: chunks.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of chunks the window was built from
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// First chunk timestamp, if any
    pub fn start_ns(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    /// Span covered by the samples at `sample_rate`
    pub fn duration_seconds(&self, sample_rate: f64) -> f64 {
        if sample_rate <= 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / sample_rate
    }
}

/// Buffer occupancy snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferInfo {
    pub entry_count: usize,
    pub total_samples: usize,
    pub duration_seconds: f64,
    pub oldest_ts: i64,
    pub newest_ts: i64,
}

#[derive(Debug, Default)]
struct Inner {
    chunks: VecDeque<SampleChunk>,
    total_samples: usize,
}

/// Circular buffer that retains only the most recent `max_duration`
///
/// # Example
/// ```
/// use std::time::Duration;
/// use rustfft::num_complex::Complex32;
/// use timedcapture_core::capture::CircularTimestampBuffer;
///
/// let buffer = CircularTimestampBuffer::new(Duration::from_secs(1));
/// buffer.append(0, &[Complex32::new(1.0, 0.0); 4]).unwrap();
/// buffer.append(2_000_000_000, &[Complex32::new(0.0, 1.0); 4]).unwrap();
///
/// // The first chunk fell out of the retention horizon
/// assert_eq!(buffer.len(), 1);
/// assert_eq!(buffer.query_range(0, i64::MAX).len(), 4);
/// ```
#[derive(Debug)]
pub struct CircularTimestampBuffer {
    max_duration_ns: i64,
    inner: Mutex<Inner>,
}

impl CircularTimestampBuffer {
    /// Create a buffer retaining `max_duration` of chunks
    pub fn new(max_duration: Duration) -> Self {
        let ns = i64::try_from(max_duration.as_nanos()).unwrap_or(i64::MAX);
        Self::with_max_duration_ns(ns)
    }

    /// Create a buffer from a retention span in nanoseconds (clamped to ≥ 0)
    pub fn with_max_duration_ns(max_duration_ns: i64) -> Self {
        Self {
            max_duration_ns: max_duration_ns.max(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_duration_ns(&self) -> i64 {
        self.max_duration_ns
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk, then evict chunks older than the retention horizon
    ///
    /// Empty slices are ignored. A chunk older than the current newest is
    /// rejected so timestamps stay non-decreasing.
    pub fn append(&self, timestamp_ns: i64, samples: &[Complex32]) -> Result<(), BufferError> {
        if samples.is_empty() {
            return Ok(());
        }
        self.push(SampleChunk::new(timestamp_ns, samples))
    }

    /// Append an already-built chunk
    pub fn push(&self, chunk: SampleChunk) -> Result<(), BufferError> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut inner = self.lock();
        if let Some(newest) = inner.chunks.back() {
            if chunk.timestamp_ns < newest.timestamp_ns {
                return Err(BufferError::OutOfOrder {
                    timestamp_ns: chunk.timestamp_ns,
                    newest_ns: newest.timestamp_ns,
                });
            }
        }

        let newest_ns = chunk.timestamp_ns;
        inner.total_samples += chunk.len();
        inner.chunks.push_back(chunk);

        let cutoff = newest_ns.saturating_sub(self.max_duration_ns);
        while inner
            .chunks
            .front()
            .is_some_and(|front| front.timestamp_ns < cutoff)
        {
            if let Some(evicted) = inner.chunks.pop_front() {
                inner.total_samples -= evicted.len();
            }
        }

        Ok(())
    }

    /// Snapshot the chunks whose timestamps fall in `[start_ns, end_ns]`
    pub fn chunks_in_range(&self, start_ns: i64, end_ns: i64) -> Vec<SampleChunk> {
        if start_ns > end_ns {
            return Vec::new();
        }

        let inner = self.lock();
        let first = inner
            .chunks
            .partition_point(|chunk| chunk.timestamp_ns < start_ns);
        inner
            .chunks
            .range(first..)
            .take_while(|chunk| chunk.timestamp_ns <= end_ns)
            .cloned()
            .collect()
    }

    /// Extract all samples from chunks timestamped within `[start_ns, end_ns]`
    ///
    /// Selection is chunk-granular. Concatenation happens after the lock
    /// is released.
    pub fn query_range(&self, start_ns: i64, end_ns: i64) -> Window {
        let chunks = self.chunks_in_range(start_ns, end_ns);
        Window::from_chunks(&chunks)
    }

    /// Current occupancy
    pub fn get_buffer_info(&self) -> BufferInfo {
        let inner = self.lock();
        match (inner.chunks.front(), inner.chunks.back()) {
            (Some(oldest), Some(newest)) => BufferInfo {
                entry_count: inner.chunks.len(),
                total_samples: inner.total_samples,
                duration_seconds: (newest.timestamp_ns - oldest.timestamp_ns) as f64 / 1e9,
                oldest_ts: oldest.timestamp_ns,
                newest_ts: newest.timestamp_ns,
            },
            _ => BufferInfo::default(),
        }
    }

    /// Number of retained chunks
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    /// Drop all retained chunks
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.chunks.clear();
        inner.total_samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    fn chunk(value: f32, len: usize) -> Vec<Complex32> {
        vec![Complex32::new(value, -value); len]
    }

    #[test]
    fn test_empty_buffer_info() {
        let buffer = CircularTimestampBuffer::new(Duration::from_secs(1));
        assert!(buffer.is_empty());
        assert_eq!(buffer.get_buffer_info(), BufferInfo::default());
        assert!(buffer.query_range(0, i64::MAX).is_empty());
    }

    #[test]
    fn test_eviction_keeps_retention_horizon() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(300 * MS);
        for i in 0..10 {
            buffer.append(i * 100 * MS, &chunk(i as f32, 8)).unwrap();
            let info = buffer.get_buffer_info();
            assert!(info.newest_ts - info.oldest_ts <= 300 * MS);
        }
        let info = buffer.get_buffer_info();
        assert_eq!(info.entry_count, 4);
        assert_eq!(info.oldest_ts, 600 * MS);
        assert_eq!(info.newest_ts, 900 * MS);
        assert_eq!(info.total_samples, 32);
    }

    #[test]
    fn test_chunk_exactly_at_horizon_is_kept() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(100);
        buffer.append(0, &chunk(1.0, 1)).unwrap();
        buffer.append(100, &chunk(2.0, 1)).unwrap();
        assert_eq!(buffer.len(), 2);
        buffer.append(101, &chunk(3.0, 1)).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_total_samples_tracks_uneven_chunks() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(2 * MS);
        buffer.append(0, &chunk(0.0, 3)).unwrap();
        buffer.append(MS, &chunk(0.0, 5)).unwrap();
        buffer.append(2 * MS, &chunk(0.0, 7)).unwrap();
        assert_eq!(buffer.get_buffer_info().total_samples, 15);
        buffer.append(4 * MS, &chunk(0.0, 11)).unwrap();
        assert_eq!(buffer.get_buffer_info().total_samples, 18);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(MS);
        buffer.append(500, &chunk(1.0, 2)).unwrap();
        let err = buffer.append(400, &chunk(1.0, 2)).unwrap_err();
        assert_eq!(
            err,
            BufferError::OutOfOrder {
                timestamp_ns: 400,
                newest_ns: 500
            }
        );
        // Equal timestamps are allowed
        buffer.append(500, &chunk(2.0, 2)).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_empty_append_ignored() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(MS);
        buffer.append(10, &[]).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_query_is_inclusive_and_lengths_match() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(10_000 * MS);
        for i in 0..5 {
            buffer.append(i * 10, &chunk(i as f32, 4)).unwrap();
        }
        let window = buffer.query_range(10, 30);
        assert_eq!(window.chunk_count(), 3);
        assert_eq!(window.len(), 12);
        assert_eq!(window.samples.len(), window.timestamps.len());
        assert_eq!(window.timestamps[0], 10);
        assert_eq!(window.timestamps[11], 30);
        assert_eq!(window.samples[4], Complex32::new(2.0, -2.0));
    }

    #[test]
    fn test_query_inverted_range_is_empty() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(MS);
        buffer.append(10, &chunk(1.0, 4)).unwrap();
        assert!(buffer.query_range(20, 5).is_empty());
        assert!(buffer.query_range(11, 19).is_empty());
    }

    #[test]
    fn test_clear() {
        let buffer = CircularTimestampBuffer::with_max_duration_ns(MS);
        buffer.append(1, &chunk(1.0, 4)).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.get_buffer_info().total_samples, 0);
    }

    #[test]
    fn test_window_duration() {
        let window = Window::from_chunks(&[SampleChunk::new(0, &chunk(1.0, 1000))]);
        assert!((window.duration_seconds(1e6) - 0.001).abs() < 1e-12);
        assert_eq!(window.duration_seconds(0.0), 0.0);
        assert_eq!(window.start_ns(), Some(0));
    }
}
