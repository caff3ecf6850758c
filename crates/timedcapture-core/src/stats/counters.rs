//! Streaming session counters
//!
//! Counters are updated by the read loop and read from any thread without
//! locking. Overflow events are kept in a short bounded log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Maximum number of overflow events kept
const MAX_OVERFLOW_EVENTS: usize = 256;

/// A device overflow observed by the read loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverflowEvent {
    /// Wall-clock time the overflow was reported
    pub timestamp: DateTime<Utc>,
    /// Session timestamp of the read that reported it
    pub stream_ns: i64,
    /// Overflow count including this one
    pub sequence: u64,
}

/// Point-in-time copy of [`SessionCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub reads: u64,
    pub chunks: u64,
    pub samples: u64,
    pub timeouts: u64,
    pub overflows: u64,
    pub rejected_chunks: u64,
}

/// Lock-free counters for one streaming session
#[derive(Debug, Default)]
pub struct SessionCounters {
    reads: AtomicU64,
    chunks: AtomicU64,
    samples: AtomicU64,
    timeouts: AtomicU64,
    overflows: AtomicU64,
    rejected_chunks: AtomicU64,
    overflow_log: Mutex<VecDeque<OverflowEvent>>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a chunk accepted into the buffer
    pub fn record_chunk(&self, samples: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a chunk the buffer refused (out-of-order timestamp)
    pub fn record_rejected(&self) {
        self.rejected_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an overflow and log it
    pub fn record_overflow(&self, stream_ns: i64) -> OverflowEvent {
        let sequence = self.overflows.fetch_add(1, Ordering::Relaxed) + 1;
        let event = OverflowEvent {
            timestamp: Utc::now(),
            stream_ns,
            sequence,
        };

        let mut log = self
            .overflow_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if log.len() >= MAX_OVERFLOW_EVENTS {
            log.pop_front();
        }
        log.push_back(event.clone());
        event
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            rejected_chunks: self.rejected_chunks.load(Ordering::Relaxed),
        }
    }

    /// Recent overflow events, oldest first
    pub fn overflow_events(&self) -> Vec<OverflowEvent> {
        self.overflow_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let counters = SessionCounters::new();
        counters.record_read();
        counters.record_read();
        counters.record_chunk(100);
        counters.record_chunk(50);
        counters.record_timeout();
        counters.record_rejected();

        let snap = counters.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.chunks, 2);
        assert_eq!(snap.samples, 150);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.rejected_chunks, 1);
        assert_eq!(snap.overflows, 0);
    }

    #[test]
    fn test_overflow_sequence() {
        let counters = SessionCounters::new();
        let first = counters.record_overflow(10);
        let second = counters.record_overflow(20);
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(counters.snapshot().overflows, 2);
    }

    #[test]
    fn test_overflow_log_is_bounded() {
        let counters = SessionCounters::new();
        for i in 0..(MAX_OVERFLOW_EVENTS as i64 + 10) {
            counters.record_overflow(i);
        }
        let events = counters.overflow_events();
        assert_eq!(events.len(), MAX_OVERFLOW_EVENTS);
        assert_eq!(events[0].stream_ns, 10);
        assert_eq!(counters.snapshot().overflows, MAX_OVERFLOW_EVENTS as u64 + 10);
    }
}
