//! Time-window extraction
//!
//! Pulls the samples captured while some external task ran (a transmit
//! burst, a test pattern) out of the session buffer.

use super::buffer::{CircularTimestampBuffer, Window};
use crate::timing::{system_time_ns, ClockDomain, ClockSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Absolute time range in one clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowQuery {
    pub start_ns: i64,
    pub end_ns: i64,
}

impl WindowQuery {
    pub fn new(start_ns: i64, end_ns: i64) -> Self {
        Self { start_ns, end_ns }
    }

    pub fn duration_ns(&self) -> i64 {
        self.end_ns - self.start_ns
    }
}

/// Extract the samples of chunks timestamped within `[start_ns, end_ns]`
///
/// Empty when nothing matches; `samples` and `timestamps` always have equal
/// length.
pub fn extract(buffer: &CircularTimestampBuffer, start_ns: i64, end_ns: i64) -> Window {
    let window = buffer.query_range(start_ns, end_ns);
    tracing::debug!(
        start_ns,
        end_ns,
        samples = window.len(),
        chunks = window.chunk_count(),
        "Window extracted"
    );
    window
}

/// Window reader bound to one buffer
#[derive(Debug, Clone)]
pub struct WindowExtractor {
    buffer: Arc<CircularTimestampBuffer>,
}

impl WindowExtractor {
    pub fn new(buffer: Arc<CircularTimestampBuffer>) -> Self {
        Self { buffer }
    }

    pub fn extract(&self, start_ns: i64, end_ns: i64) -> Window {
        extract(&self.buffer, start_ns, end_ns)
    }

    pub fn extract_query(&self, query: WindowQuery) -> Window {
        self.extract(query.start_ns, query.end_ns)
    }

    /// Run `task` and return its output with the samples captured meanwhile
    ///
    /// Start and stop times are read in `domain`, or from system time when
    /// the domain is unavailable. The stream must already be running.
    pub fn capture_during<T>(
        &self,
        clock: &ClockSource,
        domain: ClockDomain,
        task: impl FnOnce() -> T,
    ) -> (T, WindowQuery, Window) {
        let now = || {
            clock
                .now_ns(domain)
                .ok()
                .or_else(system_time_ns)
                .unwrap_or_default()
        };

        let start_ns = now();
        let output = task();
        let end_ns = now();

        let query = WindowQuery::new(start_ns, end_ns);
        let window = self.extract_query(query);
        tracing::info!(
            domain = %domain,
            duration_ms = query.duration_ns() as f64 / 1e6,
            samples = window.len(),
            "Task window captured"
        );
        (output, query, window)
    }
}
