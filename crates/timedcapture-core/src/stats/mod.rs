//! Statistics module
//!
//! Session counters and the overflow event log.

pub mod counters;

pub use counters::{CounterSnapshot, OverflowEvent, SessionCounters};
