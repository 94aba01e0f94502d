//! Time provider abstraction
//!
//! Separates "now" from storage and query logic so reads that synthesize a
//! point at the current time stay deterministic under test.

use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider trait for generating timestamps
pub trait TimeProvider: Send + Sync + 'static {
    /// Current timestamp in microseconds since Unix epoch
    fn now_micros(&self) -> i64;
}

/// System time provider using local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default()
    }
}

/// Fixed time provider for testing
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_us: i64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_us: i64) -> Self {
        Self { timestamp_us }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_micros(&self) -> i64 {
        self.timestamp_us
    }
}
