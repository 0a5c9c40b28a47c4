//! Wall-clock time for reading timestamps
//!
//! Readings, log lines and alert backoff use wall-clock milliseconds since the
//! Unix epoch. Cycle cadence does NOT use this module; it runs on the tokio
//! monotonic clock so NTP corrections on the host cannot stretch or squash
//! the sampling interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Source of wall-clock time
pub trait TimeSource: Send + Sync {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;

    /// Check if this source provides wall clock time (vs a test counter)
    fn is_wall_clock(&self) -> bool;
}

/// Host system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime as StdSystemTime, UNIX_EPOCH};

        StdSystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }

    fn is_wall_clock(&self) -> bool {
        true
    }
}

/// Manually driven clock for tests and simulations
///
/// Clones share the same counter, so a test can keep one handle and advance
/// the clock while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    timestamp: Arc<AtomicU64>,
}

impl ManualTime {
    /// Create a clock starting at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Arc::new(AtomicU64::new(timestamp)),
        }
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, timestamp: Timestamp) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward by `ms` milliseconds
    pub fn advance(&self, ms: u64) {
        self.timestamp.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }

    fn is_wall_clock(&self) -> bool {
        false
    }
}

/// Milliseconds elapsed between two timestamps, zero if the clock went backwards
pub fn elapsed_ms(earlier: Timestamp, later: Timestamp) -> u64 {
    later.saturating_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_time_advances_across_clones() {
        let time = ManualTime::new(1000);
        let shared = time.clone();

        time.advance(500);
        assert_eq!(shared.now(), 1500);

        shared.set(42);
        assert_eq!(time.now(), 42);
        assert!(!time.is_wall_clock());
    }

    #[test]
    fn system_time_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemTime.now() > 1_577_836_800_000);
        assert!(SystemTime.is_wall_clock());
    }

    #[test]
    fn elapsed_saturates_on_backwards_clock() {
        assert_eq!(elapsed_ms(1000, 4000), 3000);
        assert_eq!(elapsed_ms(4000, 1000), 0);
    }
}
