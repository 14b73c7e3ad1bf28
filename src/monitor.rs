//! Concurrency-safe adapter over the bucketed time-series store.
//!
//! The store itself is unsynchronized; the monitor wraps it in a
//! readers-writer lock so the flush task can add counts while samplers and
//! the dashboard query concurrently. Writes are exclusive, reads shared.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use crate::timeseries::{Clock, TimeSeries};

/// Aggregates HTTP request counts into a range-searchable store.
pub struct Monitor {
    series: RwLock<TimeSeries>,
}

impl Monitor {
    /// Monitor over a wall-clock-driven store.
    pub fn new() -> Self {
        Self {
            series: RwLock::new(TimeSeries::new()),
        }
    }

    /// Monitor over a store driven by an injected clock.
    ///
    /// The store attributes additions by their event timestamp; callers are
    /// expected not to pass timestamps ahead of the clock. Primarily a
    /// testing concern.
    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            series: RwLock::new(TimeSeries::with_clock(clock)),
        }
    }

    /// Add `count` occurrences at event time `t`.
    pub fn increment(&self, count: u64, t: SystemTime) {
        self.series
            .write()
            .expect("monitor RwLock poisoned")
            .add_with_time(count, t);
    }

    /// Sum of occurrences in `[start, end)`.
    pub fn range_sum(&self, start: SystemTime, end: SystemTime) -> u64 {
        self.series
            .read()
            .expect("monitor RwLock poisoned")
            .range(start, end)
    }

    /// Sum of occurrences within the trailing `delta` window.
    pub fn recent_sum(&self, delta: Duration) -> u64 {
        self.series
            .read()
            .expect("monitor RwLock poisoned")
            .recent(delta)
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::ManualClock;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_range_and_recent_sums() {
        const NOMINAL_INC: u64 = 2;
        let base = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let clock_now = base + Duration::from_secs(20 * 60);
        let mut at = base + Duration::from_secs(5 * 60);

        let monitor = Monitor::with_clock(Box::new(ManualClock::new(clock_now)));
        monitor.increment(NOMINAL_INC, at);

        // Older data queried back out by range.
        at += Duration::from_secs(60);
        monitor.increment(NOMINAL_INC, at);
        let sum = monitor.range_sum(at - Duration::from_secs(120), at);
        assert_eq!(sum, 4);

        // Recent window near the clock excludes the earlier buckets.
        let x = clock_now - Duration::from_secs(3 * 60);
        monitor.increment(NOMINAL_INC, x);
        assert_eq!(monitor.recent_sum(Duration::from_secs(4 * 60)), 2);
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;

        let monitor = Arc::new(Monitor::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&monitor);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    m.increment(1, SystemTime::now());
                }
            }));
        }
        for h in handles {
            h.join().expect("incrementer thread panicked");
        }
        let now = SystemTime::now();
        let sum = monitor.range_sum(now - Duration::from_secs(60), now + Duration::from_secs(1));
        assert_eq!(sum, 1000);
    }
}
