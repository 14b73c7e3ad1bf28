//! # Bucketed Time-Series Store
//!
//! An append-and-query structure for non-negative integer observations over
//! event time. Observations are folded into fixed-width buckets at several
//! resolutions at once: fine levels answer short-window queries accurately,
//! coarse levels absorb older data as it scrolls out of the fine rings.
//!
//! ## Levels
//!
//! Each level is a ring of [`BUCKETS_PER_LEVEL`] consecutive buckets of a
//! fixed width (1 s, 10 s, 1 m, 10 m, 1 h, 6 h, 24 h). Bucket boundaries are
//! aligned to multiples of the width relative to the UNIX epoch. A level's
//! retention is `width * BUCKETS_PER_LEVEL`; additions older than that are
//! silently dropped at that level (a coarser level usually still holds them).
//!
//! ## Queries
//!
//! [`TimeSeries::range`] sums the buckets of the finest level that still
//! covers the start of the interval, prorating buckets that only partially
//! overlap the query window by their overlap fraction. A bucket's effective
//! end is clamped to just past the last-added timestamp, so sums over windows
//! that end at or after the newest observation are exact rather than diluted
//! by the empty remainder of the newest bucket.
//!
//! The store is not internally synchronized; [`crate::monitor::Monitor`]
//! provides the locked adapter used by concurrent callers. Time is injected
//! through the [`Clock`] trait so tests can replay deterministic schedules.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of buckets retained per resolution level.
pub const BUCKETS_PER_LEVEL: usize = 64;

/// Bucket widths per level, finest first. Coarser levels have strictly
/// larger width and span.
const LEVEL_WIDTHS: [Duration; 7] = [
    Duration::from_secs(1),
    Duration::from_secs(10),
    Duration::from_secs(60),
    Duration::from_secs(600),
    Duration::from_secs(3_600),
    Duration::from_secs(21_600),
    Duration::from_secs(86_400),
];

/// A source of wall-clock time for [`TimeSeries::recent`].
///
/// Production code uses [`WallClock`]; tests inject a [`ManualClock`] to make
/// window arithmetic deterministic.
pub trait Clock: Send + Sync {
    /// Current instant as understood by the store.
    fn now(&self) -> SystemTime;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A settable clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, now: SystemTime) {
        *self.now.lock().expect("manual clock lock poisoned") = now;
    }

    /// Step the clock forward.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("manual clock lock poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("manual clock lock poisoned")
    }
}

/// Nanoseconds since the UNIX epoch. Instants before the epoch clamp to zero.
fn nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// One resolution ring: `BUCKETS_PER_LEVEL` consecutive buckets of `width`
/// nanoseconds ending (exclusive) at `end`, which is always a multiple of
/// `width`.
struct Level {
    width: u64,
    end: u64,
    newest: usize,
    buckets: Vec<u64>,
}

impl Level {
    fn new(width: u64, now: u64) -> Self {
        Self {
            width,
            end: (now / width + 1) * width,
            newest: 0,
            buckets: vec![0; BUCKETS_PER_LEVEL],
        }
    }

    /// Inclusive start of the oldest retained bucket, clamped to the epoch.
    fn start(&self) -> u64 {
        self.end
            .saturating_sub(self.width * BUCKETS_PER_LEVEL as u64)
    }

    /// Ring index of the bucket `back` steps behind the newest one.
    fn index_back(&self, back: usize) -> usize {
        (self.newest + BUCKETS_PER_LEVEL - back) % BUCKETS_PER_LEVEL
    }

    /// Advance the ring head, zero-filling intervening buckets, until the
    /// newest bucket's interval contains `t`.
    fn advance(&mut self, t: u64) {
        if t < self.end {
            return;
        }
        let steps = (t - self.end) / self.width + 1;
        if steps as usize >= BUCKETS_PER_LEVEL {
            // Everything retained has scrolled out; reset in place.
            self.buckets.iter_mut().for_each(|b| *b = 0);
        } else {
            for _ in 0..steps {
                self.newest = (self.newest + 1) % BUCKETS_PER_LEVEL;
                self.buckets[self.newest] = 0;
            }
        }
        self.end += steps * self.width;
    }

    /// Add `v` to the bucket containing `t`. Returns `false` when `t` has
    /// already scrolled out of this level's retention.
    fn add(&mut self, v: u64, t: u64) -> bool {
        if t >= self.end {
            return false;
        }
        let back = ((self.end - 1 - t) / self.width) as usize;
        if back >= BUCKETS_PER_LEVEL {
            return false;
        }
        let idx = self.index_back(back);
        self.buckets[idx] += v;
        true
    }
}

/// Multi-resolution bucketed store of `u64` counts over event time.
pub struct TimeSeries {
    levels: Vec<Level>,
    /// Timestamp (epoch nanos) of the newest observation ever added.
    last_add: u64,
    clock: Box<dyn Clock>,
}

impl TimeSeries {
    /// Store driven by the system wall clock.
    pub fn new() -> Self {
        Self::with_clock(Box::new(WallClock))
    }

    /// Store driven by an injected clock. The level rings are initialized so
    /// the newest bucket at every level contains the clock's current instant.
    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        let now = nanos(clock.now());
        let levels = LEVEL_WIDTHS
            .iter()
            .map(|w| Level::new(w.as_nanos() as u64, now))
            .collect();
        Self {
            levels,
            last_add: 0,
            clock,
        }
    }

    /// Record `v` at event time `t`.
    ///
    /// Additions newer than a level's head advance that ring (zero-filling
    /// skipped buckets); additions older than a level's retention are dropped
    /// at that level only. Out-of-order additions within retention land in
    /// their correct bucket. Never fails.
    pub fn add_with_time(&mut self, v: u64, t: SystemTime) {
        let tn = nanos(t);
        if tn > self.last_add {
            self.last_add = tn;
        }
        for level in &mut self.levels {
            level.advance(tn);
            level.add(v, tn);
        }
    }

    /// Sum of observations whose event time falls in `[start, end)`.
    ///
    /// Uses the finest level whose retention still covers `start`, falling
    /// back to the coarsest. Buckets partially covered by the window
    /// contribute `value * overlap_fraction`, rounded to nearest over the
    /// whole sum.
    pub fn range(&self, start: SystemTime, end: SystemTime) -> u64 {
        let (s, e) = (nanos(start), nanos(end));
        if e <= s {
            return 0;
        }
        let level = match self
            .levels
            .iter()
            .find(|l| l.start() <= s)
            .or_else(|| self.levels.last())
        {
            Some(level) => level,
            None => return 0,
        };

        let mut total = 0.0f64;
        for back in (0..BUCKETS_PER_LEVEL).rev() {
            // Buckets that would start before the epoch cannot hold data.
            let bstart = match level.end.checked_sub(level.width * (back as u64 + 1)) {
                Some(bstart) => bstart,
                None => continue,
            };
            let bend = bstart + level.width;
            // Clamp the bucket's effective extent to just past the newest
            // observation so windows ending at the newest data sum exactly.
            let eff_end = bend.min(self.last_add.saturating_add(1));
            if eff_end <= bstart {
                continue;
            }
            let ov_s = bstart.max(s);
            let ov_e = eff_end.min(e);
            if ov_e <= ov_s {
                continue;
            }
            let v = level.buckets[level.index_back(back)];
            if v == 0 {
                continue;
            }
            if ov_s == bstart && ov_e == eff_end {
                total += v as f64;
            } else {
                let fraction = (ov_e - ov_s) as f64 / (eff_end - bstart) as f64;
                total += v as f64 * fraction;
            }
        }
        total.round() as u64
    }

    /// Sum of observations in `[now - delta, now)`, `now` read from the
    /// injected clock.
    pub fn recent(&self, delta: Duration) -> u64 {
        let now = self.clock.now();
        self.range(now - delta, now)
    }
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn epoch_plus(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_single_add_exact_range() {
        let base = epoch_plus(1_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(3, base);
        let sum = ts.range(base - Duration::from_secs(5), base + Duration::from_secs(1));
        assert_eq!(sum, 3);
    }

    #[test]
    fn test_range_excludes_outside_window() {
        let base = epoch_plus(2_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(5, base - Duration::from_secs(30));
        ts.add_with_time(7, base);
        // Window that only covers the older observation.
        let sum = ts.range(base - Duration::from_secs(40), base - Duration::from_secs(10));
        assert_eq!(sum, 5);
    }

    #[test]
    fn test_window_ending_at_newest_observation_is_exact() {
        // The newest bucket is mostly empty; the clamp to the last-added
        // timestamp must keep the sum exact rather than prorating it away.
        let base = epoch_plus(3_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(
            base + Duration::from_secs(1200),
        )));
        let t1 = base + Duration::from_millis(300_500);
        let t2 = base + Duration::from_millis(360_500);
        ts.add_with_time(2, t1);
        ts.add_with_time(2, t2);
        // Two minutes ending at the newest observation, neither endpoint on
        // a bucket boundary.
        let sum = ts.range(t2 - Duration::from_secs(120), t2);
        assert_eq!(sum, 4);
    }

    #[test]
    fn test_partition_additivity_on_bucket_boundary() {
        let base = epoch_plus(4_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        for i in 0..40u64 {
            ts.add_with_time(1, base + Duration::from_secs(i));
        }
        let s = base + Duration::from_secs(2);
        let m = base + Duration::from_secs(20); // aligned to the 1 s level
        let e = base + Duration::from_secs(38);
        let whole = ts.range(s, e);
        let left = ts.range(s, m);
        let right = ts.range(m, e);
        assert_eq!(whole, left + right);
        assert_eq!(whole, 36);
    }

    #[test]
    fn test_out_of_order_adds_land_in_their_buckets() {
        let base = epoch_plus(5_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(1, base + Duration::from_secs(10));
        ts.add_with_time(1, base + Duration::from_secs(2));
        ts.add_with_time(1, base + Duration::from_secs(7));
        let early = ts.range(base, base + Duration::from_secs(5));
        let late = ts.range(base + Duration::from_secs(5), base + Duration::from_secs(11));
        assert_eq!(early, 1);
        assert_eq!(late, 2);
    }

    #[test]
    fn test_too_old_for_fine_level_still_counted_by_coarse_level() {
        let base = epoch_plus(6_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(4, base);
        // 30 minutes later: outside the 1 s / 10 s / 1 m rings, inside 10 m.
        let later = base + Duration::from_secs(1800);
        ts.add_with_time(6, later);
        let sum = ts.range(base - Duration::from_secs(60), later + Duration::from_secs(1));
        assert_eq!(sum, 10);
    }

    #[test]
    fn test_additions_older_than_all_retention_are_dropped() {
        let base = epoch_plus(90 * 86_400);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(1, base);
        // 80 days earlier: beyond even the 24 h ring's 64-day span.
        ts.add_with_time(100, base - Duration::from_secs(80 * 86_400));
        let sum = ts.range(base - Duration::from_secs(85 * 86_400), base + Duration::from_secs(1));
        assert_eq!(sum, 1);
    }

    #[test]
    fn test_recent_uses_injected_clock() {
        let base = epoch_plus(7_000_000);
        let clock = Arc::new(ManualClock::new(base));
        let mut ts = TimeSeries::with_clock(Box::new(SharedClock(Arc::clone(&clock))));
        ts.add_with_time(9, base - Duration::from_secs(30));
        assert_eq!(ts.recent(Duration::from_secs(60)), 9);
        // Slide the window past the observation.
        clock.set(base + Duration::from_secs(120));
        assert_eq!(ts.recent(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_recent_monotone_non_increasing_after_increments_cease() {
        let base = epoch_plus(8_000_000);
        let clock = Arc::new(ManualClock::new(base));
        let mut ts = TimeSeries::with_clock(Box::new(SharedClock(Arc::clone(&clock))));
        for i in 0..20u64 {
            ts.add_with_time(1, base - Duration::from_secs(40) + Duration::from_secs(i));
        }
        let mut prev = ts.recent(Duration::from_secs(60));
        assert_eq!(prev, 20);
        for step in 1..=12u64 {
            clock.set(base + Duration::from_secs(step * 10));
            let cur = ts.recent(Duration::from_secs(60));
            assert!(cur <= prev, "recent grew from {prev} to {cur}");
            prev = cur;
        }
        assert_eq!(prev, 0);
    }

    #[test]
    fn test_advance_past_whole_ring_resets_buckets() {
        let base = epoch_plus(9_000_000);
        let mut ts = TimeSeries::with_clock(Box::new(ManualClock::new(base)));
        ts.add_with_time(50, base);
        // Far enough ahead that every level's ring has fully scrolled.
        let far = base + Duration::from_secs(100 * 86_400);
        ts.add_with_time(2, far);
        let sum = ts.range(far - Duration::from_secs(60), far + Duration::from_secs(1));
        assert_eq!(sum, 2);
        let old = ts.range(base - Duration::from_secs(60), base + Duration::from_secs(60));
        assert_eq!(old, 0);
    }

    /// Clock adapter sharing a `ManualClock` with the test body.
    struct SharedClock(Arc<ManualClock>);

    impl Clock for SharedClock {
        fn now(&self) -> SystemTime {
            self.0.now()
        }
    }
}
