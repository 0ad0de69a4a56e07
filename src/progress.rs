//! Throughput tracking for a stream session.
//!
//! [`ProgressTracker`] is fed by the stream engine: `on_bytes` on every
//! completed transfer and `tick` once per periodic interval. Consumers see a
//! read-only [`ProgressInfo`] snapshot in every callback.

use std::time::{Duration, Instant};

/// Cumulative byte count at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    pub total_bytes: u64,
    pub time: Instant,
}

/// Point-in-time throughput statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressInfo {
    /// When the first bytes arrived (tracker creation until then).
    pub first: ProgressSample,
    /// The sample taken at the previous tick.
    pub prev: ProgressSample,
    /// The latest sample.
    pub current: ProgressSample,
    /// Time between `first` and the latest tick.
    pub total_time: Duration,
    /// Average bytes per second since `first`.
    pub total_rate: f64,
    /// Bytes per second between the last two ticks.
    pub current_rate: f64,
}

impl ProgressInfo {
    /// Cumulative bytes received.
    pub fn total_bytes(&self) -> u64 {
        self.current.total_bytes
    }
}

/// Derives byte-rate statistics from a sequence of completion events.
#[derive(Debug)]
pub struct ProgressTracker {
    info: ProgressInfo,
    started: bool,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a tracker whose samples all start at `now`.
    pub fn starting_at(now: Instant) -> Self {
        let sample = ProgressSample {
            total_bytes: 0,
            time: now,
        };
        Self {
            info: ProgressInfo {
                first: sample,
                prev: sample,
                current: sample,
                total_time: Duration::ZERO,
                total_rate: 0.0,
                current_rate: 0.0,
            },
            started: false,
        }
    }

    /// Current snapshot.
    pub fn info(&self) -> &ProgressInfo {
        &self.info
    }

    pub fn on_bytes(&mut self, n: usize) {
        self.on_bytes_at(n, Instant::now());
    }

    /// Record `n` bytes received at `now`.
    pub fn on_bytes_at(&mut self, n: usize, now: Instant) {
        if !self.started {
            self.started = true;
            self.info.first.time = now;
            self.info.prev = self.info.first;
        }
        self.info.current.total_bytes += n as u64;
        self.info.current.time = now;
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Recompute rates at `now` and roll `current` into `prev`.
    ///
    /// Until the first bytes arrive there is no start time, so `total_time`
    /// and both rates stay at zero.
    pub fn tick_at(&mut self, now: Instant) {
        let info = &mut self.info;
        if now > info.current.time {
            info.current.time = now;
        }
        if !self.started {
            info.prev = info.current;
            return;
        }

        info.total_time = info.current.time.saturating_duration_since(info.first.time);
        info.total_rate = rate(info.current.total_bytes - info.first.total_bytes, info.total_time);

        let interval = info.current.time.saturating_duration_since(info.prev.time);
        info.current_rate = rate(info.current.total_bytes - info.prev.total_bytes, interval);

        info.prev = info.current;
    }
}

fn rate(bytes: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_without_data_reports_zero() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::starting_at(t0);
        tracker.tick_at(t0);
        let info = tracker.info();
        assert_eq!(info.total_rate, 0.0);
        assert_eq!(info.current_rate, 0.0);
        assert_eq!(info.total_bytes(), 0);
    }

    #[test]
    fn test_first_bytes_set_first_sample() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::starting_at(t0);
        let t1 = t0 + Duration::from_millis(50);
        tracker.on_bytes_at(100, t1);
        assert_eq!(tracker.info().first.time, t1);
        assert_eq!(tracker.info().first.total_bytes, 0);
        assert_eq!(tracker.info().current.total_bytes, 100);

        tracker.on_bytes_at(100, t1 + Duration::from_millis(10));
        assert_eq!(tracker.info().first.time, t1);
    }

    #[test]
    fn test_idle_ticks_before_first_bytes_keep_time_monotonic() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::starting_at(t0);

        tracker.tick_at(t0 + Duration::from_secs(1));
        let idle = *tracker.info();
        assert_eq!(idle.total_time, Duration::ZERO);
        assert_eq!(idle.total_rate, 0.0);
        assert_eq!(idle.current_rate, 0.0);

        tracker.on_bytes_at(4096, t0 + Duration::from_millis(1500));
        tracker.tick_at(t0 + Duration::from_secs(2));
        let info = *tracker.info();
        assert!(info.total_time >= idle.total_time);
        assert_eq!(info.total_time, Duration::from_millis(500));
        assert!((info.total_rate - 8192.0).abs() < 1e-6);
        assert!((info.current_rate - 8192.0).abs() < 1e-6);
    }

    #[test]
    fn test_rates_over_ticks() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::starting_at(t0);

        tracker.on_bytes_at(1000, t0);
        tracker.on_bytes_at(1000, t0 + Duration::from_millis(500));
        tracker.tick_at(t0 + Duration::from_secs(1));
        let info = *tracker.info();
        assert!((info.total_rate - 2000.0).abs() < 1e-6);
        assert!((info.current_rate - 2000.0).abs() < 1e-6);

        // No data in the next interval.
        tracker.tick_at(t0 + Duration::from_secs(2));
        let info = *tracker.info();
        assert_eq!(info.current_rate, 0.0);
        assert!((info.total_rate - 1000.0).abs() < 1e-6);
        assert_eq!(info.total_time, Duration::from_secs(2));
    }

    #[test]
    fn test_totals_monotonic_and_rates_non_negative() {
        let t0 = Instant::now();
        let mut tracker = ProgressTracker::starting_at(t0);
        let mut last_total = 0;

        for step in 0..50u64 {
            let now = t0 + Duration::from_millis(step * 7);
            tracker.on_bytes_at((step as usize * 37) % 4096, now);
            if step % 5 == 0 {
                tracker.tick_at(now);
            }
            let info = tracker.info();
            assert!(info.total_bytes() >= last_total);
            assert!(info.current_rate >= 0.0);
            assert!(info.total_rate >= 0.0);
            assert!(info.prev.total_bytes <= info.current.total_bytes);
            last_total = info.total_bytes();
        }

        let end = t0 + Duration::from_millis(400);
        tracker.tick_at(end);
        let info = tracker.info();
        let elapsed = (end - info.first.time).as_secs_f64();
        let expected = info.total_bytes() as f64 / elapsed;
        assert!((info.total_rate - expected).abs() < 1e-6 * expected.max(1.0));
    }
}
