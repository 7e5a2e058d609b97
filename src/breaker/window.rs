//! Rolling time-windowed outcome statistics for the circuit breaker.
//!
//! Outcomes are bucketed by fixed-width time slices. The window only ever
//! drives state transitions; cumulative stats live on the breaker itself.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Slot index this bucket currently holds counts for. Buckets are
    /// reused ring-style, so a stale slot means the counts are dead.
    slot: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
}

/// Aggregate over the live buckets of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

impl WindowSnapshot {
    pub fn total(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }

    /// Fraction of failed-or-timed-out calls, 0.0 when the window is empty.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.failures + self.timeouts) as f64 / total as f64
    }
}

#[derive(Debug)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_width: Duration,
    origin: Instant,
}

impl RollingWindow {
    pub fn new(buckets: usize, bucket_width: Duration) -> Self {
        assert!(buckets > 0, "window needs at least one bucket");
        Self {
            buckets: vec![Bucket::default(); buckets],
            bucket_width,
            origin: Instant::now(),
        }
    }

    fn slot(&self, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos().max(1)) as u64
    }

    fn bucket_for(&mut self, at: Instant) -> &mut Bucket {
        let slot = self.slot(at);
        let idx = (slot % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.slot != slot {
            *bucket = Bucket {
                slot,
                ..Bucket::default()
            };
        }
        bucket
    }

    pub fn record(&mut self, outcome: Outcome, at: Instant) {
        let bucket = self.bucket_for(at);
        match outcome {
            Outcome::Success => bucket.successes += 1,
            Outcome::Failure => bucket.failures += 1,
            Outcome::Timeout => bucket.timeouts += 1,
        }
    }

    /// Sums the buckets still inside the window relative to `at`.
    pub fn snapshot(&self, at: Instant) -> WindowSnapshot {
        let current = self.slot(at);
        let span = self.buckets.len() as u64;
        let oldest_live = current.saturating_sub(span - 1);

        let mut agg = WindowSnapshot::default();
        for bucket in &self.buckets {
            if bucket.slot >= oldest_live && bucket.slot <= current {
                agg.successes += bucket.successes;
                agg.failures += bucket.failures;
                agg.timeouts += bucket.timeouts;
            }
        }
        agg
    }

    /// Discards all recorded outcomes, e.g. when the breaker re-closes.
    pub fn reset(&mut self) {
        for bucket in self.buckets.iter_mut() {
            *bucket = Bucket::default();
        }
        self.origin = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> RollingWindow {
        RollingWindow::new(10, Duration::from_secs(1))
    }

    #[test]
    fn records_and_sums_outcomes() {
        let mut w = window();
        let now = Instant::now();
        w.record(Outcome::Success, now);
        w.record(Outcome::Failure, now);
        w.record(Outcome::Failure, now);
        w.record(Outcome::Timeout, now);

        let snap = w.snapshot(now);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 2);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.total(), 4);
        assert!((snap.failure_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_window_has_zero_ratio() {
        let w = window();
        let snap = w.snapshot(Instant::now());
        assert_eq!(snap.total(), 0);
        assert_eq!(snap.failure_ratio(), 0.0);
    }

    #[test]
    fn outcomes_expire_once_outside_the_window() {
        let mut w = window();
        let start = Instant::now();
        w.record(Outcome::Failure, start);
        w.record(Outcome::Failure, start);

        // Still visible one bucket later.
        let one_later = start + Duration::from_secs(1);
        assert_eq!(w.snapshot(one_later).failures, 2);

        // Gone after the full window has rolled past.
        let past_window = start + Duration::from_secs(11);
        assert_eq!(w.snapshot(past_window).total(), 0);
    }

    #[test]
    fn bucket_reuse_clears_stale_counts() {
        let mut w = RollingWindow::new(2, Duration::from_secs(1));
        let start = Instant::now();
        w.record(Outcome::Failure, start);

        // Same ring position two buckets later must not inherit the count.
        w.record(Outcome::Success, start + Duration::from_secs(2));
        let snap = w.snapshot(start + Duration::from_secs(2));
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.successes, 1);
    }

    #[test]
    fn reset_discards_everything() {
        let mut w = window();
        let now = Instant::now();
        w.record(Outcome::Failure, now);
        w.reset();
        assert_eq!(w.snapshot(Instant::now()).total(), 0);
    }
}
