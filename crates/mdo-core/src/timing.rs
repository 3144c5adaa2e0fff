//! Wall-clock timing of evaluations and derivative computations.
//!
//! Timers are owned by the run that uses them; nothing here is global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A simple timer that measures elapsed time.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in seconds.
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Stop the timer and record the elapsed time into `acc`.
    pub fn stop_into(self, acc: &AccumulatingTimer) -> f64 {
        let s = self.elapsed();
        acc.record(s);
        s
    }
}

/// Accumulating timer for tracking total time across multiple calls.
///
/// Uses atomics so that parallel workers can record into a shared instance.
#[derive(Debug, Default)]
pub struct AccumulatingTimer {
    total_ns: AtomicU64,
    count: AtomicU64,
}

impl Clone for AccumulatingTimer {
    fn clone(&self) -> Self {
        Self {
            total_ns: AtomicU64::new(self.total_ns.load(Ordering::Relaxed)),
            count: AtomicU64::new(self.count.load(Ordering::Relaxed)),
        }
    }
}

impl AccumulatingTimer {
    pub const fn new() -> Self {
        Self {
            total_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn record(&self, duration_s: f64) {
        let nanos = (duration_s.max(0.0) * 1e9) as u64;
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total time spent (in seconds).
    pub fn total_seconds(&self) -> f64 {
        self.total_ns.load(Ordering::Relaxed) as f64 / 1e9
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn average_seconds(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.total_seconds() / count as f64
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Timers kept by a run context.
#[derive(Debug, Default, Clone)]
pub struct RunTimings {
    /// Full graph evaluations.
    pub evaluations: AccumulatingTimer,
    /// Convergence of coupled regions.
    pub cycles: AccumulatingTimer,
    /// Local partials and total derivatives.
    pub derivatives: AccumulatingTimer,
}

impl RunTimings {
    pub fn reset(&self) {
        self.evaluations.reset();
        self.cycles.reset();
        self.derivatives.reset();
    }

    pub fn summary(&self) -> String {
        format!(
            "evaluations: {} calls, {:.3}s; cycles: {} solves, {:.3}s; derivatives: {} calls, {:.3}s",
            self.evaluations.count(),
            self.evaluations.total_seconds(),
            self.cycles.count(),
            self.cycles.total_seconds(),
            self.derivatives.count(),
            self.derivatives.total_seconds(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_resets() {
        let t = AccumulatingTimer::new();
        t.record(0.5);
        t.record(1.5);
        assert_eq!(t.count(), 2);
        assert!((t.total_seconds() - 2.0).abs() < 1e-6);
        assert!((t.average_seconds() - 1.0).abs() < 1e-6);
        t.reset();
        assert_eq!(t.count(), 0);
        assert_eq!(t.average_seconds(), 0.0);
    }

    #[test]
    fn timer_records_into_accumulator() {
        let timings = RunTimings::default();
        let timer = Timer::start();
        let s = timer.stop_into(&timings.evaluations);
        assert!(s >= 0.0);
        assert_eq!(timings.evaluations.count(), 1);
        assert!(timings.summary().contains("evaluations: 1 calls"));
    }
}
