//! Scan-cycle timing statistics.
//!
//! Three running triples — scan time, cycle time, cycle latency — plus
//! `scan_count`/`overruns`, updated with the incremental average form
//! `avg += (sample - avg) / scan_count`. Grounded on
//! `original_source/core/src/plc_app/scan_cycle_manager.c`, generalized to
//! three independently tracked metrics.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

/// Min/max/running-average accumulator for one timing metric, all in
/// nanoseconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Triple {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

impl Default for Triple {
    fn default() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            avg: 0.0,
        }
    }
}

impl Triple {
    fn observe(&mut self, sample_ns: u64, scan_count: u64) {
        if sample_ns < self.min {
            self.min = sample_ns;
        }
        if sample_ns > self.max {
            self.max = sample_ns;
        }
        #[allow(clippy::cast_precision_loss)]
        let delta = sample_ns as f64 - self.avg;
        #[allow(clippy::cast_precision_loss)]
        {
            self.avg += delta / scan_count as f64;
        }
    }
}

/// A point-in-time snapshot of [`ScanStats`], safe to hand out without
/// holding the stats lock. `Serialize` so a reporting thread can publish
/// it as-is.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub scan_count: u64,
    pub overruns: u64,
    pub scan_time: Triple,
    pub cycle_time: Triple,
    pub cycle_latency: Triple,
}

#[derive(Default)]
struct Inner {
    scan_count: u64,
    overruns: u64,
    scan_time: Triple,
    cycle_time: Triple,
    cycle_latency: Triple,
    prev_cycle_start: Option<Duration>,
}

/// Scan-cycle statistics, one instance shared by the scheduler and any
/// reporter thread.
#[derive(Default)]
pub struct ScanStats {
    inner: Mutex<Inner>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed cycle. `cycle_start`/`cycle_end` and
    /// `expected_cycle_start` are monotonic-clock offsets; `tick_time` is the artifact's declared period `T`.
    pub fn record_cycle(
        &self,
        cycle_start: Duration,
        cycle_end: Duration,
        expected_cycle_start: Duration,
        tick_time: Duration,
    ) {
        let mut inner = self.inner.lock();
        inner.scan_count += 1;
        let scan_count = inner.scan_count;

        let scan_time_ns = cycle_end.saturating_sub(cycle_start).as_nanos() as u64;
        inner.scan_time.observe(scan_time_ns, scan_count);

        if let Some(prev) = inner.prev_cycle_start {
            let cycle_time_ns = cycle_start.saturating_sub(prev).as_nanos() as u64;
            inner.cycle_time.observe(cycle_time_ns, scan_count);
        }
        inner.prev_cycle_start = Some(cycle_start);

        let latency_ns = if cycle_start >= expected_cycle_start {
            (cycle_start - expected_cycle_start).as_nanos() as u64
        } else {
            (expected_cycle_start - cycle_start).as_nanos() as u64
        };
        inner.cycle_latency.observe(latency_ns, scan_count);

        if cycle_end > expected_cycle_start + tick_time {
            inner.overruns += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        StatsSnapshot {
            scan_count: inner.scan_count,
            overruns: inner.overruns,
            scan_time: inner.scan_time,
            cycle_time: inner.cycle_time,
            cycle_latency: inner.cycle_latency,
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cycle_skips_cycle_time() {
        let stats = ScanStats::new();
        stats.record_cycle(
            Duration::from_millis(0),
            Duration::from_millis(2),
            Duration::from_millis(0),
            Duration::from_millis(10),
        );
        let snap = stats.snapshot();
        assert_eq!(snap.scan_count, 1);
        assert_eq!(snap.cycle_time.max, 0);
        assert!(snap.scan_time.max > 0);
    }

    #[test]
    fn overrun_counted_when_cycle_end_passes_next_deadline() {
        let stats = ScanStats::new();
        stats.record_cycle(
            Duration::from_millis(0),
            Duration::from_millis(15),
            Duration::from_millis(0),
            Duration::from_millis(10),
        );
        assert_eq!(stats.snapshot().overruns, 1);
    }

    #[test]
    fn no_overrun_when_cycle_end_within_deadline() {
        let stats = ScanStats::new();
        stats.record_cycle(
            Duration::from_millis(0),
            Duration::from_millis(5),
            Duration::from_millis(0),
            Duration::from_millis(10),
        );
        assert_eq!(stats.snapshot().overruns, 0);
    }

    #[test]
    fn running_average_matches_incremental_formula() {
        let stats = ScanStats::new();
        let tick = Duration::from_millis(100);
        for ms in [4u64, 6, 5] {
            stats.record_cycle(
                Duration::from_millis(0),
                Duration::from_millis(ms),
                Duration::from_millis(0),
                tick,
            );
        }
        let snap = stats.snapshot();
        assert_eq!(snap.scan_count, 3);
        assert!((snap.scan_time.avg - 5_000_000.0).abs() < 1.0);
    }
}
