//! Lock-free poll and dispatch counters
//!
//! Written from the monitor loop and the dispatch worker, read by the
//! periodic stats log and the `/metrics` route.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for every outcome a poll tick or a dispatch can have
#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    ticks: AtomicU64,
    readings: AtomicU64,
    device_absent: AtomicU64,
    transport_failures: AtomicU64,
    parse_misses: AtomicU64,
    dispatches_ok: AtomicU64,
    dispatches_failed: AtomicU64,
    dispatches_dropped: AtomicU64,
    last_dispatch_latency_us: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            ticks: AtomicU64::new(0),
            readings: AtomicU64::new(0),
            device_absent: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            parse_misses: AtomicU64::new(0),
            dispatches_ok: AtomicU64::new(0),
            dispatches_failed: AtomicU64::new(0),
            dispatches_dropped: AtomicU64::new(0),
            last_dispatch_latency_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_device_absent(&self) {
        self.device_absent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_miss(&self) {
        self.parse_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished POST and how long it took
    pub fn record_dispatch(&self, ok: bool, latency_us: u64) {
        if ok {
            self.dispatches_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dispatches_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_dispatch_latency_us.store(latency_us, Ordering::Relaxed);
    }

    /// Dispatch discarded because the worker queue was full or closed
    #[inline]
    pub fn record_dispatch_dropped(&self) {
        self.dispatches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            ticks: self.ticks.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            device_absent: self.device_absent.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            parse_misses: self.parse_misses.load(Ordering::Relaxed),
            dispatches_ok: self.dispatches_ok.load(Ordering::Relaxed),
            dispatches_failed: self.dispatches_failed.load(Ordering::Relaxed),
            dispatches_dropped: self.dispatches_dropped.load(Ordering::Relaxed),
            last_dispatch_latency_us: self.last_dispatch_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub ticks: u64,
    pub readings: u64,
    pub device_absent: u64,
    pub transport_failures: u64,
    pub parse_misses: u64,
    pub dispatches_ok: u64,
    pub dispatches_failed: u64,
    pub dispatches_dropped: u64,
    pub last_dispatch_latency_us: u64,
}

impl StatsSnapshot {
    /// Share of ticks that produced a weight, 0.0 before the first tick
    pub fn read_success_ratio(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.readings as f64 / self.ticks as f64
    }

    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            ticks = %self.ticks,
            readings = %self.readings,
            read_ratio = format!("{:.2}", self.read_success_ratio()),
            device_absent = %self.device_absent,
            transport_failures = %self.transport_failures,
            parse_misses = %self.parse_misses,
            dispatches_ok = %self.dispatches_ok,
            dispatches_failed = %self.dispatches_failed,
            dispatches_dropped = %self.dispatches_dropped,
            "stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = Stats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.ticks, 0);
        assert_eq!(snap.dispatches_ok, 0);
        assert_eq!(snap.read_success_ratio(), 0.0);
    }

    #[test]
    fn test_record_tick_outcomes() {
        let stats = Stats::new();

        stats.record_tick();
        stats.record_reading();
        stats.record_tick();
        stats.record_parse_miss();
        stats.record_tick();
        stats.record_transport_failure();
        stats.record_tick();
        stats.record_device_absent();

        let snap = stats.snapshot();
        assert_eq!(snap.ticks, 4);
        assert_eq!(snap.readings, 1);
        assert_eq!(snap.parse_misses, 1);
        assert_eq!(snap.transport_failures, 1);
        assert_eq!(snap.device_absent, 1);
        assert_eq!(snap.read_success_ratio(), 0.25);
    }

    #[test]
    fn test_record_dispatch() {
        let stats = Stats::new();

        stats.record_dispatch(true, 1200);
        stats.record_dispatch(false, 2_000_000);
        stats.record_dispatch_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.dispatches_ok, 1);
        assert_eq!(snap.dispatches_failed, 1);
        assert_eq!(snap.dispatches_dropped, 1);
        assert_eq!(snap.last_dispatch_latency_us, 2_000_000);
    }
}
