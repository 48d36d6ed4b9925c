use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tick latency counters. Shareable between the run loop and a reporter.
pub struct TickMetrics {
    ticks: AtomicU64,
    overruns: AtomicU64,
    errors: AtomicU64,
    commands: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

/// Point-in-time copy of [`TickMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub ticks: u64,
    pub overruns: u64,
    pub errors: u64,
    pub commands: u64,
    pub min_latency: Duration,
    pub mean_latency: Duration,
    pub max_latency: Duration,
}

impl TickMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Record one tick's processing time; `budget` is the tick interval.
    pub fn record_tick(&self, latency: Duration, budget: Duration) -> bool {
        let ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_latency_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(ns, Ordering::Relaxed);
        let overrun = latency > budget;
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        overrun
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let ticks = self.ticks();
        if ticks == 0 {
            return LatencySnapshot {
                errors: self.errors.load(Ordering::Relaxed),
                ..LatencySnapshot::default()
            };
        }
        let total = self.total_latency_ns.load(Ordering::Relaxed);
        LatencySnapshot {
            ticks,
            overruns: self.overruns(),
            errors: self.errors.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            min_latency: Duration::from_nanos(self.min_latency_ns.load(Ordering::Relaxed)),
            mean_latency: Duration::from_nanos(total / ticks),
            max_latency: Duration::from_nanos(self.max_latency_ns.load(Ordering::Relaxed)),
        }
    }

    /// Start a fresh window.
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.commands.store(0, Ordering::Relaxed);
        self.total_latency_ns.store(0, Ordering::Relaxed);
        self.min_latency_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_latency_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for TickMetrics {
    fn default() -> Self {
        Self::new()
    }
}
