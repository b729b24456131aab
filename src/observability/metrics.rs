//! Dispatch counters for the overlay status view.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets tuned for callbacks expected to finish well within one tick.
    pub fn callback_latency() -> Self {
        Self::new(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0])
    }

    pub fn observe(&self, millis: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((millis * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0 / n as f64,
        }
    }

    /// Pairs of (upper bound, count); the last bound is `f64::INFINITY`.
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.bounds
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(self.buckets.iter().map(|b| b.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Host-wide dispatch counters.
#[derive(Debug)]
pub struct DispatchMetrics {
    pub submitted: Counter,
    pub completed: Counter,
    pub failed: Counter,
    pub discarded: Counter,
    pub deferred: Counter,
    pub replayed: Counter,
    pub overdrawn: Counter,
    pub saturation_events: Counter,
    pub in_flight: Gauge,
    pub call_latency_ms: Histogram,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            submitted: Counter::new(),
            completed: Counter::new(),
            failed: Counter::new(),
            discarded: Counter::new(),
            deferred: Counter::new(),
            replayed: Counter::new(),
            overdrawn: Counter::new(),
            saturation_events: Counter::new(),
            in_flight: Gauge::new(),
            call_latency_ms: Histogram::callback_latency(),
        }
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&self) {
        self.in_flight.inc();
    }

    pub(crate) fn record_end(&self, success: bool, latency_ms: f64) {
        self.in_flight.dec();
        self.call_latency_ms.observe(latency_ms);
        if success {
            self.completed.inc();
        } else {
            self.failed.inc();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.get(),
            completed: self.completed.get(),
            failed: self.failed.get(),
            discarded: self.discarded.get(),
            deferred: self.deferred.get(),
            replayed: self.replayed.get(),
            overdrawn: self.overdrawn.get(),
            saturation_events: self.saturation_events.get(),
            in_flight: self.in_flight.get(),
            mean_latency_ms: self.call_latency_ms.mean_ms(),
        }
    }
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub discarded: u64,
    pub deferred: u64,
    pub replayed: u64,
    pub overdrawn: u64,
    pub saturation_events: u64,
    pub in_flight: i64,
    pub mean_latency_ms: f64,
}

impl MetricsSnapshot {
    /// Calls that ran to completion, successfully or not.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}
