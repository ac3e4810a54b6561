//! Sharded, lock-light aggregation of everything the run observes.
//!
//! Every virtual user records through a [`Recorder`] pinned to one shard, so
//! the hot path is a short critical section on a mutex that only a fraction
//! of the VUs ever touch. Exactly-once accounting is structural: increments
//! happen under the shard lock, there is no sampling and no channel to drop
//! events from.
//!
//! [`Aggregator::snapshot`] locks shards one at a time and merges them. That
//! gives a consistent view per shard and eventual consistency across the
//! snapshot boundary: per-shard counters are monotone and merging sums
//! monotone series, so no counter is ever observed going backward.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::check::CheckResult;
use crate::http::RequestResult;

/// Metric names a threshold rule may reference.
pub fn known_metric(name: &str) -> bool {
    matches!(
        name,
        "requests"
            | "request_failures"
            | "iterations"
            | "iterations_failed"
            | "checks"
            | "check_failures"
            | "error_rate"
            | "check_rate"
            | "rps"
            | "active_vus"
            | "peak_vus"
            | "request_duration_min"
            | "request_duration_avg"
            | "request_duration_p50"
            | "request_duration_p90"
            | "request_duration_p95"
            | "request_duration_p99"
            | "request_duration_max"
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub passes: u64,
    pub failures: u64,
}

struct Shard {
    requests: u64,
    request_failures: u64,
    iterations: u64,
    iterations_failed: u64,
    // Indexed by status class: [1xx, 2xx, 3xx, 4xx, 5xx].
    status_classes: [u64; 5],
    latency: Histogram<u64>,
    checks: BTreeMap<String, CheckCounts>,
}

impl Shard {
    fn new() -> Self {
        Self {
            requests: 0,
            request_failures: 0,
            iterations: 0,
            iterations_failed: 0,
            status_classes: [0; 5],
            // 3 significant figures, auto-resizing, values in microseconds.
            latency: Histogram::new(3).expect("failed to create latency histogram"),
            checks: BTreeMap::new(),
        }
    }
}

/// Run-wide metrics store, shared by every virtual user.
pub struct Aggregator {
    shards: Vec<Mutex<Shard>>,
    next_shard: AtomicUsize,
    active_vus: AtomicUsize,
    peak_vus: AtomicUsize,
    started: Instant,
}

impl Aggregator {
    /// One shard per CPU keeps contention negligible at high VU counts.
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::new())).collect(),
            next_shard: AtomicUsize::new(0),
            active_vus: AtomicUsize::new(0),
            peak_vus: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Hand out a recorder pinned round-robin to one shard.
    pub fn recorder(self: &Arc<Self>) -> Recorder {
        let shard = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        Recorder {
            aggregator: Arc::clone(self),
            shard,
        }
    }

    pub(crate) fn vu_started(&self) {
        let now = self.active_vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_vus.fetch_max(now, Ordering::Relaxed);
    }

    pub(crate) fn vu_stopped(&self) {
        self.active_vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_vus(&self) -> usize {
        self.active_vus.load(Ordering::Relaxed)
    }

    /// A consistent point-in-time view of everything recorded so far.
    ///
    /// Callable mid-run; it does not block ongoing `record` calls beyond the
    /// one shard currently being merged.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut requests = 0u64;
        let mut request_failures = 0u64;
        let mut iterations = 0u64;
        let mut iterations_failed = 0u64;
        let mut status_classes = [0u64; 5];
        let mut checks: BTreeMap<String, CheckCounts> = BTreeMap::new();
        let mut latency =
            Histogram::<u64>::new(3).expect("failed to create latency histogram");

        for shard in &self.shards {
            let shard = shard.lock();
            requests += shard.requests;
            request_failures += shard.request_failures;
            iterations += shard.iterations;
            iterations_failed += shard.iterations_failed;
            for (merged, class) in status_classes.iter_mut().zip(shard.status_classes) {
                *merged += class;
            }
            for (name, counts) in &shard.checks {
                let entry = checks.entry(name.clone()).or_default();
                entry.passes += counts.passes;
                entry.failures += counts.failures;
            }
            let _ = latency.add(&shard.latency);
        }

        let (total_checks, check_failures) = checks
            .values()
            .fold((0, 0), |(t, f), c| (t + c.passes + c.failures, f + c.failures));

        let status_counts = ["1xx", "2xx", "3xx", "4xx", "5xx"]
            .into_iter()
            .zip(status_classes)
            .filter(|(_, n)| *n > 0)
            .map(|(class, n)| (class.to_string(), n))
            .collect();

        MetricsSnapshot {
            requests,
            request_failures,
            iterations,
            iterations_failed,
            checks: total_checks,
            check_failures,
            status_counts,
            per_check: checks,
            latency_ms: LatencySummary::from_histogram(&latency),
            elapsed: self.started.elapsed(),
            active_vus: self.active_vus.load(Ordering::Relaxed),
            peak_vus: self.peak_vus.load(Ordering::Relaxed),
        }
    }
}

/// Per-VU handle into the aggregator, pinned to one shard.
#[derive(Clone)]
pub struct Recorder {
    aggregator: Arc<Aggregator>,
    shard: usize,
}

impl Recorder {
    fn shard(&self) -> parking_lot::MutexGuard<'_, Shard> {
        self.aggregator.shards[self.shard].lock()
    }

    pub fn record_request(&self, result: &RequestResult) {
        let mut shard = self.shard();
        shard.requests += 1;
        if result.failed() {
            shard.request_failures += 1;
        }
        if let Some(status) = result.status {
            let class = (status / 100) as usize;
            if (1..=5).contains(&class) {
                shard.status_classes[class - 1] += 1;
            }
        }
        let micros = u64::try_from(result.latency.as_micros()).unwrap_or(u64::MAX);
        let _ = shard.latency.record(micros);
    }

    pub fn record_check(&self, check: CheckResult) {
        let mut shard = self.shard();
        let entry = shard.checks.entry(check.name).or_default();
        if check.ok {
            entry.passes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub fn record_iteration(&self, failed: bool) {
        let mut shard = self.shard();
        shard.iterations += 1;
        if failed {
            shard.iterations_failed += 1;
        }
    }
}

/// Latency distribution summary, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        let ms = |micros: u64| micros as f64 / 1000.0;
        Self {
            min: ms(hist.min()),
            avg: hist.mean() / 1000.0,
            p50: ms(hist.value_at_quantile(0.50)),
            p90: ms(hist.value_at_quantile(0.90)),
            p95: ms(hist.value_at_quantile(0.95)),
            p99: ms(hist.value_at_quantile(0.99)),
            max: ms(hist.max()),
        }
    }
}

/// Point-in-time view of the aggregated run metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub request_failures: u64,
    pub iterations: u64,
    pub iterations_failed: u64,
    pub checks: u64,
    pub check_failures: u64,
    /// Responses bucketed by status class ("2xx", "5xx", ...).
    pub status_counts: BTreeMap<String, u64>,
    /// Pass/fail counters per check name, aggregated globally.
    pub per_check: BTreeMap<String, CheckCounts>,
    pub latency_ms: LatencySummary,
    pub elapsed: Duration,
    pub active_vus: usize,
    pub peak_vus: usize,
}

impl MetricsSnapshot {
    /// Look up a metric by the name threshold rules use.
    pub fn value(&self, name: &str) -> Option<f64> {
        Some(match name {
            "requests" => self.requests as f64,
            "request_failures" => self.request_failures as f64,
            "iterations" => self.iterations as f64,
            "iterations_failed" => self.iterations_failed as f64,
            "checks" => self.checks as f64,
            "check_failures" => self.check_failures as f64,
            "error_rate" => {
                if self.requests == 0 {
                    0.0
                } else {
                    self.request_failures as f64 / self.requests as f64
                }
            }
            "check_rate" => {
                if self.checks == 0 {
                    1.0
                } else {
                    (self.checks - self.check_failures) as f64 / self.checks as f64
                }
            }
            "rps" => {
                let secs = self.elapsed.as_secs_f64();
                if secs == 0.0 { 0.0 } else { self.requests as f64 / secs }
            }
            "active_vus" => self.active_vus as f64,
            "peak_vus" => self.peak_vus as f64,
            "request_duration_min" => self.latency_ms.min,
            "request_duration_avg" => self.latency_ms.avg,
            "request_duration_p50" => self.latency_ms.p50,
            "request_duration_p90" => self.latency_ms.p90,
            "request_duration_p95" => self.latency_ms.p95,
            "request_duration_p99" => self.latency_ms.p99,
            "request_duration_max" => self.latency_ms.max,
            _ => return None,
        })
    }
}
