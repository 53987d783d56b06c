//! Prometheus-compatible metrics: counters, gauges, histograms, registry.
//!
//! Covers the four golden signals (latency, traffic, errors, saturation)
//! with three metric kinds:
//!
//! - **Counter**: monotonically increasing u64 (tasks completed, requests).
//! - **Gauge**: i64 that moves both ways (queue depth, active connections).
//! - **Histogram**: latency distribution over fixed buckets. Percentiles,
//!   not averages, are what SLOs are written against.
//!
//! # Concurrency
//!
//! Counter and gauge updates are relaxed atomic ops, a couple of
//! nanoseconds, safe from any thread. Histogram bucket counts are relaxed
//! atomics too; only the floating-point sum sits behind a mutex, because
//! there is no portable atomic f64 fetch-add. The registry's own mutex
//! covers registration and full-page serialization, never the update paths.
//!
//! # Exposition
//!
//! `MetricsRegistry::serialize` produces the Prometheus text format
//! (`# HELP` / `# TYPE` / value lines, histogram `_bucket`/`_sum`/`_count`)
//! exactly as the `/metrics` HTTP endpoint must return it.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Poison-tolerant lock: the guarded values (an f64, plain vectors of Arcs)
/// are valid regardless of a panicking holder.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Counter
// ============================================================================

/// Monotonically increasing counter.
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_exposition(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} counter", self.name);
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }

    /// This metric's exposition block on its own.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_exposition(&mut out);
        out
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// Point-in-time value that can move in both directions.
pub struct Gauge {
    name: String,
    help: String,
    value: AtomicI64,
}

impl Gauge {
    fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            value: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_exposition(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} gauge", self.name);
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_exposition(&mut out);
        out
    }
}

// ============================================================================
// Histogram
// ============================================================================

/// Cumulative histogram over fixed upper bounds, in seconds.
///
/// `observe(x)` increments every bucket whose bound is `>= x` plus the
/// implicit `+Inf` bucket, so each `_bucket` line is a running cumulative
/// count, which is the shape Prometheus quantile queries expect.
pub struct Histogram {
    name: String,
    help: String,
    /// Sorted upper bounds; `bucket_counts` has one extra slot for `+Inf`.
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    /// f64 has no portable atomic fetch-add; the mutex is held for the
    /// duration of one addition.
    sum: Mutex<f64>,
    count: AtomicU64,
}

impl Histogram {
    /// Default latency bounds: 100µs to 5s.
    pub fn default_buckets() -> Vec<f64> {
        vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    }

    fn new(name: &str, help: &str, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| {
            a.partial_cmp(b)
                .expect("histogram bucket bounds must be finite")
        });
        let bucket_counts = (0..buckets.len() + 1).map(|_| AtomicU64::new(0)).collect();

        Self {
            name: name.to_string(),
            help: help.to_string(),
            buckets,
            bucket_counts,
            sum: Mutex::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation, in seconds.
    pub fn observe(&self, seconds: f64) {
        for (i, bound) in self.buckets.iter().enumerate() {
            if seconds <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        // +Inf counts every observation.
        self.bucket_counts[self.buckets.len()].fetch_add(1, Ordering::Relaxed);

        *lock(&self.sum) += seconds;
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the elapsed time since `start`.
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        *lock(&self.sum)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_exposition(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} histogram", self.name);
        for (i, bound) in self.buckets.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                self.bucket_counts[i].load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            out,
            "{}_bucket{{le=\"+Inf\"}} {}",
            self.name,
            self.bucket_counts[self.buckets.len()].load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "{}_sum {}", self.name, self.sum());
        let _ = writeln!(out, "{}_count {}", self.name, self.count());
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_exposition(&mut out);
        out
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct RegistryInner {
    counters: Vec<Arc<Counter>>,
    gauges: Vec<Arc<Gauge>>,
    histograms: Vec<Arc<Histogram>>,
}

/// Owns every registered metric for its whole lifetime and serializes the
/// full exposition page. Metrics are never removed, so the `Arc` handles a
/// registrant keeps stay valid as long as the registry exists.
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Arc<Counter> {
        let counter = Arc::new(Counter::new(name, help));
        lock(&self.inner).counters.push(Arc::clone(&counter));
        counter
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Arc<Gauge> {
        let gauge = Arc::new(Gauge::new(name, help));
        lock(&self.inner).gauges.push(Arc::clone(&gauge));
        gauge
    }

    /// Register a histogram with the default latency buckets.
    pub fn register_histogram(&self, name: &str, help: &str) -> Arc<Histogram> {
        self.register_histogram_with_buckets(name, help, Histogram::default_buckets())
    }

    pub fn register_histogram_with_buckets(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Arc<Histogram> {
        let histogram = Arc::new(Histogram::new(name, help, buckets));
        lock(&self.inner).histograms.push(Arc::clone(&histogram));
        histogram
    }

    /// Serialize every owned metric in Prometheus text format. This is the
    /// exact body `GET /metrics` returns.
    pub fn serialize(&self) -> String {
        let inner = lock(&self.inner);
        let mut out = String::new();
        for counter in &inner.counters {
            counter.write_exposition(&mut out);
            out.push('\n');
        }
        for gauge in &inner.gauges {
            gauge.write_exposition(&mut out);
            out.push('\n');
        }
        for histogram in &inner.histograms {
            histogram.write_exposition(&mut out);
            out.push('\n');
        }
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("jobs_done", "Total jobs done");
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc_by(2);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn counter_exposition_shape() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("jobs_done", "Total jobs done");
        counter.inc_by(3);
        assert_eq!(
            counter.serialize(),
            "# HELP jobs_done Total jobs done\n# TYPE jobs_done counter\njobs_done 3\n"
        );
    }

    #[test]
    fn gauge_moves_both_ways() {
        let registry = MetricsRegistry::new();
        let gauge = registry.register_gauge("depth", "Queue depth");
        gauge.set(5);
        gauge.inc();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 4);
        assert!(gauge.serialize().contains("# TYPE depth gauge"));
        assert!(gauge.serialize().contains("depth 4"));
    }

    #[test]
    fn gauge_goes_negative() {
        let registry = MetricsRegistry::new();
        let gauge = registry.register_gauge("delta", "Signed value");
        gauge.dec();
        assert_eq!(gauge.get(), -1);
        assert!(gauge.serialize().contains("delta -1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        let histogram = registry.register_histogram("latency_seconds", "Latency");

        histogram.observe(0.0005); // lands in 0.001 and everything above
        histogram.observe(0.003); // lands in 0.005 and everything above
        histogram.observe(2.0); // lands in 5.0 and +Inf

        let text = histogram.serialize();
        assert!(text.contains("latency_seconds_bucket{le=\"0.0001\"} 0"));
        assert!(text.contains("latency_seconds_bucket{le=\"0.001\"} 1"));
        assert!(text.contains("latency_seconds_bucket{le=\"0.005\"} 2"));
        assert!(text.contains("latency_seconds_bucket{le=\"1\"} 2"));
        assert!(text.contains("latency_seconds_bucket{le=\"5\"} 3"));
        assert!(text.contains("latency_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("latency_seconds_count 3"));
        assert_eq!(histogram.count(), 3);
        assert!((histogram.sum() - 2.0035).abs() < 1e-9);
    }

    #[test]
    fn histogram_sorts_custom_buckets() {
        let registry = MetricsRegistry::new();
        let histogram = registry.register_histogram_with_buckets(
            "h",
            "help",
            vec![0.5, 0.1, 1.0],
        );
        histogram.observe(0.2);
        let text = histogram.serialize();
        let le_01 = text.find("le=\"0.1\"").unwrap();
        let le_05 = text.find("le=\"0.5\"").unwrap();
        assert!(le_01 < le_05);
        assert!(text.contains("h_bucket{le=\"0.5\"} 1"));
        assert!(text.contains("h_bucket{le=\"0.1\"} 0"));
    }

    #[test]
    fn empty_registry_serializes_to_nothing() {
        let registry = MetricsRegistry::new();
        assert!(registry.serialize().trim().is_empty());
    }

    #[test]
    fn registry_page_contains_all_kinds() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("c_total", "A counter");
        registry.register_gauge("g_current", "A gauge");
        registry.register_histogram("h_seconds", "A histogram");
        counter.inc_by(3);

        let page = registry.serialize();
        assert!(page.contains("# TYPE c_total counter"));
        assert!(page.contains("c_total 3"));
        assert!(page.contains("# TYPE g_current gauge"));
        assert!(page.contains("# TYPE h_seconds histogram"));
        assert!(page.contains("h_seconds_bucket{le=\"+Inf\"} 0"));
        assert!(page.contains("h_seconds_sum 0"));
        // Blank line between metric blocks, LF line endings throughout.
        assert!(page.contains("\n\n"));
        assert!(!page.contains('\r'));
    }

    #[test]
    fn concurrent_observes_are_lossless() {
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let histogram = registry.register_histogram("conc_seconds", "Concurrent");

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let histogram = Arc::clone(&histogram);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        histogram.observe(0.002);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(histogram.count(), 4000);
        assert!((histogram.sum() - 8.0).abs() < 1e-6);
    }
}
