//! Timing guards and standard-shaped events for runtime operations.
//!
//! Every event emitted here carries `event = "<kind>"` plus numeric fields so
//! JSON output can be aggregated without parsing messages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static PERF_ENABLED: AtomicBool = AtomicBool::new(true);
// u64::MAX means "no threshold"
static PERF_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Globally enable or disable [`PerformanceSpan`] completion events.
pub fn set_performance_tracing(enabled: bool, threshold_us: Option<u64>) {
    PERF_ENABLED.store(enabled, Ordering::Relaxed);
    PERF_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

pub fn performance_tracing_enabled() -> bool {
    PERF_ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match PERF_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        t => Some(t),
    }
}

/// RAII guard timing an operation; logs `performance_span_complete` on drop
/// when the duration reaches the threshold.
///
/// ```rust
/// use hetero_tracing::performance::PerformanceSpan;
///
/// {
///     let _span = PerformanceSpan::new("kernel_build", Some(100));
///     // ... work ...
/// }
/// ```
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// `threshold_us` overrides the global threshold for this span only.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = tracing::debug_span!("perf", name = %name);
        Self {
            name,
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !performance_tracing_enabled() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Bytes per second expressed in MiB/s; zero for instantaneous transfers.
pub fn bandwidth_mibps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
}

/// A device buffer allocation.
pub fn record_allocation(bytes: usize, backend: &str, host_pinned: bool) {
    tracing::debug!(
        event = "allocation",
        bytes = bytes,
        backend = backend,
        host_pinned = host_pinned,
        "memory_allocation"
    );
}

/// A host/device copy. `direction` is one of `H2D`, `D2H` or `D2D`.
pub fn record_transfer(bytes: usize, direction: &str, is_async: bool, duration_us: u64) {
    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = direction,
        is_async = is_async,
        duration_us = duration_us,
        bandwidth_mibps = bandwidth_mibps(bytes, duration_us),
        "data_transfer"
    );
}

/// A kernel build request, whether it hit the artifact cache or not.
pub fn record_kernel_build(entry: &str, cache_hit: bool, duration_us: u64) {
    tracing::debug!(
        event = "kernel_build",
        entry = entry,
        cache_hit = cache_hit,
        duration_us = duration_us,
        "kernel_build"
    );
}

/// A kernel launch enqueued into a stream.
pub fn record_launch(entry: &str, stream: u64, args: usize, blocking: bool) {
    tracing::debug!(
        event = "launch",
        entry = entry,
        stream = stream,
        args = args,
        blocking = blocking,
        "kernel_launch"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_performance_span_keeps_name_and_threshold() {
        let span = PerformanceSpan::new("build", Some(1000));
        assert_eq!(span.name(), "build");
        assert_eq!(span.threshold_us, Some(1000));
    }

    #[test]
    fn test_performance_span_elapsed() {
        let span = PerformanceSpan::new("sleep", None);
        thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed_us() >= 5_000);
    }

    #[test]
    fn test_bandwidth_calculation() {
        // 1 MiB in 1 ms is 1000 MiB/s
        let mibps = bandwidth_mibps(1024 * 1024, 1000);
        assert!((mibps - 1000.0).abs() < 0.01);
        assert_eq!(bandwidth_mibps(4096, 0), 0.0);
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_allocation(4096, "Serial", false);
        record_transfer(4096, "H2D", true, 12);
        record_kernel_build("addVectors", true, 3);
        record_launch("addVectors", 0, 4, true);
    }
}
