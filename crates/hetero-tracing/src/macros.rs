//! Instrumentation macros used across the runtime crates.

/// Time the enclosing scope. Extra `field = value` pairs are attached to a
/// `perf` span entered for the guard's lifetime.
///
/// ```rust
/// use hetero_tracing::perf_span;
///
/// {
///     let _span = perf_span!("copy_h2d", bytes = 4096);
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        ).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug event tagged with `event = $name`.
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Run `$block`, returning `(result, elapsed_microseconds)`.
///
/// ```rust
/// use hetero_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("host_reference", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_perf_span_with_fields() {
        let span = perf_span!("launch", entry = "addVectors", args = 4);
        assert_eq!(span.name(), "launch");
    }

    #[test]
    fn test_perf_event_macro() {
        perf_event!("stream_finish", stream = 1u64, pending = 3usize);
    }

    #[test]
    fn test_timed_block_returns_result() {
        let (result, _duration_us) = timed_block!("answer", { 6 * 7 });
        assert_eq!(result, 42);
    }
}
