//! Convenience macros for performance tracing

/// Create a [`PerformanceSpan`](crate::performance::PerformanceSpan) guard.
///
/// Extra `field = value` pairs are emitted once as an event inside the
/// guard's `perf` span.
///
/// ```rust
/// use tessera_tracing::perf_span;
///
/// {
///     let _span = perf_span!("stage_operand", bytes = 4096);
///     // ... operation code ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let span = $crate::performance::PerformanceSpan::new($name, None);
        {
            let _entered = span.enter();
            $crate::tracing::debug!($($field = $value),+, "perf_span_fields");
        }
        span
    }};
}

/// Emit a debug-level event tagged with `event = name`.
///
/// ```rust
/// use tessera_tracing::perf_event;
///
/// perf_event!("staging_complete", bytes = 1024, duration_us = 15);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        $crate::tracing::debug!(event = $name, $($field = $value),+)
    };
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use tessera_tracing::timed_block;
///
/// let (sum, duration_us) = timed_block!("sum", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// # let _ = duration_us;
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = ::std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
