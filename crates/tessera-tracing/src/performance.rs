//! Performance-focused tracing utilities
//!
//! Timing guards and standard event shapes for the two things tessera spends
//! time on: moving bytes between memory spaces and launching kernels.
//!
//! ```rust
//! use tessera_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("stage_operands", Some(100));
//! // ... do work ...
//! drop(span); // logged only if it took at least 100us
//!
//! record_transfer(4096, "H2D", 250);
//! ```

use std::time::Instant;
use tracing::Level;

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// Logging is skipped when performance tracing is disabled globally (see
/// [`crate::TracingConfig::enable_performance_tracing`]) or when the elapsed
/// time is below the span's threshold. A span without its own threshold
/// falls back to the globally configured one.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a debug-level span with an optional threshold in microseconds.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Create a span at the given tracing level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Operation name this span measures.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    fn should_log(&self, elapsed_us: u64) -> bool {
        if !crate::performance_tracing_enabled() {
            return false;
        }
        self.threshold_us
            .or_else(crate::performance_threshold_us)
            .is_none_or(|threshold| elapsed_us >= threshold)
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.should_log(elapsed_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Bandwidth in MiB/s for `bytes` moved in `duration_us`.
pub fn bandwidth_mbps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
}

/// Record a data transfer between memory spaces.
///
/// `direction` is one of `"H2D"`, `"D2H"` or `"D2D"`.
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth = bandwidth_mbps(bytes, duration_us);
    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        kb = bytes as f64 / 1024.0,
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth,
        "data_transfer"
    );
}

/// Record a kernel launch over `blocks` blocks.
pub fn record_launch(kernel: &str, blocks: u64, duration_us: u64) {
    let blocks_per_sec = if duration_us > 0 {
        (blocks as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "launch",
        kernel = kernel,
        blocks = blocks,
        duration_us = duration_us,
        blocks_per_sec = blocks_per_sec,
        "kernel_launch"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_performance_span_creation() {
        let span = PerformanceSpan::new("test_span", None);
        assert_eq!(span.name(), "test_span");
        assert_eq!(span.threshold_us, None);
    }

    #[test]
    fn test_performance_span_elapsed() {
        let span = PerformanceSpan::new("test_span", None);
        thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed_us() >= 5_000);
    }

    #[test]
    fn test_performance_span_threshold_filters() {
        let span = PerformanceSpan::with_level(Level::INFO, "test_span", Some(1_000));
        if crate::performance_tracing_enabled() {
            assert!(!span.should_log(999));
            assert!(span.should_log(1_000));
        }
    }

    #[test]
    fn test_bandwidth_calculation() {
        // 1 MiB in 1ms
        let mbps = bandwidth_mbps(1024 * 1024, 1000);
        assert!((mbps - 1000.0).abs() < 0.01);
        assert_eq!(bandwidth_mbps(4096, 0), 0.0);
    }

    #[test]
    fn test_record_events() {
        record_transfer(4096, "H2D", 250);
        record_launch("inner_product", 8, 120);
    }
}
