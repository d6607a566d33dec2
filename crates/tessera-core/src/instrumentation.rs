//! Instrumentation for transfers and reductions
//!
//! Two levels of metrics:
//! 1. **Transfer-level**: every copy between memory spaces
//! 2. **Operation-level**: a full transform-reduce call, staging included
//!
//! Both are emitted as structured `tracing` debug events.
//!
//! ```text
//! use tessera_core::instrumentation::ReductionMetrics;
//!
//! let start = std::time::Instant::now();
//! // ... run the reduction ...
//! ReductionMetrics::new("inner_product", n, chunks, staged_bytes, start).log();
//! ```

use std::fmt;
use std::time::Instant;
use tessera_tracing::performance::{bandwidth_mbps, record_transfer};

/// Direction of a copy between memory spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl TransferDirection {
    /// Short label used in log events
    pub const fn as_str(self) -> &'static str {
        match self {
            TransferDirection::HostToDevice => "H2D",
            TransferDirection::DeviceToHost => "D2H",
            TransferDirection::DeviceToDevice => "D2D",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics for a single transfer
#[derive(Debug, Clone)]
pub struct TransferMetrics {
    pub direction: TransferDirection,
    pub bytes: usize,
    pub duration_us: u64,
}

impl TransferMetrics {
    /// Measure a transfer that began at `start`
    pub fn new(direction: TransferDirection, bytes: usize, start: Instant) -> Self {
        Self {
            direction,
            bytes,
            duration_us: start.elapsed().as_micros() as u64,
        }
    }

    /// Bandwidth in MiB/s
    pub fn bandwidth_mbps(&self) -> f64 {
        bandwidth_mbps(self.bytes, self.duration_us)
    }

    /// Log via tracing
    pub fn log(&self) {
        record_transfer(self.bytes, self.direction.as_str(), self.duration_us);
    }
}

/// Metrics for a complete reduction
#[derive(Debug, Clone)]
pub struct ReductionMetrics {
    /// Operation name (e.g. "inner_product")
    pub operation_name: String,
    /// Elements reduced
    pub elements: usize,
    /// Chunks the range was split into
    pub chunks: usize,
    /// Bytes copied onto the device to stage operands
    pub staged_bytes: usize,
    /// Wall time including staging, in microseconds
    pub total_duration_us: u64,
}

impl ReductionMetrics {
    /// Create reduction metrics from start time
    pub fn new(
        operation_name: impl Into<String>,
        elements: usize,
        chunks: usize,
        staged_bytes: usize,
        start: Instant,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            elements,
            chunks,
            staged_bytes,
            total_duration_us: start.elapsed().as_micros() as u64,
        }
    }

    /// Elements reduced per second
    pub fn elements_per_second(&self) -> f64 {
        if self.total_duration_us == 0 {
            return 0.0;
        }
        (self.elements as f64 / self.total_duration_us as f64) * 1_000_000.0
    }

    /// Log via tracing
    pub fn log(&self) {
        tracing::debug!(
            operation = %self.operation_name,
            elements = self.elements,
            chunks = self.chunks,
            staged_bytes = self.staged_bytes,
            total_duration_us = self.total_duration_us,
            elements_per_second = self.elements_per_second(),
            "reduction_complete"
        );
    }
}
