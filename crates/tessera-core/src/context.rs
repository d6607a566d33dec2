//! Execution context
//!
//! A [`Context`] wraps one `tessera-backends` [`Backend`] and is the only way
//! the rest of the crate touches device memory or launches work.
//!
//! ## Architecture
//!
//! ```text
//! tessera-core::Context   (Arc, cheap to clone)
//!   ├── RwLock<Box<dyn Backend>>   write: allocate/copy/free, read: launch
//!   ├── DeviceInfo                 capability lookup for chunk planning
//!   ├── ContextConfig              tuning
//!   └── TransferStats              H2D / D2H / D2D accounting
//! ```
//!
//! ## Default context
//!
//! [`Context::acquire_default`] returns a process-wide context built lazily
//! from [`ContextConfig::from_env`]. It lives until the process exits.

use crate::config::ContextConfig;
use crate::error::Result;
use crate::instrumentation::{TransferDirection, TransferMetrics};
use crate::ops::parallel::ReductionPlan;
use bytemuck::Pod;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tessera_backends::{Backend, BufferHandle, CpuBackend, DeviceInfo, Kernel, LaunchConfig};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static DEFAULT_CONTEXT: OnceLock<Context> = OnceLock::new();

/// Handle to an execution backend
///
/// Clones refer to the same backend. A context may be shared freely across
/// threads; backend access is serialized internally.
///
/// # Example
///
/// ```rust
/// use tessera_core::{Context, ContextConfig};
///
/// let ctx = Context::from_config(ContextConfig::default().with_threads(2))?;
/// assert_eq!(ctx.device_info().compute_units, 2);
/// # Ok::<(), tessera_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    backend: RwLock<Box<dyn Backend + Send + Sync>>,
    info: DeviceInfo,
    config: ContextConfig,
    stats: TransferStats,
}

impl Context {
    /// Create a context over a CPU backend with default configuration
    pub fn new() -> Result<Self> {
        Self::from_config(ContextConfig::default())
    }

    /// Create a context over a CPU backend configured from `config`
    #[tracing::instrument(level = "debug")]
    pub fn from_config(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let backend = CpuBackend::with_config(config.cpu_backend_config())?;
        Self::with_backend(Box::new(backend), config)
    }

    /// Create a context over an arbitrary backend
    pub fn with_backend(backend: Box<dyn Backend + Send + Sync>, config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let mut info = backend.device_info();
        info.compute_units = info.compute_units.max(1);
        info.max_blocks = info.max_blocks.max(1);

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            context_id = id,
            device = %info.name,
            compute_units = info.compute_units,
            "context_created"
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                backend: RwLock::new(backend),
                info,
                config,
                stats: TransferStats::default(),
            }),
        })
    }

    /// The process-wide default context
    ///
    /// Built on first use from [`ContextConfig::from_env`]. Every successful
    /// call returns the same context. A failed initialization is reported
    /// and retried on the next call.
    pub fn acquire_default() -> Result<Self> {
        if let Some(ctx) = DEFAULT_CONTEXT.get() {
            return Ok(ctx.clone());
        }
        let ctx = Self::from_config(ContextConfig::from_env()?)?;
        Ok(DEFAULT_CONTEXT.get_or_init(|| ctx).clone())
    }

    /// Resolve an optional explicit context, falling back to the default
    pub(crate) fn resolve(ctx: Option<&Context>) -> Result<Self> {
        match ctx {
            Some(ctx) => Ok(ctx.clone()),
            None => Self::acquire_default(),
        }
    }

    /// Unique id of this context
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether `other` refers to the same backend
    pub fn is_same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Device capabilities
    pub fn device_info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    /// Configuration this context was built with
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// How a reduction over `n` elements is split into chunks
    pub fn reduction_plan(&self, n: usize) -> ReductionPlan {
        ReductionPlan::new(n, &self.inner.info, &self.inner.config)
    }

    /// Snapshot of the transfer counters
    pub fn transfer_stats(&self) -> TransferSnapshot {
        self.inner.stats.snapshot()
    }

    /// Zero the transfer counters
    pub fn reset_transfer_stats(&self) {
        self.inner.stats.reset();
    }

    /// Block until the backend has drained submitted work
    pub fn synchronize(&self) -> Result<()> {
        self.inner.backend.read().synchronize()?;
        Ok(())
    }

    // ============================================================================================
    // Device memory (crate-internal)
    // ============================================================================================

    pub(crate) fn allocate(&self, bytes: usize) -> Result<BufferHandle> {
        Ok(self.inner.backend.write().allocate_buffer(bytes)?)
    }

    pub(crate) fn free(&self, handle: BufferHandle) -> Result<()> {
        Ok(self.inner.backend.write().free_buffer(handle)?)
    }

    /// Copy `data` into `handle` starting at element `offset` (H2D)
    pub(crate) fn upload<T: Pod>(&self, handle: BufferHandle, offset: usize, data: &[T]) -> Result<()> {
        let size = std::mem::size_of::<T>();
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let start = Instant::now();
        self.inner.backend.write().write_buffer(handle, offset * size, bytes)?;
        self.record(TransferDirection::HostToDevice, bytes.len(), start);
        Ok(())
    }

    /// Copy elements starting at `offset` of `handle` into `out` (D2H)
    pub(crate) fn download<T: Pod>(&self, handle: BufferHandle, offset: usize, out: &mut [T]) -> Result<()> {
        let size = std::mem::size_of::<T>();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        let len = bytes.len();
        let start = Instant::now();
        self.inner.backend.read().read_buffer(handle, offset * size, bytes)?;
        self.record(TransferDirection::DeviceToHost, len, start);
        Ok(())
    }

    /// Copy `bytes` bytes between device buffers (D2D)
    pub(crate) fn copy_device(
        &self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        bytes: usize,
    ) -> Result<()> {
        let start = Instant::now();
        self.inner
            .backend
            .write()
            .copy_buffer(src, src_offset, dst, dst_offset, bytes)?;
        self.record(TransferDirection::DeviceToDevice, bytes, start);
        Ok(())
    }

    pub(crate) fn launch(&self, config: &LaunchConfig, args: &[BufferHandle], kernel: &Kernel<'_>) -> Result<()> {
        Ok(self.inner.backend.read().launch(config, args, kernel)?)
    }

    fn record(&self, direction: TransferDirection, bytes: usize, start: Instant) {
        self.inner.stats.record(direction, bytes);
        TransferMetrics::new(direction, bytes, start).log();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("device", &self.inner.info.name)
            .field("compute_units", &self.inner.info.compute_units)
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        tracing::debug!(context_id = self.id, "context dropped");
    }
}

/// Counters for copies between memory spaces
#[derive(Debug, Default)]
struct TransferStats {
    host_to_device: AtomicU64,
    host_to_device_bytes: AtomicU64,
    device_to_host: AtomicU64,
    device_to_host_bytes: AtomicU64,
    device_to_device: AtomicU64,
    device_to_device_bytes: AtomicU64,
}

impl TransferStats {
    fn record(&self, direction: TransferDirection, bytes: usize) {
        let (count, total) = match direction {
            TransferDirection::HostToDevice => (&self.host_to_device, &self.host_to_device_bytes),
            TransferDirection::DeviceToHost => (&self.device_to_host, &self.device_to_host_bytes),
            TransferDirection::DeviceToDevice => (&self.device_to_device, &self.device_to_device_bytes),
        };
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            host_to_device: self.host_to_device.load(Ordering::Relaxed),
            host_to_device_bytes: self.host_to_device_bytes.load(Ordering::Relaxed),
            device_to_host: self.device_to_host.load(Ordering::Relaxed),
            device_to_host_bytes: self.device_to_host_bytes.load(Ordering::Relaxed),
            device_to_device: self.device_to_device.load(Ordering::Relaxed),
            device_to_device_bytes: self.device_to_device_bytes.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.host_to_device,
            &self.host_to_device_bytes,
            &self.device_to_host,
            &self.device_to_host_bytes,
            &self.device_to_device,
            &self.device_to_device_bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of a context's transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSnapshot {
    /// Host-to-device copies
    pub host_to_device: u64,
    pub host_to_device_bytes: u64,
    /// Device-to-host copies
    pub device_to_host: u64,
    pub device_to_host_bytes: u64,
    /// Device-to-device copies
    pub device_to_device: u64,
    pub device_to_device_bytes: u64,
}

impl TransferSnapshot {
    /// Copies that crossed between host and device
    pub fn cross_space(&self) -> u64 {
        self.host_to_device + self.device_to_host
    }

    /// All copies, including device-to-device
    pub fn total(&self) -> u64 {
        self.cross_space() + self.device_to_device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context::from_config(ContextConfig::default().with_threads(2)).unwrap()
    }

    #[test]
    fn test_context_creation() {
        let ctx = context();
        assert_eq!(ctx.device_info().name, "cpu");
        assert_eq!(ctx.device_info().compute_units, 2);
        assert_eq!(ctx.transfer_stats(), TransferSnapshot::default());
    }

    #[test]
    fn test_clones_share_identity() {
        let ctx = context();
        let other = context();
        assert!(ctx.is_same(&ctx.clone()));
        assert_eq!(ctx.id(), ctx.clone().id());
        assert!(!ctx.is_same(&other));
        assert_ne!(ctx.id(), other.id());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = Context::from_config(ContextConfig::default().with_min_chunk_len(0));
        assert!(matches!(result, Err(crate::Error::InvalidConfig(_))));
    }

    #[test]
    fn test_transfer_accounting() {
        let ctx = context();
        let a = ctx.allocate(16).unwrap();
        let b = ctx.allocate(16).unwrap();

        ctx.upload(a, 0, &[1u32, 2, 3, 4]).unwrap();
        ctx.copy_device(a, 0, b, 0, 16).unwrap();
        let mut out = [0u32; 2];
        ctx.download(b, 2, &mut out).unwrap();
        assert_eq!(out, [3, 4]);

        let stats = ctx.transfer_stats();
        assert_eq!(stats.host_to_device, 1);
        assert_eq!(stats.host_to_device_bytes, 16);
        assert_eq!(stats.device_to_device, 1);
        assert_eq!(stats.device_to_host, 1);
        assert_eq!(stats.device_to_host_bytes, 8);
        assert_eq!(stats.cross_space(), 2);
        assert_eq!(stats.total(), 3);

        ctx.reset_transfer_stats();
        assert_eq!(ctx.transfer_stats().total(), 0);

        ctx.free(a).unwrap();
        ctx.free(b).unwrap();
    }

    #[test]
    fn test_backend_errors_pass_through() {
        let ctx = context();
        let err = ctx.free(BufferHandle::new(4242)).unwrap_err();
        assert!(matches!(
            err.as_backend_error(),
            Some(tessera_backends::BackendError::InvalidBufferHandle(4242))
        ));
    }

    #[test]
    fn test_debug_format() {
        let ctx = context();
        let rendered = format!("{ctx:?}");
        assert!(rendered.contains("Context"));
        assert!(rendered.contains("cpu"));
    }
}
