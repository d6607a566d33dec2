//! CPU backend implementation
//!
//! Reference implementation of the [`Backend`] trait. Device memory is
//! simulated by [`memory::MemoryManager`] and launches fan blocks out over a
//! dedicated rayon thread pool.
//!
//! # Architecture
//!
//! ```text
//! CpuBackend
//! ├── MemoryManager  - aligned buffer table
//! └── ThreadPool     - rayon pool executing blocks in parallel
//! ```

pub(crate) mod memory;

use crate::backend::{Backend, BlockContext, BufferHandle, DeviceInfo, Kernel, LaunchConfig};
use crate::error::{BackendError, Result};
use memory::MemoryManager;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tessera_tracing::perf_span;
use tessera_tracing::performance::record_launch;

/// Default cap on blocks per launch
pub const DEFAULT_MAX_BLOCKS: u32 = 1 << 16;

/// Construction parameters for [`CpuBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuBackendConfig {
    /// Worker threads in the launch pool; `None` uses rayon's default
    pub threads: Option<usize>,
    /// Largest single allocation, in bytes
    pub max_allocation_bytes: usize,
    /// Largest grid accepted by [`Backend::launch`]
    pub max_blocks: u32,
}

impl Default for CpuBackendConfig {
    fn default() -> Self {
        Self {
            threads: None,
            max_allocation_bytes: isize::MAX as usize,
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

/// CPU backend
///
/// Clones share the same memory and thread pool.
#[derive(Clone)]
pub struct CpuBackend {
    memory: Arc<RwLock<MemoryManager>>,
    pool: Arc<rayon::ThreadPool>,
    config: CpuBackendConfig,
}

impl CpuBackend {
    /// Create a CPU backend with default configuration
    ///
    /// # Example
    ///
    /// ```rust
    /// use tessera_backends::{Backend, CpuBackend};
    ///
    /// let backend = CpuBackend::new().unwrap();
    /// assert!(backend.device_info().compute_units >= 1);
    /// ```
    pub fn new() -> Result<Self> {
        Self::with_config(CpuBackendConfig::default())
    }

    /// Create a CPU backend with explicit configuration
    #[tracing::instrument(level = "debug")]
    pub fn with_config(config: CpuBackendConfig) -> Result<Self> {
        if config.threads == Some(0) {
            return Err(BackendError::Initialization("thread count must be non-zero".to_string()));
        }
        if config.max_blocks == 0 {
            return Err(BackendError::Initialization("max_blocks must be non-zero".to_string()));
        }

        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("tessera-cpu-{i}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| BackendError::Initialization(e.to_string()))?;

        tracing::debug!(threads = pool.current_num_threads(), "cpu_backend_created");

        Ok(Self {
            memory: Arc::new(RwLock::new(MemoryManager::new(config.max_allocation_bytes))),
            pool: Arc::new(pool),
            config,
        })
    }

    /// Number of live device buffers
    pub fn buffer_count(&self) -> usize {
        self.memory.read().buffer_count()
    }

    /// Bytes held by live device buffers
    pub fn allocated_bytes(&self) -> usize {
        self.memory.read().allocated_bytes()
    }
}

impl Backend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "cpu".to_string(),
            compute_units: self.pool.current_num_threads(),
            max_allocation_bytes: self.config.max_allocation_bytes,
            max_blocks: self.config.max_blocks,
        }
    }

    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.memory.write().allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.write().free_buffer(handle)
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.memory.write().write_buffer(handle, offset, data)
    }

    fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        self.memory.read().read_buffer(handle, offset, data)
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        size: usize,
    ) -> Result<()> {
        self.memory.write().copy_buffer(src, src_offset, dst, dst_offset, size)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.read().buffer_size(handle)
    }

    fn launch(&self, config: &LaunchConfig, args: &[BufferHandle], kernel: &Kernel<'_>) -> Result<()> {
        let total_blocks = config.total_blocks();
        if total_blocks == 0 {
            return Ok(());
        }
        if config.grid.x > self.config.max_blocks {
            return Err(BackendError::InvalidLaunchConfig(format!(
                "grid.x = {} exceeds max_blocks = {}",
                config.grid.x, self.config.max_blocks
            )));
        }

        let _span = perf_span!("cpu_launch", blocks = total_blocks, args = args.len());
        let start = Instant::now();

        let memory = self.memory.read();
        let views = args
            .iter()
            .map(|handle| memory.bytes(*handle))
            .collect::<Result<Vec<&[u8]>>>()?;

        let result = self.pool.install(|| {
            (0..total_blocks).into_par_iter().try_for_each(|index| {
                kernel(&BlockContext {
                    index,
                    config: *config,
                    args: &views,
                })
            })
        });

        record_launch("cpu", total_blocks, start.elapsed().as_micros() as u64);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn backend(threads: usize) -> CpuBackend {
        CpuBackend::with_config(CpuBackendConfig {
            threads: Some(threads),
            ..CpuBackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_cpu_backend_creation() {
        let backend = backend(2);
        let info = backend.device_info();
        assert_eq!(info.name, "cpu");
        assert_eq!(info.compute_units, 2);
        assert_eq!(info.max_blocks, DEFAULT_MAX_BLOCKS);
    }

    #[test]
    fn test_rejects_zero_threads() {
        let result = CpuBackend::with_config(CpuBackendConfig {
            threads: Some(0),
            ..CpuBackendConfig::default()
        });
        assert!(matches!(result, Err(BackendError::Initialization(_))));
    }

    #[test]
    fn test_cpu_backend_buffer_copy() {
        let mut backend = backend(1);

        let buffer = backend.allocate_buffer(16).unwrap();
        let data = b"Hello, World!";
        backend.write_buffer(buffer, 0, data).unwrap();

        let mut result = vec![0u8; data.len()];
        backend.read_buffer(buffer, 0, &mut result).unwrap();
        assert_eq!(result, data);

        backend.free_buffer(buffer).unwrap();
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn test_clones_share_memory() {
        let mut backend = backend(1);
        let other = backend.clone();
        let buffer = backend.allocate_buffer(32).unwrap();
        assert_eq!(other.buffer_size(buffer).unwrap(), 32);
        assert_eq!(other.allocated_bytes(), 32);
    }

    #[test]
    fn test_launch_visits_every_block_once() {
        let backend = backend(4);
        let visited: Vec<AtomicU64> = (0..37).map(|_| AtomicU64::new(0)).collect();

        backend
            .launch(&LaunchConfig::linear(37 * 8, 8), &[], &|block| {
                visited[block.index as usize].fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();

        assert!(visited.iter().all(|v| v.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_launch_exposes_arguments() {
        let mut backend = backend(2);
        let values = [1u32, 2, 3, 4, 5, 6, 7, 8];
        let buffer = backend.allocate_buffer(std::mem::size_of_val(&values)).unwrap();
        backend.write_buffer(buffer, 0, bytemuck::cast_slice(&values)).unwrap();

        let sums: Vec<AtomicU64> = (0..2).map(|_| AtomicU64::new(0)).collect();
        backend
            .launch(&LaunchConfig::linear(8, 4), &[buffer], &|block| {
                let data: &[u32] = bytemuck::try_cast_slice(block.arg(0))
                    .map_err(|e| BackendError::execution_error(e.to_string()))?;
                let start = block.index as usize * 4;
                let sum: u32 = data[start..start + 4].iter().sum();
                sums[block.index as usize].store(sum as u64, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();

        assert_eq!(sums[0].load(Ordering::Relaxed), 10);
        assert_eq!(sums[1].load(Ordering::Relaxed), 26);
    }

    #[test]
    fn test_launch_propagates_kernel_error() {
        let backend = backend(2);
        let result = backend.launch(&LaunchConfig::linear(16, 4), &[], &|block| {
            if block.index == 2 {
                Err(BackendError::execution_error("block 2 failed"))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(BackendError::ExecutionError(msg)) if msg == "block 2 failed"));
    }

    #[test]
    fn test_launch_rejects_unknown_argument() {
        let backend = backend(1);
        let result = backend.launch(&LaunchConfig::linear(4, 4), &[BufferHandle::new(77)], &|_| Ok(()));
        assert!(matches!(result, Err(BackendError::InvalidBufferHandle(77))));
    }

    #[test]
    fn test_launch_rejects_oversized_grid() {
        let backend = CpuBackend::with_config(CpuBackendConfig {
            threads: Some(1),
            max_blocks: 4,
            ..CpuBackendConfig::default()
        })
        .unwrap();
        let result = backend.launch(&LaunchConfig::linear(100, 10), &[], &|_| Ok(()));
        assert!(matches!(result, Err(BackendError::InvalidLaunchConfig(_))));
    }

    #[test]
    fn test_empty_launch_is_noop() {
        let backend = backend(1);
        backend
            .launch(&LaunchConfig::linear(0, 4), &[], &|_| {
                Err(BackendError::execution_error("must not run"))
            })
            .unwrap();
    }
}
