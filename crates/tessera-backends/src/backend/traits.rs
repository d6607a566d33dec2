//! Backend trait for device memory and kernel launch
//!
//! A backend owns one device: its memory and its command queue. Everything
//! above this crate talks to the device through [`Backend`] only.

use super::types::{BlockContext, BufferHandle, DeviceInfo, LaunchConfig};
use crate::error::Result;

/// A kernel body, invoked once per block of a launch.
///
/// Blocks may run concurrently and in any order. The first error returned by
/// any block fails the launch.
pub type Kernel<'k> = dyn Fn(&BlockContext<'_>) -> Result<()> + Sync + 'k;

/// Backend trait for device execution
///
/// # Architecture
///
/// ```text
/// ┌────────────────────────────────────────────┐
/// │                Backend Trait               │
/// │  - device_info()                           │
/// │  - buffer management (allocate/free/copy)  │
/// │  - launch()                                │
/// └─────────────────────┬──────────────────────┘
///                       │
///         ┌─────────────┴─────────────┐
///         ▼                           ▼
///   ┌────────────┐             ┌────────────┐
///   │    CPU     │             │  external  │
///   │  Backend   │             │  backends  │
///   └────────────┘             └────────────┘
/// ```
///
/// # Memory Model
///
/// Device memory is reached through [`BufferHandle`]s. Every allocation
/// starts on a [`DEVICE_ALIGNMENT`](super::types::DEVICE_ALIGNMENT)
/// boundary. Host data moves in with [`write_buffer`](Backend::write_buffer),
/// out with [`read_buffer`](Backend::read_buffer), and between device
/// buffers with [`copy_buffer`](Backend::copy_buffer). All copies are
/// synchronous.
///
/// # Usage
///
/// ```rust
/// use tessera_backends::{Backend, CpuBackend};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = CpuBackend::new()?;
///
/// let buffer = backend.allocate_buffer(16)?;
/// let data = [1.0f32, 2.0, 3.0, 4.0];
/// backend.write_buffer(buffer, 0, bytemuck::cast_slice(&data))?;
///
/// let mut results = [0.0f32; 4];
/// backend.read_buffer(buffer, 0, bytemuck::cast_slice_mut(&mut results))?;
/// assert_eq!(results, data);
///
/// backend.free_buffer(buffer)?;
/// # Ok(())
/// # }
/// ```
pub trait Backend {
    /// Capabilities of the device behind this backend
    fn device_info(&self) -> DeviceInfo;

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a zero-initialized device buffer of `size` bytes
    ///
    /// Zero-sized allocations are valid and yield a handle whose size is 0.
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Free a buffer
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy host bytes into the buffer starting at `offset` (H2D)
    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy buffer bytes starting at `offset` into `data` (D2H)
    fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()>;

    /// Copy `size` bytes between device buffers (D2D)
    ///
    /// `src` and `dst` may be the same buffer when the ranges do not overlap.
    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        size: usize,
    ) -> Result<()>;

    /// Size of the buffer in bytes
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    // ============================================================================================
    // Execution
    // ============================================================================================

    /// Run `kernel` once for every block in `config`
    ///
    /// `args` are exposed to each block, in order, as
    /// [`BlockContext::args`]. The call returns after every block has
    /// finished.
    fn launch(&self, config: &LaunchConfig, args: &[BufferHandle], kernel: &Kernel<'_>) -> Result<()>;

    /// Block until all previously submitted work is complete
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
