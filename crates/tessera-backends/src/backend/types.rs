//! Types for backend configuration and handles

use std::fmt;

/// Alignment guaranteed for the start of every device allocation.
///
/// Large enough for any `bytemuck::Pod` element type a kernel reinterprets
/// the buffer as.
pub const DEVICE_ALIGNMENT: usize = 64;

/// Handle to an allocated device buffer
///
/// Buffers are opaque handles managed by the backend.
/// Use [`Backend`](super::Backend) methods to interact with buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Grid dimensions for kernel launch
///
/// Defines the 3D iteration space of blocks that execute the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    /// Create new grid dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create 1D grid
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Get total number of blocks
    pub const fn total_blocks(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block dimensions
///
/// Number of elements each block is responsible for, per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDim {
    /// Create new block dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create 1D block
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Elements per block
    pub const fn total_elements(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch configuration for kernel execution
///
/// Specifies the iteration space (grid × block).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of blocks in each dimension
    pub grid: GridDim,

    /// Elements handled per block in each dimension
    pub block: BlockDim,
}

impl LaunchConfig {
    /// Create new launch configuration
    pub const fn new(grid: GridDim, block: BlockDim) -> Self {
        Self { grid, block }
    }

    /// Create simple 1D launch configuration covering `total_elements`
    ///
    /// `block_size` must be non-zero.
    pub const fn linear(total_elements: u32, block_size: u32) -> Self {
        let num_blocks = total_elements.div_ceil(block_size);
        Self {
            grid: GridDim::linear(num_blocks),
            block: BlockDim::linear(block_size),
        }
    }

    /// Get total number of blocks
    pub const fn total_blocks(&self) -> u64 {
        self.grid.total_blocks()
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, block={}", self.grid, self.block)
    }
}

/// Capabilities a backend reports to its callers.
///
/// Used to size reductions and to bound allocation requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name
    pub name: String,
    /// Number of independent execution units (cores, SMs, ...)
    pub compute_units: usize,
    /// Largest single allocation the device accepts, in bytes
    pub max_allocation_bytes: usize,
    /// Largest grid a single launch may use (x dimension)
    pub max_blocks: u32,
}

/// What a kernel sees while executing one block.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    /// Linear block index in `[0, grid.total_blocks())`
    pub index: u64,
    /// Shape of the whole launch
    pub config: LaunchConfig,
    /// Device-resident bytes of each launch argument, in argument order
    pub args: &'a [&'a [u8]],
}

impl<'a> BlockContext<'a> {
    /// Bytes of argument `i`.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `i + 1` arguments were passed to the launch.
    pub fn arg(&self, i: usize) -> &'a [u8] {
        self.args[i]
    }
}
