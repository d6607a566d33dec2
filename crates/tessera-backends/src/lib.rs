//! Execution backends for tessera
//!
//! This crate provides:
//! - **Backend Trait**: device memory management and block-parallel kernel launch
//! - **CPU Backend**: reference implementation over simulated device memory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          tessera-core (Context)             │
//! │   buffers, staging, transform-reduce        │
//! └─────────────────────┬───────────────────────┘
//!                       │ Box<dyn Backend>
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │                 Backend                     │
//! │  allocate / write / read / copy / launch    │
//! └─────────────────────┬───────────────────────┘
//!                       ▼
//!                 ┌───────────┐
//!                 │    CPU    │
//!                 │  Backend  │
//!                 └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use tessera_backends::{Backend, CpuBackend, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new()?;
//! let buffer = backend.allocate_buffer(16)?;
//! backend.write_buffer(buffer, 0, bytemuck::cast_slice(&[1u32, 2, 3, 4]))?;
//!
//! let total = AtomicU32::new(0);
//! backend.launch(&LaunchConfig::linear(4, 2), &[buffer], &|block| {
//!     let values: &[u32] = bytemuck::cast_slice(block.arg(0));
//!     let start = block.index as usize * 2;
//!     total.fetch_add(values[start] + values[start + 1], Ordering::Relaxed);
//!     Ok(())
//! })?;
//! assert_eq!(total.into_inner(), 10);
//!
//! backend.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;

// Re-export public API
pub use backend::{
    Backend, BlockContext, BlockDim, BufferHandle, DeviceInfo, GridDim, Kernel, LaunchConfig, DEVICE_ALIGNMENT,
};
pub use backends::{CpuBackend, CpuBackendConfig};
pub use error::{BackendError, Result};
