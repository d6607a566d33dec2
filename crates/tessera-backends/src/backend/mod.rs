//! Backend trait and related types

pub mod traits;
pub mod types;

pub use traits::{Backend, Kernel};
pub use types::{BlockContext, BlockDim, BufferHandle, DeviceInfo, GridDim, LaunchConfig, DEVICE_ALIGNMENT};
