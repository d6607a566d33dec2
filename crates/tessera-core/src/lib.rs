//! # tessera-core - Dual-Space Buffers and Parallel Reductions
//!
//! Typed buffers that live in an explicit memory space, and a parallel
//! transform-reduce that accepts operands from either space.
//!
//! ## Architecture
//!
//! ```text
//! Buffer<T, Host> ──transfer_to──► Buffer<T, Device>
//!        │                                │
//!        └────────── Sequence ────────────┘
//!                        │
//!                 ops::inner_product
//!                        │
//!        Context (staging, chunk planning, launch)
//!                        │
//!             tessera-backends::Backend
//! ```
//!
//! - **Memory spaces**: [`Host`] and [`Device`] are type-level policies; a
//!   [`Buffer<T, S>`] cannot be mistaken for one in the other space
//! - **Contexts**: a [`Context`] owns a backend; [`Context::acquire_default`]
//!   builds a process-wide one on first use
//! - **Reductions**: split into chunks by a [`ReductionPlan`], one backend
//!   block per chunk, partials combined in a fixed order
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::ops::{inner_product_in, inner_product_with_in, Func, Plus};
//! use tessera_core::{Context, ContextConfig, DeviceBuffer, HostBuffer};
//!
//! let ctx = Context::from_config(ContextConfig::default().with_threads(2))?;
//!
//! let a = HostBuffer::from_vec(vec![-5, 0, 2, 3, 2, 4, -2, 1, 2, 3])?;
//! let b: DeviceBuffer<i32> = a.to_device_in(&ctx)?;
//!
//! assert_eq!(inner_product_in(&ctx, &a, &b, 0)?, 76);
//!
//! let abs_diff = inner_product_with_in(&ctx, &a, &b, 0, Plus, Func(|x: i32, y: i32| (x - y).abs()))?;
//! assert_eq!(abs_diff, 0);
//! # Ok::<(), tessera_core::Error>(())
//! ```
//!
//! ## Configuration
//!
//! The default context reads `TESSERA_THREADS`, `TESSERA_MIN_CHUNK_LEN`,
//! `TESSERA_CHUNKS_PER_UNIT` and `TESSERA_MAX_ALLOCATION_BYTES`; see
//! [`ContextConfig::from_env`].

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod instrumentation;
pub mod ops;
pub mod sequence;
pub mod space;

pub use buffer::{Buffer, BufferRange, DeviceBuffer, HostBuffer};
pub use config::ContextConfig;
pub use context::{Context, TransferSnapshot};
pub use error::{Error, Result};
pub use ops::{inner_product, inner_product_in, inner_product_with, inner_product_with_in, InnerProduct, ReductionPlan};
pub use sequence::{DeviceSlice, Residency, Sequence};
pub use space::{Device, Host, MemorySpace, SpaceKind};

pub use tessera_backends::{Backend, BackendError};

/// Element types buffers and algorithms operate on
///
/// Plain-old-data so values can be copied to and from device memory as bytes.
pub trait Element: bytemuck::Pod + Default + Send + Sync {}

impl<T: bytemuck::Pod + Default + Send + Sync> Element for T {}
