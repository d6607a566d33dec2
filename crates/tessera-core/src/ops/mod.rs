//! Parallel algorithms
//!
//! Algorithms accept any [`Sequence`](crate::Sequence) operands and run on a
//! [`Context`](crate::Context), staging host-resident operands as needed.
//!
//! ## Modules
//!
//! - `functional` - Binary operators (`Plus`, `Multiplies`, closure adapter)
//! - `inner_product` - Generalized inner product and its entry points
//! - `parallel` - Reduction planning and the chunked transform-reduce kernel
//! - `staging` - Making operands device-resident for a launch

pub mod functional;
pub mod inner_product;
pub mod parallel;
pub(crate) mod staging;

pub use functional::{CombineOp, Func, Multiplies, Plus, ReduceOp};
pub use inner_product::{inner_product, inner_product_in, inner_product_with, inner_product_with_in, InnerProduct};
pub use parallel::ReductionPlan;
