//! Chunked parallel transform-reduce
//!
//! ## Architecture
//!
//! A reduction over `n` elements runs as one backend launch:
//!
//! 1. [`ReductionPlan`] splits `[0, n)` into contiguous chunks of equal
//!    length (the last may be shorter)
//! 2. Each block of the launch folds one chunk left to right
//! 3. The caller folds `init` with the chunk partials in ascending chunk order
//!
//! For a given context configuration and `n` the plan, and therefore the
//! order of every operator application, is fixed. Results are reproducible
//! even when the reduce operator is not associative. The planning formula
//! itself is not a stable guarantee and may change between releases.
//!
//! ## Chunk count
//!
//! ```text
//! chunks = min(ceil(n / min_chunk_len), compute_units * chunks_per_unit, max_blocks)
//! ```
//!
//! clamped to at least one, then rebalanced so no chunk is empty.

use crate::config::ContextConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ops::functional::{CombineOp, ReduceOp};
use crate::ops::staging::StagedOperand;
use crate::Element;
use std::mem::size_of;
use std::ops::Range;
use std::sync::OnceLock;
use tessera_backends::{BackendError, BlockContext, BlockDim, DeviceInfo, GridDim, LaunchConfig};

/// How a reduction over `elements` items is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionPlan {
    /// Total elements reduced
    pub elements: usize,
    /// Elements per chunk; the last chunk may hold fewer
    pub chunk_len: usize,
    /// Number of chunks, one launch block each
    pub chunks: usize,
}

impl ReductionPlan {
    /// Plan a reduction of `n` elements for a device and configuration
    pub fn new(n: usize, info: &DeviceInfo, config: &ContextConfig) -> Self {
        if n == 0 {
            return Self {
                elements: 0,
                chunk_len: 0,
                chunks: 0,
            };
        }

        let by_size = n.div_ceil(config.min_chunk_len.max(1));
        let by_units = info.compute_units.saturating_mul(config.chunks_per_unit);
        let target = by_size.min(by_units).min(info.max_blocks as usize).max(1);

        let chunk_len = n.div_ceil(target);
        Self {
            elements: n,
            chunk_len,
            chunks: n.div_ceil(chunk_len),
        }
    }

    /// Element range covered by chunk `index`
    pub fn chunk_range(&self, index: usize) -> Range<usize> {
        let start = (index * self.chunk_len).min(self.elements);
        let end = start.saturating_add(self.chunk_len).min(self.elements);
        start..end
    }

    /// One block per chunk
    ///
    /// Fails with [`BackendError::InvalidLaunchConfig`] when the chunk count
    /// or chunk length does not fit a `u32` launch dimension.
    pub fn launch_config(&self) -> tessera_backends::Result<LaunchConfig> {
        let blocks = u32::try_from(self.chunks).map_err(|_| {
            BackendError::InvalidLaunchConfig(format!("{} chunks exceed the grid dimension limit", self.chunks))
        })?;
        let block_len = u32::try_from(self.chunk_len).map_err(|_| {
            BackendError::InvalidLaunchConfig(format!(
                "chunk length {} exceeds the block dimension limit",
                self.chunk_len
            ))
        })?;
        Ok(LaunchConfig::new(GridDim::linear(blocks), BlockDim::linear(block_len)))
    }
}

/// `len` elements of `T` starting at element `offset` of a launch argument
fn element_window<T: Element>(bytes: &[u8], offset: usize, len: usize) -> tessera_backends::Result<&[T]> {
    let size = size_of::<T>();
    let start = offset * size;
    let end = start + len * size;
    let window = bytes.get(start..end).ok_or(BackendError::BufferOutOfBounds {
        offset: start,
        size: len * size,
        buffer_size: bytes.len(),
    })?;
    bytemuck::try_cast_slice(window)
        .map_err(|err| BackendError::execution_error(format!("cannot view argument as elements: {err}")))
}

/// Fold `init` with `f1`-reduced chunks of `f2(first[i], second[i])`
///
/// Both operands must be staged on `ctx` and hold at least `plan.elements`
/// elements.
pub(crate) fn chunked_transform_reduce<T, U, O, R, C>(
    ctx: &Context,
    plan: &ReductionPlan,
    first: &StagedOperand<'_, T>,
    second: &StagedOperand<'_, U>,
    init: O,
    reduce: &R,
    combine: &C,
) -> Result<O>
where
    T: Element,
    U: Element,
    O: Send + Sync,
    R: ReduceOp<O> + ?Sized,
    C: CombineOp<T, U, O> + ?Sized,
{
    let partials: Vec<OnceLock<O>> = (0..plan.chunks).map(|_| OnceLock::new()).collect();
    let (first_offset, second_offset) = (first.offset(), second.offset());

    ctx.launch(
        &plan.launch_config()?,
        &[first.handle(), second.handle()],
        &|block: &BlockContext<'_>| {
            let chunk = block.index as usize;
            let range = plan.chunk_range(chunk);
            let a = element_window::<T>(block.arg(0), first_offset + range.start, range.len())?;
            let b = element_window::<U>(block.arg(1), second_offset + range.start, range.len())?;

            let mut pairs = a.iter().zip(b);
            let Some((&x, &y)) = pairs.next() else {
                return Ok(());
            };
            let mut acc = combine.combine(x, y);
            for (&x, &y) in pairs {
                acc = reduce.reduce(acc, combine.combine(x, y));
            }

            partials[chunk]
                .set(acc)
                .map_err(|_| BackendError::execution_error(format!("chunk {chunk} reduced twice")))
        },
    )?;

    partials
        .into_iter()
        .enumerate()
        .try_fold(init, |acc, (chunk, partial)| match partial.into_inner() {
            Some(value) => Ok(reduce.reduce(acc, value)),
            None => Err(Error::Backend(BackendError::execution_error(format!(
                "chunk {chunk} produced no partial result"
            )))),
        })
}
