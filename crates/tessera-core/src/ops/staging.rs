//! Operand staging
//!
//! Kernels only see memory owned by the launching context. Before a launch,
//! each operand is made device-resident there:
//!
//! | Operand                        | Staging                           |
//! |--------------------------------|-----------------------------------|
//! | host slice                     | H2D copy into a temporary buffer  |
//! | device slice, same context     | used in place                     |
//! | device slice, other context    | D2H, then H2D into a temporary    |
//!
//! Temporaries are freed when the [`StagedOperand`] drops.

use crate::context::Context;
use crate::error::Result;
use crate::sequence::{DeviceSlice, Residency};
use crate::Element;
use std::marker::PhantomData;
use std::mem::size_of;
use tessera_backends::BufferHandle;
use tessera_tracing::perf_span;

/// A device-resident window of `T` ready to pass to a launch
pub(crate) struct StagedOperand<'a, T: Element> {
    ctx: &'a Context,
    handle: BufferHandle,
    offset: usize,
    staged_bytes: usize,
    owned: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> StagedOperand<'a, T> {
    pub(crate) fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Index of the first element within the buffer
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes copied onto the device to produce this operand
    pub(crate) fn staged_bytes(&self) -> usize {
        self.staged_bytes
    }

    fn in_place(ctx: &'a Context, slice: DeviceSlice<'_, T>) -> Result<Self> {
        Ok(Self {
            ctx,
            handle: slice.require_handle()?,
            offset: slice.offset(),
            staged_bytes: 0,
            owned: false,
            _marker: PhantomData,
        })
    }

    fn upload(ctx: &'a Context, values: &[T]) -> Result<Self> {
        let bytes = values.len() * size_of::<T>();
        let _span = perf_span!("stage_operand", bytes = bytes);

        let operand = Self {
            ctx,
            handle: ctx.allocate(bytes)?,
            offset: 0,
            staged_bytes: bytes,
            owned: true,
            _marker: PhantomData,
        };
        ctx.upload(operand.handle, 0, values)?;
        Ok(operand)
    }
}

impl<'a, T: Element> Drop for StagedOperand<'a, T> {
    fn drop(&mut self) {
        if self.owned {
            if let Err(err) = self.ctx.free(self.handle) {
                tracing::warn!(context_id = self.ctx.id(), handle = %self.handle, error = %err, "staging_free_failed");
            }
        }
    }
}

/// Make the first `n` elements of `source` device-resident on `ctx`
///
/// `source` must hold at least `n > 0` elements.
pub(crate) fn stage<'a, T: Element>(ctx: &'a Context, source: Residency<'_, T>, n: usize) -> Result<StagedOperand<'a, T>> {
    match source {
        Residency::Host(slice) => StagedOperand::upload(ctx, &slice[..n]),
        Residency::Device(slice) if slice.context().is_same(ctx) => StagedOperand::in_place(ctx, slice),
        Residency::Device(slice) => {
            tracing::debug!(
                from_context = slice.context().id(),
                to_context = ctx.id(),
                elements = n,
                "staging_across_contexts"
            );
            StagedOperand::upload(ctx, &slice.prefix(n).to_vec()?)
        }
    }
}
