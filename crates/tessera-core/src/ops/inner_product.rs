//! Generalized inner product
//!
//! Computes
//!
//! ```text
//! f1(... f1(f1(init, f2(a[0], b[0])), f2(a[1], b[1])) ..., f2(a[n-1], b[n-1]))
//! ```
//!
//! with `f1 = +` and `f2 = *` by default, in parallel on a [`Context`].
//! `n` is the length of the first sequence; the second supplies its first
//! `n` elements.
//!
//! ## Entry points
//!
//! | Function                  | Context  | Operators   |
//! |---------------------------|----------|-------------|
//! | [`inner_product_in`]      | explicit | `+`, `*`    |
//! | [`inner_product`]         | default  | `+`, `*`    |
//! | [`inner_product_with_in`] | explicit | `f1`, `f2`  |
//! | [`inner_product_with`]    | default  | `f1`, `f2`  |
//!
//! [`InnerProduct`] offers the same choices as a builder. Every entry point
//! runs the same implementation.
//!
//! ## Evaluation order
//!
//! The range is split by the context's [`ReductionPlan`]. Each chunk is folded
//! left to right starting from `f2` of its first pair, then `init` is folded
//! with the chunk results in ascending chunk order. When `f1` is associative
//! the result equals the sequential fold; otherwise it depends on the plan.
//!
//! # Example
//!
//! ```rust
//! use tessera_core::ops::inner_product::inner_product_in;
//! use tessera_core::{Context, ContextConfig};
//!
//! let ctx = Context::from_config(ContextConfig::default().with_threads(2))?;
//! let a = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
//! let b = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55];
//! assert_eq!(inner_product_in(&ctx, &a, &b, 0)?, 1209);
//! # Ok::<(), tessera_core::Error>(())
//! ```
//!
//! [`ReductionPlan`]: crate::ops::parallel::ReductionPlan

use crate::context::Context;
use crate::error::Result;
use crate::instrumentation::ReductionMetrics;
use crate::ops::functional::{CombineOp, Func, Multiplies, Plus, ReduceOp};
use crate::ops::parallel::chunked_transform_reduce;
use crate::ops::staging::stage;
use crate::sequence::Sequence;
use crate::Element;
use std::marker::PhantomData;
use std::ops::{Add, Mul};
use std::time::Instant;
use tessera_tracing::perf_span;

/// Canonical implementation behind every entry point
fn transform_reduce<T, U, O, A, B, R, C>(
    ctx: Option<&Context>,
    first: &A,
    second: &B,
    init: O,
    reduce: &R,
    combine: &C,
) -> Result<O>
where
    T: Element,
    U: Element,
    O: Send + Sync,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
    R: ReduceOp<O> + ?Sized,
    C: CombineOp<T, U, O> + ?Sized,
{
    let n = first.len();
    assert!(
        second.len() >= n,
        "inner_product: second sequence has {} elements but the first has {n}",
        second.len()
    );
    if n == 0 {
        return Ok(init);
    }

    let start = Instant::now();
    let ctx = Context::resolve(ctx)?;
    let _span = perf_span!("inner_product", elements = n, context_id = ctx.id());

    let plan = ctx.reduction_plan(n);
    let a = stage(&ctx, first.residency(), n)?;
    let b = stage(&ctx, second.residency(), n)?;
    let result = chunked_transform_reduce(&ctx, &plan, &a, &b, init, reduce, combine)?;

    ReductionMetrics::new("inner_product", n, plan.chunks, a.staged_bytes() + b.staged_bytes(), start).log();
    Ok(result)
}

/// `init + Σ first[i] * second[i]` on `ctx`
///
/// Returns `init` without touching the backend when `first` is empty.
///
/// # Panics
///
/// Panics if `second` is shorter than `first`.
pub fn inner_product_in<T, U, O, A, B>(ctx: &Context, first: &A, second: &B, init: O) -> Result<O>
where
    T: Element + Mul<U, Output = O>,
    U: Element,
    O: Add<Output = O> + Send + Sync,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
{
    transform_reduce(Some(ctx), first, second, init, &Plus, &Multiplies)
}

/// `init + Σ first[i] * second[i]` on the default context
///
/// # Panics
///
/// Panics if `second` is shorter than `first`.
pub fn inner_product<T, U, O, A, B>(first: &A, second: &B, init: O) -> Result<O>
where
    T: Element + Mul<U, Output = O>,
    U: Element,
    O: Add<Output = O> + Send + Sync,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
{
    transform_reduce(None, first, second, init, &Plus, &Multiplies)
}

/// Generalized inner product with caller-supplied operators on `ctx`
///
/// `reduce` plays `f1` and `combine` plays `f2`.
///
/// # Panics
///
/// Panics if `second` is shorter than `first`.
pub fn inner_product_with_in<T, U, O, A, B, R, C>(
    ctx: &Context,
    first: &A,
    second: &B,
    init: O,
    reduce: R,
    combine: C,
) -> Result<O>
where
    T: Element,
    U: Element,
    O: Send + Sync,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
    R: ReduceOp<O>,
    C: CombineOp<T, U, O>,
{
    transform_reduce(Some(ctx), first, second, init, &reduce, &combine)
}

/// Generalized inner product with caller-supplied operators on the default context
///
/// # Panics
///
/// Panics if `second` is shorter than `first`.
pub fn inner_product_with<T, U, O, A, B, R, C>(first: &A, second: &B, init: O, reduce: R, combine: C) -> Result<O>
where
    T: Element,
    U: Element,
    O: Send + Sync,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
    R: ReduceOp<O>,
    C: CombineOp<T, U, O>,
{
    transform_reduce(None, first, second, init, &reduce, &combine)
}

/// Builder over the inner product entry points
///
/// ```rust
/// use tessera_core::ops::inner_product::InnerProduct;
/// use tessera_core::{Context, ContextConfig};
///
/// let ctx = Context::from_config(ContextConfig::default().with_threads(2))?;
/// let a = [3, -1, 4];
/// let b = [1, 5, 9];
///
/// let largest = InnerProduct::new(&a, &b, i32::MIN)
///     .context(&ctx)
///     .reduce_with(|x, y| x.max(y))
///     .combine_with(|x, y| x * y)
///     .run()?;
/// assert_eq!(largest, 36);
/// # Ok::<(), tessera_core::Error>(())
/// ```
#[must_use = "an InnerProduct does nothing until `run` is called"]
pub struct InnerProduct<'a, T, U, O, A: ?Sized, B: ?Sized, R = Plus, C = Multiplies> {
    first: &'a A,
    second: &'a B,
    init: O,
    ctx: Option<&'a Context>,
    reduce: R,
    combine: C,
    _elements: PhantomData<fn(T, U)>,
}

impl<'a, T, U, O, A, B> InnerProduct<'a, T, U, O, A, B>
where
    T: Element,
    U: Element,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
{
    /// Inner product of `first` and `second` starting from `init`, with `+` and `*`
    pub fn new(first: &'a A, second: &'a B, init: O) -> Self {
        Self {
            first,
            second,
            init,
            ctx: None,
            reduce: Plus,
            combine: Multiplies,
            _elements: PhantomData,
        }
    }
}

impl<'a, T, U, O, A, B, R, C> InnerProduct<'a, T, U, O, A, B, R, C>
where
    T: Element,
    U: Element,
    A: Sequence<T> + ?Sized,
    B: Sequence<U> + ?Sized,
{
    /// Run on `ctx` instead of the default context
    pub fn context(mut self, ctx: &'a Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Replace `f1`
    pub fn reduce_op<R2: ReduceOp<O>>(self, reduce: R2) -> InnerProduct<'a, T, U, O, A, B, R2, C> {
        InnerProduct {
            first: self.first,
            second: self.second,
            init: self.init,
            ctx: self.ctx,
            reduce,
            combine: self.combine,
            _elements: PhantomData,
        }
    }

    /// Replace `f2`
    pub fn combine_op<C2: CombineOp<T, U, O>>(self, combine: C2) -> InnerProduct<'a, T, U, O, A, B, R, C2> {
        InnerProduct {
            first: self.first,
            second: self.second,
            init: self.init,
            ctx: self.ctx,
            reduce: self.reduce,
            combine,
            _elements: PhantomData,
        }
    }

    /// Replace `f1` with a closure
    pub fn reduce_with<F>(self, reduce: F) -> InnerProduct<'a, T, U, O, A, B, Func<F>, C>
    where
        F: Fn(O, O) -> O + Sync,
    {
        self.reduce_op(Func(reduce))
    }

    /// Replace `f2` with a closure
    pub fn combine_with<F>(self, combine: F) -> InnerProduct<'a, T, U, O, A, B, R, Func<F>>
    where
        F: Fn(T, U) -> O + Sync,
    {
        self.combine_op(Func(combine))
    }

    /// Compute the inner product
    ///
    /// # Panics
    ///
    /// Panics if the second sequence is shorter than the first.
    pub fn run(self) -> Result<O>
    where
        O: Send + Sync,
        R: ReduceOp<O>,
        C: CombineOp<T, U, O>,
    {
        transform_reduce(self.ctx, self.first, self.second, self.init, &self.reduce, &self.combine)
    }
}
