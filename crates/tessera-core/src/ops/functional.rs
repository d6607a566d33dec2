//! Binary operators for reductions
//!
//! A transform-reduce takes two operators:
//!
//! - **Combine** (`f2`): turns one element of each input into an accumulator value
//! - **Reduce** (`f1`): merges two accumulator values
//!
//! Both run concurrently on backend workers, so implementations must be `Sync`.
//! Closures are adapted with [`Func`]:
//!
//! ```rust
//! use tessera_core::ops::functional::{CombineOp, Func, Multiplies, Plus, ReduceOp};
//!
//! assert_eq!(Plus.reduce(2, 3), 5);
//! assert_eq!(CombineOp::<i32, i32, i32>::combine(&Multiplies, 2, 3), 6);
//!
//! let max = Func(|a: i32, b: i32| a.max(b));
//! assert_eq!(max.reduce(2, 3), 3);
//! ```

use std::ops::{Add, Mul};

/// Merges two accumulator values
pub trait ReduceOp<O>: Sync {
    fn reduce(&self, acc: O, value: O) -> O;
}

/// Maps a pair of input elements to an accumulator value
pub trait CombineOp<T, U, O>: Sync {
    fn combine(&self, a: T, b: U) -> O;
}

/// `a + b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plus;

/// `a * b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Multiplies;

/// Adapter turning a closure into an operator
///
/// Closure parameter types usually need annotating, since they are inferred
/// through the operator trait rather than a `Fn` bound.
#[derive(Debug, Clone, Copy)]
pub struct Func<F>(pub F);

impl<O: Add<Output = O>> ReduceOp<O> for Plus {
    fn reduce(&self, acc: O, value: O) -> O {
        acc + value
    }
}

impl<T, U, O> CombineOp<T, U, O> for Plus
where
    T: Add<U, Output = O>,
{
    fn combine(&self, a: T, b: U) -> O {
        a + b
    }
}

impl<O: Mul<Output = O>> ReduceOp<O> for Multiplies {
    fn reduce(&self, acc: O, value: O) -> O {
        acc * value
    }
}

impl<T, U, O> CombineOp<T, U, O> for Multiplies
where
    T: Mul<U, Output = O>,
{
    fn combine(&self, a: T, b: U) -> O {
        a * b
    }
}

impl<O, F> ReduceOp<O> for Func<F>
where
    F: Fn(O, O) -> O + Sync,
{
    fn reduce(&self, acc: O, value: O) -> O {
        (self.0)(acc, value)
    }
}

impl<T, U, O, F> CombineOp<T, U, O> for Func<F>
where
    F: Fn(T, U) -> O + Sync,
{
    fn combine(&self, a: T, b: U) -> O {
        (self.0)(a, b)
    }
}

impl<O, R: ReduceOp<O> + ?Sized> ReduceOp<O> for &R {
    fn reduce(&self, acc: O, value: O) -> O {
        (**self).reduce(acc, value)
    }
}

impl<T, U, O, C: CombineOp<T, U, O> + ?Sized> CombineOp<T, U, O> for &C {
    fn combine(&self, a: T, b: U) -> O {
        (**self).combine(a, b)
    }
}
