//! Operand interface for algorithms
//!
//! Algorithms accept anything implementing [`Sequence`]: plain slices and
//! vectors, [`Buffer`](crate::Buffer)s in either memory space, and
//! [`BufferRange`](crate::BufferRange)s. [`Residency`] tells the algorithm
//! where the elements live so it can decide what to stage.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::Element;
use std::marker::PhantomData;
use tessera_backends::BufferHandle;

/// Where a sequence's elements currently live
#[derive(Debug)]
pub enum Residency<'a, T: Element> {
    /// Directly addressable host memory
    Host(&'a [T]),
    /// A window of a device buffer
    Device(DeviceSlice<'a, T>),
}

/// Borrowed window `[offset, offset + len)` of a device buffer
#[derive(Debug)]
pub struct DeviceSlice<'a, T: Element> {
    ctx: &'a Context,
    handle: Option<BufferHandle>,
    offset: usize,
    len: usize,
    _marker: PhantomData<&'a [T]>,
}

impl<'a, T: Element> Clone for DeviceSlice<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T: Element> Copy for DeviceSlice<'a, T> {}

impl<'a, T: Element> DeviceSlice<'a, T> {
    pub(crate) fn new(ctx: &'a Context, handle: Option<BufferHandle>, offset: usize, len: usize) -> Self {
        Self {
            ctx,
            handle,
            offset,
            len,
            _marker: PhantomData,
        }
    }

    /// Context owning the underlying buffer
    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    /// Underlying buffer, `None` for a buffer that never allocated
    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// First element's index within the underlying buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first `len` elements of this window
    pub(crate) fn prefix(&self, len: usize) -> Self {
        Self {
            len: len.min(self.len),
            ..*self
        }
    }

    /// The allocation backing a non-empty window
    pub(crate) fn require_handle(&self) -> Result<BufferHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidOperation("non-empty device slice has no allocation".to_string()))
    }

    /// Copy the window to the host (D2H)
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len];
        if self.len > 0 {
            self.ctx.download(self.require_handle()?, self.offset, &mut out)?;
        }
        Ok(out)
    }
}

/// A finite sequence of elements in one memory space
pub trait Sequence<T: Element> {
    /// Number of elements
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Where the elements live
    fn residency(&self) -> Residency<'_, T>;

    /// Copy the elements to a host vector, transferring only if device-resident
    fn to_host_vec(&self) -> Result<Vec<T>> {
        match self.residency() {
            Residency::Host(slice) => Ok(slice.to_vec()),
            Residency::Device(slice) => slice.to_vec(),
        }
    }
}

impl<T: Element> Sequence<T> for [T] {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn residency(&self) -> Residency<'_, T> {
        Residency::Host(self)
    }
}

impl<T: Element, const N: usize> Sequence<T> for [T; N] {
    fn len(&self) -> usize {
        N
    }

    fn residency(&self) -> Residency<'_, T> {
        Residency::Host(self.as_slice())
    }
}

impl<T: Element> Sequence<T> for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn residency(&self) -> Residency<'_, T> {
        Residency::Host(self.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_len<T: Element, S: Sequence<T> + ?Sized>(seq: &S) -> usize {
        seq.len()
    }

    #[test]
    fn test_host_sequences() {
        let v = vec![1i32, 2, 3];
        let a = [1.0f32, 2.0];
        let s: &[u8] = &[];

        assert_eq!(total_len(&v), 3);
        assert_eq!(total_len(&a), 2);
        assert_eq!(total_len(s), 0);
        assert!(Sequence::is_empty(s));

        assert!(matches!(v.residency(), Residency::Host(slice) if slice == [1, 2, 3]));
        assert_eq!(a.to_host_vec().unwrap(), vec![1.0, 2.0]);
    }
}
