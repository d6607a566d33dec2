//! Typed buffers in an explicit memory space
//!
//! A [`Buffer<T, S>`] owns a contiguous sequence of `T` in memory space `S`:
//!
//! - [`HostBuffer<T>`]: heap memory, indexable and iterable like a `Vec<T>`
//! - [`DeviceBuffer<T>`]: memory owned by a [`Context`]'s backend
//!
//! Moving data between spaces is always explicit ([`Buffer::transfer_to`],
//! [`Buffer::to_host`], [`Buffer::to_device`]). Every cross-space copy is
//! logged and counted in the owning context's
//! [`transfer_stats`](Context::transfer_stats).
//!
//! # Examples
//!
//! ```rust
//! use tessera_core::{Context, ContextConfig, DeviceBuffer, HostBuffer};
//!
//! let ctx = Context::from_config(ContextConfig::default().with_threads(2))?;
//!
//! let host = HostBuffer::from_vec(vec![1.0f32, 2.0, 3.0])?;
//! let device = host.to_device_in(&ctx)?;
//! assert_eq!(device.len(), 3);
//!
//! let back = device.to_host()?;
//! assert_eq!(back, host);
//! # Ok::<(), tessera_core::Error>(())
//! ```

use crate::context::Context;
use crate::error::{Error, Result};
use crate::sequence::{Residency, Sequence};
use crate::space::{Device, DeviceStorage, Host, MemorySpace, SpaceKind, Storage};
use crate::Element;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Bound, Deref, DerefMut, RangeBounds};
use tessera_backends::BufferHandle;
use tessera_tracing::perf_span;

/// A sequence of `T` living in memory space `S`
pub struct Buffer<T: Element, S: MemorySpace = Host> {
    storage: S::Storage<T>,
    _space: PhantomData<S>,
}

/// Buffer in host memory
pub type HostBuffer<T> = Buffer<T, Host>;

/// Buffer in device memory
pub type DeviceBuffer<T> = Buffer<T, Device>;

impl<T: Element, S: MemorySpace> Buffer<T, S> {
    fn from_storage(storage: S::Storage<T>) -> Self {
        Self {
            storage,
            _space: PhantomData,
        }
    }

    // ============================================================================================
    // Construction
    // ============================================================================================

    /// `n` default-valued elements
    ///
    /// Device buffers are placed on the default context.
    pub fn with_len(n: usize) -> Result<Self> {
        Self::from_elem(n, T::default())
    }

    /// `n` default-valued elements, device buffers placed on `ctx`
    pub fn with_len_in(n: usize, ctx: &Context) -> Result<Self> {
        Self::from_elem_in(n, T::default(), ctx)
    }

    /// `n` copies of `value`
    pub fn from_elem(n: usize, value: T) -> Result<Self> {
        <S::Storage<T>>::from_elem(n, value, None).map(Self::from_storage)
    }

    pub fn from_elem_in(n: usize, value: T, ctx: &Context) -> Result<Self> {
        <S::Storage<T>>::from_elem(n, value, Some(ctx)).map(Self::from_storage)
    }

    /// Copy of a host slice
    pub fn from_slice(values: &[T]) -> Result<Self> {
        <S::Storage<T>>::from_residency(Residency::Host(values), None).map(Self::from_storage)
    }

    pub fn from_slice_in(values: &[T], ctx: &Context) -> Result<Self> {
        <S::Storage<T>>::from_residency(Residency::Host(values), Some(ctx)).map(Self::from_storage)
    }

    /// Take ownership of a vector; host buffers reuse its allocation
    pub fn from_vec(values: Vec<T>) -> Result<Self> {
        <S::Storage<T>>::from_vec(values, None).map(Self::from_storage)
    }

    pub fn from_vec_in(values: Vec<T>, ctx: &Context) -> Result<Self> {
        <S::Storage<T>>::from_vec(values, Some(ctx)).map(Self::from_storage)
    }

    /// Collect an iterator, device buffers placed on `ctx`
    pub fn from_iter_in<I: IntoIterator<Item = T>>(iter: I, ctx: &Context) -> Result<Self> {
        Self::from_vec_in(iter.into_iter().collect(), ctx)
    }

    /// Copy of any sequence, from either memory space
    ///
    /// A device buffer built from a device-resident source stays on the
    /// source's context; otherwise it goes to the default context.
    pub fn from_sequence<Q: Sequence<T> + ?Sized>(source: &Q) -> Result<Self> {
        <S::Storage<T>>::from_residency(source.residency(), None).map(Self::from_storage)
    }

    /// Copy of any sequence, device buffers placed on `ctx`
    pub fn from_sequence_in<Q: Sequence<T> + ?Sized>(source: &Q, ctx: &Context) -> Result<Self> {
        <S::Storage<T>>::from_residency(source.residency(), Some(ctx)).map(Self::from_storage)
    }

    /// Element-wise conversion of a buffer from either space
    ///
    /// The source's context, if any, hosts a device result.
    pub fn convert_from<U, S2>(source: &Buffer<U, S2>) -> Result<Self>
    where
        U: Element,
        S2: MemorySpace,
        T: From<U>,
    {
        let converted: Vec<T> = source.storage.host_view()?.iter().map(|&u| T::from(u)).collect();
        <S::Storage<T>>::from_vec(converted, source.context()).map(Self::from_storage)
    }

    /// Element-wise conversion, device result placed on `ctx`
    pub fn convert_from_in<U, S2>(source: &Buffer<U, S2>, ctx: &Context) -> Result<Self>
    where
        U: Element,
        S2: MemorySpace,
        T: From<U>,
    {
        let converted: Vec<T> = source.storage.host_view()?.iter().map(|&u| T::from(u)).collect();
        <S::Storage<T>>::from_vec(converted, Some(ctx)).map(Self::from_storage)
    }

    // ============================================================================================
    // Inspection
    // ============================================================================================

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    /// Elements the buffer holds without reallocating
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Largest length this buffer can reach
    pub fn max_len(&self) -> usize {
        self.storage.max_len()
    }

    /// Memory space tag
    pub fn space(&self) -> SpaceKind {
        S::KIND
    }

    /// Owning context, `None` for host buffers
    pub fn context(&self) -> Option<&Context> {
        self.storage.context()
    }

    /// Copy the elements to a `Vec`, transferring if device-resident
    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.storage.host_view()?.into_owned())
    }

    /// Borrowed view of `range`
    ///
    /// # Panics
    ///
    /// Panics if the range is decreasing or ends past `len()`.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> BufferRange<'_, T, S> {
        let len = self.len();
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => len,
        };
        assert!(
            start <= end && end <= len,
            "slice {start}..{end} out of bounds for buffer of length {len}"
        );
        BufferRange {
            buffer: self,
            start,
            end,
        }
    }

    // ============================================================================================
    // Value semantics
    // ============================================================================================

    /// Deep copy in the same space; device copies stay on the device
    pub fn try_clone(&self) -> Result<Self> {
        self.storage.try_clone().map(Self::from_storage)
    }

    /// Move the contents out, leaving `self` empty in the same place
    pub fn take(&mut self) -> Self {
        let empty = self.storage.empty_like();
        Self::from_storage(mem::replace(&mut self.storage, empty))
    }

    /// Replace the contents with a copy of `source` from either space
    ///
    /// A device destination keeps its context.
    pub fn assign_from<S2: MemorySpace>(&mut self, source: &Buffer<T, S2>) -> Result<()> {
        let replacement = <S::Storage<T>>::from_residency(source.residency(), self.storage.context())?;
        self.storage = replacement;
        Ok(())
    }

    /// Replace the contents with a copy of `values`
    pub fn assign_slice(&mut self, values: &[T]) -> Result<()> {
        self.storage.assign(values)
    }

    // ============================================================================================
    // Cross-space transfer
    // ============================================================================================

    /// Copy into memory space `S2`
    ///
    /// Device results stay on this buffer's context when it has one and use
    /// the default context otherwise.
    pub fn transfer_to<S2: MemorySpace>(&self) -> Result<Buffer<T, S2>> {
        let _span = perf_span!(
            "buffer_transfer",
            from = S::KIND.as_str(),
            to = S2::KIND.as_str(),
            elements = self.len()
        );
        Buffer::<T, S2>::from_sequence(self)
    }

    /// Copy into memory space `S2`, device results placed on `ctx`
    pub fn transfer_to_in<S2: MemorySpace>(&self, ctx: &Context) -> Result<Buffer<T, S2>> {
        let _span = perf_span!(
            "buffer_transfer",
            from = S::KIND.as_str(),
            to = S2::KIND.as_str(),
            elements = self.len(),
            context_id = ctx.id()
        );
        Buffer::<T, S2>::from_sequence_in(self, ctx)
    }

    /// Host copy
    pub fn to_host(&self) -> Result<HostBuffer<T>> {
        self.transfer_to::<Host>()
    }

    /// Device copy
    pub fn to_device(&self) -> Result<DeviceBuffer<T>> {
        self.transfer_to::<Device>()
    }

    /// Device copy on `ctx`
    pub fn to_device_in(&self, ctx: &Context) -> Result<DeviceBuffer<T>> {
        self.transfer_to_in::<Device>(ctx)
    }

    // ============================================================================================
    // Resizing
    // ============================================================================================

    /// Ensure room for `additional` more elements
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.storage.reserve(additional)
    }

    /// Grow with copies of `value` or shrink to `new_len`
    pub fn resize(&mut self, new_len: usize, value: T) -> Result<()> {
        self.storage.resize(new_len, value)
    }

    pub fn resize_default(&mut self, new_len: usize) -> Result<()> {
        self.storage.resize(new_len, T::default())
    }

    pub fn truncate(&mut self, len: usize) {
        self.storage.truncate(len);
    }

    pub fn clear(&mut self) {
        self.storage.truncate(0);
    }

    /// Drop spare capacity
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.storage.shrink_to_fit()
    }
}

impl<T: Element, S: MemorySpace> Sequence<T> for Buffer<T, S> {
    fn len(&self) -> usize {
        self.storage.len()
    }

    fn residency(&self) -> Residency<'_, T> {
        self.storage.residency(0..self.storage.len())
    }
}

// ================================================================================================
// Host buffers
// ================================================================================================

impl<T: Element> Buffer<T, Host> {
    /// Empty host buffer
    pub fn new() -> Self {
        Self::from_storage(Vec::new())
    }

    /// Append an element
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows, like [`Vec::push`].
    pub fn push(&mut self, value: T) {
        self.storage.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.storage.pop()
    }

    /// Insert `value` at `index`, shifting later elements right
    ///
    /// # Panics
    ///
    /// Panics if `index > len()`.
    pub fn insert(&mut self, index: usize, value: T) {
        self.storage.insert(index, value);
    }

    /// Remove and return the element at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn remove(&mut self, index: usize) -> T {
        self.storage.remove(index)
    }

    pub fn extend_from_slice(&mut self, values: &[T]) {
        self.storage.extend_from_slice(values);
    }

    pub fn as_vec(&self) -> &Vec<T> {
        &self.storage
    }

    pub fn into_vec(self) -> Vec<T> {
        self.storage
    }
}

impl<T: Element> Default for Buffer<T, Host> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Clone for Buffer<T, Host> {
    fn clone(&self) -> Self {
        Self::from_storage(self.storage.clone())
    }
}

impl<T: Element> Deref for Buffer<T, Host> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.storage
    }
}

impl<T: Element> DerefMut for Buffer<T, Host> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.storage
    }
}

impl<T: Element> AsRef<[T]> for Buffer<T, Host> {
    fn as_ref(&self) -> &[T] {
        &self.storage
    }
}

impl<T: Element> From<Vec<T>> for Buffer<T, Host> {
    fn from(values: Vec<T>) -> Self {
        Self::from_storage(values)
    }
}

impl<T: Element> From<Buffer<T, Host>> for Vec<T> {
    fn from(buffer: Buffer<T, Host>) -> Self {
        buffer.storage
    }
}

impl<T: Element> FromIterator<T> for Buffer<T, Host> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_storage(iter.into_iter().collect())
    }
}

impl<T: Element> Extend<T> for Buffer<T, Host> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.storage.extend(iter);
    }
}

impl<'a, T: Element> Extend<&'a T> for Buffer<T, Host> {
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.storage.extend(iter.into_iter().copied());
    }
}

impl<T: Element> IntoIterator for Buffer<T, Host> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.into_iter()
    }
}

impl<'a, T: Element> IntoIterator for &'a Buffer<T, Host> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.iter()
    }
}

impl<'a, T: Element> IntoIterator for &'a mut Buffer<T, Host> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.storage.iter_mut()
    }
}

impl<T: Element + PartialEq> PartialEq for Buffer<T, Host> {
    fn eq(&self, other: &Self) -> bool {
        self.storage == other.storage
    }
}

impl<T: Element + Eq> Eq for Buffer<T, Host> {}

impl<T: Element + PartialEq> PartialEq<[T]> for Buffer<T, Host> {
    fn eq(&self, other: &[T]) -> bool {
        self.storage.as_slice() == other
    }
}

impl<T: Element + PartialEq> PartialEq<Vec<T>> for Buffer<T, Host> {
    fn eq(&self, other: &Vec<T>) -> bool {
        &self.storage == other
    }
}

impl<T: Element + fmt::Debug> fmt::Debug for Buffer<T, Host> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("data", &self.storage).finish()
    }
}

impl<T: Element> TryFrom<&Buffer<T, Device>> for Buffer<T, Host> {
    type Error = Error;

    fn try_from(source: &Buffer<T, Device>) -> Result<Self> {
        source.to_host()
    }
}

// ================================================================================================
// Device buffers
// ================================================================================================

impl<T: Element> Buffer<T, Device> {
    /// Empty device buffer on the default context
    pub fn new() -> Result<Self> {
        Ok(Self::new_in(&Context::acquire_default()?))
    }

    /// Empty device buffer on `ctx`; allocates nothing until it grows
    pub fn new_in(ctx: &Context) -> Self {
        Self::from_storage(DeviceStorage::new_in(ctx.clone()))
    }

    /// Backend allocation, `None` while the buffer has never held elements
    pub fn handle(&self) -> Option<BufferHandle> {
        self.storage.handle()
    }

    /// Owning context
    pub fn device_context(&self) -> &Context {
        self.storage.device_context()
    }

    /// Copy element `index` to the host
    pub fn read(&self, index: usize) -> Result<T> {
        self.storage.read(index)
    }

    /// Overwrite element `index`
    pub fn write(&mut self, index: usize, value: T) -> Result<()> {
        self.storage.write(index, value)
    }

    /// First element; [`Error::IndexOutOfBounds`] when empty
    pub fn front(&self) -> Result<T> {
        self.storage.read(0)
    }

    /// Last element; [`Error::IndexOutOfBounds`] when empty
    pub fn back(&self) -> Result<T> {
        match self.len() {
            0 => Err(Error::IndexOutOfBounds { index: 0, len: 0 }),
            len => self.storage.read(len - 1),
        }
    }

    /// Append an element, growing the allocation geometrically
    pub fn push(&mut self, value: T) -> Result<()> {
        self.storage.extend_from_slice(&[value])
    }

    pub fn pop(&mut self) -> Result<Option<T>> {
        self.storage.pop()
    }

    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<()> {
        self.storage.extend_from_slice(values)
    }
}

impl<T: Element> TryFrom<&Buffer<T, Host>> for Buffer<T, Device> {
    type Error = Error;

    fn try_from(source: &Buffer<T, Host>) -> Result<Self> {
        source.to_device()
    }
}

impl<T: Element> fmt::Debug for Buffer<T, Device> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer").field("storage", &self.storage).finish()
    }
}

// ================================================================================================
// Ranges
// ================================================================================================

/// Borrowed window `[start, end)` of a buffer
///
/// Usable wherever a [`Sequence`] is expected.
pub struct BufferRange<'a, T: Element, S: MemorySpace> {
    buffer: &'a Buffer<T, S>,
    start: usize,
    end: usize,
}

impl<'a, T: Element, S: MemorySpace> Clone for BufferRange<'a, T, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T: Element, S: MemorySpace> Copy for BufferRange<'a, T, S> {}

impl<'a, T: Element, S: MemorySpace> BufferRange<'a, T, S> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The buffer this range borrows from
    pub fn buffer(&self) -> &'a Buffer<T, S> {
        self.buffer
    }

    /// Copy the window to a `Vec`, transferring if device-resident
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.to_host_vec()
    }
}

impl<'a, T: Element, S: MemorySpace> Sequence<T> for BufferRange<'a, T, S> {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn residency(&self) -> Residency<'_, T> {
        self.buffer.storage.residency(self.start..self.end)
    }
}

impl<'a, T: Element, S: MemorySpace> fmt::Debug for BufferRange<'a, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRange")
            .field("space", &S::KIND)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}
