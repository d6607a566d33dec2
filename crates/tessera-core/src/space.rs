//! Memory-space policies
//!
//! A [`Buffer`](crate::Buffer) is parameterized by where its elements live:
//!
//! - [`Host`]: ordinary heap memory, directly addressable
//! - [`Device`]: memory owned by a [`Context`]'s backend, reached only
//!   through explicit transfers and kernel launches
//!
//! Each space supplies a [`Storage`] implementation. Everything a buffer does
//! that depends on residency goes through that trait.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::sequence::{DeviceSlice, Residency};
use crate::Element;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Range;
use tessera_backends::BufferHandle;

/// Upper bound on the host staging used by a device fill
const FILL_PIECE_BYTES: usize = 64 * 1024;

mod private {
    pub trait Sealed {}
    impl Sealed for super::Host {}
    impl Sealed for super::Device {}
}

/// Runtime tag for a memory space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceKind {
    Host,
    Device,
}

impl SpaceKind {
    /// Lowercase label used in log events
    pub const fn as_str(self) -> &'static str {
        match self {
            SpaceKind::Host => "host",
            SpaceKind::Device => "device",
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory space a [`Buffer`](crate::Buffer) can live in
///
/// Sealed: implemented by [`Host`] and [`Device`] only.
pub trait MemorySpace: private::Sealed + fmt::Debug + Send + Sync + 'static {
    /// Runtime tag for this space
    const KIND: SpaceKind;

    /// Element storage for this space
    type Storage<T: Element>: Storage<T>;
}

/// Host memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Host;

/// Device memory owned by a [`Context`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Device;

impl MemorySpace for Host {
    const KIND: SpaceKind = SpaceKind::Host;
    type Storage<T: Element> = Vec<T>;
}

impl MemorySpace for Device {
    const KIND: SpaceKind = SpaceKind::Device;
    type Storage<T: Element> = DeviceStorage<T>;
}

/// Residency-dependent operations behind a [`Buffer`](crate::Buffer)
///
/// `ctx` arguments name the context device storage should live on; `None`
/// means "the source's context if it has one, else the default context".
/// Host storage ignores them.
pub trait Storage<T: Element>: Sized + Send + Sync {
    /// Take ownership of host elements
    fn from_vec(values: Vec<T>, ctx: Option<&Context>) -> Result<Self>;

    /// `n` copies of `value`
    fn from_elem(n: usize, value: T, ctx: Option<&Context>) -> Result<Self>;

    /// Copy elements from wherever they currently live
    fn from_residency(source: Residency<'_, T>, ctx: Option<&Context>) -> Result<Self>;

    /// Empty storage with the same placement as `self`
    fn empty_like(&self) -> Self;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Largest length this storage can reach
    fn max_len(&self) -> usize;

    /// Context for device storage
    fn context(&self) -> Option<&Context>;

    /// Host-visible elements; borrowed for host storage, downloaded otherwise
    fn host_view(&self) -> Result<Cow<'_, [T]>>;

    /// Deep copy within the same space
    fn try_clone(&self) -> Result<Self>;

    fn reserve(&mut self, additional: usize) -> Result<()>;

    fn resize(&mut self, new_len: usize, value: T) -> Result<()>;

    fn truncate(&mut self, len: usize);

    fn shrink_to_fit(&mut self) -> Result<()>;

    /// Replace the contents with `values`
    fn assign(&mut self, values: &[T]) -> Result<()>;

    fn extend_from_slice(&mut self, values: &[T]) -> Result<()>;

    /// Borrowed view of `range`, which must lie within `0..len()`
    fn residency(&self, range: Range<usize>) -> Residency<'_, T>;
}

/// Largest element count addressable on the host
pub(crate) const fn host_max_len<T>() -> usize {
    let size = size_of::<T>();
    if size == 0 {
        usize::MAX
    } else {
        isize::MAX as usize / size
    }
}

/// Elements per upload when filling device storage with one value
fn fill_piece_len<T>() -> usize {
    (FILL_PIECE_BYTES / size_of::<T>().max(1)).max(1)
}

fn check_len(requested: usize, max: usize) -> Result<()> {
    if requested > max {
        return Err(Error::Length { requested, max });
    }
    Ok(())
}

fn host_reserve<T>(vec: &mut Vec<T>, additional: usize) -> Result<()> {
    let max = host_max_len::<T>();
    let requested = vec.len().saturating_add(additional);
    check_len(requested, max)?;
    vec.try_reserve(additional).map_err(|_| Error::OutOfMemory {
        requested: requested.saturating_mul(size_of::<T>()),
    })
}

impl<T: Element> Storage<T> for Vec<T> {
    fn from_vec(values: Vec<T>, _ctx: Option<&Context>) -> Result<Self> {
        Ok(values)
    }

    fn from_elem(n: usize, value: T, _ctx: Option<&Context>) -> Result<Self> {
        let mut vec = Vec::new();
        host_reserve(&mut vec, n)?;
        vec.resize(n, value);
        Ok(vec)
    }

    fn from_residency(source: Residency<'_, T>, _ctx: Option<&Context>) -> Result<Self> {
        match source {
            Residency::Host(slice) => Ok(slice.to_vec()),
            Residency::Device(slice) => slice.to_vec(),
        }
    }

    fn empty_like(&self) -> Self {
        Vec::new()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn capacity(&self) -> usize {
        Vec::capacity(self)
    }

    fn max_len(&self) -> usize {
        host_max_len::<T>()
    }

    fn context(&self) -> Option<&Context> {
        None
    }

    fn host_view(&self) -> Result<Cow<'_, [T]>> {
        Ok(Cow::Borrowed(self.as_slice()))
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(self.clone())
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        host_reserve(self, additional)
    }

    fn resize(&mut self, new_len: usize, value: T) -> Result<()> {
        if new_len > Vec::len(self) {
            host_reserve(self, new_len - Vec::len(self))?;
        }
        Vec::resize(self, new_len, value);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        Vec::truncate(self, len);
    }

    fn shrink_to_fit(&mut self) -> Result<()> {
        Vec::shrink_to_fit(self);
        Ok(())
    }

    fn assign(&mut self, values: &[T]) -> Result<()> {
        self.clear();
        host_reserve(self, values.len())?;
        Vec::extend_from_slice(self, values);
        Ok(())
    }

    fn extend_from_slice(&mut self, values: &[T]) -> Result<()> {
        host_reserve(self, values.len())?;
        Vec::extend_from_slice(self, values);
        Ok(())
    }

    fn residency(&self, range: Range<usize>) -> Residency<'_, T> {
        Residency::Host(&self[range])
    }
}

/// Element storage in device memory
///
/// Owns at most one backend allocation of `capacity` elements, of which the
/// first `len` are initialized. Storage that never grew past zero holds no
/// allocation. The allocation is freed on drop.
pub struct DeviceStorage<T: Element> {
    ctx: Context,
    handle: Option<BufferHandle>,
    len: usize,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceStorage<T> {
    pub(crate) fn new_in(ctx: Context) -> Self {
        Self {
            ctx,
            handle: None,
            len: 0,
            capacity: 0,
            _marker: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub(crate) fn device_context(&self) -> &Context {
        &self.ctx
    }

    fn device_max_len(ctx: &Context) -> usize {
        let size = size_of::<T>();
        if size == 0 {
            return host_max_len::<T>();
        }
        host_max_len::<T>().min(ctx.device_info().max_allocation_bytes / size)
    }

    fn with_capacity_in(ctx: Context, capacity: usize) -> Result<Self> {
        check_len(capacity, Self::device_max_len(&ctx))?;
        let mut storage = Self::new_in(ctx);
        storage.reallocate(capacity)?;
        Ok(storage)
    }

    /// Move the initialized prefix into a fresh allocation of `new_capacity` elements
    fn reallocate(&mut self, new_capacity: usize) -> Result<()> {
        let size = size_of::<T>();
        let keep = self.len.min(new_capacity);
        let new_handle = match new_capacity {
            0 => None,
            _ => Some(self.ctx.allocate(new_capacity * size)?),
        };

        if let (Some(old), Some(new)) = (self.handle, new_handle) {
            if keep > 0 {
                if let Err(err) = self.ctx.copy_device(old, 0, new, 0, keep * size) {
                    self.release(new);
                    return Err(err);
                }
            }
        }

        let old = std::mem::replace(&mut self.handle, new_handle);
        self.capacity = new_capacity;
        self.len = keep;
        match old {
            Some(old) => self.ctx.free(old),
            None => Ok(()),
        }
    }

    fn release(&self, handle: BufferHandle) {
        if let Err(err) = self.ctx.free(handle) {
            tracing::warn!(context_id = self.ctx.id(), %handle, error = %err, "device_free_failed");
        }
    }

    fn require_handle(&self) -> Result<BufferHandle> {
        self.handle
            .ok_or_else(|| Error::InvalidOperation("device storage has no allocation".to_string()))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::IndexOutOfBounds { index, len: self.len });
        }
        Ok(())
    }

    /// Single-element D2H read
    pub(crate) fn read(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut out = [T::zeroed()];
        self.ctx.download(self.require_handle()?, index, &mut out)?;
        Ok(out[0])
    }

    /// Single-element H2D write
    pub(crate) fn write(&mut self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        self.ctx.upload(self.require_handle()?, index, &[value])
    }

    pub(crate) fn pop(&mut self) -> Result<Option<T>> {
        if self.len == 0 {
            return Ok(None);
        }
        let value = self.read(self.len - 1)?;
        self.len -= 1;
        Ok(Some(value))
    }
}

impl<T: Element> Storage<T> for DeviceStorage<T> {
    fn from_vec(values: Vec<T>, ctx: Option<&Context>) -> Result<Self> {
        let mut storage = Self::with_capacity_in(Context::resolve(ctx)?, values.len())?;
        if !values.is_empty() {
            storage.ctx.upload(storage.require_handle()?, 0, &values)?;
            storage.len = values.len();
        }
        Ok(storage)
    }

    fn from_elem(n: usize, value: T, ctx: Option<&Context>) -> Result<Self> {
        let ctx = Context::resolve(ctx)?;
        check_len(n, Self::device_max_len(&ctx))?;
        let mut storage = Self::new_in(ctx);
        storage.resize(n, value)?;
        Ok(storage)
    }

    fn from_residency(source: Residency<'_, T>, ctx: Option<&Context>) -> Result<Self> {
        match source {
            Residency::Host(slice) => {
                let mut storage = Self::with_capacity_in(Context::resolve(ctx)?, slice.len())?;
                storage.extend_from_slice(slice)?;
                Ok(storage)
            }
            Residency::Device(slice) => {
                let target = ctx.unwrap_or(slice.context()).clone();
                if target.is_same(slice.context()) {
                    let mut storage = Self::with_capacity_in(target, slice.len())?;
                    if !slice.is_empty() {
                        let size = size_of::<T>();
                        storage.ctx.copy_device(
                            slice.require_handle()?,
                            slice.offset() * size,
                            storage.require_handle()?,
                            0,
                            slice.len() * size,
                        )?;
                        storage.len = slice.len();
                    }
                    Ok(storage)
                } else {
                    Self::from_vec(slice.to_vec()?, Some(&target))
                }
            }
        }
    }

    fn empty_like(&self) -> Self {
        Self::new_in(self.ctx.clone())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn max_len(&self) -> usize {
        Self::device_max_len(&self.ctx)
    }

    fn context(&self) -> Option<&Context> {
        Some(&self.ctx)
    }

    fn host_view(&self) -> Result<Cow<'_, [T]>> {
        DeviceSlice::new(&self.ctx, self.handle, 0, self.len)
            .to_vec()
            .map(Cow::Owned)
    }

    fn try_clone(&self) -> Result<Self> {
        Self::from_residency(self.residency(0..self.len), Some(&self.ctx))
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        let max = self.max_len();
        let required = self.len.saturating_add(additional);
        check_len(required, max)?;
        if required <= self.capacity {
            return Ok(());
        }
        let grown = self.capacity.saturating_mul(2).min(max);
        self.reallocate(required.max(grown))
    }

    fn resize(&mut self, new_len: usize, value: T) -> Result<()> {
        if new_len <= self.len {
            self.len = new_len;
            return Ok(());
        }
        self.reserve(new_len - self.len)?;
        let handle = self.require_handle()?;
        let piece = vec![value; (new_len - self.len).min(fill_piece_len::<T>())];
        while self.len < new_len {
            let count = (new_len - self.len).min(piece.len());
            self.ctx.upload(handle, self.len, &piece[..count])?;
            self.len += count;
        }
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    fn shrink_to_fit(&mut self) -> Result<()> {
        if self.capacity > self.len {
            self.reallocate(self.len)?;
        }
        Ok(())
    }

    fn assign(&mut self, values: &[T]) -> Result<()> {
        self.len = 0;
        self.extend_from_slice(values)
    }

    fn extend_from_slice(&mut self, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.reserve(values.len())?;
        self.ctx.upload(self.require_handle()?, self.len, values)?;
        self.len += values.len();
        Ok(())
    }

    fn residency(&self, range: Range<usize>) -> Residency<'_, T> {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "range {range:?} out of bounds for device buffer of length {}",
            self.len
        );
        Residency::Device(DeviceSlice::new(&self.ctx, self.handle, range.start, range.len()))
    }
}

impl<T: Element> Drop for DeviceStorage<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.release(handle);
        }
    }
}

impl<T: Element> fmt::Debug for DeviceStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStorage")
            .field("context_id", &self.ctx.id())
            .field("handle", &self.handle)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;

    fn context() -> Context {
        Context::from_config(ContextConfig::default().with_threads(1)).unwrap()
    }

    #[test]
    fn test_space_kinds() {
        assert_eq!(Host::KIND, SpaceKind::Host);
        assert_eq!(Device::KIND, SpaceKind::Device);
        assert_eq!(SpaceKind::Device.to_string(), "device");
    }

    #[test]
    fn test_host_max_len() {
        assert_eq!(host_max_len::<u8>(), isize::MAX as usize);
        assert_eq!(host_max_len::<u64>(), isize::MAX as usize / 8);
    }

    #[test]
    fn test_host_storage_length_error() {
        let result = <Vec<u32> as Storage<u32>>::from_elem(usize::MAX, 0, None);
        assert!(matches!(result, Err(Error::Length { requested: usize::MAX, .. })));
    }

    #[test]
    fn test_device_storage_grows_geometrically() {
        let ctx = context();
        let mut storage = DeviceStorage::<u32>::new_in(ctx.clone());
        assert!(storage.handle().is_none());

        storage.extend_from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(storage.capacity(), 3);
        storage.extend_from_slice(&[4]).unwrap();
        assert_eq!(storage.capacity(), 6);
        assert_eq!(storage.host_view().unwrap().as_ref(), &[1, 2, 3, 4]);

        storage.shrink_to_fit().unwrap();
        assert_eq!(storage.capacity(), 4);
        assert_eq!(storage.host_view().unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_device_storage_resize_and_truncate() {
        let ctx = context();
        let mut storage = <DeviceStorage<i64> as Storage<i64>>::from_elem(2, 7, Some(&ctx)).unwrap();
        storage.resize(5, -1).unwrap();
        assert_eq!(storage.host_view().unwrap().as_ref(), &[7, 7, -1, -1, -1]);

        storage.truncate(1);
        assert_eq!(storage.len(), 1);
        assert!(storage.capacity() >= 5);

        storage.resize(0, 0).unwrap();
        assert_eq!(storage.len(), 0);
        storage.shrink_to_fit().unwrap();
        assert!(storage.handle().is_none());
    }

    #[test]
    fn test_device_storage_element_access() {
        let ctx = context();
        let mut storage = <DeviceStorage<u16> as Storage<u16>>::from_vec(vec![5, 6, 7], Some(&ctx)).unwrap();
        assert_eq!(storage.read(1).unwrap(), 6);
        storage.write(1, 60).unwrap();
        assert_eq!(storage.read(1).unwrap(), 60);
        assert!(matches!(storage.read(3), Err(Error::IndexOutOfBounds { index: 3, len: 3 })));
        assert_eq!(storage.pop().unwrap(), Some(7));
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_device_storage_respects_allocation_limit() {
        let ctx = Context::from_config(
            ContextConfig::default()
                .with_threads(1)
                .with_max_allocation_bytes(64),
        )
        .unwrap();
        let mut storage = DeviceStorage::<u32>::new_in(ctx);
        assert_eq!(storage.max_len(), 16);
        storage.resize(16, 1).unwrap();
        assert!(matches!(
            storage.reserve(1),
            Err(Error::Length { requested: 17, max: 16 })
        ));
    }

    #[test]
    fn test_device_storage_resize_checks_limit_first() {
        let ctx = Context::from_config(
            ContextConfig::default()
                .with_threads(1)
                .with_max_allocation_bytes(1024),
        )
        .unwrap();
        let mut storage = <DeviceStorage<u32> as Storage<u32>>::from_vec(vec![1, 2], Some(&ctx)).unwrap();

        for new_len in [257, usize::MAX] {
            assert!(matches!(
                storage.resize(new_len, 0),
                Err(Error::Length { requested, max: 256 }) if requested == new_len
            ));
            assert_eq!(storage.len(), 2);
            assert_eq!(storage.capacity(), 2);
        }
        assert_eq!(storage.host_view().unwrap().as_ref(), &[1, 2]);
    }

    #[test]
    fn test_device_storage_fill_spans_several_uploads() {
        let ctx = context();
        let n = fill_piece_len::<u8>() * 2 + 3;
        let mut storage = <DeviceStorage<u8> as Storage<u8>>::from_elem(1, 1, Some(&ctx)).unwrap();
        storage.resize(n, 9).unwrap();

        let contents = storage.host_view().unwrap();
        assert_eq!(contents.len(), n);
        assert_eq!(contents[0], 1);
        assert!(contents[1..].iter().all(|&x| x == 9));
    }

    #[test]
    fn test_device_storage_frees_on_drop() {
        let ctx = context();
        let before = ctx.allocate(1).unwrap();
        ctx.free(before).unwrap();
        {
            let storage = <DeviceStorage<u8> as Storage<u8>>::from_vec(vec![1, 2, 3], Some(&ctx)).unwrap();
            let handle = storage.handle().unwrap();
            assert!(ctx.download::<u8>(handle, 0, &mut [0u8; 3]).is_ok());
        }
        // The storage's allocation is gone once it is dropped.
        let next = ctx.allocate(1).unwrap();
        assert!(ctx.free(BufferHandle::new(next.id() - 1)).is_err());
        ctx.free(next).unwrap();
    }
}
