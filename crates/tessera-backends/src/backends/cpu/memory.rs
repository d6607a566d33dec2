//! Memory manager for the CPU backend
//!
//! Simulated device memory: every buffer is a heap allocation of
//! [`DEVICE_ALIGNMENT`]-sized lines, so the start of each buffer honours the
//! same alignment a real device allocation would.

use crate::backend::{BufferHandle, DEVICE_ALIGNMENT};
use crate::error::{BackendError, Result};
use std::collections::HashMap;

/// One aligned line of device memory
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Line([u8; DEVICE_ALIGNMENT]);

// SAFETY: `Line` is a `repr(C)` wrapper around a byte array whose size equals
// its alignment, so it has no padding and every bit pattern is valid.
unsafe impl bytemuck::Zeroable for Line {}
unsafe impl bytemuck::Pod for Line {}

struct Allocation {
    lines: Vec<Line>,
    size: usize,
}

impl Allocation {
    fn zeroed(size: usize) -> Result<Self> {
        let line_count = size.div_ceil(DEVICE_ALIGNMENT);
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(line_count)
            .map_err(|_| BackendError::OutOfMemory { requested: size })?;
        lines.resize(line_count, bytemuck::Zeroable::zeroed());
        Ok(Self { lines, size })
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<Line, u8>(&self.lines)[..self.size]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<Line, u8>(&mut self.lines)[..self.size]
    }

    fn range(&self, offset: usize, size: usize) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(offset..end),
            _ => Err(BackendError::BufferOutOfBounds {
                offset,
                size,
                buffer_size: self.size,
            }),
        }
    }
}

/// Buffer table for the CPU backend
pub struct MemoryManager {
    buffers: HashMap<u64, Allocation>,
    next_buffer_id: u64,
    max_allocation_bytes: usize,
    allocated_bytes: usize,
}

impl MemoryManager {
    /// Create a memory manager refusing single allocations above `max_allocation_bytes`
    pub fn new(max_allocation_bytes: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            max_allocation_bytes,
            allocated_bytes: 0,
        }
    }

    /// Allocate a zeroed buffer
    pub fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        if size > self.max_allocation_bytes {
            return Err(BackendError::AllocationTooLarge {
                requested: size,
                limit: self.max_allocation_bytes,
            });
        }

        let allocation = Allocation::zeroed(size)?;
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, allocation);
        self.allocated_bytes += size;

        Ok(BufferHandle::new(id))
    }

    /// Free a buffer
    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let allocation = self
            .buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        self.allocated_bytes -= allocation.size;
        Ok(())
    }

    /// Copy host bytes into a buffer
    pub fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let allocation = self.allocation_mut(handle)?;
        let range = allocation.range(offset, data.len())?;
        allocation.bytes_mut()[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy buffer bytes out to the host
    pub fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        let allocation = self.allocation(handle)?;
        let range = allocation.range(offset, data.len())?;
        data.copy_from_slice(&allocation.bytes()[range]);
        Ok(())
    }

    /// Copy bytes between two buffers (or within one)
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        size: usize,
    ) -> Result<()> {
        if src == dst {
            let allocation = self.allocation_mut(src)?;
            let from = allocation.range(src_offset, size)?;
            let to = allocation.range(dst_offset, size)?;
            allocation.bytes_mut().copy_within(from, to.start);
            return Ok(());
        }

        // Take the destination out of the table so both sides can be borrowed.
        let mut target = self
            .buffers
            .remove(&dst.id())
            .ok_or(BackendError::InvalidBufferHandle(dst.id()))?;
        let result = self.allocation(src).and_then(|source| {
            let from = source.range(src_offset, size)?;
            let to = target.range(dst_offset, size)?;
            target.bytes_mut()[to].copy_from_slice(&source.bytes()[from]);
            Ok(())
        });
        self.buffers.insert(dst.id(), target);
        result
    }

    /// Size of a buffer in bytes
    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.allocation(handle).map(|a| a.size)
    }

    /// Read-only view of a buffer's bytes
    pub fn bytes(&self, handle: BufferHandle) -> Result<&[u8]> {
        self.allocation(handle).map(Allocation::bytes)
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Total bytes held by live buffers
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    fn allocation(&self, handle: BufferHandle) -> Result<&Allocation> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn allocation_mut(&mut self, handle: BufferHandle) -> Result<&mut Allocation> {
        self.buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MemoryManager {
        MemoryManager::new(usize::MAX)
    }

    #[test]
    fn test_allocate_and_free() {
        let mut mem = manager();
        let buffer = mem.allocate_buffer(100).unwrap();
        assert_eq!(mem.buffer_size(buffer).unwrap(), 100);
        assert_eq!(mem.buffer_count(), 1);
        assert_eq!(mem.allocated_bytes(), 100);

        mem.free_buffer(buffer).unwrap();
        assert_eq!(mem.buffer_count(), 0);
        assert_eq!(mem.allocated_bytes(), 0);
        assert!(matches!(mem.free_buffer(buffer), Err(BackendError::InvalidBufferHandle(_))));
    }

    #[test]
    fn test_zero_sized_buffer() {
        let mut mem = manager();
        let buffer = mem.allocate_buffer(0).unwrap();
        assert_eq!(mem.buffer_size(buffer).unwrap(), 0);
        assert!(mem.bytes(buffer).unwrap().is_empty());
        mem.write_buffer(buffer, 0, &[]).unwrap();
    }

    #[test]
    fn test_buffers_are_aligned() {
        let mut mem = manager();
        for size in [1, 7, 64, 65, 1000] {
            let buffer = mem.allocate_buffer(size).unwrap();
            let ptr = mem.bytes(buffer).unwrap().as_ptr() as usize;
            assert_eq!(ptr % DEVICE_ALIGNMENT, 0, "size {size}");
        }
    }

    #[test]
    fn test_write_read_with_offset() {
        let mut mem = manager();
        let buffer = mem.allocate_buffer(16).unwrap();

        mem.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 8];
        mem.read_buffer(buffer, 2, &mut out).unwrap();
        assert_eq!(out, [0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut mem = manager();
        let buffer = mem.allocate_buffer(8).unwrap();

        let result = mem.write_buffer(buffer, 6, &[0; 4]);
        assert!(matches!(
            result,
            Err(BackendError::BufferOutOfBounds {
                offset: 6,
                size: 4,
                buffer_size: 8
            })
        ));

        let mut out = [0u8; 2];
        assert!(mem.read_buffer(buffer, usize::MAX, &mut out).is_err());
    }

    #[test]
    fn test_copy_between_buffers() {
        let mut mem = manager();
        let src = mem.allocate_buffer(8).unwrap();
        let dst = mem.allocate_buffer(8).unwrap();
        mem.write_buffer(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        mem.copy_buffer(src, 2, dst, 0, 4).unwrap();

        let mut out = [0u8; 8];
        mem.read_buffer(dst, 0, &mut out).unwrap();
        assert_eq!(out, [3, 4, 5, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_error_keeps_destination() {
        let mut mem = manager();
        let src = mem.allocate_buffer(4).unwrap();
        let dst = mem.allocate_buffer(4).unwrap();

        assert!(mem.copy_buffer(src, 0, dst, 0, 8).is_err());
        assert_eq!(mem.buffer_size(dst).unwrap(), 4);

        let missing = BufferHandle::new(999);
        assert!(matches!(
            mem.copy_buffer(missing, 0, dst, 0, 1),
            Err(BackendError::InvalidBufferHandle(999))
        ));
        assert_eq!(mem.buffer_count(), 2);
    }

    #[test]
    fn test_copy_within_buffer() {
        let mut mem = manager();
        let buffer = mem.allocate_buffer(8).unwrap();
        mem.write_buffer(buffer, 0, &[1, 2, 3, 4, 0, 0, 0, 0]).unwrap();

        mem.copy_buffer(buffer, 0, buffer, 4, 4).unwrap();

        let mut out = [0u8; 8];
        mem.read_buffer(buffer, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn test_allocation_limit() {
        let mut mem = MemoryManager::new(1024);
        assert!(mem.allocate_buffer(1024).is_ok());
        assert!(matches!(
            mem.allocate_buffer(1025),
            Err(BackendError::AllocationTooLarge {
                requested: 1025,
                limit: 1024
            })
        ));
    }
}
