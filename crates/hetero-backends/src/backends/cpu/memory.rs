//! Memory manager for the CPU backends
//!
//! Every CPU buffer is ordinary host memory, so "pinned" allocations differ
//! from plain ones only in bookkeeping. Owned allocations are 64-byte aligned
//! and zero-initialized; wrapped allocations belong to the caller and are
//! never freed here.

use crate::backend::BufferHandle;
use crate::error::{BackendError, Result};
use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

const ALIGNMENT: usize = 64;

/// One registered region of host memory.
pub(crate) struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
    /// `Some` when this manager allocated the region and must free it.
    layout: Option<Layout>,
    pinned: bool,
}

// SAFETY: the region is plain bytes with no thread affinity. Concurrent
// access is coordinated by the owning `RwLock<MemoryManager>` and, during
// launches, by the kernel itself.
unsafe impl Send for HostAllocation {}
unsafe impl Sync for HostAllocation {}

impl HostAllocation {
    fn owned(len: usize) -> Result<Self> {
        let layout =
            Layout::from_size_align(len.max(1), ALIGNMENT).map_err(|_| BackendError::AllocationFailed { bytes: len })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(BackendError::AllocationFailed { bytes: len })?;
        Ok(Self {
            ptr,
            len,
            layout: Some(layout),
            pinned: false,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_owned(&self) -> bool {
        self.layout.is_some()
    }

    fn check_range(&self, offset: usize, size: usize) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(BackendError::BufferOutOfBounds {
                offset,
                size,
                buffer_size: self.len,
            }),
        }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: allocated in `owned` with exactly this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// Memory manager for the CPU backends
pub struct MemoryManager {
    buffers: HashMap<u64, HostAllocation>,

    /// Next buffer handle ID
    next_buffer_id: u64,

    /// Bytes currently held by owned allocations
    owned_bytes: usize,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            owned_bytes: 0,
        }
    }

    fn insert(&mut self, allocation: HostAllocation) -> BufferHandle {
        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(handle.id(), allocation);
        handle
    }

    pub fn allocate_buffer(&mut self, size: usize, pinned: bool) -> Result<BufferHandle> {
        let mut allocation = HostAllocation::owned(size)?;
        allocation.pinned = pinned;
        self.owned_bytes += size;
        Ok(self.insert(allocation))
    }

    /// # Safety
    ///
    /// See [`crate::Backend::wrap`].
    pub unsafe fn wrap_buffer(&mut self, ptr: *mut u8, size: usize) -> Result<BufferHandle> {
        let ptr = NonNull::new(ptr).ok_or_else(|| BackendError::unsupported("cannot wrap a null pointer"))?;
        Ok(self.insert(HostAllocation {
            ptr,
            len: size,
            layout: None,
            pinned: true,
        }))
    }

    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let allocation = self
            .buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle))?;
        if allocation.is_owned() {
            self.owned_bytes -= allocation.len;
        }
        Ok(())
    }

    pub(crate) fn get(&self, handle: BufferHandle) -> Result<&HostAllocation> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle))
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.get(handle)?.len)
    }

    pub fn is_pinned(&self, handle: BufferHandle) -> Result<bool> {
        Ok(self.get(handle)?.pinned)
    }

    pub fn owned_bytes(&self) -> usize {
        self.owned_bytes
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn copy_to_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let allocation = self.get(handle)?;
        allocation.check_range(offset, data.len())?;
        // SAFETY: range checked above; `data` cannot alias a region we own
        // mutably because the caller holds it as a shared slice.
        unsafe {
            std::ptr::copy(data.as_ptr(), allocation.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    pub fn copy_from_buffer(&self, handle: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()> {
        let allocation = self.get(handle)?;
        allocation.check_range(offset, out.len())?;
        // SAFETY: range checked above.
        unsafe {
            std::ptr::copy(allocation.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    pub fn copy_between(
        &mut self,
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        size: usize,
    ) -> Result<()> {
        let src_alloc = self.get(src)?;
        src_alloc.check_range(src_offset, size)?;
        let dst_alloc = self.get(dst)?;
        dst_alloc.check_range(dst_offset, size)?;
        // SAFETY: both ranges checked; `copy` tolerates overlap.
        unsafe {
            std::ptr::copy(
                src_alloc.as_ptr().add(src_offset),
                dst_alloc.as_ptr().add(dst_offset),
                size,
            );
        }
        Ok(())
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}
