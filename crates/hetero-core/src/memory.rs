//! Reference-counted device buffers
//!
//! A [`Memory`] is a shared handle: clones alias the same buffer and the
//! buffer is released when the last clone is dropped. Owned buffers are
//! freed by the backend; wrapped buffers (see [`Device::wrap`]) are only
//! unregistered, the caller keeps ownership of the storage.
//!
//! Transfers take a [`CopyOptions`]:
//!
//! | option        | meaning                                             |
//! |---------------|-----------------------------------------------------|
//! | `bytes`       | bytes to move; defaults to the rest of the source    |
//! | `offset`      | byte offset into this memory                         |
//! | `peer_offset` | byte offset into the other side (host slice/memory)  |
//! | `asynchronous`| enqueue and return; complete after `finish`          |
//! | `stream`      | stream to enqueue into instead of the current one    |
//!
//! Host slices are staged by the backend, so an asynchronous upload never
//! borrows the slice past the call. Downloads into host slices are always
//! synchronous.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::scalar::DeviceScalar;
use crate::stream::Stream;
use hetero_backends::{BackendError, BufferHandle, StreamHandle, TransferMode};
use hetero_lang::ScalarKind;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct MemoryInner {
    pub(crate) device: Device,
    pub(crate) handle: BufferHandle,
    pub(crate) bytes: usize,
    pub(crate) dtype: ScalarKind,
    pub(crate) owned: bool,
    pub(crate) pinned: bool,
}

impl Drop for MemoryInner {
    fn drop(&mut self) {
        let this: &MemoryInner = self;
        this.device.release_buffer(this);
    }
}

/// Shared handle to a buffer on one device
#[derive(Clone)]
pub struct Memory {
    inner: Arc<MemoryInner>,
}

/// Where [`Memory::copy_from`] reads
#[derive(Debug, Clone, Copy)]
pub enum CopySource<'a> {
    Host(&'a [u8]),
    Memory(&'a Memory),
}

impl<'a, T: DeviceScalar> From<&'a [T]> for CopySource<'a> {
    fn from(data: &'a [T]) -> Self {
        CopySource::Host(bytemuck::cast_slice(data))
    }
}

impl<'a, T: DeviceScalar> From<&'a Vec<T>> for CopySource<'a> {
    fn from(data: &'a Vec<T>) -> Self {
        CopySource::Host(bytemuck::cast_slice(data.as_slice()))
    }
}

impl<'a> From<&'a Memory> for CopySource<'a> {
    fn from(memory: &'a Memory) -> Self {
        CopySource::Memory(memory)
    }
}

/// Where [`Memory::copy_to`] writes
#[derive(Debug)]
pub enum CopyTarget<'a> {
    Host(&'a mut [u8]),
    Memory(&'a Memory),
}

impl<'a, T: DeviceScalar> From<&'a mut [T]> for CopyTarget<'a> {
    fn from(data: &'a mut [T]) -> Self {
        CopyTarget::Host(bytemuck::cast_slice_mut(data))
    }
}

impl<'a, T: DeviceScalar> From<&'a mut Vec<T>> for CopyTarget<'a> {
    fn from(data: &'a mut Vec<T>) -> Self {
        CopyTarget::Host(bytemuck::cast_slice_mut(data.as_mut_slice()))
    }
}

impl<'a> From<&'a Memory> for CopyTarget<'a> {
    fn from(memory: &'a Memory) -> Self {
        CopyTarget::Memory(memory)
    }
}

/// Range, ordering and stream of one transfer
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub bytes: Option<usize>,
    pub offset: usize,
    pub peer_offset: usize,
    pub asynchronous: bool,
    pub stream: Option<Stream>,
}

impl CopyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn peer_offset(mut self, peer_offset: usize) -> Self {
        self.peer_offset = peer_offset;
        self
    }

    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    pub fn on(mut self, stream: &Stream) -> Self {
        self.stream = Some(stream.clone());
        self
    }

    /// Read `bytes`, `offset`, `peer_offset` and `async` from a property set.
    pub fn from_properties(properties: &Properties) -> Self {
        let to_usize = |key: &str| properties.get_u64(key).and_then(|v| usize::try_from(v).ok());
        Self {
            bytes: to_usize("bytes"),
            offset: to_usize("offset").unwrap_or(0),
            peer_offset: to_usize("peer_offset").unwrap_or(0),
            asynchronous: properties.is_async(),
            stream: None,
        }
    }
}

fn check_range(offset: usize, bytes: usize, size: usize) -> Result<()> {
    match offset.checked_add(bytes) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::Range { offset, bytes, size }),
    }
}

impl Memory {
    pub(crate) fn new(device: Device, handle: BufferHandle, bytes: usize, dtype: ScalarKind, owned: bool, pinned: bool) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                device,
                handle,
                bytes,
                dtype,
                owned,
                pinned,
            }),
        }
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn handle(&self) -> BufferHandle {
        self.inner.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.bytes
    }

    /// Number of `dtype` elements.
    pub fn len(&self) -> usize {
        self.inner.bytes / self.inner.dtype.size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes == 0
    }

    /// Element type the buffer was allocated for.
    pub fn dtype(&self) -> ScalarKind {
        self.inner.dtype
    }

    /// `false` for wrapped caller storage.
    pub fn is_owned(&self) -> bool {
        self.inner.owned
    }

    /// Pinned allocations and wrapped host storage.
    pub fn is_host_accessible(&self) -> bool {
        self.inner.pinned || !self.inner.owned
    }

    /// Whether both handles alias the same buffer.
    pub fn ptr_eq(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this buffer.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn resolve_stream(&self, stream: Option<&Stream>) -> Result<StreamHandle> {
        match stream {
            Some(stream) => {
                self.inner.device.check_stream(stream)?;
                Ok(stream.handle())
            }
            None => Ok(self.inner.device.current_stream_handle()),
        }
    }

    fn transfer_mode(&self, asynchronous: bool) -> TransferMode {
        if asynchronous && self.inner.device.capabilities().async_copy {
            TransferMode::Async
        } else {
            TransferMode::Blocking
        }
    }

    fn check_same_device(&self, other: &Memory) -> Result<()> {
        if self.inner.device.same_device(&other.inner.device) {
            Ok(())
        } else {
            Err(Error::CrossDevice(format!(
                "{} is on device {}, {} is on device {}",
                other.inner.handle,
                other.inner.device.id(),
                self.inner.handle,
                self.inner.device.id()
            )))
        }
    }

    // ============================================================================================
    // Transfers
    // ============================================================================================

    /// Copy into this memory from host bytes or another memory
    ///
    /// `bytes` defaults to the source's length past `peer_offset`.
    #[tracing::instrument(skip(self, source, options), fields(buffer = %self.inner.handle))]
    pub fn copy_from<'a>(&self, source: impl Into<CopySource<'a>>, options: &CopyOptions) -> Result<()> {
        let source = source.into();
        let stream = self.resolve_stream(options.stream.as_ref())?;
        let mode = self.transfer_mode(options.asynchronous);
        let start = Instant::now();

        let (bytes, direction) = match source {
            CopySource::Host(data) => {
                let bytes = options.bytes.unwrap_or(data.len().saturating_sub(options.peer_offset));
                check_range(options.peer_offset, bytes, data.len())?;
                check_range(options.offset, bytes, self.inner.bytes)?;
                let data = &data[options.peer_offset..options.peer_offset + bytes];
                self.inner
                    .device
                    .backend()
                    .write(stream, self.inner.handle, options.offset, data, mode)?;
                (bytes, "H2D")
            }
            CopySource::Memory(src) => {
                self.check_same_device(src)?;
                let bytes = options.bytes.unwrap_or(src.size().saturating_sub(options.peer_offset));
                check_range(options.peer_offset, bytes, src.size())?;
                check_range(options.offset, bytes, self.inner.bytes)?;
                self.inner.device.backend().copy(
                    stream,
                    self.inner.handle,
                    options.offset,
                    src.handle(),
                    options.peer_offset,
                    bytes,
                    mode,
                )?;
                (bytes, "D2D")
            }
        };

        hetero_tracing::performance::record_transfer(
            bytes,
            direction,
            mode == TransferMode::Async,
            start.elapsed().as_micros() as u64,
        );
        Ok(())
    }

    /// Copy out of this memory into a host slice or another memory
    ///
    /// For host targets `bytes` defaults to the slice's length past
    /// `peer_offset` and the copy is always synchronous; for memory targets
    /// it defaults to the rest of this memory past `offset`.
    #[tracing::instrument(skip(self, target, options), fields(buffer = %self.inner.handle))]
    pub fn copy_to<'a>(&self, target: impl Into<CopyTarget<'a>>, options: &CopyOptions) -> Result<()> {
        match target.into() {
            CopyTarget::Host(out) => {
                let stream = self.resolve_stream(options.stream.as_ref())?;
                let bytes = options.bytes.unwrap_or(out.len().saturating_sub(options.peer_offset));
                check_range(options.peer_offset, bytes, out.len())?;
                check_range(options.offset, bytes, self.inner.bytes)?;
                let start = Instant::now();
                let out = &mut out[options.peer_offset..options.peer_offset + bytes];
                self.inner
                    .device
                    .backend()
                    .read(stream, self.inner.handle, options.offset, out)?;
                hetero_tracing::performance::record_transfer(bytes, "D2H", false, start.elapsed().as_micros() as u64);
                Ok(())
            }
            CopyTarget::Memory(dst) => {
                let swapped = CopyOptions {
                    bytes: Some(
                        options
                            .bytes
                            .unwrap_or(self.inner.bytes.saturating_sub(options.offset)),
                    ),
                    offset: options.peer_offset,
                    peer_offset: options.offset,
                    asynchronous: options.asynchronous,
                    stream: options.stream.clone(),
                };
                dst.copy_from(CopySource::Memory(self), &swapped)
            }
        }
    }

    /// Synchronously fill the front of this memory with `data`.
    pub fn copy_from_slice<T: DeviceScalar>(&self, data: &[T]) -> Result<()> {
        self.copy_from(data, &CopyOptions::new())
    }

    /// Synchronously fill `out` from the front of this memory.
    pub fn copy_to_slice<T: DeviceScalar>(&self, out: &mut [T]) -> Result<()> {
        self.copy_to(out, &CopyOptions::new())
    }

    /// Download the whole buffer as `T`s.
    pub fn to_vec<T: DeviceScalar>(&self) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.inner.bytes / std::mem::size_of::<T>()];
        self.copy_to_slice(&mut out)?;
        Ok(out)
    }

    /// A new buffer on the same device holding a copy of this one
    ///
    /// Cloning the handle aliases; this is the deep copy.
    pub fn clone_buffer(&self) -> Result<Memory> {
        let copy = self
            .inner
            .device
            .allocate_bytes(self.inner.bytes, self.inner.dtype, self.inner.pinned)?;
        copy.copy_from(self, &CopyOptions::new())?;
        Ok(copy)
    }

    /// Read host-accessible memory in place, without a transfer
    ///
    /// Does not wait for queued work; call `finish` first when writes to
    /// this memory may still be in flight.
    pub fn read_host<T: DeviceScalar>(&self) -> Result<Vec<T>> {
        if !self.is_host_accessible() {
            return Err(Error::Backend(BackendError::unsupported(format!(
                "{} is not host accessible",
                self.inner.handle
            ))));
        }
        let backend = self.inner.device.backend();
        let ptr = backend
            .host_ptr(self.inner.handle)?
            .ok_or_else(|| BackendError::unsupported(format!("{} has no host address", self.inner.handle)))?;
        // SAFETY: the backend keeps the buffer alive and sized `bytes` while
        // we hold its lock, and host_ptr only returns host-addressable memory.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.cast_const(), self.inner.bytes) };
        let mut out = vec![T::zeroed(); self.inner.bytes / std::mem::size_of::<T>()];
        let len = out.len() * std::mem::size_of::<T>();
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes[..len]);
        Ok(out)
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("handle", &self.inner.handle)
            .field("device", &self.inner.device.id())
            .field("bytes", &self.inner.bytes)
            .field("dtype", &self.inner.dtype)
            .field("owned", &self.inner.owned)
            .field("pinned", &self.inner.pinned)
            .finish()
    }
}
