//! Backend trait for kernel execution
//!
//! This trait defines the interface every device plug-in implements. The
//! runtime core never talks to hardware directly: it allocates, transfers,
//! queues and launches exclusively through these methods.

use super::types::{
    BufferHandle, CompileRequest, CompiledModule, LaunchArg, LaunchConfig, ModuleHandle, StreamHandle, TransferMode,
};
use crate::error::Result;
use crate::kind::{BackendKind, Capabilities};
use hetero_lang::Dialect;

/// Backend trait for kernel execution
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────┐
/// │                     Backend Trait                        │
/// │  - Buffer management (allocate/wrap/free)                │
/// │  - Transfers (write/read/copy, blocking or async)        │
/// │  - Streams (create/destroy/finish)                       │
/// │  - Kernels (compile/launch)                              │
/// └─────────────────────┬───────────────────────────────────┘
///                       │
///         ┌─────────────┼─────────────┬─────────────┐
///         ▼             ▼             ▼             ▼
///   ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐
///   │ Serial  │  │ OpenMP  │  │  CUDA   │  │  ...    │
///   └─────────┘  └─────────┘  └─────────┘  └─────────┘
/// ```
///
/// # Ordering
///
/// Work submitted on one stream completes in submission order. Blocking
/// transfers return only after every earlier operation on their stream has
/// completed. Errors raised by queued work may surface at `finish`.
///
/// # Usage
///
/// ```rust
/// use hetero_backends::{Backend, CpuBackend, TransferMode};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = CpuBackend::serial();
/// let stream = backend.create_stream()?;
/// let buffer = backend.allocate(16, false)?;
///
/// let data = [1.0f32, 2.0, 3.0, 4.0];
/// backend.write(stream, buffer, 0, bytemuck::cast_slice(&data), TransferMode::Blocking)?;
///
/// let mut out = [0.0f32; 4];
/// backend.read(stream, buffer, 0, bytemuck::cast_slice_mut(&mut out))?;
/// assert_eq!(out, data);
///
/// backend.free(buffer)?;
/// # Ok(())
/// # }
/// ```
pub trait Backend: Send + Sync {
    // ============================================================================================
    // Identity
    // ============================================================================================

    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Source flavour this backend compiles.
    fn dialect(&self) -> Dialect;

    /// Stable description of backend and physical device.
    ///
    /// Two backends with equal identity accept each other's compiled
    /// artifacts, so it participates in build cache keys.
    fn identity(&self) -> String;

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate `bytes` of device memory
    ///
    /// `host_pinned` requests memory the host can address directly.
    fn allocate(&mut self, bytes: usize, host_pinned: bool) -> Result<BufferHandle>;

    /// Register memory the caller owns as a buffer
    ///
    /// The backend never frees wrapped memory; `free` only forgets it.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `bytes` bytes until the
    /// handle is freed.
    unsafe fn wrap(&mut self, ptr: *mut u8, bytes: usize) -> Result<BufferHandle>;

    /// Release a buffer. Owned memory is returned to the backend.
    fn free(&mut self, handle: BufferHandle) -> Result<()>;

    /// Get buffer size in bytes
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    /// Host address of a host-accessible buffer, `None` otherwise
    fn host_ptr(&self, handle: BufferHandle) -> Result<Option<*mut u8>>;

    // ============================================================================================
    // Transfers
    // ============================================================================================

    /// Copy host bytes into a buffer at `offset`
    ///
    /// In [`TransferMode::Async`] the backend takes its own copy of `data`.
    fn write(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        offset: usize,
        data: &[u8],
        mode: TransferMode,
    ) -> Result<()>;

    /// Copy buffer bytes at `offset` to the host. Always blocking.
    fn read(&mut self, stream: StreamHandle, src: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Buffer to buffer copy
    #[allow(clippy::too_many_arguments)]
    fn copy(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        bytes: usize,
        mode: TransferMode,
    ) -> Result<()>;

    // ============================================================================================
    // Streams
    // ============================================================================================

    fn create_stream(&mut self) -> Result<StreamHandle>;

    fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()>;

    /// Block until all work queued on `stream` has completed
    ///
    /// Returns the first error raised by that work, if any.
    fn finish(&mut self, stream: StreamHandle) -> Result<()>;

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Compile backend-native source and resolve its entry point
    fn compile(&mut self, request: &CompileRequest) -> Result<CompiledModule>;

    /// Queue one execution of a compiled kernel
    ///
    /// Loop-model kernels ignore `config`; grid-model kernels require it.
    fn launch(
        &mut self,
        stream: StreamHandle,
        module: ModuleHandle,
        args: &[LaunchArg],
        config: Option<&LaunchConfig>,
    ) -> Result<()>;

    fn release_module(&mut self, module: ModuleHandle) -> Result<()>;

    // ============================================================================================
    // Type Introspection
    // ============================================================================================

    /// Downcast backend to &dyn Any for type-specific access
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast backend to &mut dyn Any for type-specific access
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
