//! CPU backends
//!
//! Reference implementation of the Backend trait. Both CPU kinds share one
//! type and differ only in threading:
//!
//! ```text
//! CpuBackend
//! ├── MemoryManager  - aligned host buffers, owned or wrapped
//! ├── Program        - dialect source compiled to slot-resolved IR
//! └── interp         - tree-walking executor; rayon for parallel loops/blocks
//! ```
//!
//! Execution is synchronous: every call has completed when it returns, so
//! streams only need to exist and `finish` never has work to wait for.
//!
//! # Usage
//!
//! ```rust
//! use hetero_backends::{Backend, CompileRequest, CpuBackend, LaunchArg, ScalarValue, TransferMode};
//! use hetero_lang::LaunchModel;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::serial();
//! let stream = backend.create_stream()?;
//! let y = backend.allocate(4 * 4, false)?;
//!
//! let source = "extern \"C\" void fill(const int n, float *y) {\n  for (int i = 0; i < n; ++i) y[i] = i;\n}";
//! let module = backend.compile(&CompileRequest::new(source, "fill", LaunchModel::Loops))?;
//! backend.launch(
//!     stream,
//!     module.handle,
//!     &[LaunchArg::Scalar(ScalarValue::I32(4)), LaunchArg::Buffer(y)],
//!     None,
//! )?;
//!
//! let mut out = [0.0f32; 4];
//! backend.read(stream, y, 0, bytemuck::cast_slice_mut(&mut out))?;
//! assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

mod interp;
pub(crate) mod memory;
mod program;
mod value;

use crate::backend::{
    Backend, BufferHandle, CompileRequest, CompiledModule, LaunchArg, LaunchConfig, ModuleHandle, StreamHandle,
    TransferMode,
};
use crate::error::{BackendError, Result};
use crate::kind::{BackendKind, Capabilities};
use crate::program_cache::ProgramCache;
use hetero_lang::{Dialect, LaunchModel};
use interp::{Bindings, GlobalView};
use memory::MemoryManager;
use parking_lot::RwLock;
pub use program::Program;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// CPU backend executing translated kernels on the host
#[derive(Clone)]
pub struct CpuBackend {
    kind: BackendKind,

    /// Memory manager (owned and wrapped host buffers)
    memory: Arc<RwLock<MemoryManager>>,

    modules: HashMap<u64, Arc<Program>>,
    next_module_id: u64,

    streams: HashSet<u64>,
    next_stream_id: u64,
}

impl CpuBackend {
    fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            memory: Arc::new(RwLock::new(MemoryManager::new())),
            modules: HashMap::new(),
            next_module_id: 1,
            streams: HashSet::new(),
            next_stream_id: 1,
        }
    }

    /// Single-threaded backend
    pub fn serial() -> Self {
        Self::with_kind(BackendKind::Serial)
    }

    /// Multi-threaded backend; parallel loops run on the rayon pool
    pub fn openmp() -> Self {
        Self::with_kind(BackendKind::OpenMp)
    }

    fn threaded(&self) -> bool {
        self.kind == BackendKind::OpenMp
    }

    /// Bytes held by allocations this backend owns
    pub fn owned_bytes(&self) -> usize {
        self.memory.read().owned_bytes()
    }

    /// Number of live buffer handles, owned or wrapped
    pub fn buffer_count(&self) -> usize {
        self.memory.read().buffer_count()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    fn check_stream(&self, stream: StreamHandle) -> Result<()> {
        if self.streams.contains(&stream.id()) {
            Ok(())
        } else {
            Err(BackendError::InvalidStreamHandle(stream))
        }
    }

    fn module(&self, module: ModuleHandle) -> Result<&Arc<Program>> {
        self.modules
            .get(&module.id())
            .ok_or(BackendError::InvalidModuleHandle(module))
    }

    /// Check `args` against the signature and resolve buffers.
    fn bind(&self, program: &Program, memory: &MemoryManager, args: &[LaunchArg]) -> Result<Bindings> {
        let name = program.name();
        if args.len() != program.params.len() {
            return Err(BackendError::argument(
                name,
                format!("expected {} arguments, got {}", program.params.len(), args.len()),
            ));
        }
        let mut views = Vec::with_capacity(args.len());
        let mut scalars = Vec::with_capacity(args.len());
        for (param, arg) in program.params.iter().zip(args) {
            match (param.ty.pointer, arg) {
                (true, LaunchArg::Buffer(handle)) => {
                    let allocation = memory.get(*handle)?;
                    views.push(Some(GlobalView {
                        ptr: allocation.as_ptr(),
                        len: allocation.len(),
                    }));
                    scalars.push(None);
                }
                (false, LaunchArg::Scalar(value)) => {
                    views.push(None);
                    scalars.push(Some((*value).into()));
                }
                (true, LaunchArg::Scalar(_)) => {
                    return Err(BackendError::argument(
                        name,
                        format!("'{}' expects a buffer, got a scalar", param.name),
                    ));
                }
                (false, LaunchArg::Buffer(_)) => {
                    return Err(BackendError::argument(
                        name,
                        format!("'{}' expects a scalar, got a buffer", param.name),
                    ));
                }
            }
        }
        Ok(Bindings { views, scalars })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::serial()
    }
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    fn dialect(&self) -> Dialect {
        match self.kind {
            BackendKind::OpenMp => Dialect::OpenMp,
            _ => Dialect::Serial,
        }
    }

    fn identity(&self) -> String {
        format!("{}:host", self.kind.name())
    }

    fn allocate(&mut self, bytes: usize, host_pinned: bool) -> Result<BufferHandle> {
        self.memory.write().allocate_buffer(bytes, host_pinned)
    }

    unsafe fn wrap(&mut self, ptr: *mut u8, bytes: usize) -> Result<BufferHandle> {
        self.memory.write().wrap_buffer(ptr, bytes)
    }

    fn free(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.write().free_buffer(handle)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.read().buffer_size(handle)
    }

    fn host_ptr(&self, handle: BufferHandle) -> Result<Option<*mut u8>> {
        // all CPU memory is host memory
        Ok(Some(self.memory.read().get(handle)?.as_ptr()))
    }

    fn write(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        offset: usize,
        data: &[u8],
        _mode: TransferMode,
    ) -> Result<()> {
        self.check_stream(stream)?;
        self.memory.write().copy_to_buffer(dst, offset, data)
    }

    fn read(&mut self, stream: StreamHandle, src: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_stream(stream)?;
        self.memory.read().copy_from_buffer(src, offset, out)
    }

    fn copy(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        bytes: usize,
        _mode: TransferMode,
    ) -> Result<()> {
        self.check_stream(stream)?;
        self.memory.write().copy_between(dst, dst_offset, src, src_offset, bytes)
    }

    fn create_stream(&mut self) -> Result<StreamHandle> {
        let handle = StreamHandle::new(self.next_stream_id);
        self.next_stream_id += 1;
        self.streams.insert(handle.id());
        Ok(handle)
    }

    fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()> {
        if self.streams.remove(&stream.id()) {
            Ok(())
        } else {
            Err(BackendError::InvalidStreamHandle(stream))
        }
    }

    fn finish(&mut self, stream: StreamHandle) -> Result<()> {
        self.check_stream(stream)
    }

    #[tracing::instrument(skip(self, request), fields(backend = %self.kind, entry = %request.entry))]
    fn compile(&mut self, request: &CompileRequest) -> Result<CompiledModule> {
        let threaded = self.threaded();
        let program = ProgramCache::global().get_or_compile(request, threaded, || {
            Program::compile(
                &request.source,
                &request.entry,
                &request.defines,
                request.launch,
                threaded,
            )
        })?;

        let handle = ModuleHandle::new(self.next_module_id);
        self.next_module_id += 1;
        let metadata = program.metadata().clone();
        tracing::debug!(
            module = %handle,
            params = metadata.params.len(),
            parallel_loops = program.parallel_loops(),
            "module_compiled"
        );
        self.modules.insert(handle.id(), program);
        Ok(CompiledModule { handle, metadata })
    }

    fn launch(
        &mut self,
        stream: StreamHandle,
        module: ModuleHandle,
        args: &[LaunchArg],
        config: Option<&LaunchConfig>,
    ) -> Result<()> {
        self.check_stream(stream)?;
        let program = Arc::clone(self.module(module)?);
        let name = program.name().to_string();

        if program.launch_model() == LaunchModel::Grid {
            let config = config.ok_or_else(|| BackendError::MissingLaunchConfig { kernel: name.clone() })?;
            config.validate().map_err(BackendError::InvalidLaunchConfig)?;
        }

        let memory = self.memory.read();
        let bindings = self.bind(&program, &memory, args)?;
        let _span = hetero_tracing::perf_span!("cpu_launch", kernel = name.as_str(), backend = self.kind.name());
        interp::run(&program, &bindings, config, self.threaded()).map_err(|fault| BackendError::Execution {
            kernel: name,
            message: fault.0,
        })
    }

    fn release_module(&mut self, module: ModuleHandle) -> Result<()> {
        self.modules
            .remove(&module.id())
            .map(|_| ())
            .ok_or(BackendError::InvalidModuleHandle(module))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
