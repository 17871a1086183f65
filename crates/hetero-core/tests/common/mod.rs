//! Shared fixtures: an asynchronous stand-in backend and an instrumented
//! translator.

#![allow(dead_code)]

use hetero_backends::{
    Backend, BackendError, BackendKind, BackendRegistry, BufferHandle, Capabilities, CompileRequest, CompiledModule,
    CpuBackend, LaunchArg, LaunchConfig, ModuleHandle, StreamHandle, TransferMode,
};
use hetero_core::{OklTranslator, TranslatedSource, TranslationRequest, Translator};
use hetero_lang::Dialect;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn kernel_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kernels").join(name)
}

pub fn init_tracing() {
    let _ = hetero_tracing::init_global_tracing(&hetero_tracing::TracingConfig::for_ci());
}

// ================================================================================================
// Deferred backend
// ================================================================================================

enum Op {
    Write {
        dst: BufferHandle,
        offset: usize,
        data: Vec<u8>,
    },
    Copy {
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        bytes: usize,
    },
    Launch {
        module: ModuleHandle,
        args: Vec<LaunchArg>,
        config: Option<LaunchConfig>,
    },
}

type Queues = Arc<Mutex<BTreeMap<StreamHandle, VecDeque<Op>>>>;

static NEXT_STREAM: AtomicU64 = AtomicU64::new(1);

/// Behaves like a GPU backend: launches and asynchronous copies are queued
/// per stream and only run when that stream is finished or read from.
pub struct DeferredBackend {
    cpu: CpuBackend,
    cpu_stream: StreamHandle,
    device_id: u32,
    queues: Queues,
}

impl DeferredBackend {
    fn new(queues: Queues, device_id: u32) -> hetero_backends::Result<Self> {
        let mut cpu = CpuBackend::serial();
        let cpu_stream = cpu.create_stream()?;
        Ok(Self {
            cpu,
            cpu_stream,
            device_id,
            queues,
        })
    }

    fn enqueue(&self, stream: StreamHandle, op: Op) -> hetero_backends::Result<()> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(&stream)
            .ok_or(BackendError::InvalidStreamHandle(stream))?;
        queue.push_back(op);
        Ok(())
    }

    /// Run everything queued on `stream`; the first failure is reported.
    fn drain(&mut self, stream: StreamHandle) -> hetero_backends::Result<()> {
        let ops = {
            let mut queues = self.queues.lock();
            let queue = queues
                .get_mut(&stream)
                .ok_or(BackendError::InvalidStreamHandle(stream))?;
            std::mem::take(queue)
        };
        let mut first_error = None;
        for op in ops {
            let result = match op {
                Op::Write { dst, offset, data } => {
                    self.cpu
                        .write(self.cpu_stream, dst, offset, &data, TransferMode::Blocking)
                }
                Op::Copy {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    bytes,
                } => self.cpu.copy(
                    self.cpu_stream,
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    bytes,
                    TransferMode::Blocking,
                ),
                Op::Launch { module, args, config } => {
                    self.cpu.launch(self.cpu_stream, module, &args, config.as_ref())
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Backend for DeferredBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn capabilities(&self) -> Capabilities {
        BackendKind::Cuda.capabilities()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Serial
    }

    fn identity(&self) -> String {
        format!("CUDA:deferred{}", self.device_id)
    }

    fn allocate(&mut self, bytes: usize, host_pinned: bool) -> hetero_backends::Result<BufferHandle> {
        self.cpu.allocate(bytes, host_pinned)
    }

    unsafe fn wrap(&mut self, ptr: *mut u8, bytes: usize) -> hetero_backends::Result<BufferHandle> {
        unsafe { self.cpu.wrap(ptr, bytes) }
    }

    fn free(&mut self, handle: BufferHandle) -> hetero_backends::Result<()> {
        self.cpu.free(handle)
    }

    fn buffer_size(&self, handle: BufferHandle) -> hetero_backends::Result<usize> {
        self.cpu.buffer_size(handle)
    }

    fn host_ptr(&self, handle: BufferHandle) -> hetero_backends::Result<Option<*mut u8>> {
        self.cpu.host_ptr(handle)
    }

    fn write(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        offset: usize,
        data: &[u8],
        mode: TransferMode,
    ) -> hetero_backends::Result<()> {
        match mode {
            TransferMode::Async => self.enqueue(
                stream,
                Op::Write {
                    dst,
                    offset,
                    data: data.to_vec(),
                },
            ),
            TransferMode::Blocking => {
                self.drain(stream)?;
                self.cpu
                    .write(self.cpu_stream, dst, offset, data, TransferMode::Blocking)
            }
        }
    }

    fn read(
        &mut self,
        stream: StreamHandle,
        src: BufferHandle,
        offset: usize,
        out: &mut [u8],
    ) -> hetero_backends::Result<()> {
        self.drain(stream)?;
        self.cpu.read(self.cpu_stream, src, offset, out)
    }

    fn copy(
        &mut self,
        stream: StreamHandle,
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        bytes: usize,
        mode: TransferMode,
    ) -> hetero_backends::Result<()> {
        let op = Op::Copy {
            dst,
            dst_offset,
            src,
            src_offset,
            bytes,
        };
        self.enqueue(stream, op)?;
        match mode {
            TransferMode::Async => Ok(()),
            TransferMode::Blocking => self.drain(stream),
        }
    }

    fn create_stream(&mut self) -> hetero_backends::Result<StreamHandle> {
        let stream = StreamHandle::new(NEXT_STREAM.fetch_add(1, Ordering::Relaxed));
        self.queues.lock().insert(stream, VecDeque::new());
        Ok(stream)
    }

    fn destroy_stream(&mut self, stream: StreamHandle) -> hetero_backends::Result<()> {
        self.queues
            .lock()
            .remove(&stream)
            .map(|_| ())
            .ok_or(BackendError::InvalidStreamHandle(stream))
    }

    fn finish(&mut self, stream: StreamHandle) -> hetero_backends::Result<()> {
        self.drain(stream)
    }

    fn compile(&mut self, request: &CompileRequest) -> hetero_backends::Result<CompiledModule> {
        self.cpu.compile(request)
    }

    fn launch(
        &mut self,
        stream: StreamHandle,
        module: ModuleHandle,
        args: &[LaunchArg],
        config: Option<&LaunchConfig>,
    ) -> hetero_backends::Result<()> {
        self.enqueue(
            stream,
            Op::Launch {
                module,
                args: args.to_vec(),
                config: config.copied(),
            },
        )
    }

    fn release_module(&mut self, module: ModuleHandle) -> hetero_backends::Result<()> {
        self.cpu.release_module(module)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Read-only view of the deferred backend's queues.
#[derive(Clone)]
pub struct QueueProbe(Queues);

impl QueueProbe {
    /// Operations queued on `stream` and not yet run.
    pub fn pending(&self, stream: StreamHandle) -> usize {
        self.0.lock().get(&stream).map_or(0, VecDeque::len)
    }
}

/// Built-in backends plus [`DeferredBackend`] registered as CUDA.
pub fn deferred_registry() -> (BackendRegistry, QueueProbe) {
    let queues: Queues = Arc::new(Mutex::new(BTreeMap::new()));
    let probe = QueueProbe(Arc::clone(&queues));
    let mut registry = BackendRegistry::with_defaults();
    registry.register(BackendKind::Cuda, move |selector| {
        let backend = DeferredBackend::new(Arc::clone(&queues), selector.device_id.unwrap_or(0))?;
        Ok(Box::new(backend) as Box<dyn Backend>)
    });
    (registry, probe)
}

// ================================================================================================
// Counting translator
// ================================================================================================

/// Delegates to [`OklTranslator`] and counts invocations.
#[derive(Default)]
pub struct CountingTranslator {
    calls: AtomicUsize,
}

impl CountingTranslator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for CountingTranslator {
    fn name(&self) -> &str {
        "counting"
    }

    fn translate(&self, request: &TranslationRequest<'_>) -> hetero_core::Result<TranslatedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        OklTranslator.translate(request)
    }
}
