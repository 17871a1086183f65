//! Device: one bound backend plus its streams, memory and kernels
//!
//! ## Architecture
//!
//! ```text
//! Device (Arc, cheap to clone)
//!   ├── backend        Box<dyn Backend> chosen from a BackendRegistry
//!   ├── current stream Arc<StreamInner>, replaced by set_stream
//!   ├── artifacts      ArtifactCache (+ optional DiskCache)
//!   └── translator     Arc<dyn Translator>
//! ```
//!
//! Memory, kernels and streams hold the device alive; the device is torn
//! down when the last of them is dropped. Teardown finishes every live
//! stream first.
//!
//! ## Fallback
//!
//! Binding never fails because a backend is missing: an unknown name, an
//! unregistered kind or a failing backend factory all bind Serial instead.
//! [`Device::fell_back`] reports when that happened.

use crate::cache::{ArtifactCache, CacheStats, DiskCache};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::kernel::{self, Kernel};
use crate::memory::Memory;
use crate::mode::ModeDescriptor;
use crate::properties::Properties;
use crate::scalar::DeviceScalar;
use crate::stream::{Stream, StreamInner};
use crate::translator::{OklTranslator, Translator};
use hetero_backends::{Backend, BackendError, BackendKind, BackendRegistry, Capabilities, StreamHandle};
use hetero_lang::{Dialect, ScalarKind};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct DeviceInner {
    id: u64,
    requested: ModeDescriptor,
    bound: BackendKind,
    capabilities: Capabilities,
    identity: String,
    dialect: Dialect,

    backend: Mutex<Box<dyn Backend>>,

    /// Pinned for the device's life
    initial_stream: Arc<StreamInner>,
    current: Mutex<Arc<StreamInner>>,
    streams: Mutex<BTreeSet<StreamHandle>>,
    /// Faults drained outside `finish`, reported by that stream's next finish
    deferred_faults: Mutex<BTreeMap<StreamHandle, BackendError>>,

    pub(crate) artifacts: ArtifactCache,
    pub(crate) disk_cache: Option<DiskCache>,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) verbose: bool,

    allocated: AtomicUsize,
}

impl DeviceInner {
    /// Finish and destroy a stream nobody references any more.
    pub(crate) fn retire_stream(&self, handle: StreamHandle) {
        let mut backend = self.backend.lock();
        if let Err(e) = backend.finish(handle) {
            tracing::warn!(device = self.id, stream = %handle, error = %e, "stream_finish_failed");
        }
        if let Some(e) = self.deferred_faults.lock().remove(&handle) {
            tracing::warn!(device = self.id, stream = %handle, error = %e, "stream_fault_dropped");
        }
        if let Err(e) = backend.destroy_stream(handle) {
            tracing::warn!(device = self.id, stream = %handle, error = %e, "stream_destroy_failed");
        }
        self.streams.lock().remove(&handle);
        tracing::debug!(device = self.id, stream = %handle, "stream_destroyed");
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        let backend = self.backend.get_mut();
        for handle in self.streams.get_mut().iter() {
            if let Err(e) = backend.finish(*handle) {
                tracing::warn!(device = self.id, stream = %handle, error = %e, "teardown_finish_failed");
            }
        }
        tracing::debug!(device = self.id, backend = %self.bound, "device_destroyed");
    }
}

/// Handle to a configured device
///
/// Cloning is shallow: every clone drives the same backend and shares the
/// same current stream.
///
/// # Example
///
/// ```rust
/// use hetero_core::{args, Device, Properties};
///
/// # fn main() -> hetero_core::Result<()> {
/// let device = Device::new("{mode: 'Serial'}")?;
/// let a = device.allocate_from(&[1.0f32, 2.0, 3.0], &Properties::new())?;
/// let b = device.allocate_from(&[4.0f32, 5.0, 6.0], &Properties::new())?;
/// let ab = device.allocate::<f32>(3, &Properties::new())?;
///
/// let add = device.build_kernel(
///     "@kernel void add(const int n, const float *a, const float *b, float *ab) {
///        for (int i = 0; i < n; ++i; @tile(16, @outer, @inner)) { ab[i] = a[i] + b[i]; }
///      }",
///     "add",
///     &Properties::new(),
/// )?;
/// add.call(&args![3, &a, &b, &ab])?;
///
/// assert_eq!(ab.to_vec::<f32>()?, vec![5.0, 7.0, 9.0]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<DeviceInner>,
}

impl Device {
    // ============================================================================================
    // Configuration
    // ============================================================================================

    /// Bind the backend named by `mode` using the built-in backends
    ///
    /// `mode` is a descriptor such as `{mode: 'CUDA', device_id: 0}` or a
    /// bare backend name.
    pub fn new(mode: &str) -> Result<Self> {
        DeviceBuilder::new().mode(mode).build()
    }

    /// Bind `mode` against a caller-supplied set of backends.
    pub fn with_registry(registry: BackendRegistry, mode: &str) -> Result<Self> {
        DeviceBuilder::new().registry(registry).mode(mode).build()
    }

    /// A Serial device.
    pub fn serial() -> Result<Self> {
        DeviceBuilder::new().descriptor(ModeDescriptor::for_kind(BackendKind::Serial)).build()
    }

    /// Configure from `HETERO_DEVICE`, `HETERO_CACHE_DIR` and `HETERO_VERBOSE`.
    pub fn from_env() -> Result<Self> {
        DeviceBuilder::from_config(&RuntimeConfig::from_env()).build()
    }

    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::new()
    }

    /// Process-unique id, used to detect cross-device use.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The backend actually bound.
    pub fn mode(&self) -> BackendKind {
        self.inner.bound
    }

    /// Canonical name of the bound backend, e.g. `"OpenMP"`.
    pub fn mode_name(&self) -> &'static str {
        self.inner.bound.name()
    }

    /// The descriptor this device was configured with.
    pub fn requested_mode(&self) -> &ModeDescriptor {
        &self.inner.requested
    }

    /// Whether the bound backend differs from the requested one.
    pub fn fell_back(&self) -> bool {
        self.inner.requested.kind() != Some(self.inner.bound)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    /// Backend and physical device description; part of build cache keys.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    /// Every key of the mode descriptor.
    pub fn properties(&self) -> &Properties {
        self.inner.requested.properties()
    }

    // ============================================================================================
    // Memory
    // ============================================================================================

    /// Allocate `count` elements of `T`
    ///
    /// `options` may set `host: true` for host-pinned memory.
    #[tracing::instrument(skip(self, options), fields(device = self.inner.id))]
    pub fn allocate<T: DeviceScalar>(&self, count: usize, options: &Properties) -> Result<Memory> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::Backend(BackendError::AllocationFailed { bytes: usize::MAX }))?;
        self.allocate_bytes(bytes, T::KIND, options.host())
    }

    /// Allocate and synchronously fill with `data`.
    pub fn allocate_from<T: DeviceScalar>(&self, data: &[T], options: &Properties) -> Result<Memory> {
        let memory = self.allocate::<T>(data.len(), options)?;
        memory.copy_from_slice(data)?;
        Ok(memory)
    }

    /// Wrap caller-owned storage of `count` elements
    ///
    /// The returned memory is not owned: dropping it never frees `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `count` elements for as
    /// long as the returned [`Memory`] or any clone of it is alive, and must
    /// be addressable by the bound backend (a host pointer for CPU backends).
    pub unsafe fn wrap<T: DeviceScalar>(&self, ptr: *mut T, count: usize) -> Result<Memory> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::Backend(BackendError::AllocationFailed { bytes: usize::MAX }))?;
        // SAFETY: forwarded from this function's contract
        let handle = unsafe { self.backend().wrap(ptr.cast::<u8>(), bytes)? };
        tracing::debug!(device = self.inner.id, buffer = %handle, bytes, "memory_wrapped");
        Ok(Memory::new(self.clone(), handle, bytes, T::KIND, false, false))
    }

    pub(crate) fn allocate_bytes(&self, bytes: usize, dtype: ScalarKind, host: bool) -> Result<Memory> {
        let pinned = if host && !self.inner.capabilities.pinned_memory {
            tracing::warn!(backend = %self.inner.bound, "pinned_memory_unsupported");
            false
        } else {
            host
        };
        let handle = self.backend().allocate(bytes, pinned)?;
        self.inner.allocated.fetch_add(bytes, Ordering::Relaxed);
        hetero_tracing::performance::record_allocation(bytes, self.inner.bound.name(), pinned);
        Ok(Memory::new(self.clone(), handle, bytes, dtype, true, pinned))
    }

    pub(crate) fn release_buffer(&self, memory: &crate::memory::MemoryInner) {
        let mut backend = self.backend();
        if !self.inner.capabilities.is_synchronous() {
            // queued work may still reference the buffer
            let mut faults = self.inner.deferred_faults.lock();
            for handle in self.inner.streams.lock().iter() {
                if let Err(e) = backend.finish(*handle) {
                    tracing::debug!(device = self.inner.id, stream = %handle, error = %e, "stream_fault_deferred");
                    faults.entry(*handle).or_insert(e);
                }
            }
        }
        if let Err(e) = backend.free(memory.handle) {
            tracing::warn!(device = self.inner.id, buffer = %memory.handle, error = %e, "memory_free_failed");
            return;
        }
        if memory.owned {
            self.inner.allocated.fetch_sub(memory.bytes, Ordering::Relaxed);
        }
        tracing::trace!(device = self.inner.id, buffer = %memory.handle, owned = memory.owned, "memory_released");
    }

    /// Bytes held by live owned allocations.
    pub fn memory_allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Build `entry` from `source`, reusing a cached artifact when possible
    ///
    /// Recognized properties: `defines/NAME`, `compiler_flags`, and
    /// `okl/enabled` (`false` for backend-native source).
    pub fn build_kernel(&self, source: &str, entry: &str, properties: &Properties) -> Result<Kernel> {
        kernel::build(self, source, entry, properties)
    }

    /// [`Device::build_kernel`] with source read from `path`.
    pub fn build_kernel_from_file(&self, path: impl AsRef<Path>, entry: &str, properties: &Properties) -> Result<Kernel> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.build_kernel(&source, entry, properties)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.artifacts.stats()
    }

    // ============================================================================================
    // Streams
    // ============================================================================================

    /// The current stream.
    pub fn stream(&self) -> Stream {
        Stream::from_inner(Arc::clone(&self.inner.current.lock()))
    }

    /// The stream the device was created with.
    pub fn initial_stream(&self) -> Stream {
        Stream::from_inner(Arc::clone(&self.inner.initial_stream))
    }

    pub fn create_stream(&self) -> Result<Stream> {
        let handle = self.backend().create_stream()?;
        self.inner.streams.lock().insert(handle);
        tracing::debug!(device = self.inner.id, stream = %handle, "stream_created");
        Ok(Stream::from_inner(Arc::new(StreamInner {
            handle,
            device_id: self.inner.id,
            device: Arc::downgrade(&self.inner),
        })))
    }

    /// Make `stream` current for every later launch and copy.
    pub fn set_stream(&self, stream: &Stream) -> Result<()> {
        self.check_stream(stream)?;
        let previous = std::mem::replace(&mut *self.inner.current.lock(), Arc::clone(&stream.inner));
        tracing::debug!(device = self.inner.id, from = %previous.handle, to = %stream.handle(), "stream_selected");
        drop(previous);
        Ok(())
    }

    /// Block until the current stream has drained
    ///
    /// Other streams are not waited for. Failures of asynchronous work
    /// queued on the current stream are reported here.
    #[tracing::instrument(skip(self), fields(device = self.inner.id))]
    pub fn finish(&self) -> Result<()> {
        let stream = self.current_stream_handle();
        let start = std::time::Instant::now();
        self.drain_stream(stream)?;
        hetero_tracing::perf_event!(
            "device_finish",
            stream = stream.0,
            duration_us = start.elapsed().as_micros() as u64,
        );
        Ok(())
    }

    /// Finish every live stream; reports the first failure after trying all.
    pub fn finish_all(&self) -> Result<()> {
        let handles: Vec<StreamHandle> = self.inner.streams.lock().iter().copied().collect();
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = self.drain_stream(handle) {
                tracing::warn!(device = self.inner.id, stream = %handle, error = %e, "stream_finish_failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Number of live streams, the initial one included.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.lock().len()
    }

    // ============================================================================================
    // Internals
    // ============================================================================================

    pub(crate) fn backend(&self) -> MutexGuard<'_, Box<dyn Backend>> {
        self.inner.backend.lock()
    }

    /// Finish `handle`; a fault kept from an earlier drain wins over a new one.
    fn drain_stream(&self, handle: StreamHandle) -> std::result::Result<(), BackendError> {
        let mut backend = self.backend();
        let result = backend.finish(handle);
        match self.inner.deferred_faults.lock().remove(&handle) {
            Some(fault) => {
                if let Err(e) = result {
                    tracing::warn!(device = self.inner.id, stream = %handle, error = %e, "stream_finish_failed");
                }
                Err(fault)
            }
            None => result,
        }
    }

    pub(crate) fn current_stream_handle(&self) -> StreamHandle {
        self.inner.current.lock().handle
    }

    pub(crate) fn check_stream(&self, stream: &Stream) -> Result<()> {
        if stream.device_id() == self.inner.id {
            Ok(())
        } else {
            Err(Error::CrossDevice(format!(
                "{} belongs to device {}, not device {}",
                stream.handle(),
                stream.device_id(),
                self.inner.id
            )))
        }
    }

    /// Whether `self` and `other` are the same device.
    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.same_device(other)
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("requested", &self.inner.requested.mode())
            .field("bound", &self.inner.bound)
            .field("identity", &self.inner.identity)
            .finish_non_exhaustive()
    }
}

/// Configures a [`Device`] beyond its mode descriptor
///
/// ```rust
/// use hetero_core::{BackendKind, Device};
///
/// # fn main() -> hetero_core::Result<()> {
/// let device = Device::builder().mode("{mode: 'CUDA', device_id: 0}").build()?;
/// // no CUDA backend is registered, so the device falls back
/// assert_eq!(device.mode(), BackendKind::Serial);
/// assert!(device.fell_back());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceBuilder {
    mode: Option<String>,
    descriptor: Option<ModeDescriptor>,
    registry: BackendRegistry,
    translator: Arc<dyn Translator>,
    cache_dir: Option<PathBuf>,
    verbose: bool,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self {
            mode: None,
            descriptor: None,
            registry: BackendRegistry::with_defaults(),
            translator: Arc::new(OklTranslator),
            cache_dir: None,
            verbose: false,
        }
    }

    /// Start from process-level settings.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut builder = Self::new().mode(config.mode()).verbose(config.verbose);
        builder.cache_dir = config.cache_dir.clone();
        builder
    }

    /// Mode descriptor text, parsed by [`DeviceBuilder::build`].
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self.descriptor = None;
        self
    }

    pub fn descriptor(mut self, descriptor: ModeDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self.mode = None;
        self
    }

    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Persist translations under `dir`.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Parse the descriptor and bind a backend, falling back to Serial.
    #[tracing::instrument(skip(self))]
    pub fn build(self) -> Result<Device> {
        let start = std::time::Instant::now();
        let requested = match (self.descriptor, self.mode) {
            (Some(descriptor), _) => descriptor,
            (None, Some(mode)) => ModeDescriptor::parse(&mode)?,
            (None, None) => ModeDescriptor::default(),
        };

        let kind = match requested.kind() {
            Some(kind) => kind,
            None => {
                tracing::warn!(mode = requested.mode(), "unknown_backend");
                BackendKind::FALLBACK
            }
        };
        let bound = self
            .registry
            .instantiate(kind, &requested.selector())
            .map_err(|e| Error::Configuration(format!("cannot bind `{requested}`: {e}")))?;

        let mut backend = bound.backend;
        let initial = backend
            .create_stream()
            .map_err(|e| Error::Configuration(format!("cannot create initial stream: {e}")))?;

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let capabilities = backend.capabilities();
        let identity = backend.identity();
        let dialect = backend.dialect();
        let inner = Arc::new_cyclic(|weak| {
            let stream = Arc::new(StreamInner {
                handle: initial,
                device_id: id,
                device: weak.clone(),
            });
            DeviceInner {
                id,
                requested,
                bound: bound.bound,
                capabilities,
                identity,
                dialect,
                backend: Mutex::new(backend),
                initial_stream: Arc::clone(&stream),
                current: Mutex::new(stream),
                streams: Mutex::new(BTreeSet::from([initial])),
                deferred_faults: Mutex::new(BTreeMap::new()),
                artifacts: ArtifactCache::new(),
                disk_cache: self.cache_dir.map(DiskCache::new),
                translator: self.translator,
                verbose: self.verbose,
                allocated: AtomicUsize::new(0),
            }
        });

        let device = Device { inner };
        tracing::debug!(
            device = device.id(),
            requested = device.requested_mode().mode(),
            bound = device.mode_name(),
            fell_back = device.fell_back(),
            duration_us = start.elapsed().as_micros() as u64,
            "device_created"
        );
        Ok(device)
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuilder")
            .field("mode", &self.mode)
            .field("descriptor", &self.descriptor)
            .field("registry", &self.registry)
            .field("translator", &self.translator.name())
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}
