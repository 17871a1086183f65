//! Kernel build pipeline and launch
//!
//! ```text
//! build(source, entry, props)
//!   │ canonical source + entry + props + backend identity ──► ArtifactKey
//!   ├── hit ──────────────────────────────────────────────► Kernel
//!   └── miss
//!        ├── okl/enabled  ─► disk cache ─or─ Translator ─► backend.compile
//!        └── native       ─────────────────────────────► backend.compile
//!                                                          │
//!                                               ArtifactCache::insert ─► Kernel
//! ```
//!
//! A kernel call checks arity and argument types against the entry point's
//! parameter list before anything reaches the backend, then enqueues one
//! launch into the device's current stream.

use crate::cache::{canonical_source, Artifact, ArtifactKey};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::scalar::{coerce, KernelArg};
use crate::stream::Stream;
use crate::translator::{TranslatedSource, TranslationRequest};
use hetero_backends::{BackendError, BlockDim, CompileRequest, GridDim, LaunchArg, LaunchConfig, StreamHandle};
use hetero_lang::{KernelMetadata, LaunchModel};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

struct KernelInner {
    device: Device,
    artifact: Arc<Artifact>,
    run_dims: RwLock<Option<LaunchConfig>>,
}

/// A compiled entry point bound to one device
///
/// Clones share run dimensions; separate builds of the same source share
/// the compiled artifact but not the run dimensions.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    fn new(device: Device, artifact: Arc<Artifact>) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                device,
                artifact,
                run_dims: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.artifact.metadata.name
    }

    pub fn metadata(&self) -> &KernelMetadata {
        &self.inner.artifact.metadata
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Built from backend-native source.
    pub fn is_native(&self) -> bool {
        self.inner.artifact.native
    }

    /// Launch geometry for native kernels. Translated kernels ignore it.
    pub fn set_run_dims(&self, grid: GridDim, block: BlockDim) -> Result<()> {
        let config = LaunchConfig::new(grid, block);
        config
            .validate()
            .map_err(|message| Error::Backend(BackendError::InvalidLaunchConfig(message)))?;
        *self.inner.run_dims.write() = Some(config);
        Ok(())
    }

    pub fn run_dims(&self) -> Option<LaunchConfig> {
        *self.inner.run_dims.read()
    }

    /// Enqueue one launch into the device's current stream.
    pub fn call(&self, args: &[KernelArg]) -> Result<()> {
        let stream = self.inner.device.current_stream_handle();
        self.launch(stream, args)
    }

    /// Enqueue one launch into `stream`.
    pub fn launch_on(&self, stream: &Stream, args: &[KernelArg]) -> Result<()> {
        self.inner.device.check_stream(stream)?;
        self.launch(stream.handle(), args)
    }

    #[tracing::instrument(skip(self, args), fields(kernel = self.name(), stream = %stream))]
    fn launch(&self, stream: StreamHandle, args: &[KernelArg]) -> Result<()> {
        let bound = self.bind(args)?;
        let config = self.run_dims();
        if self.metadata().launch == LaunchModel::Grid && config.is_none() {
            return Err(Error::LaunchConfiguration {
                kernel: self.name().to_string(),
            });
        }

        let device = &self.inner.device;
        let synchronous = device.capabilities().is_synchronous();
        {
            let mut backend = device.backend();
            backend
                .launch(stream, self.inner.artifact.module, &bound, config.as_ref())
                .map_err(Error::from_launch)?;
            if synchronous {
                backend.finish(stream)?;
            }
        }

        hetero_tracing::performance::record_launch(self.name(), stream.id(), args.len(), synchronous);
        Ok(())
    }

    fn bind(&self, args: &[KernelArg]) -> Result<Vec<LaunchArg>> {
        let metadata = self.metadata();
        if args.len() != metadata.params.len() {
            return Err(Error::argument(
                self.name(),
                format!("expected {} arguments, got {}", metadata.params.len(), args.len()),
            ));
        }

        metadata
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| match (param.ty.pointer, arg) {
                (true, KernelArg::Memory(memory)) => {
                    if !memory.device().same_device(&self.inner.device) {
                        return Err(Error::CrossDevice(format!(
                            "argument '{}' of '{}' is memory of device {}, kernel is on device {}",
                            param.name,
                            self.name(),
                            memory.device().id(),
                            self.inner.device.id()
                        )));
                    }
                    if memory.dtype() != param.ty.scalar {
                        return Err(Error::argument(
                            self.name(),
                            format!("argument '{}' expects `{}`, got {}", param.name, param.ty, arg.describe()),
                        ));
                    }
                    Ok(LaunchArg::Buffer(memory.handle()))
                }
                (false, KernelArg::Scalar(value)) => coerce(*value, param.ty.scalar)
                    .map(LaunchArg::Scalar)
                    .map_err(|message| Error::argument(self.name(), format!("argument '{}': {message}", param.name))),
                _ => Err(Error::argument(
                    self.name(),
                    format!("argument '{}' expects `{}`, got {}", param.name, param.ty, arg.describe()),
                )),
            })
            .collect()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("device", &self.inner.device.id())
            .field("key", &self.inner.artifact.key)
            .field("native", &self.inner.artifact.native)
            .field("run_dims", &self.run_dims())
            .finish()
    }
}

// ================================================================================================
// Build
// ================================================================================================

#[tracing::instrument(skip(device, source, properties), fields(device = device.id(), backend = device.mode_name()))]
pub(crate) fn build(device: &Device, source: &str, entry: &str, properties: &Properties) -> Result<Kernel> {
    let start = Instant::now();
    let canonical = canonical_source(source);
    let key = ArtifactKey::new(&canonical, entry, properties, device.identity());

    if let Some(artifact) = device.inner.artifacts.lookup(&key) {
        hetero_tracing::performance::record_kernel_build(entry, true, start.elapsed().as_micros() as u64);
        return Ok(Kernel::new(device.clone(), artifact));
    }

    let native = !properties.okl_enabled();
    let (request, metadata) = if native {
        let request = CompileRequest::new(canonical, entry, LaunchModel::Grid).with_defines(properties.defines());
        (request, None)
    } else {
        let translated = translate(device, &key, &canonical, entry, properties)?;
        let request = CompileRequest::new(translated.source, entry, translated.metadata.launch);
        (request, Some(translated.metadata))
    };
    let request = CompileRequest {
        compiler_flags: properties.compiler_flags(),
        ..request
    };

    let compiled = device.backend().compile(&request).map_err(|e| match e {
        BackendError::Compile { diagnostic, .. } => Error::build(entry, diagnostic),
        other => Error::build(entry, other),
    })?;
    let module = compiled.handle;

    let artifact = device.inner.artifacts.insert(Artifact {
        key,
        module,
        metadata: metadata.unwrap_or(compiled.metadata),
        native,
    });
    if artifact.module != module {
        // lost a concurrent build of the same key
        if let Err(e) = device.backend().release_module(module) {
            tracing::warn!(entry, module = %module, error = %e, "module_release_failed");
        }
    }

    let duration_us = start.elapsed().as_micros() as u64;
    if device.inner.verbose {
        tracing::info!(entry, key = %key, native, duration_us, "kernel_built");
    } else {
        tracing::debug!(entry, key = %key, native, duration_us, "kernel_built");
    }
    hetero_tracing::performance::record_kernel_build(entry, false, duration_us);
    Ok(Kernel::new(device.clone(), artifact))
}

fn translate(
    device: &Device,
    key: &ArtifactKey,
    canonical: &str,
    entry: &str,
    properties: &Properties,
) -> Result<TranslatedSource> {
    let inner = &device.inner;
    if let Some(translated) = inner.disk_cache.as_ref().and_then(|disk| disk.load(key)) {
        inner.artifacts.record_disk_hit();
        tracing::debug!(entry, key = %key, "disk_cache_hit");
        return Ok(translated);
    }

    let defines = properties.defines();
    let request = TranslationRequest {
        source: canonical,
        entry,
        dialect: device.dialect(),
        defines: &defines,
        properties,
    };
    let translated = inner.translator.translate(&request)?;
    inner.artifacts.record_translation();
    tracing::debug!(entry, translator = inner.translator.name(), "kernel_translated");

    if let Some(disk) = &inner.disk_cache {
        if let Err(e) = disk.store(key, &translated) {
            tracing::warn!(entry, error = %e, "disk_cache_store_failed");
        }
    }
    Ok(translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use hetero_lang::ScalarKind;

    const ADD: &str = "@kernel void addVectors(const int entries, const float *a, const float *b, float *ab) {
  for (int i = 0; i < entries; ++i; @tile(16, @outer, @inner)) {
    ab[i] = a[i] + b[i];
  }
}";

    const NATIVE_SCALE: &str = "extern \"C\" __global__ void scale(const int n, const float s, float *x) {
  int i = threadIdx.x + blockIdx.x * blockDim.x;
  if (i < n) {
    x[i] = s * x[i];
  }
}";

    fn props() -> Properties {
        Properties::new()
    }

    #[test]
    fn test_build_and_call() {
        let device = Device::serial().unwrap();
        let a = device.allocate_from(&[1.0f32, 2.0, 3.0], &props()).unwrap();
        let b = device.allocate_from(&[10.0f32, 20.0, 30.0], &props()).unwrap();
        let ab = device.allocate::<f32>(3, &props()).unwrap();

        let kernel = device.build_kernel(ADD, "addVectors", &props()).unwrap();
        assert_eq!(kernel.name(), "addVectors");
        assert!(!kernel.is_native());
        assert_eq!(kernel.metadata().params[1].ty.scalar, ScalarKind::F32);

        kernel.call(&args![3, &a, &b, &ab]).unwrap();
        assert_eq!(ab.to_vec::<f32>().unwrap(), vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn test_repeated_build_hits_cache() {
        let device = Device::serial().unwrap();
        let first = device.build_kernel(ADD, "addVectors", &props()).unwrap();
        // trailing whitespace and CRLF do not change the identity
        let noisy = format!("\r\n{}   \r\n\r\n", ADD.replace('\n', "\r\n"));
        let second = device.build_kernel(&noisy, "addVectors", &props()).unwrap();
        assert_eq!(first.inner.artifact.key, second.inner.artifact.key);

        let stats = device.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.translations, stats.entries), (1, 1, 1, 1));

        device
            .build_kernel(ADD, "addVectors", &props().define("UNUSED", 1))
            .unwrap();
        assert_eq!(device.cache_stats().entries, 2);
    }

    #[test]
    fn test_argument_checks_happen_before_launch() {
        let device = Device::serial().unwrap();
        let kernel = device.build_kernel(ADD, "addVectors", &props()).unwrap();
        let floats = device.allocate::<f32>(4, &props()).unwrap();
        let doubles = device.allocate::<f64>(4, &props()).unwrap();

        let err = kernel.call(&args![4, &floats, &floats]).unwrap_err();
        assert!(matches!(err, Error::Argument { ref message, .. } if message == "expected 4 arguments, got 3"), "{err}");

        let err = kernel.call(&args![4, &floats, &doubles, &floats]).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }), "{err}");

        let err = kernel.call(&args![&floats, &floats, &floats, &floats]).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }), "{err}");

        let err = kernel.call(&args![4.5f64, &floats, &floats, &floats]).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }), "{err}");

        let other = Device::serial().unwrap().allocate::<f32>(4, &props()).unwrap();
        let err = kernel.call(&args![4, &floats, &other, &floats]).unwrap_err();
        assert!(matches!(err, Error::CrossDevice(_)), "{err}");
    }

    #[test]
    fn test_native_kernel_needs_run_dims_at_call_time() {
        let device = Device::serial().unwrap();
        let native = props().with("okl/enabled", false);
        let kernel = device.build_kernel(NATIVE_SCALE, "scale", &native).unwrap();
        assert!(kernel.is_native());

        let x = device.allocate_from(&[1.0f32, 2.0, 3.0, 4.0, 5.0], &props()).unwrap();
        let err = kernel.call(&args![5, 2.0f32, &x]).unwrap_err();
        assert!(matches!(err, Error::LaunchConfiguration { ref kernel } if kernel == "scale"), "{err}");

        kernel.set_run_dims(GridDim::linear(2), BlockDim::linear(4)).unwrap();
        kernel.call(&args![5, 2.0f32, &x]).unwrap();
        assert_eq!(x.to_vec::<f32>().unwrap(), vec![2.0, 4.0, 6.0, 8.0, 10.0]);

        assert!(kernel.set_run_dims(GridDim::linear(0), BlockDim::linear(4)).is_err());
    }

    #[test]
    fn test_build_failures_are_reported() {
        let device = Device::serial().unwrap();
        let err = device.build_kernel(ADD, "missing", &props()).unwrap_err();
        assert!(matches!(err, Error::Build { ref entry, .. } if entry == "missing"), "{err}");

        let broken = "@kernel void k(float *x) { for (int i = 0; i < 4; ++i; @outer) { x[i] = ; } }";
        assert!(matches!(device.build_kernel(broken, "k", &props()), Err(Error::Build { .. })));
        assert_eq!(device.cache_stats().entries, 0);
    }

    #[test]
    fn test_launch_on_foreign_stream_is_rejected() {
        let device = Device::serial().unwrap();
        let kernel = device.build_kernel(ADD, "addVectors", &props()).unwrap();
        let foreign = Device::serial().unwrap().create_stream().unwrap();
        let x = device.allocate::<f32>(1, &props()).unwrap();
        let err = kernel.launch_on(&foreign, &args![1, &x, &x, &x]).unwrap_err();
        assert!(matches!(err, Error::CrossDevice(_)));
    }
}
