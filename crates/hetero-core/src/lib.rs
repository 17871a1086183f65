//! Heterogeneous compute runtime
//!
//! One API for memory, kernels and asynchronous work across interchangeable
//! backends. A [`Device`] binds a backend from a mode descriptor (falling
//! back to Serial when the requested one is unavailable) and is the factory
//! for everything else:
//!
//! ```text
//! Device::new("{mode: 'OpenMP'}")
//!   ├── allocate / allocate_from / wrap ─► Memory     (shared buffer handle)
//!   ├── build_kernel(source, entry, props) ─► Kernel  (cached per device)
//!   ├── create_stream / set_stream ─► Stream          (ordering domain)
//!   └── finish()                                      (drain current stream)
//!
//! Scope::new().arg(..).run(body)                      (inline kernels)
//! ```
//!
//! # Example
//!
//! ```rust
//! use hetero_core::{args, Device, Properties};
//!
//! # fn main() -> hetero_core::Result<()> {
//! let device = Device::new("OpenMP")?;
//! let x = device.allocate_from(&[1.0f64, 2.0, 3.0, 4.0], &Properties::new())?;
//!
//! let square = device.build_kernel(
//!     "@kernel void square(const int n, double *x) {
//!        for (int i = 0; i < n; ++i; @tile(2, @outer, @inner)) { x[i] = x[i] * x[i]; }
//!      }",
//!     "square",
//!     &Properties::new(),
//! )?;
//! square.call(&args![4, &x])?;
//! device.finish()?;
//!
//! assert_eq!(x.to_vec::<f64>()?, vec![1.0, 4.0, 9.0, 16.0]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod mode;
pub mod properties;
pub mod scalar;
pub mod scope;
pub mod stream;
pub mod translator;

pub use cache::CacheStats;
pub use config::RuntimeConfig;
pub use device::{Device, DeviceBuilder};
pub use error::{Error, Result};
pub use kernel::Kernel;
pub use memory::{CopyOptions, CopySource, CopyTarget, Memory};
pub use mode::ModeDescriptor;
pub use properties::Properties;
pub use scalar::{DeviceScalar, KernelArg};
pub use scope::{InlineKernel, Scope};
pub use stream::Stream;
pub use translator::{OklTranslator, TranslatedSource, TranslationRequest, Translator};

pub use hetero_backends::{
    BackendKind, BackendRegistry, BlockDim, Capabilities, ExecutionModel, GridDim, LaunchConfig, ScalarValue,
};
pub use hetero_lang::{Dialect, KernelMetadata, ScalarKind};
