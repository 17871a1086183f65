//! Backend plug-in layer for the hetero runtime.
//!
//! The runtime core drives devices exclusively through the [`Backend`]
//! trait. This crate defines that trait with its handle and launch types,
//! the closed set of [`BackendKind`]s with their capabilities and the pure
//! fallback rule, a [`BackendRegistry`] of factories, and the two built-in
//! CPU backends (Serial and OpenMP) which compile dialect source into a
//! resolved [`Program`] and interpret it.
//!
//! ```text
//!   BackendRegistry ──instantiate(kind)──► Box<dyn Backend>
//!                                             │
//!              ┌──────────────────────────────┼─────────────────────┐
//!              ▼                              ▼                     ▼
//!       CpuBackend::serial()          CpuBackend::openmp()    user plug-ins
//! ```

pub mod backend;
pub mod backends;
pub mod error;
pub mod kind;
pub mod program_cache;
pub mod registry;

pub use backend::{
    Backend, BlockDim, BufferHandle, CompileRequest, CompiledModule, GridDim, LaunchArg, LaunchConfig, ModuleHandle,
    ScalarValue, StreamHandle, TransferMode,
};
pub use backends::cpu::Program;
pub use backends::CpuBackend;
pub use error::{BackendError, Result};
pub use kind::{select_backend, BackendKind, Capabilities, ExecutionModel};
pub use registry::{BackendFactory, BackendRegistry, BoundBackend, DeviceSelector};
