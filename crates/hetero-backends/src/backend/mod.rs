//! Backend trait and types for kernel execution

mod traits;
mod types;

pub use traits::Backend;
pub use types::{
    BlockDim, BufferHandle, CompileRequest, CompiledModule, GridDim, LaunchArg, LaunchConfig, ModuleHandle,
    ScalarValue, StreamHandle, TransferMode,
};
