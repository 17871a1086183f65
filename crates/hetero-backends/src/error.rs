//! Error types for backend operations

use crate::backend::{BufferHandle, ModuleHandle, StreamHandle};
use crate::kind::BackendKind;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by backend plug-ins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(BufferHandle),

    #[error("invalid stream handle: {0}")]
    InvalidStreamHandle(StreamHandle),

    #[error("invalid module handle: {0}")]
    InvalidModuleHandle(ModuleHandle),

    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// The factory for a backend could not produce a working instance.
    #[error("{kind} backend unavailable: {reason}")]
    Unavailable { kind: BackendKind, reason: String },

    #[error("allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },

    /// Kernel source rejected by the backend compiler.
    #[error("failed to compile '{entry}': {diagnostic}")]
    Compile { entry: String, diagnostic: String },

    /// Launch arguments do not fit the compiled signature.
    #[error("kernel '{kernel}': {message}")]
    Argument { kernel: String, message: String },

    #[error("kernel '{kernel}' requires launch dimensions")]
    MissingLaunchConfig { kernel: String },

    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// A kernel faulted while running.
    #[error("kernel '{kernel}' faulted: {message}")]
    Execution { kernel: String, message: String },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl BackendError {
    pub fn compile(entry: impl Into<String>, diagnostic: impl ToString) -> Self {
        Self::Compile {
            entry: entry.into(),
            diagnostic: diagnostic.to_string(),
        }
    }

    pub fn argument(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Argument {
            kernel: kernel.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }
}
