//! Error types for hetero-core operations

use hetero_backends::BackendError;
use std::path::PathBuf;

/// Result type for hetero-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the runtime
///
/// Every error is reported to the operation that caused it; nothing is
/// retried. Failures of queued asynchronous work arrive as [`Error::Backend`]
/// from the next `finish` on the stream that ran it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed mode descriptor, or no backend could be bound at all
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Byte range outside a buffer
    #[error("range error: {bytes} bytes at offset {offset} exceed buffer of {size} bytes")]
    Range { offset: usize, bytes: usize, size: usize },

    /// Memory, stream or kernel used with a device it does not belong to
    #[error("cross-device error: {0}")]
    CrossDevice(String),

    /// Kernel call does not match the entry point's parameter list
    #[error("argument error in '{kernel}': {message}")]
    Argument { kernel: String, message: String },

    /// Native kernel called before `set_run_dims`
    #[error("launch configuration error: '{kernel}' is a native kernel and needs run dimensions")]
    LaunchConfiguration { kernel: String },

    /// Translation or backend compilation failed
    #[error("build error in '{entry}': {diagnostic}")]
    Build { entry: String, diagnostic: String },

    /// Scope binds memory from more than one device
    #[error("ambiguous device: scope binds memory from {devices} different devices")]
    AmbiguousDevice { devices: usize },

    /// Scope has no memory binding to infer a device from
    #[error("no device: scope has no memory binding")]
    NoDevice,

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Descriptor or property text that does not parse
    #[error("properties error: {0}")]
    Properties(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn argument(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Argument {
            kernel: kernel.into(),
            message: message.into(),
        }
    }

    pub(crate) fn build(entry: impl Into<String>, diagnostic: impl ToString) -> Self {
        Error::Build {
            entry: entry.into(),
            diagnostic: diagnostic.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Fold launch-time backend errors into the runtime taxonomy.
    pub(crate) fn from_launch(error: BackendError) -> Self {
        match error {
            BackendError::Argument { kernel, message } => Error::Argument { kernel, message },
            BackendError::MissingLaunchConfig { kernel } => Error::LaunchConfiguration { kernel },
            other => Error::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_errors_map_to_taxonomy() {
        let err = Error::from_launch(BackendError::MissingLaunchConfig {
            kernel: "addVectors".to_string(),
        });
        assert!(matches!(err, Error::LaunchConfiguration { ref kernel } if kernel == "addVectors"));

        let err = Error::from_launch(BackendError::argument("k", "expected 2 arguments, got 1"));
        assert!(matches!(err, Error::Argument { .. }));

        let err = Error::from_launch(BackendError::unsupported("nope"));
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    fn test_range_message() {
        let err = Error::Range {
            offset: 8,
            bytes: 16,
            size: 12,
        };
        assert_eq!(
            err.to_string(),
            "range error: 16 bytes at offset 8 exceed buffer of 12 bytes"
        );
    }
}
