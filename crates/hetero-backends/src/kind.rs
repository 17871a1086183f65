//! Backend kinds, their capability descriptors and fallback selection

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every backend the runtime knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    Serial,
    OpenMp,
    Cuda,
    Hip,
    OpenCl,
    Metal,
    Sycl,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::Serial,
        BackendKind::OpenMp,
        BackendKind::Cuda,
        BackendKind::Hip,
        BackendKind::OpenCl,
        BackendKind::Metal,
        BackendKind::Sycl,
    ];

    /// The backend every configuration falls back to.
    pub const FALLBACK: BackendKind = BackendKind::Serial;

    /// Canonical spelling used in mode descriptors.
    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::Serial => "Serial",
            BackendKind::OpenMp => "OpenMP",
            BackendKind::Cuda => "CUDA",
            BackendKind::Hip => "HIP",
            BackendKind::OpenCl => "OpenCL",
            BackendKind::Metal => "Metal",
            BackendKind::Sycl => "SYCL",
        }
    }

    /// Case-insensitive lookup of a backend name.
    pub fn from_name(name: &str) -> Option<BackendKind> {
        let name = name.trim();
        Self::ALL.into_iter().find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// What a conforming implementation of this kind can do.
    pub const fn capabilities(self) -> Capabilities {
        match self {
            BackendKind::Serial | BackendKind::OpenMp => Capabilities {
                streams: true,
                async_copy: false,
                pinned_memory: true,
                execution: ExecutionModel::Synchronous,
            },
            BackendKind::Cuda | BackendKind::Hip | BackendKind::OpenCl | BackendKind::Sycl => Capabilities {
                streams: true,
                async_copy: true,
                pinned_memory: true,
                execution: ExecutionModel::Asynchronous,
            },
            BackendKind::Metal => Capabilities {
                streams: true,
                async_copy: true,
                pinned_memory: false,
                execution: ExecutionModel::Asynchronous,
            },
        }
    }

    pub const fn is_cpu(self) -> bool {
        matches!(self, BackendKind::Serial | BackendKind::OpenMp)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When submitted work runs relative to the submitting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionModel {
    /// Work has completed by the time the call returns.
    Synchronous,
    /// Work is queued and completes at or before `finish`.
    Asynchronous,
}

/// Capability descriptor attached to each backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub streams: bool,
    pub async_copy: bool,
    pub pinned_memory: bool,
    pub execution: ExecutionModel,
}

impl Capabilities {
    pub const fn is_synchronous(&self) -> bool {
        matches!(self.execution, ExecutionModel::Synchronous)
    }
}

/// Choose the backend to bind.
///
/// The requested kind wins when available. Otherwise the fallback kind is
/// bound, and `None` means not even the fallback exists.
pub fn select_backend(requested: BackendKind, available: &[BackendKind]) -> Option<BackendKind> {
    if available.contains(&requested) {
        Some(requested)
    } else if available.contains(&BackendKind::FALLBACK) {
        Some(BackendKind::FALLBACK)
    } else {
        None
    }
}
