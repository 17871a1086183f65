//! Types for backend configuration and handles

use hetero_lang::{KernelMetadata, LaunchModel, ScalarKind};
use std::fmt;

/// Handle to an allocated or wrapped buffer
///
/// Buffers are opaque handles managed by the backend.
/// Use Backend methods to interact with buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to a backend execution queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u64);

impl StreamHandle {
    pub const fn new(id: u64) -> Self {
        StreamHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Handle to a compiled, launchable kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleHandle(pub u64);

impl ModuleHandle {
    pub const fn new(id: u64) -> Self {
        ModuleHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module{}", self.0)
    }
}

/// Grid dimensions for kernel launch
///
/// Defines the 3D iteration space of blocks (the outer dimensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    /// Create new grid dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create 1D grid
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Get total number of blocks
    pub const fn total_blocks(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block dimensions
///
/// Defines the 3D arrangement of threads within a block (the inner dimensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDim {
    /// Create new block dimensions
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create 1D block
    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    /// Get total number of threads per block
    pub const fn total_threads(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch configuration for native kernels
///
/// Specifies the iteration space (grid × block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaunchConfig {
    /// Grid dimensions (number of blocks in each dimension)
    pub grid: GridDim,

    /// Block dimensions (number of threads per block in each dimension)
    pub block: BlockDim,
}

impl LaunchConfig {
    /// Create new launch configuration
    pub const fn new(grid: GridDim, block: BlockDim) -> Self {
        Self { grid, block }
    }

    /// Create simple 1D launch configuration
    pub const fn linear(total_elements: u32, block_size: u32) -> Self {
        let num_blocks = total_elements.div_ceil(block_size);
        Self {
            grid: GridDim::linear(num_blocks),
            block: BlockDim::linear(block_size),
        }
    }

    /// Total number of threads launched
    pub const fn total_threads(&self) -> u64 {
        self.grid.total_blocks() * self.block.total_threads()
    }

    /// Every dimension must be at least one.
    pub fn validate(&self) -> Result<(), String> {
        let dims = [
            self.grid.x,
            self.grid.y,
            self.grid.z,
            self.block.x,
            self.block.y,
            self.block.z,
        ];
        if dims.contains(&0) {
            return Err(format!("zero-sized dimension in {}", self));
        }
        Ok(())
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, block={}", self.grid, self.block)
    }
}

/// A scalar kernel argument, already converted to a kernel-visible type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    U8(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    pub const fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::U8(_) => ScalarKind::U8,
            ScalarValue::I32(_) => ScalarKind::I32,
            ScalarValue::U32(_) => ScalarKind::U32,
            ScalarValue::I64(_) => ScalarKind::I64,
            ScalarValue::U64(_) => ScalarKind::U64,
            ScalarValue::F32(_) => ScalarKind::F32,
            ScalarValue::F64(_) => ScalarKind::F64,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::U8(v) => write!(f, "{}", v),
            ScalarValue::I32(v) => write!(f, "{}", v),
            ScalarValue::U32(v) => write!(f, "{}", v),
            ScalarValue::I64(v) => write!(f, "{}", v),
            ScalarValue::U64(v) => write!(f, "{}", v),
            ScalarValue::F32(v) => write!(f, "{}", v),
            ScalarValue::F64(v) => write!(f, "{}", v),
        }
    }
}

/// One launch argument as the backend sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchArg {
    Buffer(BufferHandle),
    Scalar(ScalarValue),
}

/// Whether a host transfer returns before the data has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Blocking,
    /// Enqueued on the stream; complete after `finish` on that stream.
    Async,
}

/// Everything a backend needs to build one entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    /// Backend-native (dialect) source.
    pub source: String,
    pub entry: String,
    /// Macro definitions applied while compiling.
    pub defines: Vec<(String, String)>,
    /// Opaque flags for the backend compiler.
    pub compiler_flags: String,
    pub launch: LaunchModel,
}

impl CompileRequest {
    pub fn new(source: impl Into<String>, entry: impl Into<String>, launch: LaunchModel) -> Self {
        Self {
            source: source.into(),
            entry: entry.into(),
            defines: Vec::new(),
            compiler_flags: String::new(),
            launch,
        }
    }

    pub fn with_defines(mut self, defines: Vec<(String, String)>) -> Self {
        self.defines = defines;
        self
    }
}

/// A built entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModule {
    pub handle: ModuleHandle,
    pub metadata: KernelMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(BufferHandle::new(3).to_string(), "buf3");
        assert_eq!(StreamHandle::new(1).to_string(), "stream1");
        assert_eq!(ModuleHandle::new(7).to_string(), "module7");
    }

    #[test]
    fn test_linear_launch_config_rounds_up() {
        let config = LaunchConfig::linear(1000, 16);
        assert_eq!(config.grid, GridDim::linear(63));
        assert_eq!(config.block, BlockDim::linear(16));
        assert_eq!(config.total_threads(), 1008);
        assert_eq!(config.to_string(), "grid=(63, 1, 1), block=(16, 1, 1)");
    }

    #[test]
    fn test_launch_config_rejects_zero_dims() {
        let config = LaunchConfig::new(GridDim::new(4, 0, 1), BlockDim::default());
        assert!(config.validate().is_err());
        assert!(LaunchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_scalar_value_kind() {
        assert_eq!(ScalarValue::F32(1.0).kind(), ScalarKind::F32);
        assert_eq!(ScalarValue::U64(1).kind(), ScalarKind::U64);
    }
}
