//! Kernel language front-end for the hetero runtime.
//!
//! Two kinds of source pass through this crate:
//!
//! - **portable kernels** (OKL): C decorated with `@kernel`, `@outer`,
//!   `@inner`, `@tile`, `@shared` and `@barrier`. [`translate`] validates
//!   them and lowers the attributed loop nests to a CPU [`Dialect`].
//! - **native kernels**: plain C entry points (optionally `extern "C"`,
//!   `__global__`) that a backend launches over an explicit grid using
//!   `threadIdx`/`blockIdx`/`blockDim`/`gridDim`.
//!
//! ```text
//!   source ──► lexer (defines) ──► parser ──► ast ──► translate ──► printer
//!                                              │
//!                                              └──► backends compile the dialect AST
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod translate;
pub mod types;

pub use error::{LangError, Location, Result};
pub use parser::{parse, parse_with_defines};
pub use translate::{kernel_metadata, translate, Translation};
pub use types::{Dialect, KernelMetadata, LaunchModel, ParamInfo, ParamType, ScalarKind};
