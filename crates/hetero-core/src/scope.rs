//! Inline kernels from a captured scope
//!
//! A [`Scope`] names the values a kernel body refers to. The body is
//! wrapped into a complete `@kernel` whose parameters follow the binding
//! order:
//!
//! ```text
//! Scope::new().arg("entries", 5).arg("a", &a).arg("ab", &ab)
//!
//! @kernel void _hetero_inline_3f9c0d12aa84e711(const int entries, float *a, float *ab) {
//! <body>
//! }
//! ```
//!
//! The entry name is derived from the signature and the body, so identical
//! inputs synthesize identical source and hit the build cache.

use crate::cache::canonical_source;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::properties::Properties;
use crate::scalar::KernelArg;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const ENTRY_PREFIX: &str = "_hetero_inline_";
const INLINE_KERNEL: &str = "<inline>";

/// Synthesized source of an inline kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineKernel {
    pub entry: String,
    pub source: String,
}

/// Named kernel arguments plus build properties
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: Vec<(String, KernelArg)>,
    properties: Properties,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: Properties) -> Self {
        Self {
            bindings: Vec::new(),
            properties,
        }
    }

    /// Bind `name` to a scalar or memory; becomes the next parameter.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<KernelArg>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    /// Compile-time define, same as `defines/<name>` in the properties.
    pub fn define(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties = self.properties.define(name, value);
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn bindings(&self) -> &[(String, KernelArg)] {
        &self.bindings
    }

    /// The one device every memory binding lives on.
    pub fn device(&self) -> Result<Device> {
        let mut devices: Vec<&Device> = Vec::new();
        for memory in self.bindings.iter().filter_map(|(_, value)| value.as_memory()) {
            if !devices.iter().any(|d| d.same_device(memory.device())) {
                devices.push(memory.device());
            }
        }
        match devices.as_slice() {
            [] => Err(Error::NoDevice),
            [device] => Ok((*device).clone()),
            _ => Err(Error::AmbiguousDevice { devices: devices.len() }),
        }
    }

    /// Wrap `body` into a kernel whose parameters are the bindings.
    pub fn synthesize(&self, body: &str) -> Result<InlineKernel> {
        let mut seen = HashSet::new();
        let mut params = Vec::with_capacity(self.bindings.len());
        for (name, value) in &self.bindings {
            if !is_identifier(name) {
                return Err(Error::argument(INLINE_KERNEL, format!("`{name}` is not a valid identifier")));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::argument(INLINE_KERNEL, format!("`{name}` is bound twice")));
            }
            params.push(match value {
                KernelArg::Memory(memory) => format!("{} *{name}", memory.dtype().c_name()),
                KernelArg::Scalar(scalar) => format!("const {} {name}", scalar.kind().c_name()),
            });
        }

        let signature = params.join(", ");
        let body = canonical_source(body);
        let mut hasher = Sha256::new();
        hasher.update(signature.as_bytes());
        hasher.update(b"\n");
        hasher.update(body.as_bytes());
        let digest = hasher.finalize();
        let entry: String = std::iter::once(ENTRY_PREFIX.to_string())
            .chain(digest[..8].iter().map(|b| format!("{b:02x}")))
            .collect();

        let source = format!("@kernel void {entry}({signature}) {{\n{body}\n}}");
        Ok(InlineKernel { entry, source })
    }

    /// Synthesize and build on the bindings' device.
    pub fn build(&self, body: &str) -> Result<Kernel> {
        let device = self.device()?;
        let inline = self.synthesize(body)?;
        tracing::debug!(entry = %inline.entry, params = self.bindings.len(), "inline_kernel");
        device.build_kernel(&inline.source, &inline.entry, &self.properties)
    }

    /// Build and call once with the bound values.
    pub fn run(&self, body: &str) -> Result<Kernel> {
        let kernel = self.build(body)?;
        let args: Vec<KernelArg> = self.bindings.iter().map(|(_, value)| value.clone()).collect();
        kernel.call(&args)?;
        Ok(kernel)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
