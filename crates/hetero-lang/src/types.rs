//! Scalar and parameter types shared by the front-end, the backends and the
//! runtime's argument checking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of element and scalar types a kernel can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    /// `char` / `unsigned char`, stored as a byte
    U8,
    /// `int`
    I32,
    /// `unsigned int`
    U32,
    /// `long`
    I64,
    /// `unsigned long`
    U64,
    /// `float`
    F32,
    /// `double`
    F64,
}

impl ScalarKind {
    pub const fn size_in_bytes(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::U8 => 1,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    pub const fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, ScalarKind::I32 | ScalarKind::I64 | ScalarKind::F32 | ScalarKind::F64)
    }

    /// Integer conversion rank; floats rank above every integer.
    pub const fn rank(self) -> u8 {
        match self {
            ScalarKind::Bool => 0,
            ScalarKind::U8 => 1,
            ScalarKind::I32 => 2,
            ScalarKind::U32 => 3,
            ScalarKind::I64 => 4,
            ScalarKind::U64 => 5,
            ScalarKind::F32 => 6,
            ScalarKind::F64 => 7,
        }
    }

    /// C integer promotion: anything narrower than `int` becomes `int`.
    pub const fn promoted(self) -> ScalarKind {
        match self {
            ScalarKind::Bool | ScalarKind::U8 => ScalarKind::I32,
            other => other,
        }
    }

    /// Usual arithmetic conversions for a binary operator.
    pub fn common(a: ScalarKind, b: ScalarKind) -> ScalarKind {
        let (a, b) = (a.promoted(), b.promoted());
        if a.rank() >= b.rank() {
            a
        } else {
            b
        }
    }

    /// The C spelling used when printing declarations.
    pub const fn c_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::U8 => "unsigned char",
            ScalarKind::I32 => "int",
            ScalarKind::U32 => "unsigned int",
            ScalarKind::I64 => "long",
            ScalarKind::U64 => "unsigned long",
            ScalarKind::F32 => "float",
            ScalarKind::F64 => "double",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Declared type of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamType {
    pub scalar: ScalarKind,
    pub pointer: bool,
    pub is_const: bool,
}

impl ParamType {
    pub const fn scalar(scalar: ScalarKind) -> Self {
        Self {
            scalar,
            pointer: false,
            is_const: false,
        }
    }

    pub const fn pointer(scalar: ScalarKind) -> Self {
        Self {
            scalar,
            pointer: true,
            is_const: false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            f.write_str("const ")?;
        }
        f.write_str(self.scalar.c_name())?;
        if self.pointer {
            f.write_str(" *")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub ty: ParamType,
}

/// How a compiled kernel is driven at launch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchModel {
    /// Parallelism lives in the translated loop nest; launched once.
    Loops,
    /// Backend-native kernel executed once per thread of an explicit grid.
    Grid,
}

/// Backend-native source flavours the translator can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Sequential C.
    Serial,
    /// C with `#pragma omp parallel for` on outer loops.
    OpenMp,
}

impl Dialect {
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Serial => "serial",
            Dialect::OpenMp => "openmp",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the runtime needs to know about a kernel without re-parsing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub launch: LaunchModel,
}
