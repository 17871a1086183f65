//! Host element types and kernel arguments

use crate::memory::Memory;
use hetero_backends::ScalarValue;
use hetero_lang::ScalarKind;

/// A host type that can live in device memory or be passed by value
///
/// Implemented for the element types kernels can name: `u8`, `i32`, `u32`,
/// `i64`, `u64`, `f32` and `f64`.
pub trait DeviceScalar: bytemuck::Pod + Send + Sync + 'static {
    const KIND: ScalarKind;

    fn into_value(self) -> ScalarValue;
}

macro_rules! device_scalar {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl DeviceScalar for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                fn into_value(self) -> ScalarValue {
                    ScalarValue::$kind(self)
                }
            }

            impl From<$ty> for KernelArg {
                fn from(value: $ty) -> Self {
                    KernelArg::Scalar(ScalarValue::$kind(value))
                }
            }
        )+
    };
}

device_scalar! {
    u8 => U8,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// One argument of a kernel call: device memory or a scalar value
#[derive(Debug, Clone)]
pub enum KernelArg {
    Memory(Memory),
    Scalar(ScalarValue),
}

impl KernelArg {
    /// How the argument reads in a signature, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            KernelArg::Memory(memory) => format!("{} memory", memory.dtype()),
            KernelArg::Scalar(value) => format!("{} scalar", value.kind()),
        }
    }

    pub fn as_memory(&self) -> Option<&Memory> {
        match self {
            KernelArg::Memory(memory) => Some(memory),
            KernelArg::Scalar(_) => None,
        }
    }
}

impl From<bool> for KernelArg {
    fn from(value: bool) -> Self {
        KernelArg::Scalar(ScalarValue::Bool(value))
    }
}

impl From<usize> for KernelArg {
    fn from(value: usize) -> Self {
        KernelArg::Scalar(ScalarValue::U64(value as u64))
    }
}

impl From<ScalarValue> for KernelArg {
    fn from(value: ScalarValue) -> Self {
        KernelArg::Scalar(value)
    }
}

impl From<Memory> for KernelArg {
    fn from(memory: Memory) -> Self {
        KernelArg::Memory(memory)
    }
}

impl From<&Memory> for KernelArg {
    fn from(memory: &Memory) -> Self {
        KernelArg::Memory(memory.clone())
    }
}

/// Build a `[KernelArg; N]` from scalars and `&Memory`.
///
/// ```text
/// add_vectors.call(&args![entries, &o_a, &o_b, &o_ab])?;
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        [$($crate::KernelArg::from($arg)),*]
    };
}

/// Convert `value` to the declared scalar type of a parameter
///
/// Same-kind values pass through. Integers convert to any integer type
/// that can hold them and to floating point; floating point never
/// converts to an integer.
pub(crate) fn coerce(value: ScalarValue, target: ScalarKind) -> Result<ScalarValue, String> {
    if value.kind() == target {
        return Ok(value);
    }

    let integer = match value {
        ScalarValue::Bool(v) => Some(v as i128),
        ScalarValue::U8(v) => Some(v as i128),
        ScalarValue::I32(v) => Some(v as i128),
        ScalarValue::U32(v) => Some(v as i128),
        ScalarValue::I64(v) => Some(v as i128),
        ScalarValue::U64(v) => Some(v as i128),
        ScalarValue::F32(_) | ScalarValue::F64(_) => None,
    };
    let float = match value {
        ScalarValue::F32(v) => v as f64,
        ScalarValue::F64(v) => v,
        _ => integer.unwrap_or_default() as f64,
    };

    let out_of_range = || format!("{value} does not fit in {target}");
    match (target, integer) {
        (ScalarKind::F32, _) => Ok(ScalarValue::F32(float as f32)),
        (ScalarKind::F64, _) => Ok(ScalarValue::F64(float)),
        (_, None) => Err(format!("{} value {value} cannot be passed as {target}", value.kind())),
        (ScalarKind::Bool, Some(v)) => Ok(ScalarValue::Bool(v != 0)),
        (ScalarKind::U8, Some(v)) => u8::try_from(v).map(ScalarValue::U8).map_err(|_| out_of_range()),
        (ScalarKind::I32, Some(v)) => i32::try_from(v).map(ScalarValue::I32).map_err(|_| out_of_range()),
        (ScalarKind::U32, Some(v)) => u32::try_from(v).map(ScalarValue::U32).map_err(|_| out_of_range()),
        (ScalarKind::I64, Some(v)) => i64::try_from(v).map(ScalarValue::I64).map_err(|_| out_of_range()),
        (ScalarKind::U64, Some(v)) => u64::try_from(v).map(ScalarValue::U64).map_err(|_| out_of_range()),
    }
}
