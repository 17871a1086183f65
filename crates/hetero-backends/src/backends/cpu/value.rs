//! Runtime values of the CPU kernel interpreter and their C arithmetic.

use crate::backend::ScalarValue;
use hetero_lang::ast::{BinaryOp, UnaryOp};
use hetero_lang::ScalarKind;

/// Where a pointer points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// The buffer bound to parameter `n`.
    Param(u16),
    /// Local array `n` of the current frame.
    Local(u32),
}

/// A typed element pointer; the element type is known statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pointer {
    pub region: Region,
    /// Offset in elements.
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Bool(bool),
    U8(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(Pointer),
}

/// A fault raised while evaluating; the caller attaches the kernel name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fault(pub String);

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Fault(message.into())
    }
}

macro_rules! int_arith {
    ($op:expr, $a:expr, $b:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Ok(match $op {
            BinaryOp::Add => Value::$variant(a.wrapping_add(b)),
            BinaryOp::Sub => Value::$variant(a.wrapping_sub(b)),
            BinaryOp::Mul => Value::$variant(a.wrapping_mul(b)),
            BinaryOp::Div => Value::$variant(a.checked_div(b).ok_or_else(|| div_fault(b == 0))?),
            BinaryOp::Rem => Value::$variant(a.checked_rem(b).ok_or_else(|| div_fault(b == 0))?),
            BinaryOp::Shl => Value::$variant(a.wrapping_shl(b as u32)),
            BinaryOp::Shr => Value::$variant(a.wrapping_shr(b as u32)),
            BinaryOp::BitAnd => Value::$variant(a & b),
            BinaryOp::BitOr => Value::$variant(a | b),
            BinaryOp::BitXor => Value::$variant(a ^ b),
            BinaryOp::Lt => Value::from_bool(a < b),
            BinaryOp::Gt => Value::from_bool(a > b),
            BinaryOp::Le => Value::from_bool(a <= b),
            BinaryOp::Ge => Value::from_bool(a >= b),
            BinaryOp::Eq => Value::from_bool(a == b),
            BinaryOp::Ne => Value::from_bool(a != b),
            BinaryOp::And | BinaryOp::Or => return Err(Fault::new("logical operator evaluated eagerly")),
        })
    }};
}

macro_rules! float_arith {
    ($op:expr, $a:expr, $b:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Ok(match $op {
            BinaryOp::Add => Value::$variant(a + b),
            BinaryOp::Sub => Value::$variant(a - b),
            BinaryOp::Mul => Value::$variant(a * b),
            BinaryOp::Div => Value::$variant(a / b),
            BinaryOp::Lt => Value::from_bool(a < b),
            BinaryOp::Gt => Value::from_bool(a > b),
            BinaryOp::Le => Value::from_bool(a <= b),
            BinaryOp::Ge => Value::from_bool(a >= b),
            BinaryOp::Eq => Value::from_bool(a == b),
            BinaryOp::Ne => Value::from_bool(a != b),
            other => return Err(Fault::new(format!("operator '{}' on floating operands", other.symbol()))),
        })
    }};
}

fn div_fault(by_zero: bool) -> Fault {
    if by_zero {
        Fault::new("integer division by zero")
    } else {
        Fault::new("integer division overflow")
    }
}

impl Value {
    pub fn zero(kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::U8 => Value::U8(0),
            ScalarKind::I32 => Value::I32(0),
            ScalarKind::U32 => Value::U32(0),
            ScalarKind::I64 => Value::I64(0),
            ScalarKind::U64 => Value::U64(0),
            ScalarKind::F32 => Value::F32(0.0),
            ScalarKind::F64 => Value::F64(0.0),
        }
    }

    /// C comparison and logical results are `int`.
    pub fn from_bool(b: bool) -> Value {
        Value::I32(b as i32)
    }

    /// An integer literal of the given kind.
    pub fn from_bits(bits: u64, kind: ScalarKind) -> Value {
        Value::U64(bits).cast(kind)
    }

    pub fn from_i64(v: i64, kind: ScalarKind) -> Value {
        Value::I64(v).cast(kind)
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::Bool(v) => v,
            Value::U8(v) => v != 0,
            Value::I32(v) => v != 0,
            Value::U32(v) => v != 0,
            Value::I64(v) => v != 0,
            Value::U64(v) => v != 0,
            Value::F32(v) => v != 0.0,
            Value::F64(v) => v != 0.0,
            Value::Ptr(_) => true,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Value::Bool(v) => v as i64,
            Value::U8(v) => v as i64,
            Value::I32(v) => v as i64,
            Value::U32(v) => v as i64,
            Value::I64(v) => v,
            Value::U64(v) => v as i64,
            Value::F32(v) => v as i64,
            Value::F64(v) => v as i64,
            Value::Ptr(p) => p.offset,
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            Value::Bool(v) => v as u64,
            Value::U8(v) => v as u64,
            Value::I32(v) => v as u64,
            Value::U32(v) => v as u64,
            Value::I64(v) => v as u64,
            Value::U64(v) => v,
            Value::F32(v) => v as u64,
            Value::F64(v) => v as u64,
            Value::Ptr(p) => p.offset as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::Bool(v) => v as u8 as f64,
            Value::U8(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::Ptr(p) => p.offset as f64,
        }
    }

    /// C conversion to `kind`: integers wrap, floats truncate toward zero.
    pub fn cast(self, kind: ScalarKind) -> Value {
        if let Value::Ptr(_) = self {
            return self;
        }
        let from_float = matches!(self, Value::F32(_) | Value::F64(_));
        match kind {
            ScalarKind::Bool => Value::Bool(self.truthy()),
            ScalarKind::F32 => match self {
                Value::F32(v) => Value::F32(v),
                Value::F64(v) => Value::F32(v as f32),
                Value::U64(v) => Value::F32(v as f32),
                Value::U32(v) => Value::F32(v as f32),
                other => Value::F32(other.as_i64() as f32),
            },
            ScalarKind::F64 => match self {
                Value::U64(v) => Value::F64(v as f64),
                other => Value::F64(other.as_f64()),
            },
            int_kind => {
                let bits = if from_float {
                    let f = self.as_f64();
                    if f < 0.0 {
                        f as i64 as u64
                    } else {
                        f as u64
                    }
                } else {
                    self.as_u64()
                };
                match int_kind {
                    ScalarKind::U8 => Value::U8(bits as u8),
                    ScalarKind::I32 => Value::I32(bits as i32),
                    ScalarKind::U32 => Value::U32(bits as u32),
                    ScalarKind::I64 => Value::I64(bits as i64),
                    _ => Value::U64(bits),
                }
            }
        }
    }

    /// Arithmetic, bitwise and comparison operators.
    ///
    /// Both operands must already share the operator's kind.
    pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Fault> {
        match (lhs, rhs) {
            (Value::I32(a), Value::I32(b)) => int_arith!(op, a, b, I32),
            (Value::U32(a), Value::U32(b)) => int_arith!(op, a, b, U32),
            (Value::I64(a), Value::I64(b)) => int_arith!(op, a, b, I64),
            (Value::U64(a), Value::U64(b)) => int_arith!(op, a, b, U64),
            (Value::F32(a), Value::F32(b)) => float_arith!(op, a, b, F32),
            (Value::F64(a), Value::F64(b)) => float_arith!(op, a, b, F64),
            (a, b) => Err(Fault::new(format!(
                "mismatched operands for '{}': {:?} and {:?}",
                op.symbol(),
                a,
                b
            ))),
        }
    }

    /// `-`, `+`, `!` and `~`; the operand is already promoted.
    pub fn unary(op: UnaryOp, operand: Value) -> Result<Value, Fault> {
        Ok(match (op, operand) {
            (UnaryOp::Plus, v) => v,
            (UnaryOp::Not, v) => Value::from_bool(!v.truthy()),
            (UnaryOp::Neg, Value::I32(v)) => Value::I32(v.wrapping_neg()),
            (UnaryOp::Neg, Value::U32(v)) => Value::U32(v.wrapping_neg()),
            (UnaryOp::Neg, Value::I64(v)) => Value::I64(v.wrapping_neg()),
            (UnaryOp::Neg, Value::U64(v)) => Value::U64(v.wrapping_neg()),
            (UnaryOp::Neg, Value::F32(v)) => Value::F32(-v),
            (UnaryOp::Neg, Value::F64(v)) => Value::F64(-v),
            (UnaryOp::BitNot, Value::I32(v)) => Value::I32(!v),
            (UnaryOp::BitNot, Value::U32(v)) => Value::U32(!v),
            (UnaryOp::BitNot, Value::I64(v)) => Value::I64(!v),
            (UnaryOp::BitNot, Value::U64(v)) => Value::U64(!v),
            (op, v) => return Err(Fault::new(format!("invalid operand {:?} for {:?}", v, op))),
        })
    }

    /// Read a scalar of `kind` from unaligned host memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `kind.size_in_bytes()` bytes.
    pub unsafe fn load(ptr: *const u8, kind: ScalarKind) -> Value {
        use std::ptr::read_unaligned as rd;
        match kind {
            ScalarKind::Bool => Value::Bool(*ptr != 0),
            ScalarKind::U8 => Value::U8(*ptr),
            ScalarKind::I32 => Value::I32(rd(ptr as *const i32)),
            ScalarKind::U32 => Value::U32(rd(ptr as *const u32)),
            ScalarKind::I64 => Value::I64(rd(ptr as *const i64)),
            ScalarKind::U64 => Value::U64(rd(ptr as *const u64)),
            ScalarKind::F32 => Value::F32(rd(ptr as *const f32)),
            ScalarKind::F64 => Value::F64(rd(ptr as *const f64)),
        }
    }

    /// Write `self` converted to `kind` into unaligned host memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `kind.size_in_bytes()` bytes.
    pub unsafe fn store(self, ptr: *mut u8, kind: ScalarKind) {
        use std::ptr::write_unaligned as wr;
        match self.cast(kind) {
            Value::Bool(v) => *ptr = v as u8,
            Value::U8(v) => *ptr = v,
            Value::I32(v) => wr(ptr as *mut i32, v),
            Value::U32(v) => wr(ptr as *mut u32, v),
            Value::I64(v) => wr(ptr as *mut i64, v),
            Value::U64(v) => wr(ptr as *mut u64, v),
            Value::F32(v) => wr(ptr as *mut f32, v),
            Value::F64(v) => wr(ptr as *mut f64, v),
            Value::Ptr(_) => {}
        }
    }
}

impl From<ScalarValue> for Value {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Bool(v) => Value::Bool(v),
            ScalarValue::U8(v) => Value::U8(v),
            ScalarValue::I32(v) => Value::I32(v),
            ScalarValue::U32(v) => Value::U32(v),
            ScalarValue::I64(v) => Value::I64(v),
            ScalarValue::U64(v) => Value::U64(v),
            ScalarValue::F32(v) => Value::F32(v),
            ScalarValue::F64(v) => Value::F64(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions_wrap() {
        assert_eq!(Value::I32(-1).cast(ScalarKind::U32), Value::U32(u32::MAX));
        assert_eq!(Value::U64(1 << 40).cast(ScalarKind::I32), Value::I32(0));
        assert_eq!(Value::I32(300).cast(ScalarKind::U8), Value::U8(44));
    }

    #[test]
    fn test_float_to_int_truncates() {
        assert_eq!(Value::F64(-2.75).cast(ScalarKind::I32), Value::I32(-2));
        assert_eq!(Value::F32(3.9).cast(ScalarKind::U32), Value::U32(3));
        assert_eq!(Value::F64(0.5).cast(ScalarKind::Bool), Value::Bool(true));
    }

    #[test]
    fn test_single_precision_is_preserved() {
        let sum = Value::binary(BinaryOp::Add, Value::F32(0.1), Value::F32(0.2)).unwrap();
        assert_eq!(sum, Value::F32(0.1f32 + 0.2f32));
    }

    #[test]
    fn test_division_by_zero_faults() {
        assert!(Value::binary(BinaryOp::Div, Value::I32(1), Value::I32(0)).is_err());
        assert!(Value::binary(BinaryOp::Rem, Value::U64(1), Value::U64(0)).is_err());
        assert!(Value::binary(BinaryOp::Div, Value::I32(i32::MIN), Value::I32(-1)).is_err());
        let inf = Value::binary(BinaryOp::Div, Value::F64(1.0), Value::F64(0.0)).unwrap();
        assert_eq!(inf, Value::F64(f64::INFINITY));
    }

    #[test]
    fn test_comparisons_yield_int() {
        assert_eq!(
            Value::binary(BinaryOp::Lt, Value::F64(1.0), Value::F64(2.0)).unwrap(),
            Value::I32(1)
        );
        assert_eq!(Value::unary(UnaryOp::Not, Value::I32(5)).unwrap(), Value::I32(0));
    }

    #[test]
    fn test_load_store_round_trip() {
        let mut bytes = [0u8; 8];
        unsafe {
            Value::I32(7).store(bytes.as_mut_ptr().add(1), ScalarKind::F32);
            assert_eq!(Value::load(bytes.as_ptr().add(1), ScalarKind::F32), Value::F32(7.0));
        }
    }
}
