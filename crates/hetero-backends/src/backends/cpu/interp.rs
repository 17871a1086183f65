//! Tree-walking interpreter for compiled CPU programs
//!
//! Loop-model kernels run their body once; `Stmt::Parallel` loops spread
//! iterations over the rayon pool. Grid-model kernels run the body once per
//! thread, with blocks distributed over the pool when threaded.

use super::program::{Builtin, GridVar, Ir, ParallelLoop, Place, Program, Stmt};
use super::value::{Fault, Pointer, Region, Value};
use crate::backend::LaunchConfig;
use hetero_lang::ast::{BinaryOp, UnaryOp};
use hetero_lang::{LaunchModel, ScalarKind};
use rayon::prelude::*;

/// Local arrays larger than this many elements are rejected.
const MAX_LOCAL_ARRAY: i64 = 1 << 24;

/// Host memory bound to a pointer parameter for one launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GlobalView {
    pub ptr: *mut u8,
    pub len: usize,
}

// SAFETY: views point into buffers that outlive the launch; data races
// between kernel threads are the kernel's responsibility, as in C.
unsafe impl Send for GlobalView {}
unsafe impl Sync for GlobalView {}

#[derive(Debug, Clone, Copy, Default)]
struct GridState {
    thread: [u32; 3],
    block: [u32; 3],
    block_dim: [u32; 3],
    grid_dim: [u32; 3],
}

#[derive(Debug, Clone)]
struct Frame {
    slots: Vec<Value>,
    arrays: Vec<Vec<Value>>,
    grid: GridState,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return,
}

/// Resolved storage location.
enum Target {
    Slot(u32),
    Mem(Pointer, ScalarKind),
}

/// Arguments of one launch, indexed by parameter position.
pub(crate) struct Bindings {
    pub views: Vec<Option<GlobalView>>,
    pub scalars: Vec<Option<Value>>,
}

/// Execute `program` with `bindings`.
pub(crate) fn run(
    program: &Program,
    bindings: &Bindings,
    config: Option<&LaunchConfig>,
    threaded: bool,
) -> Result<(), Fault> {
    let mut frame = Frame {
        slots: vec![Value::I32(0); program.slot_count],
        arrays: vec![Vec::new(); program.array_count],
        grid: GridState::default(),
    };
    for (index, param) in program.params.iter().enumerate() {
        let value = if param.ty.pointer {
            Value::Ptr(Pointer {
                region: Region::Param(index as u16),
                offset: 0,
            })
        } else {
            bindings.scalars[index]
                .ok_or_else(|| Fault::new(format!("missing value for '{}'", param.name)))?
                .cast(param.ty.scalar)
        };
        frame.slots[param.slot as usize] = value;
    }

    let exec = Exec {
        program,
        views: &bindings.views,
        threaded,
    };
    match (program.launch_model(), config) {
        (LaunchModel::Loops, _) => exec.block(&program.body, &mut frame).map(|_| ()),
        (LaunchModel::Grid, Some(config)) => exec.grid(config, frame),
        (LaunchModel::Grid, None) => Err(Fault::new("launch dimensions were not set")),
    }
}

struct Exec<'a> {
    program: &'a Program,
    views: &'a [Option<GlobalView>],
    threaded: bool,
}

impl Exec<'_> {
    // ============================================================================================
    // Launch shapes
    // ============================================================================================

    fn grid(&self, config: &LaunchConfig, frame: Frame) -> Result<(), Fault> {
        let grid_dim = [config.grid.x, config.grid.y, config.grid.z];
        let block_dim = [config.block.x, config.block.y, config.block.z];
        let total_blocks = config.grid.total_blocks();

        let run_block = |linear: u64| -> Result<(), Fault> {
            let block = unlinearize(linear, grid_dim);
            for t in 0..config.block.total_threads() {
                let mut local = frame.clone();
                local.grid = GridState {
                    thread: unlinearize(t, block_dim),
                    block,
                    block_dim,
                    grid_dim,
                };
                self.block(&self.program.body, &mut local)?;
            }
            Ok(())
        };

        if self.threaded {
            (0..total_blocks).into_par_iter().try_for_each(run_block)
        } else {
            (0..total_blocks).try_for_each(run_block)
        }
    }

    fn parallel(&self, lp: &ParallelLoop, frame: &mut Frame) -> Result<(), Fault> {
        let start = self.eval(&lp.start, frame)?.as_i64();
        let end = self.eval(&lp.end, frame)?.as_i64();
        let step = self.eval(&lp.step, frame)?.as_i64();
        let count = trip_count(lp.cmp, start, end, step)?;

        let snapshot: &Frame = frame;
        (0..count).into_par_iter().try_for_each(|iteration| -> Result<(), Fault> {
            let mut local = snapshot.clone();
            local.slots[lp.slot as usize] = Value::from_i64(start + iteration as i64 * step, lp.kind);
            self.block(&lp.body, &mut local).map(|_| ())
        })?;

        frame.slots[lp.slot as usize] = Value::from_i64(start + count as i64 * step, lp.kind);
        Ok(())
    }

    // ============================================================================================
    // Statements
    // ============================================================================================

    fn block(&self, stmts: &[Stmt], frame: &mut Frame) -> Result<Flow, Fault> {
        for stmt in stmts {
            match self.stmt(stmt, frame)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&self, stmt: &Stmt, frame: &mut Frame) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Eval(ir) => {
                self.eval(ir, frame)?;
            }
            Stmt::Init { slot, value } => {
                let value = self.eval(value, frame)?;
                frame.slots[*slot as usize] = value;
            }
            Stmt::Array { slot, array, len, elem } => {
                let len = self.eval(len, frame)?.as_i64();
                if !(0..=MAX_LOCAL_ARRAY).contains(&len) {
                    return Err(Fault::new(format!("invalid local array length {}", len)));
                }
                frame.arrays[*array as usize] = vec![Value::zero(*elem); len as usize];
                frame.slots[*slot as usize] = Value::Ptr(Pointer {
                    region: Region::Local(*array),
                    offset: 0,
                });
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let branch = if self.eval(cond, frame)?.truthy() {
                    then_branch
                } else {
                    else_branch
                };
                return self.block(branch, frame);
            }
            Stmt::Loop { cond, step, body } => loop {
                if let Some(cond) = cond {
                    if !self.eval(cond, frame)?.truthy() {
                        break;
                    }
                }
                match self.block(body, frame)? {
                    Flow::Break => break,
                    Flow::Return => return Ok(Flow::Return),
                    Flow::Normal | Flow::Continue => {}
                }
                if let Some(step) = step {
                    self.eval(step, frame)?;
                }
            },
            Stmt::Parallel(lp) => self.parallel(lp, frame)?,
            Stmt::Return => return Ok(Flow::Return),
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    // ============================================================================================
    // Expressions
    // ============================================================================================

    fn eval(&self, ir: &Ir, frame: &mut Frame) -> Result<Value, Fault> {
        match ir {
            Ir::Const(value) => Ok(*value),
            Ir::Slot(slot) => Ok(frame.slots[*slot as usize]),
            Ir::Grid(var, axis) => {
                let grid = &frame.grid;
                let dims = match var {
                    GridVar::ThreadIdx => grid.thread,
                    GridVar::BlockIdx => grid.block,
                    GridVar::BlockDim => grid.block_dim,
                    GridVar::GridDim => grid.grid_dim,
                };
                Ok(Value::U32(dims[*axis]))
            }
            Ir::Load { ptr, index, elem } => {
                let target = self.element(ptr, index, *elem, frame)?;
                self.read(&target, frame)
            }
            Ir::Cast(operand, kind) => Ok(self.eval(operand, frame)?.cast(*kind)),
            Ir::Unary(op, operand) => {
                let value = self.eval(operand, frame)?;
                Value::unary(*op, value)
            }
            Ir::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                Value::binary(*op, lhs, rhs)
            }
            Ir::Logical { or, lhs, rhs } => {
                let lhs = self.eval(lhs, frame)?.truthy();
                if lhs == *or {
                    return Ok(Value::from_bool(lhs));
                }
                Ok(Value::from_bool(self.eval(rhs, frame)?.truthy()))
            }
            Ir::Assign { place, value } => {
                let target = self.resolve(place, frame)?;
                let value = self.eval(value, frame)?;
                self.write(&target, value, frame)?;
                Ok(value)
            }
            Ir::Compound {
                place,
                op,
                op_kind,
                kind,
                rhs,
            } => {
                let target = self.resolve(place, frame)?;
                let current = self.read(&target, frame)?.cast(*op_kind);
                let rhs = self.eval(rhs, frame)?;
                let result = Value::binary(*op, current, rhs)?.cast(*kind);
                self.write(&target, result, frame)?;
                Ok(result)
            }
            Ir::Step {
                place,
                kind,
                increment,
                prefix,
            } => {
                let target = self.resolve(place, frame)?;
                let old = self.read(&target, frame)?;
                let op_kind = kind.promoted();
                let op = if *increment { BinaryOp::Add } else { BinaryOp::Sub };
                let one = Value::I32(1).cast(op_kind);
                let new = Value::binary(op, old.cast(op_kind), one)?.cast(*kind);
                self.write(&target, new, frame)?;
                Ok(if *prefix { new } else { old })
            }
            Ir::Ternary(cond, a, b) => {
                if self.eval(cond, frame)?.truthy() {
                    self.eval(a, frame)
                } else {
                    self.eval(b, frame)
                }
            }
            Ir::Call { func, kind, args } => {
                let mut values = [Value::I32(0); 2];
                for (slot, arg) in values.iter_mut().zip(args) {
                    *slot = self.eval(arg, frame)?;
                }
                call(*func, *kind, values[0], values[1])
            }
            Ir::PtrAdd { ptr, offset } => {
                let ptr = self.pointer(ptr, frame)?;
                let offset = self.eval(offset, frame)?.as_i64();
                Ok(Value::Ptr(Pointer {
                    region: ptr.region,
                    offset: ptr.offset.wrapping_add(offset),
                }))
            }
        }
    }

    fn pointer(&self, ir: &Ir, frame: &mut Frame) -> Result<Pointer, Fault> {
        match self.eval(ir, frame)? {
            Value::Ptr(ptr) => Ok(ptr),
            _ => Err(Fault::new("dereference of an uninitialized pointer")),
        }
    }

    fn element(&self, ptr: &Ir, index: &Ir, elem: ScalarKind, frame: &mut Frame) -> Result<Target, Fault> {
        let base = self.pointer(ptr, frame)?;
        let index = self.eval(index, frame)?.as_i64();
        Ok(Target::Mem(
            Pointer {
                region: base.region,
                offset: base.offset.wrapping_add(index),
            },
            elem,
        ))
    }

    fn resolve(&self, place: &Place, frame: &mut Frame) -> Result<Target, Fault> {
        match place {
            Place::Slot(slot) => Ok(Target::Slot(*slot)),
            Place::Elem { ptr, index, elem } => self.element(ptr, index, *elem, frame),
        }
    }

    fn read(&self, target: &Target, frame: &Frame) -> Result<Value, Fault> {
        match *target {
            Target::Slot(slot) => Ok(frame.slots[slot as usize]),
            Target::Mem(ptr, elem) => match ptr.region {
                Region::Param(param) => {
                    let address = self.address(param, ptr.offset, elem)?;
                    // SAFETY: `address` checked the element lies inside the view.
                    Ok(unsafe { Value::load(address, elem) })
                }
                Region::Local(array) => {
                    let values = &frame.arrays[array as usize];
                    usize::try_from(ptr.offset)
                        .ok()
                        .and_then(|i| values.get(i))
                        .copied()
                        .ok_or_else(|| local_fault(ptr.offset, values.len()))
                }
            },
        }
    }

    fn write(&self, target: &Target, value: Value, frame: &mut Frame) -> Result<(), Fault> {
        match *target {
            Target::Slot(slot) => frame.slots[slot as usize] = value,
            Target::Mem(ptr, elem) => match ptr.region {
                Region::Param(param) => {
                    let address = self.address(param, ptr.offset, elem)?;
                    // SAFETY: `address` checked the element lies inside the view.
                    unsafe { value.store(address, elem) };
                }
                Region::Local(array) => {
                    let values = &mut frame.arrays[array as usize];
                    let len = values.len();
                    let cell = usize::try_from(ptr.offset)
                        .ok()
                        .and_then(|i| values.get_mut(i))
                        .ok_or_else(|| local_fault(ptr.offset, len))?;
                    *cell = value.cast(elem);
                }
            },
        }
        Ok(())
    }

    /// Bounds-checked address of element `offset` of parameter `param`.
    fn address(&self, param: u16, offset: i64, elem: ScalarKind) -> Result<*mut u8, Fault> {
        let name = &self.program.params[param as usize].name;
        let view = self.views[param as usize].ok_or_else(|| Fault::new(format!("'{}' is not bound", name)))?;
        let count = view.len / elem.size_in_bytes();
        match usize::try_from(offset) {
            Ok(i) if i < count => {
                // SAFETY: i * size + size <= view.len
                Ok(unsafe { view.ptr.add(i * elem.size_in_bytes()) })
            }
            _ => Err(Fault::new(format!(
                "{}[{}] is out of bounds ({} elements)",
                name, offset, count
            ))),
        }
    }
}

fn local_fault(offset: i64, len: usize) -> Fault {
    Fault::new(format!("local array index {} is out of bounds ({} elements)", offset, len))
}

fn unlinearize(linear: u64, dims: [u32; 3]) -> [u32; 3] {
    let x = dims[0] as u64;
    let y = dims[1] as u64;
    [
        (linear % x) as u32,
        ((linear / x) % y) as u32,
        (linear / (x * y)) as u32,
    ]
}

/// Number of iterations of a canonical loop.
fn trip_count(cmp: BinaryOp, start: i64, end: i64, step: i64) -> Result<u64, Fault> {
    let forward = matches!(cmp, BinaryOp::Lt | BinaryOp::Le);
    if (forward && step <= 0) || (!forward && step >= 0) {
        let empty = match cmp {
            BinaryOp::Lt => start >= end,
            BinaryOp::Le => start > end,
            BinaryOp::Gt => start <= end,
            _ => start < end,
        };
        if empty {
            return Ok(0);
        }
        return Err(Fault::new(format!("parallel loop with step {} never terminates", step)));
    }
    let (span, stride) = if forward {
        (end as i128 - start as i128, step as i128)
    } else {
        (start as i128 - end as i128, -(step as i128))
    };
    let inclusive = matches!(cmp, BinaryOp::Le | BinaryOp::Ge);
    let count = match (span, inclusive) {
        (s, false) if s <= 0 => 0,
        (s, true) if s < 0 => 0,
        (s, false) => (s + stride - 1) / stride,
        (s, true) => s / stride + 1,
    };
    Ok(count as u64)
}

macro_rules! float_call {
    ($func:expr, $a:expr, $b:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Value::$variant(match $func {
            Builtin::Sqrt => a.sqrt(),
            Builtin::Exp => a.exp(),
            Builtin::Log => a.ln(),
            Builtin::Sin => a.sin(),
            Builtin::Cos => a.cos(),
            Builtin::Tan => a.tan(),
            Builtin::Fabs | Builtin::Abs => a.abs(),
            Builtin::Floor => a.floor(),
            Builtin::Ceil => a.ceil(),
            Builtin::Pow => a.powf(b),
            Builtin::Fmin | Builtin::Min => a.min(b),
            Builtin::Fmax | Builtin::Max => a.max(b),
        })
    }};
}

fn call(func: Builtin, kind: ScalarKind, a: Value, b: Value) -> Result<Value, Fault> {
    let (a, b) = (a.cast(kind), b.cast(kind));
    match (a, b) {
        (Value::F32(a), Value::F32(b)) => Ok(float_call!(func, a, b, F32)),
        (Value::F64(a), Value::F64(b)) => Ok(float_call!(func, a, b, F64)),
        _ => {
            let less = Value::binary(BinaryOp::Lt, a, b)?.truthy();
            match func {
                Builtin::Abs => {
                    let negative = Value::binary(BinaryOp::Lt, a, Value::zero(kind))?.truthy();
                    if negative {
                        Value::unary(UnaryOp::Neg, a)
                    } else {
                        Ok(a)
                    }
                }
                Builtin::Min => Ok(if less { a } else { b }),
                Builtin::Max => Ok(if less { b } else { a }),
                other => Err(Fault::new(format!("{:?} on integer operands", other))),
            }
        }
    }
}
