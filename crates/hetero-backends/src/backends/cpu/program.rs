//! Compiles dialect source into a slot-resolved, statically typed program
//! that the interpreter executes.
//!
//! Every name is resolved to a frame slot, every implicit C conversion is
//! made explicit as a cast, and every `#pragma omp parallel for` over a
//! canonical loop becomes a [`Stmt::Parallel`] when the backend runs threads.

use super::value::Value;
use crate::error::{BackendError, Result};
use hetero_lang::ast::{self, BinaryOp, Expr, ForLoop, Function, UnaryOp, VarDecl};
use hetero_lang::{kernel_metadata, parse_with_defines, KernelMetadata, LaunchModel, ParamType, ScalarKind};
use std::collections::HashMap;

const OMP_PARALLEL_FOR: &str = "omp parallel for";

/// Static type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ty {
    Scalar(ScalarKind),
    Ptr { elem: ScalarKind, readonly: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GridVar {
    ThreadIdx,
    BlockIdx,
    BlockDim,
    GridDim,
}

impl GridVar {
    fn from_name(name: &str) -> Option<GridVar> {
        match name {
            "threadIdx" => Some(GridVar::ThreadIdx),
            "blockIdx" => Some(GridVar::BlockIdx),
            "blockDim" => Some(GridVar::BlockDim),
            "gridDim" => Some(GridVar::GridDim),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Fabs,
    Floor,
    Ceil,
    Pow,
    Fmin,
    Fmax,
    Abs,
    Min,
    Max,
}

impl Builtin {
    /// Resolve a call name; the flag marks the single-precision `f` variant.
    fn from_name(name: &str) -> Option<(Builtin, bool)> {
        let lookup = |base: &str| match base {
            "sqrt" => Some(Builtin::Sqrt),
            "exp" => Some(Builtin::Exp),
            "log" => Some(Builtin::Log),
            "sin" => Some(Builtin::Sin),
            "cos" => Some(Builtin::Cos),
            "tan" => Some(Builtin::Tan),
            "fabs" => Some(Builtin::Fabs),
            "floor" => Some(Builtin::Floor),
            "ceil" => Some(Builtin::Ceil),
            "pow" => Some(Builtin::Pow),
            "fmin" => Some(Builtin::Fmin),
            "fmax" => Some(Builtin::Fmax),
            "abs" => Some(Builtin::Abs),
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            _ => None,
        };
        if let Some(builtin) = lookup(name) {
            return Some((builtin, false));
        }
        let base = name.strip_suffix('f')?;
        match lookup(base)? {
            Builtin::Abs | Builtin::Min | Builtin::Max => None,
            builtin => Some((builtin, true)),
        }
    }

    const fn arity(self) -> usize {
        match self {
            Builtin::Pow | Builtin::Fmin | Builtin::Fmax | Builtin::Min | Builtin::Max => 2,
            _ => 1,
        }
    }

    /// Math library functions compute in floating point.
    const fn is_float_only(self) -> bool {
        !matches!(self, Builtin::Abs | Builtin::Min | Builtin::Max)
    }
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ir {
    Const(Value),
    Slot(u32),
    Grid(GridVar, usize),
    Load {
        ptr: Box<Ir>,
        index: Box<Ir>,
        elem: ScalarKind,
    },
    Cast(Box<Ir>, ScalarKind),
    Unary(UnaryOp, Box<Ir>),
    /// Operands already converted to the operator's kind.
    Binary(BinaryOp, Box<Ir>, Box<Ir>),
    Logical {
        or: bool,
        lhs: Box<Ir>,
        rhs: Box<Ir>,
    },
    /// The value is already converted to the place's type.
    Assign {
        place: Place,
        value: Box<Ir>,
    },
    /// `place op= rhs`, computed in `op_kind` and stored back as `kind`.
    Compound {
        place: Place,
        op: BinaryOp,
        op_kind: ScalarKind,
        kind: ScalarKind,
        rhs: Box<Ir>,
    },
    /// `++`/`--` in prefix or postfix position.
    Step {
        place: Place,
        kind: ScalarKind,
        increment: bool,
        prefix: bool,
    },
    Ternary(Box<Ir>, Box<Ir>, Box<Ir>),
    Call {
        func: Builtin,
        kind: ScalarKind,
        args: Vec<Ir>,
    },
    /// Pointer plus an `I64` element offset.
    PtrAdd {
        ptr: Box<Ir>,
        offset: Box<Ir>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Place {
    Slot(u32),
    Elem {
        ptr: Box<Ir>,
        index: Box<Ir>,
        elem: ScalarKind,
    },
}

/// A canonical `for` loop whose iterations run concurrently.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParallelLoop {
    pub slot: u32,
    pub kind: ScalarKind,
    /// Start, end and step are `I64`.
    pub start: Ir,
    pub end: Ir,
    pub step: Ir,
    pub cmp: BinaryOp,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Eval(Ir),
    Init {
        slot: u32,
        value: Ir,
    },
    Array {
        slot: u32,
        array: u32,
        len: Ir,
        elem: ScalarKind,
    },
    If {
        cond: Ir,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    Loop {
        cond: Option<Ir>,
        step: Option<Ir>,
        body: Vec<Stmt>,
    },
    Parallel(ParallelLoop),
    Return,
    Break,
    Continue,
}

/// How a parameter is materialised in the frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamSlot {
    pub name: String,
    pub slot: u32,
    pub ty: ParamType,
}

/// A compiled kernel entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub(crate) metadata: KernelMetadata,
    pub(crate) params: Vec<ParamSlot>,
    pub(crate) body: Vec<Stmt>,
    pub(crate) slot_count: usize,
    pub(crate) array_count: usize,
    pub(crate) parallel_loops: usize,
}

impl Program {
    /// Parse `source` with `defines` and compile `entry`.
    pub fn compile(
        source: &str,
        entry: &str,
        defines: &[(String, String)],
        launch: LaunchModel,
        threaded: bool,
    ) -> Result<Program> {
        let unit = parse_with_defines(source, defines.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| BackendError::compile(entry, e))?;
        let function = unit
            .function(entry)
            .ok_or_else(|| BackendError::compile(entry, format!("entry point '{}' not found", entry)))?;
        Compiler::new(launch, threaded)
            .function(function)
            .map_err(|message| BackendError::compile(entry, message))
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &KernelMetadata {
        &self.metadata
    }

    pub fn launch_model(&self) -> LaunchModel {
        self.metadata.launch
    }

    /// Number of loops that execute their iterations concurrently.
    pub fn parallel_loops(&self) -> usize {
        self.parallel_loops
    }
}

type CResult<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy)]
struct Var {
    slot: u32,
    ty: Ty,
    is_const: bool,
}

struct Compiler {
    scopes: Vec<HashMap<String, Var>>,
    slot_count: u32,
    array_count: u32,
    launch: LaunchModel,
    threaded: bool,
    loop_depth: usize,
    parallel_loops: usize,
}

impl Compiler {
    fn new(launch: LaunchModel, threaded: bool) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            slot_count: 0,
            array_count: 0,
            launch,
            threaded,
            loop_depth: 0,
            parallel_loops: 0,
        }
    }

    fn function(mut self, function: &Function) -> CResult<Program> {
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let ty = if param.ty.pointer {
                Ty::Ptr {
                    elem: param.ty.scalar,
                    readonly: param.ty.is_const,
                }
            } else {
                Ty::Scalar(param.ty.scalar)
            };
            let slot = self.declare(&param.name, ty, param.ty.is_const && !param.ty.pointer)?;
            params.push(ParamSlot {
                name: param.name.clone(),
                slot,
                ty: param.ty,
            });
        }
        if params.len() > u16::MAX as usize {
            return Err("too many parameters".to_string());
        }

        let body = self.block(&function.body.stmts)?;
        Ok(Program {
            metadata: kernel_metadata(function, self.launch),
            params,
            body,
            slot_count: self.slot_count as usize,
            array_count: self.array_count as usize,
            parallel_loops: self.parallel_loops,
        })
    }

    // ============================================================================================
    // Scopes
    // ============================================================================================

    fn declare(&mut self, name: &str, ty: Ty, is_const: bool) -> CResult<u32> {
        let slot = self.slot_count;
        self.slot_count += 1;
        let scope = self.scopes.last_mut().ok_or("no open scope")?;
        if scope.insert(name.to_string(), Var { slot, ty, is_const }).is_some() {
            return Err(format!("redefinition of '{}'", name));
        }
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<Var> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> CResult<T>) -> CResult<T> {
        self.scopes.push(HashMap::new());
        let out = f(self);
        self.scopes.pop();
        out
    }

    // ============================================================================================
    // Statements
    // ============================================================================================

    fn block(&mut self, stmts: &[ast::Stmt]) -> CResult<Vec<Stmt>> {
        let mut out = Vec::new();
        for stmt in stmts {
            self.stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    /// Compile `stmt` into its own scope.
    fn branch(&mut self, stmt: &ast::Stmt) -> CResult<Vec<Stmt>> {
        self.scoped(|c| {
            let mut out = Vec::new();
            c.stmt(stmt, &mut out)?;
            Ok(out)
        })
    }

    fn stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<Stmt>) -> CResult<()> {
        match stmt {
            ast::Stmt::Decl(decls) => {
                for decl in decls {
                    self.decl(decl, out)?;
                }
            }
            ast::Stmt::Expr(expr) => {
                let (ir, _) = self.expr(expr)?;
                out.push(Stmt::Eval(ir));
            }
            ast::Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let (cond, _) = self.expr(cond)?;
                let then_branch = self.branch(then_branch)?;
                let else_branch = match else_branch {
                    Some(stmt) => self.branch(stmt)?,
                    None => Vec::new(),
                };
                out.push(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                });
            }
            ast::Stmt::For(for_loop) => {
                let compiled = self.scoped(|c| c.for_loop(for_loop))?;
                out.extend(compiled);
            }
            ast::Stmt::While { cond, body } => {
                let (cond, _) = self.expr(cond)?;
                let body = self.loop_body(body)?;
                out.push(Stmt::Loop {
                    cond: Some(cond),
                    step: None,
                    body,
                });
            }
            ast::Stmt::Block(block) => {
                let compiled = self.scoped(|c| c.block(&block.stmts))?;
                out.extend(compiled);
            }
            ast::Stmt::Return => out.push(Stmt::Return),
            ast::Stmt::Break | ast::Stmt::Continue if self.loop_depth == 0 => {
                return Err("'break' or 'continue' outside of a loop".to_string());
            }
            ast::Stmt::Break => out.push(Stmt::Break),
            ast::Stmt::Continue => out.push(Stmt::Continue),
            ast::Stmt::Barrier(location) => {
                return Err(format!("{}: barriers are not supported in native CPU kernels", location));
            }
            ast::Stmt::Pragma(_) | ast::Stmt::Empty => {}
        }
        Ok(())
    }

    fn decl(&mut self, decl: &VarDecl, out: &mut Vec<Stmt>) -> CResult<()> {
        if let Some(len) = &decl.array_len {
            if decl.pointer {
                return Err(format!("{}: arrays of pointers are not supported", decl.location));
            }
            let len = self.integer(len, "array length")?;
            let array = self.array_count;
            self.array_count += 1;
            let ty = Ty::Ptr {
                elem: decl.scalar,
                readonly: false,
            };
            let slot = self.declare(&decl.name, ty, true)?;
            out.push(Stmt::Array {
                slot,
                array,
                len,
                elem: decl.scalar,
            });
            return Ok(());
        }

        let ty = if decl.pointer {
            Ty::Ptr {
                elem: decl.scalar,
                readonly: decl.is_const,
            }
        } else {
            Ty::Scalar(decl.scalar)
        };
        let value = match &decl.init {
            Some(init) => {
                let (ir, from) = self.expr(init)?;
                self.convert(ir, from, ty)
                    .map_err(|e| format!("{}: initializing '{}': {}", decl.location, decl.name, e))?
            }
            None => match ty {
                Ty::Scalar(kind) => Ir::Const(Value::zero(kind)),
                Ty::Ptr { .. } => Ir::Const(Value::I32(0)),
            },
        };
        let slot = self.declare(&decl.name, ty, decl.is_const && !decl.pointer)?;
        out.push(Stmt::Init { slot, value });
        Ok(())
    }

    fn loop_body(&mut self, body: &ast::Stmt) -> CResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let out = self.branch(body);
        self.loop_depth -= 1;
        out
    }

    fn for_loop(&mut self, for_loop: &ForLoop) -> CResult<Vec<Stmt>> {
        let wants_parallel = self.threaded
            && for_loop
                .pragma
                .as_deref()
                .is_some_and(|p| p.trim().starts_with(OMP_PARALLEL_FOR));

        let mut out = Vec::new();
        if let Some(init) = &for_loop.init {
            self.stmt(init, &mut out)?;
        }

        if wants_parallel && !breaks_out(&for_loop.body) {
            if let Some(parallel) = self.parallel_loop(for_loop)? {
                self.parallel_loops += 1;
                // the init statement already ran its side effects into the slot
                out.retain(|stmt| !matches!(stmt, Stmt::Init { slot, .. } if *slot == parallel.slot));
                out.push(Stmt::Parallel(parallel));
                return Ok(out);
            }
        }

        let cond = match &for_loop.cond {
            Some(cond) => Some(self.expr(cond)?.0),
            None => None,
        };
        let step = match &for_loop.step {
            Some(step) => Some(self.expr(step)?.0),
            None => None,
        };
        let body = self.loop_body(&for_loop.body)?;
        out.push(Stmt::Loop { cond, step, body });
        Ok(out)
    }

    /// Recognise `for (T i = a; i < b; i += k)` and friends.
    fn parallel_loop(&mut self, for_loop: &ForLoop) -> CResult<Option<ParallelLoop>> {
        let (name, start) = match for_loop.init.as_deref() {
            Some(ast::Stmt::Decl(decls)) if decls.len() == 1 => match &decls[0] {
                VarDecl {
                    name,
                    init: Some(init),
                    pointer: false,
                    array_len: None,
                    ..
                } => (name, init),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        let (slot, kind) = match self.lookup(name) {
            Some(Var {
                slot,
                ty: Ty::Scalar(kind),
                ..
            }) if kind.is_integer() => (slot, kind),
            _ => return Ok(None),
        };

        let (cmp, end) = match &for_loop.cond {
            Some(Expr::Binary(op @ (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge), lhs, rhs))
                if is_ident(lhs, name) =>
            {
                (*op, rhs.as_ref())
            }
            _ => return Ok(None),
        };

        let step = match &for_loop.step {
            Some(Expr::Unary(UnaryOp::PreInc | UnaryOp::PostInc, target)) if is_ident(target, name) => {
                Ir::Const(Value::I64(1))
            }
            Some(Expr::Unary(UnaryOp::PreDec | UnaryOp::PostDec, target)) if is_ident(target, name) => {
                Ir::Const(Value::I64(-1))
            }
            Some(Expr::Assign(Some(op @ (BinaryOp::Add | BinaryOp::Sub)), target, amount)) if is_ident(target, name) => {
                let amount = self.integer(amount, "loop step")?;
                if *op == BinaryOp::Sub {
                    Ir::Unary(UnaryOp::Neg, Box::new(amount))
                } else {
                    amount
                }
            }
            _ => return Ok(None),
        };

        // the bounds must not depend on the loop variable itself
        if mentions(end, name) {
            return Ok(None);
        }

        let start = self.integer(start, "loop start")?;
        let end = self.integer(end, "loop bound")?;
        let body = self.loop_body(&for_loop.body)?;
        Ok(Some(ParallelLoop {
            slot,
            kind,
            start,
            end,
            step,
            cmp,
            body,
        }))
    }

    // ============================================================================================
    // Expressions
    // ============================================================================================

    /// Compile an integer-valued expression converted to `I64`.
    fn integer(&mut self, expr: &Expr, what: &str) -> CResult<Ir> {
        match self.expr(expr)? {
            (ir, Ty::Scalar(kind)) if kind.is_integer() => Ok(cast(ir, kind, ScalarKind::I64)),
            (_, ty) => Err(format!("{} must be an integer, found {}", what, describe(ty))),
        }
    }

    fn scalar(&mut self, expr: &Expr) -> CResult<(Ir, ScalarKind)> {
        match self.expr(expr)? {
            (ir, Ty::Scalar(kind)) => Ok((ir, kind)),
            (_, ty) => Err(format!("expected a scalar, found {}", describe(ty))),
        }
    }

    fn convert(&self, ir: Ir, from: Ty, to: Ty) -> CResult<Ir> {
        match (from, to) {
            (Ty::Scalar(from), Ty::Scalar(to)) => Ok(cast(ir, from, to)),
            (Ty::Ptr { elem: a, .. }, Ty::Ptr { elem: b, .. }) if a == b => Ok(ir),
            (from, to) => Err(format!("cannot convert {} to {}", describe(from), describe(to))),
        }
    }

    fn expr(&mut self, expr: &Expr) -> CResult<(Ir, Ty)> {
        match expr {
            Expr::Int(bits, kind) => Ok((Ir::Const(Value::from_bits(*bits, *kind)), Ty::Scalar(*kind))),
            Expr::Float(value, kind) => {
                let value = match kind {
                    ScalarKind::F32 => Value::F32(*value as f32),
                    _ => Value::F64(*value),
                };
                Ok((Ir::Const(value), Ty::Scalar(*kind)))
            }
            Expr::Bool(b) => Ok((Ir::Const(Value::Bool(*b)), Ty::Scalar(ScalarKind::Bool))),
            Expr::Ident(name) => match self.lookup(name) {
                Some(var) => Ok((Ir::Slot(var.slot), var.ty)),
                None if GridVar::from_name(name).is_some() => {
                    Err(format!("'{}' must be used with a .x, .y or .z member", name))
                }
                None => Err(format!("use of undeclared identifier '{}'", name)),
            },
            Expr::Member(base, field) => self.grid_var(base, field),
            Expr::Index(base, index) => {
                let (ptr, elem) = self.pointer(base)?;
                let index = self.integer(index, "array index")?;
                Ok((
                    Ir::Load {
                        ptr: Box::new(ptr),
                        index: Box::new(index),
                        elem,
                    },
                    Ty::Scalar(elem),
                ))
            }
            Expr::Call(name, args) => self.call(name, args),
            Expr::Unary(op, operand) => self.unary(*op, operand),
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs),
            Expr::Assign(op, lhs, rhs) => self.assign(*op, lhs, rhs),
            Expr::Ternary(cond, then_expr, else_expr) => {
                let (cond, _) = self.expr(cond)?;
                let (a, a_ty) = self.expr(then_expr)?;
                let (b, b_ty) = self.expr(else_expr)?;
                let (a, b, ty) = match (a_ty, b_ty) {
                    (Ty::Scalar(x), Ty::Scalar(y)) => {
                        let kind = ScalarKind::common(x, y);
                        (cast(a, x, kind), cast(b, y, kind), Ty::Scalar(kind))
                    }
                    (Ty::Ptr { elem: x, readonly: r1 }, Ty::Ptr { elem: y, readonly: r2 }) if x == y => (
                        a,
                        b,
                        Ty::Ptr {
                            elem: x,
                            readonly: r1 || r2,
                        },
                    ),
                    (x, y) => {
                        return Err(format!(
                            "incompatible operands to '?:': {} and {}",
                            describe(x),
                            describe(y)
                        ))
                    }
                };
                Ok((Ir::Ternary(Box::new(cond), Box::new(a), Box::new(b)), ty))
            }
            Expr::Cast(kind, operand) => {
                let (ir, from) = self.scalar(operand)?;
                Ok((cast(ir, from, *kind), Ty::Scalar(*kind)))
            }
        }
    }

    fn pointer(&mut self, expr: &Expr) -> CResult<(Ir, ScalarKind)> {
        match self.expr(expr)? {
            (ir, Ty::Ptr { elem, .. }) => Ok((ir, elem)),
            (_, ty) => Err(format!("subscripted value is {}, not a pointer", describe(ty))),
        }
    }

    fn grid_var(&mut self, base: &Expr, field: &str) -> CResult<(Ir, Ty)> {
        let var = match base {
            Expr::Ident(name) if self.lookup(name).is_none() => GridVar::from_name(name),
            _ => None,
        }
        .ok_or_else(|| format!("member access '.{}' on a non-grid value", field))?;
        if self.launch != LaunchModel::Grid {
            return Err("grid builtins are only available in natively launched kernels".to_string());
        }
        let axis = match field {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            other => return Err(format!("no member '{}' on a grid builtin", other)),
        };
        Ok((Ir::Grid(var, axis), Ty::Scalar(ScalarKind::U32)))
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> CResult<(Ir, Ty)> {
        let (func, single) = Builtin::from_name(name).ok_or_else(|| format!("call to unknown function '{}'", name))?;
        if args.len() != func.arity() {
            return Err(format!(
                "'{}' takes {} argument(s), {} given",
                name,
                func.arity(),
                args.len()
            ));
        }
        let mut compiled = Vec::with_capacity(args.len());
        for arg in args {
            compiled.push(self.scalar(arg)?);
        }
        let mut kind = compiled
            .iter()
            .map(|(_, k)| *k)
            .reduce(ScalarKind::common)
            .unwrap_or(ScalarKind::F64);
        if single {
            kind = ScalarKind::F32;
        } else if func.is_float_only() && kind.is_integer() {
            kind = ScalarKind::F64;
        }
        let args = compiled.into_iter().map(|(ir, k)| cast(ir, k, kind)).collect();
        Ok((Ir::Call { func, kind, args }, Ty::Scalar(kind)))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) -> CResult<(Ir, Ty)> {
        match op {
            UnaryOp::Plus | UnaryOp::Neg | UnaryOp::BitNot => {
                let (ir, kind) = self.scalar(operand)?;
                let promoted = kind.promoted();
                if op == UnaryOp::BitNot && promoted.is_float() {
                    return Err("operand of '~' must be an integer".to_string());
                }
                Ok((Ir::Unary(op, Box::new(cast(ir, kind, promoted))), Ty::Scalar(promoted)))
            }
            UnaryOp::Not => {
                let (ir, _) = self.expr(operand)?;
                Ok((Ir::Unary(op, Box::new(ir)), Ty::Scalar(ScalarKind::I32)))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let (place, ty) = self.place(operand)?;
                let kind = match ty {
                    Ty::Scalar(kind) => kind,
                    Ty::Ptr { .. } => return Err("pointer increment is not supported".to_string()),
                };
                Ok((
                    Ir::Step {
                        place,
                        kind,
                        increment: matches!(op, UnaryOp::PreInc | UnaryOp::PostInc),
                        prefix: matches!(op, UnaryOp::PreInc | UnaryOp::PreDec),
                    },
                    Ty::Scalar(kind),
                ))
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> CResult<(Ir, Ty)> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let (lhs, _) = self.expr(lhs)?;
            let (rhs, _) = self.expr(rhs)?;
            return Ok((
                Ir::Logical {
                    or: op == BinaryOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                Ty::Scalar(ScalarKind::I32),
            ));
        }

        let (l, l_ty) = self.expr(lhs)?;
        let (r, r_ty) = self.expr(rhs)?;
        match (l_ty, r_ty) {
            (Ty::Scalar(a), Ty::Scalar(b)) => {
                let kind = operator_kind(op, a, b)?;
                let result = if op.is_comparison() {
                    ScalarKind::I32
                } else {
                    kind
                };
                Ok((
                    Ir::Binary(op, Box::new(cast(l, a, kind)), Box::new(cast(r, b, kind))),
                    Ty::Scalar(result),
                ))
            }
            (ptr_ty @ Ty::Ptr { .. }, Ty::Scalar(k)) if k.is_integer() && matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
                let mut offset = cast(r, k, ScalarKind::I64);
                if op == BinaryOp::Sub {
                    offset = Ir::Unary(UnaryOp::Neg, Box::new(offset));
                }
                Ok((
                    Ir::PtrAdd {
                        ptr: Box::new(l),
                        offset: Box::new(offset),
                    },
                    ptr_ty,
                ))
            }
            (Ty::Scalar(k), ptr_ty @ Ty::Ptr { .. }) if k.is_integer() && op == BinaryOp::Add => Ok((
                Ir::PtrAdd {
                    ptr: Box::new(r),
                    offset: Box::new(cast(l, k, ScalarKind::I64)),
                },
                ptr_ty,
            )),
            (a, b) => Err(format!(
                "invalid operands to '{}': {} and {}",
                op.symbol(),
                describe(a),
                describe(b)
            )),
        }
    }

    fn assign(&mut self, op: Option<BinaryOp>, lhs: &Expr, rhs: &Expr) -> CResult<(Ir, Ty)> {
        let (place, place_ty) = self.place(lhs)?;
        let (value, value_ty) = self.expr(rhs)?;
        match op {
            None => {
                let value = self.convert(value, value_ty, place_ty)?;
                Ok((
                    Ir::Assign {
                        place,
                        value: Box::new(value),
                    },
                    place_ty,
                ))
            }
            Some(op) => {
                let (kind, rhs_kind) = match (place_ty, value_ty) {
                    (Ty::Scalar(kind), Ty::Scalar(rhs_kind)) => (kind, rhs_kind),
                    _ => return Err(format!("invalid operands to '{}='", op.symbol())),
                };
                let op_kind = operator_kind(op, kind, rhs_kind)?;
                Ok((
                    Ir::Compound {
                        place,
                        op,
                        op_kind,
                        kind,
                        rhs: Box::new(cast(value, rhs_kind, op_kind)),
                    },
                    Ty::Scalar(kind),
                ))
            }
        }
    }

    fn place(&mut self, expr: &Expr) -> CResult<(Place, Ty)> {
        match expr {
            Expr::Ident(name) => {
                let var = self
                    .lookup(name)
                    .ok_or_else(|| format!("use of undeclared identifier '{}'", name))?;
                if var.is_const {
                    return Err(format!("cannot assign to read-only '{}'", name));
                }
                Ok((Place::Slot(var.slot), var.ty))
            }
            Expr::Index(base, index) => {
                let (ptr, ty) = self.expr(base)?;
                let elem = match ty {
                    Ty::Ptr { readonly: true, .. } => {
                        return Err("cannot write through a pointer to const".to_string());
                    }
                    Ty::Ptr { elem, .. } => elem,
                    other => return Err(format!("subscripted value is {}, not a pointer", describe(other))),
                };
                let index = self.integer(index, "array index")?;
                Ok((
                    Place::Elem {
                        ptr: Box::new(ptr),
                        index: Box::new(index),
                        elem,
                    },
                    Ty::Scalar(elem),
                ))
            }
            _ => Err("expression is not assignable".to_string()),
        }
    }
}

/// The kind an arithmetic operator computes in.
fn operator_kind(op: BinaryOp, a: ScalarKind, b: ScalarKind) -> CResult<ScalarKind> {
    let kind = match op {
        BinaryOp::Shl | BinaryOp::Shr => a.promoted(),
        _ => ScalarKind::common(a, b),
    };
    let integer_only = matches!(
        op,
        BinaryOp::Rem | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
    );
    if integer_only && (a.is_float() || b.is_float()) {
        return Err(format!("invalid floating operands to '{}'", op.symbol()));
    }
    Ok(kind)
}

fn cast(ir: Ir, from: ScalarKind, to: ScalarKind) -> Ir {
    if from == to {
        return ir;
    }
    match ir {
        Ir::Const(value) => Ir::Const(value.cast(to)),
        ir => Ir::Cast(Box::new(ir), to),
    }
}

fn describe(ty: Ty) -> String {
    match ty {
        Ty::Scalar(kind) => format!("'{}'", kind),
        Ty::Ptr { elem, readonly: true } => format!("'const {} *'", elem),
        Ty::Ptr { elem, .. } => format!("'{} *'", elem),
    }
}

fn is_ident(expr: &Expr, name: &str) -> bool {
    matches!(expr, Expr::Ident(n) if n == name)
}

fn mentions(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Ident(n) => n == name,
        Expr::Int(..) | Expr::Float(..) | Expr::Bool(_) => false,
        Expr::Member(base, _) | Expr::Unary(_, base) | Expr::Cast(_, base) => mentions(base, name),
        Expr::Index(a, b) | Expr::Binary(_, a, b) | Expr::Assign(_, a, b) => mentions(a, name) || mentions(b, name),
        Expr::Ternary(a, b, c) => mentions(a, name) || mentions(b, name) || mentions(c, name),
        Expr::Call(_, args) => args.iter().any(|arg| mentions(arg, name)),
    }
}

/// Whether `stmt` contains a `break` that would leave the enclosing loop.
fn breaks_out(stmt: &ast::Stmt) -> bool {
    match stmt {
        ast::Stmt::Break => true,
        ast::Stmt::Block(block) => block.stmts.iter().any(breaks_out),
        ast::Stmt::If {
            then_branch,
            else_branch,
            ..
        } => breaks_out(then_branch) || else_branch.as_deref().is_some_and(breaks_out),
        _ => false,
    }
}
