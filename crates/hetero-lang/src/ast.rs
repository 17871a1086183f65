//! Abstract syntax tree for kernel sources.
//!
//! The same tree represents portable (attributed) kernels and the CPU
//! dialects the translator emits; dialect source simply carries no
//! attributes and may carry `#pragma` annotations on loops.

use crate::error::Location;
use crate::types::{ParamType, ScalarKind};

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub functions: Vec<Function>,
}

impl TranslationUnit {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    /// Marked `@kernel`.
    pub is_kernel: bool,
    /// Carried `extern "C"`, `__global__` or similar native qualifiers.
    pub is_native_entry: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    pub restrict: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Outer(Option<u32>),
    Inner(Option<u32>),
    /// `@tile(size, @outer, @inner)`; `loops` holds the attributes applied to
    /// the generated outer and inner loops.
    Tile { size: Expr, loops: Vec<Attribute> },
    Shared,
    Exclusive,
    Restrict,
    Other(String),
}

impl Attribute {
    pub fn name(&self) -> &str {
        match self {
            Attribute::Outer(_) => "outer",
            Attribute::Inner(_) => "inner",
            Attribute::Tile { .. } => "tile",
            Attribute::Shared => "shared",
            Attribute::Exclusive => "exclusive",
            Attribute::Restrict => "restrict",
            Attribute::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub scalar: ScalarKind,
    pub pointer: bool,
    pub is_const: bool,
    /// Element count for `T name[N]`.
    pub array_len: Option<Expr>,
    pub init: Option<Expr>,
    pub attrs: Vec<Attribute>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub step: Option<Expr>,
    pub attrs: Vec<Attribute>,
    pub pragma: Option<String>,
    pub body: Box<Stmt>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl(Vec<VarDecl>),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    For(ForLoop),
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Block(Block),
    Return,
    Break,
    Continue,
    /// `@barrier` (or `@barrier("local")`)
    Barrier(Location),
    /// A `#pragma` that did not attach to a loop.
    Pragma(String),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding power, higher binds tighter.
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 7,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 10,
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(u64, ScalarKind),
    Float(f64, ScalarKind),
    Bool(bool),
    Ident(String),
    /// `base.field`, only used for grid builtins such as `threadIdx.x`.
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `lhs = rhs` or `lhs op= rhs`.
    Assign(Option<BinaryOp>, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(ScalarKind, Box<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(name.into())
    }

    pub fn int(value: i32) -> Expr {
        Expr::Int(value as u64, ScalarKind::I32)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}
