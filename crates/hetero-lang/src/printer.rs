//! Renders a syntax tree back to C-like source text.
//!
//! The output re-parses to an equal tree, which is what lets translated
//! dialect source travel through caches and the backend compiler as text.

use crate::ast::{Attribute, BinaryOp, Block, Expr, ForLoop, Function, Stmt, UnaryOp, VarDecl};
use crate::types::ScalarKind;
use std::fmt::Write;

const INDENT: &str = "  ";

// Binding levels used to decide where parentheses are required.
const LEVEL_ASSIGN: u8 = 1;
const LEVEL_TERNARY: u8 = 2;
const LEVEL_UNARY: u8 = 14;
const LEVEL_POSTFIX: u8 = 15;

fn binary_level(op: BinaryOp) -> u8 {
    3 + op.precedence()
}

fn level(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign(..) => LEVEL_ASSIGN,
        Expr::Ternary(..) => LEVEL_TERNARY,
        Expr::Binary(op, ..) => binary_level(*op),
        Expr::Unary(UnaryOp::PostInc | UnaryOp::PostDec, _) => LEVEL_POSTFIX,
        Expr::Unary(..) | Expr::Cast(..) => LEVEL_UNARY,
        _ => LEVEL_POSTFIX,
    }
}

pub fn literal_int(value: u64, kind: ScalarKind) -> String {
    match kind {
        ScalarKind::U32 => format!("{value}u"),
        ScalarKind::I64 => format!("{value}l"),
        ScalarKind::U64 => format!("{value}ul"),
        _ => value.to_string(),
    }
}

pub fn literal_float(value: f64, kind: ScalarKind) -> String {
    if kind == ScalarKind::F32 {
        format!("{:?}f", value as f32)
    } else {
        format!("{value:?}")
    }
}

pub fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr, 0);
    out
}

fn write_expr(out: &mut String, expr: &Expr, min_level: u8) {
    let wrap = level(expr) < min_level;
    if wrap {
        out.push('(');
    }
    match expr {
        Expr::Int(value, kind) => out.push_str(&literal_int(*value, *kind)),
        Expr::Float(value, kind) => out.push_str(&literal_float(*value, *kind)),
        Expr::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        Expr::Ident(name) => out.push_str(name),
        Expr::Member(base, field) => {
            write_expr(out, base, LEVEL_POSTFIX);
            out.push('.');
            out.push_str(field);
        }
        Expr::Index(base, index) => {
            write_expr(out, base, LEVEL_POSTFIX);
            out.push('[');
            write_expr(out, index, 0);
            out.push(']');
        }
        Expr::Call(name, args) => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg, LEVEL_ASSIGN);
            }
            out.push(')');
        }
        Expr::Unary(op, operand) => match op {
            UnaryOp::PostInc | UnaryOp::PostDec => {
                write_expr(out, operand, LEVEL_POSTFIX);
                out.push_str(if *op == UnaryOp::PostInc { "++" } else { "--" });
            }
            _ => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::PreInc => "++",
                    _ => "--",
                };
                out.push_str(symbol);
                // keep `- -x` from turning into `--x`
                if matches!(operand.as_ref(), Expr::Unary(UnaryOp::Neg | UnaryOp::PreDec | UnaryOp::Plus | UnaryOp::PreInc, _)) {
                    out.push(' ');
                }
                write_expr(out, operand, LEVEL_UNARY);
            }
        },
        Expr::Binary(op, lhs, rhs) => {
            let own = binary_level(*op);
            write_expr(out, lhs, own);
            let _ = write!(out, " {} ", op.symbol());
            write_expr(out, rhs, own + 1);
        }
        Expr::Assign(op, lhs, rhs) => {
            write_expr(out, lhs, LEVEL_UNARY);
            match op {
                Some(op) => {
                    let _ = write!(out, " {}= ", op.symbol());
                }
                None => out.push_str(" = "),
            }
            write_expr(out, rhs, LEVEL_ASSIGN);
        }
        Expr::Ternary(cond, then_value, else_value) => {
            write_expr(out, cond, LEVEL_TERNARY + 1);
            out.push_str(" ? ");
            write_expr(out, then_value, 0);
            out.push_str(" : ");
            write_expr(out, else_value, LEVEL_TERNARY);
        }
        Expr::Cast(kind, operand) => {
            let _ = write!(out, "({})", kind.c_name());
            write_expr(out, operand, LEVEL_UNARY);
        }
    }
    if wrap {
        out.push(')');
    }
}

fn print_attribute(attr: &Attribute) -> String {
    match attr {
        Attribute::Outer(Some(dim)) => format!("@outer({dim})"),
        Attribute::Inner(Some(dim)) => format!("@inner({dim})"),
        Attribute::Tile { size, loops } => {
            let mut text = format!("@tile({}", print_expr(size));
            for attr in loops {
                text.push_str(", ");
                text.push_str(&print_attribute(attr));
            }
            text.push(')');
            text
        }
        other => format!("@{}", other.name()),
    }
}

fn decl_text(vars: &[VarDecl]) -> String {
    let Some(first) = vars.first() else {
        return String::new();
    };
    let mut text = String::new();
    for attr in &first.attrs {
        text.push_str(&print_attribute(attr));
        text.push(' ');
    }
    if first.is_const {
        text.push_str("const ");
    }
    text.push_str(first.scalar.c_name());
    text.push(' ');
    for (i, var) in vars.iter().enumerate() {
        if i > 0 {
            text.push_str(", ");
        }
        if var.pointer {
            text.push('*');
        }
        text.push_str(&var.name);
        if let Some(len) = &var.array_len {
            let _ = write!(text, "[{}]", print_expr(len));
        }
        if let Some(init) = &var.init {
            let _ = write!(text, " = {}", print_expr(init));
        }
    }
    text
}

/// Source printer with configurable entry qualifiers.
pub struct Printer {
    out: String,
    depth: usize,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Printer {
            out: String::new(),
            depth: 0,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Emit `function`, prefixed by `qualifiers` (e.g. `extern "C"`).
    pub fn function(&mut self, function: &Function, qualifiers: &str) {
        let params = function
            .params
            .iter()
            .map(|p| {
                let mut text = p.ty.to_string();
                if p.ty.pointer && p.restrict {
                    text.push_str(" __restrict__ ");
                } else if !p.ty.pointer {
                    text.push(' ');
                }
                text.push_str(&p.name);
                text
            })
            .collect::<Vec<_>>()
            .join(", ");
        let prefix = match (function.is_kernel, qualifiers.is_empty()) {
            (true, true) => "@kernel ".to_string(),
            (_, false) => format!("{qualifiers} "),
            (false, true) => String::new(),
        };
        self.line(&format!("{prefix}void {}({params}) {{", function.name));
        self.depth += 1;
        for stmt in &function.body.stmts {
            self.stmt(stmt);
        }
        self.depth -= 1;
        self.line("}");
    }

    fn block(&mut self, block: &Block) {
        self.depth += 1;
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.depth -= 1;
    }

    /// Body of a compound statement; non-blocks get their own indented line.
    fn nested(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.block(block),
            other => {
                self.depth += 1;
                self.stmt(other);
                self.depth -= 1;
            }
        }
    }

    fn for_header(&mut self, loop_: &ForLoop) -> String {
        let init = match loop_.init.as_deref() {
            Some(Stmt::Decl(vars)) => decl_text(vars),
            Some(Stmt::Expr(expr)) => print_expr(expr),
            _ => String::new(),
        };
        let cond = loop_.cond.as_ref().map(print_expr).unwrap_or_default();
        let step = loop_.step.as_ref().map(print_expr).unwrap_or_default();
        let mut header = format!("for ({init}; {cond}; {step}");
        if !loop_.attrs.is_empty() {
            header.push_str("; ");
            header.push_str(&loop_.attrs.iter().map(print_attribute).collect::<Vec<_>>().join(" "));
        }
        header.push(')');
        header
    }

    pub fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl(vars) => {
                let text = decl_text(vars);
                self.line(&format!("{text};"));
            }
            Stmt::Expr(expr) => self.line(&format!("{};", print_expr(expr))),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.line(&format!("if ({}) {{", print_expr(cond)));
                self.nested(then_branch);
                match else_branch {
                    Some(else_branch) => {
                        self.line("} else {");
                        self.nested(else_branch);
                        self.line("}");
                    }
                    None => self.line("}"),
                }
            }
            Stmt::For(loop_) => {
                if let Some(pragma) = &loop_.pragma {
                    self.line(&format!("#pragma {pragma}"));
                }
                let header = self.for_header(loop_);
                self.line(&format!("{header} {{"));
                self.nested(&loop_.body);
                self.line("}");
            }
            Stmt::While { cond, body } => {
                self.line(&format!("while ({}) {{", print_expr(cond)));
                self.nested(body);
                self.line("}");
            }
            Stmt::Block(block) => {
                self.line("{");
                self.block(block);
                self.line("}");
            }
            Stmt::Return => self.line("return;"),
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Barrier(_) => self.line("@barrier;"),
            Stmt::Pragma(text) => self.line(&format!("#pragma {text}")),
            Stmt::Empty => self.line(";"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, Parser};

    fn reprint(src: &str) -> String {
        let expr = Parser::new(crate::lexer::tokenize(src).unwrap()).parse_expr().unwrap();
        print_expr(&expr)
    }

    #[test]
    fn test_minimal_parentheses() {
        assert_eq!(reprint("(a + b) * c"), "(a + b) * c");
        assert_eq!(reprint("a + (b * c)"), "a + b * c");
        assert_eq!(reprint("a - (b - c)"), "a - (b - c)");
        assert_eq!(reprint("-(-x)"), "- -x");
        assert_eq!(reprint("(float)(i + 1)"), "(float)(i + 1)");
    }

    #[test]
    fn test_literals_keep_their_type() {
        assert_eq!(reprint("1.5f + 2u + 3l + 0.25"), "1.5f + 2u + 3l + 0.25");
    }

    #[test]
    fn test_printing_is_a_fixed_point() {
        let src = r#"
            @kernel void k(const int n, @restrict double *x) {
              for (int i = 0; i < n; ++i; @outer) {
                double acc = 0.0, y;
                if (i % 2 == 0) { acc += x[i] * 2.0; } else acc -= 1.0;
                x[i] = i < n - 1 ? acc : -acc;
              }
            }
        "#;
        let print = |src: &str| {
            let unit = parse(src).unwrap();
            let mut printer = Printer::new();
            printer.function(&unit.functions[0], "");
            (unit, printer.finish())
        };
        let (unit, first) = print(src);
        let (reparsed, second) = print(&first);
        assert_eq!(first, second);
        assert_eq!(reparsed.functions[0].params, unit.functions[0].params);
        assert!(first.contains("for (int i = 0; i < n; ++i; @outer) {"));
        assert!(first.contains("double * __restrict__ x"));
    }
}
