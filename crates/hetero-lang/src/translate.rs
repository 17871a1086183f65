//! OKL to CPU-dialect translation.
//!
//! ```text
//! OKL source ──► parse (defines applied) ──► validate loop attributes
//!            ──► expand @tile ──► strip attributes ──► print dialect source
//! ```
//!
//! Rules enforced on the portable kernel:
//!
//! - the entry point carries `@kernel` and contains at least one `@outer` loop
//! - `@inner` loops appear only inside `@outer` loops, never the reverse
//! - `@shared` arrays and `@barrier` live inside an `@outer` loop but outside
//!   any `@inner` loop
//! - attributed loops have the canonical `for (T i = a; i < b; ++i)` shape
//!
//! For the OpenMP dialect every outermost `@outer` loop is annotated with
//! `#pragma omp parallel for`. Inner loops run sequentially, so `@barrier`
//! has nothing left to synchronize and is dropped.

use crate::ast::{Attribute, BinaryOp, Block, Expr, ForLoop, Function, Stmt, UnaryOp, VarDecl};
use crate::error::{LangError, Result};
use crate::parser::parse_with_defines;
use crate::printer::Printer;
use crate::types::{Dialect, KernelMetadata, LaunchModel, ParamInfo};

pub const OMP_PARALLEL_FOR: &str = "omp parallel for";

/// Translated source plus what the runtime needs to call it.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub source: String,
    pub metadata: KernelMetadata,
}

/// Signature summary for `function`.
pub fn kernel_metadata(function: &Function, launch: LaunchModel) -> KernelMetadata {
    KernelMetadata {
        name: function.name.clone(),
        params: function
            .params
            .iter()
            .map(|p| ParamInfo {
                name: p.name.clone(),
                ty: p.ty,
            })
            .collect(),
        launch,
    }
}

/// Translate the `@kernel` named `entry` in `source` to `dialect`.
#[tracing::instrument(skip(source, dialect, defines), fields(dialect = %dialect, source_len = source.len()))]
pub fn translate(source: &str, entry: &str, dialect: Dialect, defines: &[(String, String)]) -> Result<Translation> {
    let unit = parse_with_defines(source, defines.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let kernel = unit
        .function(entry)
        .ok_or_else(|| LangError::KernelNotFound(entry.to_string()))?;
    if !kernel.is_kernel {
        return Err(LangError::semantic(entry, "entry point is not marked @kernel"));
    }

    let mut translator = LoopTranslator {
        kernel: entry,
        dialect,
        outer_loops: 0,
    };
    let body = translator.block(&kernel.body, Context::default())?;
    if translator.outer_loops == 0 {
        return Err(LangError::semantic(entry, "kernel has no @outer loop"));
    }

    let translated = Function {
        body,
        is_kernel: false,
        is_native_entry: true,
        ..kernel.clone()
    };

    let mut printer = Printer::new();
    printer.line(&format!("// {dialect} translation of '{entry}'"));
    for (name, value) in defines {
        printer.line(&format!("#define {name} {value}"));
    }
    printer.function(&translated, "extern \"C\"");

    tracing::debug!(entry, outer_loops = translator.outer_loops, "okl_translated");

    Ok(Translation {
        source: printer.finish(),
        metadata: kernel_metadata(kernel, LaunchModel::Loops),
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    in_outer: bool,
    in_inner: bool,
}

struct LoopTranslator<'a> {
    kernel: &'a str,
    dialect: Dialect,
    outer_loops: usize,
}

impl LoopTranslator<'_> {
    fn error(&self, message: impl Into<String>) -> LangError {
        LangError::semantic(self.kernel, message)
    }

    fn block(&mut self, block: &Block, ctx: Context) -> Result<Block> {
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in &block.stmts {
            if let Some(stmt) = self.stmt(stmt, ctx)? {
                stmts.push(stmt);
            }
        }
        Ok(Block { stmts })
    }

    fn boxed(&mut self, stmt: &Stmt, ctx: Context) -> Result<Box<Stmt>> {
        Ok(Box::new(self.stmt(stmt, ctx)?.unwrap_or(Stmt::Empty)))
    }

    fn stmt(&mut self, stmt: &Stmt, ctx: Context) -> Result<Option<Stmt>> {
        let translated = match stmt {
            Stmt::For(loop_) => self.for_loop(loop_, ctx)?,
            Stmt::Decl(vars) => Stmt::Decl(self.decl(vars, ctx)?),
            Stmt::Barrier(location) => {
                if !ctx.in_outer || ctx.in_inner {
                    return Err(self.error(format!(
                        "{location}: @barrier must be inside an @outer loop and outside @inner loops"
                    )));
                }
                return Ok(None);
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => Stmt::If {
                cond: cond.clone(),
                then_branch: self.boxed(then_branch, ctx)?,
                else_branch: match else_branch {
                    Some(stmt) => Some(self.boxed(stmt, ctx)?),
                    None => None,
                },
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: cond.clone(),
                body: self.boxed(body, ctx)?,
            },
            Stmt::Block(block) => Stmt::Block(self.block(block, ctx)?),
            other => other.clone(),
        };
        Ok(Some(translated))
    }

    fn decl(&mut self, vars: &[VarDecl], ctx: Context) -> Result<Vec<VarDecl>> {
        let mut out = Vec::with_capacity(vars.len());
        for var in vars {
            for attr in &var.attrs {
                match attr {
                    Attribute::Shared => {
                        if !ctx.in_outer || ctx.in_inner {
                            return Err(self.error(format!(
                                "{}: @shared '{}' must be declared inside an @outer loop and outside @inner loops",
                                var.location, var.name
                            )));
                        }
                        if var.array_len.is_none() {
                            return Err(self.error(format!("{}: @shared '{}' must be an array", var.location, var.name)));
                        }
                    }
                    Attribute::Restrict => {}
                    Attribute::Exclusive => {
                        return Err(self.error(format!(
                            "{}: @exclusive '{}' is not supported by the CPU translator",
                            var.location, var.name
                        )))
                    }
                    other => {
                        return Err(self.error(format!(
                            "{}: attribute @{} is not valid on a declaration",
                            var.location,
                            other.name()
                        )))
                    }
                }
            }
            out.push(VarDecl {
                attrs: Vec::new(),
                ..var.clone()
            });
        }
        Ok(out)
    }

    fn for_loop(&mut self, loop_: &ForLoop, ctx: Context) -> Result<Stmt> {
        let mut role: Option<&Attribute> = None;
        for attr in &loop_.attrs {
            match attr {
                Attribute::Outer(_) | Attribute::Inner(_) | Attribute::Tile { .. } => {
                    if role.is_some() {
                        return Err(self.error(format!("{}: loop carries more than one loop attribute", loop_.location)));
                    }
                    role = Some(attr);
                }
                other => {
                    return Err(self.error(format!(
                        "{}: attribute @{} is not valid on a loop",
                        loop_.location,
                        other.name()
                    )))
                }
            }
        }

        match role {
            None => {
                let body = self.boxed(&loop_.body, ctx)?;
                Ok(Stmt::For(ForLoop {
                    body,
                    ..loop_.clone()
                }))
            }
            Some(Attribute::Tile { size, loops }) => {
                let expanded = self.expand_tile(loop_, size, loops)?;
                self.for_loop(&expanded, ctx)
            }
            Some(Attribute::Outer(_)) => {
                if ctx.in_inner {
                    return Err(self.error(format!("{}: @outer loop nested inside an @inner loop", loop_.location)));
                }
                self.canonical_var(loop_)?;
                self.outer_loops += 1;
                let pragma = match (self.dialect, ctx.in_outer) {
                    (Dialect::OpenMp, false) => Some(OMP_PARALLEL_FOR.to_string()),
                    _ => loop_.pragma.clone(),
                };
                let body = self.boxed(
                    &loop_.body,
                    Context {
                        in_outer: true,
                        in_inner: false,
                    },
                )?;
                Ok(Stmt::For(ForLoop {
                    attrs: Vec::new(),
                    pragma,
                    body,
                    ..loop_.clone()
                }))
            }
            Some(_) => {
                if !ctx.in_outer {
                    return Err(self.error(format!(
                        "{}: @inner loop must be nested inside an @outer loop",
                        loop_.location
                    )));
                }
                self.canonical_var(loop_)?;
                let body = self.boxed(
                    &loop_.body,
                    Context {
                        in_outer: true,
                        in_inner: true,
                    },
                )?;
                Ok(Stmt::For(ForLoop {
                    attrs: Vec::new(),
                    body,
                    ..loop_.clone()
                }))
            }
        }
    }

    /// Loop variable of a `for (T i = a; i <op> b; <step i>)` loop.
    fn canonical_var<'l>(&self, loop_: &'l ForLoop) -> Result<&'l VarDecl> {
        let var = match loop_.init.as_deref() {
            Some(Stmt::Decl(vars)) if vars.len() == 1 && vars[0].init.is_some() && !vars[0].pointer => &vars[0],
            _ => {
                return Err(self.error(format!(
                    "{}: attributed loops must declare and initialize a single loop variable",
                    loop_.location
                )))
            }
        };
        let is_var = |expr: &Expr| matches!(expr, Expr::Ident(name) if *name == var.name);

        let cond_ok = matches!(
            &loop_.cond,
            Some(Expr::Binary(BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, lhs, _)) if is_var(lhs.as_ref())
        );
        let step_ok = match &loop_.step {
            Some(Expr::Unary(UnaryOp::PreInc | UnaryOp::PostInc | UnaryOp::PreDec | UnaryOp::PostDec, target)) => {
                is_var(target.as_ref())
            }
            Some(Expr::Assign(Some(BinaryOp::Add | BinaryOp::Sub), target, _)) => is_var(target.as_ref()),
            _ => false,
        };
        if !cond_ok || !step_ok {
            return Err(self.error(format!(
                "{}: attributed loop over '{}' must compare and step its loop variable",
                loop_.location, var.name
            )));
        }
        Ok(var)
    }

    fn expand_tile(&self, loop_: &ForLoop, size: &Expr, loops: &[Attribute]) -> Result<ForLoop> {
        let var = self.canonical_var(loop_)?.clone();
        let unit_step = match &loop_.step {
            Some(Expr::Unary(UnaryOp::PreInc | UnaryOp::PostInc, _)) => true,
            Some(Expr::Assign(Some(BinaryOp::Add), _, step)) => matches!(step.as_ref(), Expr::Int(1, _)),
            _ => false,
        };
        let (cmp, bound) = match &loop_.cond {
            Some(Expr::Binary(op @ (BinaryOp::Lt | BinaryOp::Le), _, bound)) => (*op, bound.as_ref().clone()),
            _ => unit_step_error(self, loop_)?,
        };
        if !unit_step {
            return unit_step_error(self, loop_);
        }

        let tile_var = format!("_tile_{}", var.name);
        let tile = Expr::ident(tile_var.clone());
        let inner_attr = loops.get(1).cloned().into_iter().collect();
        let outer_attr = loops.first().cloned().into_iter().collect();

        let guard = Stmt::If {
            cond: Expr::binary(cmp, Expr::ident(var.name.clone()), bound.clone()),
            then_branch: loop_.body.clone(),
            else_branch: None,
        };
        let inner = ForLoop {
            init: Some(Box::new(Stmt::Decl(vec![VarDecl {
                init: Some(tile.clone()),
                ..var.clone()
            }]))),
            cond: Some(Expr::binary(
                BinaryOp::Lt,
                Expr::ident(var.name.clone()),
                Expr::binary(BinaryOp::Add, tile.clone(), size.clone()),
            )),
            step: Some(Expr::Unary(UnaryOp::PreInc, Box::new(Expr::ident(var.name.clone())))),
            attrs: inner_attr,
            pragma: None,
            body: Box::new(Stmt::Block(Block { stmts: vec![guard] })),
            location: loop_.location,
        };
        Ok(ForLoop {
            init: Some(Box::new(Stmt::Decl(vec![VarDecl {
                name: tile_var,
                ..var.clone()
            }]))),
            cond: Some(Expr::binary(cmp, tile.clone(), bound)),
            step: Some(Expr::Assign(Some(BinaryOp::Add), Box::new(tile), Box::new(size.clone()))),
            attrs: outer_attr,
            pragma: loop_.pragma.clone(),
            body: Box::new(Stmt::Block(Block {
                stmts: vec![Stmt::For(inner)],
            })),
            location: loop_.location,
        })
    }
}

fn unit_step_error<T>(translator: &LoopTranslator<'_>, loop_: &ForLoop) -> Result<T> {
    Err(translator.error(format!(
        "{}: @tile requires an increasing unit-stride loop bounded with '<' or '<='",
        loop_.location
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const ADD_VECTORS: &str = r#"
        @kernel void addVectors(const int entries, const float *a, const float *b, float *ab) {
          for (int i = 0; i < entries; ++i; @tile(TILE_SIZE, @outer, @inner)) {
            ab[i] = a[i] + b[i];
          }
        }
    "#;

    fn defines() -> Vec<(String, String)> {
        vec![("TILE_SIZE".to_string(), "16".to_string())]
    }

    #[test]
    fn test_tile_expands_to_guarded_loop_nest() {
        let translation = translate(ADD_VECTORS, "addVectors", Dialect::Serial, &defines()).unwrap();
        let src = &translation.source;
        assert!(src.contains("for (int _tile_i = 0; _tile_i < entries; _tile_i += 16) {"), "{src}");
        assert!(src.contains("for (int i = _tile_i; i < _tile_i + 16; ++i) {"), "{src}");
        assert!(src.contains("if (i < entries) {"), "{src}");
        assert!(!src.contains('@'), "attributes must be stripped: {src}");
        assert!(!src.contains("#pragma"), "{src}");
        assert_eq!(translation.metadata.params.len(), 4);
        assert_eq!(translation.metadata.launch, LaunchModel::Loops);
    }

    #[test]
    fn test_openmp_marks_outermost_loop_only() {
        let src = r#"
            @kernel void k(int n, float *x) {
              for (int b = 0; b < n; ++b; @outer(0)) {
                for (int c = 0; c < 2; ++c; @outer(1)) {
                  for (int t = 0; t < 4; ++t; @inner) { x[b] = t; }
                }
              }
            }
        "#;
        let translation = translate(src, "k", Dialect::OpenMp, &[]).unwrap();
        assert_eq!(translation.source.matches("#pragma omp parallel for").count(), 1);
    }

    #[test]
    fn test_translated_source_parses_as_native_function() {
        let translation = translate(ADD_VECTORS, "addVectors", Dialect::OpenMp, &defines()).unwrap();
        let unit = parse(&translation.source).unwrap();
        let function = unit.function("addVectors").unwrap();
        assert!(function.is_native_entry);
        let Stmt::For(outer) = &function.body.stmts[0] else {
            panic!("expected loop");
        };
        assert_eq!(outer.pragma.as_deref(), Some(OMP_PARALLEL_FOR));
    }

    #[test]
    fn test_inner_outside_outer_is_rejected() {
        let src = "@kernel void k(int n) { for (int i = 0; i < n; ++i; @inner) {} }";
        let err = translate(src, "k", Dialect::Serial, &[]).unwrap_err();
        assert!(err.to_string().contains("@inner loop must be nested"), "{err}");
    }

    #[test]
    fn test_kernel_without_outer_loop_is_rejected() {
        let src = "@kernel void k(int n, int *x) { x[0] = n; }";
        let err = translate(src, "k", Dialect::Serial, &[]).unwrap_err();
        assert!(err.to_string().contains("no @outer loop"));
    }

    #[test]
    fn test_missing_entry_and_unmarked_function() {
        assert!(matches!(
            translate(ADD_VECTORS, "missing", Dialect::Serial, &defines()),
            Err(LangError::KernelNotFound(_))
        ));
        let src = "void helper(int n) { }";
        assert!(translate(src, "helper", Dialect::Serial, &[]).is_err());
    }

    #[test]
    fn test_shared_and_barrier_placement() {
        let good = r#"
            @kernel void k(double *x) {
              for (int b = 0; b < 2; ++b; @outer) {
                @shared double s[4];
                for (int t = 0; t < 4; ++t; @inner) { s[t] = t; }
                @barrier;
                for (int t = 0; t < 4; ++t; @inner) { x[b * 4 + t] = s[3 - t]; }
              }
            }
        "#;
        let translation = translate(good, "k", Dialect::Serial, &[]).unwrap();
        assert!(translation.source.contains("double s[4];"));

        let bad = r#"
            @kernel void k(double *x) {
              for (int b = 0; b < 2; ++b; @outer) {
                for (int t = 0; t < 4; ++t; @inner) { @barrier; }
              }
            }
        "#;
        assert!(translate(bad, "k", Dialect::Serial, &[]).is_err());
    }

    #[test]
    fn test_non_canonical_attributed_loop_is_rejected() {
        let src = "@kernel void k(int n) { int i; for (i = 0; i < n; ++i; @outer) {} }";
        assert!(translate(src, "k", Dialect::Serial, &[]).is_err());
    }
}
