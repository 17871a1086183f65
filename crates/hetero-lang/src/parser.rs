//! Recursive descent parser for kernel sources.
//!
//! ## Grammar
//!
//! ```text
//! <unit>      ::= { <function> }
//! <function>  ::= { <qualifier> } <type> <ident> "(" [ <param> { "," <param> } ] ")" <block>
//! <qualifier> ::= "@kernel" | "extern" <string> | "__global__" | "__launch_bounds__" "(" ... ")"
//! <param>     ::= { <attr> } <type> [ "*" { "__restrict__" | "@restrict" } ] <ident>
//! <stmt>      ::= <block> | <decl> | <for> | <while> | <if> | "@barrier" ";"
//!               | "return" ";" | "break" ";" | "continue" ";" | <expr> ";" | ";"
//! <for>       ::= [ <pragma> ] "for" "(" <init> ";" [ <expr> ] ";" [ <expr> ] [ ";" { <attr> } ] ")" <stmt>
//! <decl>      ::= { <attr> } <type> <declarator> { "," <declarator> } ";"
//! <declarator>::= [ "*" ] <ident> [ "[" <expr> "]" ] { <attr> } [ "=" <expr> ]
//! ```
//!
//! Expressions follow C precedence, including casts, the ternary operator and
//! compound assignment.

use crate::ast::{Attribute, BinaryOp, Block, Expr, ForLoop, Function, Param, Stmt, TranslationUnit, UnaryOp, VarDecl};
use crate::error::{LangError, Location, Result};
use crate::lexer::{Lexer, Spanned, Token};
use crate::types::{ParamType, ScalarKind};

/// Parse `source` after substituting `defines`.
pub fn parse_with_defines<'d, I>(source: &str, defines: I) -> Result<TranslationUnit>
where
    I: IntoIterator<Item = (&'d str, &'d str)>,
{
    let tokens = Lexer::new(source).with_defines(defines)?.tokenize()?;
    Parser::new(tokens).parse_unit()
}

pub fn parse(source: &str) -> Result<TranslationUnit> {
    parse_with_defines(source, std::iter::empty())
}

fn is_type_keyword(name: &str) -> bool {
    matches!(
        name,
        "const"
            | "unsigned"
            | "signed"
            | "int"
            | "long"
            | "short"
            | "char"
            | "float"
            | "double"
            | "bool"
            | "void"
            | "uint"
            | "ulong"
            | "uchar"
            | "size_t"
    )
}

/// Result of a type specifier: `None` scalar means `void`.
struct TypeSpec {
    scalar: Option<ScalarKind>,
    is_const: bool,
}

pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, position: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|s| &s.token)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|s| s.location)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|s| s.token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(n)) if n == name)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.check_ident(name) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> LangError {
        match self.tokens.get(self.position) {
            Some(spanned) => LangError::UnexpectedToken {
                location: spanned.location,
                expected: expected.to_string(),
                found: spanned.token.to_string(),
            },
            None => LangError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_type_keyword(name) => {
                let name = name.clone();
                self.position += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn at_type(&self) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if is_type_keyword(name))
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    pub fn parse_unit(&mut self) -> Result<TranslationUnit> {
        let mut functions = Vec::new();
        while self.peek().is_some() {
            if let Some(Token::Pragma(_)) = self.peek() {
                self.position += 1;
                continue;
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            functions.push(self.parse_function()?);
        }
        Ok(TranslationUnit { functions })
    }

    fn skip_balanced_parens(&mut self) -> Result<()> {
        self.expect(Token::LParen)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance() {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => depth -= 1,
                Some(_) => {}
                None => return Err(self.unexpected("')'")),
            }
        }
        Ok(())
    }

    fn parse_function(&mut self) -> Result<Function> {
        let location = self.location();
        let mut is_kernel = false;
        let mut is_native_entry = false;

        loop {
            match self.peek().cloned() {
                Some(Token::Attr(name)) if name == "kernel" => {
                    self.position += 1;
                    is_kernel = true;
                }
                Some(Token::Ident(name)) => match name.as_str() {
                    "extern" => {
                        self.position += 1;
                        if let Some(Token::Str(_)) = self.peek() {
                            self.position += 1;
                        }
                        is_native_entry = true;
                    }
                    "__global__" | "__kernel" | "kernel" => {
                        self.position += 1;
                        is_native_entry = true;
                    }
                    "static" | "inline" | "__device__" | "__host__" => {
                        self.position += 1;
                    }
                    "__launch_bounds__" => {
                        self.position += 1;
                        self.skip_balanced_parens()?;
                    }
                    _ => break,
                },
                _ => break,
            }
        }

        if !self.at_type() {
            return Err(self.unexpected("function return type"));
        }
        self.parse_type_spec()?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;

        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;

        Ok(Function {
            name,
            params,
            body,
            is_kernel,
            is_native_entry,
            location,
        })
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec> {
        let mut is_const = false;
        let mut unsigned = false;
        let mut signed = false;
        let mut longs = 0u8;
        let mut base: Option<&'static str> = None;
        let mut seen = false;

        while let Some(Token::Ident(word)) = self.peek() {
            match word.as_str() {
                "const" => is_const = true,
                "unsigned" => unsigned = true,
                "signed" => signed = true,
                "long" => longs += 1,
                "int" | "short" | "char" | "float" | "double" | "bool" | "void" | "uint" | "ulong" | "uchar"
                | "size_t" => {
                    if base.is_some() {
                        return Err(self.unexpected("identifier"));
                    }
                    base = Some(match word.as_str() {
                        "int" => "int",
                        "short" => "short",
                        "char" => "char",
                        "float" => "float",
                        "double" => "double",
                        "bool" => "bool",
                        "void" => "void",
                        "uint" => "uint",
                        "ulong" => "ulong",
                        "uchar" => "uchar",
                        _ => "size_t",
                    });
                }
                "__restrict__" | "restrict" => {}
                _ => break,
            }
            seen = true;
            self.position += 1;
        }

        if !seen {
            return Err(self.unexpected("type"));
        }

        let scalar = match (base, longs) {
            (Some("void"), _) => None,
            (Some("bool"), _) => Some(ScalarKind::Bool),
            (Some("char") | Some("uchar"), _) => Some(ScalarKind::U8),
            (Some("float"), _) => Some(ScalarKind::F32),
            (Some("double"), _) => Some(ScalarKind::F64),
            (Some("uint"), _) => Some(ScalarKind::U32),
            (Some("ulong") | Some("size_t"), _) => Some(ScalarKind::U64),
            (_, n) if n > 0 => Some(if unsigned { ScalarKind::U64 } else { ScalarKind::I64 }),
            (Some("int") | Some("short") | None, _) => {
                if base.is_none() && !unsigned && !signed {
                    return Err(self.unexpected("type"));
                }
                Some(if unsigned { ScalarKind::U32 } else { ScalarKind::I32 })
            }
            _ => return Err(self.unexpected("type")),
        };

        Ok(TypeSpec { scalar, is_const })
    }

    fn skip_pointer_qualifiers(&mut self) -> bool {
        let mut restrict = false;
        loop {
            match self.peek() {
                Some(Token::Ident(word)) if word == "__restrict__" || word == "restrict" || word == "const" => {
                    restrict |= word != "const";
                    self.position += 1;
                }
                Some(Token::Attr(name)) if name == "restrict" => {
                    restrict = true;
                    self.position += 1;
                }
                _ => return restrict,
            }
        }
    }

    fn parse_param(&mut self) -> Result<Param> {
        let mut restrict = false;
        while let Some(Token::Attr(_)) = self.peek() {
            let attr = self.parse_attribute()?;
            restrict |= attr == Attribute::Restrict;
        }
        let spec = self.parse_type_spec()?;
        let scalar = spec.scalar.ok_or_else(|| self.unexpected("parameter type"))?;
        let pointer = self.eat(&Token::Star);
        if pointer {
            restrict |= self.skip_pointer_qualifiers();
        }
        let name = self.expect_ident()?;
        while let Some(Token::Attr(_)) = self.peek() {
            let attr = self.parse_attribute()?;
            restrict |= attr == Attribute::Restrict;
        }
        Ok(Param {
            name,
            ty: ParamType {
                scalar,
                pointer,
                is_const: spec.is_const,
            },
            restrict,
        })
    }

    fn parse_attribute(&mut self) -> Result<Attribute> {
        let name = match self.advance() {
            Some(Token::Attr(name)) => name,
            _ => return Err(self.unexpected("attribute")),
        };
        let attr = match name.as_str() {
            "outer" | "inner" => {
                let mut dim = None;
                if self.eat(&Token::LParen) {
                    match self.advance() {
                        Some(Token::Int { value, .. }) if value < 3 => dim = Some(value as u32),
                        _ => return Err(self.unexpected("loop dimension 0, 1 or 2")),
                    }
                    self.expect(Token::RParen)?;
                }
                if name == "outer" {
                    Attribute::Outer(dim)
                } else {
                    Attribute::Inner(dim)
                }
            }
            "tile" => {
                self.expect(Token::LParen)?;
                let size = self.parse_assignment()?;
                let mut loops = Vec::new();
                while self.eat(&Token::Comma) {
                    if let Some(Token::Attr(_)) = self.peek() {
                        loops.push(self.parse_attribute()?);
                    } else {
                        // `check=false` style options are accepted and ignored
                        self.parse_assignment()?;
                    }
                }
                self.expect(Token::RParen)?;
                Attribute::Tile { size, loops }
            }
            "shared" => Attribute::Shared,
            "exclusive" => Attribute::Exclusive,
            "restrict" => Attribute::Restrict,
            other => {
                if self.check(&Token::LParen) {
                    self.skip_balanced_parens()?;
                }
                Attribute::Other(other.to_string())
            }
        };
        Ok(attr)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(Token::RBrace)?;
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let location = self.location();
        match self.peek().cloned() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::Semi) => {
                self.position += 1;
                Ok(Stmt::Empty)
            }
            Some(Token::Pragma(text)) => {
                self.position += 1;
                if self.check_ident("for") {
                    self.parse_for(Some(text))
                } else {
                    Ok(Stmt::Pragma(text))
                }
            }
            Some(Token::Attr(name)) if name == "barrier" => {
                self.position += 1;
                if self.check(&Token::LParen) {
                    self.skip_balanced_parens()?;
                }
                self.expect(Token::Semi)?;
                Ok(Stmt::Barrier(location))
            }
            Some(Token::Attr(_)) => {
                let mut attrs = Vec::new();
                while let Some(Token::Attr(_)) = self.peek() {
                    attrs.push(self.parse_attribute()?);
                }
                if !self.at_type() {
                    return Err(self.unexpected("declaration after attribute"));
                }
                let mut decl = self.parse_decl()?;
                for var in &mut decl {
                    var.attrs.extend(attrs.iter().cloned());
                }
                self.expect(Token::Semi)?;
                Ok(Stmt::Decl(decl))
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "for" => self.parse_for(None),
                "while" => {
                    self.position += 1;
                    self.expect(Token::LParen)?;
                    let cond = self.parse_expr()?;
                    self.expect(Token::RParen)?;
                    let body = Box::new(self.parse_stmt()?);
                    Ok(Stmt::While { cond, body })
                }
                "if" => {
                    self.position += 1;
                    self.expect(Token::LParen)?;
                    let cond = self.parse_expr()?;
                    self.expect(Token::RParen)?;
                    let then_branch = Box::new(self.parse_stmt()?);
                    let else_branch = if self.eat_ident("else") {
                        Some(Box::new(self.parse_stmt()?))
                    } else {
                        None
                    };
                    Ok(Stmt::If {
                        cond,
                        then_branch,
                        else_branch,
                    })
                }
                "return" => {
                    self.position += 1;
                    if !self.check(&Token::Semi) {
                        return Err(self.unexpected("';' (kernels return void)"));
                    }
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Return)
                }
                "break" => {
                    self.position += 1;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Break)
                }
                "continue" => {
                    self.position += 1;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Continue)
                }
                w if is_type_keyword(w) => {
                    let decl = self.parse_decl()?;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Decl(decl))
                }
                _ => {
                    let expr = self.parse_expr()?;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Expr(expr))
                }
            },
            Some(_) => {
                let expr = self.parse_expr()?;
                self.expect(Token::Semi)?;
                Ok(Stmt::Expr(expr))
            }
            None => Err(self.unexpected("statement")),
        }
    }

    fn parse_decl(&mut self) -> Result<Vec<VarDecl>> {
        let spec = self.parse_type_spec()?;
        let scalar = spec.scalar.ok_or_else(|| self.unexpected("non-void variable type"))?;
        let mut vars = Vec::new();
        loop {
            let location = self.location();
            let pointer = self.eat(&Token::Star);
            if pointer {
                self.skip_pointer_qualifiers();
            }
            let name = self.expect_ident()?;
            let array_len = if self.eat(&Token::LBracket) {
                let len = self.parse_expr()?;
                self.expect(Token::RBracket)?;
                Some(len)
            } else {
                None
            };
            let mut attrs = Vec::new();
            while let Some(Token::Attr(_)) = self.peek() {
                attrs.push(self.parse_attribute()?);
            }
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            vars.push(VarDecl {
                name,
                scalar,
                pointer,
                is_const: spec.is_const,
                array_len,
                init,
                attrs,
                location,
            });
            if !self.eat(&Token::Comma) {
                return Ok(vars);
            }
        }
    }

    fn parse_for(&mut self, pragma: Option<String>) -> Result<Stmt> {
        let location = self.location();
        self.position += 1; // `for`
        self.expect(Token::LParen)?;

        let init = if self.eat(&Token::Semi) {
            None
        } else if self.at_type() {
            let decl = self.parse_decl()?;
            self.expect(Token::Semi)?;
            Some(Box::new(Stmt::Decl(decl)))
        } else {
            let expr = self.parse_expr()?;
            self.expect(Token::Semi)?;
            Some(Box::new(Stmt::Expr(expr)))
        };

        let cond = if self.check(&Token::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semi)?;

        let step = if self.check(&Token::Semi) || self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        let mut attrs = Vec::new();
        if self.eat(&Token::Semi) {
            while let Some(Token::Attr(_)) = self.peek() {
                attrs.push(self.parse_attribute()?);
                self.eat(&Token::Comma);
            }
        }
        self.expect(Token::RParen)?;
        let body = Box::new(self.parse_stmt()?);

        Ok(Stmt::For(ForLoop {
            init,
            cond,
            step,
            attrs,
            pragma,
            body,
            location,
        }))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinaryOp::Add),
            Some(Token::MinusAssign) => Some(BinaryOp::Sub),
            Some(Token::StarAssign) => Some(BinaryOp::Mul),
            Some(Token::SlashAssign) => Some(BinaryOp::Div),
            Some(Token::PercentAssign) => Some(BinaryOp::Rem),
            Some(Token::AmpAssign) => Some(BinaryOp::BitAnd),
            Some(Token::PipeAssign) => Some(BinaryOp::BitOr),
            Some(Token::CaretAssign) => Some(BinaryOp::BitXor),
            Some(Token::ShlAssign) => Some(BinaryOp::Shl),
            Some(Token::ShrAssign) => Some(BinaryOp::Shr),
            _ => return Ok(lhs),
        };
        self.position += 1;
        let rhs = self.parse_assignment()?;
        Ok(Expr::Assign(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_value = self.parse_expr()?;
        self.expect(Token::Colon)?;
        let else_value = self.parse_ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then_value), Box::new(else_value)))
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek()? {
            Token::OrOr => BinaryOp::Or,
            Token::AndAnd => BinaryOp::And,
            Token::Pipe => BinaryOp::BitOr,
            Token::Caret => BinaryOp::BitXor,
            Token::Amp => BinaryOp::BitAnd,
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Gt => BinaryOp::Gt,
            Token::Le => BinaryOp::Le,
            Token::Ge => BinaryOp::Ge,
            Token::Shl => BinaryOp::Shl,
            Token::Shr => BinaryOp::Shr,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing; all binary operators are left associative.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.position += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Tilde) => UnaryOp::BitNot,
            Some(Token::PlusPlus) => UnaryOp::PreInc,
            Some(Token::MinusMinus) => UnaryOp::PreDec,
            Some(Token::LParen) => {
                if matches!(self.peek_at(1), Some(Token::Ident(name)) if is_type_keyword(name)) {
                    self.position += 1;
                    let spec = self.parse_type_spec()?;
                    let scalar = spec.scalar.ok_or_else(|| self.unexpected("cast type"))?;
                    if self.check(&Token::Star) {
                        return Err(self.unexpected("scalar cast type"));
                    }
                    self.expect(Token::RParen)?;
                    let operand = self.parse_unary()?;
                    return Ok(Expr::Cast(scalar, Box::new(operand)));
                }
                return self.parse_postfix();
            }
            _ => return self.parse_postfix(),
        };
        self.position += 1;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.position += 1;
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::PlusPlus) => {
                    self.position += 1;
                    expr = Expr::Unary(UnaryOp::PostInc, Box::new(expr));
                }
                Some(Token::MinusMinus) => {
                    self.position += 1;
                    expr = Expr::Unary(UnaryOp::PostDec, Box::new(expr));
                }
                Some(Token::Dot) => {
                    self.position += 1;
                    let field = self.expect_ident()?;
                    expr = Expr::Member(Box::new(expr), field);
                }
                Some(Token::LParen) => {
                    let Expr::Ident(name) = &expr else {
                        return Err(self.unexpected("operator"));
                    };
                    let name = name.clone();
                    self.position += 1;
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_assignment()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    expr = Expr::Call(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Int { value, kind }) => {
                self.position += 1;
                Ok(Expr::Int(value, kind))
            }
            Some(Token::Float { value, single }) => {
                self.position += 1;
                Ok(Expr::Float(value, if single { ScalarKind::F32 } else { ScalarKind::F64 }))
            }
            Some(Token::Ident(name)) if name == "true" || name == "false" => {
                self.position += 1;
                Ok(Expr::Bool(name == "true"))
            }
            Some(Token::Ident(name)) if !is_type_keyword(&name) => {
                self.position += 1;
                Ok(Expr::Ident(name))
            }
            Some(Token::LParen) => {
                self.position += 1;
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_VECTORS: &str = r#"
        @kernel void addVectors(const int entries,
                                const float *a,
                                const float *b,
                                float *ab) {
          for (int i = 0; i < entries; ++i; @tile(16, @outer, @inner)) {
            ab[i] = a[i] + b[i];
          }
        }
    "#;

    #[test]
    fn test_parse_okl_kernel_signature() {
        let unit = parse(ADD_VECTORS).unwrap();
        let kernel = unit.function("addVectors").unwrap();
        assert!(kernel.is_kernel);
        assert_eq!(kernel.params.len(), 4);
        assert_eq!(kernel.params[0].ty, ParamType { scalar: ScalarKind::I32, pointer: false, is_const: true });
        assert_eq!(kernel.params[3].ty, ParamType::pointer(ScalarKind::F32));
    }

    #[test]
    fn test_parse_tile_attribute() {
        let unit = parse(ADD_VECTORS).unwrap();
        let Stmt::For(loop_) = &unit.functions[0].body.stmts[0] else {
            panic!("expected for loop");
        };
        match &loop_.attrs[0] {
            Attribute::Tile { size, loops } => {
                assert_eq!(size, &Expr::Int(16, ScalarKind::I32));
                assert_eq!(loops, &vec![Attribute::Outer(None), Attribute::Inner(None)]);
            }
            other => panic!("unexpected attribute {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let mut parser = Parser::new(crate::lexer::tokenize("a + b * c < d && !e").unwrap());
        let expr = parser.parse_expr().unwrap();
        let Expr::Binary(BinaryOp::And, lhs, _) = expr else {
            panic!("expected &&");
        };
        let Expr::Binary(BinaryOp::Lt, sum, _) = *lhs else {
            panic!("expected <");
        };
        assert!(matches!(*sum, Expr::Binary(BinaryOp::Add, _, ref rhs) if matches!(**rhs, Expr::Binary(BinaryOp::Mul, _, _))));
    }

    #[test]
    fn test_parse_native_hip_kernel() {
        let src = r#"
            #include <hip/hip_runtime.h>
            extern "C"
            __global__ __launch_bounds__(256)
            void addVectors(const int entries,
                            const float * __restrict__ a,
                            const float * __restrict__ b,
                                  float * __restrict__ ab) {
              const int n = threadIdx.x + blockDim.x * blockIdx.x;
              if (n < entries) {
                ab[n] = a[n] + b[n];
              }
            }
        "#;
        let unit = parse(src).unwrap();
        let kernel = unit.function("addVectors").unwrap();
        assert!(kernel.is_native_entry);
        assert!(!kernel.is_kernel);
        assert!(kernel.params[1].restrict);
        assert_eq!(kernel.params[1].ty, ParamType { scalar: ScalarKind::F32, pointer: true, is_const: true });
    }

    #[test]
    fn test_shared_declaration_and_barrier() {
        let src = r#"
            @kernel void k(double *x) {
              for (int b = 0; b < 4; ++b; @outer) {
                @shared double s[256];
                for (int t = 0; t < 256; ++t; @inner) { s[t] = x[t]; }
                @barrier;
              }
            }
        "#;
        let unit = parse(src).unwrap();
        let Stmt::For(outer) = &unit.functions[0].body.stmts[0] else {
            panic!("expected for");
        };
        let Stmt::Block(body) = outer.body.as_ref() else {
            panic!("expected block");
        };
        let Stmt::Decl(vars) = &body.stmts[0] else {
            panic!("expected decl");
        };
        assert_eq!(vars[0].attrs, vec![Attribute::Shared]);
        assert!(vars[0].array_len.is_some());
        assert!(matches!(body.stmts[2], Stmt::Barrier(_)));
    }

    #[test]
    fn test_cast_and_ternary() {
        let mut parser = Parser::new(crate::lexer::tokenize("x = (double) i < n ? a : b").unwrap());
        let expr = parser.parse_expr().unwrap();
        let Expr::Assign(None, _, rhs) = expr else {
            panic!("expected assignment");
        };
        assert!(matches!(*rhs, Expr::Ternary(..)));
    }

    #[test]
    fn test_error_reports_location() {
        let err = parse("@kernel void k(int n) {\n  n = ;\n}").unwrap_err();
        match err {
            LangError::UnexpectedToken { location, .. } => assert_eq!(location.line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_return_with_value_rejected() {
        assert!(parse("@kernel void k() { return 1; }").is_err());
    }
}
