//! Tokenizer for kernel sources.
//!
//! Besides splitting text into tokens the lexer performs the small amount of
//! preprocessing kernels rely on: object-like `#define` substitution (seeded
//! from build-time defines), `#pragma` lines surfaced as tokens, and
//! `#include` lines skipped.
//!
//! ```
//! use hetero_lang::lexer::{tokenize, Token};
//!
//! let tokens = tokenize("#define N 4\nx[N] += 1.5f;").unwrap();
//! assert_eq!(tokens[2].token, Token::Int { value: 4, kind: hetero_lang::ScalarKind::I32 });
//! ```

use crate::error::{LangError, Location, Result};
use crate::types::ScalarKind;
use std::collections::HashMap;
use std::fmt;

const MAX_MACRO_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int { value: u64, kind: ScalarKind },
    /// `single` is set for an `f` suffix.
    Float { value: f64, single: bool },
    Str(String),
    /// `@name`
    Attr(String),
    /// Text following `#pragma`
    Pragma(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Question,
    Colon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Ident(name) => return write!(f, "identifier '{name}'"),
            Token::Int { value, .. } => return write!(f, "integer {value}"),
            Token::Float { value, .. } => return write!(f, "number {value}"),
            Token::Str(s) => return write!(f, "string {s:?}"),
            Token::Attr(name) => return write!(f, "@{name}"),
            Token::Pragma(text) => return write!(f, "#pragma {text}"),
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::AmpAssign => "&=",
            Token::PipeAssign => "|=",
            Token::CaretAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Tilde => "~",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
        };
        write!(f, "'{text}'")
    }
}

/// A token and where it started.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub location: Location,
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: u32,
    column: u32,
    at_line_start: bool,
    macros: HashMap<String, Vec<Token>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            macros: HashMap::new(),
        }
    }

    /// Seed object-like macros, as if `#define name value` preceded the input.
    pub fn with_defines<'d, I>(mut self, defines: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'d str, &'d str)>,
    {
        for (name, value) in defines {
            let body = Lexer::new(value).raw_tokens()?;
            self.macros.insert(name.to_string(), body);
        }
        Ok(self)
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    fn error(&self, message: impl Into<String>) -> LangError {
        LangError::Lex {
            location: self.location(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn consume(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
            if !ch.is_whitespace() {
                self.at_line_start = false;
            }
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.consume();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.consume();
                }
                Some('\\') if matches!(self.peek_next(), Some('\n') | Some('\r')) => {
                    self.consume();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.consume();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let start = self.location();
                    self.consume();
                    self.consume();
                    loop {
                        match self.consume() {
                            Some('*') if self.peek() == Some('/') => {
                                self.consume();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(LangError::Lex {
                                    location: start,
                                    message: "unterminated block comment".to_string(),
                                })
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Rest of the current line, honouring backslash continuations.
    fn read_line(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => break,
                '\\' if matches!(self.peek_next(), Some('\n') | Some('\r')) => {
                    self.consume();
                    self.eat('\r');
                    self.eat('\n');
                    text.push(' ');
                }
                _ => {
                    text.push(ch);
                    self.consume();
                }
            }
        }
        text
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                result.push(ch);
                self.consume();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;

        if self.peek() == Some('0') && matches!(self.peek_next(), Some('x') | Some('X')) {
            self.consume();
            self.consume();
            let digits_start = self.position;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.consume();
            }
            let digits = &self.input[digits_start..self.position];
            let value =
                u64::from_str_radix(digits, 16).map_err(|_| self.error(format!("invalid hex literal '0x{digits}'")))?;
            return self.int_suffix(value);
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.consume();
        }
        if self.peek() == Some('.') {
            is_float = true;
            self.consume();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.consume();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            self.consume();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.consume();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.consume();
            }
        }

        let text = &self.input[start..self.position];
        if is_float || matches!(self.peek(), Some('f') | Some('F')) {
            let single = self.eat('f') || self.eat('F');
            if !single {
                // `1.0l` is a long double in C; treat it as double
                let _ = self.eat('l') || self.eat('L');
            }
            let value = if single {
                text.parse::<f32>().map(f64::from)
            } else {
                text.parse::<f64>()
            }
            .map_err(|_| self.error(format!("invalid floating literal '{text}'")))?;
            return Ok(Token::Float { value, single });
        }

        let value = text
            .parse::<u64>()
            .map_err(|_| self.error(format!("integer literal '{text}' out of range")))?;
        self.int_suffix(value)
    }

    fn int_suffix(&mut self, value: u64) -> Result<Token> {
        let mut unsigned = false;
        let mut long = false;
        loop {
            match self.peek() {
                Some('u') | Some('U') if !unsigned => {
                    unsigned = true;
                    self.consume();
                }
                Some('l') | Some('L') => {
                    long = true;
                    self.consume();
                }
                _ => break,
            }
        }
        let kind = match (unsigned, long) {
            (false, false) if value <= i32::MAX as u64 => ScalarKind::I32,
            (false, _) if value <= i64::MAX as u64 => ScalarKind::I64,
            (true, false) if value <= u32::MAX as u64 => ScalarKind::U32,
            _ => ScalarKind::U64,
        };
        Ok(Token::Int { value, kind })
    }

    fn read_string(&mut self) -> Result<Token> {
        self.consume();
        let mut text = String::new();
        loop {
            match self.consume() {
                Some('"') => return Ok(Token::Str(text)),
                Some('\\') => {
                    if let Some(escaped) = self.consume() {
                        text.push(escaped);
                    }
                }
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(ch) => text.push(ch),
            }
        }
    }

    fn punct(&mut self, ch: char) -> Result<Token> {
        self.consume();
        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ';' => Token::Semi,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '?' => Token::Question,
            ':' => Token::Colon,
            '~' => Token::Tilde,
            '+' if self.eat('+') => Token::PlusPlus,
            '+' if self.eat('=') => Token::PlusAssign,
            '+' => Token::Plus,
            '-' if self.eat('-') => Token::MinusMinus,
            '-' if self.eat('=') => Token::MinusAssign,
            '-' => Token::Minus,
            '*' if self.eat('=') => Token::StarAssign,
            '*' => Token::Star,
            '/' if self.eat('=') => Token::SlashAssign,
            '/' => Token::Slash,
            '%' if self.eat('=') => Token::PercentAssign,
            '%' => Token::Percent,
            '=' if self.eat('=') => Token::EqEq,
            '=' => Token::Assign,
            '!' if self.eat('=') => Token::NotEq,
            '!' => Token::Bang,
            '&' if self.eat('&') => Token::AndAnd,
            '&' if self.eat('=') => Token::AmpAssign,
            '&' => Token::Amp,
            '|' if self.eat('|') => Token::OrOr,
            '|' if self.eat('=') => Token::PipeAssign,
            '|' => Token::Pipe,
            '^' if self.eat('=') => Token::CaretAssign,
            '^' => Token::Caret,
            '<' if self.eat('<') => {
                if self.eat('=') {
                    Token::ShlAssign
                } else {
                    Token::Shl
                }
            }
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('>') => {
                if self.eat('=') {
                    Token::ShrAssign
                } else {
                    Token::Shr
                }
            }
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            other => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        Ok(token)
    }

    /// Tokens with no preprocessing, used for macro bodies.
    fn raw_tokens(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(spanned) = self.next_raw()? {
            tokens.push(spanned.token);
        }
        Ok(tokens)
    }

    fn next_raw(&mut self) -> Result<Option<Spanned>> {
        self.skip_trivia()?;
        let location = self.location();
        let Some(ch) = self.peek() else {
            return Ok(None);
        };

        let token = match ch {
            '0'..='9' => self.read_number()?,
            '.' if self.peek_next().is_some_and(|c| c.is_ascii_digit()) => self.read_number()?,
            'a'..='z' | 'A'..='Z' | '_' => Token::Ident(self.read_identifier()),
            '"' => self.read_string()?,
            '@' => {
                self.consume();
                let name = self.read_identifier();
                if name.is_empty() {
                    return Err(self.error("expected attribute name after '@'"));
                }
                Token::Attr(name)
            }
            _ => self.punct(ch)?,
        };
        Ok(Some(Spanned { token, location }))
    }

    fn directive(&mut self, out: &mut Vec<Spanned>) -> Result<()> {
        let location = self.location();
        self.consume();
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.consume();
        }
        let name = self.read_identifier();
        let rest = self.read_line();
        match name.as_str() {
            "define" => {
                let rest = rest.trim_start();
                let macro_name: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
                if macro_name.is_empty() {
                    return Err(LangError::Lex {
                        location,
                        message: "#define without a name".to_string(),
                    });
                }
                let body = &rest[macro_name.len()..];
                if body.starts_with('(') {
                    return Err(LangError::Lex {
                        location,
                        message: format!("function-like macro '{macro_name}' is not supported"),
                    });
                }
                let tokens = Lexer::new(body).raw_tokens()?;
                self.macros.insert(macro_name, tokens);
            }
            "undef" => {
                self.macros.remove(rest.trim());
            }
            "pragma" => out.push(Spanned {
                token: Token::Pragma(rest.trim().to_string()),
                location,
            }),
            "include" => {}
            other => {
                return Err(LangError::Lex {
                    location,
                    message: format!("unsupported preprocessor directive '#{other}'"),
                })
            }
        }
        Ok(())
    }

    fn expand(&self, name: &str, location: Location, out: &mut Vec<Spanned>, active: &mut Vec<String>) -> Result<()> {
        if active.len() >= MAX_MACRO_DEPTH {
            return Err(LangError::Lex {
                location,
                message: format!("macro expansion of '{name}' is too deep"),
            });
        }
        let Some(body) = self.macros.get(name) else {
            out.push(Spanned {
                token: Token::Ident(name.to_string()),
                location,
            });
            return Ok(());
        };
        active.push(name.to_string());
        for token in body {
            match token {
                Token::Ident(inner) if !active.iter().any(|a| a == inner) => {
                    self.expand(inner, location, out, active)?;
                }
                other => out.push(Spanned {
                    token: other.clone(),
                    location,
                }),
            }
        }
        active.pop();
        Ok(())
    }

    /// Tokenize the whole input with preprocessing applied.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.at_line_start && self.peek() == Some('#') {
                self.directive(&mut tokens)?;
                continue;
            }
            match self.next_raw()? {
                Some(Spanned {
                    token: Token::Ident(name),
                    location,
                }) => {
                    let mut active = Vec::new();
                    self.expand(&name, location, &mut tokens, &mut active)?;
                }
                Some(spanned) => tokens.push(spanned),
                None => return Ok(tokens),
            }
        }
    }
}

/// Tokenize `input` without build-time defines.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    Lexer::new(input).tokenize()
}
