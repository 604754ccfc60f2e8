//! Compile-time errors: lex, parse, and semantic, unified so the CLI
//! can report all three taxonomies the same way. Hand-rolled
//! `Display`/`Error` impls over a small closed set of variants.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    Lex,
    Parse,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl CompileError {
    pub fn lex(message: impl Into<String>, line: u32, col: u32) -> Self {
        CompileError { kind: CompileErrorKind::Lex, message: message.into(), line, col }
    }

    pub fn parse(message: impl Into<String>, line: u32, col: u32) -> Self {
        CompileError { kind: CompileErrorKind::Parse, message: message.into(), line, col }
    }

    pub fn semantic(message: impl Into<String>, line: u32, col: u32) -> Self {
        CompileError { kind: CompileErrorKind::Semantic, message: message.into(), line, col }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            CompileErrorKind::Lex => "lex error",
            CompileErrorKind::Parse => "parse error",
            CompileErrorKind::Semantic => "semantic error",
        };
        write!(f, "{tag} at {}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for CompileError {}

impl From<crate::lexer::LexError> for CompileError {
    fn from(e: crate::lexer::LexError) -> Self {
        CompileError::lex(e.message, e.line, e.col)
    }
}

impl From<crate::parser::ParseError> for CompileError {
    fn from(e: crate::parser::ParseError) -> Self {
        CompileError::parse(e.message, e.line, e.col)
    }
}
