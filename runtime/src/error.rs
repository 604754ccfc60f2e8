//! Runtime errors, reported with the `line:column` of the instruction
//! that triggered them: a runtime fault aborts execution with a source position.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    DivisionByZero,
    IndexOutOfBounds { index: i64, dimension: i64 },
    ValueStackOverflow,
    ArrayStackOverflow,
    FrameStackOverflow,
    ArgumentStackOverflow,
    InvalidReadInput { expected: String, got: String },
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::DivisionByZero => write!(f, "division by zero"),
            RuntimeErrorKind::IndexOutOfBounds { index, dimension } => {
                write!(f, "index {index} out of bounds for dimension {dimension}")
            }
            RuntimeErrorKind::ValueStackOverflow => write!(f, "value stack overflow"),
            RuntimeErrorKind::ArrayStackOverflow => write!(f, "array-data stack overflow"),
            RuntimeErrorKind::FrameStackOverflow => write!(f, "frame stack overflow"),
            RuntimeErrorKind::ArgumentStackOverflow => write!(f, "argument stack overflow"),
            RuntimeErrorKind::InvalidReadInput { expected, got } => {
                write!(f, "expected {expected} on input, got {got:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub position: Position,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error at {}: {}", self.position, self.kind)
    }
}

impl std::error::Error for RuntimeError {}
