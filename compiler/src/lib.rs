//! Yala Compiler Library
//!
//! Lexes, parses, and compiles Yala source into `yala_runtime::Bytecode`,
//! with a textual serialization round-trip for `.yalac` files.

pub mod ast;
pub mod codegen;
pub mod environment;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod serialize;

pub use ast::Program;
pub use codegen::Codegen;
pub use error::{CompileError, CompileErrorKind};
pub use lexer::Lexer;
pub use parser::Parser;

use yala_runtime::Bytecode;

/// Lexes, parses, and compiles a source string into bytecode, collecting
/// every error along the way rather than stopping at the first one.
pub fn compile_source(source: &str) -> Result<(Program, Bytecode), Vec<CompileError>> {
    let (parser, lex_errors) = Parser::new(source);
    let program = parser.parse().map_err(|errs| {
        lex_errors
            .iter()
            .cloned()
            .map(CompileError::from)
            .chain(errs.into_iter().map(CompileError::from))
            .collect::<Vec<_>>()
    })?;

    if !lex_errors.is_empty() {
        return Err(lex_errors.into_iter().map(CompileError::from).collect());
    }

    let bytecode = Codegen::new().compile(&program)?;
    Ok((program, bytecode))
}

/// Reads a `.yala` source file and compiles it.
pub fn compile_file(path: &std::path::Path) -> Result<(Program, Bytecode), Vec<CompileError>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| vec![CompileError::semantic(format!("cannot read {}: {e}", path.display()), 0, 0)])?;
    compile_source(&source)
}
