//! Value model, bytecode container, and stack VM for the Yala language.

pub mod bytecode;
pub mod error;
pub mod value;
pub mod vm;

pub use bytecode::{Bytecode, LineInfo, Opcode};
pub use error::{Position, RuntimeError, RuntimeErrorKind};
pub use value::{
    compare_values, hash_bytes, scalars_equal, FunctionSignature, FunctionValue, Modifier,
    SemanticType, Value, ValueKind, VectorRef, YalaString,
};
pub use vm::Vm;
