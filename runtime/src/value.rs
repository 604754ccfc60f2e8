//! Value & Type Model
//!
//! Runtime values and the semantic types that describe them. Values are a
//! tagged union over the six kinds the language talks about: integers,
//! booleans, strings, vectors, functions, and void.

use std::fmt;
use std::rc::Rc;

/// Parameter-passing mode for a function argument type.
///
/// `In` is by value, `Out` is caller-zeroed and callee-written-back,
/// `InOut` is both (by reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    In,
    Out,
    InOut,
}

impl Modifier {
    pub fn includes_in(self) -> bool {
        matches!(self, Modifier::In | Modifier::InOut)
    }

    pub fn includes_out(self) -> bool {
        matches!(self, Modifier::Out | Modifier::InOut)
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::In => write!(f, "in"),
            Modifier::Out => write!(f, "out"),
            Modifier::InOut => write!(f, "inout"),
        }
    }
}

/// The discriminant of a semantic type. Doubles as the tag used by
/// `EQUA`/`WRITE`/`READ` opcodes, matching `enum value_type` in the
/// original `semantics.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Boolean,
    String,
    Vector,
    Function,
    Void,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Vector => "vector",
            ValueKind::Function => "function",
            ValueKind::Void => "void",
        };
        write!(f, "{s}")
    }
}

/// A function's signature: return type followed by `arity` parameter
/// types in declaration order, each carrying its own modifier.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub return_type: Box<SemanticType>,
    pub params: Vec<SemanticType>,
}

impl FunctionSignature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A semantic type: `{id, base, rank, size, modifier, dimensions, function_signature}`.
///
/// Vectors carry `base`/`rank`/`dimensions`; functions carry a
/// [`FunctionSignature`]. Non-vector, non-function types ignore the
/// unused fields (mirroring the original's single `struct semantic_type`
/// with fields that are meaningful only for some `id`s).
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticType {
    pub id: ValueKind,
    pub base: ValueKind,
    pub rank: usize,
    pub size: i64,
    pub modifier: Modifier,
    pub dimensions: Vec<i64>,
    pub function_signature: Option<Rc<FunctionSignature>>,
}

impl SemanticType {
    pub fn scalar(id: ValueKind) -> Self {
        SemanticType {
            id,
            base: id,
            rank: 0,
            size: 1,
            modifier: Modifier::In,
            dimensions: Vec::new(),
            function_signature: None,
        }
    }

    pub fn void() -> Self {
        SemanticType::scalar(ValueKind::Void)
    }

    pub fn vector(base: ValueKind, dimensions: Vec<i64>) -> Self {
        let size = dimensions.iter().product();
        let rank = dimensions.len();
        SemanticType {
            id: ValueKind::Vector,
            base,
            rank,
            size,
            modifier: Modifier::In,
            dimensions,
            function_signature: None,
        }
    }

    pub fn function(return_type: SemanticType, params: Vec<SemanticType>) -> Self {
        let rank = params.len();
        SemanticType {
            id: ValueKind::Function,
            base: ValueKind::Function,
            rank,
            size: 1,
            modifier: Modifier::In,
            dimensions: Vec::new(),
            function_signature: Some(Rc::new(FunctionSignature {
                return_type: Box::new(return_type),
                params,
            })),
        }
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn dimension_at(&self, i: usize) -> i64 {
        self.dimensions[i]
    }

    pub fn signature(&self) -> &FunctionSignature {
        self.function_signature
            .as_ref()
            .expect("signature() called on a non-function SemanticType")
    }

    pub fn return_type(&self) -> &SemanticType {
        &self.signature().return_type
    }

    pub fn param_at(&self, i: usize) -> &SemanticType {
        &self.signature().params[i]
    }

    /// Structural equality: for vectors, `base`/`rank`/`dimensions` must
    /// match; for functions, arity/return/params (including modifiers)
    /// must match; everything else compares by `id` alone.
    pub fn structurally_equal(&self, other: &SemanticType) -> bool {
        if self.id != other.id {
            return false;
        }
        match self.id {
            ValueKind::Vector => self.base == other.base && self.dimensions == other.dimensions,
            ValueKind::Function => {
                let a = self.signature();
                let b = other.signature();
                a.params.len() == b.params.len()
                    && a.return_type.structurally_equal(&b.return_type)
                    && a.params
                        .iter()
                        .zip(&b.params)
                        .all(|(x, y)| x.structurally_equal(y) && x.modifier == y.modifier)
            }
            _ => true,
        }
    }

    /// Comparison-compatible: `<`,`<=`,`>`,`>=` are defined only for
    /// integer/integer and string/string.
    pub fn comparable(&self, other: &SemanticType) -> bool {
        self.id == other.id && matches!(self.id, ValueKind::Integer | ValueKind::String)
    }
}

/// Descriptor for a live vector: its length and where its elements live
/// on the array-data stack. `base` is carried alongside so the VM can
/// print/equality-check without threading a separate type through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorRef {
    pub base: usize,
    pub len: usize,
}

/// An immutable string value: raw bytes plus a precomputed djb2-style
/// hash so equality can short-circuit on hash mismatch.
#[derive(Debug, Clone)]
pub struct YalaString {
    pub bytes: Rc<[u8]>,
    pub hash: u64,
}

impl YalaString {
    pub fn new(s: &str) -> Self {
        YalaString {
            bytes: Rc::from(s.as_bytes()),
            hash: hash_bytes(s.as_bytes()),
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("YalaString bytes are always valid UTF-8")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for YalaString {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

/// djb2 hash, as used by `hash_string` in the original `value.c`.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// A function value: a reference to its code module plus the index of
/// its defining environment, used for the closure lookup rule (spec
/// §9, "Closures over nested scopes").
#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub code: Rc<crate::bytecode::Bytecode>,
    pub env_index: usize,
}

/// A runtime value: the tagged union described by the VM's instruction set.
#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    String(YalaString),
    Vector(VectorRef),
    Function(FunctionValue),
    Void,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::String(_) => ValueKind::String,
            Value::Vector(_) => ValueKind::Vector,
            Value::Function(_) => ValueKind::Function,
            Value::Void => ValueKind::Void,
        }
    }

    pub fn as_integer(&self) -> i64 {
        match self {
            Value::Integer(i) => *i,
            _ => panic!("as_integer called on non-integer value"),
        }
    }

    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            _ => panic!("as_boolean called on non-boolean value"),
        }
    }

    pub fn as_vector(&self) -> VectorRef {
        match self {
            Value::Vector(v) => *v,
            _ => panic!("as_vector called on non-vector value"),
        }
    }
}

/// Scalar-only structural equality for two values known to share `kind`.
/// Vector/function equality needs access to the array-data stack and is
/// implemented by the VM (see `vm::values_equal`).
pub fn scalars_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Void, Value::Void) => true,
        _ => false,
    }
}

/// Lexicographic comparison by raw bytes for strings, numeric for
/// integers. Panics on incomparable kinds; callers must check
/// `SemanticType::comparable` first (the compiler enforces this at
/// compile time, so the VM never sees a mismatched pair).
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.bytes.as_ref().cmp(y.bytes.as_ref()),
        _ => panic!("compare_values called on incomparable values"),
    }
}

/// Detects signed overflow of `a + x`, matching `is_add_overflow` in the
/// original `value.c`. Consulted by the compiler when folding integer
/// literals and vector dimensions; the VM's runtime arithmetic uses
/// wrapping two's-complement semantics instead.
pub fn is_add_overflow(a: i64, x: i64) -> bool {
    a.checked_add(x).is_none()
}

/// Detects signed overflow of `a * x`.
pub fn is_mult_overflow(a: i64, x: i64) -> bool {
    a.checked_mul(x).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_compare_by_id_only() {
        let a = SemanticType::scalar(ValueKind::Integer);
        let b = SemanticType::scalar(ValueKind::Integer);
        assert!(a.structurally_equal(&b));
    }

    #[test]
    fn vector_types_need_matching_dimensions() {
        let a = SemanticType::vector(ValueKind::Integer, vec![3]);
        let b = SemanticType::vector(ValueKind::Integer, vec![4]);
        assert!(!a.structurally_equal(&b));
        let c = SemanticType::vector(ValueKind::Integer, vec![3]);
        assert!(a.structurally_equal(&c));
    }

    #[test]
    fn vector_size_is_product_of_dimensions() {
        let t = SemanticType::vector(ValueKind::Integer, vec![2, 3, 4]);
        assert_eq!(t.size, 24);
    }

    #[test]
    fn function_equality_checks_modifiers() {
        let int_ty = SemanticType::scalar(ValueKind::Integer);
        let f1 = SemanticType::function(
            int_ty.clone(),
            vec![int_ty.clone().with_modifier(Modifier::In)],
        );
        let f2 = SemanticType::function(
            int_ty.clone(),
            vec![int_ty.clone().with_modifier(Modifier::InOut)],
        );
        assert!(!f1.structurally_equal(&f2));
    }

    #[test]
    fn string_equality_short_circuits_on_hash() {
        let a = YalaString::new("hello");
        let b = YalaString::new("hello");
        let c = YalaString::new("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn comparable_only_for_integers_and_strings() {
        let int_ty = SemanticType::scalar(ValueKind::Integer);
        let bool_ty = SemanticType::scalar(ValueKind::Boolean);
        let str_ty = SemanticType::scalar(ValueKind::String);
        assert!(int_ty.comparable(&int_ty));
        assert!(str_ty.comparable(&str_ty));
        assert!(!bool_ty.comparable(&bool_ty));
        assert!(!int_ty.comparable(&str_ty));
    }

    #[test]
    fn overflow_predicates() {
        assert!(is_add_overflow(i64::MAX, 1));
        assert!(!is_add_overflow(1, 1));
        assert!(is_mult_overflow(i64::MAX, 2));
        assert!(!is_mult_overflow(2, 2));
    }
}
