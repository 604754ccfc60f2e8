//! Textual bytecode persistence: `compile` writes a `.yalac`
//! file this way, `execute` reads it back. Two sections per module:
//! a single line of `byte(line:col)` tokens, then one constant per
//! line typed by a leading id, with nested function bodies recursing
//! into their own two sections and a trailing `-1` line.
//!
//! Constant ids `0` (integer), `2` (string), `3` (vector descriptor)
//! and `4` (function) are exactly as specified. Id `1` (boolean) and
//! `5` (void) are not named by the format but are needed since both
//! appear as ordinary constants (`writeln(true)`, a procedure's
//! implicit `Void` return value) - see DESIGN.md.

use crate::error::CompileError;
use yala_runtime::{Bytecode, FunctionValue, LineInfo, Value, VectorRef, YalaString};
use std::rc::Rc;

pub fn serialize(bc: &Bytecode) -> String {
    let mut out = String::new();
    serialize_into(bc, &mut out);
    out
}

fn serialize_into(bc: &Bytecode, out: &mut String) {
    for (i, &byte) in bc.code.iter().enumerate() {
        let LineInfo { line, col } = bc.lines[i];
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte}({line}:{col})"));
    }
    out.push('\n');

    for constant in &bc.constants {
        match constant {
            Value::Integer(n) => out.push_str(&format!("0 {n}\n")),
            Value::Boolean(b) => out.push_str(&format!("1 {}\n", *b as u8)),
            Value::String(s) => {
                out.push_str("2 ");
                out.push_str(s.as_str());
                out.push('\0');
                out.push('\n');
            }
            Value::Vector(v) => out.push_str(&format!("3 {}\n", v.len)),
            Value::Function(f) => {
                out.push_str("4 ");
                serialize_into(&f.code, out);
            }
            Value::Void => out.push_str("5\n"),
        }
    }
    out.push_str("-1\n");
}

pub fn deserialize(text: &str) -> Result<Bytecode, CompileError> {
    let mut lines = text.lines();
    deserialize_module(&mut lines)
}

fn deserialize_module<'a>(lines: &mut std::str::Lines<'a>) -> Result<Bytecode, CompileError> {
    let section1 = lines
        .next()
        .ok_or_else(|| CompileError::parse("unexpected end of bytecode text", 0, 0))?;
    let mut bc = Bytecode::new();
    parse_section1(section1, &mut bc)?;

    loop {
        let line = lines
            .next()
            .ok_or_else(|| CompileError::parse("unterminated bytecode constant section", 0, 0))?;
        if line.trim() == "-1" {
            break;
        }
        bc.constants.push(parse_constant_line(line, lines)?);
    }
    Ok(bc)
}

fn parse_section1(line: &str, bc: &mut Bytecode) -> Result<(), CompileError> {
    if line.trim().is_empty() {
        return Ok(());
    }
    for token in line.split_whitespace() {
        let open = token
            .find('(')
            .ok_or_else(|| CompileError::parse(format!("malformed byte token '{token}'"), 0, 0))?;
        let byte: u8 = token[..open]
            .parse()
            .map_err(|_| CompileError::parse(format!("malformed byte value in '{token}'"), 0, 0))?;
        let rest = &token[open + 1..token.len() - 1];
        let (line_s, col_s) = rest
            .split_once(':')
            .ok_or_else(|| CompileError::parse(format!("malformed position in '{token}'"), 0, 0))?;
        let line_no: u32 = line_s
            .parse()
            .map_err(|_| CompileError::parse(format!("malformed line in '{token}'"), 0, 0))?;
        let col_no: u32 = col_s
            .parse()
            .map_err(|_| CompileError::parse(format!("malformed column in '{token}'"), 0, 0))?;
        bc.code.push(byte);
        bc.lines.push(LineInfo { line: line_no, col: col_no });
    }
    Ok(())
}

fn parse_constant_line<'a>(line: &str, lines: &mut std::str::Lines<'a>) -> Result<Value, CompileError> {
    let (id, rest) = line
        .split_once(' ')
        .map(|(a, b)| (a, Some(b)))
        .unwrap_or((line, None));
    match id {
        "0" => {
            let n: i64 = rest
                .unwrap_or("0")
                .parse()
                .map_err(|_| CompileError::parse("malformed integer constant", 0, 0))?;
            Ok(Value::Integer(n))
        }
        "1" => {
            let b = rest.unwrap_or("0").trim() != "0";
            Ok(Value::Boolean(b))
        }
        "2" => {
            let bytes = rest.unwrap_or("");
            let trimmed = bytes.strip_suffix('\0').unwrap_or(bytes);
            Ok(Value::String(YalaString::new(trimmed)))
        }
        "3" => {
            let len: usize = rest
                .unwrap_or("0")
                .parse()
                .map_err(|_| CompileError::parse("malformed vector constant", 0, 0))?;
            Ok(Value::Vector(VectorRef { base: 0, len }))
        }
        "4" => {
            let inner = deserialize_module(lines)?;
            Ok(Value::Function(FunctionValue { code: Rc::new(inner), env_index: 0 }))
        }
        "5" => Ok(Value::Void),
        other => Err(CompileError::parse(format!("unknown constant tag '{other}'"), 0, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yala_runtime::Opcode;

    #[test]
    fn round_trips_scalar_constants() {
        let mut bc = Bytecode::new();
        let idx = bc.add_constant(Value::Integer(42));
        bc.write_op(Opcode::LociLong, 1, 1);
        bc.write_long(idx, 1, 1);
        bc.write_op(Opcode::Halt, 1, 5);

        let text = serialize(&bc);
        let back = deserialize(&text).unwrap();
        assert_eq!(back.code, bc.code);
        assert_eq!(back.lines, bc.lines);
        match (&back.constants[0], &bc.constants[0]) {
            (Value::Integer(a), Value::Integer(b)) => assert_eq!(a, b),
            _ => panic!("expected integer constant"),
        }
    }

    #[test]
    fn round_trips_nested_function_constant() {
        let mut inner = Bytecode::new();
        let inner_idx = inner.add_constant(Value::Integer(7));
        inner.write_op(Opcode::LociLong, 2, 3);
        inner.write_long(inner_idx, 2, 3);
        inner.write_op(Opcode::Return, 2, 10);
        inner.write_byte(0, 2, 10);

        let mut outer = Bytecode::new();
        outer.add_constant(Value::Function(FunctionValue { code: Rc::new(inner), env_index: 1 }));
        outer.write_op(Opcode::Halt, 1, 1);

        let text = serialize(&outer);
        let back = deserialize(&text).unwrap();
        let (Value::Function(orig), Value::Function(got)) = (&outer.constants[0], &back.constants[0]) else {
            panic!("expected function constant");
        };
        assert_eq!(got.code.code, orig.code.code);
        match &got.code.constants[0] {
            Value::Integer(n) => assert_eq!(*n, 7),
            _ => panic!("expected nested integer constant"),
        }
    }

    #[test]
    fn round_trips_string_and_vector_constants() {
        let mut bc = Bytecode::new();
        bc.add_constant(Value::String(YalaString::new("hello")));
        bc.add_constant(Value::Vector(VectorRef { base: 0, len: 3 }));
        bc.add_constant(Value::Boolean(true));
        bc.add_constant(Value::Void);
        bc.write_op(Opcode::Halt, 1, 1);

        let text = serialize(&bc);
        let back = deserialize(&text).unwrap();
        match &back.constants[0] {
            Value::String(s) => assert_eq!(s.as_str(), "hello"),
            _ => panic!("expected string constant"),
        }
        match &back.constants[1] {
            Value::Vector(v) => assert_eq!(v.len, 3),
            _ => panic!("expected vector constant"),
        }
        match &back.constants[2] {
            Value::Boolean(b) => assert!(*b),
            _ => panic!("expected boolean constant"),
        }
        assert!(matches!(back.constants[3], Value::Void));
    }
}
