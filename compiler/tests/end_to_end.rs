//! End-to-end source-to-stdout tests: compile a program, run it on the
//! virtual machine, and check what it printed.

use std::rc::Rc;
use yala_runtime::Vm;

fn run(source: &str) -> String {
    let (_, bytecode) = yala_compiler::compile_source(source).expect("compile failed");
    let mut output = Vec::new();
    let mut vm = Vm::new(&b""[..], &mut output);
    vm.run(Rc::new(bytecode)).expect("run failed");
    String::from_utf8(output).expect("non-utf8 output")
}

#[test]
fn arithmetic_expression() {
    assert_eq!(run("program p; begin writeln(1+2*3) end p."), "7\n");
}

#[test]
fn for_loop_accumulator() {
    let src = "program p; x: integer; begin x = 3; for i := 1 to 4 do x = x + i end; writeln(x) end p.";
    assert_eq!(run(src), "13\n");
}

#[test]
fn vector_indexing() {
    let src = "program p; v: vector[3] of integer; begin v[0]=10; v[1]=20; v[2]=30; writeln(v[0]+v[2]) end p.";
    assert_eq!(run(src), "40\n");
}

#[test]
fn inout_parameter_writeback() {
    let src = "program p; procedure q(inout a: integer); begin a = a + 1 end q; x: integer; begin x = 41; q(x); writeln(x) end p.";
    assert_eq!(run(src), "42\n");
}

#[test]
fn recursive_factorial() {
    let src = "program p; function f(n: integer): integer; if n <= 1 then 1 else n * f(n-1) end end f; begin writeln(f(5)) end p.";
    assert_eq!(run(src), "120\n");
}

#[test]
fn second_sibling_function_called_directly() {
    // `g` is declared after `f`, so it owns a later slot in the
    // compile-time environment tree; calling it directly from the
    // program body (with no `f` activation on the call stack) must
    // still resolve `a` against `g`'s own, currently running frame.
    let src = "program p; function f(): integer; 1 end f; function g(a: integer): integer; a end g; begin writeln(g(7)) end p.";
    assert_eq!(run(src), "7\n");
}

#[test]
fn nested_vector_literal_indexing() {
    let src = "program p; begin v: vector[2] of vector[2] of integer = [[1,2],[3,4]]; writeln(v[1][0]) end p.";
    assert_eq!(run(src), "3\n");
}

#[test]
fn and_short_circuit_skips_second_operand() {
    let src = "program p; begin if false and (1/0 == 0) then writeln(1) else writeln(0) end end p.";
    assert_eq!(run(src), "0\n");
}

#[test]
fn or_short_circuit_skips_second_operand() {
    let src = "program p; begin if true or (1/0 == 0) then writeln(1) else writeln(0) end end p.";
    assert_eq!(run(src), "1\n");
}

#[test]
fn break_exits_one_loop_level() {
    let src = "program p; x: integer; begin x = 0; for i := 1 to 3 do for j := 1 to 3 do begin x = x + 1; break end end end; writeln(x) end p.";
    assert_eq!(run(src), "3\n");
}
