//! Compile-time property tests: programs that must fail to compile,
//! not ones that run.

fn compile_err(source: &str) -> Vec<yala_compiler::CompileError> {
    yala_compiler::compile_source(source).expect_err("expected compile to fail")
}

#[test]
fn break_outside_any_loop_is_rejected() {
    let errors = compile_err("program p; begin break end p.");
    assert!(!errors.is_empty());
}

#[test]
fn mismatched_vector_literal_shapes_are_rejected() {
    let errors = compile_err("program p; begin write([1, true]) end p.");
    assert!(!errors.is_empty());
}

#[test]
fn redeclaration_at_same_depth_is_rejected() {
    let errors = compile_err("program p; x: integer; x: boolean; begin end p.");
    assert!(!errors.is_empty());
}
