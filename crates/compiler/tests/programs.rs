//! Black-box tests against `weft_compiler::compile`'s public surface only —
//! no reaching into `ast`/`emitter` internals.

use weft_compiler::compile;
use weft_compiler::error::CompileError;
use weft_compiler::opcode::Op;

#[test]
fn compiles_function_definitions_and_calls() {
    let module = compile(
        "function add(a, b)\n  return a + b\nend\nreturn add(2, 3)",
    )
    .unwrap();
    assert!(module.chunks.len() >= 2, "expected a chunk for the top level and one for `add`");
}

#[test]
fn compiles_nested_control_flow() {
    let module = compile(
        "total = 0\nfor i in [1,2,3]\n  if i > 1\n    total = total + i\n  end\nend\nreturn total",
    )
    .unwrap();
    let entry_chunk = &module.chunks[module.entry];
    assert!(entry_chunk.code.iter().any(|i| i.op == Op::For));
    assert!(entry_chunk.code.iter().any(|i| i.op == Op::Jfalse));
}

#[test]
fn compiles_map_and_vector_literals() {
    let module = compile("m = {x = 1, y = 2}\nv = [1, 2, 3]\nreturn m.x + v[0]").unwrap();
    let entry_chunk = &module.chunks[module.entry];
    assert!(entry_chunk.code.iter().any(|i| i.op == Op::Map));
    assert!(entry_chunk.code.iter().any(|i| i.op == Op::Vector));
}

#[test]
fn compiles_string_interpolation() {
    let module = compile("name = \"world\"\nreturn \"hello $name\"").unwrap();
    assert!(!module.chunks.is_empty());
}

#[test]
fn coroutine_yield_resume_lower_to_dedicated_opcodes() {
    let module = compile(
        "function gen()\n  yield(1)\n  yield(2)\nend\nco = coroutine(gen)\nreturn resume(co)",
    )
    .unwrap();
    let has_op = |op: Op| module.chunks.iter().any(|c| c.code.iter().any(|i| i.op == op));
    assert!(has_op(Op::Coroutine));
    assert!(has_op(Op::Resume));
    assert!(has_op(Op::Yield));
}

#[test]
fn rejects_unclosed_block_with_syntax_error() {
    let err = compile("if true\n  x = 1").unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
}

#[test]
fn rejects_function_nesting_past_the_limit() {
    let mut src = String::new();
    for i in 0..70 {
        src.push_str(&format!("function f{i}()\n"));
    }
    for _ in 0..70 {
        src.push_str("end\n");
    }
    let err = compile(&src).unwrap_err();
    assert!(matches!(err, CompileError::TooDeepNesting { .. }));
}
