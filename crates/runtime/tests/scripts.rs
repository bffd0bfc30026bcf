//! End-to-end tests driving full source through `weft_runtime::Vm`'s public
//! surface (`Vm::new`/`run`/host API), the same way a host application
//! would — no reaching into `Interp`/`Heap` internals.

use weft_core::Value;
use weft_runtime::{HostError, Vm};

fn run_ok(src: &str) -> Vec<Value> {
    let mut vm = Vm::new(src).unwrap();
    vm.run().unwrap()
}

#[test]
fn arithmetic_and_control_flow() {
    let values = run_ok("x = 0\nwhile x < 5\n  x = x + 1\nend\nreturn x");
    assert_eq!(values, vec![Value::Int(5)]);
}

#[test]
fn function_calls_and_returns() {
    let values = run_ok("function add(a, b)\n  return a + b\nend\nreturn add(2, 3)");
    assert_eq!(values, vec![Value::Int(5)]);
}

#[test]
fn vector_and_map_literals_roundtrip() {
    let mut vm = Vm::new("v = [10, 20, 30]\nm = {a = 1, b = 2}\nreturn v[1], m.b").unwrap();
    let values = vm.run().unwrap();
    assert_eq!(values, vec![Value::Int(20), Value::Int(2)]);
}

#[test]
fn coroutine_yield_and_resume_step_through_values() {
    let mut vm = Vm::new(
        "function gen()\n  yield(1)\n  yield(2)\n  return 3\nend\nco = coroutine(gen)\na = resume(co)\nb = resume(co)\nc = resume(co)\nreturn a, b, c",
    )
    .unwrap();
    let values = vm.run().unwrap();
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn for_loop_over_a_vector() {
    let values = run_ok("total = 0\nfor v in [1,2,3,4]\n  total = total + v\nend\nreturn total");
    assert_eq!(values, vec![Value::Int(10)]);
}

#[test]
fn core_scope_builtins_are_callable() {
    let values = run_ok("return min(3, 1, 2), max(3, 1, 2), len(\"hello\"), type(1)");
    assert_eq!(values[0], Value::Int(1));
    assert_eq!(values[1], Value::Int(3));
    assert_eq!(values[2], Value::Int(5));
    assert!(matches!(&values[3], Value::Str(s) if s.as_str() == "int"));
}

#[test]
fn assert_raises_a_fault_on_a_falsy_value() {
    let mut vm = Vm::new("assert(false, \"boom\")").unwrap();
    let err = vm.run().unwrap_err();
    match err {
        HostError::Runtime(fault) => assert!(fault.message.contains("boom")),
        other => panic!("expected a runtime fault, got {other:?}"),
    }
}

#[test]
fn host_can_push_and_register_native_callbacks() {
    let mut vm = Vm::new("return 1").unwrap();
    vm.register_native("double", Box::new(|vm, args| {
        let n = weft_runtime_host_to_int(vm, &args[0])?;
        Ok(vec![weft_core::Value::Int(n * 2)])
    }))
    .unwrap();
    let err = vm
        .register_native("double", Box::new(|_, _| Ok(vec![])))
        .unwrap_err();
    assert!(matches!(err, HostError::DuplicateNative { .. }));
}

fn weft_runtime_host_to_int(_vm: &mut Vm, v: &weft_core::Value) -> Result<i64, weft_runtime::Fault> {
    match v {
        weft_core::Value::Int(i) => Ok(*i),
        other => Err(weft_runtime::Fault::new(format!("expected int, got {}", other.type_name()), 0)),
    }
}

#[test]
fn nested_function_escapes_with_its_captured_local() {
    let values = run_ok(
        "function make(x)\n  return function()\n    return x\n  end\nend\nf = make(7)\nreturn f()",
    );
    assert_eq!(values, vec![Value::Int(7)]);
}

#[test]
fn a_closures_write_never_propagates_back_into_its_captured_scope() {
    // `n = n + 1` inside `inc` binds a new local in `inc`'s own frame (§9:
    // assignment never crosses a frame boundary), so repeated calls to
    // `inc` never change what `get`'s capture of `make`'s `n` observes.
    let values = run_ok(
        "function make()\n  n = 0\n  get = function() return n end\n  inc = function() n = n + 1 end\n  inc()\n  inc()\n  return get()\nend\nreturn make()",
    );
    assert_eq!(values, vec![Value::Int(0)]);
}

#[test]
fn method_call_passes_the_real_argument_count() {
    let values = run_ok(
        "m = {}\nm.greet = function(self, name)\n  return name\nend\nreturn m:greet(\"hi\")",
    );
    assert_eq!(values.len(), 1);
    assert!(matches!(&values[0], Value::Str(s) if s.as_str() == "hi"));
}

#[test]
fn unknown_name_raises_a_fault_instead_of_silently_yielding_nil() {
    let mut vm = Vm::new("return doesnt_exist").unwrap();
    let err = vm.run().unwrap_err();
    match err {
        HostError::Runtime(fault) => assert!(fault.message.contains("doesnt_exist")),
        other => panic!("expected a runtime fault, got {other:?}"),
    }
}

#[test]
fn exchange_stack_is_independent_of_script_execution() {
    let mut vm = Vm::new("return 1").unwrap();
    vm.push_int(42);
    vm.run().unwrap();
    assert_eq!(vm.depth(), 1, "the host's exchange stack isn't touched by script execution");
    assert_eq!(vm.pop().unwrap(), Value::Int(42));
}
