//! The core scope (§4.6 "global scope ... core scope (built-in library and
//! host-registered callbacks)"): a fixed table of numeric/string primitives
//! installed once by [`install`] at [`crate::vm::Vm::new`] time, read-only
//! for the rest of the VM's lifetime.
//!
//! `coroutine`/`resume`/`yield` are *not* registered here — they're reserved
//! names the compiler lowers directly to their own opcodes (see
//! [`weft_compiler::emitter`]'s `emit_coroutine_builtin`), since `yield`
//! needs to suspend the dispatch loop itself, something no callable `Value`
//! reachable through this table could do.

use crate::fault::Fault;
use crate::vm::Vm;
use weft_core::{value_cmp, Value};

/// Registers every built-in under its bare name in `vm.core_scope`, in one
/// pass at VM creation, against the single fatal-channel model of §4.9.
pub fn install(vm: &mut Vm) {
    register(vm, "assert", Box::new(core_assert));
    register(vm, "type", Box::new(core_type));
    register(vm, "tostring", Box::new(core_tostring));
    register(vm, "len", Box::new(core_len));
    register(vm, "min", Box::new(core_min));
    register(vm, "max", Box::new(core_max));
    register(vm, "setmeta", Box::new(core_setmeta));
    register(vm, "getmeta", Box::new(core_getmeta));
}

fn register(vm: &mut Vm, name: &str, f: crate::vm::NativeFn) {
    let id = vm.natives.len() as u32;
    vm.natives.push(f);
    let key = Value::Str(vm.intern_transient(name));
    vm.core_scope.set(key, Value::Callback(weft_core::NativeFnId(id)));
}

/// `assert(cond[, message])`: raises through the fatal channel on failure
/// rather than collecting, since there is no in-script catch (§4.9).
fn core_assert(_vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let cond = args.first().cloned().unwrap_or(Value::Nil);
    if cond.truthy() {
        return Ok(vec![cond]);
    }
    let message = match args.get(1) {
        Some(Value::Str(s)) => s.as_str().to_string(),
        Some(other) => format!("assertion failed: {}", other.type_name()),
        None => "assertion failed".to_string(),
    };
    Err(Fault::new(message, 0))
}

fn core_type(vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let v = args.first().unwrap_or(&Value::Nil);
    Ok(vec![Value::Str(vm.intern_transient(v.type_name()))])
}

fn core_tostring(vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let v = args.first().unwrap_or(&Value::Nil);
    let s = vm.display_value(v);
    Ok(vec![Value::Str(vm.intern_transient(&s))])
}

/// `len(v)`: the same `#`-operator rule as `Op::Count`, exposed as an
/// ordinary callable for code that wants to pass it around as a value
/// (e.g. as a `for`-loop generator step counter).
fn core_len(vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let v = args.first().unwrap_or(&Value::Nil);
    let n = match v {
        Value::Str(s) => s.as_str().chars().count() as i64,
        Value::Vector(h) => vm
            .heap
            .vector(*h)
            .map(|c| c.len() as i64)
            .ok_or_else(|| Fault::new("stale vector handle", 0))?,
        Value::Map(h) => vm
            .heap
            .map(*h)
            .map(|c| c.len() as i64)
            .ok_or_else(|| Fault::new("stale map handle", 0))?,
        other => return Err(Fault::new(format!("cannot take '#' of a {}", other.type_name()), 0)),
    };
    Ok(vec![Value::Int(n)])
}

fn core_min(_vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    extremum(args, std::cmp::Ordering::Less)
}

fn core_max(_vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    extremum(args, std::cmp::Ordering::Greater)
}

fn extremum(args: &[Value], want: std::cmp::Ordering) -> Result<Vec<Value>, Fault> {
    let mut best = args
        .first()
        .cloned()
        .ok_or_else(|| Fault::new("min/max requires at least one argument", 0))?;
    for v in &args[1..] {
        if !matches!(v, Value::Int(_) | Value::Float(_)) || !matches!(best, Value::Int(_) | Value::Float(_)) {
            return Err(Fault::new(
                format!("min/max requires numbers, found {}", v.type_name()),
                0,
            ));
        }
        if value_cmp(v, &best) == want {
            best = v.clone();
        }
    }
    Ok(vec![best])
}

/// `setmeta(container, table)`: direct heap access rather than going through
/// `Op::MetaSet` — a native callback already holds `&mut Vm`, so there's no
/// need to route this through the bytecode dispatch loop.
fn core_setmeta(vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let container = args.first().cloned().unwrap_or(Value::Nil);
    let meta = args.get(1).cloned().unwrap_or(Value::Nil);
    match container {
        Value::Vector(h) => {
            vm.heap
                .vector_mut(h)
                .ok_or_else(|| Fault::new("stale vector handle", 0))?
                .meta = Some(meta);
        }
        Value::Map(h) => {
            vm.heap
                .map_mut(h)
                .ok_or_else(|| Fault::new("stale map handle", 0))?
                .meta = Some(meta);
        }
        Value::Userdata(h) => {
            vm.heap
                .userdata_mut(h)
                .ok_or_else(|| Fault::new("stale userdata handle", 0))?
                .meta = Some(meta);
        }
        other => return Err(Fault::new(format!("{} cannot carry a meta table", other.type_name()), 0)),
    }
    Ok(vec![container])
}

fn core_getmeta(vm: &mut Vm, args: &[Value]) -> Result<Vec<Value>, Fault> {
    let container = args.first().cloned().unwrap_or(Value::Nil);
    let meta = match container {
        Value::Vector(h) => vm.heap.vector(h).and_then(|c| c.meta.clone()),
        Value::Map(h) => vm.heap.map(h).and_then(|c| c.meta.clone()),
        Value::Userdata(h) => vm.heap.userdata(h).and_then(|c| c.meta.clone()),
        _ => None,
    };
    Ok(vec![meta.unwrap_or(Value::Nil)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_passes_through_a_truthy_value() {
        let mut vm = Vm::new("").unwrap();
        let result = core_assert(&mut vm, &[Value::Int(7)]).unwrap();
        assert_eq!(result, vec![Value::Int(7)]);
    }

    #[test]
    fn assert_raises_with_custom_message() {
        let mut vm = Vm::new("").unwrap();
        let msg = Value::Str(vm.intern_transient("boom"));
        let err = core_assert(&mut vm, &[Value::Bool(false), msg]).unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn min_and_max_pick_extremes() {
        let mut vm = Vm::new("").unwrap();
        let args = [Value::Int(3), Value::Int(1), Value::Int(2)];
        assert_eq!(core_min(&mut vm, &args).unwrap(), vec![Value::Int(1)]);
        assert_eq!(core_max(&mut vm, &args).unwrap(), vec![Value::Int(3)]);
    }

    #[test]
    fn type_and_tostring_report_expected_names() {
        let mut vm = Vm::new("").unwrap();
        let ty = core_type(&mut vm, &[Value::Bool(true)]).unwrap();
        assert!(matches!(&ty[0], Value::Str(s) if s.as_str() == "bool"));
        let s = core_tostring(&mut vm, &[Value::Int(42)]).unwrap();
        assert!(matches!(&s[0], Value::Str(s) if s.as_str() == "42"));
    }
}
