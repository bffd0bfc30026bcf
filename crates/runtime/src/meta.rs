//! Operator-polymorphism dispatch (§4.8): arithmetic, comparison, and
//! concatenation check the operands' `meta` table for an override before
//! falling back to the built-in scalar/container rules.
//!
//! A meta-method invocation runs as an independent, synchronous call — its
//! own private frame stack, driven to completion before the enclosing
//! operator resumes — rather than being interleavable with the calling
//! coroutine's own suspension points. A `yield` reachable only from inside
//! a metamethod body can't suspend the operator that invoked it; ordinary
//! calls don't have this restriction (see [`crate::interp`]'s `CALL`
//! handling, which pushes a frame on the *same* coroutine instead).

use crate::fault::Fault;
use crate::vm::Vm;
use weft_core::{value_cmp, Value};

pub const OP_ADD: &str = "+";
pub const OP_SUB: &str = "-";
pub const OP_MUL: &str = "*";
pub const OP_DIV: &str = "/";
pub const OP_MOD: &str = "%";
pub const OP_EQ: &str = "==";
pub const OP_LT: &str = "<";
pub const OP_LTE: &str = "<=";
pub const OP_CONCAT: &str = "..";

fn container_meta<'a>(vm: &'a Vm, v: &Value) -> Option<&'a Value> {
    match v {
        Value::Vector(h) => vm.heap.vector(*h).and_then(|c| c.meta.as_ref()),
        Value::Map(h) => vm.heap.map(*h).and_then(|c| c.meta.as_ref()),
        Value::Userdata(h) => vm.heap.userdata(*h).and_then(|c| c.meta.as_ref()),
        _ => None,
    }
}

/// Looks up `op` in either operand's meta table (left operand checked
/// first), returning the override callable if found.
fn find_override(vm: &Vm, op: &str, a: &Value, b: &Value) -> Option<Value> {
    for side in [a, b] {
        if let Some(Value::Map(h)) = container_meta(vm, side) {
            if let Some(map) = vm.heap.map(*h) {
                let key = Value::Str(vm.intern_transient(op));
                let handler = map.get(&key);
                if handler.is_callable() {
                    return Some(handler);
                }
            }
        }
    }
    None
}

pub fn arith(vm: &mut Vm, ip: u32, op: &str, a: Value, b: Value) -> Result<Value, Fault> {
    if let Some(handler) = find_override(vm, op, &a, &b) {
        let mut results = vm.call_value_sync(handler, vec![a, b])?;
        return Ok(results.pop().unwrap_or(Value::Nil));
    }
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Ok(match op {
            OP_ADD => Value::Int(x.wrapping_add(*y)),
            OP_SUB => Value::Int(x.wrapping_sub(*y)),
            OP_MUL => Value::Int(x.wrapping_mul(*y)),
            OP_DIV => {
                if *y == 0 {
                    return Err(Fault::new("division by zero", ip));
                }
                Value::Float(*x as f64 / *y as f64)
            }
            OP_MOD => {
                if *y == 0 {
                    return Err(Fault::new("modulo by zero", ip));
                }
                Value::Int(x.rem_euclid(*y))
            }
            _ => unreachable!("arith called with non-arithmetic op {op}"),
        }),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = as_f64(&a);
            let y = as_f64(&b);
            Ok(match op {
                OP_ADD => Value::Float(x + y),
                OP_SUB => Value::Float(x - y),
                OP_MUL => Value::Float(x * y),
                OP_DIV => Value::Float(x / y),
                OP_MOD => Value::Float(x.rem_euclid(y)),
                _ => unreachable!(),
            })
        }
        _ => Err(Fault::new(
            format!(
                "cannot apply '{op}' to {} and {}",
                a.type_name(),
                b.type_name()
            ),
            ip,
        )),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

pub fn eq(vm: &mut Vm, a: Value, b: Value) -> Result<bool, Fault> {
    if let Some(handler) = find_override(vm, OP_EQ, &a, &b) {
        let mut results = vm.call_value_sync(handler, vec![a, b])?;
        return Ok(results.pop().map(|v| v.truthy()).unwrap_or(false));
    }
    Ok(weft_core::value_eq(&a, &b))
}

pub fn cmp(vm: &mut Vm, op: &str, a: Value, b: Value) -> Result<bool, Fault> {
    let op_name = if op == OP_LT { OP_LT } else { OP_LTE };
    if let Some(handler) = find_override(vm, op_name, &a, &b) {
        let mut results = vm.call_value_sync(handler, vec![a, b])?;
        return Ok(results.pop().map(|v| v.truthy()).unwrap_or(false));
    }
    let ord = value_cmp(&a, &b);
    Ok(match op {
        OP_LT => ord.is_lt(),
        OP_LTE => ord.is_le(),
        _ => unreachable!(),
    })
}

/// String concatenation (`..`-style in other languages; Weft spells it via
/// string interpolation and the `CONCAT` opcode). Non-string operands are
/// stringified with `tostring`'s rules rather than erroring.
pub fn concat(vm: &mut Vm, a: Value, b: Value) -> Result<Value, Fault> {
    if let Some(handler) = find_override(vm, OP_CONCAT, &a, &b) {
        let mut results = vm.call_value_sync(handler, vec![a, b])?;
        return Ok(results.pop().unwrap_or(Value::Nil));
    }
    let mut s = vm.display_value(&a);
    s.push_str(&vm.display_value(&b));
    Ok(Value::Str(vm.intern_transient(&s)))
}
