//! The host embedding API (§5/§6, §8 "Host interface"): a stack-based ABI a
//! host application (or a native callback running inside one) uses to push
//! arguments, read return values, build values, and register its own
//! callbacks — independent of whatever script coroutine happens to be
//! running, since [`crate::vm::Vm::exchange`] is the host's own stack, not
//! any coroutine's operand stack.

use crate::fault::HostError;
use crate::vm::Vm;
use weft_core::{Sym, VMap, VVector, Value};

impl Vm {
    // --- stack primitives: push / pop / pick / top / depth ---

    pub fn push(&mut self, v: Value) {
        self.exchange.push(v);
    }

    pub fn pop(&mut self) -> Result<Value, HostError> {
        let depth = self.exchange.len();
        self.exchange
            .pop()
            .ok_or(HostError::StackUnderflow { requested: 1, depth })
    }

    /// `pick(0)` is the top of the exchange stack, `pick(1)` the value
    /// beneath it, and so on.
    pub fn pick(&self, index_from_top: usize) -> Result<Value, HostError> {
        let depth = self.exchange.len();
        let i = depth
            .checked_sub(1 + index_from_top)
            .ok_or(HostError::StackUnderflow { requested: index_from_top, depth })?;
        Ok(self.exchange[i].clone())
    }

    pub fn top(&self) -> Result<Value, HostError> {
        self.pick(0)
    }

    pub fn depth(&self) -> usize {
        self.exchange.len()
    }

    // --- make_* builders ---

    pub fn make_nil(&self) -> Value {
        Value::Nil
    }

    pub fn make_int(&self, i: i64) -> Value {
        Value::Int(i)
    }

    pub fn make_float(&self, f: f64) -> Value {
        Value::Float(f)
    }

    pub fn make_bool(&self, b: bool) -> Value {
        Value::Bool(b)
    }

    pub fn make_str(&mut self, s: &str) -> Value {
        Value::Str(self.intern_transient(s))
    }

    pub fn make_vector(&mut self) -> Value {
        self.heap.alloc_vector(VVector::new())
    }

    pub fn make_map(&mut self) -> Value {
        self.heap.alloc_map(VMap::new())
    }

    pub fn make_userdata(&mut self, tag: &str, data: Box<dyn std::any::Any>) -> Value {
        let tag: Sym = self.intern_transient(tag);
        self.heap.alloc_userdata(weft_core::Userdata { tag, data, meta: None })
    }

    // --- push_* convenience wrappers (make_* + push, the common case) ---

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn push_int(&mut self, i: i64) {
        self.push(Value::Int(i));
    }

    pub fn push_float(&mut self, f: f64) {
        self.push(Value::Float(f));
    }

    pub fn push_bool(&mut self, b: bool) {
        self.push(Value::Bool(b));
    }

    pub fn push_str(&mut self, s: &str) {
        let v = self.make_str(s);
        self.push(v);
    }

    // --- ordered-map and vector accessors ---

    pub fn vector_len(&self, v: &Value) -> Result<usize, HostError> {
        let Value::Vector(h) = v else {
            return Err(type_mismatch("vector", v));
        };
        Ok(self.heap.vector(*h).map(|c| c.len()).unwrap_or(0))
    }

    pub fn vector_get(&self, v: &Value, index: usize) -> Result<Value, HostError> {
        let Value::Vector(h) = v else {
            return Err(type_mismatch("vector", v));
        };
        Ok(self.heap.vector(*h).map(|c| c.get(index)).unwrap_or(Value::Nil))
    }

    pub fn vector_push(&mut self, v: &Value, item: Value) -> Result<(), HostError> {
        let Value::Vector(h) = v else {
            return Err(type_mismatch("vector", v));
        };
        if let Some(c) = self.heap.vector_mut(*h) {
            c.push(item);
        }
        Ok(())
    }

    pub fn map_get(&self, v: &Value, key: &Value) -> Result<Value, HostError> {
        let Value::Map(h) = v else {
            return Err(type_mismatch("map", v));
        };
        Ok(self.heap.map(*h).map(|c| c.get(key)).unwrap_or(Value::Nil))
    }

    pub fn map_set(&mut self, v: &Value, key: Value, value: Value) -> Result<(), HostError> {
        let Value::Map(h) = v else {
            return Err(type_mismatch("map", v));
        };
        if let Some(c) = self.heap.map_mut(*h) {
            c.set(key, value);
        }
        Ok(())
    }

    /// Registers a native callback under `name` in the core scope. Errors if
    /// `name` is already bound (§5: the core scope is append-only, never
    /// shadowed).
    pub fn register_native(&mut self, name: &str, f: crate::vm::NativeFn) -> Result<(), HostError> {
        let key = Value::Str(self.intern_transient(name));
        if self.core_scope.contains(&key) {
            return Err(HostError::DuplicateNative { name: name.to_string() });
        }
        let id = self.natives.len() as u32;
        self.natives.push(f);
        self.core_scope.set(key, Value::Callback(weft_core::NativeFnId(id)));
        Ok(())
    }
}

fn type_mismatch(expected: &'static str, found: &Value) -> HostError {
    HostError::TypeMismatch { expected, found: found.type_name() }
}

// --- is_*/to_* typed accessors: free functions over a borrowed `Value`,
// mirroring §8's "typed is_*, to_* builders for each Value variant" without
// requiring a `Vm` (a host often has the value in hand already, e.g. from an
// argument slice inside a native callback).

pub fn is_nil(v: &Value) -> bool {
    v.is_nil()
}

pub fn is_int(v: &Value) -> bool {
    matches!(v, Value::Int(_))
}

pub fn is_float(v: &Value) -> bool {
    matches!(v, Value::Float(_))
}

pub fn is_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(_))
}

pub fn is_str(v: &Value) -> bool {
    matches!(v, Value::Str(_))
}

pub fn is_vector(v: &Value) -> bool {
    matches!(v, Value::Vector(_))
}

pub fn is_map(v: &Value) -> bool {
    matches!(v, Value::Map(_))
}

pub fn is_callable(v: &Value) -> bool {
    v.is_callable()
}

pub fn to_int(v: &Value) -> Result<i64, HostError> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(type_mismatch("int", other)),
    }
}

pub fn to_float(v: &Value) -> Result<f64, HostError> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        other => Err(type_mismatch("float", other)),
    }
}

pub fn to_bool(v: &Value) -> Result<bool, HostError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(type_mismatch("bool", other)),
    }
}

pub fn to_str(v: &Value) -> Result<&str, HostError> {
    match v {
        Value::Str(s) => Ok(s.as_str()),
        other => Err(type_mismatch("string", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_stack_push_pop_roundtrip() {
        let mut vm = Vm::new("").unwrap();
        vm.push_int(7);
        vm.push_bool(true);
        assert_eq!(vm.depth(), 2);
        assert_eq!(vm.pick(0).unwrap(), Value::Bool(true));
        assert_eq!(vm.pop().unwrap(), Value::Bool(true));
        assert_eq!(vm.pop().unwrap(), Value::Int(7));
        assert!(vm.pop().is_err());
    }

    #[test]
    fn register_native_rejects_duplicate_names() {
        let mut vm = Vm::new("").unwrap();
        vm.register_native("double", Box::new(|_, args| Ok(vec![args[0].clone()]))).unwrap();
        let err = vm
            .register_native("double", Box::new(|_, args| Ok(vec![args[0].clone()])))
            .unwrap_err();
        assert!(matches!(err, HostError::DuplicateNative { .. }));
    }

    #[test]
    fn make_vector_and_accessors_round_trip() {
        let mut vm = Vm::new("").unwrap();
        let v = vm.make_vector();
        vm.vector_push(&v, Value::Int(10)).unwrap();
        vm.vector_push(&v, Value::Int(20)).unwrap();
        assert_eq!(vm.vector_len(&v).unwrap(), 2);
        assert_eq!(vm.vector_get(&v, 1).unwrap(), Value::Int(20));
    }

    #[test]
    fn typed_accessors_report_mismatches() {
        assert!(to_int(&Value::Bool(true)).is_err());
        assert_eq!(to_int(&Value::Int(5)).unwrap(), 5);
        assert_eq!(to_float(&Value::Int(5)).unwrap(), 5.0);
    }
}
