//! The `Value` type: a tagged union over everything a Weft script can hold.
//!
//! Heap-referencing variants (`Vector`, `Map`, `Coroutine`, `Userdata`) carry
//! a [`Handle`] rather than a raw pointer — see [`crate::pool`] for why.
//! `Value` is `Copy`: assignment never implies ownership of the referenced
//! heap object. The [`crate::heap::Heap`] collector is the sole authority on
//! when that object goes away.

use crate::closure::ClosureObj;
use crate::interner::Sym;
use std::cmp::Ordering;
use std::rc::Rc;

/// A generational index into one of the heap's object pools.
///
/// Using `(slot, generation)` instead of a raw pointer means a stale `Value`
/// left over from before a collection can be detected (`generation`
/// mismatch) rather than aliasing a freed-and-reused slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub slot: u32,
    pub generation: u32,
}

/// Opaque identifier for a host-registered native callback.
///
/// An index into the VM's native-function table rather than a raw function
/// pointer, so `Value` stays `Copy` and `Send`-friendly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeFnId(pub u32);

/// Entry point of a script-defined subroutine: an instruction index into the
/// owning chunk's flat opcode array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubEntry(pub u32);

/// A Weft runtime value.
///
/// Conceptually POD ("copied by assignment" per §3) but the `Str` variant
/// carries an `Arc<str>` for identity-preserving interning, so `Value` is
/// `Clone` rather than `Copy` — cloning is still an O(1) refcount bump for
/// strings and a plain bitwise copy for every other variant, matching the
/// spec's cheap-copy intent without a raw, lifetime-unchecked pointer.
/// `ParserNode` never survives past compilation — it exists purely so
/// compile-time constant folding (§4.3 peephole literal-folding) can flow
/// partially-built AST fragments through the same `Value` plumbing as
/// runtime constants before the emitter throws them away.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Sym),
    Vector(Handle),
    Map(Handle),
    Sub(SubEntry),
    /// A nested function that escaped its defining invocation, carrying the
    /// lexical-ancestor environments it captured at creation (§9). Plain
    /// nested functions that never escape stay a cheap `Sub` — see
    /// [`crate::closure::ClosureObj`].
    Closure(Rc<ClosureObj>),
    Coroutine(Handle),
    Callback(NativeFnId),
    Userdata(Handle),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Lua-style truthiness: everything except `nil` and `false` is truthy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Sub(_) | Value::Closure(_) | Value::Callback(_))
    }

    /// Name used by `lib.type` and in diagnostics; also the ordering rank
    /// used by [`type_rank`].
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Sub(_) => "function",
            Value::Closure(_) => "function",
            Value::Coroutine(_) => "coroutine",
            Value::Callback(_) => "function",
            Value::Userdata(_) => "userdata",
        }
    }
}

/// Rank used for the cross-type total order required by §3/§4.2:
/// "types compared first (nil < int < float < string < …)".
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Nil => 0,
        Value::Int(_) => 1,
        Value::Float(_) => 2,
        Value::Bool(_) => 3,
        Value::Str(_) => 4,
        Value::Vector(_) => 5,
        Value::Map(_) => 6,
        Value::Sub(_) => 7,
        Value::Closure(_) => 8,
        Value::Coroutine(_) => 9,
        Value::Callback(_) => 10,
        Value::Userdata(_) => 11,
    }
}

/// Total order over `Value` used by the ordered map (§4.2) for key sorting.
///
/// Strings order by byte content (not identity — identity is reserved for
/// equality, see [`value_eq`]). Containers order by size, matching the
/// distilled spec's "size for containers" rule; this is a shallow order, not
/// a deep structural comparison.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Nil, Value::Nil) => Ordering::Equal,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.as_str().cmp(y.as_str()),
        (Value::Vector(x), Value::Vector(y)) => x.slot.cmp(&y.slot),
        (Value::Map(x), Value::Map(y)) => x.slot.cmp(&y.slot),
        (Value::Sub(x), Value::Sub(y)) => x.0.cmp(&y.0),
        (Value::Closure(x), Value::Closure(y)) => {
            (Rc::as_ptr(x) as usize).cmp(&(Rc::as_ptr(y) as usize))
        }
        (Value::Coroutine(x), Value::Coroutine(y)) => x.slot.cmp(&y.slot),
        (Value::Callback(x), Value::Callback(y)) => x.0.cmp(&y.0),
        (Value::Userdata(x), Value::Userdata(y)) => x.slot.cmp(&y.slot),
        _ => Ordering::Equal,
    }
}

/// Base (non-meta) equality: pointer identity for strings (both interner
/// regions guarantee uniqueness, per §3's invariant), by-value for scalars,
/// by-handle (not deep) for containers. Meta-method `==` overrides live in
/// `weft-runtime`, which calls this as the fallback when a container has no
/// `meta` or declines to handle the operator.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x.ptr_eq(y),
        (Value::Vector(x), Value::Vector(y)) => x == y,
        (Value::Map(x), Value::Map(y)) => x == y,
        (Value::Sub(x), Value::Sub(y)) => x == y,
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Coroutine(x), Value::Coroutine(y)) => x == y,
        (Value::Callback(x), Value::Callback(y)) => x == y,
        (Value::Userdata(x), Value::Userdata(y)) => x == y,
        _ => false,
    }
}

/// Structural `PartialEq` delegates to [`value_eq`] (base equality, no meta
/// dispatch — meta-method `==` overrides live in `weft-runtime`, which has
/// access to the heap needed to invoke them). Mostly useful for tests and
/// for the compiler's constant-folding pass.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        value_eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;

    #[test]
    fn type_order_matches_spec() {
        let mut it = Interner::new();
        let s = it.intern("x");
        let ordered = [
            Value::Nil,
            Value::Int(0),
            Value::Float(0.0),
            Value::Bool(false),
            Value::Str(s),
        ];
        for w in ordered.windows(2) {
            assert_eq!(value_cmp(&w[0], &w[1]), Ordering::Less);
        }
    }

    #[test]
    fn string_equality_is_identity() {
        let mut it = Interner::new();
        let a = it.intern("same");
        let b = it.intern("same");
        assert!(value_eq(&Value::Str(a), &Value::Str(b)));
    }
}
