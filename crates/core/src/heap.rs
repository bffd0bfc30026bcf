//! The heap: the four typed object pools plus the string interner, and the
//! mark-and-sweep collector that walks them (§4.1).
//!
//! Collection never runs implicitly (§1 Non-goal, §5): it only happens when
//! [`Heap::collect`] is called, which the embedding host does at VM-creation
//! end, at VM destruction, at run end, and whenever a script or callback
//! invokes the `collect` primitive (§5).

use crate::container::{VMap, VVector};
use crate::coroutine::Coroutine;
use crate::interner::{Interner, Sym};
use crate::pool::Pool;
use crate::value::{Handle, Value};

/// Opaque host data attached via `make_userdata`, with an optional `meta`
/// value for operator dispatch (§4.8) just like vectors and maps.
pub struct Userdata {
    pub tag: Sym,
    pub data: Box<dyn std::any::Any>,
    pub meta: Option<Value>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    pub freed_vectors: usize,
    pub freed_maps: usize,
    pub freed_coroutines: usize,
    pub freed_userdata: usize,
    pub freed_strings: usize,
}

pub struct Heap {
    pub interner: Interner,
    pub vectors: Pool<VVector>,
    pub maps: Pool<VMap>,
    pub coroutines: Pool<Coroutine>,
    pub userdata: Pool<Userdata>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            interner: Interner::new(),
            vectors: Pool::new(),
            maps: Pool::new(),
            coroutines: Pool::new(),
            userdata: Pool::new(),
        }
    }

    pub fn alloc_vector(&mut self, v: VVector) -> Value {
        let (slot, generation) = self.vectors.alloc(v);
        Value::Vector(Handle { slot, generation })
    }

    pub fn alloc_map(&mut self, m: VMap) -> Value {
        let (slot, generation) = self.maps.alloc(m);
        Value::Map(Handle { slot, generation })
    }

    pub fn alloc_coroutine(&mut self, c: Coroutine) -> Value {
        let (slot, generation) = self.coroutines.alloc(c);
        Value::Coroutine(Handle { slot, generation })
    }

    pub fn alloc_userdata(&mut self, u: Userdata) -> Value {
        let (slot, generation) = self.userdata.alloc(u);
        Value::Userdata(Handle { slot, generation })
    }

    pub fn vector(&self, h: Handle) -> Option<&VVector> {
        self.vectors.get(h.slot, h.generation)
    }

    pub fn vector_mut(&mut self, h: Handle) -> Option<&mut VVector> {
        self.vectors.get_mut(h.slot, h.generation)
    }

    pub fn map(&self, h: Handle) -> Option<&VMap> {
        self.maps.get(h.slot, h.generation)
    }

    pub fn map_mut(&mut self, h: Handle) -> Option<&mut VMap> {
        self.maps.get_mut(h.slot, h.generation)
    }

    pub fn coroutine(&self, h: Handle) -> Option<&Coroutine> {
        self.coroutines.get(h.slot, h.generation)
    }

    pub fn coroutine_mut(&mut self, h: Handle) -> Option<&mut Coroutine> {
        self.coroutines.get_mut(h.slot, h.generation)
    }

    pub fn userdata(&self, h: Handle) -> Option<&Userdata> {
        self.userdata.get(h.slot, h.generation)
    }

    pub fn userdata_mut(&mut self, h: Handle) -> Option<&mut Userdata> {
        self.userdata.get_mut(h.slot, h.generation)
    }

    /// Clear all mark bits, mark everything reachable from `roots`, sweep
    /// every pool, then compact the young-string region.
    ///
    /// Roots are, per §4.1: "core scope, global scope, module table, every
    /// routine in the chain, and every literal in the bytecode" — the
    /// caller (`weft-runtime::Vm`) assembles that full root set and passes
    /// it here as an iterator of `Value`.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> CollectStats {
        self.vectors.clear_marks();
        self.maps.clear_marks();
        self.coroutines.clear_marks();
        self.userdata.clear_marks();

        // Closures live outside the pools (an `Rc`, not a `Handle`), so
        // there's no mark bit to dedupe on; a self-referential escaping
        // closure (a closure whose captured environment holds a binding
        // pointing back to itself) would otherwise recurse forever, so
        // track visited closures by pointer identity instead.
        let mut seen_closures: std::collections::HashSet<usize> = std::collections::HashSet::new();
        let mut queue: Vec<Value> = roots.into_iter().collect();
        while let Some(v) = queue.pop() {
            self.mark_one(&v, &mut queue, &mut seen_closures);
        }

        let freed_vectors = self.vectors.sweep();
        let freed_maps = self.maps.sweep();
        let freed_coroutines = self.coroutines.sweep();
        let freed_userdata = self.userdata.sweep();
        // Order matters: sweeping containers first drops the `Arc<str>`
        // clones they hold, so a young string's true liveness is visible by
        // the time we compact the interner.
        let before = self.interner.young_len();
        self.interner.sweep_young();
        let freed_strings = before - self.interner.young_len();

        CollectStats {
            freed_vectors,
            freed_maps,
            freed_coroutines,
            freed_userdata,
            freed_strings,
        }
    }

    fn mark_one(&mut self, v: &Value, queue: &mut Vec<Value>, seen_closures: &mut std::collections::HashSet<usize>) {
        match v {
            Value::Vector(h) => {
                if self.vectors.mark(h.slot, h.generation) {
                    if let Some(vec) = self.vectors.get(h.slot, h.generation) {
                        queue.extend(vec.items.iter().cloned());
                        if let Some(m) = &vec.meta {
                            queue.push(m.clone());
                        }
                    }
                }
            }
            Value::Map(h) => {
                if self.maps.mark(h.slot, h.generation) {
                    if let Some(map) = self.maps.get(h.slot, h.generation) {
                        queue.extend(map.keys.iter().cloned());
                        queue.extend(map.vals.iter().cloned());
                        if let Some(m) = &map.meta {
                            queue.push(m.clone());
                        }
                    }
                }
            }
            Value::Coroutine(h) => {
                if self.coroutines.mark(h.slot, h.generation) {
                    if let Some(c) = self.coroutines.get(h.slot, h.generation) {
                        queue.extend(c.stack.iter().cloned());
                        queue.extend(c.other.iter().cloned());
                        for f in &c.frames {
                            queue.extend(f.env.borrow().iter().map(|b| b.value.clone()));
                            for (_, env) in &f.ancestors {
                                queue.extend(env.borrow().iter().map(|b| b.value.clone()));
                            }
                        }
                        if let Some(p) = &c.pending_map {
                            queue.push(p.clone());
                        }
                    }
                }
            }
            Value::Userdata(h) => {
                if self.userdata.mark(h.slot, h.generation) {
                    if let Some(u) = self.userdata.get(h.slot, h.generation) {
                        if let Some(m) = &u.meta {
                            queue.push(m.clone());
                        }
                    }
                }
            }
            Value::Closure(c) => {
                if seen_closures.insert(std::rc::Rc::as_ptr(c) as usize) {
                    for (_, env) in &c.captured {
                        queue.extend(env.borrow().iter().map(|b| b.value.clone()));
                    }
                }
            }
            // Nil/Int/Float/Bool/Sub/Callback carry no heap reference.
            // Str identity already keeps the Arc<str> alive for the
            // duration this Value exists; no separate mark bit needed.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_with_no_roots_frees_everything() {
        let mut heap = Heap::new();
        heap.alloc_vector(VVector::new());
        heap.alloc_map(VMap::new());
        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.freed_vectors, 1);
        assert_eq!(stats.freed_maps, 1);
        assert_eq!(heap.vectors.len(), 0);
        assert_eq!(heap.maps.len(), 0);
    }

    #[test]
    fn collect_keeps_rooted_vector_and_its_elements() {
        let mut heap = Heap::new();
        let inner = heap.alloc_map(VMap::new());
        let mut outer = VVector::new();
        outer.push(inner.clone());
        let root = heap.alloc_vector(outer);

        let stats = heap.collect([root.clone()]);
        assert_eq!(stats.freed_vectors, 0);
        assert_eq!(stats.freed_maps, 0);

        if let Value::Vector(h) = root {
            assert_eq!(heap.vector(h).unwrap().len(), 1);
        } else {
            panic!("expected vector");
        }
    }

    #[test]
    fn unreachable_nested_container_is_freed_but_root_survives() {
        let mut heap = Heap::new();
        let dropped_child = heap.alloc_map(VMap::new());
        let root = heap.alloc_vector(VVector::new());
        drop(dropped_child);

        let stats = heap.collect([root]);
        assert_eq!(stats.freed_maps, 1);
    }
}
