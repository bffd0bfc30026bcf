//! Coroutine state record (§3 "Coroutine", §4.7).
//!
//! A coroutine is plain data: its own operand stack, an auxiliary "other"
//! stack for values shunted aside by `SHUNT`/`SHIFT`, a call-frame stack, a
//! loop stack, a mark stack, the instruction pointer, and a lifecycle state.
//! Per design note §9 ("Coroutines as state records"), none of this requires
//! a language-level stackful-coroutine mechanism — `weft-runtime`'s scheduler
//! drives it with an explicit step loop, switching which `Coroutine`'s
//! fields the interpreter reads/writes rather than switching OS stacks.

use crate::interner::Sym;
use crate::value::{Handle, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoroState {
    Suspended,
    Running,
    Dead,
}

/// One local binding in a call frame: a name plus the value currently bound
/// to it in this frame only (§4.6 — no reference-capturing environment: a
/// nested function never writes back into an enclosing frame's bindings,
/// only reads them, see [`Frame::ancestors`]).
#[derive(Clone, Debug)]
pub struct LocalBinding {
    pub name: Sym,
    pub value: Value,
}

/// An invocation's own local bindings, heap-allocated so a nested function
/// value can hold onto it (`Rc::clone`, not a deep copy) after the
/// invocation that created it returns (§9 "an explicit environment record
/// per invocation").
pub type Env = Rc<RefCell<Vec<LocalBinding>>>;

/// A call-frame record (§3 "Frame").
pub struct Frame {
    pub saved_mark_depth: usize,
    pub saved_loop_depth: usize,
    pub return_ip: u32,
    pub env: Env,
    /// The lexical ancestor chain used by §4.6 name resolution: each
    /// enclosing function's id paired with its (possibly since-returned)
    /// environment, nearest scope first. Resolved once at invoke time —
    /// from the caller's own frame for a plain `Value::Sub`, or from a
    /// `Value::Closure`'s stored snapshot for an escaped one — rather than
    /// by re-walking the live call stack on every name lookup.
    pub ancestors: Vec<(u32, Env)>,
    /// The lexical ancestor chain populated by `PID` opcodes in this frame's
    /// own prelude, kept for introspection/disassembly; name resolution
    /// uses `ancestors` instead.
    pub scope_path: Vec<u32>,
    /// This frame's own function id.
    pub fn_id: u32,
}

impl Frame {
    pub fn new(
        return_ip: u32,
        fn_id: u32,
        saved_mark_depth: usize,
        saved_loop_depth: usize,
        ancestors: Vec<(u32, Env)>,
    ) -> Self {
        Frame {
            saved_mark_depth,
            saved_loop_depth,
            return_ip,
            env: Rc::new(RefCell::new(Vec::new())),
            ancestors,
            scope_path: Vec::new(),
            fn_id,
        }
    }

    pub fn find_local(&self, name: &Sym) -> Option<Value> {
        self.env
            .borrow()
            .iter()
            .rev()
            .find(|b| b.name.ptr_eq(name))
            .map(|b| b.value.clone())
    }

    pub fn set_local(&mut self, name: Sym, value: Value) {
        let mut env = self.env.borrow_mut();
        if let Some(b) = env.iter_mut().rev().find(|b| b.name.ptr_eq(&name)) {
            b.value = value;
        } else {
            env.push(LocalBinding { name, value });
        }
    }

    /// Finds the captured environment for lexical ancestor `fn_id`: this
    /// frame's own environment if it *is* that ancestor, else the matching
    /// entry in its resolved ancestor chain. Used when a nested function
    /// literal captures its own enclosing scopes (§9).
    pub fn env_for(&self, fn_id: u32) -> Option<Env> {
        if self.fn_id == fn_id {
            return Some(self.env.clone());
        }
        self.ancestors
            .iter()
            .find(|(id, _)| *id == fn_id)
            .map(|(_, env)| env.clone())
    }
}

/// What a `for` loop on the loop stack is iterating, and how far it has
/// gotten. §4.7/§6: integers, vectors, maps, subroutines/callbacks (as
/// generators), and coroutines are all valid `for` targets.
pub enum LoopKind {
    Range { next: i64, limit: i64 },
    Vector { handle: Handle, index: usize },
    Map { handle: Handle, index: usize },
    Generator { callee: Value, step: i64 },
    Coroutine { handle: Handle },
}

/// One entry on the loop stack: where `break`/`continue` jump to, plus the
/// iteration state.
pub struct LoopFrame {
    pub continue_ip: u32,
    pub break_ip: u32,
    pub kind: LoopKind,
}

/// A coroutine's full state (§3).
pub struct Coroutine {
    pub stack: Vec<Value>,
    pub other: Vec<Value>,
    pub frames: Vec<Frame>,
    pub mark_stack: Vec<usize>,
    pub loop_stack: Vec<LoopFrame>,
    pub pending_map: Option<Value>,
    pub ip: u32,
    pub state: CoroState,
}

impl Coroutine {
    /// A suspended coroutine whose body is `entry`, per §4.7
    /// `coroutine(f)`: "materializes a coroutine... leaving it SUSPENDED
    /// with its initial ip at f's entry."
    pub fn new_suspended(entry: u32) -> Self {
        Coroutine {
            stack: Vec::new(),
            other: Vec::new(),
            frames: Vec::new(),
            mark_stack: Vec::new(),
            loop_stack: Vec::new(),
            pending_map: None,
            ip: entry,
            state: CoroState::Suspended,
        }
    }

    /// The outermost coroutine created at `run()` time: already RUNNING,
    /// with no frames (its "frame" is the top-level module body).
    pub fn new_main(entry: u32) -> Self {
        Coroutine {
            stack: Vec::new(),
            other: Vec::new(),
            frames: Vec::new(),
            mark_stack: Vec::new(),
            loop_stack: Vec::new(),
            pending_map: None,
            ip: entry,
            state: CoroState::Running,
        }
    }
}
