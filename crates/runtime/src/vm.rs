//! The VM: owns the heap, the compiled module, the core/global scopes, and
//! the registered native callback table. §6.1 "VM creation" and §5 "host
//! embedding API" are split across this file and [`crate::host`].

use crate::corelib;
use crate::fault::{Fault, HostError};
use crate::interp::{Interp, StepOutcome};
use weft_compiler::opcode::Module;
use weft_core::{CollectStats, Coroutine, Env, Frame, Heap, Sym, VMap, Value};

/// A host-registered native callback. Takes the interpreter-facing
/// argument slice and returns its result values or a fault message.
pub type NativeFn = Box<dyn FnMut(&mut Vm, &[Value]) -> Result<Vec<Value>, Fault>>;

pub struct Vm {
    pub heap: Heap,
    pub module: Module,
    /// User-assigned globals (`global name = ...`), kept as a plain map
    /// outside the pooled heap since its lifetime is the VM's own, not
    /// subject to collection — its *contents* are still a GC root (§4.1).
    pub globals: VMap,
    /// Built-in names (`lib.min`, `assert`, `type`, ...), populated once at
    /// VM creation by [`corelib::install`]. Also a GC root.
    pub core_scope: VMap,
    pub natives: Vec<NativeFn>,
    main: Coroutine,
    /// Exchange stack for the host embedding API (§5), independent of any
    /// script coroutine's own operand stack.
    pub(crate) exchange: Vec<Value>,
}

impl Vm {
    pub fn new(source: &str) -> Result<Self, HostError> {
        let module = weft_compiler::compile(source)?;
        let mut heap = Heap::new();
        for s in &module.strings {
            heap.interner.intern(s);
        }
        heap.interner.promote();
        let main = new_coroutine_at(module.entry as u32, true, Vec::new());
        let mut vm = Vm {
            heap,
            module,
            globals: VMap::new(),
            core_scope: VMap::new(),
            natives: Vec::new(),
            main,
            exchange: Vec::new(),
        };
        corelib::install(&mut vm);
        Ok(vm)
    }

    /// Drives the main coroutine to completion (§6.1 "run"). A script that
    /// yields at the top level (outside any `resume`) faults, since there
    /// is no caller to resume it.
    pub fn run(&mut self) -> Result<Vec<Value>, HostError> {
        let _span = tracing::debug_span!("vm.run").entered();
        let mut main = std::mem::replace(&mut self.main, new_coroutine_at(0, false, Vec::new()));
        let result = Interp::new(self).run_coroutine(&mut main);
        self.main = main;
        match result? {
            StepOutcome::Returned(values) => Ok(values),
            StepOutcome::Yielded(_) => Err(HostError::Runtime(Fault::new(
                "top-level script yielded with no resumer",
                0,
            ))),
        }
    }

    /// Runs `callee` with `args` as an independent, synchronous call (used
    /// by [`crate::meta`] for operator overloads and by `lib.resume`'s
    /// first-call path). See [`crate::meta`]'s module doc for the
    /// consequence: a `yield` inside `callee` can't suspend across this
    /// boundary.
    pub fn call_value_sync(&mut self, callee: Value, args: Vec<Value>) -> Result<Vec<Value>, Fault> {
        match callee {
            Value::Sub(entry) => {
                let mut coro = new_coroutine_at(entry.0, true, Vec::new());
                for arg in args.into_iter().rev() {
                    coro.stack.push(arg);
                }
                match Interp::new(self).run_coroutine(&mut coro)? {
                    StepOutcome::Returned(values) => Ok(values),
                    StepOutcome::Yielded(_) => {
                        Err(Fault::new("cannot yield from a synchronous call", coro.ip))
                    }
                }
            }
            Value::Closure(closure) => {
                let mut coro = new_coroutine_at(closure.entry.0, true, closure.captured.clone());
                for arg in args.into_iter().rev() {
                    coro.stack.push(arg);
                }
                match Interp::new(self).run_coroutine(&mut coro)? {
                    StepOutcome::Returned(values) => Ok(values),
                    StepOutcome::Yielded(_) => {
                        Err(Fault::new("cannot yield from a synchronous call", coro.ip))
                    }
                }
            }
            Value::Callback(id) => {
                let mut native = std::mem::replace(&mut self.natives[id.0 as usize], Box::new(|_, _| Ok(vec![])));
                let result = native(self, &args);
                self.natives[id.0 as usize] = native;
                result
            }
            other => Err(Fault::new(format!("{} is not callable", other.type_name()), 0)),
        }
    }

    pub fn intern_transient(&mut self, s: &str) -> Sym {
        self.heap.interner.intern(s)
    }

    /// `lib.tostring`'s display rules: scalars print directly, containers
    /// print a short tag rather than their full contents (deep printing is
    /// a host/script-level concern, not a VM primitive).
    pub fn display_value(&self, v: &Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.as_str().to_string(),
            Value::Vector(h) => format!("vector<{}>", h.slot),
            Value::Map(h) => format!("map<{}>", h.slot),
            Value::Sub(e) => format!("function<{}>", e.0),
            Value::Closure(c) => format!("function<{}>", c.entry.0),
            Value::Coroutine(h) => format!("coroutine<{}>", h.slot),
            Value::Callback(id) => format!("function<native:{}>", id.0),
            Value::Userdata(h) => format!("userdata<{}>", h.slot),
        }
    }

    /// Collects garbage now (§5: explicit-only collection). Roots are the
    /// core scope, the global scope, every literal `Value::Sub` in the
    /// module (subs aren't pooled, so this is a no-op for them, but
    /// containers reachable from the module's string pool promotion have
    /// no analog either — only heap-resident values need rooting), and the
    /// main coroutine's own live state.
    pub fn collect(&mut self) -> CollectStats {
        let mut roots: Vec<Value> = Vec::new();
        roots.extend(self.globals.keys.iter().cloned());
        roots.extend(self.globals.vals.iter().cloned());
        roots.extend(self.core_scope.keys.iter().cloned());
        roots.extend(self.core_scope.vals.iter().cloned());
        roots.extend(coroutine_roots(&self.main));
        roots.extend(self.exchange.iter().cloned());
        self.heap.collect(roots)
    }
}

pub(crate) fn coroutine_roots(c: &Coroutine) -> Vec<Value> {
    let mut roots = Vec::new();
    roots.extend(c.stack.iter().cloned());
    roots.extend(c.other.iter().cloned());
    for f in &c.frames {
        roots.extend(f.env.borrow().iter().map(|b| b.value.clone()));
        for (_, env) in &f.ancestors {
            roots.extend(env.borrow().iter().map(|b| b.value.clone()));
        }
    }
    if let Some(p) = &c.pending_map {
        roots.push(p.clone());
    }
    roots
}

/// Builds a coroutine ready to execute `entry` (a chunk index), with its
/// initial frame already pushed so the interpreter never has an empty
/// frame stack mid-run. `ancestors` seeds the initial frame's captured
/// lexical-ancestor environments — non-empty when `entry` comes from a
/// `Value::Closure` rather than a bare `Value::Sub`.
pub(crate) fn new_coroutine_at(entry: u32, running: bool, ancestors: Vec<(u32, Env)>) -> Coroutine {
    let mut coro = if running {
        Coroutine::new_main(entry)
    } else {
        Coroutine::new_suspended(entry)
    };
    coro.frames.push(Frame::new(0, entry, 0, 0, ancestors));
    coro
}
