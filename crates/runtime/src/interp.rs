//! The opcode dispatch loop (§4/§6): drives one [`Coroutine`] at a time,
//! either to a `RETURN` (script done) or a `YIELD` (suspended, resumable
//! later by [`crate::corelib`]'s `coroutine.resume`).

use crate::fault::Fault;
use crate::meta;
use crate::vm::Vm;
use weft_compiler::opcode::{Inst, Op};
use weft_core::{
    ClosureObj, Coroutine, CoroState, Env, Frame, LoopFrame, LoopKind, Sym, SubEntry, Value, VMap, VVector,
};

pub enum StepOutcome {
    Returned(Vec<Value>),
    Yielded(Vec<Value>),
}

pub struct Interp<'a> {
    vm: &'a mut Vm,
}

impl<'a> Interp<'a> {
    pub fn new(vm: &'a mut Vm) -> Self {
        Interp { vm }
    }

    fn sym(&mut self, idx: u32) -> Sym {
        let s = self.vm.module.strings[idx as usize].clone();
        self.vm.intern_transient(&s)
    }

    pub fn run_coroutine(&mut self, coro: &mut Coroutine) -> Result<StepOutcome, Fault> {
        coro.state = CoroState::Running;
        loop {
            if coro.frames.is_empty() {
                return Ok(StepOutcome::Returned(Vec::new()));
            }
            let chunk_idx = coro.frames.last().unwrap().fn_id as usize;
            let chunk = self
                .vm
                .module
                .chunks
                .get(chunk_idx)
                .ok_or_else(|| Fault::new("invalid chunk index", coro.ip))?;
            if coro.ip as usize >= chunk.code.len() {
                return Ok(StepOutcome::Returned(Vec::new()));
            }
            let inst = chunk.code[coro.ip as usize].clone();
            let here = coro.ip;
            coro.ip += 1;
            #[cfg(feature = "trace-opcodes")]
            tracing::trace!(ip = here, op = ?inst.op, "dispatch");
            match self.step(coro, &inst, here)? {
                Flow::Continue => {}
                Flow::Return(values) => {
                    let popped = coro.frames.pop().expect("checked non-empty above");
                    if coro.frames.is_empty() {
                        coro.state = CoroState::Dead;
                        return Ok(StepOutcome::Returned(values));
                    }
                    coro.ip = popped.return_ip;
                    coro.mark_stack.truncate(popped.saved_mark_depth);
                    coro.loop_stack.truncate(popped.saved_loop_depth);
                    for v in values {
                        coro.stack.push(v);
                    }
                }
                Flow::Yield(values) => {
                    coro.state = CoroState::Suspended;
                    return Ok(StepOutcome::Yielded(values));
                }
            }
        }
    }

    fn step(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        match inst.op {
            Op::Stop => Ok(Flow::Return(Vec::new())),
            Op::Jmp => {
                coro.ip = inst.operand as u32;
                Ok(Flow::Continue)
            }
            Op::Jfalse => {
                let v = pop(coro, ip)?;
                if !v.truthy() {
                    coro.ip = inst.operand as u32;
                }
                Ok(Flow::Continue)
            }
            Op::Jtrue => {
                let v = pop(coro, ip)?;
                if v.truthy() {
                    coro.ip = inst.operand as u32;
                }
                Ok(Flow::Continue)
            }
            Op::Return => {
                let n = inst.operand as usize;
                let at = coro.stack.len().saturating_sub(n);
                let values = coro.stack.split_off(at);
                Ok(Flow::Return(values))
            }
            Op::Call => self.do_call(coro, inst, ip),
            Op::For => self.do_for(coro, inst, ip),
            Op::Loop => self.do_loop(coro, inst),
            Op::Unloop => {
                coro.loop_stack.pop();
                Ok(Flow::Continue)
            }
            Op::Break | Op::Continue => {
                // Both forms are lowered to plain `Jmp` by the emitter;
                // these opcodes are not currently produced, kept only so
                // the dispatch table stays exhaustive with the bytecode's
                // named instruction set.
                Ok(Flow::Continue)
            }
            Op::Mark => {
                // `operand` back-dates the mark by that many already-pushed
                // values (e.g. a method call's receiver, pushed before the
                // envelope starts) so they're retroactively counted as part
                // of the upcoming reconciled span.
                let base = coro.stack.len().saturating_sub(inst.operand as usize);
                coro.mark_stack.push(base);
                Ok(Flow::Continue)
            }
            Op::Limit => {
                let n = inst.operand as usize;
                let mark = coro.mark_stack.pop().unwrap_or(0);
                let have = coro.stack.len() - mark;
                if have < n {
                    coro.stack.resize(mark + n, Value::Nil);
                } else if have > n {
                    coro.stack.truncate(mark + n);
                }
                Ok(Flow::Continue)
            }
            Op::Clean => {
                let mark = coro.mark_stack.last().copied().unwrap_or(0);
                coro.stack.truncate(mark);
                Ok(Flow::Continue)
            }
            Op::Copy => {
                let v = top(coro, ip)?.clone();
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Shunt => {
                let v = pop(coro, ip)?;
                coro.other.push(v);
                Ok(Flow::Continue)
            }
            Op::Shift => {
                let v = coro
                    .other
                    .pop()
                    .ok_or_else(|| Fault::new("SHIFT on empty auxiliary stack", ip))?;
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Drop => {
                pop(coro, ip)?;
                Ok(Flow::Continue)
            }
            Op::Lit => {
                let v = if let Some(idx) = inst.str_idx {
                    let s = self.sym(idx);
                    Value::Str(s)
                } else {
                    match inst.lit.clone().unwrap_or(Value::Nil) {
                        Value::Sub(entry) => self.make_function_value(coro, entry),
                        other => other,
                    }
                };
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Find | Op::Fname => {
                let idx = inst.str_idx.expect("FIND/FNAME always carries a name");
                let name = self.sym(idx);
                let v = self.resolve_name(coro, &name, ip)?;
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Get | Op::Gname => self.do_get(coro, inst, ip),
            Op::Set => {
                let value = pop(coro, ip)?;
                let idx = inst.str_idx.expect("SET always carries a name");
                let name = self.sym(idx);
                coro.frames.last_mut().unwrap().set_local(name, value);
                Ok(Flow::Continue)
            }
            Op::Assign => {
                let value = pop(coro, ip)?;
                let idx = inst.str_idx.expect("ASSIGN always carries a name");
                let name = self.sym(idx);
                self.vm.globals.set(Value::Str(name), value);
                Ok(Flow::Continue)
            }
            Op::Assignl => {
                let value = pop(coro, ip)?;
                let idx = inst.str_idx.expect("ASSIGNL always carries a name");
                let name = self.sym(idx);
                coro.frames.last_mut().unwrap().set_local(name, value);
                Ok(Flow::Continue)
            }
            Op::Assignp => self.do_assignp(coro, inst, ip),
            Op::Pid => {
                coro.frames
                    .last_mut()
                    .unwrap()
                    .scope_path
                    .push(inst.operand as u32);
                Ok(Flow::Continue)
            }
            Op::Add | Op::AddLit => self.do_arith(coro, inst, ip, meta::OP_ADD),
            Op::Sub => self.do_arith(coro, inst, ip, meta::OP_SUB),
            Op::Mul | Op::MulLit => self.do_arith(coro, inst, ip, meta::OP_MUL),
            Op::Div => self.do_arith(coro, inst, ip, meta::OP_DIV),
            Op::Mod => self.do_arith(coro, inst, ip, meta::OP_MOD),
            Op::Neg => {
                let v = pop(coro, ip)?;
                let result = match v {
                    Value::Int(i) => Value::Int(-i),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(Fault::new(
                            format!("cannot negate a {}", other.type_name()),
                            ip,
                        ))
                    }
                };
                coro.stack.push(result);
                Ok(Flow::Continue)
            }
            Op::Not => {
                let v = pop(coro, ip)?;
                coro.stack.push(Value::Bool(!v.truthy()));
                Ok(Flow::Continue)
            }
            Op::Eq => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::eq(self.vm, a, b)?;
                coro.stack.push(Value::Bool(r));
                Ok(Flow::Continue)
            }
            Op::Ne => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::eq(self.vm, a, b)?;
                coro.stack.push(Value::Bool(!r));
                Ok(Flow::Continue)
            }
            Op::Lt => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::cmp(self.vm, meta::OP_LT, a, b)?;
                coro.stack.push(Value::Bool(r));
                Ok(Flow::Continue)
            }
            Op::Lte => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::cmp(self.vm, meta::OP_LTE, a, b)?;
                coro.stack.push(Value::Bool(r));
                Ok(Flow::Continue)
            }
            Op::Gt => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::cmp(self.vm, meta::OP_LT, b, a)?;
                coro.stack.push(Value::Bool(r));
                Ok(Flow::Continue)
            }
            Op::Gte => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::cmp(self.vm, meta::OP_LTE, b, a)?;
                coro.stack.push(Value::Bool(r));
                Ok(Flow::Continue)
            }
            Op::And => {
                let (a, b) = pop2(coro, ip)?;
                coro.stack.push(Value::Bool(a.truthy() && b.truthy()));
                Ok(Flow::Continue)
            }
            Op::Or => {
                let (a, b) = pop2(coro, ip)?;
                coro.stack.push(Value::Bool(a.truthy() || b.truthy()));
                Ok(Flow::Continue)
            }
            Op::Concat => {
                let (a, b) = pop2(coro, ip)?;
                let r = meta::concat(self.vm, a, b)?;
                coro.stack.push(r);
                Ok(Flow::Continue)
            }
            Op::Count => {
                let v = pop(coro, ip)?;
                let n = match &v {
                    Value::Str(s) => s.as_str().chars().count() as i64,
                    Value::Vector(h) => self
                        .vm
                        .heap
                        .vector(*h)
                        .map(|c| c.len() as i64)
                        .ok_or_else(|| Fault::new("stale vector handle", ip))?,
                    Value::Map(h) => self
                        .vm
                        .heap
                        .map(*h)
                        .map(|c| c.len() as i64)
                        .ok_or_else(|| Fault::new("stale map handle", ip))?,
                    other => {
                        return Err(Fault::new(
                            format!("cannot take '#' of a {}", other.type_name()),
                            ip,
                        ))
                    }
                };
                coro.stack.push(Value::Int(n));
                Ok(Flow::Continue)
            }
            Op::Match => {
                let (a, b) = pop2(coro, ip)?;
                let (Value::Str(subject), Value::Str(pattern)) = (&a, &b) else {
                    return Err(Fault::new("'~' requires two strings", ip));
                };
                let re = regex::Regex::new(pattern.as_str())
                    .map_err(|e| Fault::new(format!("invalid pattern: {e}"), ip))?;
                coro.stack.push(Value::Bool(re.is_match(subject.as_str())));
                Ok(Flow::Continue)
            }
            Op::Unpack => {
                let v = pop(coro, ip)?;
                match v {
                    Value::Vector(h) => {
                        let items = self
                            .vm
                            .heap
                            .vector(h)
                            .map(|c| c.items.clone())
                            .ok_or_else(|| Fault::new("stale vector handle", ip))?;
                        coro.stack.extend(items);
                    }
                    other => coro.stack.push(other),
                }
                Ok(Flow::Continue)
            }
            Op::Vector => {
                let v = self.vm.heap.alloc_vector(VVector::new());
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Vpush => {
                let item = pop(coro, ip)?;
                let container = top(coro, ip)?.clone();
                let Value::Vector(h) = container else {
                    return Err(Fault::new("VPUSH target is not a vector", ip));
                };
                self.vm
                    .heap
                    .vector_mut(h)
                    .ok_or_else(|| Fault::new("stale vector handle", ip))?
                    .push(item);
                Ok(Flow::Continue)
            }
            Op::Map => {
                let v = self.vm.heap.alloc_map(VMap::new());
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Unmap => {
                let (key, value) = pop2(coro, ip)?;
                let container = top(coro, ip)?.clone();
                let Value::Map(h) = container else {
                    return Err(Fault::new("UNMAP target is not a map", ip));
                };
                self.vm
                    .heap
                    .map_mut(h)
                    .ok_or_else(|| Fault::new("stale map handle", ip))?
                    .set(key, value);
                Ok(Flow::Continue)
            }
            Op::MetaSet => {
                let meta_val = pop(coro, ip)?;
                let container = pop(coro, ip)?;
                match container {
                    Value::Vector(h) => {
                        self.vm
                            .heap
                            .vector_mut(h)
                            .ok_or_else(|| Fault::new("stale vector handle", ip))?
                            .meta = Some(meta_val);
                    }
                    Value::Map(h) => {
                        self.vm
                            .heap
                            .map_mut(h)
                            .ok_or_else(|| Fault::new("stale map handle", ip))?
                            .meta = Some(meta_val);
                    }
                    Value::Userdata(h) => {
                        self.vm
                            .heap
                            .userdata_mut(h)
                            .ok_or_else(|| Fault::new("stale userdata handle", ip))?
                            .meta = Some(meta_val);
                    }
                    other => {
                        return Err(Fault::new(
                            format!("{} cannot carry a meta table", other.type_name()),
                            ip,
                        ))
                    }
                }
                Ok(Flow::Continue)
            }
            Op::MetaGet => {
                let container = pop(coro, ip)?;
                let meta_val = match container {
                    Value::Vector(h) => self.vm.heap.vector(h).and_then(|c| c.meta.clone()),
                    Value::Map(h) => self.vm.heap.map(h).and_then(|c| c.meta.clone()),
                    Value::Userdata(h) => self.vm.heap.userdata(h).and_then(|c| c.meta.clone()),
                    _ => None,
                };
                coro.stack.push(meta_val.unwrap_or(Value::Nil));
                Ok(Flow::Continue)
            }
            Op::Coroutine => {
                let callee = pop(coro, ip)?;
                let (entry, ancestors) = match callee {
                    Value::Sub(entry) => (entry.0, Vec::new()),
                    Value::Closure(c) => (c.entry.0, c.captured.clone()),
                    _ => return Err(Fault::new("coroutine() requires a function", ip)),
                };
                let new_coro = crate::vm::new_coroutine_at(entry, false, ancestors);
                let v = self.vm.heap.alloc_coroutine(new_coro);
                coro.stack.push(v);
                Ok(Flow::Continue)
            }
            Op::Resume => self.do_resume(coro, inst, ip),
            Op::Yield => {
                let n = inst.operand as usize;
                let at = coro.stack.len().saturating_sub(n);
                let values = coro.stack.split_off(at);
                Ok(Flow::Yield(values))
            }
            Op::Cfunc => self.do_cfunc(coro, inst, ip),
            Op::Update => Err(Fault::new("UPDATE is not produced by this grammar", ip)),
        }
    }

    /// §4.6 step 4 / §7: local, then each captured lexical ancestor (in the
    /// current frame's own `ancestors`, resolved once at invoke time rather
    /// than by re-walking the live call stack — see [`weft_core::Frame`]),
    /// then global, then core scope. A miss everywhere is a fatal fault, not
    /// an implicit `nil`.
    fn resolve_name(&mut self, coro: &mut Coroutine, name: &Sym, ip: u32) -> Result<Value, Fault> {
        let frame = coro.frames.last().unwrap();
        if let Some(v) = frame.find_local(name) {
            return Ok(v);
        }
        for (_, env) in &frame.ancestors {
            if let Some(v) = env
                .borrow()
                .iter()
                .rev()
                .find(|b| b.name.ptr_eq(name))
                .map(|b| b.value.clone())
            {
                return Ok(v);
            }
        }
        let key = Value::Str(name.clone());
        if self.vm.globals.contains(&key) {
            return Ok(self.vm.globals.get(&key));
        }
        if self.vm.core_scope.contains(&key) {
            return Ok(self.vm.core_scope.get(&key));
        }
        Err(Fault::new(format!("unknown name '{}'", name.as_str()), ip))
    }

    /// Scans a chunk's leading `Op::Pid` run — emitted once per lexical
    /// ancestor a nested function body refers to, always at the start of
    /// its own chunk — to learn which enclosing invocations it needs an
    /// environment from, without depending on `scope_path`, which isn't
    /// populated yet for a function that hasn't been entered.
    fn ancestor_ids_of(&self, entry: u32) -> Vec<u32> {
        let Some(chunk) = self.vm.module.chunks.get(entry as usize) else {
            return Vec::new();
        };
        chunk
            .code
            .iter()
            .take_while(|i| i.op == Op::Pid)
            .map(|i| i.operand as u32)
            .collect()
    }

    /// Promotes a `Value::Sub` literal into a `Value::Closure` when its body
    /// needs lexical ancestors, capturing each one's `Env` from the
    /// currently-executing frame (its defining invocation) by `Rc` clone
    /// (§9). A nested function with no free variables stays a plain `Sub`.
    fn make_function_value(&mut self, coro: &Coroutine, entry: SubEntry) -> Value {
        let ids = self.ancestor_ids_of(entry.0);
        if ids.is_empty() {
            return Value::Sub(entry);
        }
        let frame = coro.frames.last().unwrap();
        let captured: Vec<(u32, Env)> = ids.into_iter().filter_map(|id| frame.env_for(id).map(|env| (id, env))).collect();
        Value::Closure(std::rc::Rc::new(ClosureObj { entry, captured }))
    }

    fn do_get(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let key = if let Some(idx) = inst.str_idx {
            Value::Str(self.sym(idx))
        } else {
            pop(coro, ip)?
        };
        let container = pop(coro, ip)?;
        let result = self.index_get(&container, &key, ip)?;
        coro.stack.push(result);
        Ok(Flow::Continue)
    }

    fn index_get(&self, container: &Value, key: &Value, ip: u32) -> Result<Value, Fault> {
        match container {
            Value::Map(h) => Ok(self
                .vm
                .heap
                .map(*h)
                .ok_or_else(|| Fault::new("stale map handle", ip))?
                .get(key)),
            Value::Vector(h) => {
                let vec = self
                    .vm
                    .heap
                    .vector(*h)
                    .ok_or_else(|| Fault::new("stale vector handle", ip))?;
                match key {
                    Value::Int(i) if *i >= 0 => Ok(vec.get(*i as usize)),
                    Value::Int(_) => Err(Fault::new("negative vector index", ip)),
                    other => Err(Fault::new(
                        format!("cannot index a vector with a {}", other.type_name()),
                        ip,
                    )),
                }
            }
            Value::Nil => Err(Fault::new("attempt to index a nil value", ip)),
            other => Err(Fault::new(format!("cannot index a {}", other.type_name()), ip)),
        }
    }

    fn do_assignp(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let key = if let Some(idx) = inst.str_idx {
            Value::Str(self.sym(idx))
        } else {
            pop(coro, ip)?
        };
        let container = pop(coro, ip)?;
        let value = pop(coro, ip)?;
        match container {
            Value::Map(h) => {
                self.vm
                    .heap
                    .map_mut(h)
                    .ok_or_else(|| Fault::new("stale map handle", ip))?
                    .set(key, value);
            }
            Value::Vector(h) => {
                let Value::Int(i) = key else {
                    return Err(Fault::new("vector index must be an int", ip));
                };
                if i < 0 {
                    return Err(Fault::new("negative vector index", ip));
                }
                self.vm
                    .heap
                    .vector_mut(h)
                    .ok_or_else(|| Fault::new("stale vector handle", ip))?
                    .set(i as usize, value)
                    .map_err(|e| Fault::new(e, ip))?;
            }
            other => {
                return Err(Fault::new(
                    format!("cannot assign into a {}", other.type_name()),
                    ip,
                ))
            }
        }
        Ok(Flow::Continue)
    }

    fn do_arith(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32, op: &str) -> Result<Flow, Fault> {
        let (a, b) = if let Some(lit) = &inst.lit {
            let a = pop(coro, ip)?;
            (a, lit.clone())
        } else {
            pop2(coro, ip)?
        };
        let result = meta::arith(self.vm, ip, op, a, b)?;
        coro.stack.push(result);
        Ok(Flow::Continue)
    }

    /// `Op::Call`'s callee is staged on the auxiliary stack by a `SHUNT`
    /// immediately before the argument envelope was built (§4.3, emitted by
    /// [`weft_compiler::emitter`]'s `Chain::Call`/`Chain::Method` lowering),
    /// so the `n` values `LIMIT` just reconciled on the main stack are args
    /// only, never the callee itself.
    fn do_call(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let n = inst.operand as usize;
        let callee = coro
            .other
            .pop()
            .ok_or_else(|| Fault::new("CALL with no staged callee", ip))?;
        if coro.stack.len() < n {
            return Err(Fault::new("CALL with too few argument values on the stack", ip));
        }
        self.invoke(coro, callee, n, ip)
    }

    fn do_cfunc(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let idx = inst.str_idx.expect("CFUNC always carries a name");
        let name = self.sym(idx);
        let callee = self.resolve_name(coro, &name, ip)?;
        let n = inst.operand as usize;
        self.invoke(coro, callee, n, ip)
    }

    fn invoke(&mut self, coro: &mut Coroutine, callee: Value, n_args: usize, ip: u32) -> Result<Flow, Fault> {
        match callee {
            Value::Sub(entry) => {
                let saved_mark = coro.mark_stack.len();
                let saved_loop = coro.loop_stack.len();
                let ids = self.ancestor_ids_of(entry.0);
                let ancestors: Vec<(u32, Env)> = {
                    let caller = coro.frames.last().unwrap();
                    ids.into_iter().filter_map(|id| caller.env_for(id).map(|env| (id, env))).collect()
                };
                coro.frames
                    .push(Frame::new(coro.ip, entry.0, saved_mark, saved_loop, ancestors));
                coro.ip = 0;
                Ok(Flow::Continue)
            }
            Value::Closure(closure) => {
                let saved_mark = coro.mark_stack.len();
                let saved_loop = coro.loop_stack.len();
                coro.frames.push(Frame::new(
                    coro.ip,
                    closure.entry.0,
                    saved_mark,
                    saved_loop,
                    closure.captured.clone(),
                ));
                coro.ip = 0;
                Ok(Flow::Continue)
            }
            Value::Callback(id) => {
                let args = coro.stack.split_off(coro.stack.len().saturating_sub(n_args));
                let mut native = std::mem::replace(
                    &mut self.vm.natives[id.0 as usize],
                    Box::new(|_, _| Ok(vec![])),
                );
                let result = native(self.vm, &args);
                self.vm.natives[id.0 as usize] = native;
                // Native callbacks don't see the call-site `ip` (§6
                // reentrancy: they only get `&mut Vm` and their args), so
                // stamp it on here rather than leaving every fault at ip 0.
                let values = result.map_err(|f| if f.ip == 0 { Fault::new(f.message, ip) } else { f })?;
                coro.stack.extend(values);
                Ok(Flow::Continue)
            }
            other => Err(Fault::new(format!("{} is not callable", other.type_name()), ip)),
        }
    }

    fn do_for(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let iterable = pop(coro, ip)?;
        let kind = self.loop_kind_for(iterable, ip)?;
        let mut loop_frame = LoopFrame {
            continue_ip: inst.operand as u32,
            break_ip: inst.operand as u32,
            kind,
        };
        match self.advance_loop(&mut loop_frame, ip)? {
            Some((value, key)) => {
                coro.stack.push(value);
                if let Some(k) = key {
                    coro.stack.push(k);
                }
                coro.loop_stack.push(loop_frame);
                Ok(Flow::Continue)
            }
            None => {
                coro.ip = inst.operand as u32;
                Ok(Flow::Continue)
            }
        }
    }

    fn do_loop(&mut self, coro: &mut Coroutine, inst: &Inst) -> Result<Flow, Fault> {
        let ip = coro.ip;
        let Some(mut loop_frame) = coro.loop_stack.pop() else {
            return Err(Fault::new("LOOP with no active loop frame", ip));
        };
        match self.advance_loop(&mut loop_frame, ip)? {
            Some((value, key)) => {
                coro.stack.push(value);
                if let Some(k) = key {
                    coro.stack.push(k);
                }
                coro.ip = inst.operand as u32 + 1;
                coro.loop_stack.push(loop_frame);
            }
            None => {
                coro.ip = loop_frame.break_ip;
            }
        }
        Ok(Flow::Continue)
    }

    fn loop_kind_for(&self, v: Value, ip: u32) -> Result<LoopKind, Fault> {
        match v {
            Value::Vector(h) => Ok(LoopKind::Vector { handle: h, index: 0 }),
            Value::Map(h) => Ok(LoopKind::Map { handle: h, index: 0 }),
            Value::Coroutine(h) => Ok(LoopKind::Coroutine { handle: h }),
            Value::Sub(_) | Value::Closure(_) | Value::Callback(_) => Ok(LoopKind::Generator { callee: v, step: 0 }),
            other => Err(Fault::new(
                format!("cannot iterate over a {}", other.type_name()),
                ip,
            )),
        }
    }

    /// Advances one step of the loop, per §4.7's for-with-callback-generator
    /// convention: a vector/map yields `(value, key)` pairs by position, a
    /// generator callable is invoked with a 0-based step and must itself
    /// return `(value[, key])` or `nil` to signal exhaustion, and a
    /// coroutine is resumed once per iteration.
    fn advance_loop(&mut self, lf: &mut LoopFrame, ip: u32) -> Result<Option<(Value, Option<Value>)>, Fault> {
        match &mut lf.kind {
            LoopKind::Range { next, limit } => {
                if *next >= *limit {
                    Ok(None)
                } else {
                    let v = *next;
                    *next += 1;
                    Ok(Some((Value::Int(v), None)))
                }
            }
            LoopKind::Vector { handle, index } => {
                let len = self
                    .vm
                    .heap
                    .vector(*handle)
                    .ok_or_else(|| Fault::new("stale vector handle", ip))?
                    .len();
                if *index >= len {
                    return Ok(None);
                }
                let value = self.vm.heap.vector(*handle).unwrap().get(*index);
                let key = Value::Int(*index as i64);
                *index += 1;
                Ok(Some((value, Some(key))))
            }
            LoopKind::Map { handle, index } => {
                let map = self
                    .vm
                    .heap
                    .map(*handle)
                    .ok_or_else(|| Fault::new("stale map handle", ip))?;
                if *index >= map.len() {
                    return Ok(None);
                }
                let key = map.keys[*index].clone();
                let value = map.vals[*index].clone();
                *index += 1;
                Ok(Some((value, Some(key))))
            }
            LoopKind::Generator { callee, step } => {
                let args = vec![Value::Int(*step)];
                *step += 1;
                let mut results = self.vm.call_value_sync(callee.clone(), args)?;
                if results.is_empty() || matches!(results[0], Value::Nil) {
                    return Ok(None);
                }
                let value = results.remove(0);
                let key = if results.is_empty() { None } else { Some(results.remove(0)) };
                Ok(Some((value, key)))
            }
            LoopKind::Coroutine { handle } => {
                let mut coro = self
                    .vm
                    .heap
                    .coroutine_mut(*handle)
                    .map(std::mem::take)
                    .ok_or_else(|| Fault::new("stale coroutine handle", ip))?;
                let outcome = self.run_coroutine(&mut coro);
                if let Some(slot) = self.vm.heap.coroutine_mut(*handle) {
                    *slot = coro;
                }
                match outcome? {
                    StepOutcome::Yielded(mut values) => {
                        if values.is_empty() {
                            Ok(None)
                        } else {
                            let value = values.remove(0);
                            let key = if values.is_empty() { None } else { Some(values.remove(0)) };
                            Ok(Some((value, key)))
                        }
                    }
                    StepOutcome::Returned(_) => Ok(None),
                }
            }
        }
    }

    fn do_resume(&mut self, coro: &mut Coroutine, inst: &Inst, ip: u32) -> Result<Flow, Fault> {
        let n = inst.operand as usize;
        let mut args = coro.stack.split_off(coro.stack.len().saturating_sub(n));
        let target = if args.is_empty() {
            return Err(Fault::new("resume requires a coroutine argument", ip));
        } else {
            args.remove(0)
        };
        let Value::Coroutine(h) = target else {
            return Err(Fault::new("resume() requires a coroutine", ip));
        };
        let mut target_coro = self
            .vm
            .heap
            .coroutine_mut(h)
            .map(std::mem::take)
            .ok_or_else(|| Fault::new("stale coroutine handle", ip))?;
        target_coro.stack.extend(args);
        let outcome = self.run_coroutine(&mut target_coro);
        if let Some(slot) = self.vm.heap.coroutine_mut(h) {
            *slot = target_coro;
        }
        let values = match outcome? {
            StepOutcome::Yielded(v) | StepOutcome::Returned(v) => v,
        };
        coro.stack.extend(values);
        Ok(Flow::Continue)
    }
}

enum Flow {
    Continue,
    Return(Vec<Value>),
    Yield(Vec<Value>),
}

fn pop(coro: &mut Coroutine, ip: u32) -> Result<Value, Fault> {
    coro.stack
        .pop()
        .ok_or_else(|| Fault::new("operand stack underflow", ip))
}

fn pop2(coro: &mut Coroutine, ip: u32) -> Result<(Value, Value), Fault> {
    let b = pop(coro, ip)?;
    let a = pop(coro, ip)?;
    Ok((a, b))
}

fn top(coro: &Coroutine, ip: u32) -> Result<&Value, Fault> {
    coro.stack
        .last()
        .ok_or_else(|| Fault::new("operand stack underflow", ip))
}
