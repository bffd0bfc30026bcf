//! AST-to-bytecode lowering (§4.3) plus the peephole fusion pass.
//!
//! Each `function` body becomes its own [`Chunk`]; the script's top level is
//! chunk 0. Multi-value sites — call arguments, return values, multiple
//! assignment — are bracketed with `MARK ... LIMIT n`: `MARK` remembers the
//! current stack depth, the bracketed expressions push their values
//! (possibly themselves multi-valued, if the last one is a call or `...`),
//! and `LIMIT n` reconciles however many values ended up above the mark
//! down to exactly `n` by padding with `nil` or dropping the excess.

use crate::ast::{BinOp, Chain, Node, Program, StrPart, UnOp};
use crate::opcode::{Chunk, Inst, Module, Op};
use std::collections::HashMap;
use weft_core::Value;

pub struct Emitter {
    chunks: Vec<Chunk>,
    strings: HashMap<String, u32>,
    string_list: Vec<String>,
    /// Stack of active loop contexts, used to resolve `break`/`continue`
    /// jump targets once the loop's end is known.
    loop_stack: Vec<LoopCtx>,
    /// Chunk ids of every function lexically enclosing the one currently
    /// being compiled, outermost (chunk 0, the script body) first. A nested
    /// function's prelude emits one `PID` per entry, innermost first, so
    /// `weft-runtime`'s scope-path walk checks the nearest lexical scope
    /// before wider ones (§4.6).
    fn_id_stack: Vec<u32>,
}

struct LoopCtx {
    break_jumps: Vec<usize>,
    /// `continue` jump sites, back-patched once the loop's advance point is
    /// known: a `while`'s condition re-check (known up front) or a `for`'s
    /// `LOOP` instruction (only known after the body is emitted).
    continue_jumps: Vec<usize>,
}

impl Emitter {
    pub fn compile(program: &Program) -> Module {
        let mut e = Emitter {
            chunks: Vec::new(),
            strings: HashMap::new(),
            string_list: Vec::new(),
            loop_stack: Vec::new(),
            fn_id_stack: vec![0],
        };
        let mut top = Chunk::new("<script>", 0);
        e.emit_block(&mut top, &program.body);
        top.push(Inst::simple(Op::Stop));
        e.chunks.push(top);
        for chunk in &mut e.chunks {
            fuse_peephole(chunk);
        }
        Module {
            chunks: e.chunks,
            entry: 0,
            strings: e.string_list,
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.strings.get(s) {
            return idx;
        }
        let idx = self.string_list.len() as u32;
        self.string_list.push(s.to_string());
        self.strings.insert(s.to_string(), idx);
        idx
    }

    fn emit_block(&mut self, chunk: &mut Chunk, stmts: &[Node]) {
        for s in stmts {
            self.emit_stmt(chunk, s);
        }
    }

    /// Emits a statement, discarding any value it produces (statements that
    /// are really expressions used for side effect, e.g. a bare call).
    fn emit_stmt(&mut self, chunk: &mut Chunk, node: &Node) {
        match node {
            Node::If {
                cond,
                then_body,
                else_body,
            } => self.emit_if(chunk, cond, then_body, else_body.as_deref()),
            Node::While { cond, body } => self.emit_while(chunk, cond, body),
            Node::For {
                key,
                value,
                iter,
                body,
            } => self.emit_for(chunk, key.as_deref(), value, iter, body),
            Node::Function {
                name: Some(name),
                params,
                body,
            } => {
                let entry = self.emit_function(chunk.name.clone(), params, body);
                let idx = self.intern(name);
                chunk.push(Inst::with_lit(Op::Lit, Value::Sub(entry)));
                chunk.push(Inst::with_str(Op::Set, idx));
            }
            Node::Return(values) => {
                self.emit_multi(chunk, values);
                chunk.push(Inst::with_operand(Op::Return, values.len() as i64));
            }
            Node::Break => {
                let at = chunk.push(Inst::simple(Op::Jmp));
                if let Some(ctx) = self.loop_stack.last_mut() {
                    ctx.break_jumps.push(at);
                }
            }
            Node::Continue => {
                let at = chunk.push(Inst::simple(Op::Jmp));
                if let Some(ctx) = self.loop_stack.last_mut() {
                    ctx.continue_jumps.push(at);
                }
            }
            Node::Assign {
                targets,
                values,
                global,
            } => self.emit_assign(chunk, targets, values, *global),
            other => {
                // A bare expression statement: evaluate for effect, drop
                // the single resulting value.
                self.emit_expr(chunk, other);
                chunk.push(Inst::simple(Op::Drop));
            }
        }
    }

    fn emit_if(
        &mut self,
        chunk: &mut Chunk,
        cond: &Node,
        then_body: &[Node],
        else_body: Option<&[Node]>,
    ) {
        self.emit_expr(chunk, cond);
        let jfalse_at = chunk.push(Inst::simple(Op::Jfalse));
        self.emit_block(chunk, then_body);
        if let Some(else_body) = else_body {
            let jmp_end_at = chunk.push(Inst::simple(Op::Jmp));
            chunk.patch_jump(jfalse_at);
            self.emit_block(chunk, else_body);
            chunk.patch_jump(jmp_end_at);
        } else {
            chunk.patch_jump(jfalse_at);
        }
    }

    fn emit_while(&mut self, chunk: &mut Chunk, cond: &Node, body: &[Node]) {
        let cond_start = chunk.here();
        self.emit_expr(chunk, cond);
        let jfalse_at = chunk.push(Inst::simple(Op::Jfalse));
        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });
        self.emit_block(chunk, body);
        chunk.push(Inst::with_operand(Op::Jmp, cond_start as i64));
        chunk.patch_jump(jfalse_at);
        let ctx = self.loop_stack.pop().unwrap();
        for at in ctx.continue_jumps {
            chunk.code[at].operand = cond_start as i64;
        }
        let end = chunk.here() as i64;
        for at in ctx.break_jumps {
            chunk.code[at].operand = end;
        }
    }

    /// `for [k,] v in iter ... end`. `iter` is either a vector/map (`FOR`
    /// walks it directly) or a coroutine/generator-producing call (`FOR`
    /// drives it by resuming once per iteration, per §4.6's
    /// for-with-callback-generator convention: each step yields
    /// `(value[, key])` or `nil` to signal exhaustion).
    fn emit_for(
        &mut self,
        chunk: &mut Chunk,
        key: Option<&str>,
        value: &str,
        iter: &Node,
        body: &[Node],
    ) {
        self.emit_expr(chunk, iter);
        let loop_start = chunk.push(Inst::simple(Op::For));
        let key_idx = key.map(|k| self.intern(k));
        let value_idx = self.intern(value);
        if let Some(ki) = key_idx {
            chunk.push(Inst::with_str(Op::Assignl, ki));
        }
        chunk.push(Inst::with_str(Op::Assignl, value_idx));
        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });
        self.emit_block(chunk, body);
        let loop_at = chunk.push(Inst::with_operand(Op::Loop, loop_start as i64));
        // Both the iterable's own exhaustion (FOR's operand) and `break`
        // land on UNLOOP, so cleanup (popping the loop-stack entry) always
        // runs before control leaves the loop.
        chunk.patch_jump(loop_start);
        let unloop_at = chunk.here();
        chunk.push(Inst::simple(Op::Unloop));
        let ctx = self.loop_stack.pop().unwrap();
        for at in ctx.continue_jumps {
            chunk.code[at].operand = loop_at as i64;
        }
        for at in ctx.break_jumps {
            chunk.code[at].operand = unloop_at as i64;
        }
    }

    fn emit_function(&mut self, enclosing_name: String, params: &[String], body: &[Node]) -> weft_core::SubEntry {
        let idx = self.chunks.len();
        let mut fn_chunk = Chunk::new(format!("{enclosing_name}::<anon@{idx}>"), params.len());
        // Scope-path prelude: one PID per lexical ancestor, nearest first,
        // so the runtime's name-resolution walk checks enclosing scopes in
        // the right order (§4.6). The new function's own id is pushed to
        // `fn_id_stack` only for compiling its *own* body, not its prelude.
        for &ancestor in self.fn_id_stack.iter().rev() {
            fn_chunk.push(Inst::with_operand(Op::Pid, ancestor as i64));
        }
        // Bind parameters: CALL leaves the n argument values on the shared
        // operand stack in left-to-right order, so the last-pushed (top of
        // stack) is the last parameter — ASSIGNL instructions run in
        // reverse parameter order to pop them into the right names.
        for p in params.iter().rev() {
            let pidx = self.intern(p);
            fn_chunk.push(Inst::with_str(Op::Assignl, pidx));
        }
        self.fn_id_stack.push(idx as u32);
        self.emit_block(&mut fn_chunk, body);
        self.fn_id_stack.pop();
        // Implicit `return` with no values if control falls off the end.
        fn_chunk.push(Inst::with_operand(Op::Mark, 0));
        fn_chunk.push(Inst::with_operand(Op::Limit, 0));
        fn_chunk.push(Inst::simple(Op::Return));
        self.chunks.push(fn_chunk);
        weft_core::SubEntry(idx as u32)
    }

    fn emit_assign(&mut self, chunk: &mut Chunk, targets: &[Node], values: &[Node], global: bool) {
        // A single MARK/LIMIT envelope spanning the whole value list, not
        // `emit_multi` (which would reconcile to `values.len()` first): the
        // last value expression needs to spread across however many target
        // slots remain, so the only reconciliation point is `targets.len()`.
        chunk.push(Inst::with_operand(Op::Mark, 0));
        for v in values {
            self.emit_expr(chunk, v);
        }
        chunk.push(Inst::with_operand(Op::Limit, targets.len() as i64));
        // Assignment targets are reconciled right-to-left against the
        // reconciled value stack so `a, b = b, a`-style swaps read naturally
        // left-to-right while popping happens LIFO.
        for target in targets.iter().rev() {
            self.emit_store(chunk, target, global);
        }
    }

    fn emit_store(&mut self, chunk: &mut Chunk, target: &Node, global: bool) {
        match target {
            Node::Name { base, chain } if chain.is_empty() => {
                let idx = self.intern(base);
                if global {
                    chunk.push(Inst::with_str(Op::Assign, idx));
                } else {
                    chunk.push(Inst::with_str(Op::Assignl, idx));
                }
            }
            Node::Name { base, chain } => {
                self.emit_name_base(chunk, base);
                self.emit_chain_prefix(chunk, chain);
                self.emit_chain_store_tail(chunk, chain.last().unwrap());
            }
            Node::Chained(base, chain) if !chain.is_empty() => {
                self.emit_expr(chunk, base);
                self.emit_chain_prefix(chunk, chain);
                self.emit_chain_store_tail(chunk, chain.last().unwrap());
            }
            other => {
                // Not an lvalue; evaluate for effect and drop the assigned
                // value as a defensive no-op rather than panicking the
                // compiler on malformed input the parser already accepted.
                self.emit_expr(chunk, other);
                chunk.push(Inst::simple(Op::Drop));
            }
        }
    }

    /// Emits every chain link except the last, leaving the container the
    /// final link will index into on top of the stack.
    fn emit_chain_prefix(&mut self, chunk: &mut Chunk, chain: &[Chain]) {
        for link in &chain[..chain.len().saturating_sub(1)] {
            self.emit_chain_link(chunk, link);
        }
    }

    fn emit_chain_store_tail(&mut self, chunk: &mut Chunk, link: &Chain) {
        match link {
            Chain::Field(name) => {
                let idx = self.intern(name);
                chunk.push(Inst::with_str(Op::Assignp, idx));
            }
            Chain::Index(expr) => {
                self.emit_expr(chunk, expr);
                chunk.push(Inst::simple(Op::Assignp));
            }
            Chain::Call(_) | Chain::Method(_, _) => {
                // A call result is not an lvalue; the parser shouldn't
                // produce this as an assignment target, but fall back to a
                // plain call-for-effect rather than emitting bad bytecode.
                self.emit_chain_link(chunk, link);
                chunk.push(Inst::simple(Op::Drop));
            }
        }
    }

    // --- expressions: every branch leaves exactly one value on the stack ---

    fn emit_expr(&mut self, chunk: &mut Chunk, node: &Node) {
        match node {
            Node::Literal(v) => {
                chunk.push(Inst::with_lit(Op::Lit, v.clone()));
            }
            Node::LiteralStr(s) => {
                let idx = self.intern(s);
                chunk.push(Inst::with_str(Op::Lit, idx));
            }
            Node::InterpString(parts) => self.emit_interp_string(chunk, parts),
            Node::Name { base, chain } if chain.len() == 1 && is_coroutine_builtin(base) => {
                let Chain::Call(args) = &chain[0] else {
                    self.emit_name_base(chunk, base);
                    self.emit_chain_link(chunk, &chain[0]);
                    return;
                };
                self.emit_coroutine_builtin(chunk, base, args);
            }
            Node::Name { base, chain } if matches!(chain.first(), Some(Chain::Call(_))) => {
                let Some(Chain::Call(args)) = chain.first() else {
                    unreachable!()
                };
                // Bare-name call (`f(args)`, not `obj.f(args)`): resolve and
                // invoke in one opcode instead of FIND+SHUNT+CALL, which is
                // what makes CFUNC's fused form reachable (§4.3).
                let idx = self.intern(base);
                self.emit_multi(chunk, args);
                chunk.push(Inst::with_str_and_operand(Op::Cfunc, idx, args.len() as i64));
                for link in &chain[1..] {
                    self.emit_chain_link(chunk, link);
                }
            }
            Node::Name { base, chain } => {
                self.emit_name_base(chunk, base);
                for link in chain {
                    self.emit_chain_link(chunk, link);
                }
            }
            Node::Chained(base, chain) => {
                self.emit_expr(chunk, base);
                for link in chain {
                    self.emit_chain_link(chunk, link);
                }
            }
            Node::Binary(op, lhs, rhs) => self.emit_binary(chunk, *op, lhs, rhs),
            Node::Unary(op, operand) => {
                self.emit_expr(chunk, operand);
                chunk.push(Inst::simple(match op {
                    UnOp::Neg => Op::Neg,
                    UnOp::Not => Op::Not,
                    UnOp::Count => Op::Count,
                }));
            }
            Node::Vec(items) => {
                chunk.push(Inst::simple(Op::Vector));
                for item in items {
                    self.emit_expr(chunk, item);
                    chunk.push(Inst::simple(Op::Vpush));
                }
            }
            Node::Map(entries) => {
                chunk.push(Inst::simple(Op::Map));
                for (k, v) in entries {
                    self.emit_expr(chunk, k);
                    self.emit_expr(chunk, v);
                    chunk.push(Inst::simple(Op::Unmap));
                }
            }
            Node::Function { params, body, .. } => {
                // A named function used in expression position behaves like
                // an anonymous one; the name only matters for the statement
                // form's implicit binding.
                let entry = self.emit_function(chunk.name.clone(), params, body);
                chunk.push(Inst::with_lit(Op::Lit, Value::Sub(entry)));
            }
            Node::Multi(items) => {
                // A bare comma list in expression position: keep only the
                // first value, matching single-slot reconciliation rules
                // elsewhere (§4.3's MARK/LIMIT discipline).
                if let Some(first) = items.first() {
                    self.emit_expr(chunk, first);
                } else {
                    chunk.push(Inst::with_lit(Op::Lit, Value::Nil));
                }
            }
            Node::If {
                cond,
                then_body,
                else_body,
            } => self.emit_if_expr(chunk, cond, then_body, else_body.as_deref()),
            other => {
                // Statement-shaped nodes reached in expression position
                // (while/for/return/break/continue/assign) have no value;
                // emit them for effect and push `nil`.
                self.emit_stmt(chunk, other);
                chunk.push(Inst::with_lit(Op::Lit, Value::Nil));
            }
        }
    }

    /// `if` used as an expression yields the last value of whichever branch
    /// ran, or `nil` if the condition was false and there's no `else`.
    fn emit_if_expr(
        &mut self,
        chunk: &mut Chunk,
        cond: &Node,
        then_body: &[Node],
        else_body: Option<&[Node]>,
    ) {
        self.emit_expr(chunk, cond);
        let jfalse_at = chunk.push(Inst::simple(Op::Jfalse));
        self.emit_block_value(chunk, then_body);
        let jmp_end_at = chunk.push(Inst::simple(Op::Jmp));
        chunk.patch_jump(jfalse_at);
        match else_body {
            Some(else_body) => self.emit_block_value(chunk, else_body),
            None => {
                chunk.push(Inst::with_lit(Op::Lit, Value::Nil));
            }
        }
        chunk.patch_jump(jmp_end_at);
    }

    /// Emits a statement block used in value position: every statement but
    /// the last runs for effect, the last (if an expression) supplies the
    /// block's value.
    fn emit_block_value(&mut self, chunk: &mut Chunk, stmts: &[Node]) {
        match stmts.split_last() {
            None => {
                chunk.push(Inst::with_lit(Op::Lit, Value::Nil));
            }
            Some((last, rest)) => {
                self.emit_block(chunk, rest);
                self.emit_expr(chunk, last);
            }
        }
    }

    fn emit_name_base(&mut self, chunk: &mut Chunk, name: &str) {
        let idx = self.intern(name);
        chunk.push(Inst::with_str(Op::Find, idx));
    }

    fn emit_chain_link(&mut self, chunk: &mut Chunk, link: &Chain) {
        match link {
            Chain::Field(name) => {
                let idx = self.intern(name);
                chunk.push(Inst::with_str(Op::Get, idx));
            }
            Chain::Index(expr) => {
                self.emit_expr(chunk, expr);
                chunk.push(Inst::simple(Op::Get));
            }
            Chain::Call(args) => {
                // Stage the callee (currently on top of stack) aside so the
                // argument envelope's MARK starts clean; CALL pulls it back
                // off the auxiliary stack once the envelope is reconciled.
                chunk.push(Inst::simple(Op::Shunt));
                self.emit_multi(chunk, args);
                chunk.push(Inst::with_operand(Op::Call, args.len() as i64));
            }
            Chain::Method(name, args) => {
                // `obj:m(args)` — duplicate the receiver so both the method
                // lookup and the call's implicit self argument see it. The
                // receiver itself stays on the main stack (it's arg #1);
                // only the resolved method value is staged aside.
                chunk.push(Inst::simple(Op::Copy));
                let idx = self.intern(name);
                chunk.push(Inst::with_str(Op::Get, idx));
                chunk.push(Inst::simple(Op::Shunt));
                chunk.push(Inst::with_operand(Op::Mark, 1));
                for a in args {
                    self.emit_expr(chunk, a);
                }
                chunk.push(Inst::with_operand(Op::Limit, (args.len() + 1) as i64));
                chunk.push(Inst::with_operand(Op::Call, (args.len() + 1) as i64));
            }
        }
    }

    fn emit_binary(&mut self, chunk: &mut Chunk, op: BinOp, lhs: &Node, rhs: &Node) {
        if matches!(op, BinOp::And | BinOp::Or) {
            self.emit_short_circuit(chunk, op, lhs, rhs);
            return;
        }
        self.emit_expr(chunk, lhs);
        self.emit_expr(chunk, rhs);
        chunk.push(Inst::simple(match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::Eq => Op::Eq,
            BinOp::Ne => Op::Ne,
            BinOp::Lt => Op::Lt,
            BinOp::Lte => Op::Lte,
            BinOp::Gt => Op::Gt,
            BinOp::Gte => Op::Gte,
            BinOp::Match => Op::Match,
            BinOp::And | BinOp::Or => unreachable!(),
        }));
    }

    /// `and`/`or` don't evaluate their right side unless necessary: `a and
    /// b` yields `a` if falsy else `b`; `a or b` yields `a` if truthy else
    /// `b`.
    fn emit_short_circuit(&mut self, chunk: &mut Chunk, op: BinOp, lhs: &Node, rhs: &Node) {
        self.emit_expr(chunk, lhs);
        chunk.push(Inst::simple(Op::Copy));
        let branch_at = chunk.push(Inst::simple(if op == BinOp::And {
            Op::Jfalse
        } else {
            Op::Jtrue
        }));
        chunk.push(Inst::simple(Op::Drop));
        self.emit_expr(chunk, rhs);
        chunk.patch_jump(branch_at);
    }

    fn emit_interp_string(&mut self, chunk: &mut Chunk, parts: &[StrPart]) {
        if parts.is_empty() {
            let idx = self.intern("");
            chunk.push(Inst::with_str(Op::Lit, idx));
            return;
        }
        let mut first = true;
        for part in parts {
            match part {
                StrPart::Literal(s) => {
                    let idx = self.intern(s);
                    chunk.push(Inst::with_str(Op::Lit, idx));
                }
                StrPart::Expr(e) => self.emit_expr(chunk, e),
            }
            if !first {
                chunk.push(Inst::simple(Op::Concat));
            }
            first = false;
        }
    }

    /// Emits a `MARK ... LIMIT n` bracketed value list (§4.3). The last
    /// entry, if itself a call, contributes however many values it returns;
    /// everything before it is truncated to exactly one.
    fn emit_multi(&mut self, chunk: &mut Chunk, items: &[Node]) {
        chunk.push(Inst::with_operand(Op::Mark, 0));
        for item in items {
            self.emit_expr(chunk, item);
        }
        chunk.push(Inst::with_operand(Op::Limit, items.len() as i64));
    }

    /// `coroutine`/`resume`/`yield` (§4.7/§6) are reserved names lowered
    /// directly to their own opcodes rather than ordinary calls — `yield`
    /// needs to suspend the dispatch loop itself, something no callable
    /// `Value` can do, and `coroutine`/`resume` are kept alongside it for a
    /// single, consistent "these three aren't shadowable" rule rather than
    /// one exception plus two ordinary core-scope functions.
    fn emit_coroutine_builtin(&mut self, chunk: &mut Chunk, name: &str, args: &[Node]) {
        match name {
            "coroutine" => {
                match args.first() {
                    Some(f) => self.emit_expr(chunk, f),
                    None => chunk.push(Inst::with_lit(Op::Lit, Value::Nil)),
                }
                chunk.push(Inst::simple(Op::Coroutine));
            }
            "resume" => {
                self.emit_multi(chunk, args);
                chunk.push(Inst::with_operand(Op::Resume, args.len() as i64));
            }
            "yield" => {
                self.emit_multi(chunk, args);
                chunk.push(Inst::with_operand(Op::Yield, args.len() as i64));
            }
            _ => unreachable!("is_coroutine_builtin/emit_coroutine_builtin are out of sync"),
        }
    }
}

fn is_coroutine_builtin(name: &str) -> bool {
    matches!(name, "coroutine" | "resume" | "yield")
}

/// Post-emission peephole pass fusing the adjacent-instruction patterns
/// named in §4.3: `LIT(name)+FIND -> FNAME`, `LIT(key)+GET -> GNAME`,
/// `FNAME+CALL -> CFUNC` (with an inline-cache slot), `LIT+ADD -> ADD_LIT`,
/// `LIT+MUL -> MUL_LIT`. Runs to a fixpoint since fusing one pair can
/// expose another (e.g. `FNAME+CALL` only appears after `FIND` has already
/// become `FNAME`).
/// Two linear passes: the first turns `LIT+FIND -> FNAME`, `LIT+GET ->
/// GNAME`, `LIT+ADD -> ADD_LIT`, `LIT+MUL -> MUL_LIT`; the second catches
/// `FNAME+CALL -> CFUNC`, which only becomes visible once the first pass
/// has produced `FNAME`. Each rule collapses exactly one adjacent pair into
/// one instruction, so a single jump-target remap after each pass is
/// enough — no pair is ever fused across a jump target, since fusing would
/// change what a jump into the middle of it lands on.
fn fuse_peephole(chunk: &mut Chunk) {
    fuse_pass(chunk);
    fuse_pass(chunk);
}

fn fuse_rule(cur: &Inst, next: &Inst) -> Option<Inst> {
    match (&cur.op, &next.op) {
        (Op::Lit, Op::Find) if cur.str_idx.is_some() => {
            Some(Inst::with_str(Op::Fname, cur.str_idx.unwrap()))
        }
        (Op::Lit, Op::Get) if cur.str_idx.is_some() => {
            Some(Inst::with_str(Op::Gname, cur.str_idx.unwrap()))
        }
        (Op::Fname, Op::Call) => Some(Inst {
            op: Op::Cfunc,
            cache: Some(0),
            lit: None,
            str_idx: cur.str_idx,
            operand: next.operand,
        }),
        (Op::Lit, Op::Add)
            if matches!(cur.lit, Some(Value::Int(_)) | Some(Value::Float(_))) =>
        {
            Some(Inst::with_lit(Op::AddLit, cur.lit.clone().unwrap()))
        }
        (Op::Lit, Op::Mul)
            if matches!(cur.lit, Some(Value::Int(_)) | Some(Value::Float(_))) =>
        {
            Some(Inst::with_lit(Op::MulLit, cur.lit.clone().unwrap()))
        }
        _ => None,
    }
}

fn fuse_pass(chunk: &mut Chunk) {
    let jump_targets = collect_jump_targets(&chunk.code);
    let mut out: Vec<Inst> = Vec::with_capacity(chunk.code.len());
    // old instruction index -> new instruction index, built incrementally
    // so jump operands (old indices) can be remapped once fusion is done.
    let mut old_to_new = vec![0usize; chunk.code.len() + 1];
    let mut i = 0;
    while i < chunk.code.len() {
        old_to_new[i] = out.len();
        if i + 1 < chunk.code.len() && !jump_targets.contains(&(i + 1)) {
            if let Some(fused) = fuse_rule(&chunk.code[i], &chunk.code[i + 1]) {
                old_to_new[i + 1] = out.len();
                out.push(fused);
                i += 2;
                continue;
            }
        }
        out.push(chunk.code[i].clone());
        i += 1;
    }
    old_to_new[chunk.code.len()] = out.len();
    for inst in out.iter_mut() {
        if matches!(inst.op, Op::Jmp | Op::Jfalse | Op::Jtrue | Op::Loop | Op::For) {
            let target = inst.operand.max(0) as usize;
            if target < old_to_new.len() {
                inst.operand = old_to_new[target] as i64;
            }
        }
    }
    chunk.code = out;
}

fn collect_jump_targets(code: &[Inst]) -> std::collections::HashSet<usize> {
    let mut set = std::collections::HashSet::new();
    for inst in code {
        if matches!(inst.op, Op::Jmp | Op::Jfalse | Op::Jtrue | Op::Loop | Op::For) {
            set.insert(inst.operand.max(0) as usize);
        }
    }
    set
}
