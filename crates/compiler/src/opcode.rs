//! Flat bytecode representation (§4/§6).
//!
//! A chunk is a single flat `Vec<Inst>` — no nested basic blocks, no
//! separate constant pool indirection beyond what `Inst::lit` carries
//! inline. Jumps are absolute instruction indices within the chunk they
//! occur in; each compiled function body is its own chunk, addressed from
//! the caller by a [`weft_core::SubEntry`] carrying a chunk index plus an
//! entry offset resolved by `weft-runtime` at call time.

use weft_core::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    // --- control ---
    Stop,
    Jmp,
    Jfalse,
    Jtrue,
    Return,
    Call,
    For,
    Loop,
    Unloop,
    Break,
    Continue,

    // --- stack shaping (§4.3 MARK/LIMIT envelope) ---
    Mark,
    Limit,
    Clean,
    Copy,
    Shunt,
    Shift,
    Drop,

    // --- binding ---
    Lit,
    Find,
    Get,
    Set,
    Assign,
    Pid,

    // --- arithmetic / logical / relational ---
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Concat,
    Count,
    Match,
    Unpack,

    // --- structural ---
    Vector,
    Vpush,
    Map,
    Unmap,
    MetaSet,
    MetaGet,

    // --- coroutines ---
    Coroutine,
    Resume,
    Yield,

    // --- peephole-fused forms (§4.3) ---
    /// `Lit` (name) + `Find` fused: push the value bound to a name looked
    /// up by scope-path walk, skipping the intermediate string push.
    Fname,
    /// `Lit` (key) + `Get` fused: index a map/vector by a literal key.
    Gname,
    /// `Fname` + `Call` fused, with an inline cache slot (`Inst::cache`)
    /// remembering the last resolved callee across repeated evaluations of
    /// the same call site (e.g. a loop body).
    Cfunc,
    /// Assign directly to a local slot found by scope-path walk, skipping
    /// the generic `Set` dispatch.
    Assignl,
    /// Assign directly to a pooled container in place (`obj[k] = v`),
    /// skipping the generic `Set` dispatch.
    Assignp,
    /// `Lit` + `Add` fused: add a literal constant to the top of stack.
    AddLit,
    /// `Lit` + `Mul` fused: multiply the top of stack by a literal constant.
    MulLit,
    /// Compound `name op= value` fused into one instruction.
    Update,
}

/// One bytecode cell: an opcode, an optional inline-cache slot (used by
/// `Cfunc` and re-purposable by future fused forms), an optional immediate
/// scalar literal, an optional index into the owning [`Module`]'s string
/// pool (names and string literals alike — both need interning against a
/// heap, which doesn't exist yet at compile time, so they're deferred as
/// plain indices and resolved to `Value::Str` when the module is loaded),
/// and a general-purpose integer operand (jump targets, arg counts, loop
/// depths).
#[derive(Clone, Debug)]
pub struct Inst {
    pub op: Op,
    pub cache: Option<u32>,
    pub lit: Option<Value>,
    pub str_idx: Option<u32>,
    pub operand: i64,
}

impl Inst {
    pub fn simple(op: Op) -> Self {
        Inst {
            op,
            cache: None,
            lit: None,
            str_idx: None,
            operand: 0,
        }
    }

    pub fn with_operand(op: Op, operand: i64) -> Self {
        Inst {
            op,
            cache: None,
            lit: None,
            str_idx: None,
            operand,
        }
    }

    pub fn with_lit(op: Op, lit: Value) -> Self {
        Inst {
            op,
            cache: None,
            lit: Some(lit),
            str_idx: None,
            operand: 0,
        }
    }

    pub fn with_str(op: Op, str_idx: u32) -> Self {
        Inst {
            op,
            cache: None,
            lit: None,
            str_idx: Some(str_idx),
            operand: 0,
        }
    }

    pub fn with_str_and_operand(op: Op, str_idx: u32, operand: i64) -> Self {
        Inst {
            op,
            cache: None,
            lit: None,
            str_idx: Some(str_idx),
            operand,
        }
    }
}

/// A compiled function body: its instructions plus the parameter count and
/// a human-readable name for disassembly/error messages. `weft-runtime`
/// addresses these by index from a [`weft_core::SubEntry`].
#[derive(Clone, Debug)]
pub struct Chunk {
    pub name: String,
    pub arity: usize,
    pub code: Vec<Inst>,
}

impl Chunk {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Chunk {
            name: name.into(),
            arity,
            code: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: Inst) -> usize {
        self.code.push(inst);
        self.code.len() - 1
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Back-patches a previously emitted jump's operand to the current
    /// instruction index. Used for forward jumps (`if`/`while` condition
    /// failure, `break`) whose target isn't known until the body is done.
    pub fn patch_jump(&mut self, at: usize) {
        let target = self.code.len() as i64;
        self.code[at].operand = target;
    }
}

/// A whole compiled program: the top-level chunk plus every nested
/// function chunk, flattened into one table and addressed by index, plus
/// the deduplicated string pool every chunk's `str_idx` operands index
/// into. `weft-runtime` interns this pool into a heap's "old" region once
/// at load time (§4.1's two-region interner; everything from source text
/// is old by construction, since it can never be freed by a young sweep).
#[derive(Clone, Debug)]
pub struct Module {
    pub chunks: Vec<Chunk>,
    /// Index into `chunks` of the top-level (script-body) chunk.
    pub entry: usize,
    pub strings: Vec<String>,
}
