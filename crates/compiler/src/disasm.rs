//! Bytecode disassembler, driving the CLI's `--dump-bytecode` flag.

use crate::opcode::{Chunk, Module, Op};
use std::fmt::Write as _;

pub fn disassemble_module(module: &Module) -> String {
    let mut out = String::new();
    for (i, chunk) in module.chunks.iter().enumerate() {
        let marker = if i == module.entry { " (entry)" } else { "" };
        let _ = writeln!(out, "chunk {i}: {}{marker}", chunk.name);
        disassemble_chunk(chunk, module, &mut out);
        out.push('\n');
    }
    out
}

fn disassemble_chunk(chunk: &Chunk, module: &Module, out: &mut String) {
    for (i, inst) in chunk.code.iter().enumerate() {
        let _ = write!(out, "  {i:>5}  {:<10}", op_name(inst.op));
        if let Some(idx) = inst.str_idx {
            let s = module.strings.get(idx as usize).map(String::as_str).unwrap_or("?");
            let _ = write!(out, " {idx:>4} ; \"{s}\"");
        }
        if let Some(lit) = &inst.lit {
            let _ = write!(out, " {lit:?}");
        }
        if inst.operand != 0 {
            let _ = write!(out, " [{}]", inst.operand);
        }
        if let Some(cache) = inst.cache {
            let _ = write!(out, " <ic:{cache}>");
        }
        out.push('\n');
    }
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Stop => "STOP",
        Op::Jmp => "JMP",
        Op::Jfalse => "JFALSE",
        Op::Jtrue => "JTRUE",
        Op::Return => "RETURN",
        Op::Call => "CALL",
        Op::For => "FOR",
        Op::Loop => "LOOP",
        Op::Unloop => "UNLOOP",
        Op::Break => "BREAK",
        Op::Continue => "CONTINUE",
        Op::Mark => "MARK",
        Op::Limit => "LIMIT",
        Op::Clean => "CLEAN",
        Op::Copy => "COPY",
        Op::Shunt => "SHUNT",
        Op::Shift => "SHIFT",
        Op::Drop => "DROP",
        Op::Lit => "LIT",
        Op::Find => "FIND",
        Op::Get => "GET",
        Op::Set => "SET",
        Op::Assign => "ASSIGN",
        Op::Pid => "PID",
        Op::Add => "ADD",
        Op::Sub => "SUB",
        Op::Mul => "MUL",
        Op::Div => "DIV",
        Op::Mod => "MOD",
        Op::Neg => "NEG",
        Op::Not => "NOT",
        Op::Eq => "EQ",
        Op::Ne => "NE",
        Op::Lt => "LT",
        Op::Lte => "LTE",
        Op::Gt => "GT",
        Op::Gte => "GTE",
        Op::And => "AND",
        Op::Or => "OR",
        Op::Concat => "CONCAT",
        Op::Count => "COUNT",
        Op::Match => "MATCH",
        Op::Unpack => "UNPACK",
        Op::Vector => "VECTOR",
        Op::Vpush => "VPUSH",
        Op::Map => "MAP",
        Op::Unmap => "UNMAP",
        Op::MetaSet => "META_SET",
        Op::MetaGet => "META_GET",
        Op::Coroutine => "COROUTINE",
        Op::Resume => "RESUME",
        Op::Yield => "YIELD",
        Op::Fname => "FNAME",
        Op::Gname => "GNAME",
        Op::Cfunc => "CFUNC",
        Op::Assignl => "ASSIGNL",
        Op::Assignp => "ASSIGNP",
        Op::AddLit => "ADD_LIT",
        Op::MulLit => "MUL_LIT",
        Op::Update => "UPDATE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Emitter;
    use crate::parser::Parser;

    #[test]
    fn disassembles_a_simple_script() {
        let prog = Parser::parse("x = 1 + 2").unwrap();
        let module = Emitter::compile(&prog);
        let text = disassemble_module(&module);
        assert!(text.contains("chunk 0"));
        assert!(text.contains("ASSIGNL") || text.contains("ASSIGN"));
    }
}
