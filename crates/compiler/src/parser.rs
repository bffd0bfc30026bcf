//! Recursive-descent parser with a precedence-climbing expression parser
//! standing in for the shunting-yard algorithm described in §4.3 — both
//! produce the same left-to-right, precedence-correct binary tree; climbing
//! avoids an explicit operator/output stack pair while keeping the same
//! precedence table.

use crate::ast::{BinOp, Chain, Node, Program, StrPart, UnOp};
use crate::error::CompileError;
use crate::lexer::{Lexer, Span, Tok, Token};
use weft_core::Value;

/// §4.3: function definitions may nest, but not arbitrarily — the compiler
/// rejects nesting beyond this depth with `CompileError::TooDeepNesting`
/// (§7 "too-deep function nesting").
pub const MAX_FUNCTION_NESTING: usize = 64;

const RESERVED: &[&str] = &[
    "if", "else", "end", "while", "for", "in", "function", "return", "break", "continue",
    "global", "or", "and", "not", "true", "false", "nil",
];

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    fn_depth: usize,
}

impl Parser {
    pub fn parse(src: &str) -> Result<Program, CompileError> {
        let toks = Lexer::new(src).tokenize()?;
        let mut p = Parser {
            toks,
            pos: 0,
            fn_depth: 0,
        };
        let body = p.parse_block(&[Tok::Eof])?;
        Ok(Program { body })
    }

    fn cur(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn cur_span(&self) -> Span {
        self.toks[self.pos].span
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Tok) -> Result<(), CompileError> {
        if self.cur() == want {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::Syntax {
                message: format!("expected {want:?}, found {:?}", self.cur()),
                span: self.cur_span(),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        match self.cur().clone() {
            Tok::Ident(name) => {
                self.advance();
                if RESERVED.contains(&name.as_str()) {
                    return Err(CompileError::ReservedName {
                        name,
                        span: self.cur_span(),
                    });
                }
                Ok(name)
            }
            other => Err(CompileError::Syntax {
                message: format!("expected identifier, found {other:?}"),
                span: self.cur_span(),
            }),
        }
    }

    fn at_block_end(&self, terminators: &[Tok]) -> bool {
        terminators.iter().any(|t| t == self.cur())
    }

    fn parse_block(&mut self, terminators: &[Tok]) -> Result<Vec<Node>, CompileError> {
        let mut stmts = Vec::new();
        while !self.at_block_end(terminators) {
            stmts.push(self.parse_statement()?);
            while *self.cur() == Tok::Semicolon {
                self.advance();
            }
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Node, CompileError> {
        match self.cur().clone() {
            Tok::If => self.parse_if(),
            Tok::While => self.parse_while(),
            Tok::For => self.parse_for(),
            Tok::Function => self.parse_function(),
            Tok::Return => {
                self.advance();
                let values = if self.at_block_end(&[Tok::End, Tok::Eof, Tok::Semicolon])
                    || matches!(self.cur(), Tok::Else)
                {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                Ok(Node::Return(values))
            }
            Tok::Break => {
                self.advance();
                Ok(Node::Break)
            }
            Tok::Continue => {
                self.advance();
                Ok(Node::Continue)
            }
            Tok::Global => {
                self.advance();
                self.parse_assignment_or_expr(true)
            }
            _ => self.parse_assignment_or_expr(false),
        }
    }

    /// Disambiguates `name = expr[, expr...]` assignment from a bare
    /// expression statement by parsing the first expression, then checking
    /// for `=` or `,` followed eventually by `=`.
    fn parse_assignment_or_expr(&mut self, global: bool) -> Result<Node, CompileError> {
        let first = self.parse_expr(0)?;
        let mut targets = vec![first];
        while *self.cur() == Tok::Comma {
            self.advance();
            targets.push(self.parse_expr(0)?);
        }
        if *self.cur() == Tok::Assign {
            self.advance();
            let values = self.parse_expr_list()?;
            Ok(Node::Assign {
                targets,
                values,
                global,
            })
        } else if targets.len() == 1 {
            Ok(targets.into_iter().next().unwrap())
        } else {
            Ok(Node::Multi(targets))
        }
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut out = vec![self.parse_expr(0)?];
        while *self.cur() == Tok::Comma {
            self.advance();
            out.push(self.parse_expr(0)?);
        }
        Ok(out)
    }

    fn parse_if(&mut self) -> Result<Node, CompileError> {
        self.advance();
        let cond = Box::new(self.parse_expr(0)?);
        let then_body = self.parse_block(&[Tok::Else, Tok::End])?;
        let else_body = if *self.cur() == Tok::Else {
            self.advance();
            Some(self.parse_block(&[Tok::End])?)
        } else {
            None
        };
        self.expect(&Tok::End)?;
        Ok(Node::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Node, CompileError> {
        self.advance();
        let cond = Box::new(self.parse_expr(0)?);
        let body = self.parse_block(&[Tok::End])?;
        self.expect(&Tok::End)?;
        Ok(Node::While { cond, body })
    }

    fn parse_for(&mut self) -> Result<Node, CompileError> {
        self.advance();
        let first = self.expect_ident()?;
        let (key, value) = if *self.cur() == Tok::Comma {
            self.advance();
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        self.expect(&Tok::In)?;
        let iter = Box::new(self.parse_expr(0)?);
        let body = self.parse_block(&[Tok::End])?;
        self.expect(&Tok::End)?;
        Ok(Node::For {
            key,
            value,
            iter,
            body,
        })
    }

    fn parse_function(&mut self) -> Result<Node, CompileError> {
        let start_span = self.cur_span();
        self.advance();
        let name = if let Tok::Ident(_) = self.cur() {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        if *self.cur() != Tok::RParen {
            params.push(self.expect_ident()?);
            while *self.cur() == Tok::Comma {
                self.advance();
                params.push(self.expect_ident()?);
            }
        }
        self.expect(&Tok::RParen)?;
        self.fn_depth += 1;
        if self.fn_depth > MAX_FUNCTION_NESTING {
            return Err(CompileError::TooDeepNesting { span: start_span });
        }
        let body = self.parse_block(&[Tok::End])?;
        self.expect(&Tok::End)?;
        self.fn_depth -= 1;
        Ok(Node::Function {
            name,
            params,
            body,
        })
    }

    // --- Expressions: precedence-climbing over §4.3's table ---
    // or(0) < and(1) < comparisons/~(2) < + -(3) < * / %(4)

    fn binop_prec(tok: &Tok) -> Option<(BinOp, u8)> {
        Some(match tok {
            Tok::Or => (BinOp::Or, 0),
            Tok::And => (BinOp::And, 1),
            Tok::Eq => (BinOp::Eq, 2),
            Tok::Ne => (BinOp::Ne, 2),
            Tok::Lt => (BinOp::Lt, 2),
            Tok::Lte => (BinOp::Lte, 2),
            Tok::Gt => (BinOp::Gt, 2),
            Tok::Gte => (BinOp::Gte, 2),
            Tok::Match => (BinOp::Match, 2),
            Tok::Plus => (BinOp::Add, 3),
            Tok::Minus => (BinOp::Sub, 3),
            Tok::Star => (BinOp::Mul, 4),
            Tok::Slash => (BinOp::Div, 4),
            Tok::Percent => (BinOp::Mod, 4),
            _ => return None,
        })
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Node, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((op, prec)) = Self::binop_prec(self.cur()) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(prec + 1)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// Unary `# - !` bind tighter than any binary operator (§4.3); `...`
    /// (unpack-rest) sits at the same tightness as `*`/`/`/`%`.
    fn parse_unary(&mut self) -> Result<Node, CompileError> {
        match self.cur() {
            Tok::Minus => {
                self.advance();
                Ok(Node::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Tok::Bang => {
                self.advance();
                Ok(Node::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Tok::Hash => {
                self.advance();
                Ok(Node::Unary(UnOp::Count, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_chain(),
        }
    }

    fn parse_chain(&mut self) -> Result<Node, CompileError> {
        let base_is_name = matches!(self.cur(), Tok::Ident(_));
        let base_name = if base_is_name {
            if let Tok::Ident(n) = self.cur().clone() {
                Some(n)
            } else {
                None
            }
        } else {
            None
        };
        let primary = self.parse_primary()?;
        let mut chain = Vec::new();
        loop {
            match self.cur() {
                Tok::Dot => {
                    self.advance();
                    chain.push(Chain::Field(self.expect_ident()?));
                }
                Tok::LBracket => {
                    self.advance();
                    let idx = self.parse_expr(0)?;
                    self.expect(&Tok::RBracket)?;
                    chain.push(Chain::Index(idx));
                }
                Tok::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    chain.push(Chain::Call(args));
                }
                Tok::Colon => {
                    self.advance();
                    let name = self.expect_ident()?;
                    self.expect(&Tok::LParen)?;
                    let args = self.parse_call_args()?;
                    chain.push(Chain::Method(name, args));
                }
                _ => break,
            }
        }
        if chain.is_empty() {
            return Ok(primary);
        }
        if let Some(base) = base_name {
            Ok(Node::Name { base, chain })
        } else {
            Ok(Node::Chained(Box::new(primary), chain))
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut args = Vec::new();
        if *self.cur() != Tok::RParen {
            args.push(self.parse_expr(0)?);
            while *self.cur() == Tok::Comma {
                self.advance();
                args.push(self.parse_expr(0)?);
            }
        }
        self.expect(&Tok::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Node, CompileError> {
        match self.cur().clone() {
            Tok::Int(n) => {
                self.advance();
                Ok(Node::Literal(Value::Int(n)))
            }
            Tok::Float(n) => {
                self.advance();
                Ok(Node::Literal(Value::Float(n)))
            }
            Tok::True => {
                self.advance();
                Ok(Node::Literal(Value::Bool(true)))
            }
            Tok::False => {
                self.advance();
                Ok(Node::Literal(Value::Bool(false)))
            }
            Tok::Nil => {
                self.advance();
                Ok(Node::Literal(Value::Nil))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(parse_string_interpolation(&s)?)
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(Node::Name {
                    base: name,
                    chain: Vec::new(),
                })
            }
            Tok::LParen => {
                self.advance();
                let e = self.parse_expr(0)?;
                self.expect(&Tok::RParen)?;
                Ok(e)
            }
            Tok::LBracket => self.parse_vec_literal(),
            Tok::LBrace => self.parse_map_literal(),
            Tok::Function => self.parse_function(),
            other => Err(CompileError::Syntax {
                message: format!("unexpected token {other:?}"),
                span: self.cur_span(),
            }),
        }
    }

    fn parse_vec_literal(&mut self) -> Result<Node, CompileError> {
        self.advance();
        let mut items = Vec::new();
        if *self.cur() != Tok::RBracket {
            items.push(self.parse_expr(0)?);
            while *self.cur() == Tok::Comma {
                self.advance();
                if *self.cur() == Tok::RBracket {
                    break;
                }
                items.push(self.parse_expr(0)?);
            }
        }
        self.expect(&Tok::RBracket)?;
        Ok(Node::Vec(items))
    }

    fn parse_map_literal(&mut self) -> Result<Node, CompileError> {
        self.advance();
        let mut entries = Vec::new();
        if *self.cur() != Tok::RBrace {
            entries.push(self.parse_map_entry()?);
            while *self.cur() == Tok::Comma {
                self.advance();
                if *self.cur() == Tok::RBrace {
                    break;
                }
                entries.push(self.parse_map_entry()?);
            }
        }
        self.expect(&Tok::RBrace)?;
        Ok(Node::Map(entries))
    }

    fn parse_map_entry(&mut self) -> Result<(Node, Node), CompileError> {
        let key = match self.cur().clone() {
            Tok::Ident(name) => {
                self.advance();
                Node::LiteralStr(name)
            }
            Tok::Str(s) => {
                self.advance();
                Node::LiteralStr(s)
            }
            Tok::LBracket => {
                self.advance();
                let k = self.parse_expr(0)?;
                self.expect(&Tok::RBracket)?;
                k
            }
            other => {
                return Err(CompileError::Syntax {
                    message: format!("invalid map key {other:?}"),
                    span: self.cur_span(),
                })
            }
        };
        self.expect(&Tok::Assign)?;
        let value = self.parse_expr(0)?;
        Ok((key, value))
    }
}

/// Splits a string literal's raw content into literal/expr parts on
/// `$name` and `$(expr)` (§4.3).
fn parse_string_interpolation(raw: &str) -> Result<Node, CompileError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let bytes: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '$' && i + 1 < bytes.len() {
            if bytes[i + 1] == '(' {
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                let mut depth = 1;
                let mut j = i + 2;
                let start = j;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                let inner: String = bytes[start..j].iter().collect();
                let sub = Parser::parse(&format!("({inner})"))?;
                let expr = sub.body.into_iter().next().unwrap_or(Node::Literal(Value::Nil));
                parts.push(StrPart::Expr(expr));
                i = j + 1;
                continue;
            } else if bytes[i + 1] == '_' || bytes[i + 1].is_alphabetic() {
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j] == '_' || bytes[j].is_alphanumeric()) {
                    j += 1;
                }
                let name: String = bytes[i + 1..j].iter().collect();
                parts.push(StrPart::Expr(Node::Name {
                    base: name,
                    chain: Vec::new(),
                }));
                i = j;
                continue;
            }
        }
        literal.push(bytes[i]);
        i += 1;
    }
    if !literal.is_empty() || parts.is_empty() {
        parts.push(StrPart::Literal(literal));
    }
    if let [StrPart::Literal(s)] = parts.as_slice() {
        return Ok(Node::LiteralStr(s.clone()));
    }
    Ok(Node::InterpString(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let prog = Parser::parse("1 + 2 * 3").unwrap();
        assert_eq!(prog.body.len(), 1);
        match &prog.body[0] {
            Node::Binary(BinOp::Add, lhs, rhs) => {
                assert!(matches!(**lhs, Node::Literal(Value::Int(1))));
                assert!(matches!(**rhs, Node::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn parses_or_looser_than_and() {
        let prog = Parser::parse("a or b and c").unwrap();
        match &prog.body[0] {
            Node::Binary(BinOp::Or, _, rhs) => {
                assert!(matches!(**rhs, Node::Binary(BinOp::And, _, _)));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn parses_for_in_with_key_and_value() {
        let prog = Parser::parse("for k,v in m end").unwrap();
        match &prog.body[0] {
            Node::For { key, value, .. } => {
                assert_eq!(key.as_deref(), Some("k"));
                assert_eq!(value, "v");
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn parses_vector_and_index_chain() {
        let prog = Parser::parse("[1,2,3][0]").unwrap();
        assert!(matches!(&prog.body[0], Node::Chained(_, chain) if chain.len() == 1));
    }

    #[test]
    fn parses_method_call_chain() {
        let prog = Parser::parse("obj:name(1,2)").unwrap();
        match &prog.body[0] {
            Node::Name { chain, .. } => {
                assert!(matches!(&chain[0], Chain::Method(n, args) if n == "name" && args.len() == 2));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn reserved_name_rejected_as_identifier() {
        let err = Parser::parse("end = 1").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
