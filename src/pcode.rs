//! PCode IR (component F): the wire between the parser and the code
//! generator.
//!
//! Like the symbol table, this is a single growable `Vec<u8>` addressed
//! by offset rather than a tree of boxed nodes — sub-streams are just
//! `(offset, size)` pairs into the same buffer, and the generator
//! recursively descends by re-reading headers rather than following
//! pointers. Every node opens with a fixed header: total size (`u32`),
//! opcode tag (`u8`), result type (2 bytes: tag + auxiliary ordinal).
//! This mirrors `symtab.rs`'s offset-addressed layout, generalized from
//! a single record shape to heterogeneous tagged nodes.

use crate::symtab::NwType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    // simple/expression
    ConstInt = 0,
    ConstFloat = 1,
    ConstString = 2,
    ConstObject = 3,
    ConstVector = 4,
    Variable = 5,
    ExpressionEnd = 6,
    ElementAccess = 7,
    Call = 8,
    Argument = 9,
    Assign = 10,
    CompoundAssign = 11,
    BinaryOp = 12,
    UnaryNot = 13,
    UnaryNeg = 14,
    UnaryBitNot = 15,

    // control
    If = 16,
    While = 17,
    Do = 18,
    For = 19,
    Switch = 20,
    Case = 21,
    Default = 22,
    Break = 23,
    Continue = 24,
    Return = 25,
    LogicalAnd = 26,
    LogicalOr = 27,

    // bookkeeping
    Line = 28,
    Statement = 29,
    Declaration = 30,
    Seq = 31,
}

impl Op {
    fn from_u8(b: u8) -> Op {
        // Safety net for a handwritten byte stream: every value written
        // by `Builder` round-trips through this table.
        match b {
            0 => Op::ConstInt,
            1 => Op::ConstFloat,
            2 => Op::ConstString,
            3 => Op::ConstObject,
            4 => Op::ConstVector,
            5 => Op::Variable,
            6 => Op::ExpressionEnd,
            7 => Op::ElementAccess,
            8 => Op::Call,
            9 => Op::Argument,
            10 => Op::Assign,
            11 => Op::CompoundAssign,
            12 => Op::BinaryOp,
            13 => Op::UnaryNot,
            14 => Op::UnaryNeg,
            15 => Op::UnaryBitNot,
            16 => Op::If,
            17 => Op::While,
            18 => Op::Do,
            19 => Op::For,
            20 => Op::Switch,
            21 => Op::Case,
            22 => Op::Default,
            23 => Op::Break,
            24 => Op::Continue,
            25 => Op::Return,
            26 => Op::LogicalAnd,
            27 => Op::LogicalOr,
            28 => Op::Line,
            29 => Op::Statement,
            30 => Op::Declaration,
            31 => Op::Seq,
            other => panic!("corrupt pcode stream: unknown opcode tag {}", other),
        }
    }
}

/// A `(offset, size)` reference to a sub-stream within the same buffer —
/// the pcode equivalent of a child pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: u32,
    pub size: u32,
}

fn encode_type(ty: NwType) -> (u8, u16) {
    match ty {
        NwType::Unknown => (0, 0),
        NwType::Void => (1, 0),
        NwType::Error => (2, 0),
        NwType::Action => (3, 0),
        NwType::Statement => (4, 0),
        NwType::Struct(n) => (5, n),
        NwType::Integer => (6, 0),
        NwType::Float => (7, 0),
        NwType::String => (8, 0),
        NwType::Object => (9, 0),
        NwType::Vector => (10, 0),
        NwType::Engine(n) => (16, n as u16),
    }
}

fn decode_type(tag: u8, aux: u16) -> NwType {
    match tag {
        0 => NwType::Unknown,
        1 => NwType::Void,
        2 => NwType::Error,
        3 => NwType::Action,
        4 => NwType::Statement,
        5 => NwType::Struct(aux),
        6 => NwType::Integer,
        7 => NwType::Float,
        8 => NwType::String,
        9 => NwType::Object,
        10 => NwType::Vector,
        16 => NwType::Engine(aux as u8),
        other => panic!("corrupt pcode stream: unknown result-type tag {}", other),
    }
}

/// `BinOp`/`UnOp` from `ast.rs`, re-tagged as a single byte for the wire.
/// Kept as a thin mirror rather than reusing `ast::BinOp` directly so
/// this module has no dependency on the AST — pcode is meant to outlive
/// the arena the AST was allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinTag {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    UShiftRight,
}

/// Appends pcode nodes to a growing buffer. One `Builder` is used per
/// function body (and one for each file-scope initializer); the
/// resulting buffer is handed to the code generator unchanged.
#[derive(Default)]
pub struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    pub fn new() -> Self {
        Builder { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn begin(&mut self, op: Op, result: NwType) -> usize {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]); // size, patched in `finish`
        self.buf.push(op as u8);
        let (tag, aux) = encode_type(result);
        self.buf.push(tag);
        self.buf.extend_from_slice(&aux.to_le_bytes());
        start
    }

    fn finish(&mut self, start: usize) -> Block {
        let size = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&size.to_le_bytes());
        Block {
            offset: start as u32,
            size,
        }
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }
    fn write_block(&mut self, b: Block) {
        self.write_u32(b.offset);
        self.write_u32(b.size);
    }

    pub fn const_int(&mut self, v: i32) -> Block {
        let start = self.begin(Op::ConstInt, NwType::Integer);
        self.write_i32(v);
        self.finish(start)
    }

    pub fn const_float(&mut self, v: f32) -> Block {
        let start = self.begin(Op::ConstFloat, NwType::Float);
        self.write_f32(v);
        self.finish(start)
    }

    pub fn const_string(&mut self, v: &str) -> Block {
        let start = self.begin(Op::ConstString, NwType::String);
        self.write_str(v);
        self.finish(start)
    }

    pub fn const_object(&mut self, v: u32) -> Block {
        let start = self.begin(Op::ConstObject, NwType::Object);
        self.write_u32(v);
        self.finish(start)
    }

    pub fn const_vector(&mut self, x: f32, y: f32, z: f32) -> Block {
        let start = self.begin(Op::ConstVector, NwType::Vector);
        self.write_f32(x);
        self.write_f32(y);
        self.write_f32(z);
        self.finish(start)
    }

    /// `symbol_offset` is the declaring symbol's offset in the symbol
    /// table; `element_index` is the struct-member index or `-1`;
    /// `stack_offset` is the BP/SP-relative slot the generator will
    /// address (filled in at parse time, same as the stock compiler).
    pub fn variable(&mut self, ty: NwType, symbol_offset: u32, element_index: i32, stack_offset: i32, is_global: bool) -> Block {
        let start = self.begin(Op::Variable, ty);
        self.write_u32(symbol_offset);
        self.write_i32(element_index);
        self.write_i32(stack_offset);
        self.write_u8(is_global as u8);
        self.finish(start)
    }

    pub fn binary(&mut self, op: BinTag, result: NwType, lhs: Block, rhs: Block) -> Block {
        let start = self.begin(Op::BinaryOp, result);
        self.write_u8(op as u8);
        self.write_block(lhs);
        self.write_block(rhs);
        self.finish(start)
    }

    pub fn unary(&mut self, op: Op, result: NwType, operand: Block) -> Block {
        let start = self.begin(op, result);
        self.write_block(operand);
        self.finish(start)
    }

    pub fn logical(&mut self, op: Op, lhs: Block, rhs: Block) -> Block {
        let start = self.begin(op, NwType::Integer);
        self.write_block(lhs);
        self.write_block(rhs);
        self.finish(start)
    }

    pub fn assign(&mut self, ty: NwType, target: Block, value: Block) -> Block {
        let start = self.begin(Op::Assign, ty);
        self.write_block(target);
        self.write_block(value);
        self.finish(start)
    }

    /// `yields_old` distinguishes the two increment/decrement forms: false
    /// for ordinary `+=`-style compound assignment and pre-increment
    /// (expression value is the new, stored value), true for
    /// post-increment (expression value is the value before the update).
    pub fn compound_assign(&mut self, ty: NwType, op: BinTag, target: Block, value: Block, yields_old: bool) -> Block {
        let start = self.begin(Op::CompoundAssign, ty);
        self.write_u8(op as u8);
        self.write_u8(yields_old as u8);
        self.write_block(target);
        self.write_block(value);
        self.finish(start)
    }

    pub fn call(&mut self, ty: NwType, callee_symbol_offset: u32, args: &[Block]) -> Block {
        let start = self.begin(Op::Call, ty);
        self.write_u32(callee_symbol_offset);
        self.write_u32(args.len() as u32);
        for a in args {
            self.write_block(*a);
        }
        self.finish(start)
    }

    pub fn element_access(&mut self, ty: NwType, base: Block, field_index: u32) -> Block {
        let start = self.begin(Op::ElementAccess, ty);
        self.write_block(base);
        self.write_u32(field_index);
        self.finish(start)
    }

    pub fn line(&mut self, file: u32, line: u32) -> Block {
        let start = self.begin(Op::Line, NwType::Statement);
        self.write_u32(file);
        self.write_u32(line);
        self.finish(start)
    }

    pub fn statement(&mut self, local_byte_count: u32, body: Block) -> Block {
        let start = self.begin(Op::Statement, NwType::Statement);
        self.write_u32(local_byte_count);
        self.write_block(body);
        self.finish(start)
    }

    pub fn declaration(&mut self, ty: NwType, symbol_offset: u32, init: Option<Block>, file: u32, line: u32) -> Block {
        let start = self.begin(Op::Declaration, ty);
        self.write_u32(symbol_offset);
        self.write_u8(init.is_some() as u8);
        self.write_block(init.unwrap_or(Block { offset: 0, size: 0 }));
        self.write_u32(file);
        self.write_u32(line);
        self.finish(start)
    }

    /// Five-block control node: `If`/`While`/`Do`/`For`/`Switch` all
    /// share this shape per spec.md's "5-block control" family, even
    /// where a block is unused (absent `for` clauses become an
    /// `(0, 0)` empty block).
    pub fn control5(&mut self, op: Op, blocks: [Block; 5], file: u32, line: u32) -> Block {
        let start = self.begin(op, NwType::Statement);
        for b in blocks {
            self.write_block(b);
        }
        self.write_u32(file);
        self.write_u32(line);
        self.finish(start)
    }

    pub fn case_label(&mut self, value: i32, file: u32, line: u32) -> Block {
        let start = self.begin(Op::Case, NwType::Statement);
        self.write_i32(value);
        self.write_u32(file);
        self.write_u32(line);
        self.finish(start)
    }

    pub fn default_label(&mut self, file: u32, line: u32) -> Block {
        let start = self.begin(Op::Default, NwType::Statement);
        self.write_u32(file);
        self.write_u32(line);
        self.finish(start)
    }

    pub fn leaf(&mut self, op: Op) -> Block {
        let start = self.begin(op, NwType::Statement);
        self.finish(start)
    }

    /// `break`/`continue`: `pop_bytes` is the frame depth to unwind (every
    /// local declared since the enclosing loop/switch was entered) before
    /// jumping to the construct's exit/continuation label.
    pub fn break_stmt(&mut self, pop_bytes: u32) -> Block {
        let start = self.begin(Op::Break, NwType::Statement);
        self.write_u32(pop_bytes);
        self.finish(start)
    }

    pub fn continue_stmt(&mut self, pop_bytes: u32) -> Block {
        let start = self.begin(Op::Continue, NwType::Statement);
        self.write_u32(pop_bytes);
        self.finish(start)
    }

    /// An ordered run of sibling nodes — statements in a block, or the
    /// flattened `[label, body, label, body, ...]` list a `switch` lowers
    /// its cases into. Not itself one of the five node families spec'd for
    /// control flow; introduced because nothing else in this buffer can
    /// hold "zero or more of the following".
    pub fn seq(&mut self, items: &[Block]) -> Block {
        let start = self.begin(Op::Seq, NwType::Statement);
        self.write_u32(items.len() as u32);
        for b in items {
            self.write_block(*b);
        }
        self.finish(start)
    }

    /// `pop_bytes` is the whole live frame at the return site (every local
    /// and parameter declared so far), popped before `RETN`.
    pub fn return_node(&mut self, ty: NwType, value: Option<Block>, pop_bytes: u32) -> Block {
        let start = self.begin(Op::Return, ty);
        self.write_u8(value.is_some() as u8);
        self.write_block(value.unwrap_or(Block { offset: 0, size: 0 }));
        self.write_u32(pop_bytes);
        self.finish(start)
    }
}

/// Read-only cursor over a finished pcode buffer, used by the code
/// generator to walk nodes by following `Block` references instead of
/// re-parsing linearly.
pub struct Reader<'a> {
    buf: &'a [u8],
}

pub struct NodeHeader {
    pub op: Op,
    pub result_type: NwType,
    pub body_offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    pub fn header(&self, block: Block) -> NodeHeader {
        let off = block.offset as usize;
        let op = Op::from_u8(self.buf[off + 4]);
        let tag = self.buf[off + 5];
        let aux = u16::from_le_bytes([self.buf[off + 6], self.buf[off + 7]]);
        NodeHeader {
            op,
            result_type: decode_type(tag, aux),
            body_offset: off + 8,
        }
    }

    fn u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap())
    }
    fn i32_at(&self, off: usize) -> i32 {
        i32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap())
    }
    fn f32_at(&self, off: usize) -> f32 {
        f32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap())
    }
    fn u8_at(&self, off: usize) -> u8 {
        self.buf[off]
    }
    fn block_at(&self, off: usize) -> Block {
        Block {
            offset: self.u32_at(off),
            size: self.u32_at(off + 4),
        }
    }
    fn str_at(&self, off: usize) -> (String, usize) {
        let len = self.u32_at(off) as usize;
        let bytes = &self.buf[off + 4..off + 4 + len];
        (String::from_utf8_lossy(bytes).into_owned(), off + 4 + len)
    }

    pub fn read_const_int(&self, block: Block) -> i32 {
        let h = self.header(block);
        self.i32_at(h.body_offset)
    }
    pub fn read_const_float(&self, block: Block) -> f32 {
        let h = self.header(block);
        self.f32_at(h.body_offset)
    }
    pub fn read_const_string(&self, block: Block) -> String {
        let h = self.header(block);
        self.str_at(h.body_offset).0
    }
    pub fn read_const_object(&self, block: Block) -> u32 {
        let h = self.header(block);
        self.u32_at(h.body_offset)
    }
    pub fn read_const_vector(&self, block: Block) -> (f32, f32, f32) {
        let h = self.header(block);
        (
            self.f32_at(h.body_offset),
            self.f32_at(h.body_offset + 4),
            self.f32_at(h.body_offset + 8),
        )
    }

    pub fn read_variable(&self, block: Block) -> (u32, i32, i32, bool) {
        let h = self.header(block);
        let o = h.body_offset;
        (
            self.u32_at(o),
            self.i32_at(o + 4),
            self.i32_at(o + 8),
            self.u8_at(o + 12) != 0,
        )
    }

    pub fn read_binary(&self, block: Block) -> (BinTag, Block, Block) {
        let h = self.header(block);
        let o = h.body_offset;
        let op = match self.u8_at(o) {
            0 => BinTag::Add,
            1 => BinTag::Sub,
            2 => BinTag::Mul,
            3 => BinTag::Div,
            4 => BinTag::Mod,
            5 => BinTag::Eq,
            6 => BinTag::Neq,
            7 => BinTag::Lt,
            8 => BinTag::Gt,
            9 => BinTag::Leq,
            10 => BinTag::Geq,
            11 => BinTag::BitAnd,
            12 => BinTag::BitOr,
            13 => BinTag::BitXor,
            14 => BinTag::ShiftLeft,
            15 => BinTag::ShiftRight,
            16 => BinTag::UShiftRight,
            other => panic!("corrupt pcode stream: unknown BinTag {}", other),
        };
        (op, self.block_at(o + 1), self.block_at(o + 1 + 8))
    }

    pub fn read_unary_operand(&self, block: Block) -> Block {
        let h = self.header(block);
        self.block_at(h.body_offset)
    }

    pub fn read_logical(&self, block: Block) -> (Block, Block) {
        let h = self.header(block);
        (self.block_at(h.body_offset), self.block_at(h.body_offset + 8))
    }

    pub fn read_assign(&self, block: Block) -> (Block, Block) {
        let h = self.header(block);
        (self.block_at(h.body_offset), self.block_at(h.body_offset + 8))
    }

    pub fn read_compound_assign(&self, block: Block) -> (BinTag, Block, Block, bool) {
        let h = self.header(block);
        let o = h.body_offset;
        let op = match self.u8_at(o) {
            0 => BinTag::Add,
            1 => BinTag::Sub,
            2 => BinTag::Mul,
            3 => BinTag::Div,
            4 => BinTag::Mod,
            5 => BinTag::Eq,
            6 => BinTag::Neq,
            7 => BinTag::Lt,
            8 => BinTag::Gt,
            9 => BinTag::Leq,
            10 => BinTag::Geq,
            11 => BinTag::BitAnd,
            12 => BinTag::BitOr,
            13 => BinTag::BitXor,
            14 => BinTag::ShiftLeft,
            15 => BinTag::ShiftRight,
            16 => BinTag::UShiftRight,
            other => panic!("corrupt pcode stream: unknown BinTag {}", other),
        };
        let yields_old = self.u8_at(o + 1) != 0;
        (op, self.block_at(o + 2), self.block_at(o + 2 + 8), yields_old)
    }

    pub fn read_call(&self, block: Block) -> (u32, Vec<Block>) {
        let h = self.header(block);
        let o = h.body_offset;
        let callee = self.u32_at(o);
        let argc = self.u32_at(o + 4) as usize;
        let mut args = Vec::with_capacity(argc);
        let mut p = o + 8;
        for _ in 0..argc {
            args.push(self.block_at(p));
            p += 8;
        }
        (callee, args)
    }

    pub fn read_element_access(&self, block: Block) -> (Block, u32) {
        let h = self.header(block);
        (self.block_at(h.body_offset), self.u32_at(h.body_offset + 8))
    }

    pub fn read_control5(&self, block: Block) -> ([Block; 5], u32, u32) {
        let h = self.header(block);
        let o = h.body_offset;
        let mut blocks = [Block { offset: 0, size: 0 }; 5];
        for (i, b) in blocks.iter_mut().enumerate() {
            *b = self.block_at(o + i * 8);
        }
        let tail = o + 5 * 8;
        (blocks, self.u32_at(tail), self.u32_at(tail + 4))
    }

    pub fn read_case_label(&self, block: Block) -> (i32, u32, u32) {
        let h = self.header(block);
        let o = h.body_offset;
        (self.i32_at(o), self.u32_at(o + 4), self.u32_at(o + 8))
    }

    pub fn read_return(&self, block: Block) -> (Option<Block>, u32) {
        let h = self.header(block);
        let o = h.body_offset;
        let value = if self.u8_at(o) != 0 {
            Some(self.block_at(o + 1))
        } else {
            None
        };
        (value, self.u32_at(o + 9))
    }

    pub fn read_break(&self, block: Block) -> u32 {
        let h = self.header(block);
        self.u32_at(h.body_offset)
    }

    pub fn read_continue(&self, block: Block) -> u32 {
        let h = self.header(block);
        self.u32_at(h.body_offset)
    }

    pub fn read_statement(&self, block: Block) -> (u32, Block) {
        let h = self.header(block);
        let o = h.body_offset;
        (self.u32_at(o), self.block_at(o + 4))
    }

    pub fn read_seq(&self, block: Block) -> Vec<Block> {
        let h = self.header(block);
        let o = h.body_offset;
        let n = self.u32_at(o) as usize;
        let mut items = Vec::with_capacity(n);
        let mut p = o + 4;
        for _ in 0..n {
            items.push(self.block_at(p));
            p += 8;
        }
        items
    }

    pub fn read_declaration(&self, block: Block) -> (u32, Option<Block>, u32, u32) {
        let h = self.header(block);
        let o = h.body_offset;
        let symbol_offset = self.u32_at(o);
        let has_init = self.u8_at(o + 4) != 0;
        let init_block = self.block_at(o + 5);
        let file = self.u32_at(o + 13);
        let line = self.u32_at(o + 17);
        (symbol_offset, if has_init { Some(init_block) } else { None }, file, line)
    }
}

/// Placeholder empty block, used for absent optional sub-streams (e.g.
/// a `for` loop with no init clause).
pub const EMPTY: Block = Block { offset: 0, size: 0 };

pub fn is_empty(b: Block) -> bool {
    b.size == 0
}

/// Renders one node and its children as indented mnemonic lines, for
/// `--dump-pcode`. Not meant to round-trip; a debugging aid only.
pub fn dump(r: &Reader, block: Block, depth: usize, out: &mut String) {
    use std::fmt::Write;
    if is_empty(block) {
        return;
    }
    let h = r.header(block);
    let indent = "  ".repeat(depth);
    match h.op {
        Op::ConstInt => {
            let _ = writeln!(out, "{}ConstInt {}", indent, r.read_const_int(block));
        }
        Op::ConstFloat => {
            let _ = writeln!(out, "{}ConstFloat {}", indent, r.read_const_float(block));
        }
        Op::ConstString => {
            let _ = writeln!(out, "{}ConstString {:?}", indent, r.read_const_string(block));
        }
        Op::ConstObject => {
            let _ = writeln!(out, "{}ConstObject {}", indent, r.read_const_object(block));
        }
        Op::ConstVector => {
            let (x, y, z) = r.read_const_vector(block);
            let _ = writeln!(out, "{}ConstVector {} {} {}", indent, x, y, z);
        }
        Op::Variable => {
            let (sym, elem, stack_off, is_global) = r.read_variable(block);
            let _ = writeln!(
                out,
                "{}Variable sym={} elem={} stack={} global={}",
                indent, sym, elem, stack_off, is_global
            );
        }
        Op::BinaryOp => {
            let (op, lhs, rhs) = r.read_binary(block);
            let _ = writeln!(out, "{}BinaryOp {:?}", indent, op);
            dump(r, lhs, depth + 1, out);
            dump(r, rhs, depth + 1, out);
        }
        Op::UnaryNot | Op::UnaryNeg | Op::UnaryBitNot => {
            let operand = r.read_unary_operand(block);
            let _ = writeln!(out, "{}{:?}", indent, h.op);
            dump(r, operand, depth + 1, out);
        }
        Op::LogicalAnd | Op::LogicalOr => {
            let (lhs, rhs) = r.read_logical(block);
            let _ = writeln!(out, "{}{:?}", indent, h.op);
            dump(r, lhs, depth + 1, out);
            dump(r, rhs, depth + 1, out);
        }
        Op::Assign => {
            let (target, value) = r.read_assign(block);
            let _ = writeln!(out, "{}Assign", indent);
            dump(r, target, depth + 1, out);
            dump(r, value, depth + 1, out);
        }
        Op::CompoundAssign => {
            let (op, target, value, yields_old) = r.read_compound_assign(block);
            let _ = writeln!(out, "{}CompoundAssign {:?} yields_old={}", indent, op, yields_old);
            dump(r, target, depth + 1, out);
            dump(r, value, depth + 1, out);
        }
        Op::Call => {
            let (callee, args) = r.read_call(block);
            let _ = writeln!(out, "{}Call callee_sym={} argc={}", indent, callee, args.len());
            for a in args {
                dump(r, a, depth + 1, out);
            }
        }
        Op::ElementAccess => {
            let (base, field) = r.read_element_access(block);
            let _ = writeln!(out, "{}ElementAccess field={}", indent, field);
            dump(r, base, depth + 1, out);
        }
        Op::If | Op::While | Op::Do | Op::For | Op::Switch => {
            let (blocks, file, line) = r.read_control5(block);
            let _ = writeln!(out, "{}{:?} (file={}, line={})", indent, h.op, file, line);
            for b in blocks {
                dump(r, b, depth + 1, out);
            }
        }
        Op::Case => {
            let (value, file, line) = r.read_case_label(block);
            let _ = writeln!(out, "{}Case {} (file={}, line={})", indent, value, file, line);
        }
        Op::Default => {
            let _ = writeln!(out, "{}Default", indent);
        }
        Op::Break => {
            let _ = writeln!(out, "{}Break pop={}", indent, r.read_break(block));
        }
        Op::Continue => {
            let _ = writeln!(out, "{}Continue pop={}", indent, r.read_continue(block));
        }
        Op::Return => {
            let (value, pop_bytes) = r.read_return(block);
            let _ = writeln!(out, "{}Return pop={}", indent, pop_bytes);
            if let Some(v) = value {
                dump(r, v, depth + 1, out);
            }
        }
        Op::Line => {
            let _ = writeln!(out, "{}Line", indent);
        }
        Op::Statement => {
            let (local_bytes, body) = r.read_statement(block);
            let _ = writeln!(out, "{}Statement locals={}", indent, local_bytes);
            dump(r, body, depth + 1, out);
        }
        Op::Declaration => {
            let (sym, init, file, line) = r.read_declaration(block);
            let _ = writeln!(out, "{}Declaration sym={} (file={}, line={})", indent, sym, file, line);
            if let Some(i) = init {
                dump(r, i, depth + 1, out);
            }
        }
        Op::Seq => {
            let _ = writeln!(out, "{}Seq", indent);
            for item in r.read_seq(block) {
                dump(r, item, depth + 1, out);
            }
        }
        Op::ExpressionEnd | Op::Argument => {
            let _ = writeln!(out, "{}{:?}", indent, h.op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_int_roundtrips() {
        let mut b = Builder::new();
        let block = b.const_int(42);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        assert_eq!(r.read_const_int(block), 42);
    }

    #[test]
    fn binary_node_nests_operand_blocks() {
        let mut b = Builder::new();
        let lhs = b.const_int(2);
        let rhs = b.const_int(3);
        let add = b.binary(BinTag::Add, NwType::Integer, lhs, rhs);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        let (op, l, rr) = r.read_binary(add);
        assert_eq!(op, BinTag::Add);
        assert_eq!(r.read_const_int(l), 2);
        assert_eq!(r.read_const_int(rr), 3);
    }

    #[test]
    fn control5_preserves_five_sub_blocks() {
        let mut b = Builder::new();
        let cond = b.const_int(1);
        let body = b.leaf(Op::Break);
        let blocks = [cond, body, EMPTY, EMPTY, EMPTY];
        let node = b.control5(Op::While, blocks, 0, 7);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        let (got, file, line) = r.read_control5(node);
        assert_eq!(got[0], cond);
        assert_eq!(got[1], body);
        assert!(is_empty(got[2]));
        assert_eq!(file, 0);
        assert_eq!(line, 7);
    }

    #[test]
    fn call_node_carries_every_argument() {
        let mut b = Builder::new();
        let a0 = b.const_int(1);
        let a1 = b.const_int(2);
        let call = b.call(NwType::Void, 5, &[a0, a1]);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        let (callee, args) = r.read_call(call);
        assert_eq!(callee, 5);
        assert_eq!(args, vec![a0, a1]);
    }

    #[test]
    fn seq_preserves_item_order() {
        let mut b = Builder::new();
        let a = b.const_int(1);
        let c = b.const_int(2);
        let list = b.seq(&[a, c]);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        assert_eq!(r.read_seq(list), vec![a, c]);
    }

    #[test]
    fn declaration_without_initializer_reads_back_none() {
        let mut b = Builder::new();
        let decl = b.declaration(NwType::Integer, 3, None, 0, 10);
        let bytes = b.into_bytes();
        let r = Reader::new(&bytes);
        let (sym, init, _file, line) = r.read_declaration(decl);
        assert_eq!(sym, 3);
        assert!(init.is_none());
        assert_eq!(line, 10);
    }
}
