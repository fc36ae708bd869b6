//! Code generator (component G): walks one function's lowered pcode tree
//! and emits an NCS instruction stream, resolving local/global stack
//! offsets and control-flow labels as it goes. Cross-function `JSR`
//! targets stay as named placeholders until [`link`] lays out the whole
//! program and can resolve them to absolute byte offsets.
//!
//! Every local and parameter lives at a byte offset the lowering pass
//! (`lower.rs`) already assigned relative to its function's own frame
//! base; this pass turns that into an SP-relative offset by tracking
//! `depth`, the number of bytes actually pushed so far at each point in
//! the generated code — `CPTOPSP`/`CPDOWNSP`'s offset is always
//! `-(depth - declared_offset)`. Globals use the same idea against a
//! frame anchored by `SAVEBP`/`BP`, except that frame never moves once
//! established, so its offsets are fixed constants computed once from
//! `global_frame_size`.

use crate::lower::{type_size, LoweredFunction};
use crate::pcode::{BinTag, Block, Op, Reader};
use crate::symtab::{NwType, SymExtra, SymKind, SymbolTable};
use nwnsc_bytecode::ncs::{Instruction, Operand};
use nwnsc_bytecode::opcode::{Opcode, TypeTag};
use std::collections::HashMap;

/// One entry in a function's pre-link instruction stream. `Branch` and
/// `Call` stay symbolic until [`link`] knows every function's final
/// position in the concatenated program.
#[derive(Clone)]
pub enum FuncInstr {
    Real(Instruction),
    Label(u32),
    Branch { opcode: Opcode, label: u32 },
    Call { callee: String },
}

#[derive(Clone, Copy)]
enum Addr {
    Sp(i32),
    Bp(i32),
}

struct FuncEmit<'a> {
    reader: Reader<'a>,
    symtab: &'a SymbolTable,
    global_frame_size: u32,
    out: Vec<FuncInstr>,
    label_counter: u32,
    depth: i32,
    uses_global_vars: bool,
    break_labels: Vec<(u32, i32)>,
    continue_labels: Vec<(u32, i32)>,
}

fn single_tag(ty: NwType) -> TypeTag {
    match ty {
        NwType::Float => TypeTag::Float,
        NwType::String => TypeTag::String,
        NwType::Object => TypeTag::Object,
        _ => TypeTag::Int,
    }
}

fn pair_tag(lhs: NwType, rhs: NwType) -> TypeTag {
    use NwType::*;
    match (lhs, rhs) {
        (Integer, Integer) => TypeTag::IntInt,
        (Float, Float) => TypeTag::FloatFloat,
        (Integer, Float) => TypeTag::IntFloat,
        (Float, Integer) => TypeTag::FloatInt,
        (String, String) => TypeTag::StringString,
        (Object, Object) => TypeTag::ObjectObject,
        (Vector, Vector) => TypeTag::VectorVector,
        (Vector, Float) => TypeTag::VectorFloat,
        (Float, Vector) => TypeTag::FloatVector,
        (Struct(_), Struct(_)) => TypeTag::StructStruct,
        _ => TypeTag::IntInt,
    }
}

fn opcode_for_bintag(tag: BinTag) -> Opcode {
    use BinTag::*;
    match tag {
        Add => Opcode::Add,
        Sub => Opcode::Sub,
        Mul => Opcode::Mul,
        Div => Opcode::Div,
        Mod => Opcode::Mod,
        Eq => Opcode::Eq,
        Neq => Opcode::Neq,
        Lt => Opcode::Lt,
        Gt => Opcode::Gt,
        Leq => Opcode::Leq,
        Geq => Opcode::Geq,
        BitAnd => Opcode::BoolAnd,
        BitOr => Opcode::IncOr,
        BitXor => Opcode::ExcOr,
        ShiftLeft => Opcode::ShLeft,
        ShiftRight => Opcode::ShRight,
        UShiftRight => Opcode::UShRight,
    }
}

fn promote_bintag(tag: BinTag, l: NwType, r: NwType) -> NwType {
    use BinTag::*;
    match tag {
        Eq | Neq | Lt | Gt | Leq | Geq => NwType::Integer,
        _ => match (l, r) {
            (NwType::Float, _) | (_, NwType::Float) => NwType::Float,
            (NwType::Vector, _) | (_, NwType::Vector) => NwType::Vector,
            (NwType::String, _) => NwType::String,
            (a, _) => a,
        },
    }
}

/// Struct field count for a default-value initializer. Mirrors
/// `lower.rs`'s own fallback: this parser never attaches a struct's
/// identity to `NwType::Struct`, so every struct-typed slot is sized by
/// scanning for any declared struct with fields. See DESIGN.md.
fn struct_field_count_hint(symtab: &SymbolTable) -> u32 {
    for i in 0..symtab.len() as u32 {
        let sym = symtab.get(i);
        if sym.kind == SymKind::Structure {
            if let SymExtra::Structure(se) = &sym.extra {
                if !se.fields.is_empty() {
                    return se.fields.len() as u32;
                }
            }
        }
    }
    1
}

impl<'a> FuncEmit<'a> {
    fn push(&mut self, opcode: Opcode, type_tag: Option<TypeTag>, operand: Operand) {
        self.out.push(FuncInstr::Real(Instruction { opcode, type_tag, operand }));
    }

    fn branch(&mut self, opcode: Opcode, label: u32) {
        self.out.push(FuncInstr::Branch { opcode, label });
    }

    fn push_call(&mut self, callee: String) {
        self.out.push(FuncInstr::Call { callee });
    }

    fn new_label(&mut self) -> u32 {
        self.label_counter += 1;
        self.label_counter
    }

    fn place_label(&mut self, id: u32) {
        self.out.push(FuncInstr::Label(id));
    }

    fn size(&self, ty: NwType) -> u32 {
        type_size(ty, self.symtab)
    }

    // ---- lvalue resolution -----------------------------------------------

    fn resolve_target(&mut self, block: Block) -> (Addr, NwType) {
        let h = self.reader.header(block);
        match h.op {
            Op::Variable => {
                let (_symoff, _elem, stack_off, is_global) = self.reader.read_variable(block);
                if is_global {
                    (Addr::Bp(-(self.global_frame_size as i32 - stack_off)), h.result_type)
                } else {
                    (Addr::Sp(-(self.depth - stack_off)), h.result_type)
                }
            }
            Op::ElementAccess => {
                let (base, field_idx) = self.reader.read_element_access(block);
                let (addr, _) = self.resolve_target(base);
                let delta = field_idx as i32 * 4;
                let addr = match addr {
                    Addr::Sp(o) => Addr::Sp(o + delta),
                    Addr::Bp(o) => Addr::Bp(o + delta),
                };
                (addr, h.result_type)
            }
            _ => panic!("lowered expression is not assignable"),
        }
    }

    fn emit_copy(&mut self, down: bool, addr: Addr, size: u16) {
        let opcode = match (down, addr) {
            (true, Addr::Sp(_)) => Opcode::CpDownSp,
            (true, Addr::Bp(_)) => Opcode::CpDownBp,
            (false, Addr::Sp(_)) => Opcode::CpTopSp,
            (false, Addr::Bp(_)) => Opcode::CpTopBp,
        };
        let off = match addr {
            Addr::Sp(o) | Addr::Bp(o) => o,
        };
        self.push(opcode, None, Operand::StackCopy(off, size));
    }

    // ---- expressions -------------------------------------------------------

    fn gen_expr(&mut self, block: Block) -> NwType {
        let h = self.reader.header(block);
        match h.op {
            Op::ConstInt => {
                let v = self.reader.read_const_int(block);
                self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(v));
                self.depth += 4;
                NwType::Integer
            }
            Op::ConstFloat => {
                let v = self.reader.read_const_float(block);
                self.push(Opcode::Const, Some(TypeTag::Float), Operand::ConstFloat(v));
                self.depth += 4;
                NwType::Float
            }
            Op::ConstString => {
                let s = self.reader.read_const_string(block);
                self.push(Opcode::Const, Some(TypeTag::String), Operand::ConstString(s));
                self.depth += 4;
                NwType::String
            }
            Op::ConstObject => {
                let v = self.reader.read_const_object(block);
                self.push(Opcode::Const, Some(TypeTag::Object), Operand::ConstObject(v));
                self.depth += 4;
                NwType::Object
            }
            Op::ConstVector => {
                let (x, y, z) = self.reader.read_const_vector(block);
                for f in [x, y, z] {
                    self.push(Opcode::Const, Some(TypeTag::Float), Operand::ConstFloat(f));
                    self.depth += 4;
                }
                NwType::Vector
            }
            Op::Variable => self.gen_variable_read(block),
            Op::ElementAccess => self.gen_element_read(block),
            Op::Call => self.gen_call(block),
            Op::Assign => self.gen_assign(block),
            Op::CompoundAssign => self.gen_compound_assign(block),
            Op::BinaryOp => self.gen_binary(block),
            Op::UnaryNeg | Op::UnaryNot | Op::UnaryBitNot => self.gen_unary(h.op, block),
            Op::LogicalAnd => {
                let (l, r) = self.reader.read_logical(block);
                self.gen_logical(true, l, r)
            }
            Op::LogicalOr => {
                let (l, r) = self.reader.read_logical(block);
                self.gen_logical(false, l, r)
            }
            other => panic!("{:?} is not an expression node", other),
        }
    }

    fn gen_variable_read(&mut self, block: Block) -> NwType {
        let h = self.reader.header(block);
        let (_symoff, _elem, stack_off, is_global) = self.reader.read_variable(block);
        let ty = h.result_type;
        let size = self.size(ty) as u16;
        if is_global {
            self.uses_global_vars = true;
            let off = -(self.global_frame_size as i32 - stack_off);
            self.emit_copy(false, Addr::Bp(off), size);
        } else {
            let off = -(self.depth - stack_off);
            self.emit_copy(false, Addr::Sp(off), size);
        }
        self.depth += size as i32;
        ty
    }

    fn gen_element_read(&mut self, block: Block) -> NwType {
        let h = self.reader.header(block);
        let (base, field_idx) = self.reader.read_element_access(block);
        let ty = h.result_type;
        let size = self.size(ty) as u16;
        let base_op = self.reader.header(base).op;
        if matches!(base_op, Op::Variable | Op::ElementAccess) {
            let (addr, _) = self.resolve_target(base);
            if matches!(addr, Addr::Bp(_)) {
                self.uses_global_vars = true;
            }
            let addr = match addr {
                Addr::Sp(o) => Addr::Sp(o + field_idx as i32 * 4),
                Addr::Bp(o) => Addr::Bp(o + field_idx as i32 * 4),
            };
            self.emit_copy(false, addr, size);
            self.depth += size as i32;
        } else {
            // The base is an rvalue (e.g. a call's return value): push it
            // whole, then fold it down to just the one field with DESTRUCT.
            let base_ty = self.gen_expr(base);
            let base_size = self.size(base_ty);
            let offset_to_save = -((base_size as i32) - (field_idx as i32 * 4) - 4);
            self.push(
                Opcode::Destruct,
                None,
                Operand::Destruct {
                    size_to_destroy: base_size as u16,
                    offset_to_save: offset_to_save as i16,
                    size_to_save: size,
                },
            );
            self.depth = self.depth - base_size as i32 + size as i32;
        }
        ty
    }

    fn gen_assign(&mut self, block: Block) -> NwType {
        let (target, value) = self.reader.read_assign(block);
        let ty = self.gen_expr(value);
        let size = self.size(ty) as u16;
        let (addr, _) = self.resolve_target(target);
        self.emit_copy(true, addr, size);
        ty
    }

    fn gen_compound_assign(&mut self, block: Block) -> NwType {
        let (tag, target, value, yields_old) = self.reader.read_compound_assign(block);
        let lty = self.gen_expr(target);
        let lsz = self.size(lty) as i32;
        if yields_old {
            // Stash a copy of the pre-update value beneath the operand so
            // it survives to become the expression's result.
            self.push(Opcode::CpTopSp, None, Operand::StackCopy(-lsz, lsz as u16));
            self.depth += lsz;
        }
        let rty = self.gen_expr(value);
        let result = promote_bintag(tag, lty, rty);
        let opc = opcode_for_bintag(tag);
        let ptag = pair_tag(lty, rty);
        self.push(opc, Some(ptag), Operand::None);
        let rsz = self.size(rty) as i32;
        let rsz2 = self.size(result) as i32;
        self.depth = self.depth - lsz - rsz + rsz2;
        let (addr, _) = self.resolve_target(target);
        self.emit_copy(true, addr, rsz2 as u16);
        if yields_old {
            // Discard the freshly stored new value; the duplicated old
            // value pushed above is left as the expression's result.
            self.push(Opcode::MovSp, None, Operand::StackAdjust(-rsz2));
            self.depth -= rsz2;
        }
        result
    }

    fn gen_binary(&mut self, block: Block) -> NwType {
        let (tag, lhs, rhs) = self.reader.read_binary(block);
        let lty = self.gen_expr(lhs);
        let rty = self.gen_expr(rhs);
        let result = promote_bintag(tag, lty, rty);
        let opc = opcode_for_bintag(tag);
        let ptag = pair_tag(lty, rty);
        self.push(opc, Some(ptag), Operand::None);
        let lsz = self.size(lty) as i32;
        let rsz = self.size(rty) as i32;
        let rsz2 = self.size(result) as i32;
        self.depth = self.depth - lsz - rsz + rsz2;
        result
    }

    fn gen_unary(&mut self, op: Op, block: Block) -> NwType {
        let operand = self.reader.read_unary_operand(block);
        let ty = self.gen_expr(operand);
        match op {
            Op::UnaryNeg => {
                self.push(Opcode::Neg, Some(single_tag(ty)), Operand::None);
                ty
            }
            Op::UnaryNot => {
                self.push(Opcode::Not, Some(TypeTag::Int), Operand::None);
                NwType::Integer
            }
            Op::UnaryBitNot => {
                self.push(Opcode::Comp, Some(TypeTag::Int), Operand::None);
                NwType::Integer
            }
            _ => unreachable!(),
        }
    }

    /// Short-circuit `&&`/`||`, normalizing the result to a clean `0`/`1`
    /// int via `NEQ 0` on the taken side so both branches of the join
    /// leave the same stack depth behind them.
    fn gen_logical(&mut self, is_and: bool, lhs: Block, rhs: Block) -> NwType {
        let _ = self.gen_expr(lhs);
        let short_label = self.new_label();
        let join = self.new_label();
        if is_and {
            self.branch(Opcode::Jz, short_label);
            self.depth -= 4;
            let _ = self.gen_expr(rhs);
            self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(0));
            self.depth += 4;
            self.push(Opcode::Neq, Some(TypeTag::IntInt), Operand::None);
            self.depth -= 4;
            self.branch(Opcode::Jmp, join);
            self.place_label(short_label);
            self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(0));
            self.depth += 4;
            self.place_label(join);
        } else {
            self.branch(Opcode::Jnz, short_label);
            self.depth -= 4;
            let _ = self.gen_expr(rhs);
            self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(0));
            self.depth += 4;
            self.push(Opcode::Neq, Some(TypeTag::IntInt), Operand::None);
            self.depth -= 4;
            self.branch(Opcode::Jmp, join);
            self.place_label(short_label);
            self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(1));
            self.depth += 4;
            self.place_label(join);
        }
        NwType::Integer
    }

    fn gen_default_value(&mut self, ty: NwType) {
        match ty {
            NwType::Integer | NwType::Unknown | NwType::Void | NwType::Error | NwType::Action | NwType::Statement | NwType::Engine(_) => {
                self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(0));
                self.depth += 4;
            }
            NwType::Float => {
                self.push(Opcode::Const, Some(TypeTag::Float), Operand::ConstFloat(0.0));
                self.depth += 4;
            }
            NwType::String => {
                self.push(Opcode::Const, Some(TypeTag::String), Operand::ConstString(String::new()));
                self.depth += 4;
            }
            NwType::Object => {
                self.push(Opcode::Const, Some(TypeTag::Object), Operand::ConstObject(0));
                self.depth += 4;
            }
            NwType::Vector => {
                for _ in 0..3 {
                    self.push(Opcode::Const, Some(TypeTag::Float), Operand::ConstFloat(0.0));
                    self.depth += 4;
                }
            }
            NwType::Struct(_) => {
                let n = struct_field_count_hint(self.symtab);
                for _ in 0..n {
                    self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(0));
                    self.depth += 4;
                }
            }
        }
    }

    fn gen_call(&mut self, block: Block) -> NwType {
        let (callee_off, args) = self.reader.read_call(block);
        let sym = self.symtab.get(callee_off);
        let (return_type, action_idx, callee_name, is_default_stub) = match &sym.extra {
            SymExtra::Function(fe) => (fe.return_type, fe.engine_action_index, sym.name.clone(), !fe.defined && fe.default_function),
            _ => (NwType::Void, None, sym.name.clone(), false),
        };
        let ret_size = self.size(return_type);
        if !matches!(return_type, NwType::Void) && action_idx.is_some() {
            self.gen_default_value(return_type);
        }
        let mut arg_bytes = 0u32;
        for a in &args {
            let ty = self.gen_expr(*a);
            arg_bytes += self.size(ty);
        }
        match action_idx {
            Some(idx) => {
                self.push(
                    Opcode::Action,
                    None,
                    Operand::Action { index: idx, arg_count: args.len() as u8 },
                );
                self.depth -= arg_bytes as i32;
            }
            None if is_default_stub => {
                // Declared but never given a body, and flagged `#pragma
                // default_function`: discard the (already-evaluated, for
                // any side effects) arguments and synthesize a zero-valued
                // result instead of calling into a body that doesn't exist.
                if arg_bytes > 0 {
                    self.push(Opcode::MovSp, None, Operand::StackAdjust(-(arg_bytes as i32)));
                    self.depth -= arg_bytes as i32;
                }
                if !matches!(return_type, NwType::Void) {
                    self.gen_default_value(return_type);
                }
            }
            None => {
                self.push_call(callee_name);
                self.depth = self.depth - arg_bytes as i32 + ret_size as i32;
            }
        }
        return_type
    }

    // ---- statements ----------------------------------------------------------

    fn walk_seq(&mut self, seq: Block) {
        for item in self.reader.read_seq(seq) {
            self.walk_stmt(item);
        }
    }

    fn walk_stmt(&mut self, block: Block) {
        let h = self.reader.header(block);
        match h.op {
            Op::Statement => {
                let (local_bytes, body) = self.reader.read_statement(block);
                self.walk_seq(body);
                if local_bytes > 0 {
                    self.push(Opcode::MovSp, None, Operand::StackAdjust(-(local_bytes as i32)));
                    self.depth -= local_bytes as i32;
                }
            }
            Op::Seq => self.walk_seq(block),
            Op::Declaration => self.gen_declaration(block),
            Op::If => self.gen_if(block),
            Op::While => self.gen_while(block),
            Op::Do => self.gen_do(block),
            Op::For => self.gen_for(block),
            Op::Switch => self.gen_switch(block),
            Op::Break => {
                let pop = self.reader.read_break(block);
                self.emit_pop(pop);
                let label = self.break_labels.last().expect("break outside loop/switch").0;
                self.branch(Opcode::Jmp, label);
            }
            Op::Continue => {
                let pop = self.reader.read_continue(block);
                self.emit_pop(pop);
                let label = self.continue_labels.last().expect("continue outside loop").0;
                self.branch(Opcode::Jmp, label);
            }
            Op::Return => self.gen_return(block),
            _ => {
                let ty = self.gen_expr(block);
                let sz = self.size(ty);
                if sz > 0 {
                    self.push(Opcode::MovSp, None, Operand::StackAdjust(-(sz as i32)));
                    self.depth -= sz as i32;
                }
            }
        }
    }

    fn emit_pop(&mut self, bytes: u32) {
        if bytes > 0 {
            self.push(Opcode::MovSp, None, Operand::StackAdjust(-(bytes as i32)));
        }
    }

    fn gen_declaration(&mut self, block: Block) {
        let h = self.reader.header(block);
        let (_symoff, init, _file, _line) = self.reader.read_declaration(block);
        match init {
            Some(blk) => {
                let _ = self.gen_expr(blk);
            }
            None => self.gen_default_value(h.result_type),
        }
    }

    fn gen_if(&mut self, block: Block) {
        let (blocks, _file, _line) = self.reader.read_control5(block);
        let [cond, then_b, else_b, _, _] = blocks;
        let cty = self.gen_expr(cond);
        self.depth -= self.size(cty) as i32;
        let else_label = self.new_label();
        self.branch(Opcode::Jz, else_label);
        self.walk_stmt(then_b);
        if crate::pcode::is_empty(else_b) {
            self.place_label(else_label);
        } else {
            let end_label = self.new_label();
            self.branch(Opcode::Jmp, end_label);
            self.place_label(else_label);
            self.walk_stmt(else_b);
            self.place_label(end_label);
        }
    }

    fn gen_while(&mut self, block: Block) {
        let (blocks, _file, _line) = self.reader.read_control5(block);
        let [cond, body, _, _, _] = blocks;
        let top = self.new_label();
        let end = self.new_label();
        self.place_label(top);
        let cty = self.gen_expr(cond);
        self.depth -= self.size(cty) as i32;
        self.branch(Opcode::Jz, end);
        self.continue_labels.push((top, self.depth));
        self.break_labels.push((end, self.depth));
        self.walk_stmt(body);
        self.continue_labels.pop();
        self.break_labels.pop();
        self.branch(Opcode::Jmp, top);
        self.place_label(end);
    }

    fn gen_do(&mut self, block: Block) {
        let (blocks, _file, _line) = self.reader.read_control5(block);
        let [cond, body, _, _, _] = blocks;
        let top = self.new_label();
        let end = self.new_label();
        let cont = self.new_label();
        self.place_label(top);
        self.continue_labels.push((cont, self.depth));
        self.break_labels.push((end, self.depth));
        self.walk_stmt(body);
        self.continue_labels.pop();
        self.break_labels.pop();
        self.place_label(cont);
        let cty = self.gen_expr(cond);
        self.depth -= self.size(cty) as i32;
        self.branch(Opcode::Jnz, top);
        self.place_label(end);
    }

    fn gen_for(&mut self, block: Block) {
        let (blocks, _file, _line) = self.reader.read_control5(block);
        let [init, cond, step, body, _] = blocks;
        if !crate::pcode::is_empty(init) {
            let ty = self.gen_expr(init);
            let sz = self.size(ty);
            if sz > 0 {
                self.push(Opcode::MovSp, None, Operand::StackAdjust(-(sz as i32)));
                self.depth -= sz as i32;
            }
        }
        let top = self.new_label();
        let end = self.new_label();
        let cont = self.new_label();
        self.place_label(top);
        if !crate::pcode::is_empty(cond) {
            let cty = self.gen_expr(cond);
            self.depth -= self.size(cty) as i32;
            self.branch(Opcode::Jz, end);
        }
        self.continue_labels.push((cont, self.depth));
        self.break_labels.push((end, self.depth));
        self.walk_stmt(body);
        self.continue_labels.pop();
        self.break_labels.pop();
        self.place_label(cont);
        if !crate::pcode::is_empty(step) {
            let ty = self.gen_expr(step);
            let sz = self.size(ty);
            if sz > 0 {
                self.push(Opcode::MovSp, None, Operand::StackAdjust(-(sz as i32)));
                self.depth -= sz as i32;
            }
        }
        self.branch(Opcode::Jmp, top);
        self.place_label(end);
    }

    /// Switches lower to a chain of duplicate-and-compare tests rather
    /// than a jump table — simpler to get right and, unlike a table, has
    /// no trouble with non-contiguous case values. `break` targets `end`;
    /// case bodies fall through to the next one when a case doesn't end
    /// in `break`, matching C/NWScript switch semantics.
    fn gen_switch(&mut self, block: Block) {
        let (blocks, _file, _line) = self.reader.read_control5(block);
        let [scrutinee, cases_blk, _, _, _] = blocks;
        let sty = self.gen_expr(scrutinee);
        let ssize = self.size(sty);
        let scrutinee_base_depth = self.depth - ssize as i32;
        let items = self.reader.read_seq(cases_blk);

        let end = self.new_label();
        self.break_labels.push((end, scrutinee_base_depth));

        let mut body_labels = Vec::with_capacity(items.len() / 2);
        let mut default_label: Option<u32> = None;
        let mut i = 0;
        while i + 1 < items.len() {
            let label_blk = items[i];
            let body_lbl = self.new_label();
            body_labels.push(body_lbl);
            let lh = self.reader.header(label_blk);
            match lh.op {
                Op::Case => {
                    let (value, _, _) = self.reader.read_case_label(label_blk);
                    let off = -(self.depth - scrutinee_base_depth);
                    self.push(Opcode::CpTopSp, None, Operand::StackCopy(off, ssize as u16));
                    self.depth += ssize as i32;
                    self.push(Opcode::Const, Some(TypeTag::Int), Operand::ConstInt(value));
                    self.depth += 4;
                    self.push(Opcode::Eq, Some(pair_tag(sty, NwType::Integer)), Operand::None);
                    self.depth = self.depth - ssize as i32 - 4 + 4;
                    self.branch(Opcode::Jnz, body_lbl);
                    self.depth -= 4;
                }
                Op::Default => default_label = Some(body_lbl),
                _ => {}
            }
            i += 2;
        }

        self.push(Opcode::MovSp, None, Operand::StackAdjust(-(ssize as i32)));
        self.depth -= ssize as i32;
        self.branch(Opcode::Jmp, default_label.unwrap_or(end));

        let mut i = 0;
        let mut bi = 0;
        while i + 1 < items.len() {
            let body_blk = items[i + 1];
            self.place_label(body_labels[bi]);
            bi += 1;
            self.walk_seq(body_blk);
            i += 2;
        }

        self.break_labels.pop();
        self.place_label(end);
    }

    /// `RETN` doesn't know how to discard the caller's and this
    /// function's live frame on its own in this instruction set, so an
    /// explicit `DESTRUCT` folds [locals-and-params, return value] down
    /// to just the return value first — its `offset_to_save` names the
    /// topmost `ret_size` bytes of the doomed region using the same
    /// negative, distance-from-top convention `CPDOWNSP` uses.
    fn gen_return(&mut self, block: Block) {
        let (value, pop_bytes) = self.reader.read_return(block);
        let ret_size = match value {
            Some(v) => {
                let ty = self.gen_expr(v);
                self.size(ty)
            }
            None => 0,
        };
        if pop_bytes > 0 {
            if ret_size > 0 {
                let offset_to_save = -(ret_size as i32);
                self.push(
                    Opcode::Destruct,
                    None,
                    Operand::Destruct {
                        size_to_destroy: (pop_bytes + ret_size) as u16,
                        offset_to_save: offset_to_save as i16,
                        size_to_save: ret_size as u16,
                    },
                );
            } else {
                self.push(Opcode::MovSp, None, Operand::StackAdjust(-(pop_bytes as i32)));
            }
            self.depth -= pop_bytes as i32;
        }
        if self.uses_global_vars {
            self.push(Opcode::RestoreBp, None, Operand::None);
        }
        self.push(Opcode::Retn, None, Operand::None);
    }
}

/// Turns one function's lowered pcode into its pre-link instruction
/// stream. `label_seed` lets labels stay globally unique across every
/// function sharing one program without resetting per function — needed
/// since [`link`] resolves every label/branch pair in one flat pass over
/// the whole concatenated program.
pub fn compile_function(
    symtab: &SymbolTable,
    lf: &LoweredFunction,
    global_frame_size: u32,
    label_seed: u32,
) -> (Vec<FuncInstr>, u32) {
    let mut fe = FuncEmit {
        reader: Reader::new(&lf.code),
        symtab,
        global_frame_size,
        out: Vec::new(),
        label_counter: label_seed,
        depth: lf.param_bytes as i32,
        uses_global_vars: lf.uses_global_vars,
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
    };
    if lf.uses_global_vars {
        fe.push(Opcode::SaveBp, None, Operand::None);
    }
    fe.walk_seq(lf.body);
    if lf.uses_global_vars {
        fe.push(Opcode::RestoreBp, None, Operand::None);
    }
    let pop = lf.frame_size as i32;
    if pop > 0 {
        fe.push(Opcode::MovSp, None, Operand::StackAdjust(-pop));
    }
    fe.push(Opcode::Retn, None, Operand::None);
    (fe.out, fe.label_counter)
}

/// Turns the global-variable initializer block into its own pre-link
/// instruction stream, using the same [`FuncInstr`] shape as a function
/// body so it can be concatenated the same way.
pub fn compile_global_init(
    symtab: &SymbolTable,
    init: &crate::lower::GlobalInit,
    global_frame_size: u32,
    label_seed: u32,
) -> (Vec<FuncInstr>, u32) {
    let mut fe = FuncEmit {
        reader: Reader::new(&init.code),
        symtab,
        global_frame_size,
        out: Vec::new(),
        label_counter: label_seed,
        depth: 0,
        uses_global_vars: false,
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
    };
    fe.walk_seq(init.body);
    (fe.out, fe.label_counter)
}

/// Lays out every function's instruction stream into one program,
/// synthesizes the implicit `JSR <entry>; RETN` preamble real `.ncs`
/// files start with, and resolves every label and named call to an
/// absolute byte offset.
///
/// `units` is `(function name, instructions)` for every user-defined
/// function, in any order; `global_init` runs once, first, ahead of the
/// call into `entry_name`.
pub fn link(
    global_init: Vec<FuncInstr>,
    units: Vec<(String, Vec<FuncInstr>)>,
    entry_name: &str,
) -> Vec<Instruction> {
    let mut preamble = global_init;
    preamble.push(FuncInstr::Call { callee: entry_name.to_string() });
    preamble.push(FuncInstr::Real(Instruction { opcode: Opcode::Retn, type_tag: None, operand: Operand::None }));

    let mut flat: Vec<FuncInstr> = Vec::new();
    let mut func_start: HashMap<String, usize> = HashMap::new();
    func_start.insert("@init".to_string(), 0);
    flat.extend(preamble);
    for (name, instrs) in units {
        func_start.insert(name, flat.len());
        flat.extend(instrs);
    }

    const HEADER_LEN: u32 = 13;
    let mut offsets = Vec::with_capacity(flat.len());
    let mut cursor = HEADER_LEN;
    for item in &flat {
        offsets.push(cursor);
        cursor += match item {
            FuncInstr::Real(i) => i.encoded_len(),
            FuncInstr::Label(_) => 0,
            FuncInstr::Branch { .. } => 5,
            FuncInstr::Call { .. } => 5,
        };
    }

    let mut label_offset: HashMap<u32, u32> = HashMap::new();
    for (idx, item) in flat.iter().enumerate() {
        if let FuncInstr::Label(id) = item {
            label_offset.insert(*id, offsets[idx]);
        }
    }
    let call_offset: HashMap<String, u32> =
        func_start.iter().map(|(name, idx)| (name.clone(), offsets[*idx])).collect();

    flat.into_iter()
        .filter_map(|item| match item {
            FuncInstr::Real(i) => Some(i),
            FuncInstr::Label(_) => None,
            FuncInstr::Branch { opcode, label } => Some(Instruction {
                opcode,
                type_tag: None,
                operand: Operand::Jump(*label_offset.get(&label).expect("dangling branch label")),
            }),
            FuncInstr::Call { callee } => Some(Instruction {
                opcode: Opcode::Jsr,
                type_tag: None,
                operand: Operand::Jump(*call_offset.get(&callee).expect("call to unresolved function")),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticSink;
    use crate::intern::Interner;
    use crate::lower::Lowering;

    #[test]
    fn link_resolves_entry_preamble_and_header_length() {
        let symtab = SymbolTable::new();
        let interner = Interner::new();
        let mut diags = DiagnosticSink::new("Error", 50);
        let program = crate::ast::Program { items: vec![] };
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss".to_string());
        let ginit = lowering.lower_globals(&program);
        let (pre, _) = compile_global_init(&symtab, &ginit, 0, 0);
        let out = link(pre, vec![("main".to_string(), vec![FuncInstr::Real(Instruction {
            opcode: Opcode::Retn,
            type_tag: None,
            operand: Operand::None,
        })])], "main");
        // preamble: JSR main; RETN — then main's own RETN.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].opcode, Opcode::Jsr);
        if let Operand::Jump(target) = out[0].operand {
            assert!(target > 0);
        } else {
            panic!("expected jump operand");
        }
    }
}

