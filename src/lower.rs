//! AST -> PCode lowering: the bridge between the parser (component E) and
//! the code generator (component G).
//!
//! The parser throws away a function's local symbols the moment
//! `restore_fence` runs at the closing brace, so nothing about a local's
//! stack slot survives in the symbol table past the end of its own
//! function. This pass re-derives that information directly from the
//! AST: it walks each function body once, assigning every parameter and
//! local a monotonically increasing frame-relative byte offset, and
//! folds the lexical-scope stack pushed/popped by the parser's fences
//! back down into that same offset assignment so two non-overlapping
//! blocks (an `if`'s two arms, say) can reuse the same stack region.
//!
//! Globals are handled the same way: a single synthetic "global
//! initializer" sequence is lowered once per program, assigning each
//! global its own frame-relative offset in the global frame that every
//! function's `SAVEBP`-anchored `CPxxxBP` addressing is relative to.

use crate::ast::*;
use crate::diag::{codes, DiagnosticSink};
use crate::intern::{Interner, Symbol};
use crate::pcode::{BinTag, Block, Builder, Op, EMPTY};
use crate::symtab::{NwType, SymExtra, SymKind, SymbolTable};
use std::collections::HashMap;

/// Byte width of one stack cell for `ty`. Every scalar type here occupies
/// one 4-byte cell; only `vector` (3 floats) and structs (4 bytes per
/// field) are wider.
pub fn type_size(ty: NwType, symtab: &SymbolTable) -> u32 {
    match ty {
        NwType::Vector => 12,
        NwType::Struct(_) => struct_field_count(symtab, None).unwrap_or(1) * 4,
        _ => 4,
    }
}

/// Structs carry no identity past their declaration in this parser
/// (`NwType::Struct` is always tagged `0` — see DESIGN.md), so field
/// lookup falls back to a scan of every declared struct for a field of
/// the requested name. `name` narrows the scan when the struct's own tag
/// name is known (currently never, kept for future use).
fn struct_field_count(symtab: &SymbolTable, _name: Option<&str>) -> Option<u32> {
    for i in 0..symtab.len() as u32 {
        let sym = symtab.get(i);
        if sym.kind == SymKind::Structure {
            if let SymExtra::Structure(se) = &sym.extra {
                if !se.fields.is_empty() {
                    return Some(se.fields.len() as u32);
                }
            }
        }
    }
    None
}

fn resolve_struct_field(symtab: &SymbolTable, field_name: &str) -> Option<(u32, NwType)> {
    for i in 0..symtab.len() as u32 {
        let sym = symtab.get(i);
        if sym.kind == SymKind::Structure {
            if let SymExtra::Structure(se) = &sym.extra {
                if let Some(idx) = se.fields.iter().position(|(n, _)| n == field_name) {
                    return Some((idx as u32, se.fields[idx].1));
                }
            }
        }
    }
    None
}

fn bin_tag(op: BinOp) -> Option<BinTag> {
    Some(match op {
        BinOp::Add => BinTag::Add,
        BinOp::Sub => BinTag::Sub,
        BinOp::Mul => BinTag::Mul,
        BinOp::Div => BinTag::Div,
        BinOp::Mod => BinTag::Mod,
        BinOp::Eq => BinTag::Eq,
        BinOp::Neq => BinTag::Neq,
        BinOp::Lt => BinTag::Lt,
        BinOp::Gt => BinTag::Gt,
        BinOp::Leq => BinTag::Leq,
        BinOp::Geq => BinTag::Geq,
        BinOp::BitAnd => BinTag::BitAnd,
        BinOp::BitOr => BinTag::BitOr,
        BinOp::BitXor => BinTag::BitXor,
        BinOp::ShiftLeft => BinTag::ShiftLeft,
        BinOp::ShiftRight => BinTag::ShiftRight,
        BinOp::UShiftRight => BinTag::UShiftRight,
        BinOp::LogAnd | BinOp::LogOr => return None,
    })
}

/// Result type of a binary operator given its operand types, applying
/// NWScript's int/float promotion (the mixed pair keeps float) and
/// otherwise assuming the two sides already agree (the parser's job, not
/// this pass's, to reject genuine mismatches it missed).
fn promote(op: BinOp, lhs: NwType, rhs: NwType) -> NwType {
    use NwType::*;
    match op {
        BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Gt | BinOp::Leq | BinOp::Geq => Integer,
        _ => match (lhs, rhs) {
            (Float, _) | (_, Float) => Float,
            (Vector, _) | (_, Vector) => Vector,
            (String, _) => String,
            (a, _) => a,
        },
    }
}

#[derive(Clone, Copy)]
struct LocalVar {
    name: Symbol,
    ty: NwType,
    offset: u32,
}

#[derive(Default)]
struct Scope {
    vars: Vec<LocalVar>,
}

pub struct LoweredFunction {
    pub code: Vec<u8>,
    /// The function's top-level statement sequence — a `Seq` node, *not*
    /// wrapped in a `Statement` node, since its leading bytes (the
    /// parameters) were pushed by the caller rather than reserved by this
    /// scope; see `param_bytes`.
    pub body: Block,
    pub param_bytes: u32,
    pub frame_size: u32,
    pub uses_global_vars: bool,
}

pub struct GlobalInit {
    pub code: Vec<u8>,
    pub body: Block,
    pub frame_size: u32,
}

/// Shared per-file lowering context: everything a function body needs to
/// resolve identifiers against, but nothing mutable that's specific to
/// one function (that lives in `FnLower`).
pub struct Lowering<'a> {
    pub symtab: &'a SymbolTable,
    pub interner: &'a Interner,
    pub diags: &'a mut DiagnosticSink,
    pub file_name: String,
    pub globals: HashMap<Symbol, (NwType, u32)>,
}

impl<'a> Lowering<'a> {
    pub fn new(
        symtab: &'a SymbolTable,
        interner: &'a Interner,
        diags: &'a mut DiagnosticSink,
        file_name: impl Into<String>,
    ) -> Self {
        Lowering {
            symtab,
            interner,
            diags,
            file_name: file_name.into(),
            globals: HashMap::new(),
        }
    }

    /// Lowers every `TopLevel::GlobalVar` in declaration order into one
    /// synthetic initializer sequence, assigning each global its
    /// frame-relative offset in the global frame as it goes. Must run
    /// before any function body is lowered, since function bodies
    /// resolve global references against `self.globals`.
    pub fn lower_globals(&mut self, program: &Program) -> GlobalInit {
        let mut b = Builder::new();
        let mut cursor: u32 = 0;
        let mut decls = Vec::new();
        for item in &program.items {
            if let TopLevel::GlobalVar(decl) = item {
                let offset = cursor;
                cursor += type_size(decl.ty, self.symtab);
                self.globals.insert(decl.name, (decl.ty, offset));

                let symbol_offset = self
                    .symtab
                    .find(self.interner.resolve(decl.name), Some(SymKind::Variable))
                    .unwrap_or(0);

                let init = decl.init.map(|e| {
                    let mut fl = FnLower {
                        lowering: self,
                        scopes: Vec::new(),
                        frame_cursor: cursor,
                        break_targets: Vec::new(),
                        continue_targets: Vec::new(),
                        uses_global_vars: false,
                    };
                    let (block, _ty) = fl.lower_expr(&mut b, e);
                    block
                });
                decls.push(b.declaration(decl.ty, symbol_offset, init, 0, decl.line));
            }
        }
        let body = b.seq(&decls);
        GlobalInit {
            code: b.into_bytes(),
            body,
            frame_size: cursor,
        }
    }

    pub fn lower_function(&mut self, func: &FunctionDecl) -> Option<LoweredFunction> {
        let body = func.body?;
        let mut b = Builder::new();
        let mut fl = FnLower {
            lowering: self,
            scopes: vec![Scope::default()],
            frame_cursor: 0,
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            uses_global_vars: false,
        };
        for p in &func.params {
            let offset = fl.frame_cursor;
            let size = type_size(p.ty, fl.lowering.symtab);
            fl.frame_cursor += size;
            fl.scopes.last_mut().unwrap().vars.push(LocalVar {
                name: p.name,
                ty: p.ty,
                offset,
            });
        }
        let param_frame = fl.frame_cursor;

        let mut items = Vec::new();
        for stmt in body {
            items.push(fl.lower_stmt(&mut b, stmt, func.return_type));
        }
        let seq = b.seq(&items);
        // Functions that fall off the end without an explicit `return`
        // (legal for `void`) still need their live frame popped before
        // the implicit `RETN`; the code generator reads `frame_size` off
        // `LoweredFunction` for exactly that trailing cleanup.

        Some(LoweredFunction {
            code: b.into_bytes(),
            body: seq,
            param_bytes: param_frame,
            frame_size: fl.frame_cursor,
            uses_global_vars: fl.uses_global_vars,
        })
    }
}

struct FnLower<'a, 'b> {
    lowering: &'b mut Lowering<'a>,
    scopes: Vec<Scope>,
    frame_cursor: u32,
    break_targets: Vec<u32>,
    continue_targets: Vec<u32>,
    uses_global_vars: bool,
}

impl<'a, 'b> FnLower<'a, 'b> {
    fn lookup_var(&self, name: Symbol) -> Option<(NwType, u32, bool, u32)> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.vars.iter().rev().find(|v| v.name == name) {
                return Some((v.ty, v.offset, false, 0));
            }
        }
        if let Some((ty, offset)) = self.lowering.globals.get(&name).copied() {
            return Some((ty, offset, true, 0));
        }
        let name_str = self.lowering.interner.resolve(name);
        if let Some(off) = self.lowering.symtab.find(name_str, Some(SymKind::Variable)) {
            let sym = self.lowering.symtab.get(off);
            if sym.flags.global {
                return Some((sym.ty, 0, true, off));
            }
        }
        None
    }

    fn error(&mut self, code: u32, line: u32, message: impl Into<String>) {
        let file = self.lowering.file_name.clone();
        self.lowering.diags.error(code, &file, line, message);
    }

    fn warning(&mut self, code: u32, line: u32, message: impl Into<String>) {
        let file = self.lowering.file_name.clone();
        self.lowering.diags.warning(code, &file, line, message);
    }

    fn lower_expr(&mut self, b: &mut Builder, expr: &Expr) -> (Block, NwType) {
        match expr {
            Expr::IntLit(v) => (b.const_int(*v), NwType::Integer),
            Expr::FloatLit(v) => (b.const_float(*v), NwType::Float),
            Expr::StringLit(s) => (b.const_string(s), NwType::String),
            Expr::ObjectSelf => (b.const_object(0), NwType::Object),
            Expr::ObjectInvalid => (b.const_object(1), NwType::Object),
            Expr::Vector(x, y, z) => (b.const_vector(*x, *y, *z), NwType::Vector),
            Expr::Ident(sym) => self.lower_ident(b, *sym),
            Expr::Assign { target, value } => {
                let (t, ty) = self.lower_expr(b, target);
                let (v, _) = self.lower_expr(b, value);
                (b.assign(ty, t, v), ty)
            }
            Expr::CompoundAssign { op, target, value } => {
                let (t, ty) = self.lower_expr(b, target);
                let (v, _) = self.lower_expr(b, value);
                let tag = bin_tag(*op).unwrap_or(BinTag::Add);
                (b.compound_assign(ty, tag, t, v, false), ty)
            }
            Expr::Binary { op, lhs, rhs } => {
                let (l, lty) = self.lower_expr(b, lhs);
                let (r, rty) = self.lower_expr(b, rhs);
                if matches!(op, BinOp::LogAnd | BinOp::LogOr) {
                    let pop = if matches!(op, BinOp::LogAnd) {
                        Op::LogicalAnd
                    } else {
                        Op::LogicalOr
                    };
                    (b.logical(pop, l, r), NwType::Integer)
                } else {
                    let result = promote(*op, lty, rty);
                    let tag = bin_tag(*op).unwrap();
                    (b.binary(tag, result, l, r), result)
                }
            }
            Expr::Unary { op, operand } => self.lower_unary(b, *op, operand),
            Expr::Call { callee, args } => self.lower_call(b, *callee, args),
            Expr::MemberAccess { base, field } => {
                let (base_block, _) = self.lower_expr(b, base);
                let field_name = self.lowering.interner.resolve(*field).to_string();
                match resolve_struct_field(self.lowering.symtab, &field_name) {
                    Some((idx, ty)) => (b.element_access(ty, base_block, idx), ty),
                    None => {
                        self.error(codes::ERR_UNDECLARED_IDENTIFIER, 0, format!("unknown struct field '{}'", field_name));
                        (b.element_access(NwType::Integer, base_block, 0), NwType::Integer)
                    }
                }
            }
            Expr::VectorComponent { base, component } => {
                let (base_block, _) = self.lower_expr(b, base);
                let idx = match component {
                    VectorComponent::X => 0,
                    VectorComponent::Y => 1,
                    VectorComponent::Z => 2,
                };
                (b.element_access(NwType::Float, base_block, idx), NwType::Float)
            }
        }
    }

    fn lower_ident(&mut self, b: &mut Builder, sym: Symbol) -> (Block, NwType) {
        match self.lookup_var(sym) {
            Some((ty, offset, is_global, symbol_offset)) => {
                if is_global {
                    self.uses_global_vars = true;
                }
                (b.variable(ty, symbol_offset, -1, offset as i32, is_global), ty)
            }
            None => {
                let name = self.lowering.interner.resolve(sym).to_string();
                self.error(codes::ERR_UNDECLARED_IDENTIFIER, 0, format!("undeclared identifier '{}'", name));
                (b.const_int(0), NwType::Integer)
            }
        }
    }

    /// Pre-forms yield the new (post-update) value; post-forms yield the
    /// value the operand held before the update. Both still lower to the
    /// same `CompoundAssign(Add/Sub, 1)` node; `yields_old` tells codegen
    /// which value to leave behind as the expression's result.
    fn lower_unary(&mut self, b: &mut Builder, op: UnOp, operand: &Expr) -> (Block, NwType) {
        let (o, ty) = self.lower_expr(b, operand);
        match op {
            UnOp::Neg => (b.unary(Op::UnaryNeg, ty, o), ty),
            UnOp::Not => (b.unary(Op::UnaryNot, NwType::Integer, o), NwType::Integer),
            UnOp::BitNot => (b.unary(Op::UnaryBitNot, NwType::Integer, o), NwType::Integer),
            UnOp::PreInc => (b.compound_assign(ty, BinTag::Add, o, one(b), false), ty),
            UnOp::PostInc => (b.compound_assign(ty, BinTag::Add, o, one(b), true), ty),
            UnOp::PreDec => (b.compound_assign(ty, BinTag::Sub, o, one(b), false), ty),
            UnOp::PostDec => (b.compound_assign(ty, BinTag::Sub, o, one(b), true), ty),
        }
    }

    fn lower_call(&mut self, b: &mut Builder, callee: Symbol, args: &[Expr]) -> (Block, NwType) {
        let name = self.lowering.interner.resolve(callee).to_string();
        let mut arg_blocks = Vec::with_capacity(args.len());
        for a in args {
            let (blk, _) = self.lower_expr(b, a);
            arg_blocks.push(blk);
        }
        match self.lowering.symtab.find(&name, Some(SymKind::Function)) {
            Some(off) => {
                let sym = self.lowering.symtab.get(off);
                let ret_ty = sym.ty;
                (b.call(ret_ty, off, &arg_blocks), ret_ty)
            }
            None => {
                self.error(codes::ERR_UNDECLARED_IDENTIFIER, 0, format!("call to undeclared function '{}'", name));
                (b.call(NwType::Void, 0, &arg_blocks), NwType::Void)
            }
        }
    }

    /// True for a statement-level `Call` to a `pure_function`-flagged
    /// callee whose arguments are themselves free of side effects — the
    /// whole statement can be dropped with no observable change.
    fn is_discardable_pure_call(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Call { callee, args } => self.is_pure_function(*callee) && args.iter().all(|a| self.is_side_effect_free(a)),
            _ => false,
        }
    }

    fn is_pure_function(&self, callee: Symbol) -> bool {
        let name = self.lowering.interner.resolve(callee).to_string();
        match self.lowering.symtab.find(&name, Some(SymKind::Function)) {
            Some(off) => matches!(&self.lowering.symtab.get(off).extra, SymExtra::Function(fe) if fe.pure_function),
            None => false,
        }
    }

    /// Conservative: only literals, reads, and pure-function calls over
    /// side-effect-free arguments count as free of effects. Assignment and
    /// ordinary (non-pure) calls never do.
    fn is_side_effect_free(&self, expr: &Expr) -> bool {
        match expr {
            Expr::IntLit(_)
            | Expr::FloatLit(_)
            | Expr::StringLit(_)
            | Expr::ObjectSelf
            | Expr::ObjectInvalid
            | Expr::Ident(_)
            | Expr::Vector(..) => true,
            Expr::Unary { op, operand } => {
                matches!(op, UnOp::Neg | UnOp::Not | UnOp::BitNot) && self.is_side_effect_free(operand)
            }
            Expr::Binary { lhs, rhs, .. } => self.is_side_effect_free(lhs) && self.is_side_effect_free(rhs),
            Expr::MemberAccess { base, .. } => self.is_side_effect_free(base),
            Expr::VectorComponent { base, .. } => self.is_side_effect_free(base),
            Expr::Call { callee, args } => self.is_pure_function(*callee) && args.iter().all(|a| self.is_side_effect_free(a)),
            _ => false,
        }
    }

    fn lower_stmt(&mut self, b: &mut Builder, stmt: &Stmt, return_type: NwType) -> Block {
        match stmt {
            Stmt::ExprStmt(e) => {
                // A call to a `#pragma pure_function`-flagged function whose
                // result is discarded and whose arguments have no observable
                // effect of their own contributes nothing to the program;
                // drop it rather than emit a call that can only waste cycles.
                if self.is_discardable_pure_call(e) {
                    return b.leaf(Op::Statement);
                }
                // A bare `i++;`/`i--;` statement discards its value, so the
                // old-vs-new distinction is unobservable; lower it as the
                // pre-form so the peephole optimizer still sees the plain
                // read-modify-write shape it fuses into INCISP/DECISP.
                let (blk, _) = match e {
                    Expr::Unary { op: op @ (UnOp::PostInc | UnOp::PostDec), operand } => {
                        let pre_op = if matches!(op, UnOp::PostInc) { UnOp::PreInc } else { UnOp::PreDec };
                        self.lower_unary(b, pre_op, operand)
                    }
                    _ => self.lower_expr(b, e),
                };
                blk
            }
            Stmt::VarDecl(decl) => self.lower_local_decl(b, decl),
            Stmt::Block(stmts) => self.lower_block(b, stmts),
            Stmt::If { cond, then_branch, else_branch } => {
                let (c, _) = self.lower_expr(b, cond);
                let then_blk = self.lower_stmt(b, then_branch, return_type);
                let else_blk = else_branch
                    .map(|s| self.lower_stmt(b, s, return_type))
                    .unwrap_or(EMPTY);
                b.control5(Op::If, [c, then_blk, else_blk, EMPTY, EMPTY], 0, 0)
            }
            Stmt::While { cond, body } => {
                let entry = self.frame_cursor;
                self.break_targets.push(entry);
                self.continue_targets.push(entry);
                let (c, _) = self.lower_expr(b, cond);
                let body_blk = self.lower_stmt(b, body, return_type);
                self.break_targets.pop();
                self.continue_targets.pop();
                b.control5(Op::While, [c, body_blk, EMPTY, EMPTY, EMPTY], 0, 0)
            }
            Stmt::DoWhile { body, cond } => {
                let entry = self.frame_cursor;
                self.break_targets.push(entry);
                self.continue_targets.push(entry);
                let body_blk = self.lower_stmt(b, body, return_type);
                let (c, _) = self.lower_expr(b, cond);
                self.break_targets.pop();
                self.continue_targets.pop();
                b.control5(Op::Do, [c, body_blk, EMPTY, EMPTY, EMPTY], 0, 0)
            }
            Stmt::For { init, cond, step, body } => {
                let entry = self.frame_cursor;
                let init_blk = init
                    .map(|e| {
                        let (blk, ty) = self.lower_expr(b, e);
                        if ty != NwType::Integer {
                            self.warning(
                                codes::WARN_FOR_INIT_NON_INTEGER,
                                0,
                                "for-loop init expression is not of integer type",
                            );
                        }
                        blk
                    })
                    .unwrap_or(EMPTY);
                self.break_targets.push(entry);
                self.continue_targets.push(entry);
                let cond_blk = cond.map(|e| self.lower_expr(b, e).0).unwrap_or(EMPTY);
                let step_blk = step
                    .map(|e| {
                        let (blk, ty) = self.lower_expr(b, e);
                        if ty != NwType::Integer {
                            self.warning(
                                codes::WARN_FOR_INCREMENT_NON_INTEGER,
                                0,
                                "for-loop increment expression is not of integer type",
                            );
                        }
                        blk
                    })
                    .unwrap_or(EMPTY);
                let body_blk = self.lower_stmt(b, body, return_type);
                self.break_targets.pop();
                self.continue_targets.pop();
                b.control5(Op::For, [init_blk, cond_blk, step_blk, body_blk, EMPTY], 0, 0)
            }
            Stmt::Switch { scrutinee, cases, line } => {
                let (s, _) = self.lower_expr(b, scrutinee);
                let entry = self.frame_cursor;
                self.break_targets.push(entry);
                let mut flat = Vec::new();
                for case in *cases {
                    let label = match case.label {
                        CaseLabel::Value(v) => b.case_label(v, 0, case.line),
                        CaseLabel::Default => b.default_label(0, case.line),
                    };
                    let mut body_items = Vec::new();
                    for st in case.body {
                        body_items.push(self.lower_stmt(b, st, return_type));
                    }
                    let body_seq = b.seq(&body_items);
                    flat.push(label);
                    flat.push(body_seq);
                }
                self.break_targets.pop();
                let cases_blk = b.seq(&flat);
                b.control5(Op::Switch, [s, cases_blk, EMPTY, EMPTY, EMPTY], 0, *line)
            }
            Stmt::Break => {
                let entry = *self.break_targets.last().unwrap_or(&self.frame_cursor);
                b.break_stmt(self.frame_cursor - entry)
            }
            Stmt::Continue => {
                let entry = *self.continue_targets.last().unwrap_or(&self.frame_cursor);
                b.continue_stmt(self.frame_cursor - entry)
            }
            Stmt::Return(value) => {
                let v = value.map(|e| self.lower_expr(b, e).0);
                b.return_node(return_type, v, self.frame_cursor)
            }
            Stmt::Empty => b.leaf(Op::Statement),
        }
    }

    /// Lowers a lexical `{ ... }`: reserves a fresh name-shadowing scope,
    /// lowers every statement in order, then pops both the scope and the
    /// frame-cursor bytes it reserved — so a sibling block declared after
    /// this one, or the other arm of an `if`, reuses the same stack
    /// region instead of growing the frame unbounded.
    fn lower_block(&mut self, b: &mut Builder, stmts: &[Stmt]) -> Block {
        let entry = self.frame_cursor;
        self.scopes.push(Scope::default());
        let mut items = Vec::with_capacity(stmts.len());
        for s in stmts {
            items.push(self.lower_stmt(b, s, NwType::Unknown));
        }
        self.scopes.pop();
        let local_bytes = self.frame_cursor - entry;
        self.frame_cursor = entry;
        let seq = b.seq(&items);
        b.statement(local_bytes, seq)
    }

    fn lower_local_decl(&mut self, b: &mut Builder, decl: &VarDecl) -> Block {
        let offset = self.frame_cursor;
        let size = type_size(decl.ty, self.lowering.symtab);
        self.frame_cursor += size;
        self.scopes.last_mut().unwrap().vars.push(LocalVar {
            name: decl.name,
            ty: decl.ty,
            offset,
        });
        let init = decl.init.map(|e| self.lower_expr(b, e).0);
        let symbol_offset = 0; // locals carry no durable symtab entry; see module docs.
        b.declaration(decl.ty, symbol_offset, init, 0, decl.line)
    }
}

fn one(b: &mut Builder) -> Block {
    b.const_int(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticSink;
    use crate::pcode::Reader;
    use crate::symtab::{FunctionExtra, SymFlags, VariableExtra};

    fn setup() -> (SymbolTable, Interner) {
        (SymbolTable::new(), Interner::new())
    }

    #[test]
    fn empty_void_function_lowers_with_zero_frame() {
        let (symtab, mut interner) = setup();
        let mut diags = DiagnosticSink::new("Error", 50);
        let name = interner.intern("main");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");
        let func = FunctionDecl {
            name,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(&[]),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        assert_eq!(lowered.frame_size, 0);
        assert!(!lowered.uses_global_vars);
    }

    #[test]
    fn local_declaration_gets_monotonic_offset() {
        let (symtab, mut interner) = setup();
        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let vname = interner.intern("n");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");
        let stmts_arena: Vec<Stmt> = vec![Stmt::VarDecl(VarDecl {
            name: vname,
            ty: NwType::Integer,
            is_const: false,
            init: None,
            line: 2,
        })];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        assert_eq!(lowered.frame_size, 4);
    }

    #[test]
    fn global_reference_sets_uses_global_vars() {
        let mut symtab = SymbolTable::new();
        let mut interner = Interner::new();
        let gname = interner.intern("g");
        symtab.add(
            "g",
            SymKind::Variable,
            NwType::Integer,
            SymFlags { global: true, ..Default::default() },
            SymExtra::Variable(VariableExtra { stack_offset: 0 }),
            0,
            1,
        );
        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");
        let program = Program {
            items: vec![TopLevel::GlobalVar(VarDecl {
                name: gname,
                ty: NwType::Integer,
                is_const: false,
                init: None,
                line: 1,
            })],
        };
        lowering.lower_globals(&program);

        let expr_arena: Vec<Expr> = vec![Expr::Ident(gname)];
        let expr_ref: &Expr = Box::leak(Box::new(expr_arena[0].clone()));
        let stmts_arena: Vec<Stmt> = vec![Stmt::ExprStmt(expr_ref)];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        assert!(lowered.uses_global_vars);
    }

    fn add_function(symtab: &mut SymbolTable, name: &str, pure_function: bool) {
        symtab.add(
            name,
            SymKind::Function,
            NwType::Integer,
            SymFlags::default(),
            SymExtra::Function(FunctionExtra {
                arg_types: Vec::new(),
                return_type: NwType::Integer,
                code_offset: None,
                defined: true,
                uses_global_vars: false,
                default_function: false,
                pure_function,
                engine_action_index: None,
            }),
            0,
            1,
        );
    }

    #[test]
    fn discarded_pure_function_call_is_elided() {
        let mut symtab = SymbolTable::new();
        let mut interner = Interner::new();
        let callee = interner.intern("Pure");
        add_function(&mut symtab, "Pure", true);

        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");

        let call_expr: &Expr = Box::leak(Box::new(Expr::Call { callee, args: &[] }));
        let stmts_arena: Vec<Stmt> = vec![Stmt::ExprStmt(call_expr)];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        let reader = Reader::new(&lowered.code);
        let mut out = String::new();
        crate::pcode::dump(&reader, lowered.body, 0, &mut out);
        assert!(!out.contains("Call"), "pure call should have been elided:\n{}", out);
    }

    #[test]
    fn discarded_impure_call_is_kept() {
        let mut symtab = SymbolTable::new();
        let mut interner = Interner::new();
        let callee = interner.intern("Impure");
        add_function(&mut symtab, "Impure", false);

        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");

        let call_expr: &Expr = Box::leak(Box::new(Expr::Call { callee, args: &[] }));
        let stmts_arena: Vec<Stmt> = vec![Stmt::ExprStmt(call_expr)];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        let reader = Reader::new(&lowered.code);
        let mut out = String::new();
        crate::pcode::dump(&reader, lowered.body, 0, &mut out);
        assert!(out.contains("Call"));
    }

    #[test]
    fn post_increment_marks_yields_old() {
        let (symtab, mut interner) = setup();
        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let vname = interner.intern("n");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");

        let ident_expr: &Expr = Box::leak(Box::new(Expr::Ident(vname)));
        let post_inc: &Expr = Box::leak(Box::new(Expr::Unary { op: UnOp::PostInc, operand: ident_expr }));
        let assign_target: &Expr = Box::leak(Box::new(Expr::Ident(vname)));
        let assign: &Expr = Box::leak(Box::new(Expr::Assign { target: assign_target, value: post_inc }));
        let stmts_arena: Vec<Stmt> = vec![
            Stmt::VarDecl(VarDecl { name: vname, ty: NwType::Integer, is_const: false, init: None, line: 1 }),
            Stmt::ExprStmt(assign),
        ];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        let reader = Reader::new(&lowered.code);
        let mut out = String::new();
        crate::pcode::dump(&reader, lowered.body, 0, &mut out);
        assert!(out.contains("yields_old=true"));
    }

    #[test]
    fn sibling_blocks_reuse_the_same_frame_region() {
        let (symtab, mut interner) = setup();
        let mut diags = DiagnosticSink::new("Error", 50);
        let fname = interner.intern("f");
        let vname = interner.intern("n");
        let mut lowering = Lowering::new(&symtab, &interner, &mut diags, "a.nss");

        let inner_decl = |line| {
            vec![Stmt::VarDecl(VarDecl {
                name: vname,
                ty: NwType::Integer,
                is_const: false,
                init: None,
                line,
            })]
        };
        let block_a: &[Stmt] = Box::leak(inner_decl(2).into_boxed_slice());
        let block_b: &[Stmt] = Box::leak(inner_decl(3).into_boxed_slice());
        let stmts_arena: Vec<Stmt> = vec![Stmt::Block(block_a), Stmt::Block(block_b)];
        let func = FunctionDecl {
            name: fname,
            return_type: NwType::Void,
            params: Vec::new(),
            body: Some(Box::leak(stmts_arena.into_boxed_slice())),
            is_engine_action: None,
            uses_global_vars: false,
            default_function: false,
            pure_function: false,
            line: 1,
        };
        let lowered = lowering.lower_function(&func).unwrap();
        // Neither block's local survives past its own closing brace, so
        // the whole function's frame never grows past one int's worth.
        assert_eq!(lowered.frame_size, 0);
        let _ = Reader::new(&lowered.code);
    }
}
