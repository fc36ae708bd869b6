//! Parser (component E): two-phase recursive descent.
//!
//! Phase 1 scans only top-level declarations — function prototypes,
//! struct definitions, global variables — skipping every function body
//! by brace/paren matching, and registers each as a symbol-table
//! prototype. Phase 2 re-parses the same token stream in full, filling
//! in function bodies and global initializers against a symbol table
//! that already knows every global name, so a function may call another
//! function or reference a global declared later in the same file.

use crate::arena::Arena;
use crate::ast::*;
use crate::diag::{codes, DiagnosticSink};
use crate::intern::{Interner, Symbol};
use crate::symtab::{FunctionExtra, NwType, SymExtra, SymFlags, SymKind, SymbolTable, VariableExtra};
use crate::token::{Token, TokenKind};
use std::collections::HashSet;

/// Parameter count past which the stock engine still compiles, but with
/// a compatibility warning.
const PARAM_COMPAT_WARN_THRESHOLD: usize = 32;
/// Hard parameter-count ceiling.
const MAX_PARAMETERS: usize = 255;
/// Named locals (or globals) visible at once past which a threshold
/// warning fires, once per scope.
const MAX_NAMED_LOCALS: u32 = 1024;

pub struct Arenas<'a> {
    pub expr: &'a Arena<Expr<'a>>,
    pub stmt: &'a Arena<Stmt<'a>>,
    pub case: &'a Arena<SwitchCase<'a>>,
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    arenas: Arenas<'a>,
    symtab: &'a mut SymbolTable,
    interner: &'a mut Interner,
    diags: &'a mut DiagnosticSink,
    loop_depth: u32,
    switch_depth: u32,
    do_while_depth: u32,
    named_locals: u32,
    named_locals_warned: bool,
    global_named_locals: u32,
    global_named_locals_warned: bool,
    current_return_type: Option<NwType>,
    current_file: String,
    /// Names bound by a `#pragma default_function(name)` / `#pragma
    /// pure_function(name)` anywhere in the file, collected up front so the
    /// flag applies to the named declaration regardless of where in the
    /// file the pragma appears relative to it.
    default_function_names: HashSet<String>,
    pure_function_names: HashSet<String>,
    /// When set, every bodyless function prototype `discover_prototypes`
    /// encounters is tagged with the next sequential engine-action index
    /// instead of being left a plain (undefined) prototype. Used for the
    /// `nwscript.nss` bootstrap compile that precedes a user script.
    bootstrap_actions: bool,
    next_action_index: u16,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: Vec<Token>,
        arenas: Arenas<'a>,
        symtab: &'a mut SymbolTable,
        interner: &'a mut Interner,
        diags: &'a mut DiagnosticSink,
        current_file: impl Into<String>,
    ) -> Self {
        let mut default_function_names = HashSet::new();
        let mut pure_function_names = HashSet::new();
        for tok in &tokens {
            match &tok.kind {
                TokenKind::PragmaDefaultFunction => {
                    default_function_names.insert(tok.lexeme.clone());
                }
                TokenKind::PragmaPureFunction => {
                    pure_function_names.insert(tok.lexeme.clone());
                }
                _ => {}
            }
        }
        Parser {
            tokens,
            pos: 0,
            arenas,
            symtab,
            interner,
            diags,
            loop_depth: 0,
            switch_depth: 0,
            do_while_depth: 0,
            named_locals: 0,
            named_locals_warned: false,
            global_named_locals: 0,
            global_named_locals_warned: false,
            current_return_type: None,
            current_file: current_file.into(),
            default_function_names,
            pure_function_names,
            bootstrap_actions: false,
            next_action_index: 0,
        }
    }

    /// Marks every bodyless prototype this parser's `discover_prototypes`
    /// pass sees as an engine action, numbered in declaration order. Call
    /// before parsing an `nwscript.nss`-style engine header.
    pub fn enable_bootstrap_actions(&mut self) {
        self.bootstrap_actions = true;
    }

    // ---- token stream helpers -------------------------------------------------

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn current_line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> bool {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(kind) {
            self.bump();
            true
        } else {
            self.error(codes::ERR_LEXICAL, &format!("expected {}, found {:?}", what, self.peek()));
            false
        }
    }

    fn error(&mut self, code: u32, message: impl Into<String>) {
        self.diags.error(code, &self.current_file, self.current_line(), message);
    }

    fn warning(&mut self, code: u32, message: impl Into<String>) {
        self.diags.warning(code, &self.current_file, self.current_line(), message);
    }

    /// Skips to the next statement-terminating `;` or a balanced `}` at
    /// the current nesting level — the synchronization point statement
    /// recovery resumes at after any parse error.
    fn synchronize_statement(&mut self) {
        let mut depth = 0i32;
        loop {
            match self.peek() {
                TokenKind::Eof => return,
                TokenKind::LBrace => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.bump();
                }
                TokenKind::Semicolon if depth == 0 => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn type_from_token(&self, kind: &TokenKind) -> Option<NwType> {
        Some(match kind {
            TokenKind::Void => NwType::Void,
            TokenKind::Int => NwType::Integer,
            TokenKind::Float => NwType::Float,
            TokenKind::StringType => NwType::String,
            TokenKind::ObjectType => NwType::Object,
            TokenKind::VectorType => NwType::Vector,
            _ => return None,
        })
    }

    // ---- phase 1: prototype discovery -----------------------------------------

    /// Walks the whole token stream registering every top-level function
    /// prototype, struct, and global variable, skipping bodies/initializers
    /// entirely. Does not build any AST.
    pub fn discover_prototypes(&mut self) {
        self.pos = 0;
        while !self.at_eof() && !self.diags.should_abort() {
            match self.peek().clone() {
                TokenKind::Struct => self.discover_struct(),
                k if self.type_from_token(&k).is_some() => self.discover_decl(),
                _ => {
                    self.bump();
                }
            }
        }
        self.pos = 0;
    }

    fn discover_struct(&mut self) {
        self.bump(); // struct
        let name = match self.bump().kind {
            TokenKind::Identifier(sym) => sym,
            _ => return,
        };
        if !matches!(self.peek(), TokenKind::LBrace) {
            self.skip_to_semicolon();
            return;
        }
        self.bump(); // {
        let mut depth = 1;
        while depth > 0 && !self.at_eof() {
            match self.peek() {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            self.bump();
        }
        self.skip_to_semicolon();

        let name_str = self.interner.resolve(name).to_string();
        if self.symtab.find(&name_str, Some(SymKind::Structure)).is_none() {
            self.symtab.add(
                &name_str,
                SymKind::Structure,
                NwType::Struct(0),
                SymFlags::default(),
                SymExtra::Structure(crate::symtab::StructExtra { fields: Vec::new() }),
                0,
                self.current_line(),
            );
        }
    }

    fn discover_decl(&mut self) {
        let ty = self.type_from_token(self.peek()).unwrap();
        self.bump();
        let name = match self.peek().clone() {
            TokenKind::Identifier(sym) => {
                self.bump();
                sym
            }
            _ => return,
        };
        let name_str = self.interner.resolve(name).to_string();

        if matches!(self.peek(), TokenKind::LParen) {
            self.bump();
            let mut arg_types = Vec::new();
            while !matches!(self.peek(), TokenKind::RParen | TokenKind::Eof) {
                if let Some(t) = self.type_from_token(self.peek()) {
                    arg_types.push(t);
                    self.bump();
                } else {
                    self.bump();
                    continue;
                }
                // skip parameter name and optional default value
                while !matches!(self.peek(), TokenKind::Comma | TokenKind::RParen | TokenKind::Eof) {
                    self.bump();
                }
                if matches!(self.peek(), TokenKind::Comma) {
                    self.bump();
                }
            }
            self.expect(&TokenKind::RParen, ")");

            let has_body = matches!(self.peek(), TokenKind::LBrace);
            if has_body {
                self.bump();
                let mut depth = 1;
                while depth > 0 && !self.at_eof() {
                    match self.peek() {
                        TokenKind::LBrace => depth += 1,
                        TokenKind::RBrace => depth -= 1,
                        _ => {}
                    }
                    self.bump();
                }
            } else {
                self.skip_to_semicolon();
            }

            if self.symtab.find(&name_str, Some(SymKind::Function)).is_none() {
                let engine_action_index = if !has_body && self.bootstrap_actions {
                    let idx = self.next_action_index;
                    self.next_action_index += 1;
                    Some(idx)
                } else {
                    None
                };
                self.symtab.add(
                    &name_str,
                    SymKind::Function,
                    ty,
                    SymFlags::default(),
                    SymExtra::Function(FunctionExtra {
                        arg_types,
                        return_type: ty,
                        code_offset: None,
                        defined: has_body,
                        uses_global_vars: false,
                        default_function: self.default_function_names.contains(&name_str),
                        pure_function: self.pure_function_names.contains(&name_str),
                        engine_action_index,
                    }),
                    0,
                    self.current_line(),
                );
            }
        } else {
            // global variable; skip any initializer
            self.skip_to_semicolon();
            if self.symtab.find(&name_str, Some(SymKind::Variable)).is_none() {
                self.global_named_locals += 1;
                if self.global_named_locals > MAX_NAMED_LOCALS && !self.global_named_locals_warned {
                    self.global_named_locals_warned = true;
                    self.diags.warning(
                        codes::WARN_TOO_MANY_LOCALS,
                        &self.current_file,
                        self.current_line(),
                        format!("more than {} named globals visible at one point", MAX_NAMED_LOCALS),
                    );
                }
                self.symtab.add(
                    &name_str,
                    SymKind::Variable,
                    ty,
                    SymFlags {
                        global: true,
                        ..Default::default()
                    },
                    SymExtra::Variable(VariableExtra { stack_offset: 0 }),
                    0,
                    self.current_line(),
                );
            }
        }
    }

    fn skip_to_semicolon(&mut self) {
        while !matches!(self.peek(), TokenKind::Semicolon | TokenKind::Eof) {
            self.bump();
        }
        if matches!(self.peek(), TokenKind::Semicolon) {
            self.bump();
        }
    }

    // ---- phase 2: full parse ---------------------------------------------------

    pub fn parse_program(&mut self) -> Program<'a> {
        let mut program = Program::default();
        while !self.at_eof() && !self.diags.should_abort() {
            if let Some(item) = self.parse_top_level() {
                program.items.push(item);
            }
        }
        program
    }

    /// Pragma marker tokens carry no positional meaning once their names
    /// have been collected into `default_function_names`/`pure_function_names`;
    /// just step over them wherever they appear between declarations.
    fn skip_pragma_markers(&mut self) {
        while matches!(self.peek(), TokenKind::PragmaDefaultFunction | TokenKind::PragmaPureFunction) {
            self.bump();
        }
    }

    fn parse_top_level(&mut self) -> Option<TopLevel<'a>> {
        self.skip_pragma_markers();
        match self.peek().clone() {
            TokenKind::Struct => self.parse_struct().map(TopLevel::Struct),
            TokenKind::Const => {
                self.bump();
                self.parse_function_or_global(true)
            }
            k if self.type_from_token(&k).is_some() => self.parse_function_or_global(false),
            _ => {
                self.error(codes::ERR_LEXICAL, "expected a declaration");
                self.synchronize_statement();
                None
            }
        }
    }

    fn parse_struct(&mut self) -> Option<StructDecl> {
        let line = self.current_line();
        self.bump();
        let name = match self.bump().kind {
            TokenKind::Identifier(sym) => sym,
            _ => return None,
        };
        self.expect(&TokenKind::LBrace, "{");
        let mut fields = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            let ty = match self.type_from_token(self.peek()) {
                Some(t) => {
                    self.bump();
                    t
                }
                None => {
                    self.error(codes::ERR_TYPE_MISMATCH, "expected field type in struct");
                    self.synchronize_statement();
                    continue;
                }
            };
            let fname = match self.bump().kind {
                TokenKind::Identifier(sym) => sym,
                _ => continue,
            };
            if matches!(self.peek(), TokenKind::Dot) {
                self.warning(
                    codes::WARN_NESTED_STRUCT_MEMBER_ACCESS,
                    "nested struct member access: the stock engine mis-generates code for this, reproduced here for bytecode compatibility",
                );
            }
            self.expect(&TokenKind::Semicolon, ";");
            fields.push(StructField { name: fname, ty });
        }
        self.expect(&TokenKind::RBrace, "}");
        self.expect(&TokenKind::Semicolon, ";");

        let name_str = self.interner.resolve(name).to_string();
        if let Some(offset) = self.symtab.find(&name_str, Some(SymKind::Structure)) {
            let sym = self.symtab.get_mut(offset);
            if let SymExtra::Structure(extra) = &mut sym.extra {
                extra.fields = fields
                    .iter()
                    .map(|f| (self.interner.resolve(f.name).to_string(), f.ty))
                    .collect();
            }
        }
        Some(StructDecl { name, fields, line })
    }

    fn parse_function_or_global(&mut self, is_const: bool) -> Option<TopLevel<'a>> {
        let line = self.current_line();
        let ty = self.type_from_token(self.peek()).unwrap();
        self.bump();
        let name = match self.bump().kind {
            TokenKind::Identifier(sym) => sym,
            _ => return None,
        };

        if matches!(self.peek(), TokenKind::LParen) {
            if is_const {
                self.error(codes::ERR_CONST_AT_FUNCTION_SCOPE, "'const' is not permitted on a function declaration");
            }
            return self.parse_function(name, ty, line);
        }

        if ty == NwType::Void {
            self.error(codes::ERR_TYPE_MISMATCH, "variables cannot have type void");
        }
        if is_const && !matches!(self.peek(), TokenKind::Assign) {
            self.error(codes::ERR_CONST_AT_FUNCTION_SCOPE, "'const' global requires an initializer");
        }
        let init = if matches!(self.peek(), TokenKind::Assign) {
            self.bump();
            Some(self.parse_expr())
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, ";");

        let name_str = self.interner.resolve(name).to_string();
        if let Some(offset) = self.symtab.find(&name_str, Some(SymKind::Variable)) {
            let sym = self.symtab.get_mut(offset);
            sym.flags.constant = is_const;
        }

        Some(TopLevel::GlobalVar(VarDecl {
            name,
            ty,
            is_const,
            init,
            line,
        }))
    }

    fn parse_function(&mut self, name: Symbol, return_type: NwType, line: u32) -> Option<TopLevel<'a>> {
        self.bump(); // (
        let mut params = Vec::new();
        let mut seen_default = false;
        while !matches!(self.peek(), TokenKind::RParen | TokenKind::Eof) {
            let pty = match self.type_from_token(self.peek()) {
                Some(t) => {
                    self.bump();
                    t
                }
                None => {
                    self.error(codes::ERR_TYPE_MISMATCH, "expected parameter type");
                    self.bump();
                    continue;
                }
            };
            let pname = match self.bump().kind {
                TokenKind::Identifier(sym) => sym,
                _ => continue,
            };
            let default = if matches!(self.peek(), TokenKind::Assign) {
                self.bump();
                seen_default = true;
                Some(self.parse_const_value())
            } else {
                if seen_default {
                    self.error(
                        codes::ERR_DEFAULT_ARG_NOT_TRAILING,
                        "non-default parameter follows a default parameter",
                    );
                }
                None
            };
            params.push(Param {
                name: pname,
                ty: pty,
                default,
            });
            if matches!(self.peek(), TokenKind::Comma) {
                self.bump();
            }
        }
        self.expect(&TokenKind::RParen, ")");

        if params.len() > MAX_PARAMETERS {
            self.error(
                codes::ERR_TOO_MANY_PARAMETERS,
                format!("function has {} parameters, exceeding the maximum of {}", params.len(), MAX_PARAMETERS),
            );
        } else if params.len() > PARAM_COMPAT_WARN_THRESHOLD {
            self.warning(
                codes::WARN_TOO_MANY_PARAMETERS_COMPAT,
                format!(
                    "function has {} parameters, more than the {} the stock engine compiles without a compatibility warning",
                    params.len(),
                    PARAM_COMPAT_WARN_THRESHOLD
                ),
            );
        }

        let name_str_for_pragmas = self.interner.resolve(name).to_string();
        let default_function = self.default_function_names.contains(&name_str_for_pragmas);
        let pure_function = self.pure_function_names.contains(&name_str_for_pragmas);

        let body = if matches!(self.peek(), TokenKind::Semicolon) {
            self.bump();
            None
        } else if matches!(self.peek(), TokenKind::LBrace) {
            let fence = self.symtab.get_fence();
            self.current_return_type = Some(return_type);
            self.named_locals = params.len() as u32;
            self.named_locals_warned = false;
            for p in &params {
                let pname = self.interner.resolve(p.name).to_string();
                self.symtab.add(
                    &pname,
                    SymKind::Variable,
                    p.ty,
                    SymFlags::default(),
                    SymExtra::Variable(VariableExtra { stack_offset: 0 }),
                    0,
                    line,
                );
            }
            let stmts = self.parse_block_stmts();
            self.current_return_type = None;
            self.symtab.restore_fence(&fence);

            if return_type != NwType::Void && !Self::block_always_returns(stmts) {
                self.error(codes::ERR_NOT_ALL_PATHS_RETURN, "not all control paths return a value");
            }
            Some(self.arenas.stmt.alloc_slice(stmts))
        } else {
            self.error(codes::ERR_LEXICAL, "expected ';' or function body");
            None
        };

        let name_str = self.interner.resolve(name).to_string();
        let is_definition = body.is_some();
        if let Some(offset) = self.symtab.find(&name_str, Some(SymKind::Function)) {
            let sym = self.symtab.get_mut(offset);
            if let SymExtra::Function(extra) = &mut sym.extra {
                if is_definition {
                    if extra.defined {
                        self.error(codes::ERR_REDECLARATION, &format!("function '{}' already defined", name_str));
                    }
                    extra.defined = true;
                    extra.default_function = default_function;
                    extra.pure_function = pure_function;
                }
            }
        }

        let decl = FunctionDecl {
            name,
            return_type,
            params,
            body,
            is_engine_action: None,
            uses_global_vars: false,
            default_function,
            pure_function,
            line,
        };
        Some(if is_definition {
            TopLevel::FunctionDefinition(decl)
        } else {
            TopLevel::FunctionPrototype(decl)
        })
    }

    /// A constant expression acceptable as a default-argument value:
    /// integer or float literals only (component E edge case).
    fn parse_const_value(&mut self) -> ConstValue {
        let negative = if matches!(self.peek(), TokenKind::Minus) {
            self.bump();
            true
        } else {
            false
        };
        match self.bump().kind {
            TokenKind::IntLiteral(v) => ConstValue::Int(if negative { -v } else { v }),
            TokenKind::FloatLiteral(v) => ConstValue::Float(if negative { -v } else { v }),
            _ => {
                self.error(codes::ERR_TYPE_MISMATCH, "default argument must be a constant");
                ConstValue::Int(0)
            }
        }
    }

    /// One component of a `[x, y, z]` vector literal: a constant float
    /// or int literal, optionally negated (spec.md's "all-float
    /// components" requirement — an int literal here is promoted).
    fn parse_vector_component(&mut self) -> f32 {
        let negative = if matches!(self.peek(), TokenKind::Minus) {
            self.bump();
            true
        } else {
            false
        };
        let v = match self.bump().kind {
            TokenKind::IntLiteral(v) => v as f32,
            TokenKind::FloatLiteral(v) => v,
            _ => {
                self.error(codes::ERR_TYPE_MISMATCH, "vector literal component must be a constant number");
                0.0
            }
        };
        if negative {
            -v
        } else {
            v
        }
    }

    /// Conservative return-path analysis: a block "always returns" if
    /// its last reachable statement is a `return`, an `if` whose both
    /// branches always return, or a loop that is trivially infinite.
    fn block_always_returns(stmts: &[Stmt]) -> bool {
        match stmts.last() {
            Some(Stmt::Return(_)) => true,
            Some(Stmt::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            }) => Self::stmt_always_returns(then_branch) && Self::stmt_always_returns(else_branch),
            Some(Stmt::Block(inner)) => Self::block_always_returns(inner),
            _ => false,
        }
    }

    fn stmt_always_returns(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Return(_) => true,
            Stmt::Block(inner) => Self::block_always_returns(inner),
            Stmt::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => Self::stmt_always_returns(then_branch) && Self::stmt_always_returns(else_branch),
            _ => false,
        }
    }

    fn parse_block_stmts(&mut self) -> Vec<Stmt<'a>> {
        self.expect(&TokenKind::LBrace, "{");
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.parse_stmt());
        }
        self.expect(&TokenKind::RBrace, "}");
        stmts
    }

    fn parse_stmt(&mut self) -> Stmt<'a> {
        match self.peek().clone() {
            TokenKind::LBrace => {
                let fence = self.symtab.get_fence();
                let stmts = self.parse_block_stmts();
                self.symtab.restore_fence(&fence);
                Stmt::Block(self.arenas.stmt.alloc_slice(stmts))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Break => {
                self.bump();
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    self.error(codes::ERR_BREAK_CONTINUE_OUTSIDE_LOOP, "'break' outside loop or switch");
                }
                self.expect(&TokenKind::Semicolon, ";");
                Stmt::Break
            }
            TokenKind::Continue => {
                self.bump();
                if self.loop_depth == 0 {
                    self.error(codes::ERR_BREAK_CONTINUE_OUTSIDE_LOOP, "'continue' outside loop");
                }
                self.expect(&TokenKind::Semicolon, ";");
                Stmt::Continue
            }
            TokenKind::Return => {
                self.bump();
                let value = if matches!(self.peek(), TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr())
                };
                self.expect(&TokenKind::Semicolon, ";");
                Stmt::Return(value)
            }
            TokenKind::Semicolon => {
                self.bump();
                Stmt::Empty
            }
            k if self.type_from_token(&k).is_some() => self.parse_local_decl(),
            TokenKind::Const => {
                self.bump();
                self.parse_local_decl_const()
            }
            _ => {
                let expr = self.parse_expr();
                self.expect(&TokenKind::Semicolon, ";");
                Stmt::ExprStmt(expr)
            }
        }
    }

    fn parse_local_decl(&mut self) -> Stmt<'a> {
        self.parse_local_decl_inner(false)
    }

    fn parse_local_decl_const(&mut self) -> Stmt<'a> {
        self.parse_local_decl_inner(true)
    }

    fn parse_local_decl_inner(&mut self, is_const: bool) -> Stmt<'a> {
        let line = self.current_line();
        let ty = match self.type_from_token(self.peek()) {
            Some(t) => {
                self.bump();
                t
            }
            None => {
                self.error(codes::ERR_TYPE_MISMATCH, "expected type in declaration");
                NwType::Error
            }
        };
        let name = match self.bump().kind {
            TokenKind::Identifier(sym) => sym,
            _ => {
                self.error(codes::ERR_LEXICAL, "expected identifier");
                self.interner.intern("<error>")
            }
        };
        if is_const && !matches!(self.peek(), TokenKind::Assign) {
            self.error(codes::ERR_CONST_AT_FUNCTION_SCOPE, "'const' local requires an initializer");
        }
        let init = if matches!(self.peek(), TokenKind::Assign) {
            self.bump();
            Some(self.parse_expr())
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon, ";");

        let name_str = self.interner.resolve(name).to_string();
        if self.symtab.find(&name_str, None).is_some() {
            self.diags.warning(
                codes::WARN_SHADOWED_GLOBAL,
                &self.current_file,
                line,
                format!("declaration of '{}' shadows an outer symbol", name_str),
            );
        }
        self.named_locals += 1;
        if self.named_locals > MAX_NAMED_LOCALS && !self.named_locals_warned {
            self.named_locals_warned = true;
            self.diags.warning(
                codes::WARN_TOO_MANY_LOCALS,
                &self.current_file,
                line,
                format!("more than {} named locals visible at one point in this function", MAX_NAMED_LOCALS),
            );
        }
        self.symtab.add(
            &name_str,
            SymKind::Variable,
            ty,
            SymFlags {
                constant: is_const,
                ..Default::default()
            },
            SymExtra::Variable(VariableExtra { stack_offset: 0 }),
            0,
            line,
        );

        Stmt::VarDecl(VarDecl {
            name,
            ty,
            is_const,
            init,
            line,
        })
    }

    fn parse_if(&mut self) -> Stmt<'a> {
        self.bump();
        self.expect(&TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, ")");
        let then_branch = self.parse_controlled_stmt();
        let else_branch = if matches!(self.peek(), TokenKind::Else) {
            self.bump();
            Some(self.parse_controlled_stmt())
        } else {
            None
        };
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        }
    }

    /// The statement controlled by `if`/`while`/`for`: an empty `;` here
    /// is almost always a mistake (component E edge case), flagged but
    /// still accepted so parsing can continue.
    fn parse_controlled_stmt(&mut self) -> &'a Stmt<'a> {
        if matches!(self.peek(), TokenKind::Semicolon) {
            self.error(codes::ERR_EMPTY_CONTROL_STATEMENT, "empty statement as loop/if body");
        }
        let stmt = self.parse_stmt();
        self.arenas.stmt.alloc(stmt)
    }

    fn parse_while(&mut self) -> Stmt<'a> {
        self.bump();
        self.expect(&TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, ")");
        self.loop_depth += 1;
        let body = self.parse_controlled_stmt();
        self.loop_depth -= 1;
        Stmt::While { cond, body }
    }

    fn parse_do_while(&mut self) -> Stmt<'a> {
        self.bump();
        self.loop_depth += 1;
        self.do_while_depth += 1;
        let body = self.parse_controlled_stmt();
        self.do_while_depth -= 1;
        self.loop_depth -= 1;
        self.expect(&TokenKind::While, "while");
        self.expect(&TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(&TokenKind::RParen, ")");
        self.expect(&TokenKind::Semicolon, ";");
        Stmt::DoWhile { body, cond }
    }

    fn parse_for(&mut self) -> Stmt<'a> {
        self.bump();
        self.expect(&TokenKind::LParen, "(");
        let init = if matches!(self.peek(), TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr())
        };
        self.expect(&TokenKind::Semicolon, ";");
        let cond = if matches!(self.peek(), TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr())
        };
        self.expect(&TokenKind::Semicolon, ";");
        let step = if matches!(self.peek(), TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr())
        };
        self.expect(&TokenKind::RParen, ")");
        self.loop_depth += 1;
        let body = self.parse_controlled_stmt();
        self.loop_depth -= 1;
        Stmt::For {
            init,
            cond,
            step,
            body,
        }
    }

    fn parse_switch(&mut self) -> Stmt<'a> {
        let line = self.current_line();
        self.bump();
        self.expect(&TokenKind::LParen, "(");
        let scrutinee = self.parse_expr();
        self.expect(&TokenKind::RParen, ")");
        self.expect(&TokenKind::LBrace, "{");

        if self.do_while_depth > 0 {
            self.diags.warning(
                codes::WARN_SWITCH_IN_DO_WHILE,
                &self.current_file,
                line,
                "switch inside a do/while loop triggers the stock compiler's mis-codegen",
            );
        }

        self.switch_depth += 1;
        let fence = self.symtab.get_fence();
        let mut cases = Vec::new();
        let mut seen_values: Vec<i32> = Vec::new();
        let mut seen_default = false;

        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            let case_line = self.current_line();
            let label = match self.peek().clone() {
                TokenKind::Case => {
                    self.bump();
                    let value = match self.bump().kind {
                        TokenKind::IntLiteral(v) => v,
                        _ => {
                            self.error(codes::ERR_TYPE_MISMATCH, "case label must be an integer constant");
                            0
                        }
                    };
                    if seen_values.contains(&value) {
                        self.error(
                            codes::ERR_DUPLICATE_CASE_VALUE,
                            &format!("duplicate case value {}", value),
                        );
                    }
                    seen_values.push(value);
                    self.expect(&TokenKind::Colon, ":");
                    CaseLabel::Value(value)
                }
                TokenKind::Default => {
                    self.bump();
                    if seen_default {
                        self.error(codes::ERR_DUPLICATE_DEFAULT, "duplicate 'default' case");
                    }
                    seen_default = true;
                    self.expect(&TokenKind::Colon, ":");
                    CaseLabel::Default
                }
                _ => {
                    self.error(codes::ERR_LEXICAL, "expected 'case' or 'default'");
                    self.synchronize_statement();
                    continue;
                }
            };

            let mut body = Vec::new();
            while !matches!(
                self.peek(),
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof
            ) {
                body.push(self.parse_stmt());
            }
            cases.push(SwitchCase {
                label,
                body: self.arenas.stmt.alloc_slice(body),
                line: case_line,
            });
        }
        self.expect(&TokenKind::RBrace, "}");
        self.symtab.restore_fence(&fence);
        self.switch_depth -= 1;

        Stmt::Switch {
            scrutinee,
            cases: self.arenas.case.alloc_slice(cases),
            line,
        }
    }

    // ---- expressions: precedence climbing -------------------------------------

    pub fn parse_expr(&mut self) -> &'a Expr<'a> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> &'a Expr<'a> {
        let lhs = self.parse_logical_or();
        match self.peek().clone() {
            TokenKind::Assign => {
                self.bump();
                if matches!(self.peek(), TokenKind::Assign) {
                    self.error(codes::ERR_ASSIGNMENT_RHS_IS_ASSIGNMENT, "chained assignment is not permitted");
                }
                self.check_assignable(lhs);
                let rhs = self.parse_assignment();
                self.arenas.expr.alloc(Expr::Assign { target: lhs, value: rhs })
            }
            TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::PercentEq
            | TokenKind::ShlEq
            | TokenKind::ShrEq
            | TokenKind::UShrEq
            | TokenKind::AmpEq
            | TokenKind::PipeEq
            | TokenKind::CaretEq => {
                let op = match self.bump().kind {
                    TokenKind::PlusEq => BinOp::Add,
                    TokenKind::MinusEq => BinOp::Sub,
                    TokenKind::StarEq => BinOp::Mul,
                    TokenKind::SlashEq => BinOp::Div,
                    TokenKind::PercentEq => BinOp::Mod,
                    TokenKind::ShlEq => BinOp::ShiftLeft,
                    TokenKind::ShrEq => BinOp::ShiftRight,
                    TokenKind::UShrEq => BinOp::UShiftRight,
                    TokenKind::AmpEq => BinOp::BitAnd,
                    TokenKind::PipeEq => BinOp::BitOr,
                    TokenKind::CaretEq => BinOp::BitXor,
                    _ => unreachable!(),
                };
                self.check_assignable(lhs);
                let rhs = self.parse_assignment();
                self.arenas.expr.alloc(Expr::CompoundAssign {
                    op,
                    target: lhs,
                    value: rhs,
                })
            }
            _ => lhs,
        }
    }

    fn check_assignable(&mut self, expr: &Expr) {
        if !matches!(expr, Expr::Ident(_) | Expr::MemberAccess { .. } | Expr::VectorComponent { .. }) {
            self.error(codes::ERR_LHS_NOT_ASSIGNABLE, "left-hand side of assignment is not assignable");
            return;
        }
        if let Expr::Ident(sym) = expr {
            let name = self.interner.resolve(*sym).to_string();
            if let Some(offset) = self.symtab.find(&name, Some(SymKind::Variable)) {
                if self.symtab.get(offset).flags.constant {
                    self.error(
                        codes::ERR_LHS_NOT_ASSIGNABLE,
                        &format!("cannot assign to constant '{}'", name),
                    );
                }
            }
        }
    }

    fn parse_logical_or(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_logical_and();
        while matches!(self.peek(), TokenKind::PipePipe) {
            self.bump();
            let rhs = self.parse_logical_and();
            lhs = self.arenas.expr.alloc(Expr::Binary {
                op: BinOp::LogOr,
                lhs,
                rhs,
            });
        }
        lhs
    }

    fn parse_logical_and(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_bit_or();
        while matches!(self.peek(), TokenKind::AmpAmp) {
            self.bump();
            let rhs = self.parse_bit_or();
            lhs = self.arenas.expr.alloc(Expr::Binary {
                op: BinOp::LogAnd,
                lhs,
                rhs,
            });
        }
        lhs
    }

    fn parse_bit_or(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_bit_xor();
        while matches!(self.peek(), TokenKind::Pipe) {
            self.bump();
            let rhs = self.parse_bit_xor();
            lhs = self.arenas.expr.alloc(Expr::Binary { op: BinOp::BitOr, lhs, rhs });
        }
        lhs
    }

    fn parse_bit_xor(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_bit_and();
        while matches!(self.peek(), TokenKind::Caret) {
            self.bump();
            let rhs = self.parse_bit_and();
            lhs = self.arenas.expr.alloc(Expr::Binary { op: BinOp::BitXor, lhs, rhs });
        }
        lhs
    }

    fn parse_bit_and(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_equality();
        while matches!(self.peek(), TokenKind::Amp) {
            self.bump();
            let rhs = self.parse_equality();
            lhs = self.arenas.expr.alloc(Expr::Binary { op: BinOp::BitAnd, lhs, rhs });
        }
        lhs
    }

    fn parse_equality(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_relational();
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Neq,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_relational();
            lhs = self.arenas.expr.alloc(Expr::Binary { op, lhs, rhs });
        }
        lhs
    }

    fn parse_relational(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_shift();
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Leq => BinOp::Leq,
                TokenKind::Geq => BinOp::Geq,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_shift();
            lhs = self.arenas.expr.alloc(Expr::Binary { op, lhs, rhs });
        }
        lhs
    }

    fn parse_shift(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_additive();
        loop {
            let op = match self.peek() {
                TokenKind::ShiftLeft => BinOp::ShiftLeft,
                TokenKind::ShiftRight => BinOp::ShiftRight,
                TokenKind::UShiftRight => BinOp::UShiftRight,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive();
            lhs = self.arenas.expr.alloc(Expr::Binary { op, lhs, rhs });
        }
        lhs
    }

    fn parse_additive(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_multiplicative();
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative();
            lhs = self.arenas.expr.alloc(Expr::Binary { op, lhs, rhs });
        }
        lhs
    }

    fn parse_multiplicative(&mut self) -> &'a Expr<'a> {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary();
            lhs = self.arenas.expr.alloc(Expr::Binary { op, lhs, rhs });
        }
        lhs
    }

    fn parse_unary(&mut self) -> &'a Expr<'a> {
        match self.peek().clone() {
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_unary();
                self.arenas.expr.alloc(Expr::Unary { op: UnOp::Neg, operand })
            }
            TokenKind::Bang => {
                self.bump();
                let operand = self.parse_unary();
                self.arenas.expr.alloc(Expr::Unary { op: UnOp::Not, operand })
            }
            TokenKind::Tilde => {
                self.bump();
                let operand = self.parse_unary();
                self.arenas.expr.alloc(Expr::Unary { op: UnOp::BitNot, operand })
            }
            TokenKind::PlusPlus => {
                self.bump();
                let operand = self.parse_unary();
                self.arenas.expr.alloc(Expr::Unary { op: UnOp::PreInc, operand })
            }
            TokenKind::MinusMinus => {
                self.bump();
                let operand = self.parse_unary();
                self.arenas.expr.alloc(Expr::Unary { op: UnOp::PreDec, operand })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> &'a Expr<'a> {
        let mut expr = self.parse_primary();
        loop {
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.bump();
                    let field = match self.bump().kind {
                        TokenKind::Identifier(sym) => sym,
                        _ => {
                            self.error(codes::ERR_LEXICAL, "expected field name after '.'");
                            self.interner.intern("<error>")
                        }
                    };
                    let field_name = self.interner.resolve(field).to_string();
                    expr = match field_name.as_str() {
                        "x" => self.arenas.expr.alloc(Expr::VectorComponent {
                            base: expr,
                            component: VectorComponent::X,
                        }),
                        "y" => self.arenas.expr.alloc(Expr::VectorComponent {
                            base: expr,
                            component: VectorComponent::Y,
                        }),
                        "z" => self.arenas.expr.alloc(Expr::VectorComponent {
                            base: expr,
                            component: VectorComponent::Z,
                        }),
                        _ => self.arenas.expr.alloc(Expr::MemberAccess { base: expr, field }),
                    };
                    if matches!(self.peek(), TokenKind::Dot) {
                        if let Expr::MemberAccess { .. } = expr {
                            self.warning(
                                codes::WARN_NESTED_STRUCT_MEMBER_ACCESS,
                                "nested struct member access: the stock engine mis-generates code for this, reproduced here for bytecode compatibility",
                            );
                        }
                    }
                }
                TokenKind::PlusPlus => {
                    self.bump();
                    self.check_assignable(expr);
                    expr = self.arenas.expr.alloc(Expr::Unary { op: UnOp::PostInc, operand: expr });
                }
                TokenKind::MinusMinus => {
                    self.bump();
                    self.check_assignable(expr);
                    expr = self.arenas.expr.alloc(Expr::Unary { op: UnOp::PostDec, operand: expr });
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> &'a Expr<'a> {
        match self.bump().kind {
            TokenKind::IntLiteral(v) => self.arenas.expr.alloc(Expr::IntLit(v)),
            TokenKind::FloatLiteral(v) => self.arenas.expr.alloc(Expr::FloatLit(v)),
            TokenKind::StringLiteral(s) => self.arenas.expr.alloc(Expr::StringLit(s)),
            TokenKind::Identifier(sym) => {
                let name = self.interner.resolve(sym).to_string();
                if matches!(self.peek(), TokenKind::LParen) {
                    self.bump();
                    let mut args = Vec::new();
                    while !matches!(self.peek(), TokenKind::RParen | TokenKind::Eof) {
                        args.push((*self.parse_expr()).clone());
                        if matches!(self.peek(), TokenKind::Comma) {
                            self.bump();
                        }
                    }
                    self.expect(&TokenKind::RParen, ")");
                    if self.symtab.find(&name, Some(SymKind::Function)).is_none() {
                        self.error(
                            codes::ERR_UNDECLARED_IDENTIFIER,
                            &format!("call to undeclared function '{}'", name),
                        );
                    }
                    self.arenas.expr.alloc(Expr::Call {
                        callee: sym,
                        args: self.arenas.expr.alloc_slice(args),
                    })
                } else {
                    if self.symtab.find(&name, None).is_none() {
                        self.error(
                            codes::ERR_UNDECLARED_IDENTIFIER,
                            &format!("use of undeclared identifier '{}'", name),
                        );
                    }
                    self.arenas.expr.alloc(Expr::Ident(sym))
                }
            }
            TokenKind::LParen => {
                let inner = self.parse_expr();
                self.expect(&TokenKind::RParen, ")");
                *inner
            }
            TokenKind::ObjectSelfConst => self.arenas.expr.alloc(Expr::ObjectSelf),
            TokenKind::ObjectInvalidConst => self.arenas.expr.alloc(Expr::ObjectInvalid),
            TokenKind::LBracket => {
                let x = self.parse_vector_component();
                self.expect(&TokenKind::Comma, ",");
                let y = self.parse_vector_component();
                self.expect(&TokenKind::Comma, ",");
                let z = self.parse_vector_component();
                self.expect(&TokenKind::RBracket, "]");
                self.arenas.expr.alloc(Expr::Vector(x, y, z))
            }
            other => {
                self.error(codes::ERR_LEXICAL, &format!("unexpected token in expression: {:?}", other));
                self.arenas.expr.alloc(Expr::IntLit(0))
            }
        }
    }
}
