//! AST node types produced by the parser (component E) and consumed by
//! the code generator (component G). Allocated out of the per-compile
//! `Arena`s in `compile.rs`, one arena per node kind, matching the
//! teacher's `AstContext`-of-several-arenas shape rather than one arena
//! of a boxed enum.

use crate::intern::Symbol;
use crate::symtab::NwType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
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
    LogAnd,
    LogOr,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    UShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone)]
pub enum Expr<'a> {
    IntLit(i32),
    FloatLit(f32),
    StringLit(String),
    ObjectSelf,
    ObjectInvalid,
    Vector(f32, f32, f32),
    Ident(Symbol),
    Assign {
        target: &'a Expr<'a>,
        value: &'a Expr<'a>,
    },
    CompoundAssign {
        op: BinOp,
        target: &'a Expr<'a>,
        value: &'a Expr<'a>,
    },
    Binary {
        op: BinOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
    },
    Unary {
        op: UnOp,
        operand: &'a Expr<'a>,
    },
    Call {
        callee: Symbol,
        args: &'a [Expr<'a>],
    },
    MemberAccess {
        base: &'a Expr<'a>,
        field: Symbol,
    },
    VectorComponent {
        base: &'a Expr<'a>,
        component: VectorComponent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VectorComponent {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone)]
pub struct VarDecl<'a> {
    pub name: Symbol,
    pub ty: NwType,
    pub is_const: bool,
    pub init: Option<&'a Expr<'a>>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: Symbol,
    pub ty: NwType,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: Symbol,
    pub fields: Vec<StructField>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Symbol,
    pub ty: NwType,
    pub default: Option<ConstValue>,
}

/// A constant default-argument value. Default arguments must be
/// compile-time constants (component E edge case), so these are stored
/// pre-evaluated rather than as a general expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Float(f32),
}

#[derive(Debug, Clone)]
pub enum Stmt<'a> {
    ExprStmt(&'a Expr<'a>),
    VarDecl(VarDecl<'a>),
    Block(&'a [Stmt<'a>]),
    If {
        cond: &'a Expr<'a>,
        then_branch: &'a Stmt<'a>,
        else_branch: Option<&'a Stmt<'a>>,
    },
    While {
        cond: &'a Expr<'a>,
        body: &'a Stmt<'a>,
    },
    DoWhile {
        body: &'a Stmt<'a>,
        cond: &'a Expr<'a>,
    },
    For {
        init: Option<&'a Expr<'a>>,
        cond: Option<&'a Expr<'a>>,
        step: Option<&'a Expr<'a>>,
        body: &'a Stmt<'a>,
    },
    Switch {
        scrutinee: &'a Expr<'a>,
        cases: &'a [SwitchCase<'a>],
        line: u32,
    },
    Break,
    Continue,
    Return(Option<&'a Expr<'a>>),
    Empty,
}

#[derive(Debug, Clone)]
pub struct SwitchCase<'a> {
    pub label: CaseLabel,
    pub body: &'a [Stmt<'a>],
    pub line: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum CaseLabel {
    Value(i32),
    Default,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl<'a> {
    pub name: Symbol,
    pub return_type: NwType,
    pub params: Vec<Param>,
    pub body: Option<&'a [Stmt<'a>]>,
    pub is_engine_action: Option<u16>,
    pub uses_global_vars: bool,
    pub default_function: bool,
    pub pure_function: bool,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum TopLevel<'a> {
    GlobalVar(VarDecl<'a>),
    Struct(StructDecl),
    FunctionPrototype(FunctionDecl<'a>),
    FunctionDefinition(FunctionDecl<'a>),
}

#[derive(Debug, Clone, Default)]
pub struct Program<'a> {
    pub items: Vec<TopLevel<'a>>,
}
