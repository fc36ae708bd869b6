//! NWScript-to-NCS bytecode compiler library.
//!
//! [`compile`] drives one end-to-end compilation: preprocess, lex, parse
//! in two phases, lower to pcode, generate and link bytecode. Everything
//! upstream of a byte buffer (archive access, batch file discovery, CLI
//! argument parsing) lives outside this crate; see `nwnsc-resource` for
//! the loader trait this crate consumes.

pub mod arena;
pub mod ast;
pub mod codegen;
pub mod compile;
#[cfg(feature = "cli")]
pub mod config;
pub mod diag;
pub mod intern;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pcode;
pub mod peephole;
pub mod preprocess;
pub mod symtab;
pub mod token;

pub use compile::{compile, CompileOptions, CompileOutput, CompileStatus, CompilerVersion, ControlFlags};
