//! Top-level compilation pipeline (single operation: one named source
//! buffer in, bytecode plus debug symbols out).
//!
//! Wires every other component together in order: an optional one-time
//! bootstrap compile of the engine's builtin catalog produces a base
//! symbol table; the user's source is preprocessed, lexed, parsed in two
//! passes against a fork of that table, lowered to pcode, generated to
//! bytecode per function, linked into one instruction stream, and
//! serialized. No step here owns retry or concurrency — see the module
//! doc on `lib.rs`.

use crate::arena::Arena;
use crate::ast::{Program, TopLevel};
use crate::codegen::{self, FuncInstr};
use crate::diag::{codes, DiagnosticSink};
use crate::intern::Interner;
use crate::lexer::Lexer;
use crate::lower::Lowering;
use crate::parser::{Arenas, Parser};
use crate::symtab::{SymKind, SymbolTable};
use nwnsc_bytecode::ncs::emit;
use nwnsc_bytecode::ndb::NdbWriter;
use nwnsc_resource::{ResType, ResourceLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerVersion {
    /// 1.69-compatible: 511-byte token cap, older compatibility quirks.
    V169,
    /// 1.74-compatible (current stock engine).
    V174,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFlags {
    pub dump_pcode: bool,
    pub show_includes: bool,
    pub show_preprocessed: bool,
}

pub struct CompileOptions<'a> {
    pub source_name: String,
    pub source: String,
    pub entry_point: String,
    pub version: CompilerVersion,
    pub optimize: bool,
    pub ignore_includes: bool,
    pub flags: ControlFlags,
    pub max_errors: usize,
    pub error_prefix: String,
    /// `name=value` (or bare `name`, implying an empty replacement)
    /// macros predefined before the source is preprocessed, as if by a
    /// leading `#define` line.
    pub defines: Vec<(String, String)>,
    pub loader: &'a dyn ResourceLoader,
    /// Resref of the builtin function catalog, bootstrapped once before
    /// the user source is parsed. `None` skips the bootstrap entirely
    /// (every bodyless prototype in the user source is then just an
    /// undefined, non-engine function).
    pub engine_header: Option<String>,
    pub emit_debug_symbols: bool,
}

impl<'a> CompileOptions<'a> {
    pub fn new(source_name: impl Into<String>, source: impl Into<String>, loader: &'a dyn ResourceLoader) -> Self {
        CompileOptions {
            source_name: source_name.into(),
            source: source.into(),
            entry_point: "main".to_string(),
            version: CompilerVersion::V174,
            optimize: true,
            ignore_includes: false,
            flags: ControlFlags::default(),
            max_errors: 100,
            error_prefix: "Error".to_string(),
            defines: Vec::new(),
            loader,
            engine_header: Some("nwscript".to_string()),
            emit_debug_symbols: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    Failure,
    /// `ignore_includes` was set: the preprocessor ran only far enough to
    /// discover the file's `#include` list, nothing was compiled.
    IncludeOnly,
}

pub struct CompileOutput {
    pub status: CompileStatus,
    pub bytecode: Vec<u8>,
    pub debug_symbols: Option<String>,
    pub included_files: Vec<String>,
    pub preprocessed_text: Option<String>,
    pub pcode_dump: Option<String>,
    pub diagnostics: DiagnosticSink,
}

/// Parses `source` against `symtab`/`interner`, optionally bootstrapping
/// engine-action prototypes, and returns the resulting AST. Shared
/// between the engine-header pass and the user-source pass.
fn parse_source<'a>(
    text: &str,
    file_name: &str,
    symtab: &'a mut SymbolTable,
    interner: &'a mut Interner,
    diags: &'a mut DiagnosticSink,
    arenas: Arenas<'a>,
    bootstrap_actions: bool,
) -> Program<'a> {
    let mut lexer = Lexer::new(text, interner);
    let tokens = lexer.tokenize(diags);
    drop(lexer);

    let mut parser = Parser::new(tokens, arenas, symtab, interner, diags, file_name);
    if bootstrap_actions {
        parser.enable_bootstrap_actions();
    }
    parser.discover_prototypes();
    parser.parse_program()
}

/// Compiles the engine's builtin catalog once into a fresh table, tagging
/// every bodyless prototype with a sequential `ACTION` index. Returns
/// `SymbolTable::new()` unchanged (with a diagnostic recorded) if the
/// loader has no such resource.
fn bootstrap_engine_table(
    loader: &dyn ResourceLoader,
    resref: &str,
    interner: &mut Interner,
    diags: &mut DiagnosticSink,
) -> SymbolTable {
    let mut symtab = SymbolTable::new();
    let text = match loader.load_text(resref, ResType::Nss) {
        Ok(t) => t,
        Err(e) => {
            diags.warning(
                codes::WARN_ENGINE_HEADER_MISSING,
                resref,
                0,
                format!("engine header '{}' unavailable: {}", resref, e),
            );
            return symtab;
        }
    };

    let expr_arena = Arena::new();
    let stmt_arena = Arena::new();
    let case_arena = Arena::new();
    let arenas = Arenas {
        expr: &expr_arena,
        stmt: &stmt_arena,
        case: &case_arena,
    };
    parse_source(&text, resref, &mut symtab, interner, diags, arenas, true);
    symtab
}

/// Compiles one named source buffer to NCS bytecode (and, if requested,
/// an NDB debug-symbol buffer).
pub fn compile(options: CompileOptions) -> CompileOutput {
    let mut interner = Interner::new();
    let mut diags = DiagnosticSink::new(options.error_prefix.clone(), options.max_errors);

    let base_symtab = match &options.engine_header {
        Some(resref) => bootstrap_engine_table(options.loader, resref, &mut interner, &mut diags),
        None => SymbolTable::new(),
    };

    let mut preprocessor = crate::preprocess::Preprocessor::new(options.loader);
    for (name, value) in &options.defines {
        preprocessor.define(name, value);
    }
    let preprocessed = preprocessor.run(&options.source_name, &options.source, &mut diags);

    if options.ignore_includes {
        return CompileOutput {
            status: CompileStatus::IncludeOnly,
            bytecode: Vec::new(),
            debug_symbols: None,
            included_files: preprocessed.files.into_iter().map(|f| f.resref).collect(),
            preprocessed_text: None,
            pcode_dump: None,
            diagnostics: diags,
        };
    }

    let mut symtab = SymbolTable::fork_from(&base_symtab);
    let expr_arena = Arena::new();
    let stmt_arena = Arena::new();
    let case_arena = Arena::new();
    let arenas = Arenas {
        expr: &expr_arena,
        stmt: &stmt_arena,
        case: &case_arena,
    };

    let mut lexer = Lexer::new(&preprocessed.text, &mut interner);
    if options.version == CompilerVersion::V169 {
        lexer = lexer.with_compat_token_length();
    }
    let tokens = lexer.tokenize(&mut diags);
    drop(lexer);

    let mut parser = Parser::new(tokens, arenas, &mut symtab, &mut interner, &mut diags, options.source_name.clone());
    parser.discover_prototypes();
    let program = parser.parse_program();

    let included_files = if options.flags.show_includes {
        preprocessed.files.iter().map(|f| f.resref.clone()).collect()
    } else {
        Vec::new()
    };
    let preprocessed_text = if options.flags.show_preprocessed {
        Some(preprocessed.text.clone())
    } else {
        None
    };

    if diags.has_errors() {
        return CompileOutput {
            status: CompileStatus::Failure,
            bytecode: Vec::new(),
            debug_symbols: None,
            included_files,
            preprocessed_text,
            pcode_dump: None,
            diagnostics: diags,
        };
    }

    let mut lowering = Lowering::new(&symtab, &interner, &mut diags, options.source_name.clone());
    let global_init = lowering.lower_globals(&program);

    let mut units: Vec<(String, crate::lower::LoweredFunction)> = Vec::new();
    for item in &program.items {
        if let TopLevel::FunctionDefinition(func) = item {
            let name = interner.resolve(func.name).to_string();
            if let Some(lowered) = lowering.lower_function(func) {
                units.push((name, lowered));
            }
        }
    }

    if lowering.diags.has_errors() {
        return CompileOutput {
            status: CompileStatus::Failure,
            bytecode: Vec::new(),
            debug_symbols: None,
            included_files,
            preprocessed_text,
            pcode_dump: None,
            diagnostics: diags,
        };
    }

    if symtab.find(&options.entry_point, Some(SymKind::Function)).is_none() {
        diags.error(
            codes::ERR_FUNCTION_NOT_DEFINED,
            &options.source_name,
            0,
            format!("entry point '{}' is not defined", options.entry_point),
        );
        return CompileOutput {
            status: CompileStatus::Failure,
            bytecode: Vec::new(),
            debug_symbols: None,
            included_files,
            preprocessed_text,
            pcode_dump: None,
            diagnostics: diags,
        };
    }

    let global_frame_size = global_init.frame_size;
    let mut label_seed = 0u32;
    let (mut global_instrs, next_seed) =
        codegen::compile_global_init(&symtab, &global_init, global_frame_size, label_seed);
    label_seed = next_seed;
    if options.optimize {
        global_instrs = crate::peephole::optimize(global_instrs);
    }

    let mut compiled_units: Vec<(String, Vec<FuncInstr>)> = Vec::new();
    for (name, lowered) in &units {
        let (mut instrs, next_seed) = codegen::compile_function(&symtab, lowered, global_frame_size, label_seed);
        label_seed = next_seed;
        if options.optimize {
            instrs = crate::peephole::optimize(instrs);
        }
        compiled_units.push((name.clone(), instrs));
    }

    // A call site survives codegen as `FuncInstr::Call{callee}` only for a
    // real function call (engine actions lower to `Opcode::Action`, and a
    // `#pragma default_function` callee is resolved to a default value in
    // place). Anything left referencing a name with no compiled body would
    // otherwise panic `link` trying to resolve its offset.
    let defined_names: std::collections::HashSet<&str> = compiled_units.iter().map(|(n, _)| n.as_str()).collect();
    let mut undefined_callees: Vec<String> = Vec::new();
    for instrs in std::iter::once(&global_instrs).chain(compiled_units.iter().map(|(_, i)| i)) {
        for instr in instrs {
            if let FuncInstr::Call { callee } = instr {
                if !defined_names.contains(callee.as_str()) && !undefined_callees.contains(callee) {
                    undefined_callees.push(callee.clone());
                }
            }
        }
    }
    for callee in &undefined_callees {
        diags.error(
            codes::ERR_FUNCTION_NOT_DEFINED,
            &options.source_name,
            0,
            format!("function '{}' is called but never defined", callee),
        );
    }
    if diags.has_errors() {
        return CompileOutput {
            status: CompileStatus::Failure,
            bytecode: Vec::new(),
            debug_symbols: None,
            included_files,
            preprocessed_text,
            pcode_dump: None,
            diagnostics: diags,
        };
    }

    let instructions = codegen::link(global_instrs, compiled_units, &options.entry_point);
    let bytecode = emit(&instructions);

    let debug_symbols = if options.emit_debug_symbols {
        let mut writer = NdbWriter::new();
        for f in &preprocessed.files {
            writer.add_file(f.resref.clone());
        }
        Some(writer.render())
    } else {
        None
    };

    let pcode_dump = if options.flags.dump_pcode {
        let mut text = String::new();
        {
            use std::fmt::Write;
            let _ = writeln!(text, "-- global init --");
        }
        let global_reader = crate::pcode::Reader::new(&global_init.code);
        crate::pcode::dump(&global_reader, global_init.body, 0, &mut text);
        for (name, lowered) in &units {
            use std::fmt::Write;
            let _ = writeln!(text, "-- {} --", name);
            let reader = crate::pcode::Reader::new(&lowered.code);
            crate::pcode::dump(&reader, lowered.body, 0, &mut text);
        }
        Some(text)
    } else {
        None
    };

    CompileOutput {
        status: CompileStatus::Success,
        bytecode,
        debug_symbols,
        included_files,
        preprocessed_text,
        pcode_dump,
        diagnostics: diags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwnsc_resource::MemoryLoader;

    #[test]
    fn compiles_empty_void_main() {
        let loader = MemoryLoader::new();
        let mut options = CompileOptions::new("a", "void main() { }", &loader);
        options.engine_header = None;
        let output = compile(options);
        assert_eq!(output.status, CompileStatus::Success);
        assert!(!output.diagnostics.has_errors());
        assert_eq!(&output.bytecode[0..8], nwnsc_bytecode::ncs::MAGIC);
    }

    #[test]
    fn missing_entry_point_fails() {
        let loader = MemoryLoader::new();
        let mut options = CompileOptions::new("a", "void other() { }", &loader);
        options.engine_header = None;
        let output = compile(options);
        assert_eq!(output.status, CompileStatus::Failure);
        assert!(output.diagnostics.has_errors());
    }

    #[test]
    fn ignore_includes_stops_before_codegen() {
        let loader = MemoryLoader::new();
        let mut options = CompileOptions::new("a", "void main() { }", &loader);
        options.engine_header = None;
        options.ignore_includes = true;
        let output = compile(options);
        assert_eq!(output.status, CompileStatus::IncludeOnly);
        assert!(output.bytecode.is_empty());
    }

    #[test]
    fn compiles_every_compound_assignment_operator() {
        let loader = MemoryLoader::new();
        let src = r#"
            void main() {
                int a = 1;
                a += 1; a -= 1; a *= 1; a /= 1; a %= 1;
                a <<= 1; a >>= 1; a >>>= 1;
                a &= 1; a |= 1; a ^= 1;
            }
        "#;
        let mut options = CompileOptions::new("a", src, &loader);
        options.engine_header = None;
        let output = compile(options);
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics.render());
        assert_eq!(output.status, CompileStatus::Success);
    }

    #[test]
    fn compiles_object_self_and_object_invalid() {
        let loader = MemoryLoader::new();
        let src = r#"
            void main() {
                object a = OBJECT_SELF;
                object b = OBJECT_INVALID;
            }
        "#;
        let mut options = CompileOptions::new("a", src, &loader);
        options.engine_header = None;
        let output = compile(options);
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics.render());
        assert_eq!(output.status, CompileStatus::Success);
    }

    #[test]
    fn calling_an_undefined_function_fails_cleanly() {
        let loader = MemoryLoader::new();
        let src = r#"
            void helper();
            void main() {
                helper();
            }
        "#;
        let mut options = CompileOptions::new("a", src, &loader);
        options.engine_header = None;
        let output = compile(options);
        assert_eq!(output.status, CompileStatus::Failure);
        assert!(output.diagnostics.has_errors());
    }

    #[test]
    fn pragma_default_function_resolves_undefined_calls_to_a_default_value() {
        let loader = MemoryLoader::new();
        let src = r#"
            #pragma default_function(helper)
            int helper(int x);
            void main() {
                int y = helper(1);
            }
        "#;
        let mut options = CompileOptions::new("a", src, &loader);
        options.engine_header = None;
        let output = compile(options);
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics.render());
        assert_eq!(output.status, CompileStatus::Success);
    }

    #[test]
    fn compiles_vector_literal() {
        let loader = MemoryLoader::new();
        let src = r#"
            void main() {
                vector v = [1.0, -2.5, 3];
            }
        "#;
        let mut options = CompileOptions::new("a", src, &loader);
        options.engine_header = None;
        let output = compile(options);
        assert!(!output.diagnostics.has_errors(), "{}", output.diagnostics.render());
        assert_eq!(output.status, CompileStatus::Success);
    }
}
