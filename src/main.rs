//! `nwnsc` CLI: compile one or more `.nss` files to `.ncs` bytecode, or
//! disassemble a `.ncs` file back to mnemonic text.

use clap::{Parser, Subcommand};
use log::{info, warn};
use nwnsc::{compile, CompileOptions, CompileStatus, CompilerVersion, ControlFlags};
use nwnsc_resource::{DirectoryLoader, ResourceLoader};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "nwnsc")]
#[command(about = "NWScript-to-NCS bytecode compiler", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one or more source files to bytecode
    Compile {
        /// Source files to compile
        files: Vec<PathBuf>,

        /// Compiler compatibility version. Overrides `[build]
        /// compiler_version` from `--config`; defaults to 1.74 if
        /// neither is given.
        #[arg(long)]
        version: Option<String>,

        /// Disable the peephole/expression optimizer. Overrides `[build]
        /// optimize` from `--config` (forces it off regardless of the
        /// manifest value).
        #[arg(long)]
        no_optimize: bool,

        /// Stop after resolving includes; report the include list only.
        /// Overrides `[build] ignore_includes` from `--config` (forces
        /// it on regardless of the manifest value).
        #[arg(long)]
        ignore_includes: bool,

        /// Predefine a macro as if by a leading `#define NAME VALUE`
        /// (repeatable). Appended after any `[build] defines` from
        /// `--config`, so a name given on both sides takes the CLI value.
        #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
        define: Vec<String>,

        /// Abort compilation after this many errors. Overrides `[build]
        /// max_errors` from `--config`; defaults to 100 if neither is
        /// given.
        #[arg(long)]
        max_errors: Option<usize>,

        /// Print the pre-link pcode stream for each function
        #[arg(long)]
        dump_pcode: bool,

        /// Print every file pulled in via `#include`
        #[arg(long)]
        show_includes: bool,

        /// Print the fully preprocessed source text
        #[arg(long)]
        show_preprocessed: bool,

        /// Additional directory to search for `#include` targets and the
        /// engine header (repeatable)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<PathBuf>,

        /// Resref of the engine builtin-function catalog (bare name, no
        /// extension); pass an empty string to skip the bootstrap pass
        #[arg(long, default_value = "nwscript")]
        engine_header: String,

        /// Word prefixed to every rendered diagnostic line. Overrides
        /// `[build] error_prefix` from `--config`; defaults to "Error"
        /// if neither is given.
        #[arg(long)]
        error_prefix: Option<String>,

        /// Project manifest providing defaults for the flags above
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Also emit a `.ndb` debug-symbol file alongside each `.ncs`
        #[arg(long)]
        debug_symbols: bool,
    },
    /// Disassemble a compiled `.ncs` file to mnemonic text
    Disasm {
        /// Bytecode file to disassemble
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            files,
            version,
            no_optimize,
            ignore_includes,
            define,
            max_errors,
            dump_pcode,
            show_includes,
            show_preprocessed,
            include,
            engine_header,
            error_prefix,
            config,
            debug_symbols,
        } => run_compile(CompileArgs {
            files,
            version,
            no_optimize,
            ignore_includes,
            define,
            max_errors,
            dump_pcode,
            show_includes,
            show_preprocessed,
            include,
            engine_header,
            error_prefix,
            config,
            debug_symbols,
        }),
        Commands::Disasm { file } => run_disasm(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("nwnsc: {}", e);
            ExitCode::FAILURE
        }
    }
}

struct CompileArgs {
    files: Vec<PathBuf>,
    version: Option<String>,
    no_optimize: bool,
    ignore_includes: bool,
    define: Vec<String>,
    max_errors: Option<usize>,
    dump_pcode: bool,
    show_includes: bool,
    show_preprocessed: bool,
    include: Vec<PathBuf>,
    engine_header: String,
    error_prefix: Option<String>,
    config: Option<PathBuf>,
    debug_symbols: bool,
}

fn run_compile(args: CompileArgs) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = match &args.config {
        Some(path) => Some(nwnsc::config::Manifest::load(path)?),
        None => None,
    };

    let mut loader = DirectoryLoader::new();
    for dir in &args.include {
        loader.push_dir(dir.clone());
    }
    if let Some(m) = &manifest {
        for dir in &m.package.include_paths {
            loader.push_dir(PathBuf::from(dir));
        }
    }
    for file in &args.files {
        if let Some(parent) = file.parent() {
            loader.push_dir(parent.to_path_buf());
        }
    }

    // `[build]` supplies defaults; an explicitly-given CLI flag always
    // wins over it. A bare boolean flag like `--no-optimize` can only
    // push a manifest default further in its own direction (on), since
    // there's no CLI spelling for "force it back off".
    let build = manifest.as_ref().map(|m| &m.build);
    let version_str = args
        .version
        .clone()
        .or_else(|| build.map(|b| b.compiler_version.clone()))
        .unwrap_or_else(|| "1.74".to_string());
    let version = match version_str.as_str() {
        "1.69" => CompilerVersion::V169,
        _ => CompilerVersion::V174,
    };
    let optimize = !args.no_optimize && build.map_or(true, |b| b.optimize);
    let ignore_includes = args.ignore_includes || build.map_or(false, |b| b.ignore_includes);
    let max_errors = args
        .max_errors
        .or_else(|| build.map(|b| b.max_errors))
        .unwrap_or(100);
    let error_prefix = args
        .error_prefix
        .clone()
        .or_else(|| build.map(|b| b.error_prefix.clone()))
        .unwrap_or_else(|| "Error".to_string());
    let mut defines: Vec<(String, String)> = build
        .map(|b| b.defines.iter().map(|d| split_define(d)).collect())
        .unwrap_or_default();
    defines.extend(args.define.iter().map(|d| split_define(d)));

    let mut had_failure = false;
    for file in &args.files {
        let source_name = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("source")
            .to_string();
        let source = fs::read_to_string(file)?;

        let mut options = CompileOptions::new(source_name.clone(), source, &loader as &dyn ResourceLoader);
        options.version = version;
        options.optimize = optimize;
        options.ignore_includes = ignore_includes;
        options.max_errors = max_errors;
        options.defines = defines.clone();
        options.flags = ControlFlags {
            dump_pcode: args.dump_pcode,
            show_includes: args.show_includes,
            show_preprocessed: args.show_preprocessed,
        };
        options.error_prefix = error_prefix.clone();
        options.emit_debug_symbols = args.debug_symbols;
        options.engine_header = if args.engine_header.is_empty() {
            None
        } else {
            Some(args.engine_header.clone())
        };

        info!("compiling {}", file.display());
        let output = compile(options);

        if output.diagnostics.error_count() > 0 {
            warn!("{} diagnostic error(s) in {}", output.diagnostics.error_count(), file.display());
        }
        print!("{}", output.diagnostics.render());

        for inc in &output.included_files {
            println!("Included: {}", inc);
        }
        if let Some(text) = &output.preprocessed_text {
            println!("{}", text);
        }
        if let Some(text) = &output.pcode_dump {
            println!("{}", text);
        }

        match output.status {
            CompileStatus::Success => {
                let out_path = file.with_extension("ncs");
                fs::write(&out_path, &output.bytecode)?;
                println!("Compiled {} -> {}", file.display(), out_path.display());
                if let Some(ndb) = &output.debug_symbols {
                    let ndb_path = file.with_extension("ndb");
                    fs::write(&ndb_path, ndb)?;
                }
            }
            CompileStatus::IncludeOnly => {
                println!("{}: includes resolved, no bytecode emitted", file.display());
            }
            CompileStatus::Failure => {
                had_failure = true;
            }
        }
    }

    if had_failure {
        Err("compilation failed".into())
    } else {
        Ok(())
    }
}

fn split_define(raw: &str) -> (String, String) {
    match raw.split_once('=') {
        Some((name, value)) => (name.to_string(), value.to_string()),
        None => (raw.to_string(), String::new()),
    }
}

fn run_disasm(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let decoded = nwnsc_bytecode::disasm::disassemble(&bytes)?;
    for instr in decoded {
        println!("{}", instr.text);
    }
    Ok(())
}
