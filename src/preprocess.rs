//! Stream-stack preprocessor (component B): resolves `#include`,
//! `#define`/`#undef`, the `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/
//! `#endif` family, `#pragma`, `#warning` and `#error`, and expands both
//! user macros and the builtin `__FILE__`/`__LINE__`/`__COUNTER__`
//! family, before a single byte reaches the lexer.
//!
//! Rather than exposing a line-at-a-time pull interface, this module
//! flattens the whole stream stack into one text buffer up front,
//! emitting `#LINE <line> <file-index>` marker lines the lexer
//! recognizes and strips so file/line diagnostics still point at the
//! original source rather than the flattened buffer.

use crate::diag::{codes, DiagnosticSink};
use nwnsc_resource::{ResType, ResourceLoader};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub index: u32,
    pub resref: String,
}

#[derive(Debug, Clone)]
struct DefineEntry {
    value: String,
}

#[derive(Debug, Clone, Copy)]
struct IfFrame {
    /// This branch's condition was false, or an ancestor's was: don't
    /// emit text.
    skip: bool,
    /// Some branch of this `#if`/`#elif`/`#else` chain has already been
    /// taken; later `#elif`s in the same chain must not fire even if
    /// their own condition would be true.
    satisfied: bool,
    /// True once an ancestor frame is skipping, independent of this
    /// frame's own condition — lets nested conditionals inside a
    /// skipped branch parse (so `#endif` balance is tracked) without
    /// ever evaluating their conditions.
    ignore: bool,
    has_else: bool,
}

pub struct Preprocessor<'a> {
    loader: &'a dyn ResourceLoader,
    files: Vec<FileEntry>,
    defines: HashMap<String, DefineEntry>,
    seen_includes: HashSet<String>,
    counter: u32,
    compiler_date: String,
    compiler_time: String,
    error_prefix: String,
}

pub struct PreprocessResult {
    pub text: String,
    pub files: Vec<FileEntry>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(loader: &'a dyn ResourceLoader) -> Self {
        Preprocessor {
            loader,
            files: Vec::new(),
            defines: HashMap::new(),
            seen_includes: HashSet::new(),
            counter: 0,
            compiler_date: "Jan 01 2026".to_string(),
            compiler_time: "00:00:00".to_string(),
            error_prefix: "Error".to_string(),
        }
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.defines.insert(
            name.to_string(),
            DefineEntry {
                value: value.to_string(),
            },
        );
    }

    /// Preprocess `entry_source` (the already-loaded text of the entry
    /// resref `entry_resref`) into one flattened, macro-expanded buffer.
    pub fn run(
        &mut self,
        entry_resref: &str,
        entry_source: &str,
        diags: &mut DiagnosticSink,
    ) -> PreprocessResult {
        let mut out = String::new();
        let mut if_stack: Vec<IfFrame> = Vec::new();
        self.process_resource(entry_resref, Some(entry_source), &mut out, &mut if_stack, diags);
        if !if_stack.is_empty() {
            diags.error(
                codes::ERR_PREPROCESSOR,
                entry_resref,
                0,
                "unterminated #if: missing #endif",
            );
        }
        PreprocessResult {
            text: out,
            files: self.files.clone(),
        }
    }

    fn process_resource(
        &mut self,
        resref: &str,
        preloaded: Option<&str>,
        out: &mut String,
        if_stack: &mut Vec<IfFrame>,
        diags: &mut DiagnosticSink,
    ) {
        let key = resref.to_ascii_lowercase();
        if self.seen_includes.contains(&key) {
            // Either a duplicate #include (include-once semantics) or a
            // cycle (this resref is already on the active stack) — both
            // resolve the same way: skip silently, emit nothing.
            return;
        }
        self.seen_includes.insert(key);

        let source = match preloaded {
            Some(s) => s.to_string(),
            None => match self.loader.load_text(resref, ResType::Nss) {
                Ok(s) => s,
                Err(e) => {
                    diags.error(codes::ERR_PREPROCESSOR, resref, 0, format!("{}", e));
                    return;
                }
            },
        };

        let file_index = self.files.len() as u32;
        self.files.push(FileEntry {
            index: file_index,
            resref: resref.to_string(),
        });

        out.push_str(&format!("#LINE 1 {}\n", file_index));

        for (line_no, raw_line) in source.lines().enumerate() {
            if diags.should_abort() {
                break;
            }
            let line_no = (line_no + 1) as u32;
            let trimmed = raw_line.trim_start();

            if let Some(directive) = trimmed.strip_prefix('#') {
                self.handle_directive(
                    directive.trim(),
                    resref,
                    line_no,
                    out,
                    if_stack,
                    diags,
                );
                continue;
            }

            if Self::currently_skipping(if_stack) {
                continue;
            }

            let expanded = self.expand_macros(raw_line, resref, line_no);
            out.push_str(&expanded);
            out.push('\n');
        }
    }

    fn currently_skipping(if_stack: &[IfFrame]) -> bool {
        if_stack.iter().any(|f| f.skip || f.ignore)
    }

    fn handle_directive(
        &mut self,
        directive: &str,
        current_file: &str,
        line_no: u32,
        out: &mut String,
        if_stack: &mut Vec<IfFrame>,
        diags: &mut DiagnosticSink,
    ) {
        let (keyword, rest) = match directive.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (directive, ""),
        };

        match keyword {
            "include" => {
                if Self::currently_skipping(if_stack) {
                    return;
                }
                let target = rest.trim_matches(|c| c == '"' || c == '<' || c == '>');
                self.process_resource(target, None, out, if_stack, diags);
            }
            "define" => {
                if Self::currently_skipping(if_stack) {
                    return;
                }
                let (name, value) = match rest.split_once(char::is_whitespace) {
                    Some((n, v)) => (n, v.trim()),
                    None => (rest, ""),
                };
                if name.len() > 1023 {
                    diags.error(
                        codes::ERR_PREPROCESSOR,
                        current_file,
                        line_no,
                        "#define identifier exceeds 1023 characters",
                    );
                }
                self.define(name, value);
            }
            "undef" => {
                if Self::currently_skipping(if_stack) {
                    return;
                }
                self.defines.remove(rest.trim());
            }
            "ifdef" => {
                let skip = Self::currently_skipping(if_stack);
                let satisfied = !skip && self.defines.contains_key(rest.trim());
                if_stack.push(IfFrame {
                    skip: !satisfied,
                    satisfied,
                    ignore: skip,
                    has_else: false,
                });
            }
            "ifndef" => {
                let skip = Self::currently_skipping(if_stack);
                let satisfied = !skip && !self.defines.contains_key(rest.trim());
                if_stack.push(IfFrame {
                    skip: !satisfied,
                    satisfied,
                    ignore: skip,
                    has_else: false,
                });
            }
            "if" => {
                let skip = Self::currently_skipping(if_stack);
                let satisfied = !skip && self.eval_condition(rest, current_file, line_no, diags);
                if_stack.push(IfFrame {
                    skip: !satisfied,
                    satisfied,
                    ignore: skip,
                    has_else: false,
                });
            }
            "elif" => {
                if let Some(frame) = if_stack.last_mut() {
                    if frame.has_else {
                        diags.error(
                            codes::ERR_PREPROCESSOR,
                            current_file,
                            line_no,
                            "#elif after #else",
                        );
                        return;
                    }
                    if frame.ignore {
                        return;
                    }
                    if frame.satisfied {
                        frame.skip = true;
                    } else {
                        let cond = self.eval_condition(rest, current_file, line_no, diags);
                        frame.skip = !cond;
                        frame.satisfied = cond;
                    }
                } else {
                    diags.error(
                        codes::ERR_PREPROCESSOR,
                        current_file,
                        line_no,
                        "#elif without matching #if",
                    );
                }
            }
            "else" => {
                if let Some(frame) = if_stack.last_mut() {
                    if frame.has_else {
                        diags.error(
                            codes::ERR_PREPROCESSOR,
                            current_file,
                            line_no,
                            "duplicate #else",
                        );
                        return;
                    }
                    frame.has_else = true;
                    if !frame.ignore {
                        frame.skip = frame.satisfied;
                        frame.satisfied = true;
                    }
                } else {
                    diags.error(
                        codes::ERR_PREPROCESSOR,
                        current_file,
                        line_no,
                        "#else without matching #if",
                    );
                }
            }
            "endif" => {
                if if_stack.pop().is_none() {
                    diags.error(
                        codes::ERR_PREPROCESSOR,
                        current_file,
                        line_no,
                        "#endif without matching #if",
                    );
                }
            }
            "pragma" => {
                // Engine-structure and default/pure-function pragmas are
                // consumed by the parser once it reaches the relevant
                // declaration; the preprocessor just passes them through
                // as a marker line so the lexer can see them in-order.
                if !Self::currently_skipping(if_stack) {
                    out.push_str(&format!("#PRAGMA {}\n", rest));
                }
            }
            "warning" => {
                if !Self::currently_skipping(if_stack) {
                    diags.warning(codes::WARN_COMPAT_BUG_REPRODUCED, current_file, line_no, rest.to_string());
                }
            }
            "error" => {
                if !Self::currently_skipping(if_stack) {
                    diags.error(codes::ERR_PREPROCESSOR, current_file, line_no, rest.to_string());
                }
            }
            _ => {
                if !Self::currently_skipping(if_stack) {
                    diags.warning(
                        codes::WARN_COMPAT_BUG_REPRODUCED,
                        current_file,
                        line_no,
                        format!("unrecognized preprocessor directive #{}", keyword),
                    );
                }
            }
        }
    }

    fn expand_macros(&mut self, line: &str, file: &str, line_no: u32) -> String {
        let mut out = String::with_capacity(line.len());
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_alphabetic() || c == '_' {
                let start = i;
                while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &line[start..i];
                out.push_str(&self.expand_one(word, file, line_no));
            } else {
                out.push(c);
                i += 1;
            }
        }
        out
    }

    fn expand_one(&mut self, word: &str, file: &str, line_no: u32) -> String {
        match word {
            "__LINE__" => return line_no.to_string(),
            "__FILE__" => return format!("\"{}\"", file),
            "__DATE__" => return format!("\"{}\"", self.compiler_date),
            "__TIME__" => return format!("\"{}\"", self.compiler_time),
            "__NSC_COMPILER_DATE__" => return format!("\"{}\"", self.compiler_date),
            "__NSC_COMPILER_TIME__" => return format!("\"{}\"", self.compiler_time),
            "__COUNTER__" => {
                let v = self.counter;
                self.counter += 1;
                return v.to_string();
            }
            // __FUNCTION__ is resolved by the lexer, which tracks the
            // enclosing function as it tokenizes; pass it through as-is.
            "__FUNCTION__" => return word.to_string(),
            _ => {}
        }
        if let Some(def) = self.defines.get(word).cloned() {
            def.value
        } else {
            word.to_string()
        }
    }

    /// Constant-expression evaluator for `#if`/`#elif`. The grammar is
    /// deliberately narrow: an integer literal, a bare identifier,
    /// `defined(X)`/`defined X`, optionally prefixed by `!`. Anything
    /// wider (arithmetic, comparisons, `&&`/`||`, parentheses) is
    /// rejected with a diagnostic rather than silently evaluated.
    /// Undefined identifiers evaluate to 0, matching C-preprocessor
    /// convention.
    fn eval_condition(&self, expr: &str, file: &str, line: u32, diags: &mut DiagnosticSink) -> bool {
        let tokens = Self::tokenize_condition(expr);
        let mut parser = CondParser {
            tokens,
            pos: 0,
            defines: &self.defines,
            had_error: false,
        };
        let value = parser.parse();
        if parser.had_error {
            diags.error(
                codes::ERR_PREPROCESSOR,
                file,
                line,
                "#if/#elif expression must be an integer literal, an identifier, defined(X), or a ! of one of those",
            );
        }
        value != 0
    }

    fn tokenize_condition(expr: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let bytes = expr.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            if c.is_alphanumeric() || c == '_' {
                let start = i;
                while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(expr[start..i].to_string());
                continue;
            }
            if i + 1 < bytes.len() {
                let two = &expr[i..i + 2];
                if matches!(two, "&&" | "||" | "==" | "!=" | "<=" | ">=") {
                    tokens.push(two.to_string());
                    i += 2;
                    continue;
                }
            }
            tokens.push(c.to_string());
            i += 1;
        }
        tokens
    }
}

struct CondParser<'a> {
    tokens: Vec<String>,
    pos: usize,
    defines: &'a HashMap<String, DefineEntry>,
    had_error: bool,
}

impl<'a> CondParser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn bump(&mut self) -> Option<String> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    /// Parses the whole token stream as a single `unary` production and
    /// flags `had_error` if anything is left over — that leftover is
    /// exactly the wider-grammar case (arithmetic, comparisons, `&&`/
    /// `||`, parens) this evaluator refuses to evaluate.
    fn parse(&mut self) -> i64 {
        let v = self.parse_unary();
        if self.pos != self.tokens.len() {
            self.had_error = true;
        }
        v
    }

    fn parse_unary(&mut self) -> i64 {
        match self.peek() {
            Some("!") => {
                self.bump();
                (self.parse_unary() == 0) as i64
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> i64 {
        match self.bump().as_deref() {
            Some("defined") => {
                let paren = self.peek() == Some("(");
                if paren {
                    self.bump();
                }
                let name = self.bump();
                if paren {
                    if self.peek() == Some(")") {
                        self.bump();
                    } else {
                        self.had_error = true;
                    }
                }
                match name {
                    Some(n) => self.defines.contains_key(&n) as i64,
                    None => {
                        self.had_error = true;
                        0
                    }
                }
            }
            Some(tok) => {
                if let Ok(n) = tok.parse::<i64>() {
                    n
                } else if tok.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false) {
                    match self.defines.get(&tok) {
                        Some(def) => def.value.trim().parse::<i64>().unwrap_or(0),
                        None => 0,
                    }
                } else {
                    self.had_error = true;
                    0
                }
            }
            None => {
                self.had_error = true;
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticSink;
    use nwnsc_resource::{MemoryLoader, ResType};

    fn run(entry: &str, files: &[(&str, &str)]) -> (String, DiagnosticSink) {
        let mut loader = MemoryLoader::new();
        for (name, text) in files {
            loader.insert(*name, ResType::Nss, text.as_bytes());
        }
        let mut pp = Preprocessor::new(&loader);
        let mut diags = DiagnosticSink::new("Error", 99);
        let entry_text = files
            .iter()
            .find(|(n, _)| *n == entry)
            .map(|(_, t)| *t)
            .unwrap();
        let result = pp.run(entry, entry_text, &mut diags);
        (result.text, diags)
    }

    #[test]
    fn expands_object_like_define() {
        let (text, diags) = run("main", &[("main", "#define MAX 10\nint x = MAX;")]);
        assert!(!diags.has_errors());
        assert!(text.contains("int x = 10;"));
    }

    #[test]
    fn ifdef_skips_undefined_branch() {
        let (text, _) = run(
            "main",
            &[(
                "main",
                "#ifdef NOPE\nint bad;\n#else\nint good;\n#endif",
            )],
        );
        assert!(!text.contains("int bad;"));
        assert!(text.contains("int good;"));
    }

    #[test]
    fn include_cycle_resolves_silently() {
        let (_, diags) = run(
            "a",
            &[
                ("a", "#include \"b\"\nint fromA;"),
                ("b", "#include \"a\"\nint fromB;"),
            ],
        );
        assert!(!diags.has_errors());
    }

    #[test]
    fn builtin_counter_increments() {
        let (text, _) = run("main", &[("main", "int a = __COUNTER__;\nint b = __COUNTER__;")]);
        assert!(text.contains("int a = 0;"));
        assert!(text.contains("int b = 1;"));
    }

    #[test]
    fn if_expression_arithmetic_is_rejected() {
        let (_, diags) = run(
            "main",
            &[("main", "#if 1 + 1 == 2\nint yes;\n#else\nint no;\n#endif")],
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn if_defined_checks_macro_table() {
        let (text, diags) = run(
            "main",
            &[("main", "#define FOO 1\n#if defined(FOO)\nint yes;\n#else\nint no;\n#endif")],
        );
        assert!(!diags.has_errors());
        assert!(text.contains("int yes;"));
        assert!(!text.contains("int no;"));
    }

    #[test]
    fn if_not_defined_checks_macro_table() {
        let (text, diags) = run(
            "main",
            &[("main", "#if !defined(BAR)\nint yes;\n#else\nint no;\n#endif")],
        );
        assert!(!diags.has_errors());
        assert!(text.contains("int yes;"));
        assert!(!text.contains("int no;"));
    }
}
