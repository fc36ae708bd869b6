//! The numbered diagnostic catalog: every error and warning the compiler
//! can raise has a stable `NSC####` id, a severity, and a fixed message
//! template. Errors live in the 1000s, warnings in the 6000s, matching
//! the original tool's numbering so existing build scripts that grep for
//! specific codes keep working.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// Numbered diagnostic ids. Only a subset of the stock catalog is
/// reproduced — exactly the ids spec'd behavior depends on plus the
/// minimum set needed to cover every edge case the component designs
/// call for; new ids are allocated in the next free slot of their range.
pub mod codes {
    pub const ERR_LEXICAL: u32 = 1000;
    /// Internal assertion failure. Always fatal.
    pub const ERR_INTERNAL: u32 = 1001;
    pub const ERR_PREPROCESSOR: u32 = 1002;
    pub const ERR_REDECLARATION: u32 = 1003;
    pub const ERR_UNDECLARED_IDENTIFIER: u32 = 1007;
    pub const ERR_TOKEN_LENGTH_EXCEEDED: u32 = 1013;
    pub const ERR_STRUCT_FORWARD_REFERENCE: u32 = 1014;
    pub const ERR_TYPE_MISMATCH: u32 = 1021;
    pub const ERR_LHS_NOT_ASSIGNABLE: u32 = 1024;
    pub const ERR_ASSIGNMENT_RHS_IS_ASSIGNMENT: u32 = 1025;
    pub const ERR_DEFAULT_ARG_NOT_TRAILING: u32 = 1035;
    pub const ERR_CONST_AT_FUNCTION_SCOPE: u32 = 1037;
    pub const ERR_NOT_ALL_PATHS_RETURN: u32 = 1039;
    pub const ERR_FUNCTION_NOT_DEFINED: u32 = 1040;
    pub const ERR_TOO_MANY_ERRORS: u32 = 1041;
    pub const ERR_BREAK_CONTINUE_OUTSIDE_LOOP: u32 = 1042;
    pub const ERR_EMPTY_CONTROL_STATEMENT: u32 = 1052;
    pub const ERR_TOO_MANY_PARAMETERS: u32 = 1059;
    pub const ERR_STRUCT_TYPED_CONSTANT: u32 = 1060;
    pub const ERR_DUPLICATE_CASE_VALUE: u32 = 1089;
    pub const ERR_DUPLICATE_DEFAULT: u32 = 1090;

    /// The stock engine mis-generates code for nested struct member
    /// access; this compiler reproduces that bytecode rather than fixing
    /// it, and warns instead of rejecting the program.
    pub const WARN_NESTED_STRUCT_MEMBER_ACCESS: u32 = 6002;
    pub const WARN_RETURN_VALUE_DISCARDED: u32 = 6003;
    pub const WARN_TOO_MANY_PARAMETERS_COMPAT: u32 = 6011;
    pub const WARN_IMPLICIT_TRUNCATION: u32 = 6012;
    pub const WARN_SWITCH_IN_DO_WHILE: u32 = 6013;
    pub const WARN_FOR_INIT_NON_INTEGER: u32 = 6014;
    pub const WARN_FOR_INCREMENT_NON_INTEGER: u32 = 6015;
    pub const WARN_UNREACHABLE_CODE: u32 = 6016;
    pub const WARN_UNUSED_PARAMETER: u32 = 6017;
    pub const WARN_SHADOWED_GLOBAL: u32 = 6018;
    pub const WARN_TOO_MANY_LOCALS: u32 = 6019;
    pub const WARN_ENGINE_HEADER_MISSING: u32 = 6020;
    pub const WARN_COMPAT_BUG_REPRODUCED: u32 = 6021;
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: u32,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: NSC{:04}: {}\nFile: \"{}\", Line: {}",
            self.severity, self.code, self.message, self.file, self.line
        )
    }
}

/// Accumulates diagnostics for one compile and tracks the abort
/// threshold: once `max_errors` error-severity diagnostics have been
/// recorded, `should_abort` reports true and the driving pass stops
/// trying to recover to the next synchronization point.
pub struct DiagnosticSink {
    error_prefix: String,
    max_errors: usize,
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticSink {
    pub fn new(error_prefix: impl Into<String>, max_errors: usize) -> Self {
        DiagnosticSink {
            error_prefix: error_prefix.into(),
            max_errors,
            diagnostics: Vec::new(),
            error_count: 0,
        }
    }

    pub fn error(&mut self, code: u32, file: &str, line: u32, message: impl Into<String>) {
        if self.should_abort() {
            return;
        }
        self.error_count += 1;
        self.diagnostics.push(Diagnostic {
            code,
            severity: Severity::Error,
            message: message.into(),
            file: file.to_string(),
            line,
        });
        if self.error_count >= self.max_errors {
            self.diagnostics.push(Diagnostic {
                code: codes::ERR_TOO_MANY_ERRORS,
                severity: Severity::Error,
                message: format!("too many errors ({}); aborting", self.max_errors),
                file: file.to_string(),
                line,
            });
        }
    }

    pub fn warning(&mut self, code: u32, file: &str, line: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            code,
            severity: Severity::Warning,
            message: message.into(),
            file: file.to_string(),
            line,
        });
    }

    pub fn should_abort(&self) -> bool {
        self.error_count >= self.max_errors
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render every accumulated diagnostic using the configured error
    /// prefix word (default `"Error"`, overridable via `--error-prefix`
    /// to match build tools that grep for a specific prefix string).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            out.push_str(&format!(
                "{} {}: NSC{:04}: {}\nFile: \"{}\", Line: {}\n",
                self.error_prefix, d.severity, d.code, d.message, d.file, d.line
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborts_after_max_errors() {
        let mut sink = DiagnosticSink::new("Error", 2);
        assert!(!sink.should_abort());
        sink.error(codes::ERR_UNDECLARED_IDENTIFIER, "a.nss", 1, "undeclared");
        assert!(!sink.should_abort());
        sink.error(codes::ERR_TYPE_MISMATCH, "a.nss", 2, "mismatch");
        assert!(sink.should_abort());
    }

    #[test]
    fn warnings_do_not_count_toward_abort() {
        let mut sink = DiagnosticSink::new("Error", 1);
        sink.warning(codes::WARN_UNREACHABLE_CODE, "a.nss", 1, "dead code");
        assert!(!sink.has_errors());
        assert!(!sink.should_abort());
    }

    #[test]
    fn render_includes_code_and_location() {
        let mut sink = DiagnosticSink::new("Error", 10);
        sink.error(codes::ERR_NOT_ALL_PATHS_RETURN, "a.nss", 7, "missing return statement");
        let text = sink.render();
        assert!(text.contains("NSC1039"));
        assert!(text.contains("a.nss"));
        assert!(text.contains("Line: 7"));
    }
}
