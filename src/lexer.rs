//! Lexer (component C): turns the preprocessor's flattened, macro-expanded
//! text into a token stream. Consumes the `#LINE <line> <file-index>` and
//! `#PRAGMA ...` marker lines the preprocessor emits (see `preprocess.rs`)
//! to keep diagnostics pointed at the original file/line and to pick up
//! `#pragma ENGINE_STRUCTURE_n "Name"` registrations.

use crate::diag::DiagnosticSink;
use crate::intern::Interner;
use crate::token::{Span, Token, TokenKind};
use std::collections::HashMap;

/// Default token-length cap (component C / §3 Constants). The v1.69
/// compatibility cap of 511 bytes is selected by the caller up front
/// (external interface "compiler version" input) rather than decided
/// dynamically mid-lex.
pub const MAX_TOKEN_LENGTH: usize = 0x1000;
pub const MAX_COMPAT_TOKEN_LENGTH: usize = 511;

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    file_index: u32,
    interner: &'a mut Interner,
    max_token_length: usize,

    brace_depth: usize,
    paren_name_stack: Vec<Option<String>>,
    last_identifier: Option<String>,
    pending_function_name: Option<String>,
    current_function: Option<String>,
    function_scope_depth: Option<usize>,

    /// `#pragma ENGINE_STRUCTURE_n "Name"` registrations, keyed by
    /// ordinal, discovered as the lexer passes over them so the parser
    /// can recognize `Name` as an engine-object type keyword from that
    /// point forward.
    pub engine_structures: HashMap<u8, String>,

    /// `default_function`/`pure_function` pragma markers discovered since
    /// the last call to `tokenize`'s main loop, drained into the token
    /// stream as zero-width tokens right after being found.
    pragma_tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, interner: &'a mut Interner) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            file_index: 0,
            interner,
            max_token_length: MAX_TOKEN_LENGTH,
            brace_depth: 0,
            paren_name_stack: Vec::new(),
            last_identifier: None,
            pending_function_name: None,
            current_function: None,
            function_scope_depth: None,
            engine_structures: HashMap::new(),
            pragma_tokens: Vec::new(),
        }
    }

    pub fn with_compat_token_length(mut self) -> Self {
        self.max_token_length = MAX_COMPAT_TOKEN_LENGTH;
        self
    }

    pub fn tokenize(&mut self, diags: &mut DiagnosticSink) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia(&mut tokens, diags);
            tokens.extend(self.pragma_tokens.drain(..));
            if self.pos >= self.bytes.len() || diags.should_abort() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    span: Span::new(self.pos as u32, self.pos as u32),
                    line: self.line,
                });
                break;
            }
            if let Some(tok) = self.next_token(diags) {
                self.track_function_context(&tok);
                tokens.push(tok);
            }
        }
        tokens
    }

    fn current_file(&self) -> String {
        format!("@file{}", self.file_index)
    }

    fn skip_trivia(&mut self, _tokens: &mut [Token], diags: &mut DiagnosticSink) {
        loop {
            if self.at_line_start() && self.starts_with("#LINE ") {
                self.consume_line_marker();
                continue;
            }
            if self.at_line_start() && self.starts_with("#PRAGMA ") {
                self.consume_pragma_marker(diags);
                continue;
            }
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    self.pos += 1;
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.pos += 1;
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    while self.pos < self.bytes.len() && !self.starts_with("*/") {
                        if self.peek() == Some('\n') {
                            self.line += 1;
                        }
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.bytes.len());
                }
                _ => break,
            }
        }
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.bytes.get(self.pos - 1) == Some(&b'\n')
    }

    fn starts_with(&self, s: &str) -> bool {
        self.source[self.pos..].starts_with(s)
    }

    fn consume_line_marker(&mut self) {
        let rest = &self.source[self.pos..];
        let end = rest.find('\n').unwrap_or(rest.len());
        let marker = &rest[..end];
        let mut parts = marker.trim_start_matches("#LINE ").split_whitespace();
        if let Some(line) = parts.next().and_then(|s| s.parse::<u32>().ok()) {
            self.line = line;
        }
        if let Some(file) = parts.next().and_then(|s| s.parse::<u32>().ok()) {
            self.file_index = file;
        }
        self.pos += end + 1;
    }

    fn consume_pragma_marker(&mut self, diags: &mut DiagnosticSink) {
        let rest = &self.source[self.pos..];
        let end = rest.find('\n').unwrap_or(rest.len());
        let marker = rest["#PRAGMA ".len()..end].trim();
        if let Some(spec) = marker.strip_prefix("ENGINE_STRUCTURE_") {
            let (ord_str, name_part) = spec.split_once(char::is_whitespace).unwrap_or((spec, ""));
            if let Ok(ordinal) = ord_str.trim().parse::<u8>() {
                let name = name_part.trim().trim_matches('"').to_string();
                if !name.is_empty() {
                    self.engine_structures.insert(ordinal, name);
                }
            } else {
                diags.warning(
                    crate::diag::codes::WARN_COMPAT_BUG_REPRODUCED,
                    &self.current_file(),
                    self.line,
                    "malformed #pragma ENGINE_STRUCTURE_n",
                );
            }
        } else if let Some(rest) = marker.strip_prefix("default_function") {
            self.consume_named_function_pragma(rest, TokenKind::PragmaDefaultFunction, "default_function", diags);
        } else if let Some(rest) = marker.strip_prefix("pure_function") {
            self.consume_named_function_pragma(rest, TokenKind::PragmaPureFunction, "pure_function", diags);
        }
        self.pos += end + 1;
    }

    /// Parses the `(name)` argument of a `#pragma default_function(name)` /
    /// `#pragma pure_function(name)` line and pushes a token carrying the
    /// function name in its `lexeme`. Warns and drops the pragma if the
    /// argument is missing or malformed.
    fn consume_named_function_pragma(
        &mut self,
        rest: &str,
        kind: TokenKind,
        directive_name: &str,
        diags: &mut DiagnosticSink,
    ) {
        let rest = rest.trim();
        let name = rest
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .map(|s| s.trim());
        match name {
            Some(name) if !name.is_empty() => {
                self.pragma_tokens.push(Token {
                    kind,
                    lexeme: name.to_string(),
                    span: Span::new(self.pos as u32, self.pos as u32),
                    line: self.line,
                });
            }
            _ => {
                diags.warning(
                    crate::diag::codes::WARN_COMPAT_BUG_REPRODUCED,
                    &self.current_file(),
                    self.line,
                    format!("malformed #pragma {}(name)", directive_name),
                );
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.bytes.get(self.pos).map(|&b| b as char)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.bytes.get(self.pos + n).map(|&b| b as char)
    }

    fn next_token(&mut self, diags: &mut DiagnosticSink) -> Option<Token> {
        let start = self.pos;
        let c = self.peek()?;

        if c.is_ascii_digit() {
            return Some(self.lex_number(start, diags));
        }
        if c == '"' {
            return Some(self.lex_string(start, diags));
        }
        if c.is_alphabetic() || c == '_' {
            return Some(self.lex_identifier(start, diags));
        }

        self.pos += 1;
        let two = |s: &Self, a: char| s.peek() == Some(a);
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '~' => TokenKind::Tilde,
            '+' => {
                if two(self, '+') {
                    self.pos += 1;
                    TokenKind::PlusPlus
                } else if two(self, '=') {
                    self.pos += 1;
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if two(self, '-') {
                    self.pos += 1;
                    TokenKind::MinusMinus
                } else if two(self, '=') {
                    self.pos += 1;
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::Leq
                } else if two(self, '<') {
                    self.pos += 1;
                    if two(self, '=') {
                        self.pos += 1;
                        TokenKind::ShlEq
                    } else {
                        TokenKind::ShiftLeft
                    }
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::Geq
                } else if two(self, '>') {
                    self.pos += 1;
                    if two(self, '>') {
                        self.pos += 1;
                        if two(self, '=') {
                            self.pos += 1;
                            TokenKind::UShrEq
                        } else {
                            TokenKind::UShiftRight
                        }
                    } else if two(self, '=') {
                        self.pos += 1;
                        TokenKind::ShrEq
                    } else {
                        TokenKind::ShiftRight
                    }
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if two(self, '&') {
                    self.pos += 1;
                    TokenKind::AmpAmp
                } else if two(self, '=') {
                    self.pos += 1;
                    TokenKind::AmpEq
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if two(self, '|') {
                    self.pos += 1;
                    TokenKind::PipePipe
                } else if two(self, '=') {
                    self.pos += 1;
                    TokenKind::PipeEq
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => {
                if two(self, '=') {
                    self.pos += 1;
                    TokenKind::CaretEq
                } else {
                    TokenKind::Caret
                }
            }
            other => {
                diags.error(
                    crate::diag::codes::ERR_LEXICAL,
                    &self.current_file(),
                    self.line,
                    format!("unexpected character '{}'", other),
                );
                TokenKind::Eof
            }
        };

        Some(Token {
            lexeme: self.source[start..self.pos].to_string(),
            kind,
            span: Span::new(start as u32, self.pos as u32),
            line: self.line,
        })
    }

    fn lex_number(&mut self, start: usize, diags: &mut DiagnosticSink) -> Token {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = &self.source[digits_start..self.pos];
            // Reproduces the stock compiler's wrap-on-overflow behavior
            // for hex literals wider than 32 bits: truncating `i64 as
            // i32` wraps exactly the way the original's integer literal
            // parser does.
            let value = i64::from_str_radix(text, 16).unwrap_or(0) as i32;
            return Token {
                lexeme: self.source[start..self.pos].to_string(),
                kind: TokenKind::IntLiteral(value),
                span: Span::new(start as u32, self.pos as u32),
                line: self.line,
            };
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }

        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) || self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('f') | Some('F')) {
            is_float = true;
            self.pos += 1;
        }

        let text = &self.source[start..self.pos];
        let kind = if is_float {
            let trimmed = text.trim_end_matches(['f', 'F']);
            let trimmed = if trimmed.ends_with('.') {
                format!("{}0", trimmed)
            } else {
                trimmed.to_string()
            };
            match trimmed.parse::<f32>() {
                Ok(v) => TokenKind::FloatLiteral(v),
                Err(_) => {
                    diags.error(
                        crate::diag::codes::ERR_LEXICAL,
                        &self.current_file(),
                        self.line,
                        format!("invalid float literal '{}'", text),
                    );
                    TokenKind::FloatLiteral(0.0)
                }
            }
        } else {
            match text.parse::<i32>() {
                Ok(v) => TokenKind::IntLiteral(v),
                Err(_) => TokenKind::IntLiteral(text.parse::<i64>().unwrap_or(0) as i32),
            }
        };

        Token {
            lexeme: text.to_string(),
            kind,
            span: Span::new(start as u32, self.pos as u32),
            line: self.line,
        }
    }

    fn lex_string(&mut self, start: usize, diags: &mut DiagnosticSink) -> Token {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    diags.error(
                        crate::diag::codes::ERR_LEXICAL,
                        &self.current_file(),
                        self.line,
                        "unterminated string literal",
                    );
                    break;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(other) => value.push(other),
                        None => break,
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        if self.pos - start > self.max_token_length {
            diags.error(
                crate::diag::codes::ERR_TOKEN_LENGTH_EXCEEDED,
                &self.current_file(),
                self.line,
                "string literal exceeds maximum token length",
            );
        }
        Token {
            lexeme: self.source[start..self.pos].to_string(),
            kind: TokenKind::StringLiteral(value),
            span: Span::new(start as u32, self.pos as u32),
            line: self.line,
        }
    }

    fn lex_identifier(&mut self, start: usize, diags: &mut DiagnosticSink) -> Token {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];

        if self.pos - start > self.max_token_length {
            diags.error(
                crate::diag::codes::ERR_TOKEN_LENGTH_EXCEEDED,
                &self.current_file(),
                self.line,
                "identifier exceeds maximum token length",
            );
        }

        if text == "__FUNCTION__" {
            let name = self.current_function.clone().unwrap_or_default();
            return Token {
                lexeme: text.to_string(),
                kind: TokenKind::StringLiteral(name),
                span: Span::new(start as u32, self.pos as u32),
                line: self.line,
            };
        }

        let kind = TokenKind::keyword_from_str(text).unwrap_or_else(|| {
            TokenKind::Identifier(self.interner.intern(text))
        });

        Token {
            lexeme: text.to_string(),
            kind,
            span: Span::new(start as u32, self.pos as u32),
            line: self.line,
        }
    }

    /// Best-effort tracking of the innermost enclosing function name,
    /// purely to resolve `__FUNCTION__`. Looks for the shape
    /// `identifier ( ... ) {` at brace depth 0.
    fn track_function_context(&mut self, tok: &Token) {
        match &tok.kind {
            TokenKind::Identifier(sym) => {
                self.last_identifier = Some(self.interner.resolve(*sym).to_string());
            }
            TokenKind::LParen => {
                self.paren_name_stack.push(self.last_identifier.take());
            }
            TokenKind::RParen => {
                let name = self.paren_name_stack.pop().flatten();
                if self.brace_depth == 0 {
                    self.pending_function_name = name;
                }
            }
            TokenKind::LBrace => {
                if self.brace_depth == 0 {
                    self.current_function = self.pending_function_name.take();
                    self.function_scope_depth = Some(self.brace_depth + 1);
                }
                self.brace_depth += 1;
            }
            TokenKind::RBrace => {
                self.brace_depth = self.brace_depth.saturating_sub(1);
                if self.function_scope_depth == Some(self.brace_depth + 1)
                    && self.brace_depth == 0
                {
                    self.current_function = None;
                    self.function_scope_depth = None;
                }
            }
            _ => {
                self.last_identifier = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> (Vec<Token>, Interner) {
        let mut interner = Interner::new();
        let mut diags = DiagnosticSink::new("Error", 99);
        let tokens = {
            let mut lexer = Lexer::new(src, &mut interner);
            lexer.tokenize(&mut diags)
        };
        (tokens, interner)
    }

    #[test]
    fn tokenizes_empty_main() {
        let (tokens, interner) = lex("void main() {\n}\n");
        assert_eq!(tokens[0].kind, TokenKind::Void);
        match &tokens[1].kind {
            TokenKind::Identifier(sym) => assert_eq!(interner.resolve(*sym), "main"),
            other => panic!("expected identifier, got {:?}", other),
        }
        assert_eq!(tokens[2].kind, TokenKind::LParen);
        assert_eq!(tokens[3].kind, TokenKind::RParen);
        assert_eq!(tokens[4].kind, TokenKind::LBrace);
        assert_eq!(tokens[5].kind, TokenKind::RBrace);
        assert_eq!(tokens[6].kind, TokenKind::Eof);
    }

    #[test]
    fn hex_literal_wraps_on_overflow() {
        let (tokens, _) = lex("0xFFFFFFFF;");
        assert_eq!(tokens[0].kind, TokenKind::IntLiteral(-1));
    }

    #[test]
    fn float_literal_parses_trailing_dot() {
        let (tokens, _) = lex("3.;");
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral(3.0));
    }

    #[test]
    fn string_literal_handles_escapes() {
        let (tokens, _) = lex("\"a\\nb\";");
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral("a\nb".to_string()));
    }

    #[test]
    fn compound_assignment_and_increment_operators() {
        let (tokens, _) = lex("x += 1; y++;");
        let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
        assert!(kinds.contains(&&TokenKind::PlusEq));
        assert!(kinds.contains(&&TokenKind::PlusPlus));
    }

    #[test]
    fn full_compound_assignment_set() {
        let (tokens, _) = lex("a %= 1; a <<= 1; a >>= 1; a >>>= 1; a &= 1; a |= 1; a ^= 1;");
        let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
        assert!(kinds.contains(&&TokenKind::PercentEq));
        assert!(kinds.contains(&&TokenKind::ShlEq));
        assert!(kinds.contains(&&TokenKind::ShrEq));
        assert!(kinds.contains(&&TokenKind::UShrEq));
        assert!(kinds.contains(&&TokenKind::AmpEq));
        assert!(kinds.contains(&&TokenKind::PipeEq));
        assert!(kinds.contains(&&TokenKind::CaretEq));
    }

    #[test]
    fn shift_operators_distinguish_signed_and_unsigned() {
        let (tokens, _) = lex("a << b; a >> b; a >>> b;");
        let kinds: Vec<_> = tokens.iter().map(|t| &t.kind).collect();
        assert!(kinds.contains(&&TokenKind::ShiftLeft));
        assert!(kinds.contains(&&TokenKind::ShiftRight));
        assert!(kinds.contains(&&TokenKind::UShiftRight));
    }

    #[test]
    fn pragma_default_function_carries_its_name_argument() {
        let (tokens, _) = lex("#PRAGMA default_function(Foo)\nvoid Foo();\n");
        let marker = tokens.iter().find(|t| t.kind == TokenKind::PragmaDefaultFunction).expect("pragma token");
        assert_eq!(marker.lexeme, "Foo");
    }

    #[test]
    fn pragma_pure_function_carries_its_name_argument() {
        let (tokens, _) = lex("#PRAGMA pure_function(Bar)\nint Bar();\n");
        let marker = tokens.iter().find(|t| t.kind == TokenKind::PragmaPureFunction).expect("pragma token");
        assert_eq!(marker.lexeme, "Bar");
    }

    #[test]
    fn malformed_pragma_default_function_is_dropped_with_a_warning() {
        let mut interner = Interner::new();
        let mut diags = DiagnosticSink::new("Error", 99);
        let tokens = {
            let mut lexer = Lexer::new("#PRAGMA default_function\nvoid Foo();\n", &mut interner);
            lexer.tokenize(&mut diags)
        };
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::PragmaDefaultFunction));
        assert!(!diags.has_errors());
        assert!(!diags.diagnostics().is_empty());
    }

    #[test]
    fn object_self_and_invalid_are_reserved_words() {
        let (tokens, _) = lex("OBJECT_SELF; OBJECT_INVALID;");
        assert_eq!(tokens[0].kind, TokenKind::ObjectSelfConst);
        assert_eq!(tokens[2].kind, TokenKind::ObjectInvalidConst);
    }
}
