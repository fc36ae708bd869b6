//! NDB debug-symbol emitter: a line-oriented text format sitting
//! alongside the binary NCS, mapping instruction offsets back to source
//! file/line and naming local variables by stack offset. Never required
//! to run a script, only to debug one — producing it is always optional
//! and never perturbs the bytecode that was written.

use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub index: u32,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub start_offset: u32,
    pub end_offset: u32,
}

#[derive(Debug, Clone)]
pub struct LineEntry {
    pub instruction_offset: u32,
    pub file_index: u32,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub name: String,
    pub stack_offset: i32,
    pub scope_start: u32,
    pub scope_end: u32,
}

#[derive(Debug, Clone, Default)]
pub struct NdbWriter {
    files: Vec<FileEntry>,
    functions: Vec<FunctionEntry>,
    lines: Vec<LineEntry>,
    locals: Vec<LocalEntry>,
}

impl NdbWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>) -> u32 {
        let index = self.files.len() as u32;
        self.files.push(FileEntry {
            index,
            path: path.into(),
        });
        index
    }

    pub fn add_function(&mut self, name: impl Into<String>, start_offset: u32, end_offset: u32) {
        self.functions.push(FunctionEntry {
            name: name.into(),
            start_offset,
            end_offset,
        });
    }

    pub fn add_line(&mut self, instruction_offset: u32, file_index: u32, line: u32) {
        self.lines.push(LineEntry {
            instruction_offset,
            file_index,
            line,
        });
    }

    pub fn add_local(&mut self, name: impl Into<String>, stack_offset: i32, scope_start: u32, scope_end: u32) {
        self.locals.push(LocalEntry {
            name: name.into(),
            stack_offset,
            scope_start,
            scope_end,
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "NDB V1").unwrap();

        writeln!(out, "FILES {}", self.files.len()).unwrap();
        for f in &self.files {
            writeln!(out, "{} {}", f.index, f.path).unwrap();
        }

        writeln!(out, "FUNCTIONS {}", self.functions.len()).unwrap();
        for fun in &self.functions {
            writeln!(out, "{} {} {}", fun.start_offset, fun.end_offset, fun.name).unwrap();
        }

        writeln!(out, "LINES {}", self.lines.len()).unwrap();
        for l in &self.lines {
            writeln!(out, "{} {} {}", l.instruction_offset, l.file_index, l.line).unwrap();
        }

        writeln!(out, "LOCALS {}", self.locals.len()).unwrap();
        for v in &self.locals {
            writeln!(
                out,
                "{} {} {} {}",
                v.stack_offset, v.scope_start, v.scope_end, v.name
            )
            .unwrap();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_produces_section_headers_in_order() {
        let mut w = NdbWriter::new();
        w.add_file("test.nss");
        w.add_function("main", 13, 40);
        w.add_line(13, 0, 1);
        w.add_local("nCount", -4, 13, 40);

        let text = w.render();
        let idx_files = text.find("FILES").unwrap();
        let idx_funcs = text.find("FUNCTIONS").unwrap();
        let idx_lines = text.find("LINES").unwrap();
        let idx_locals = text.find("LOCALS").unwrap();
        assert!(idx_files < idx_funcs);
        assert!(idx_funcs < idx_lines);
        assert!(idx_lines < idx_locals);
        assert!(text.contains("main"));
        assert!(text.contains("nCount"));
    }
}
