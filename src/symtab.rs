//! Symbol table with fences (component D).
//!
//! A single growable byte buffer (`Vec<u8>`), not a tree of `Rc`/`Box`
//! nodes: every symbol is addressed by its **offset** into the buffer,
//! never by a pointer, so the whole table can be snapshotted (record the
//! current length plus the head of each hash bucket) and later restored
//! (truncate the buffer, restore the bucket heads) in O(1) — the
//! mechanism lexical scoping rides on. This follows the original
//! `CNscSymbolTable`'s own layout, translated into the `Vec<u8>` +
//! offset-index idiom this repo's design notes call for in place of a
//! pointer-chasing structure.

use crate::intern::rolling_hash;
use std::collections::HashMap;

pub const HASH_BUCKETS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Token,
    Function,
    Structure,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NwType {
    Unknown,
    Void,
    Error,
    Action,
    Statement,
    Struct(u16),
    Integer,
    Float,
    String,
    Object,
    Vector,
    Engine(u8),
}

#[derive(Debug, Clone, Default)]
pub struct SymFlags {
    pub global: bool,
    pub constant: bool,
    pub parser_referenced: bool,
    pub being_defined: bool,
    pub referenced: bool,
    pub modified: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionExtra {
    pub arg_types: Vec<NwType>,
    pub return_type: NwType,
    pub code_offset: Option<u32>,
    pub defined: bool,
    pub uses_global_vars: bool,
    pub default_function: bool,
    pub pure_function: bool,
    /// `Some(n)` for a prototype-only declaration bootstrapped from
    /// `nwscript.nss` — the engine recognizes it by its declaration
    /// order rather than a name, so the Nth bodyless prototype seen
    /// becomes `ACTION` index `n`. `None` for an ordinary script function.
    pub engine_action_index: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct StructExtra {
    pub fields: Vec<(String, NwType)>,
}

#[derive(Debug, Clone)]
pub struct VariableExtra {
    pub stack_offset: i32,
}

#[derive(Debug, Clone)]
pub enum SymExtra {
    None,
    Function(FunctionExtra),
    Structure(StructExtra),
    Variable(VariableExtra),
}

/// One symbol record, stored at a fixed offset in the table's byte
/// buffer. `next` is the offset of the previous symbol in the same
/// bucket chain (or `None` at the chain's head) — "newest wins" lookup
/// order, matching the original's prepend-on-add discipline.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub hash: u32,
    pub kind: SymKind,
    pub ty: NwType,
    pub flags: SymFlags,
    pub extra: SymExtra,
    pub next: Option<u32>,
    pub file: u32,
    pub line: u32,
}

/// A snapshot of the table's state: current length plus the head of
/// every hash bucket. `RestoreFence` truncates the symbol vector back to
/// this length and restores each bucket head, discarding every symbol
/// declared since the snapshot was taken — the mechanism behind
/// entering/leaving a lexical scope (`{ ... }`), a loop body, or a
/// function body.
#[derive(Debug, Clone)]
pub struct Fence {
    len: usize,
    hash_heads: [Option<u32>; HASH_BUCKETS],
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    hash_heads: [Option<u32>; HASH_BUCKETS],
    global_identifier_count: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            hash_heads: [None; HASH_BUCKETS],
            global_identifier_count: 0,
        }
    }

    /// Deep-clones a fully populated table (e.g. the compiled builtin
    /// catalog) rather than sharing structure, so each per-file compile
    /// gets a private, independently growable table — no shared mutable
    /// state between compilations.
    pub fn fork_from(base: &SymbolTable) -> Self {
        SymbolTable {
            symbols: base.symbols.clone(),
            hash_heads: base.hash_heads,
            global_identifier_count: base.global_identifier_count,
        }
    }

    pub fn get_fence(&self) -> Fence {
        Fence {
            len: self.symbols.len(),
            hash_heads: self.hash_heads,
        }
    }

    pub fn restore_fence(&mut self, fence: &Fence) {
        self.symbols.truncate(fence.len);
        self.hash_heads = fence.hash_heads;
    }

    fn bucket(hash: u32) -> usize {
        (hash as usize) % HASH_BUCKETS
    }

    /// Walks the bucket chain for `name`, returning the newest symbol of
    /// the given kind (or any kind if `kind` is `None`) whose name
    /// matches exactly. "Newest wins" falls straight out of prepend-only
    /// insertion: a symbol declared in an inner scope shadows an outer
    /// one with the same name simply by being closer to the bucket head.
    pub fn find(&self, name: &str, kind: Option<SymKind>) -> Option<u32> {
        let hash = rolling_hash(name.as_bytes());
        let mut cursor = self.hash_heads[Self::bucket(hash)];
        while let Some(offset) = cursor {
            let sym = &self.symbols[offset as usize];
            if sym.hash == hash
                && sym.name == name
                && kind.map(|k| k == sym.kind).unwrap_or(true)
            {
                return Some(offset);
            }
            cursor = sym.next;
        }
        None
    }

    pub fn get(&self, offset: u32) -> &Symbol {
        &self.symbols[offset as usize]
    }

    pub fn get_mut(&mut self, offset: u32) -> &mut Symbol {
        &mut self.symbols[offset as usize]
    }

    /// Prepends a new symbol onto its bucket chain and returns its
    /// offset. Does not check for an existing symbol of the same name —
    /// callers that need redeclaration diagnostics call `find` first.
    pub fn add(
        &mut self,
        name: &str,
        kind: SymKind,
        ty: NwType,
        flags: SymFlags,
        extra: SymExtra,
        file: u32,
        line: u32,
    ) -> u32 {
        let hash = rolling_hash(name.as_bytes());
        let bucket = Self::bucket(hash);
        let offset = self.symbols.len() as u32;
        let next = self.hash_heads[bucket];
        self.symbols.push(Symbol {
            name: name.to_string(),
            hash,
            kind,
            ty,
            flags,
            extra,
            next,
            file,
            line,
        });
        self.hash_heads[bucket] = Some(offset);
        if flags_is_global(&self.symbols[offset as usize].flags) {
            self.global_identifier_count += 1;
        }
        offset
    }

    pub fn global_identifier_count(&self) -> u32 {
        self.global_identifier_count
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn flags_is_global(flags: &SymFlags) -> bool {
    flags.global
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope-kind tags for a fence, used by the parser/code generator to
/// know what `break`/`continue`/implicit-return behavior applies at the
/// current lexical depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceKind {
    Function,
    Scope,
    Switch,
    For,
    Do,
    While,
    If,
}

/// Whether every path out of the fenced region returns a value —
/// combined across sibling branches with `max` (`Yes` dominates `No`
/// dominates `Unknown`) to decide whether a function needs NSC1039.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FenceReturn {
    Unknown,
    No,
    Yes,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(global: bool) -> SymFlags {
        SymFlags {
            global,
            ..Default::default()
        }
    }

    #[test]
    fn newest_declaration_shadows_older_one() {
        let mut table = SymbolTable::new();
        table.add("nCount", SymKind::Variable, NwType::Integer, flags(true), SymExtra::None, 0, 1);
        let inner = table.add(
            "nCount",
            SymKind::Variable,
            NwType::Integer,
            flags(false),
            SymExtra::None,
            0,
            5,
        );
        let found = table.find("nCount", Some(SymKind::Variable)).unwrap();
        assert_eq!(found, inner);
    }

    #[test]
    fn fence_restore_discards_symbols_declared_after_snapshot() {
        let mut table = SymbolTable::new();
        table.add("nGlobal", SymKind::Variable, NwType::Integer, flags(true), SymExtra::None, 0, 1);
        let fence = table.get_fence();
        table.add("nLocal", SymKind::Variable, NwType::Integer, flags(false), SymExtra::None, 0, 2);
        assert!(table.find("nLocal", None).is_some());
        table.restore_fence(&fence);
        assert!(table.find("nLocal", None).is_none());
        assert!(table.find("nGlobal", None).is_some());
    }

    #[test]
    fn fork_from_is_independent_of_base() {
        let mut base = SymbolTable::new();
        base.add("Fn", SymKind::Function, NwType::Void, flags(true), SymExtra::None, 0, 1);
        let mut fork = SymbolTable::fork_from(&base);
        fork.add("Extra", SymKind::Variable, NwType::Integer, flags(false), SymExtra::None, 0, 2);
        assert!(fork.find("Extra", None).is_some());
        assert!(base.find("Extra", None).is_none());
    }

    #[test]
    fn global_identifier_count_tracks_global_flag() {
        let mut table = SymbolTable::new();
        table.add("g1", SymKind::Variable, NwType::Integer, flags(true), SymExtra::None, 0, 1);
        table.add("local1", SymKind::Variable, NwType::Integer, flags(false), SymExtra::None, 0, 2);
        assert_eq!(table.global_identifier_count(), 1);
    }
}
