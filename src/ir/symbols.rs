//! Symbol table for the IR.
//!
//! Stores every name used by the module (variables, functions, struct
//! members, synthesized helpers) exactly once. Passes that synthesize
//! declarations go through [`SymbolTable::unique`] so colliding names
//! get a deterministic numeric suffix instead of shadowing an existing
//! declaration.

use rustc_hash::FxHashMap;

/// A unique identifier for an interned name, represented as a u32 for
/// memory efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// Primary storage: ID -> name mapping for fast resolution
    names: Vec<String>,

    /// Reverse lookup: name -> ID mapping for fast interning
    name_to_id: FxHashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning its unique ID.
    /// If the name already exists, returns the existing ID.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&existing) = self.name_to_id.get(name) {
            return existing;
        }

        let id = Symbol(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.name_to_id.insert(name.to_owned(), id);
        id
    }

    /// Intern a name that must not collide with any already-interned
    /// name. On collision the name gets a numeric suffix: `x` becomes
    /// `x_1`, then `x_2`, and so on. Deterministic for a given table
    /// state.
    pub fn unique(&mut self, base: &str) -> Symbol {
        if !self.name_to_id.contains_key(base) {
            return self.intern(base);
        }

        let mut suffix = 1u32;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !self.name_to_id.contains_key(&candidate) {
                return self.intern(&candidate);
            }
            suffix += 1;
        }
    }

    /// Resolve a symbol back to its name.
    ///
    /// # Panics
    /// Panics if the symbol was not created by this table.
    pub fn resolve(&self, id: Symbol) -> &str {
        self.names
            .get(id.0 as usize)
            .map(|s| s.as_str())
            .unwrap_or_else(|| panic!("Invalid Symbol: {}", id.0))
    }

    /// Check whether a name is already interned without interning it.
    pub fn get_existing(&self, name: &str) -> Option<Symbol> {
        self.name_to_id.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
