//! Scoped symbol table with an isolation barrier
//!
//! A stack of name → entry maps. Lookups walk the scopes inside-out. A
//! scope may be pushed *isolated*: while the barrier is in place, entries
//! in scopes outside it are only visible when they are functions. This is
//! what keeps a function body from seeing its caller's variables while
//! still allowing calls to sibling and outer functions (including itself,
//! for recursion).
//!
//! The table is generic over the entry payload because the semantic
//! analyzer stores type information while the code generator stores frame
//! addresses.

use std::collections::HashMap;
use std::fmt;

/// Entry payloads tell the table whether they describe a function, which
/// is the one property lookups need for the isolation barrier.
pub trait ScopeEntry {
    fn is_function(&self) -> bool;
}

/// Lookup failure. The rendering is part of the compiler's user-visible
/// error surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub name: String,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The identifier \"{}\" was not found", self.name)
    }
}

impl std::error::Error for NotFound {}

pub struct SymbolTable<T> {
    scopes: Vec<HashMap<String, T>>,
    /// Level of the innermost isolated scope (1-based, counted from the
    /// root), or `None` when no barrier is in place.
    isolated_level: Option<usize>,
}

impl<T: ScopeEntry> SymbolTable<T> {
    pub fn new() -> Self {
        SymbolTable {
            scopes: Vec::new(),
            isolated_level: None,
        }
    }

    pub fn push_scope(&mut self, isolate: bool) {
        self.scopes.push(HashMap::new());
        if isolate {
            self.isolated_level = Some(self.scopes.len());
        }
    }

    /// Pop the innermost scope. Popping at or below the isolation level
    /// clears the barrier.
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        if let Some(level) = self.isolated_level
            && self.scopes.len() < level
        {
            self.isolated_level = None;
        }
    }

    /// Insert into the innermost scope. Returns false (and leaves the
    /// table untouched) when the name is already declared in that scope.
    pub fn insert(&mut self, name: &str, entry: T) -> bool {
        let scope = self.scopes.last_mut().expect("no open scope to insert into");
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), entry);
        true
    }

    /// Inside-out lookup honouring the isolation barrier: a match above
    /// the barrier is only returned when it is a function; otherwise the
    /// name counts as not found.
    pub fn lookup(&self, name: &str) -> Result<&T, NotFound> {
        let mut level = self.scopes.len();
        for scope in self.scopes.iter().rev() {
            if let Some(entry) = scope.get(name) {
                if let Some(isolated) = self.isolated_level
                    && level < isolated
                    && !entry.is_function()
                {
                    return Err(NotFound {
                        name: name.to_string(),
                    });
                }
                return Ok(entry);
            }
            level -= 1;
        }
        Err(NotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn in_root_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn isolation_level(&self) -> Option<usize> {
        self.isolated_level
    }
}

impl<T: ScopeEntry> Default for SymbolTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
