//! Geometry and material interning tables
//!
//! Per-object records reference geometry and materials by integer index
//! into two tree-wide tables, keeping serialized records small. The
//! same tables feed the static-instancing consolidator, which groups
//! objects by `(geometry, material)` id pairs.

use std::collections::HashMap;

/// Interned geometry reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryId(pub u32);

/// Interned material reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// String-keyed interning table with stable integer indices
#[derive(Debug, Clone, Default)]
pub struct InternTable {
    entries: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl InternTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a key, returning its stable index
    pub fn intern(&mut self, key: &str) -> u32 {
        if let Some(&id) = self.lookup.get(key) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(key.to_owned());
        self.lookup.insert(key.to_owned(), id);
        id
    }

    /// Resolve an index back to its key
    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(String::as_str)
    }

    /// Number of interned entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order, for serialization
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Rebuild a table from deserialized entries
    pub fn from_entries(entries: Vec<String>) -> Self {
        let lookup = entries
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), i as u32))
            .collect();
        Self { entries, lookup }
    }
}
