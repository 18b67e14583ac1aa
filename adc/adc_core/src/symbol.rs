//! Capability symbol space.
//!
//! A [`SymbolTable`] maps capability names to canonical [`CapabilityId`]
//! tokens. Interning the same name twice always yields the same token, no
//! matter which module asks or when. Tokens are never removed, so the table
//! grows with the number of distinct names ever referenced and nothing else.
//!
//! The table is an ordinary value: the kernel owns one behind an `Arc` and
//! hands it to every module context. Tests build a fresh table per run.
//!
//! ```
//! use adc_core::SymbolTable;
//!
//! let symbols = SymbolTable::new();
//! let a = symbols.intern("storage");
//! let b = symbols.intern("storage");
//! assert_eq!(a, b);
//! assert_eq!(symbols.resolve(a).as_deref(), Some("storage"));
//! assert_ne!(a, symbols.intern("Storage"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

static NEXT_TABLE: AtomicU32 = AtomicU32::new(1);

/// Opaque identity token of a capability.
///
/// Tokens carry the serial of the table that minted them, so tokens from two
/// different tables never compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId {
    table: u32,
    index: u32,
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityId({}:{})", self.table, self.index)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cap#{}.{}", self.table, self.index)
    }
}

#[derive(Default)]
struct Symbols {
    by_name: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

/// Process-wide intern table for capability names.
pub struct SymbolTable {
    serial: u32,
    symbols: RwLock<Symbols>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            serial: NEXT_TABLE.fetch_add(1, Ordering::Relaxed),
            symbols: RwLock::new(Symbols::default()),
        }
    }

    /// Return the canonical identity for `name`, minting it on first use.
    pub fn intern(&self, name: &str) -> CapabilityId {
        if let Some(id) = self.lookup(name) {
            return id;
        }

        let mut symbols = self.symbols.write();
        // Another caller may have won the race between the two locks.
        if let Some(&index) = symbols.by_name.get(name) {
            return self.token(index);
        }

        let index = symbols.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        symbols.names.push(name.clone());
        symbols.by_name.insert(name, index);
        self.token(index)
    }

    /// Identity for `name` if it has already been interned.
    pub fn lookup(&self, name: &str) -> Option<CapabilityId> {
        self.symbols
            .read()
            .by_name
            .get(name)
            .map(|&index| self.token(index))
    }

    /// Name behind an identity. Diagnostic use only.
    pub fn resolve(&self, id: CapabilityId) -> Option<Arc<str>> {
        if id.table != self.serial {
            return None;
        }
        self.symbols.read().names.get(id.index as usize).cloned()
    }

    /// Name behind an identity, or the token's display form.
    pub fn describe(&self, id: CapabilityId) -> String {
        self.resolve(id)
            .map(|name| name.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// Number of distinct names interned so far.
    pub fn len(&self) -> usize {
        self.symbols.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn token(&self, index: u32) -> CapabilityId {
        CapabilityId {
            table: self.serial,
            index,
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("serial", &self.serial)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_is_stable() {
        let table = SymbolTable::new();
        let first = table.intern("message-queue");
        table.intern("storage");
        let second = table.intern("message-queue");

        assert_eq!(first, second);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_distinct_names_get_distinct_ids() {
        let table = SymbolTable::new();
        assert_ne!(table.intern("cache"), table.intern("cach"));
    }

    #[test]
    fn test_lookup_does_not_intern() {
        let table = SymbolTable::new();
        assert!(table.lookup("http").is_none());
        assert!(table.is_empty());

        let id = table.intern("http");
        assert_eq!(table.lookup("http"), Some(id));
    }

    #[test]
    fn test_tokens_are_scoped_to_their_table() {
        let a = SymbolTable::new();
        let b = SymbolTable::new();
        let from_a = a.intern("storage");
        let from_b = b.intern("storage");

        assert_ne!(from_a, from_b);
        assert!(b.resolve(from_a).is_none());
        assert_eq!(a.describe(from_a), "storage");
    }

    #[test]
    fn test_concurrent_interning_converges() {
        let table = Arc::new(SymbolTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|i| table.intern(&format!("cap-{}", i % 10)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<CapabilityId>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
        assert_eq!(table.len(), 10);
    }
}
