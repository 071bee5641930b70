//! Interned strings
//!
//! Names, property keys and string literals are interned once into an
//! `AtomTable` shared by every script of a runtime. Programs carry their own
//! atom texts and resolve them against the table when compiled.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to an interned string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(pub u32);

impl Atom {
    /// Raw table index
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom#{}", self.0)
    }
}

/// Read-only view of the atom table
pub trait AtomLookup: Send + Sync {
    /// Find the atom for `text`, if interned
    fn lookup(&self, text: &str) -> Option<Atom>;

    /// Text of an interned atom
    fn text(&self, atom: Atom) -> Option<Arc<str>>;
}

#[derive(Default)]
struct AtomTableInner {
    by_text: FxHashMap<Arc<str>, Atom>,
    texts: Vec<Arc<str>>,
}

/// Thread-safe string interner
#[derive(Default)]
pub struct AtomTable {
    inner: RwLock<AtomTableInner>,
}

impl AtomTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning its atom
    pub fn intern(&self, text: &str) -> Atom {
        if let Some(atom) = self.inner.read().by_text.get(text) {
            return *atom;
        }

        let mut inner = self.inner.write();
        // Raced with another writer
        if let Some(atom) = inner.by_text.get(text) {
            return *atom;
        }
        let atom = Atom(inner.texts.len() as u32);
        let text: Arc<str> = Arc::from(text);
        inner.texts.push(text.clone());
        inner.by_text.insert(text, atom);
        atom
    }

    /// Number of interned atoms
    pub fn len(&self) -> usize {
        self.inner.read().texts.len()
    }

    /// Check if nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AtomLookup for AtomTable {
    fn lookup(&self, text: &str) -> Option<Atom> {
        self.inner.read().by_text.get(text).copied()
    }

    fn text(&self, atom: Atom) -> Option<Arc<str>> {
        self.inner.read().texts.get(atom.0 as usize).cloned()
    }
}

impl fmt::Debug for AtomTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomTable").field("len", &self.len()).finish()
    }
}
