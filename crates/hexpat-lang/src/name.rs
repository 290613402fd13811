// Interned identifiers
//
// Every identifier the lexer produces is interned once; the parser, validator and
// evaluator pass the resulting `Name` around by value and compare it as an integer.

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// An interned identifier. Resolve it through the `StringInterner` that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

/// Maps identifier strings to `Name`s and back.
#[derive(Clone, Default)]
pub struct StringInterner {
    strings: Vec<Arc<str>>,
    lookup: FxHashMap<Arc<str>, u32>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning the existing `Name` when it was seen before.
    #[inline]
    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(&idx) = self.lookup.get(s) {
            return Name(idx);
        }
        let idx = self.strings.len() as u32;
        let arc: Arc<str> = Arc::from(s);
        self.strings.push(arc.clone());
        self.lookup.insert(arc, idx);
        Name(idx)
    }

    /// Look up a string without interning it.
    pub fn lookup(&self, s: &str) -> Option<Name> {
        self.lookup.get(s).map(|&idx| Name(idx))
    }

    /// Resolve a `Name` back to its text. Names from a foreign interner resolve to "".
    #[inline]
    pub fn resolve(&self, name: Name) -> &str {
        self.strings.get(name.0 as usize).map_or("", |s| s)
    }

    /// Join a qualified path (`std::mem::size`) back into its `::` form.
    pub fn resolve_path(&self, path: &[Name]) -> String {
        let mut out = String::new();
        for (i, part) in path.iter().enumerate() {
            if i > 0 {
                out.push_str("::");
            }
            out.push_str(self.resolve(*part));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_dedup() {
        let mut interner = StringInterner::new();
        let a = interner.intern("header");
        let b = interner.intern("header");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_name_resolve() {
        let mut interner = StringInterner::new();
        let name = interner.intern("magic");
        assert_eq!(interner.resolve(name), "magic");
        assert_eq!(interner.lookup("magic"), Some(name));
        assert_eq!(interner.lookup("other"), None);
    }

    #[test]
    fn test_resolve_foreign_name_is_empty() {
        let mut a = StringInterner::new();
        let b = StringInterner::new();
        let name = a.intern("x");
        assert_eq!(b.resolve(name), "");
    }

    #[test]
    fn test_resolve_path() {
        let mut interner = StringInterner::new();
        let path = [
            interner.intern("std"),
            interner.intern("mem"),
            interner.intern("size"),
        ];
        assert_eq!(interner.resolve_path(&path), "std::mem::size");
        assert_eq!(interner.resolve_path(&path[2..]), "size");
    }
}
