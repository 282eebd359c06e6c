//! Dense integer handles used in place of the raw pointers the source
//! contract uses between `Module -> Function -> BasicBlock -> Instruction`
//! (see Design Notes, §9). Using arena indices instead of pointers keeps the
//! graph acyclic and makes the dominance/verification passes cache-friendly.

use std::fmt;

macro_rules! dense_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(idx: u32) -> Self {
                Self(idx)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<usize> for $name {
            fn from(idx: usize) -> Self {
                Self(idx as u32)
            }
        }
    };
}

dense_id!(FuncId, "f");
dense_id!(BlockId, "b");
dense_id!(TempId, "%");
dense_id!(InstrId, "i");

/// An interned string handle. Symbols are only ever compared by their raw
/// index; the owning `Interner` is the sole place a `Symbol` is resolved
/// back to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

/// Per-module string interner. Construction operations on `Value` never
/// allocate: a global/extern/function reference is a `Symbol`, a plain u32.
#[derive(Debug, Clone, Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: rustc_hash::FxHashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(s) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(s.into());
        self.lookup.insert(s.into(), sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }

    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        self.lookup.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut i = Interner::new();
        let a = i.intern("@Viper.Console.PrintI64");
        let b = i.intern("@Viper.Console.PrintI64");
        assert_eq!(a, b);
        assert_eq!(i.resolve(a), "@Viper.Console.PrintI64");
    }

    #[test]
    fn distinct_strings_get_distinct_symbols() {
        let mut i = Interner::new();
        let a = i.intern("@a");
        let b = i.intern("@b");
        assert_ne!(a, b);
    }

    #[test]
    fn display_formats_match_teacher_style() {
        assert_eq!(format!("{}", TempId(3)), "%3");
        assert_eq!(format!("{}", BlockId(0)), "b0");
    }
}
