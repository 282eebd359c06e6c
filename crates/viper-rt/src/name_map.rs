//! Resolves a source-level extern name to its catalog entry, honoring the
//! dual-namespace compatibility policy (§4.7, Open Question resolved in
//! favor of maximum compatibility on load and a single canonical form on
//! emit): accepting legacy `rt_*` names as input aliases is a loader
//! convenience, never something we want re-surfacing in output IL.

use crate::catalog::{self, RuntimeEntry};

/// `allow_rt_aliases` defaults on for loading existing IL (so modules
/// written against an older toolchain that named externs by ABI symbol
/// still resolve) and must be turned off before emitting, since canonical
/// `Viper.*` names are always what gets printed.
#[derive(Debug, Clone, Copy)]
pub struct NameMap {
    pub allow_rt_aliases: bool,
}

impl Default for NameMap {
    fn default() -> Self {
        Self::for_load()
    }
}

impl NameMap {
    pub fn for_load() -> Self {
        Self { allow_rt_aliases: true }
    }

    pub fn for_emit() -> Self {
        Self { allow_rt_aliases: false }
    }

    /// Resolves `name` (as it appeared in source IL, with or without the
    /// `@` symbol sigil) to its catalog row.
    pub fn resolve(&self, name: &str) -> Option<&'static RuntimeEntry> {
        let name = name.strip_prefix('@').unwrap_or(name);
        if let Some(e) = catalog::by_canonical(name) {
            return Some(e);
        }
        if self.allow_rt_aliases {
            return catalog::by_abi_symbol(name);
        }
        None
    }

    /// The name that must appear in emitted IL for `entry` — always
    /// canonical, regardless of how the module resolved it on load.
    pub fn canonical_for_emit(&self, entry: &RuntimeEntry) -> &'static str {
        entry.canonical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_accepts_both_canonical_and_legacy_names() {
        let nm = NameMap::for_load();
        assert!(nm.resolve("Viper.Console.PrintI64").is_some());
        assert!(nm.resolve("rt_print_i64").is_some());
    }

    #[test]
    fn emit_rejects_legacy_names() {
        let nm = NameMap::for_emit();
        assert!(nm.resolve("Viper.Console.PrintI64").is_some());
        assert!(nm.resolve("rt_print_i64").is_none());
    }

    #[test]
    fn canonical_for_emit_is_always_the_viper_name() {
        let nm = NameMap::for_load();
        let e = nm.resolve("rt_concat").unwrap();
        assert_eq!(nm.canonical_for_emit(e), "Viper.Strings.Concat");
    }
}
