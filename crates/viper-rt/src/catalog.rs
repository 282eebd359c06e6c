//! The declarative runtime catalog (C7): one row per core extern, generating
//! the name map, the verifier's signature metadata, and the bridge's forward
//! declarations from a single source of truth instead of three hand-kept
//! lists.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use viper_il::Ty;

/// One catalog row. `class` groups entries for OO-style dispatch metadata
/// (`Console`, `Strings`, `Convert`, `Memory`, ...); it is the first segment
/// of `canonical`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeEntry {
    pub canonical: &'static str,
    pub abi_symbol: &'static str,
    pub class: &'static str,
    pub ret: Ty,
    pub params: &'static [Ty],
}

/// Core externs every VM or codegen targeting this IL must have available
/// (§6). Not exhaustive — a host may register more through the same
/// mechanism — but this set is always present.
pub static CATALOG: &[RuntimeEntry] = &[
    RuntimeEntry { canonical: "Viper.Console.PrintI64", abi_symbol: "rt_print_i64", class: "Console", ret: Ty::Void, params: &[Ty::I64] },
    RuntimeEntry { canonical: "Viper.Console.PrintF64", abi_symbol: "rt_print_f64", class: "Console", ret: Ty::Void, params: &[Ty::F64] },
    RuntimeEntry { canonical: "Viper.Console.PrintStr", abi_symbol: "rt_print_str", class: "Console", ret: Ty::Void, params: &[Ty::Str] },
    RuntimeEntry { canonical: "Viper.Console.ReadLine", abi_symbol: "rt_read_line", class: "Console", ret: Ty::Str, params: &[] },
    RuntimeEntry { canonical: "Viper.Strings.Concat", abi_symbol: "rt_concat", class: "Strings", ret: Ty::Str, params: &[Ty::Str, Ty::Str] },
    RuntimeEntry { canonical: "Viper.Strings.Len", abi_symbol: "rt_strlen", class: "Strings", ret: Ty::I64, params: &[Ty::Str] },
    RuntimeEntry { canonical: "Viper.Strings.Mid", abi_symbol: "rt_mid", class: "Strings", ret: Ty::Str, params: &[Ty::Str, Ty::I64, Ty::I64] },
    RuntimeEntry { canonical: "Viper.Strings.FromInt", abi_symbol: "rt_from_int", class: "Strings", ret: Ty::Str, params: &[Ty::I64] },
    RuntimeEntry { canonical: "Viper.Strings.FromDouble", abi_symbol: "rt_from_double", class: "Strings", ret: Ty::Str, params: &[Ty::F64] },
    RuntimeEntry { canonical: "Viper.Convert.ToInt", abi_symbol: "rt_to_int", class: "Convert", ret: Ty::I64, params: &[Ty::Str] },
    RuntimeEntry { canonical: "Viper.Convert.ToDouble", abi_symbol: "rt_to_double", class: "Convert", ret: Ty::F64, params: &[Ty::Str] },
    RuntimeEntry { canonical: "Viper.Memory.Alloc", abi_symbol: "rt_alloc", class: "Memory", ret: Ty::Ptr, params: &[Ty::I64] },
];

static BY_CANONICAL: Lazy<FxHashMap<&'static str, &'static RuntimeEntry>> =
    Lazy::new(|| CATALOG.iter().map(|e| (e.canonical, e)).collect());

static BY_ABI_SYMBOL: Lazy<FxHashMap<&'static str, &'static RuntimeEntry>> =
    Lazy::new(|| CATALOG.iter().map(|e| (e.abi_symbol, e)).collect());

pub fn by_canonical(name: &str) -> Option<&'static RuntimeEntry> {
    BY_CANONICAL.get(name).copied()
}

pub fn by_abi_symbol(name: &str) -> Option<&'static RuntimeEntry> {
    BY_ABI_SYMBOL.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_row_resolves_both_directions() {
        for e in CATALOG {
            assert_eq!(by_canonical(e.canonical).unwrap().abi_symbol, e.abi_symbol);
            assert_eq!(by_abi_symbol(e.abi_symbol).unwrap().canonical, e.canonical);
        }
    }
}
