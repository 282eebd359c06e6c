//! The runtime bridge (C9): a type-directed thunk layer between VM values
//! and the host functions backing each catalog extern. No C compiler is
//! invoked by this core, so each thunk is realized as a plain Rust function
//! with the marshaling contract a C-ABI call would have: the declared
//! parameter types drive how a value crosses the boundary, and a malformed
//! call traps instead of panicking or returning garbage.
//!
//! A runtime-side trap is modeled the way §4.9 describes it conceptually —
//! the callee sets a flag that the bridge observes on return — realized
//! here as `Result::Err`, which is the idiomatic Rust shape of exactly that
//! protocol: the callee can't unwind past the boundary, so the flag and the
//! bridge's check of it collapse into one return value.

use std::cell::RefCell;
use std::io::{self, Write};

use thiserror::Error;
use viper_il::Ty;

use crate::catalog::{self, RuntimeEntry};

/// The closed set of trap kinds the VM's `error` record can carry (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    DivideByZero,
    Overflow,
    InvalidCast,
    NullPointer,
    Misaligned,
    BadIndex,
    OutOfMemory,
    User,
    InvalidOperation,
}

/// A value crossing the VM/runtime boundary. Distinct from `viper_il::Value`
/// (which also represents unresolved constants and symbolic references)
/// because the bridge only ever sees concrete, already-evaluated operands.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Void,
    I64(i64),
    F64(f64),
    Str(String),
    Ptr(u64),
}

impl HostValue {
    pub fn ty(&self) -> Ty {
        match self {
            HostValue::Void => Ty::Void,
            HostValue::I64(_) => Ty::I64,
            HostValue::F64(_) => Ty::F64,
            HostValue::Str(_) => Ty::Str,
            HostValue::Ptr(_) => Ty::Ptr,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("unresolved runtime symbol {0}")]
    UnknownSymbol(String),
    #[error("runtime call to {0}: expected {1} argument(s), got {2}")]
    Arity(&'static str, usize, usize),
    #[error("runtime call to {0}: argument {1} does not match its declared type")]
    ArgType(&'static str, usize),
}

/// Backs every catalog extern with a Rust-native implementation, and owns
/// the host-side heap behind `Viper.Memory.Alloc`. Stdin/stdout are the only
/// other externally observable state, and are each touched in IL program
/// order, preserving the determinism guarantee (§4.8).
pub struct Bridge {
    heap: RefCell<Vec<u8>>,
    out: RefCell<Box<dyn Write>>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Builds a bridge writing `Print*` output to `out` instead of the
    /// process's real stdout — what a driver uses in-process and what
    /// tests use to observe output without a subprocess.
    pub fn with_writer(out: Box<dyn Write>) -> Self {
        // Reserve offset 0 so a returned pointer of 1 can never collide
        // with `const_null`'s all-zero representation.
        Self { heap: RefCell::new(vec![0u8]), out: RefCell::new(out) }
    }

    /// Resolves `canonical_or_alias` through `name_map` and invokes the
    /// corresponding host function, marshaling `args` against the catalog's
    /// declared parameter types first.
    pub fn call(
        &self,
        name_map: &crate::name_map::NameMap,
        canonical_or_alias: &str,
        args: &[HostValue],
    ) -> Result<Result<HostValue, TrapKind>, BridgeError> {
        let entry = name_map
            .resolve(canonical_or_alias)
            .ok_or_else(|| BridgeError::UnknownSymbol(canonical_or_alias.to_string()))?;
        self.check_signature(entry, args)?;
        Ok(self.dispatch(entry, args))
    }

    fn check_signature(&self, entry: &RuntimeEntry, args: &[HostValue]) -> Result<(), BridgeError> {
        if args.len() != entry.params.len() {
            return Err(BridgeError::Arity(entry.canonical, entry.params.len(), args.len()));
        }
        for (i, (want, got)) in entry.params.iter().zip(args).enumerate() {
            if got.ty() != *want {
                return Err(BridgeError::ArgType(entry.canonical, i));
            }
        }
        Ok(())
    }

    fn dispatch(&self, entry: &RuntimeEntry, args: &[HostValue]) -> Result<HostValue, TrapKind> {
        match entry.abi_symbol {
            "rt_print_i64" => {
                let HostValue::I64(v) = &args[0] else { unreachable!() };
                self.write_raw(&v.to_string());
                Ok(HostValue::Void)
            }
            "rt_print_f64" => {
                let HostValue::F64(v) = &args[0] else { unreachable!() };
                self.write_raw(&format_f64(*v));
                Ok(HostValue::Void)
            }
            "rt_print_str" => {
                let HostValue::Str(v) = &args[0] else { unreachable!() };
                self.write_raw(v);
                Ok(HostValue::Void)
            }
            "rt_read_line" => {
                let mut line = String::new();
                match io::stdin().read_line(&mut line) {
                    Ok(0) => Ok(HostValue::Str(String::new())),
                    Ok(_) => {
                        if line.ends_with('\n') {
                            line.pop();
                            if line.ends_with('\r') {
                                line.pop();
                            }
                        }
                        Ok(HostValue::Str(line))
                    }
                    Err(_) => Ok(HostValue::Str(String::new())),
                }
            }
            "rt_concat" => {
                let (HostValue::Str(a), HostValue::Str(b)) = (&args[0], &args[1]) else { unreachable!() };
                Ok(HostValue::Str(format!("{a}{b}")))
            }
            "rt_strlen" => {
                let HostValue::Str(s) = &args[0] else { unreachable!() };
                Ok(HostValue::I64(s.chars().count() as i64))
            }
            "rt_mid" => {
                let (HostValue::Str(s), HostValue::I64(start), HostValue::I64(len)) = (&args[0], &args[1], &args[2]) else { unreachable!() };
                Ok(HostValue::Str(mid(s, *start, *len)))
            }
            "rt_from_int" => {
                let HostValue::I64(v) = &args[0] else { unreachable!() };
                Ok(HostValue::Str(v.to_string()))
            }
            "rt_from_double" => {
                let HostValue::F64(v) = &args[0] else { unreachable!() };
                Ok(HostValue::Str(format_f64(*v)))
            }
            "rt_to_int" => {
                let HostValue::Str(s) = &args[0] else { unreachable!() };
                s.trim().parse::<i64>().map(HostValue::I64).map_err(|_| TrapKind::InvalidCast)
            }
            "rt_to_double" => {
                let HostValue::Str(s) = &args[0] else { unreachable!() };
                s.trim().parse::<f64>().map(HostValue::F64).map_err(|_| TrapKind::InvalidCast)
            }
            "rt_alloc" => {
                let HostValue::I64(n) = &args[0] else { unreachable!() };
                if *n < 0 {
                    return Err(TrapKind::OutOfMemory);
                }
                let mut heap = self.heap.borrow_mut();
                let addr = heap.len() as u64;
                heap.resize(heap.len() + *n as usize, 0);
                Ok(HostValue::Ptr(addr))
            }
            other => unreachable!("catalog entry {other} has no dispatch arm"),
        }
    }

    /// No implicit newline: the host contract is "write exactly these
    /// bytes", leaving line framing to the frontend's own `PrintStr`
    /// argument construction — the same contract the VM's determinism
    /// guarantee (§4.8) depends on.
    fn write_raw(&self, s: &str) {
        let mut out = self.out.borrow_mut();
        let _ = write!(out, "{s}");
    }
}

fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.is_finite() {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// BASIC-style `MID$`: 1-indexed, clamped rather than trapping on a range
/// that runs past the end of the string.
fn mid(s: &str, start: i64, len: i64) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start0 = (start - 1).max(0) as usize;
    if start0 >= chars.len() || len <= 0 {
        return String::new();
    }
    let end = (start0 + len as usize).min(chars.len());
    chars[start0..end].iter().collect()
}

/// Registers every catalog row as an extern on `b`, under its canonical
/// `@Viper.*` name — the form every call site's symbol resolves against.
pub fn declare_all(b: &mut viper_il::ModuleBuilder) -> Result<(), viper_il::BuilderError> {
    for e in catalog::CATALOG {
        b.declare_extern(&format!("@{}", e.canonical), e.ret, e.params.to_vec())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_map::NameMap;

    #[test]
    fn concat_and_len_round_trip() {
        let bridge = Bridge::new();
        let nm = NameMap::for_load();
        let r = bridge.call(&nm, "Viper.Strings.Concat", &[HostValue::Str("foo".into()), HostValue::Str("bar".into())]).unwrap().unwrap();
        assert_eq!(r, HostValue::Str("foobar".into()));
        let r = bridge.call(&nm, "Viper.Strings.Len", &[HostValue::Str("foobar".into())]).unwrap().unwrap();
        assert_eq!(r, HostValue::I64(6));
    }

    #[test]
    fn to_int_traps_on_malformed_input() {
        let bridge = Bridge::new();
        let nm = NameMap::for_load();
        let r = bridge.call(&nm, "Viper.Convert.ToInt", &[HostValue::Str("not a number".into())]).unwrap();
        assert_eq!(r, Err(TrapKind::InvalidCast));
    }

    #[test]
    fn alloc_traps_on_negative_size() {
        let bridge = Bridge::new();
        let nm = NameMap::for_load();
        let r = bridge.call(&nm, "Viper.Memory.Alloc", &[HostValue::I64(-1)]).unwrap();
        assert_eq!(r, Err(TrapKind::OutOfMemory));
    }

    #[test]
    fn alloc_never_returns_the_null_address() {
        let bridge = Bridge::new();
        let nm = NameMap::for_load();
        let r = bridge.call(&nm, "Viper.Memory.Alloc", &[HostValue::I64(8)]).unwrap().unwrap();
        assert_ne!(r, HostValue::Ptr(0));
    }

    #[test]
    fn wrong_arity_is_a_bridge_error_not_a_panic() {
        let bridge = Bridge::new();
        let nm = NameMap::for_load();
        let err = bridge.call(&nm, "Viper.Strings.Len", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Arity("Viper.Strings.Len", 1, 0)));
    }
}
