//! Runtime values (C8). Distinct from `viper_il::Value`, which is use-site
//! operand syntax (temps, unresolved constants, symbolic references) — these
//! are the concrete, already-evaluated values a register file actually
//! holds.

use viper_il::Ty;
use viper_rt::TrapKind;

/// An opaque instruction address: which block and which position within
/// that block's combined instruction-then-terminator sequence. This is the
/// payload a `resumetok` carries, and what the `error` record's `ip` field
/// reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrAddr {
    pub func: viper_il::FuncId,
    pub block: viper_il::BlockId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: TrapKind,
    pub code: i32,
    pub ip: InstrAddr,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    pub trap_ip: InstrAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    I1(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Ptr(u64),
    Str(String),
    Error(ErrorRecord),
    ResumeTok(ResumeToken),
}

impl RtValue {
    pub fn ty(&self) -> Ty {
        match self {
            RtValue::I1(_) => Ty::I1,
            RtValue::I16(_) => Ty::I16,
            RtValue::I32(_) => Ty::I32,
            RtValue::I64(_) => Ty::I64,
            RtValue::F64(_) => Ty::F64,
            RtValue::Ptr(_) => Ty::Ptr,
            RtValue::Str(_) => Ty::Str,
            RtValue::Error(_) => Ty::Error,
            RtValue::ResumeTok(_) => Ty::ResumeTok,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            RtValue::I1(b) => *b as i64,
            RtValue::I16(v) => *v as i64,
            RtValue::I32(v) => *v as i64,
            RtValue::I64(v) => *v,
            other => panic!("as_i64 on non-integer runtime value: {other:?}"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            RtValue::F64(v) => *v,
            other => panic!("as_f64 on non-float runtime value: {other:?}"),
        }
    }

    pub fn as_ptr(&self) -> u64 {
        match self {
            RtValue::Ptr(v) => *v,
            other => panic!("as_ptr on non-pointer runtime value: {other:?}"),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            RtValue::I1(b) => *b,
            other => panic!("as_bool on non-i1 runtime value: {other:?}"),
        }
    }

    pub fn as_resume_tok(&self) -> ResumeToken {
        match self {
            RtValue::ResumeTok(t) => *t,
            other => panic!("as_resume_tok on non-resumetok runtime value: {other:?}"),
        }
    }

    pub fn as_error(&self) -> ErrorRecord {
        match self {
            RtValue::Error(e) => *e,
            other => panic!("as_error on non-error runtime value: {other:?}"),
        }
    }

    /// Casts an `i64`-carrying integer value to the narrower/same type
    /// `declared` demands — used when a value crosses into a slot typed
    /// narrower than its native representation (e.g. truncating loads).
    pub fn narrow_to(i: i64, declared: Ty) -> RtValue {
        match declared {
            Ty::I1 => RtValue::I1(i != 0),
            Ty::I16 => RtValue::I16(i as i16),
            Ty::I32 => RtValue::I32(i as i32),
            Ty::I64 => RtValue::I64(i),
            other => panic!("narrow_to called with non-integer type {other}"),
        }
    }
}
