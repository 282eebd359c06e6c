//! The opcode table (C4): a static catalog keyed by opcode enumerator. The
//! verifier and VM are table-driven off this module and contain
//! opcode-specific code only for calls, `idx.chk`, and the EH instructions
//! (Design Notes, §9).

use std::fmt;

/// Every opcode the IL defines, grouped per §4.4's families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[rustfmt::skip]
pub enum Opcode {
    // integer arithmetic
    Add, Sub, Mul, SDiv, UDiv, SRem, URem,
    // checked arithmetic
    IAddOvf, ISubOvf, IMulOvf, SDivChk0, UDivChk0, SRemChk0, URemChk0,
    // bitwise / shifts
    And, Or, Xor, Shl, LShr, AShr,
    // float arithmetic
    FAdd, FSub, FMul, FDiv,
    // comparisons
    IcmpEq, IcmpNe,
    ScmpLt, ScmpLe, ScmpGt, ScmpGe,
    UcmpLt, UcmpLe, UcmpGt, UcmpGe,
    FcmpEq, FcmpNe, FcmpLt, FcmpLe, FcmpGt, FcmpGe,
    // conversions
    SiToFp, FpToSi, Zext1, Trunc1,
    CastSiToFp, CastUiToFp,
    CastFpToSiRteChk, CastFpToUiRteChk,
    CastSiNarrowChk, CastUiNarrowChk,
    // memory
    Alloca, Gep, IdxChk, Load, Store, AddrOf, ConstStr, ConstNull,
    // control flow
    Br, Cbr, SwitchI32, Ret, Trap, TrapKind, TrapErr, TrapFromErr,
    // calls
    Call, CallIndirect,
    // exception handling
    EhPush, EhPop, EhEntry, ResumeSame, ResumeNext, ResumeLabel,
    ErrGetKind, ErrGetCode, ErrGetIp, ErrGetLine,
}

/// What an operand slot expects. `InstrType` means "whatever type the
/// instruction itself declares as its result/auxiliary type" — the table
/// cannot pin a concrete `Ty` for opcodes that are polymorphic over their
/// declared type (e.g. `load`, `cast.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Exact(crate::ty::Ty),
    /// Any integer type.
    AnyInt,
    /// Takes its type from the instruction's declared result/auxiliary type.
    InstrType,
    /// A branch target (label plus block-argument list).
    Target,
    /// A direct or indirect callee plus its argument list.
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    None,
    Fixed(crate::ty::Ty),
    InstrType,
    /// `eh.entry`'s two well-known result slots: `(error, resumetok)`.
    ErrAndToken,
}

/// A static descriptor for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    pub result: ResultKind,
    pub is_terminator: bool,
    pub has_side_effect: bool,
    pub may_trap: bool,
}

use crate::ty::Ty;
use OperandKind::*;

macro_rules! info {
    ($mn:literal, [$($op:expr),*], $res:expr, term=$t:literal, fx=$f:literal, trap=$tr:literal) => {
        OpcodeInfo {
            mnemonic: $mn,
            operands: &[$($op),*],
            result: $res,
            is_terminator: $t,
            has_side_effect: $f,
            may_trap: $tr,
        }
    };
}

impl Opcode {
    pub fn info(self) -> OpcodeInfo {
        use Opcode::*;
        match self {
            Add => info!("add", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Sub => info!("sub", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Mul => info!("mul", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            SDiv => info!("sdiv", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            UDiv => info!("udiv", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            SRem => info!("srem", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            URem => info!("urem", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),

            IAddOvf => info!("iadd.ovf", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            ISubOvf => info!("isub.ovf", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            IMulOvf => info!("imul.ovf", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            SDivChk0 => info!("sdiv.chk0", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            UDivChk0 => info!("udiv.chk0", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            SRemChk0 => info!("srem.chk0", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            URemChk0 => info!("urem.chk0", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),

            And => info!("and", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Or => info!("or", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Xor => info!("xor", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Shl => info!("shl", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            LShr => info!("lshr", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            AShr => info!("ashr", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),

            FAdd => info!("fadd", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            FSub => info!("fsub", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            FMul => info!("fmul", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            FDiv => info!("fdiv", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),

            IcmpEq => info!("icmp_eq", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            IcmpNe => info!("icmp_ne", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            ScmpLt => info!("scmp_lt", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            ScmpLe => info!("scmp_le", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            ScmpGt => info!("scmp_gt", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            ScmpGe => info!("scmp_ge", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            UcmpLt => info!("ucmp_lt", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            UcmpLe => info!("ucmp_le", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            UcmpGt => info!("ucmp_gt", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            UcmpGe => info!("ucmp_ge", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpEq => info!("fcmp_eq", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpNe => info!("fcmp_ne", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpLt => info!("fcmp_lt", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpLe => info!("fcmp_le", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpGt => info!("fcmp_gt", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            FcmpGe => info!("fcmp_ge", [Exact(Ty::F64), Exact(Ty::F64)], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),

            SiToFp => info!("sitofp", [Exact(Ty::I64)], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            FpToSi => info!("fptosi", [Exact(Ty::F64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            Zext1 => info!("zext1", [Exact(Ty::I1)], ResultKind::InstrType, term=false, fx=false, trap=false),
            Trunc1 => info!("trunc1", [AnyInt], ResultKind::Fixed(Ty::I1), term=false, fx=false, trap=false),
            CastSiToFp => info!("cast.si_to_fp", [AnyInt], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            CastUiToFp => info!("cast.ui_to_fp", [AnyInt], ResultKind::Fixed(Ty::F64), term=false, fx=false, trap=false),
            CastFpToSiRteChk => info!("cast.fp_to_si.rte.chk", [Exact(Ty::F64)], ResultKind::InstrType, term=false, fx=false, trap=true),
            CastFpToUiRteChk => info!("cast.fp_to_ui.rte.chk", [Exact(Ty::F64)], ResultKind::InstrType, term=false, fx=false, trap=true),
            CastSiNarrowChk => info!("cast.si_narrow.chk", [AnyInt], ResultKind::InstrType, term=false, fx=false, trap=true),
            CastUiNarrowChk => info!("cast.ui_narrow.chk", [AnyInt], ResultKind::InstrType, term=false, fx=false, trap=true),

            Alloca => info!("alloca", [Exact(Ty::I64)], ResultKind::Fixed(Ty::Ptr), term=false, fx=true, trap=true),
            Gep => info!("gep", [Exact(Ty::Ptr), Exact(Ty::I64)], ResultKind::Fixed(Ty::Ptr), term=false, fx=false, trap=false),
            IdxChk => info!("idx.chk", [Exact(Ty::I64), Exact(Ty::I64)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=true),
            Load => info!("load", [Exact(Ty::Ptr)], ResultKind::InstrType, term=false, fx=false, trap=true),
            Store => info!("store", [Exact(Ty::Ptr), InstrType], ResultKind::None, term=false, fx=true, trap=true),
            AddrOf => info!("addr_of", [], ResultKind::Fixed(Ty::Ptr), term=false, fx=false, trap=false),
            ConstStr => info!("const_str", [], ResultKind::Fixed(Ty::Str), term=false, fx=false, trap=false),
            ConstNull => info!("const_null", [], ResultKind::Fixed(Ty::Ptr), term=false, fx=false, trap=false),

            Br => info!("br", [Target], ResultKind::None, term=true, fx=false, trap=false),
            Cbr => info!("cbr", [Exact(Ty::I1), Target, Target], ResultKind::None, term=true, fx=false, trap=false),
            SwitchI32 => info!("switch.i32", [Exact(Ty::I32), Target], ResultKind::None, term=true, fx=false, trap=false),
            Ret => info!("ret", [InstrType], ResultKind::None, term=true, fx=false, trap=false),
            Trap => info!("trap", [], ResultKind::None, term=true, fx=true, trap=true),
            TrapKind => info!("trap.kind", [], ResultKind::None, term=true, fx=true, trap=true),
            TrapErr => info!("trap.err", [Exact(Ty::Error)], ResultKind::None, term=true, fx=true, trap=true),
            TrapFromErr => info!("trap.from_err", [Exact(Ty::Error)], ResultKind::None, term=true, fx=true, trap=true),

            Call => info!("call", [Callee], ResultKind::InstrType, term=false, fx=true, trap=true),
            CallIndirect => info!("call.indirect", [Exact(Ty::Ptr), Callee], ResultKind::InstrType, term=false, fx=true, trap=true),

            EhPush => info!("eh.push", [Target], ResultKind::None, term=false, fx=true, trap=false),
            EhPop => info!("eh.pop", [], ResultKind::None, term=false, fx=true, trap=false),
            EhEntry => info!("eh.entry", [], ResultKind::ErrAndToken, term=false, fx=false, trap=false),
            ResumeSame => info!("resume.same", [Exact(Ty::ResumeTok)], ResultKind::None, term=true, fx=true, trap=false),
            ResumeNext => info!("resume.next", [Exact(Ty::ResumeTok)], ResultKind::None, term=true, fx=true, trap=false),
            ResumeLabel => info!("resume.label", [Exact(Ty::ResumeTok), Target], ResultKind::None, term=true, fx=true, trap=false),
            ErrGetKind => info!("err.get_kind", [Exact(Ty::Error)], ResultKind::Fixed(Ty::I32), term=false, fx=false, trap=false),
            ErrGetCode => info!("err.get_code", [Exact(Ty::Error)], ResultKind::Fixed(Ty::I32), term=false, fx=false, trap=false),
            ErrGetIp => info!("err.get_ip", [Exact(Ty::Error)], ResultKind::Fixed(Ty::I64), term=false, fx=false, trap=false),
            ErrGetLine => info!("err.get_line", [Exact(Ty::Error)], ResultKind::Fixed(Ty::I32), term=false, fx=false, trap=false),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn is_terminator(self) -> bool {
        self.info().is_terminator
    }

    pub fn has_side_effect(self) -> bool {
        self.info().has_side_effect
    }

    pub fn may_trap(self) -> bool {
        self.info().may_trap
    }

    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call | Opcode::CallIndirect)
    }

    /// Every known mnemonic-to-opcode mapping, used by the parser. `#4.3`'s
    /// `UnknownOpcode` failure mode is produced by the caller when a token
    /// does not appear here.
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        use Opcode::*;
        Some(match s {
            "add" => Add, "sub" => Sub, "mul" => Mul, "sdiv" => SDiv, "udiv" => UDiv,
            "srem" => SRem, "urem" => URem,
            "iadd.ovf" => IAddOvf, "isub.ovf" => ISubOvf, "imul.ovf" => IMulOvf,
            "sdiv.chk0" => SDivChk0, "udiv.chk0" => UDivChk0, "srem.chk0" => SRemChk0, "urem.chk0" => URemChk0,
            "and" => And, "or" => Or, "xor" => Xor, "shl" => Shl, "lshr" => LShr, "ashr" => AShr,
            "fadd" => FAdd, "fsub" => FSub, "fmul" => FMul, "fdiv" => FDiv,
            "icmp_eq" => IcmpEq, "icmp_ne" => IcmpNe,
            "scmp_lt" => ScmpLt, "scmp_le" => ScmpLe, "scmp_gt" => ScmpGt, "scmp_ge" => ScmpGe,
            "ucmp_lt" => UcmpLt, "ucmp_le" => UcmpLe, "ucmp_gt" => UcmpGt, "ucmp_ge" => UcmpGe,
            "fcmp_eq" => FcmpEq, "fcmp_ne" => FcmpNe, "fcmp_lt" => FcmpLt, "fcmp_le" => FcmpLe,
            "fcmp_gt" => FcmpGt, "fcmp_ge" => FcmpGe,
            "sitofp" => SiToFp, "fptosi" => FpToSi, "zext1" => Zext1, "trunc1" => Trunc1,
            "cast.si_to_fp" => CastSiToFp, "cast.ui_to_fp" => CastUiToFp,
            "cast.fp_to_si.rte.chk" => CastFpToSiRteChk, "cast.fp_to_ui.rte.chk" => CastFpToUiRteChk,
            "cast.si_narrow.chk" => CastSiNarrowChk, "cast.ui_narrow.chk" => CastUiNarrowChk,
            "alloca" => Alloca, "gep" => Gep, "idx.chk" => IdxChk, "load" => Load, "store" => Store,
            "addr_of" => AddrOf, "const_str" => ConstStr, "const_null" => ConstNull,
            "br" => Br, "cbr" => Cbr, "switch.i32" => SwitchI32, "ret" => Ret,
            "trap" => Trap, "trap.kind" => TrapKind, "trap.err" => TrapErr, "trap.from_err" => TrapFromErr,
            "call" => Call, "call.indirect" => CallIndirect,
            "eh.push" => EhPush, "eh.pop" => EhPop, "eh.entry" => EhEntry,
            "resume.same" => ResumeSame, "resume.next" => ResumeNext, "resume.label" => ResumeLabel,
            "err.get_kind" => ErrGetKind, "err.get_code" => ErrGetCode,
            "err.get_ip" => ErrGetIp, "err.get_line" => ErrGetLine,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_roundtrip_for_every_opcode() {
        let all = [
            Opcode::Add, Opcode::SDivChk0, Opcode::FAdd, Opcode::ScmpGt, Opcode::FcmpEq,
            Opcode::CastFpToSiRteChk, Opcode::Alloca, Opcode::IdxChk, Opcode::Load, Opcode::Store,
            Opcode::Br, Opcode::Cbr, Opcode::SwitchI32, Opcode::Ret, Opcode::Call,
            Opcode::CallIndirect, Opcode::EhPush, Opcode::EhEntry, Opcode::ResumeNext,
            Opcode::ErrGetKind,
        ];
        for op in all {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        assert_eq!(Opcode::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn terminator_bit_matches_families() {
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Br.is_terminator());
        assert!(Opcode::SwitchI32.is_terminator());
        assert!(!Opcode::Add.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }

    #[test]
    fn checked_arithmetic_may_trap_unchecked_does_not() {
        assert!(Opcode::SDivChk0.may_trap());
        assert!(Opcode::IAddOvf.may_trap());
        assert!(!Opcode::Add.may_trap());
        assert!(Opcode::SDiv.may_trap());
    }

    #[test]
    fn calls_and_memory_ops_have_side_effects() {
        assert!(Opcode::Call.has_side_effect());
        assert!(Opcode::Store.has_side_effect());
        assert!(!Opcode::Add.has_side_effect());
    }
}
