//! The interpreter loop (C8). Table-driven where the opcode table makes
//! that possible; opcode-specific code only for calls, conversions, memory,
//! and exception handling, mirroring the verifier's own split.

use rustc_hash::FxHashMap;
use viper_il::{BlockId, FuncId, Instruction, Module, Opcode, Symbol, TempId, Ty, Value};
use viper_rt::bridge::{Bridge, HostValue};
use viper_rt::name_map::NameMap;
use viper_rt::TrapKind;

use crate::frame::{Frame, HandlerEntry};
use crate::memory::Memory;
use crate::value::{ErrorRecord, InstrAddr, ResumeToken, RtValue};

const FUNC_ADDR_TAG: u64 = 1 << 62;
const BLOCK_ADDR_TAG: u64 = 1 << 63;

fn kind_code(k: TrapKind) -> i32 {
    match k {
        TrapKind::DivideByZero => 0,
        TrapKind::Overflow => 1,
        TrapKind::InvalidCast => 2,
        TrapKind::NullPointer => 3,
        TrapKind::Misaligned => 4,
        TrapKind::BadIndex => 5,
        TrapKind::OutOfMemory => 6,
        TrapKind::User => 7,
        TrapKind::InvalidOperation => 8,
    }
}

/// How a run of `@main` (or any entry function) concluded.
#[derive(Debug)]
pub enum RunOutcome {
    Exit(i32),
    /// An unhandled trap reached the bottom of the handler stack. The exit
    /// code is derived from the trap kind (§7's "deterministic non-zero
    /// code"); `diagnostic` is the single line written on unhandled trap.
    Trapped { exit_code: i32, diagnostic: String },
}

pub struct Interpreter<'m> {
    module: &'m Module,
    bridge: &'m Bridge,
    name_map: NameMap,
    memory: Memory,
    frames: Vec<Frame>,
    handlers: Vec<HandlerEntry>,
    global_addrs: FxHashMap<Symbol, u64>,
}

/// A trapping instruction's effect, resolved by `dispatch_trap`: either the
/// VM keeps running (handler found) or the run is over.
enum TrapOutcome {
    Handled,
    Unhandled(ErrorRecord),
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module, bridge: &'m Bridge, name_map: NameMap) -> Self {
        let mut memory = Memory::new();
        let mut global_addrs = FxHashMap::default();
        for g in &module.globals {
            let addr = memory.alloc_heap(g.ty.size().max(1));
            let v = global_init_value(g.ty, &g.init);
            let _ = memory.store(addr, g.ty, v);
            global_addrs.insert(g.name, addr);
        }
        Self { module, bridge, name_map, memory, frames: Vec::new(), handlers: Vec::new(), global_addrs }
    }

    /// Runs `entry` (e.g. `@main`) to completion.
    pub fn run(&mut self, entry: &str) -> RunOutcome {
        let sym = match self.module.interner.lookup(entry) {
            Some(s) => s,
            None => return RunOutcome::Trapped { exit_code: 101, diagnostic: format!("entry point {entry} not found") },
        };
        let fid = match self.module.find_function(sym) {
            Some(f) => f,
            None => return RunOutcome::Trapped { exit_code: 101, diagnostic: format!("entry point {entry} not found") },
        };
        self.push_call(fid, Vec::new());
        loop {
            match self.step() {
                StepOutcome::Continue => {}
                StepOutcome::ProgramExit(code) => return RunOutcome::Exit(code),
                StepOutcome::ProgramTrap(err) => {
                    let f = self.module.function(err.ip.func);
                    let fname = self.module.interner.resolve(f.name);
                    let diagnostic = format!(
                        "unhandled trap {:?} in function {fname}{}",
                        err.kind,
                        err.line.map(|l| format!(" at line {l}")).unwrap_or_default()
                    );
                    return RunOutcome::Trapped { exit_code: 100 + kind_code(err.kind), diagnostic };
                }
            }
        }
    }

    fn push_call(&mut self, fid: FuncId, args: Vec<RtValue>) {
        let f = self.module.function(fid);
        let arena = self.memory.new_frame_region();
        let mut frame = Frame::new(fid, BlockId::from(0usize), f.next_temp as usize, arena);
        for (p, v) in f.params.iter().zip(args) {
            frame.set(p.temp, v);
        }
        self.frames.push(frame);
    }

    fn cur(&self) -> &Frame {
        self.frames.last().unwrap()
    }

    fn cur_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn cur_func(&self) -> &'m viper_il::Function {
        self.module.function(self.cur().func)
    }

    fn cur_instr(&self) -> &'m Instruction {
        let f = self.cur_func();
        let b = f.block(self.cur().block);
        b.all_instrs().nth(self.cur().index).expect("ip past end of block")
    }

    fn instr_addr(&self) -> InstrAddr {
        InstrAddr { func: self.cur().func, block: self.cur().block, index: self.cur().index }
    }

    /// Evaluates an operand. `expected` drives how an integer constant is
    /// widthed; it is irrelevant for non-integer operands.
    fn eval(&self, v: Value, expected: Option<Ty>) -> RtValue {
        match v {
            Value::Temp(t) => self.cur().get(t).clone(),
            Value::ConstInt(i) => RtValue::narrow_to(i, expected.filter(|t| t.is_integer()).unwrap_or(Ty::I64)),
            Value::ConstFloat(f) => RtValue::F64(f),
            Value::ConstBool(b) => RtValue::I1(b),
            Value::Null => RtValue::Ptr(0),
            Value::GlobalRef(sym) => RtValue::Ptr(self.resolve_symbol_addr(sym)),
            Value::BlockAddr(label) => {
                let bid = self.cur_func().block_index(label).expect("unresolved block address");
                RtValue::Ptr(BLOCK_ADDR_TAG | bid.index() as u64)
            }
        }
    }

    fn resolve_symbol_addr(&self, sym: Symbol) -> u64 {
        if let Some(fid) = self.module.find_function(sym) {
            return FUNC_ADDR_TAG | fid.index() as u64;
        }
        *self.global_addrs.get(&sym).expect("addr_of an unresolved symbol")
    }

    /// Coerces `v` to `want` for a call argument or branch argument slot,
    /// implementing the implicit integer-widening the verifier permits.
    fn coerce(v: RtValue, want: Ty) -> RtValue {
        if v.ty() == want {
            v
        } else {
            RtValue::narrow_to(v.as_i64(), want)
        }
    }

    fn name(&self, sym: Symbol) -> &str {
        self.module.interner.resolve(sym)
    }

    /// Executes one instruction and reports what the VM should do next.
    fn step(&mut self) -> StepOutcome {
        let instr = self.cur_instr();
        let op = instr.op;
        let operands = instr.operands.clone();
        let targets = instr.targets.clone();
        let case_keys = instr.case_keys.clone();
        let ty = instr.ty;
        let callee = instr.callee;
        let results = instr.results.clone();
        let line = instr.loc.map(|l| l.line);

        macro_rules! trap {
            ($kind:expr) => {
                return self.raise(line, $kind, 0)
            };
        }

        match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
            | Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                let r = match op {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::Mul => a.wrapping_mul(b),
                    Opcode::And => a & b,
                    Opcode::Or => a | b,
                    Opcode::Xor => a ^ b,
                    Opcode::Shl => ((a as u64).wrapping_shl((b & 63) as u32)) as i64,
                    Opcode::LShr => ((a as u64) >> (b & 63)) as i64,
                    Opcode::AShr => a >> (b & 63),
                    _ => unreachable!(),
                };
                self.bind(results[0].0, RtValue::I64(r));
            }

            Opcode::SDiv | Opcode::SDivChk0 => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                if b == 0 {
                    trap!(TrapKind::DivideByZero);
                }
                if a == i64::MIN && b == -1 {
                    trap!(TrapKind::Overflow);
                }
                self.bind(results[0].0, RtValue::I64(a.wrapping_div(b)));
            }
            Opcode::SRem | Opcode::SRemChk0 => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                if b == 0 {
                    trap!(TrapKind::DivideByZero);
                }
                if a == i64::MIN && b == -1 {
                    self.bind(results[0].0, RtValue::I64(0));
                } else {
                    self.bind(results[0].0, RtValue::I64(a.wrapping_rem(b)));
                }
            }
            Opcode::UDiv | Opcode::UDivChk0 => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64() as u64;
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64() as u64;
                if b == 0 {
                    trap!(TrapKind::DivideByZero);
                }
                self.bind(results[0].0, RtValue::I64((a / b) as i64));
            }
            Opcode::URem | Opcode::URemChk0 => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64() as u64;
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64() as u64;
                if b == 0 {
                    trap!(TrapKind::DivideByZero);
                }
                self.bind(results[0].0, RtValue::I64((a % b) as i64));
            }

            Opcode::IAddOvf | Opcode::ISubOvf | Opcode::IMulOvf => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                let r = match op {
                    Opcode::IAddOvf => a.checked_add(b),
                    Opcode::ISubOvf => a.checked_sub(b),
                    Opcode::IMulOvf => a.checked_mul(b),
                    _ => unreachable!(),
                };
                match r {
                    Some(v) => self.bind(results[0].0, RtValue::I64(v)),
                    None => trap!(TrapKind::Overflow),
                }
            }

            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let a = self.eval(operands[0], Some(Ty::F64)).as_f64();
                let b = self.eval(operands[1], Some(Ty::F64)).as_f64();
                let r = match op {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    Opcode::FDiv => a / b,
                    _ => unreachable!(),
                };
                self.bind(results[0].0, RtValue::F64(r));
            }

            Opcode::IcmpEq | Opcode::IcmpNe | Opcode::ScmpLt | Opcode::ScmpLe | Opcode::ScmpGt
            | Opcode::ScmpGe | Opcode::UcmpLt | Opcode::UcmpLe | Opcode::UcmpGt | Opcode::UcmpGe => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                let (ua, ub) = (a as u64, b as u64);
                let r = match op {
                    Opcode::IcmpEq => a == b,
                    Opcode::IcmpNe => a != b,
                    Opcode::ScmpLt => a < b,
                    Opcode::ScmpLe => a <= b,
                    Opcode::ScmpGt => a > b,
                    Opcode::ScmpGe => a >= b,
                    Opcode::UcmpLt => ua < ub,
                    Opcode::UcmpLe => ua <= ub,
                    Opcode::UcmpGt => ua > ub,
                    Opcode::UcmpGe => ua >= ub,
                    _ => unreachable!(),
                };
                self.bind(results[0].0, RtValue::I1(r));
            }
            Opcode::FcmpEq | Opcode::FcmpNe | Opcode::FcmpLt | Opcode::FcmpLe | Opcode::FcmpGt | Opcode::FcmpGe => {
                let a = self.eval(operands[0], Some(Ty::F64)).as_f64();
                let b = self.eval(operands[1], Some(Ty::F64)).as_f64();
                let r = match op {
                    Opcode::FcmpEq => a == b,
                    Opcode::FcmpNe => a != b,
                    Opcode::FcmpLt => a < b,
                    Opcode::FcmpLe => a <= b,
                    Opcode::FcmpGt => a > b,
                    Opcode::FcmpGe => a >= b,
                    _ => unreachable!(),
                };
                self.bind(results[0].0, RtValue::I1(r));
            }

            Opcode::SiToFp => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                self.bind(results[0].0, RtValue::F64(a as f64));
            }
            Opcode::FpToSi => {
                let a = self.eval(operands[0], Some(Ty::F64)).as_f64();
                self.bind(results[0].0, RtValue::I64(a as i64));
            }
            Opcode::Zext1 => {
                let a = self.eval(operands[0], Some(Ty::I1)).as_i64();
                self.bind(results[0].0, RtValue::narrow_to(a, ty.unwrap_or(Ty::I64)));
            }
            Opcode::Trunc1 => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                self.bind(results[0].0, RtValue::I1(a & 1 != 0));
            }
            Opcode::CastSiToFp => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                self.bind(results[0].0, RtValue::F64(a as f64));
            }
            Opcode::CastUiToFp => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64() as u64;
                self.bind(results[0].0, RtValue::F64(a as f64));
            }
            Opcode::CastFpToSiRteChk | Opcode::CastFpToUiRteChk => {
                let a = self.eval(operands[0], Some(Ty::F64)).as_f64();
                let dest = ty.unwrap_or(Ty::I64);
                if a.is_nan() || a.is_infinite() {
                    trap!(TrapKind::InvalidCast);
                }
                let rounded = round_ties_even(a);
                let (lo, hi) = int_range(dest, op == Opcode::CastFpToUiRteChk);
                if rounded < lo || rounded > hi {
                    trap!(TrapKind::Overflow);
                }
                self.bind(results[0].0, RtValue::narrow_to(rounded as i64, dest));
            }
            Opcode::CastSiNarrowChk | Opcode::CastUiNarrowChk => {
                let a = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let dest = ty.unwrap_or(Ty::I64);
                let (lo, hi) = int_range(dest, op == Opcode::CastUiNarrowChk);
                let av = a as f64;
                if av < lo || av > hi {
                    trap!(TrapKind::Overflow);
                }
                self.bind(results[0].0, RtValue::narrow_to(a, dest));
            }

            Opcode::Alloca => {
                let n = self.eval(operands[0], Some(Ty::I64)).as_i64();
                if n < 0 {
                    trap!(TrapKind::OutOfMemory);
                }
                let arena = self.cur().arena;
                let addr = self.memory.alloc(arena, n as usize);
                self.bind(results[0].0, RtValue::Ptr(addr));
            }
            Opcode::Gep => {
                let p = self.eval(operands[0], Some(Ty::Ptr)).as_ptr();
                let n = self.eval(operands[1], Some(Ty::I64)).as_i64();
                self.bind(results[0].0, RtValue::Ptr(Memory::gep(p, n)));
            }
            Opcode::IdxChk => {
                let i = self.eval(operands[0], Some(Ty::I64)).as_i64();
                let b = self.eval(operands[1], Some(Ty::I64)).as_i64();
                if i < 0 || i >= b {
                    trap!(TrapKind::BadIndex);
                }
                self.bind(results[0].0, RtValue::I64(i));
            }
            Opcode::Load => {
                let p = self.eval(operands[0], Some(Ty::Ptr)).as_ptr();
                let elem_ty = ty.unwrap_or(Ty::I64);
                match self.memory.load(p, elem_ty) {
                    Ok(v) => self.bind(results[0].0, v),
                    Err(k) => trap!(k),
                }
            }
            Opcode::Store => {
                let elem_ty = ty.unwrap_or(Ty::I64);
                let p = self.eval(operands[0], Some(Ty::Ptr)).as_ptr();
                let v = self.eval(operands[1], Some(elem_ty));
                if let Err(k) = self.memory.store(p, elem_ty, v) {
                    trap!(k);
                }
            }
            Opcode::AddrOf => {
                let sym = callee.expect("addr_of with no symbol");
                self.bind(results[0].0, RtValue::Ptr(self.resolve_symbol_addr(sym)));
            }
            Opcode::ConstStr => {
                let sym = callee.expect("const_str with no symbol");
                let g = self.module.find_global(sym).expect("const_str of an unknown global");
                let s = match &g.init {
                    viper_il::GlobalInit::Str(s) => s.clone(),
                    _ => String::new(),
                };
                self.bind(results[0].0, RtValue::Str(s));
            }
            Opcode::ConstNull => {
                self.bind(results[0].0, RtValue::Ptr(0));
            }

            Opcode::Br => {
                let args = self.eval_target_args(&targets[0]);
                let dest = self.resolve_label(targets[0].label);
                self.cur_mut().jump_to(dest, &args);
                return StepOutcome::Continue;
            }
            Opcode::Cbr => {
                let c = self.eval(operands[0], Some(Ty::I1)).as_bool();
                let t = if c { &targets[0] } else { &targets[1] };
                let args = self.eval_target_args(t);
                let dest = self.resolve_label(t.label);
                self.cur_mut().jump_to(dest, &args);
                return StepOutcome::Continue;
            }
            Opcode::SwitchI32 => {
                let v = self.eval(operands[0], Some(Ty::I32)).as_i64() as i32;
                let mut chosen = &targets[0];
                for (k, t) in case_keys.iter().zip(&targets[1..]) {
                    if *k == v {
                        chosen = t;
                        break;
                    }
                }
                let args = self.eval_target_args(chosen);
                let dest = self.resolve_label(chosen.label);
                self.cur_mut().jump_to(dest, &args);
                return StepOutcome::Continue;
            }
            Opcode::Ret => {
                let ret_ty = self.cur_func().ret;
                let v = operands.first().map(|v| self.eval(*v, Some(ret_ty)));
                return self.do_return(v);
            }
            Opcode::Trap => return self.raise(line, TrapKind::InvalidOperation, 0),
            Opcode::TrapKind => return self.raise(line, TrapKind::User, case_keys.first().copied().unwrap_or(0)),
            Opcode::TrapErr | Opcode::TrapFromErr => {
                let e = self.eval(operands[0], Some(Ty::Error));
                let rec = e.as_error();
                return self.dispatch_error(ErrorRecord { kind: rec.kind, code: rec.code, ip: self.instr_addr(), line });
            }

            Opcode::Call => {
                let name = self.name(callee.expect("call with no callee")).to_string();
                return self.do_call(&name, &operands, results.first().map(|r| r.0));
            }
            Opcode::CallIndirect => {
                let p = self.eval(operands[0], Some(Ty::Ptr)).as_ptr();
                if p & FUNC_ADDR_TAG == 0 {
                    trap!(TrapKind::InvalidOperation);
                }
                let fid = FuncId::from((p & !FUNC_ADDR_TAG) as usize);
                let f = self.module.function(fid);
                let param_tys: Vec<Ty> = f.params.iter().map(|p| p.ty).collect();
                let args = operands[1..]
                    .iter()
                    .zip(&param_tys)
                    .map(|(v, t)| Self::coerce(self.eval(*v, Some(*t)), *t))
                    .collect();
                self.push_call(fid, args);
                return StepOutcome::Continue;
            }

            Opcode::EhPush => {
                let dest = self.resolve_label(targets[0].label);
                let mark = self.memory.region_len(self.cur().arena);
                self.handlers.push(HandlerEntry { frame_depth: self.frames.len() - 1, handler_block: dest, alloca_mark: mark });
            }
            Opcode::EhPop => {
                self.handlers.pop();
            }
            Opcode::EhEntry => {
                let err = self.cur_mut().pending_error.take().expect("eh.entry with no pending trap");
                let tok = ResumeToken { trap_ip: err.ip };
                self.bind(results[0].0, RtValue::Error(err));
                self.bind(results[1].0, RtValue::ResumeTok(tok));
            }
            Opcode::ResumeSame => {
                let tok = self.eval(operands[0], Some(Ty::ResumeTok)).as_resume_tok();
                let f = self.cur_mut();
                f.block = tok.trap_ip.block;
                f.index = tok.trap_ip.index;
                return StepOutcome::Continue;
            }
            Opcode::ResumeNext => {
                let tok = self.eval(operands[0], Some(Ty::ResumeTok)).as_resume_tok();
                let f = self.cur_mut();
                f.block = tok.trap_ip.block;
                f.index = tok.trap_ip.index + 1;
                return StepOutcome::Continue;
            }
            Opcode::ResumeLabel => {
                let args = self.eval_target_args(&targets[0]);
                let dest = self.resolve_label(targets[0].label);
                self.cur_mut().jump_to(dest, &args);
                return StepOutcome::Continue;
            }
            Opcode::ErrGetKind => {
                let e = self.eval(operands[0], Some(Ty::Error)).as_error();
                self.bind(results[0].0, RtValue::I32(kind_code(e.kind)));
            }
            Opcode::ErrGetCode => {
                let e = self.eval(operands[0], Some(Ty::Error)).as_error();
                self.bind(results[0].0, RtValue::I32(e.code));
            }
            Opcode::ErrGetIp => {
                let e = self.eval(operands[0], Some(Ty::Error)).as_error();
                let packed = ((e.ip.block.index() as i64) << 32) | e.ip.index as i64;
                self.bind(results[0].0, RtValue::I64(packed));
            }
            Opcode::ErrGetLine => {
                let e = self.eval(operands[0], Some(Ty::Error)).as_error();
                self.bind(results[0].0, RtValue::I32(e.line.unwrap_or(0) as i32));
            }
        }

        self.cur_mut().index += 1;
        StepOutcome::Continue
    }

    fn bind(&mut self, t: TempId, v: RtValue) {
        self.cur_mut().set(t, v);
    }

    fn resolve_label(&self, label: Symbol) -> BlockId {
        self.cur_func().block_index(label).expect("unresolved branch label")
    }

    fn eval_target_args(&self, t: &viper_il::Target) -> Vec<(TempId, RtValue)> {
        let dest = self.cur_func().block_index(t.label).expect("unresolved branch label");
        let params = &self.cur_func().block(dest).params;
        params
            .iter()
            .zip(&t.args)
            .map(|(p, v)| (p.temp, Self::coerce(self.eval(*v, Some(p.ty)), p.ty)))
            .collect()
    }

    fn do_call(&mut self, name: &str, operands: &[Value], result: Option<TempId>) -> StepOutcome {
        let local = self.module.interner.lookup(name).and_then(|sym| self.module.find_function(sym));
        if let Some(fid) = local {
            let f = self.module.function(fid);
            let param_tys: Vec<Ty> = f.params.iter().map(|p| p.ty).collect();
            let args = operands
                .iter()
                .zip(&param_tys)
                .map(|(v, t)| Self::coerce(self.eval(*v, Some(*t)), *t))
                .collect();
            self.push_call(fid, args);
            return StepOutcome::Continue;
        }
        // Extern call: marshal through the bridge.
        let entry = match self.name_map.resolve(name) {
            Some(e) => e,
            None => return self.raise(None, TrapKind::InvalidOperation, 0),
        };
        let args: Vec<HostValue> = operands
            .iter()
            .zip(entry.params)
            .map(|(v, t)| to_host(Self::coerce(self.eval(*v, Some(*t)), *t)))
            .collect();
        match self.bridge.call(&self.name_map, name, &args) {
            Ok(Ok(v)) => {
                if let Some(t) = result {
                    self.bind(t, from_host(v));
                }
                self.cur_mut().index += 1;
                StepOutcome::Continue
            }
            Ok(Err(k)) => self.raise(None, k, 0),
            Err(_) => self.raise(None, TrapKind::InvalidOperation, 0),
        }
    }

    fn do_return(&mut self, v: Option<RtValue>) -> StepOutcome {
        self.memory.free_frame_region(self.cur().arena);
        self.frames.pop();
        match self.frames.last() {
            None => {
                let code = v.map(|v| v.as_i64() as i32).unwrap_or(0);
                StepOutcome::ProgramExit(code)
            }
            Some(_) => {
                let call_instr = self.cur_instr();
                let result_temp = call_instr.results.first().map(|r| r.0);
                let ret_ty = call_instr.ty;
                if let (Some(t), Some(v)) = (result_temp, v) {
                    let coerced = ret_ty.map(|rt| Self::coerce(v.clone(), rt)).unwrap_or(v);
                    self.bind(t, coerced);
                }
                self.cur_mut().index += 1;
                StepOutcome::Continue
            }
        }
    }

    fn raise(&mut self, line: Option<u32>, kind: TrapKind, code: i32) -> StepOutcome {
        let ip = self.instr_addr();
        self.dispatch_error(ErrorRecord { kind, code, ip, line })
    }

    fn dispatch_error(&mut self, err: ErrorRecord) -> StepOutcome {
        match self.dispatch_trap(err) {
            TrapOutcome::Handled => StepOutcome::Continue,
            TrapOutcome::Unhandled(e) => StepOutcome::ProgramTrap(e),
        }
    }

    fn dispatch_trap(&mut self, err: ErrorRecord) -> TrapOutcome {
        while let Some(h) = self.handlers.last().copied() {
            if h.frame_depth < self.frames.len() {
                self.handlers.pop();
                self.frames.truncate(h.frame_depth + 1);
                let arena = self.cur().arena;
                self.memory.truncate_region(arena, h.alloca_mark);
                let f = self.cur_mut();
                f.block = h.handler_block;
                f.index = 0;
                f.pending_error = Some(err);
                return TrapOutcome::Handled;
            }
            self.handlers.pop();
        }
        TrapOutcome::Unhandled(err)
    }
}

enum StepOutcome {
    Continue,
    ProgramExit(i32),
    ProgramTrap(ErrorRecord),
}

fn round_ties_even(v: f64) -> f64 {
    let floor = v.floor();
    let diff = v - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn int_range(ty: Ty, unsigned: bool) -> (f64, f64) {
    match (ty, unsigned) {
        (Ty::I1, _) => (0.0, 1.0),
        (Ty::I16, false) => (i16::MIN as f64, i16::MAX as f64),
        (Ty::I16, true) => (0.0, u16::MAX as f64),
        (Ty::I32, false) => (i32::MIN as f64, i32::MAX as f64),
        (Ty::I32, true) => (0.0, u32::MAX as f64),
        (Ty::I64, false) => (i64::MIN as f64, i64::MAX as f64),
        (Ty::I64, true) => (0.0, u64::MAX as f64),
        _ => (i64::MIN as f64, i64::MAX as f64),
    }
}

fn to_host(v: RtValue) -> HostValue {
    match v {
        RtValue::I1(b) => HostValue::I64(b as i64),
        RtValue::I16(n) => HostValue::I64(n as i64),
        RtValue::I32(n) => HostValue::I64(n as i64),
        RtValue::I64(n) => HostValue::I64(n),
        RtValue::F64(f) => HostValue::F64(f),
        RtValue::Ptr(p) => HostValue::Ptr(p),
        RtValue::Str(s) => HostValue::Str(s),
        other => panic!("runtime call argument of non-marshalable type: {other:?}"),
    }
}

fn from_host(v: HostValue) -> RtValue {
    match v {
        HostValue::Void => RtValue::I64(0),
        HostValue::I64(n) => RtValue::I64(n),
        HostValue::F64(f) => RtValue::F64(f),
        HostValue::Str(s) => RtValue::Str(s),
        HostValue::Ptr(p) => RtValue::Ptr(p),
    }
}

fn global_init_value(ty: Ty, init: &viper_il::GlobalInit) -> RtValue {
    use viper_il::GlobalInit::*;
    match (ty, init) {
        (Ty::F64, Float(f)) => RtValue::F64(*f),
        (Ty::F64, _) => RtValue::F64(0.0),
        (Ty::Str, Str(s)) => RtValue::Str(s.clone()),
        (Ty::Str, _) => RtValue::Str(String::new()),
        (Ty::Ptr, _) => RtValue::Ptr(0),
        (t, Int(i)) if t.is_integer() => RtValue::narrow_to(*i, t),
        (t, _) if t.is_integer() => RtValue::narrow_to(0, t),
        _ => RtValue::Ptr(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::{ModuleBuilder, Value};
    use viper_rt::name_map::NameMap;

    fn run_main(m: &Module) -> RunOutcome {
        let bridge = Bridge::with_writer(Box::new(Vec::new()));
        let mut vm = Interpreter::new(m, &bridge, NameMap::for_load());
        vm.run("@main")
    }

    #[test]
    fn unchecked_add_wraps_on_overflow() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        b.declare_extern("@Viper.Console.PrintI64", Ty::Void, vec![Ty::I64]).unwrap();
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        let sum = b
            .emit(f, blk, Opcode::Add, vec![Value::ConstInt(i64::MAX), Value::ConstInt(1)], Some(Ty::I64), None, None, None)
            .unwrap()
            .unwrap();
        b.emit(f, blk, Opcode::Call, vec![Value::Temp(sum)], None, Some(Ty::Void), Some("@Viper.Console.PrintI64"), None).unwrap();
        b.emit_terminator(f, blk, Opcode::Ret, vec![Value::ConstInt(0)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let m = b.finish();

        let buf: std::rc::Rc<std::cell::RefCell<Vec<u8>>> = Default::default();
        let bridge = Bridge::with_writer(Box::new(CapturingWriter(buf.clone())));
        let mut vm = Interpreter::new(&m, &bridge, NameMap::for_load());
        let outcome = vm.run("@main");
        assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
        assert_eq!(&*buf.borrow(), i64::MIN.to_string().as_bytes());
    }

    #[test]
    fn sdiv_chk0_traps_divide_by_zero_with_no_handler() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        let q = b
            .emit(f, blk, Opcode::SDivChk0, vec![Value::ConstInt(1), Value::ConstInt(0)], Some(Ty::I64), None, None, None)
            .unwrap()
            .unwrap();
        b.emit_terminator(f, blk, Opcode::Ret, vec![Value::Temp(q)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let m = b.finish();

        match run_main(&m) {
            RunOutcome::Trapped { exit_code, diagnostic } => {
                assert_eq!(exit_code, 100);
                assert!(diagnostic.contains("DivideByZero"));
            }
            other => panic!("expected an unhandled trap, got {other:?}"),
        }
    }

    #[test]
    fn sdiv_chk0_traps_overflow_on_int_min_over_neg_one() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        let q = b
            .emit(f, blk, Opcode::SDivChk0, vec![Value::ConstInt(i64::MIN), Value::ConstInt(-1)], Some(Ty::I64), None, None, None)
            .unwrap()
            .unwrap();
        b.emit_terminator(f, blk, Opcode::Ret, vec![Value::Temp(q)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let m = b.finish();

        match run_main(&m) {
            RunOutcome::Trapped { diagnostic, .. } => assert!(diagnostic.contains("Overflow")),
            other => panic!("expected an overflow trap, got {other:?}"),
        }
    }

    #[test]
    fn eh_push_then_pop_with_no_trap_leaves_handler_stack_empty() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  eh.push ^h
  eh.pop
  ret 0
^h:
  %err, %tok = eh.entry
  resume.same %tok }
"#;
        let m = viper_il::parse(src).expect("valid IL");
        let bridge = Bridge::with_writer(Box::new(Vec::new()));
        let mut vm = Interpreter::new(&m, &bridge, NameMap::for_load());
        let outcome = vm.run("@main");
        assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
        assert_eq!(vm.handlers.len(), 0);
    }

    #[test]
    fn eh_round_trip_resume_next_skips_the_trapping_instruction() {
        // func @main() -> i64 { entry:
        //   eh.push ^h
        //   %q = sdiv.chk0 1, 0
        //   call @Viper.Console.PrintI64(42)
        //   eh.pop
        //   ret 0
        // ^h:
        //   %err, %tok = eh.entry
        //   resume.next %tok }
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  eh.push ^h
  %q = sdiv.chk0 1, 0
  call @Viper.Console.PrintI64(42)
  eh.pop
  ret 0
^h:
  %err, %tok = eh.entry
  resume.next %tok }
"#;
        let m = viper_il::parse(src).expect("valid IL");
        let report = viper_verify::verify_module(&m);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().collect::<Vec<_>>());

        let buf: std::rc::Rc<std::cell::RefCell<Vec<u8>>> = Default::default();
        let bridge = Bridge::with_writer(Box::new(CapturingWriter(buf.clone())));
        let mut vm = Interpreter::new(&m, &bridge, NameMap::for_load());
        let outcome = vm.run("@main");
        assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
        assert_eq!(&*buf.borrow(), b"42");
        assert_eq!(vm.handlers.len(), 0);
    }

    #[test]
    fn switch_i32_falls_through_to_the_default_case() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  switch.i32 5, ^d, 1 -> ^one, 2 -> ^two
^one: call @Viper.Console.PrintI64(1) ret 0
^two: call @Viper.Console.PrintI64(2) ret 0
^d:   call @Viper.Console.PrintI64(0) ret 0 }
"#;
        let m = viper_il::parse(src).expect("valid IL");
        let buf: std::rc::Rc<std::cell::RefCell<Vec<u8>>> = Default::default();
        let bridge = Bridge::with_writer(Box::new(CapturingWriter(buf.clone())));
        let mut vm = Interpreter::new(&m, &bridge, NameMap::for_load());
        let outcome = vm.run("@main");
        assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
        assert_eq!(&*buf.borrow(), b"0");
    }

    struct CapturingWriter(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

    impl std::io::Write for CapturingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
