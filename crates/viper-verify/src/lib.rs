//! The IL verifier (C5): structure, symbol resolution, typing, block
//! parameters, dominance, call contracts, and exception-handling shape.
//! Table-driven off `Opcode::info()` for everything except calls, which
//! have variable arity, and the EH instructions, which carry a placement
//! constraint the table can't express (Design Notes, §9).
//!
//! Verification accumulates every diagnostic it finds rather than stopping
//! at the first failure, so a frontend gets one report instead of a
//! fix-one-rerun loop. This is a deliberate departure from a fail-fast
//! single-`Result` verifier.

mod dominance;

use rustc_hash::FxHashMap;
use viper_diag::{Diagnostic, DiagnosticBag};
use viper_il::{BasicBlock, BlockId, Function, Instruction, Module, Opcode, OperandKind, ResultKind, TempId, Ty, Value};

pub struct VerifyReport {
    pub diagnostics: DiagnosticBag,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

pub fn verify_module(m: &Module) -> VerifyReport {
    let mut diags = DiagnosticBag::new();
    for f in &m.functions {
        verify_function(m, f, &mut diags);
    }
    VerifyReport { diagnostics: diags }
}

fn name(m: &Module, sym: viper_il::Symbol) -> &str {
    m.interner.resolve(sym)
}

/// Per-function SSA environment: every temp's declared type and the block
/// that defines it (function params are attributed to the entry block).
struct Env {
    ty: FxHashMap<TempId, Ty>,
    def_block: FxHashMap<TempId, BlockId>,
}

fn build_env(f: &Function) -> Env {
    let mut ty = FxHashMap::default();
    let mut def_block = FxHashMap::default();
    for p in &f.params {
        ty.insert(p.temp, p.ty);
        def_block.insert(p.temp, BlockId(0));
    }
    for (bi, block) in f.blocks.iter().enumerate() {
        let bid = BlockId(bi as u32);
        for p in &block.params {
            ty.insert(p.temp, p.ty);
            def_block.insert(p.temp, bid);
        }
        for instr in block.all_instrs() {
            for &(t, rty) in &instr.results {
                ty.insert(t, rty);
                def_block.insert(t, bid);
            }
        }
    }
    Env { ty, def_block }
}

fn type_of_value(v: &Value, env: &Env) -> Option<Ty> {
    match v {
        Value::Temp(t) => env.ty.get(t).copied(),
        Value::ConstInt(_) => None,
        Value::ConstFloat(_) => Some(Ty::F64),
        Value::ConstBool(_) => Some(Ty::I1),
        Value::Null => Some(Ty::Ptr),
        Value::GlobalRef(_) => Some(Ty::Ptr),
        Value::BlockAddr(_) => Some(Ty::Ptr),
    }
}

fn is_untyped_int_literal(v: &Value) -> bool {
    matches!(v, Value::ConstInt(_))
}

/// `i1` is accepted anywhere a wider integer type is declared (call
/// arguments, branch arguments), zero-extended at the value boundary —
/// the same widening `zext1` performs explicitly, allowed implicitly at
/// these edges so a comparison result can feed a host call directly.
fn is_widening_int(actual: Option<Ty>, declared: Ty) -> bool {
    actual == Some(Ty::I1) && declared.is_integer() && declared != Ty::I1
}

fn verify_function(m: &Module, f: &Function, diags: &mut DiagnosticBag) {
    let fname = name(m, f.name).to_string();

    // 1. Structure: non-empty, every block single-terminated. A function's
    // instructions-vs-terminator split in the data model already rules out
    // post-terminator instructions and a non-first entry block.
    if f.blocks.is_empty() {
        diags.push(Diagnostic::error("V-STRUCT-001", format!("function {} has no blocks", fname)));
        return;
    }
    for block in &f.blocks {
        if block.terminator.is_none() {
            diags.push(Diagnostic::error(
                "V-STRUCT-002",
                format!("function {}: block {} has no terminator", fname, name(m, block.label)),
            ));
        }
    }

    // Dedicated label index: every `Target` must resolve within this function.
    let label_ok = |label: viper_il::Symbol| f.block_index(label).is_some();

    let env = build_env(f);
    let dom = dominance::compute(f);

    for (bi, block) in f.blocks.iter().enumerate() {
        let bid = BlockId(bi as u32);

        // 4. Block parameters: unique, non-void names.
        let mut seen_params: FxHashMap<viper_il::Symbol, ()> = FxHashMap::default();
        for p in &block.params {
            if p.ty == Ty::Void {
                diags.push(Diagnostic::error(
                    "V-PARAM-001",
                    format!("function {}: block {} has a void-typed parameter", fname, name(m, block.label)),
                ));
            }
            if seen_params.insert(p.name, ()).is_some() {
                diags.push(Diagnostic::error(
                    "V-PARAM-002",
                    format!("function {}: block {} has duplicate parameter {}", fname, name(m, block.label), name(m, p.name)),
                ));
            }
        }

        // Sequential "defined so far in this block" set, seeded with the
        // block's own parameters (and, for the entry block, the function's
        // parameters — both are available before the first instruction).
        let mut local_seen: std::collections::HashSet<TempId> = block.params.iter().map(|p| p.temp).collect();
        if bi == 0 {
            local_seen.extend(f.params.iter().map(|p| p.temp));
        }

        // A `resume.same`/`resume.next` handler can re-enter this block's
        // protected region at the instruction after the one that trapped,
        // bypassing that instruction's own definition. Temps it would have
        // produced are therefore not soundly available past that point,
        // even though program order alone would say otherwise.
        let unsound = resume_unsound_temps(f, block);

        for instr in block.all_instrs() {
            check_symbols(m, f, instr, label_ok, diags, &fname);
            check_typing(m, instr, &env, diags, &fname, name(m, block.label), f.ret);
            check_dominance(m, &env, &dom, bid, instr, &local_seen, &unsound, diags, &fname, name(m, block.label));
            if instr.op == Opcode::Call || instr.op == Opcode::CallIndirect {
                check_call_contract(m, instr, &env, diags, &fname);
            }
            if instr.op == Opcode::SwitchI32 {
                check_switch_keys(instr, diags, &fname, name(m, block.label));
            }
            for &(t, _) in &instr.results {
                local_seen.insert(t);
            }
        }

        // Incoming-edge argument arity/type checks for every successor this
        // block branches to.
        if let Some(term) = &block.terminator {
            for target in &term.targets {
                check_edge(m, f, target, &env, diags, &fname);
            }
        }
    }

    check_eh_shape(m, f, diags, &fname);
    check_resumetok_scope(m, f, &env, diags, &fname);
}

fn check_symbols(
    m: &Module,
    f: &Function,
    instr: &Instruction,
    label_ok: impl Fn(viper_il::Symbol) -> bool,
    diags: &mut DiagnosticBag,
    fname: &str,
) {
    if let Some(callee) = instr.callee {
        let resolves = match instr.op {
            Opcode::Call => m.find_function(callee).is_some() || m.find_extern(callee).is_some(),
            Opcode::AddrOf => m.find_function(callee).is_some() || m.find_extern(callee).is_some(),
            Opcode::ConstStr => m.find_global(callee).is_some(),
            _ => true,
        };
        if !resolves {
            diags.push(Diagnostic::error(
                "V-SYM-001",
                format!("function {}: undefined symbol {}", fname, name(m, callee)),
            ));
        }
    }
    for v in &instr.operands {
        if let Value::GlobalRef(sym) = v {
            if m.find_function(*sym).is_none() && m.find_extern(*sym).is_none() && m.find_global(*sym).is_none() {
                diags.push(Diagnostic::error(
                    "V-SYM-002",
                    format!("function {}: undefined symbol {}", fname, name(m, *sym)),
                ));
            }
        }
    }
    for t in &instr.targets {
        if !label_ok(t.label) {
            diags.push(Diagnostic::error(
                "V-SYM-003",
                format!("function {}: undefined label {}", fname, name(m, t.label)),
            ));
        }
    }
    let _ = f;
}

fn check_typing(m: &Module, instr: &Instruction, env: &Env, diags: &mut DiagnosticBag, fname: &str, block_name: &str, ret_ty: Ty) {
    // Calls have variable arity against their declared signature, checked
    // separately in `check_call_contract`; the opcode table's `Callee`
    // operand slot is a placeholder, not a position to type-check here.
    if instr.op == Opcode::Call || instr.op == Opcode::CallIndirect {
        return;
    }

    // `ret` carries no type annotation in the grammar (`ret 0`, `ret %v`, or
    // a bare `ret`) — the parser never sets `instr.ty` for it, so its
    // operand is checked against the enclosing function's declared return
    // type instead of going through the generic `InstrType` path below.
    if instr.op == Opcode::Ret {
        check_ret(instr, env, ret_ty, diags, fname, block_name);
        return;
    }

    let info = instr.op.info();

    // `switch.i32`'s scrutinee must be i32; `cbr`'s condition must be i1.
    // Both already fall out of the generic `Exact` check below since the
    // table declares them that way, so no special-casing is needed here.

    let value_operands: Vec<&Value> = match instr.op {
        Opcode::Cbr | Opcode::SwitchI32 | Opcode::ResumeLabel => instr.operands.iter().take(1).collect(),
        _ => instr.operands.iter().collect(),
    };
    let expected: Vec<OperandKind> = match instr.op {
        Opcode::Cbr => vec![info.operands[0]],
        Opcode::SwitchI32 => vec![info.operands[0]],
        Opcode::ResumeLabel => vec![info.operands[0]],
        _ => info.operands.to_vec(),
    };

    for (v, kind) in value_operands.iter().zip(expected.iter()) {
        let actual = type_of_value(v, env);
        let ok = match kind {
            OperandKind::Exact(t) => {
                if is_untyped_int_literal(v) {
                    t.is_integer()
                } else {
                    actual == Some(*t)
                }
            }
            OperandKind::AnyInt => {
                if is_untyped_int_literal(v) {
                    true
                } else {
                    actual.map(|t| t.is_integer()).unwrap_or(false)
                }
            }
            OperandKind::InstrType => match instr.ty {
                Some(t) if is_untyped_int_literal(v) => t.is_integer() || t.is_float(),
                Some(t) => actual == Some(t),
                None => false,
            },
            OperandKind::Target | OperandKind::Callee => true,
        };
        if !ok {
            diags.push(Diagnostic::error(
                "V-TYPE-001",
                format!(
                    "function {}: block {}: {} operand has wrong type (expected {:?}, got {:?})",
                    fname, block_name, instr.op, kind, actual
                ),
            ));
        }
    }

    if matches!(instr.op, Opcode::Load | Opcode::Store | Opcode::Alloca) {
        if let Some(t) = instr.ty {
            if !t.is_loadable() {
                diags.push(Diagnostic::error(
                    "V-TYPE-002",
                    format!("function {}: block {}: {} has a void element type", fname, block_name, instr.op),
                ));
            }
        }
    }

    if let ResultKind::Fixed(_) | ResultKind::InstrType | ResultKind::ErrAndToken = info.result {
        if instr.results.is_empty() && info.result != ResultKind::None {
            diags.push(Diagnostic::error(
                "V-TYPE-003",
                format!("function {}: block {}: {} produced no result but its opcode requires one", fname, block_name, instr.op),
            ));
        }
    }
}

fn check_ret(instr: &Instruction, env: &Env, ret_ty: Ty, diags: &mut DiagnosticBag, fname: &str, block_name: &str) {
    match instr.operands.first() {
        None => {
            if ret_ty != Ty::Void {
                diags.push(Diagnostic::error(
                    "V-TYPE-001",
                    format!("function {}: block {}: ret has no operand but the function returns {}", fname, block_name, ret_ty),
                ));
            }
        }
        Some(v) => {
            let actual = type_of_value(v, env);
            let ok = if is_untyped_int_literal(v) {
                ret_ty.is_integer() || ret_ty.is_float()
            } else {
                actual == Some(ret_ty) || is_widening_int(actual, ret_ty)
            };
            if !ok {
                diags.push(Diagnostic::error(
                    "V-TYPE-001",
                    format!(
                        "function {}: block {}: ret operand has wrong type (expected {}, got {:?})",
                        fname, block_name, ret_ty, actual
                    ),
                ));
            }
        }
    }
}

/// Computes, for one block, the set of temps that a `resume.same`/
/// `resume.next` re-entry into this block's protected region could observe
/// as still-undefined, even though they are defined earlier in program
/// order. A handler that resumes this way picks up control right after the
/// instruction that trapped — so any may-trap instruction's results are
/// unsound to use past that point for as long as a capturing `eh.push` is
/// active, because the resumed path never ran that instruction's own
/// definition on the way back in.
fn resume_unsound_temps(f: &Function, block: &BasicBlock) -> std::collections::HashSet<TempId> {
    let mut unsound = std::collections::HashSet::new();
    let mut capturing_stack: Vec<bool> = Vec::new();
    for instr in block.all_instrs() {
        match instr.op {
            Opcode::EhPush => {
                let capturing = instr
                    .targets
                    .first()
                    .and_then(|t| f.block_index(t.label))
                    .map(|bid| {
                        matches!(
                            f.block(bid).terminator.as_ref().map(|t| t.op),
                            Some(Opcode::ResumeSame) | Some(Opcode::ResumeNext)
                        )
                    })
                    .unwrap_or(false);
                capturing_stack.push(capturing);
            }
            Opcode::EhPop => {
                capturing_stack.pop();
            }
            _ => {
                if instr.op.may_trap() && capturing_stack.iter().any(|&c| c) {
                    for &(t, _) in &instr.results {
                        unsound.insert(t);
                    }
                }
            }
        }
    }
    unsound
}

#[allow(clippy::too_many_arguments)]
fn check_dominance(
    m: &Module,
    env: &Env,
    dom: &dominance::DomInfo,
    bid: BlockId,
    instr: &Instruction,
    local_seen: &std::collections::HashSet<TempId>,
    resume_unsound: &std::collections::HashSet<TempId>,
    diags: &mut DiagnosticBag,
    fname: &str,
    block_name: &str,
) {
    let mut check_use = |v: &Value| {
        if let Value::Temp(t) = v {
            let Some(&def_block) = env.def_block.get(t) else {
                diags.push(Diagnostic::error(
                    "V-DOM-001",
                    format!("function {}: block {}: use of undefined temp %{}", fname, block_name, t.0),
                ));
                return;
            };
            let dominated = if def_block == bid {
                local_seen.contains(t) && !resume_unsound.contains(t)
            } else if dom.is_reachable(bid) {
                dom.dominates(def_block, bid)
            } else {
                false
            };
            if !dominated {
                diags.push(Diagnostic::error(
                    "V-DOM-002",
                    format!("function {}: block {}: use of %{} is not dominated by its definition", fname, block_name, t.0),
                ));
            }
        }
    };

    for v in &instr.operands {
        check_use(v);
    }
    // A branch target's arguments are evaluated at the branch instruction,
    // not at the target block — so they are checked against `bid`, the
    // branching block, exactly like any other operand here.
    for t in &instr.targets {
        for v in &t.args {
            check_use(v);
        }
    }
    let _ = m;
}

/// `switch.i32`'s case keys must be distinct 32-bit values (§2): two arms
/// for the same key would leave the scrutinee's destination ambiguous.
fn check_switch_keys(instr: &Instruction, diags: &mut DiagnosticBag, fname: &str, block_name: &str) {
    let mut seen: std::collections::HashSet<i32> = std::collections::HashSet::new();
    for &k in &instr.case_keys {
        if !seen.insert(k) {
            diags.push(Diagnostic::error(
                "V-SWITCH-001",
                format!("function {}: block {}: switch.i32 has duplicate case key {}", fname, block_name, k),
            ));
        }
    }
}

fn check_edge(m: &Module, f: &Function, target: &viper_il::Target, env: &Env, diags: &mut DiagnosticBag, fname: &str) {
    let Some(bid) = f.block_index(target.label) else { return };
    let params = &f.block(bid).params;
    if params.len() != target.args.len() {
        diags.push(Diagnostic::error(
            "V-EDGE-001",
            format!(
                "function {}: branch to {} passes {} argument(s), expected {}",
                fname, name(m, target.label), target.args.len(), params.len()
            ),
        ));
        return;
    }
    for (p, v) in params.iter().zip(&target.args) {
        let actual = type_of_value(v, env);
        let ok = if is_untyped_int_literal(v) { p.ty.is_integer() } else { actual == Some(p.ty) || is_widening_int(actual, p.ty) };
        if !ok {
            diags.push(Diagnostic::error(
                "V-EDGE-002",
                format!(
                    "function {}: branch to {}: argument type mismatch for {} (expected {}, got {:?})",
                    fname, name(m, target.label), name(m, p.name), p.ty, actual
                ),
            ));
        }
    }
}

fn check_call_contract(m: &Module, instr: &Instruction, env: &Env, diags: &mut DiagnosticBag, fname: &str) {
    match instr.op {
        Opcode::Call => {
            let Some(callee) = instr.callee else {
                diags.push(Diagnostic::error("V-CALL-001", format!("function {}: call with no callee", fname)));
                return;
            };
            let (ret, declared): (Ty, Vec<Ty>) = if let Some(id) = m.find_function(callee) {
                let f = m.function(id);
                (f.ret, f.params.iter().map(|p| p.ty).collect())
            } else if let Some(sig) = m.find_extern(callee) {
                (sig.decl.ret, sig.params.clone())
            } else {
                return; // already reported by check_symbols
            };
            check_call_args(fname, &declared, &instr.operands, env, diags);
            if let Some(t) = instr.ty {
                if t != ret && ret != Ty::Void {
                    diags.push(Diagnostic::error(
                        "V-CALL-002",
                        format!("function {}: call result type {} does not match callee's declared return type {}", fname, t, ret),
                    ));
                }
            }
        }
        Opcode::CallIndirect => {
            let Some(fnval) = instr.operands.first() else {
                diags.push(Diagnostic::error("V-CALL-003", format!("function {}: call.indirect with no callee operand", fname)));
                return;
            };
            let actual = type_of_value(fnval, env);
            if actual != Some(Ty::Ptr) {
                diags.push(Diagnostic::error(
                    "V-CALL-004",
                    format!("function {}: call.indirect's callee operand must be ptr, got {:?}", fname, actual),
                ));
            }
            // Argument types for an indirect call are only known from the
            // provenance of the function pointer (addr_of's declared
            // signature), which this static pass does not track; the VM
            // enforces provenance at the `call.indirect` trap site instead.
        }
        _ => {}
    }
}

fn check_call_args(fname: &str, declared: &[Ty], args: &[Value], env: &Env, diags: &mut DiagnosticBag) {
    if declared.len() != args.len() {
        diags.push(Diagnostic::error(
            "V-CALL-005",
            format!("function {}: call passes {} argument(s), expected {}", fname, args.len(), declared.len()),
        ));
        return;
    }
    for (t, v) in declared.iter().zip(args) {
        let actual = type_of_value(v, env);
        let ok = if is_untyped_int_literal(v) { t.is_integer() } else { actual == Some(*t) || is_widening_int(actual, *t) };
        if !ok {
            diags.push(Diagnostic::error(
                "V-CALL-006",
                format!("function {}: call argument type mismatch (expected {}, got {:?})", fname, t, actual),
            ));
        }
    }
}

/// eh.entry may only appear as the first instruction of a block that some
/// `eh.push` in this function names as its handler target.
fn check_eh_shape(m: &Module, f: &Function, diags: &mut DiagnosticBag, fname: &str) {
    let mut handler_targets: std::collections::HashSet<viper_il::Symbol> = std::collections::HashSet::new();
    for block in &f.blocks {
        if let Some(term) = &block.terminator {
            if term.op == Opcode::EhPush {
                if let Some(t) = term.targets.first() {
                    handler_targets.insert(t.label);
                }
            }
        }
        for instr in &block.instrs {
            if instr.op == Opcode::EhPush {
                if let Some(t) = instr.targets.first() {
                    handler_targets.insert(t.label);
                }
            }
        }
    }

    for block in &f.blocks {
        for (i, instr) in block.instrs.iter().enumerate() {
            if instr.op == Opcode::EhEntry {
                if i != 0 {
                    diags.push(Diagnostic::error(
                        "V-EH-001",
                        format!("function {}: block {}: eh.entry must be the block's first instruction", fname, name(m, block.label)),
                    ));
                }
                if !handler_targets.contains(&block.label) {
                    diags.push(Diagnostic::error(
                        "V-EH-002",
                        format!(
                            "function {}: block {}: eh.entry appears in a block that is not an eh.push target",
                            fname, name(m, block.label)
                        ),
                    ));
                }
            }
        }
    }
}

/// A `resumetok` (the second result of `eh.entry`) is a capability scoped to
/// the handler block that received it (Design Notes, §9: "MUST NOT leak
/// `resumetok` values beyond the handler region"). The only sound use of one
/// is as the first operand of the `resume.same`/`resume.next`/`resume.label`
/// that terminates the very block `eh.entry` defined it in — anything else
/// (storing it, passing it to a call, returning it, handing it to another
/// block as an argument) would let it outlive the handler.
fn check_resumetok_scope(m: &Module, f: &Function, env: &Env, diags: &mut DiagnosticBag, fname: &str) {
    let is_tok = |t: &TempId| env.ty.get(t) == Some(&Ty::ResumeTok);

    for (bi, block) in f.blocks.iter().enumerate() {
        let bid = BlockId(bi as u32);
        for instr in block.all_instrs() {
            let consumes_here = matches!(instr.op, Opcode::ResumeSame | Opcode::ResumeNext | Opcode::ResumeLabel);
            for (idx, v) in instr.operands.iter().enumerate() {
                if let Value::Temp(t) = v {
                    if is_tok(t) {
                        let defined_here = env.def_block.get(t) == Some(&bid);
                        if !(consumes_here && idx == 0 && defined_here) {
                            diags.push(Diagnostic::error(
                                "V-TOK-001",
                                format!(
                                    "function {}: block {}: resumetok %{} is used somewhere other than the resume that consumes it in its own handler block",
                                    fname, name(m, block.label), t.0
                                ),
                            ));
                        }
                    }
                }
            }
            for target in &instr.targets {
                for v in &target.args {
                    if let Value::Temp(t) = v {
                        if is_tok(t) {
                            diags.push(Diagnostic::error(
                                "V-TOK-002",
                                format!(
                                    "function {}: block {}: resumetok %{} passed as a branch argument, escaping its handler block",
                                    fname, name(m, block.label), t.0
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::{parse, ModuleBuilder, Target};

    #[test]
    fn hello_world_verifies_clean() {
        let src = r#"il 0.1
extern @Viper.Console.PrintStr(str) -> void
global const str @.msg = "hello"
func @main() -> i64 { entry: %s = const_str @.msg  call @Viper.Console.PrintStr(%s)  ret 0 }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>());
    }

    #[test]
    fn undominated_use_across_sibling_blocks_is_rejected() {
        // %q is defined in block `one` but used in sibling block `two`,
        // which `one` does not dominate.
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let h = b.create_block(f, "h", vec![]).unwrap();
        let one = b.create_block(f, "one", vec![]).unwrap();
        let two = b.create_block(f, "two", vec![]).unwrap();
        let (lbl_one, lbl_two) = (b.intern("one"), b.intern("two"));
        b.emit_terminator(
            f, h, Opcode::Cbr, vec![Value::ConstBool(true)],
            vec![Target { label: lbl_one, args: vec![] }, Target { label: lbl_two, args: vec![] }],
            vec![], None, None,
        ).unwrap();
        let q = b.emit(f, one, Opcode::Add, vec![Value::ConstInt(1), Value::ConstInt(1)], Some(Ty::I64), None, None, None).unwrap().unwrap();
        b.emit_terminator(f, one, Opcode::Ret, vec![Value::Temp(q)], vec![], vec![], Some(Ty::I64), None).unwrap();
        b.emit_terminator(f, two, Opcode::Ret, vec![Value::Temp(q)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let m = b.finish();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-DOM-002"));
    }

    #[test]
    fn i1_result_widens_implicitly_into_an_i64_call_argument() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  %v0 = add 2, 2
  %v1 = scmp_gt %v0, 3
  call @Viper.Console.PrintI64(%v1)
  ret 0 }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>());
    }

    #[test]
    fn call_arity_mismatch_is_rejected() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry: call @Viper.Console.PrintI64()  ret 0 }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
    }

    #[test]
    fn resume_next_leaves_the_trapping_instructions_result_undominated() {
        // Mirrors the divide-by-zero-then-resume.next scenario: after the
        // handler resumes, control picks back up right after `sdiv.chk0`
        // without ever having run it, so `%q` must be rejected as
        // undominated at its use in the `call`.
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  eh.push ^h
  %q = sdiv.chk0 1, 0
  eh.pop
  call @Viper.Console.PrintI64(%q)
  ret 0
^h:
  %err, %tok = eh.entry
  resume.next %tok }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-DOM-002" && d.message.contains('q')));
    }

    #[test]
    fn resumetok_consumed_by_its_own_resume_verifies_clean() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  eh.push ^h
  %q = sdiv.chk0 1, 0
  eh.pop
  call @Viper.Console.PrintI64(%q)
  ret 0
^h:
  %err, %tok = eh.entry
  resume.same %tok }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.diagnostics.iter().any(|d| d.code.starts_with("V-TOK")), "{:?}", report.diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>());
    }

    #[test]
    fn resumetok_passed_as_a_call_argument_is_rejected() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
extern @Viper.Debug.Touch(ptr) -> void
func @main() -> i64 { entry:
  eh.push ^h
  %q = sdiv.chk0 1, 0
  eh.pop
  call @Viper.Console.PrintI64(%q)
  ret 0
^h:
  %err, %tok = eh.entry
  call @Viper.Debug.Touch(%tok)
  resume.same %tok }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-TOK-001"));
    }

    #[test]
    fn resumetok_forwarded_as_a_branch_argument_is_rejected() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  eh.push ^h
  %q = sdiv.chk0 1, 0
  eh.pop
  ret %q
^h:
  %err, %tok = eh.entry
  br ^relay(%tok)
^relay:
  resume.same %tok }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-TOK-002"));
    }

    #[test]
    fn switch_with_default_verifies_clean() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  switch.i32 2, ^d, 1 -> ^one, 2 -> ^two
^one: call @Viper.Console.PrintI64(1) ret 0
^two: call @Viper.Console.PrintI64(2) ret 0
^d:   call @Viper.Console.PrintI64(0) ret 0 }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>());
    }

    #[test]
    fn switch_with_duplicate_case_key_is_rejected() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  switch.i32 2, ^d, 1 -> ^a, 1 -> ^b
^a: ret 0
^b: ret 1
^d: ret 2 }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-SWITCH-001"));
    }

    #[test]
    fn ret_operand_type_mismatch_is_rejected() {
        let src = r#"il 0.1
global const str @.msg = "hello"
func @main() -> i64 { entry:
  %s = const_str @.msg
  ret %s }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(!report.is_ok());
        assert!(report.diagnostics.iter().any(|d| d.code == "V-TYPE-001"));
    }

    #[test]
    fn bare_return_values_verify_clean() {
        // Every literal end-to-end scenario returns a bare constant or temp
        // from `ret` with no type annotation in the grammar; this must not
        // be rejected by mistaking `ret`'s missing `instr.ty` for a type
        // mismatch against the function's declared return type.
        let src = r#"il 0.1
func @main() -> i64 { entry:
  %q = add 1, 2
  ret %q }
"#;
        let m = parse(src).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().map(|d| &d.message).collect::<Vec<_>>());
    }
}
