//! Folds pure, non-trapping instructions whose operands are all compile-time
//! constants, propagating the result to every use and then dropping the
//! instruction. Anything the opcode table marks `may_trap` is left alone —
//! folding a trap at compile time would change *when* the program observes
//! it, which the determinism guarantee treats as an observable difference.

use rustc_hash::FxHashMap;

use viper_il::{Function, Module, Opcode, TempId, Value};

pub fn constfold(module: &mut Module) {
    for f in &mut module.functions {
        fold_function(f);
    }
}

fn fold_function(f: &mut Function) {
    let mut consts: FxHashMap<TempId, Value> = FxHashMap::default();
    let mut changed = true;
    while changed {
        changed = false;
        for b in &mut f.blocks {
            for instr in b.instrs.iter_mut().chain(b.terminator.iter_mut()) {
                for op in instr.operands.iter_mut() {
                    substitute(op, &consts);
                }
                for t in instr.targets.iter_mut() {
                    for a in t.args.iter_mut() {
                        substitute(a, &consts);
                    }
                }
                if let Some(&(dest, _)) = instr.results.first() {
                    if instr.results.len() == 1 && !consts.contains_key(&dest) && !instr.op.may_trap() {
                        if let Some(v) = try_fold(instr.op, &instr.operands) {
                            consts.insert(dest, v);
                            changed = true;
                        }
                    }
                }
            }
        }
    }

    for b in &mut f.blocks {
        b.instrs.retain(|instr| {
            let folded_away = instr.results.len() == 1 && consts.contains_key(&instr.results[0].0);
            !(folded_away && !instr.op.has_side_effect())
        });
    }
}

fn substitute(v: &mut Value, consts: &FxHashMap<TempId, Value>) {
    if let Value::Temp(t) = *v {
        if let Some(r) = consts.get(&t) {
            *v = r.clone();
        }
    }
}

fn try_fold(op: Opcode, operands: &[Value]) -> Option<Value> {
    use Opcode::*;

    let as_int = |v: &Value| match v {
        Value::ConstInt(i) => Some(*i),
        Value::ConstBool(b) => Some(*b as i64),
        _ => None,
    };
    let as_float = |v: &Value| match v {
        Value::ConstFloat(f) => Some(*f),
        _ => None,
    };

    match op {
        Add | Sub | Mul | And | Or | Xor | Shl | LShr | AShr => {
            let (a, b) = (as_int(operands.first()?)?, as_int(operands.get(1)?)?);
            Some(Value::ConstInt(match op {
                Add => a.wrapping_add(b),
                Sub => a.wrapping_sub(b),
                Mul => a.wrapping_mul(b),
                And => a & b,
                Or => a | b,
                Xor => a ^ b,
                Shl => a.wrapping_shl(b as u32),
                LShr => (a as u64).wrapping_shr(b as u32) as i64,
                AShr => a.wrapping_shr(b as u32),
                _ => unreachable!(),
            }))
        }
        IcmpEq | IcmpNe | ScmpLt | ScmpLe | ScmpGt | ScmpGe | UcmpLt | UcmpLe | UcmpGt | UcmpGe => {
            let (a, b) = (as_int(operands.first()?)?, as_int(operands.get(1)?)?);
            let (ua, ub) = (a as u64, b as u64);
            Some(Value::ConstBool(match op {
                IcmpEq => a == b,
                IcmpNe => a != b,
                ScmpLt => a < b,
                ScmpLe => a <= b,
                ScmpGt => a > b,
                ScmpGe => a >= b,
                UcmpLt => ua < ub,
                UcmpLe => ua <= ub,
                UcmpGt => ua > ub,
                UcmpGe => ua >= ub,
                _ => unreachable!(),
            }))
        }
        FAdd | FSub | FMul | FDiv => {
            let (a, b) = (as_float(operands.first()?)?, as_float(operands.get(1)?)?);
            Some(Value::ConstFloat(match op {
                FAdd => a + b,
                FSub => a - b,
                FMul => a * b,
                FDiv => a / b,
                _ => unreachable!(),
            }))
        }
        FcmpEq | FcmpNe | FcmpLt | FcmpLe | FcmpGt | FcmpGe => {
            let (a, b) = (as_float(operands.first()?)?, as_float(operands.get(1)?)?);
            Some(Value::ConstBool(match op {
                FcmpEq => a == b,
                FcmpNe => a != b,
                FcmpLt => a < b,
                FcmpLe => a <= b,
                FcmpGt => a > b,
                FcmpGe => a >= b,
                _ => unreachable!(),
            }))
        }
        SiToFp => as_int(operands.first()?).map(|a| Value::ConstFloat(a as f64)),
        FpToSi => as_float(operands.first()?).map(|a| Value::ConstInt(a as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::Opcode as Op;

    fn main_function(m: &Module) -> &Function {
        let id = m.find_function(m.interner.lookup("@main").unwrap()).unwrap();
        m.function(id)
    }

    /// The literal E2 scenario: `add 2, 2` then `scmp_gt %v0, 3` should both
    /// fold to a single `ret 1`.
    #[test]
    fn arithmetic_and_branch_fold_to_a_literal_constant() {
        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  %v0 = add 2, 2
  %v1 = scmp_gt %v0, 3
  call @Viper.Console.PrintI64(%v1)
  ret 0 }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        constfold(&mut m);
        let f = main_function(&m);
        let entry = &f.blocks[0];
        assert!(entry.instrs.iter().all(|i| i.op != Op::Add && i.op != Op::ScmpGt));
        let call = entry.instrs.iter().find(|i| i.op == Op::Call).unwrap();
        assert_eq!(call.operands, vec![Value::ConstBool(true)]);
    }

    /// A divide that could trap at runtime must survive folding untouched,
    /// constant operands or not.
    #[test]
    fn trapping_opcodes_are_never_folded() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  %q = sdiv.chk0 10, 2
  ret %q }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        constfold(&mut m);
        let f = main_function(&m);
        assert!(f.blocks[0].instrs.iter().any(|i| i.op == Op::SDivChk0));
    }

    #[test]
    fn chained_folds_reach_a_fixpoint_in_one_function() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  %a = add 1, 1
  %b = add %a, 1
  %c = add %b, 1
  ret %c }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        constfold(&mut m);
        let f = main_function(&m);
        assert!(f.blocks[0].instrs.is_empty());
        assert_eq!(f.blocks[0].terminator.as_ref().unwrap().operands, vec![Value::ConstInt(4)]);
    }

    #[test]
    fn folding_preserves_vm_output() {
        use viper_rt::bridge::Bridge;
        use viper_rt::name_map::NameMap;
        use viper_vm::{Interpreter, RunOutcome};

        let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  %v0 = add 2, 2
  %v1 = scmp_gt %v0, 3
  call @Viper.Console.PrintI64(%v1)
  ret 0 }
"#;
        let before = viper_il::parse(src).expect("valid IL");
        let mut after = before.clone();
        constfold(&mut after);

        let report = viper_verify::verify_module(&after);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().collect::<Vec<_>>());

        for m in [&before, &after] {
            let bridge = Bridge::with_writer(Box::new(Vec::new()));
            let mut vm = Interpreter::new(m, &bridge, NameMap::for_load());
            assert!(matches!(vm.run("@main"), RunOutcome::Exit(0)));
        }
    }
}
