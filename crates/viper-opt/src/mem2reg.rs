//! Promotes `alloca`/`load`/`store` triples to SSA block parameters.
//!
//! The dominance structure this needs is derived without building an
//! explicit dominator tree: blocks are visited in reverse postorder (a valid
//! topological order once the function's reachable subgraph is confirmed
//! acyclic), so every predecessor of a block has already contributed its
//! exit value by the time that block is processed. A block with a single
//! predecessor simply inherits its value; a block with several gets a new
//! parameter only when its predecessors actually disagree, and each
//! predecessor's terminator grows the matching extra argument in the same
//! pass that discovers the need for it.
//!
//! Functions whose reachable blocks contain a cycle are left untouched —
//! loops need a real dominance-frontier computation this pass doesn't do.

use rustc_hash::{FxHashMap, FxHashSet};

use viper_il::{BlockId, Function, Interner, Module, Opcode, Param, TempId, Ty, Value};

/// Runs alloca promotion over every function in `module`.
pub fn mem2reg(module: &mut Module) {
    let interner = &mut module.interner;
    for f in &mut module.functions {
        promote_function(interner, f);
    }
}

struct Alloca {
    temp: TempId,
    ty: Ty,
}

fn promote_function(interner: &mut Interner, f: &mut Function) {
    let allocas = promotable_allocas(f);
    if allocas.is_empty() {
        return;
    }

    let order = match reverse_postorder(f) {
        Some(o) if o.len() == f.blocks.len() => o,
        _ => return,
    };
    let preds = predecessors(f);
    let to_remove: FxHashSet<TempId> = allocas.iter().map(|a| a.temp).collect();

    // alloca temp -> value live out of a given block, keyed by block index.
    let mut exit_value: FxHashMap<(usize, TempId), Value> = FxHashMap::default();
    // eliminated load result -> the value it always produced.
    let mut subst: FxHashMap<TempId, Value> = FxHashMap::default();

    for &blk in &order {
        let mut current: FxHashMap<TempId, Value> = FxHashMap::default();

        for a in &allocas {
            let block_preds = preds.get(&blk).cloned().unwrap_or_default();
            let incoming = if blk.index() == order[0].index() {
                None
            } else if block_preds.len() == 1 {
                exit_value.get(&(block_preds[0].index(), a.temp)).cloned()
            } else {
                let vals: Vec<Option<Value>> =
                    block_preds.iter().map(|p| exit_value.get(&(p.index(), a.temp)).cloned()).collect();
                let first = vals.first().cloned().flatten();
                let unanimous = !vals.is_empty() && vals.iter().all(|v| *v == first);
                if unanimous {
                    first
                } else {
                    let label = f.block(blk).label;
                    let temp = TempId(f.next_temp);
                    f.next_temp += 1;
                    let name = interner.intern(&format!("%m2r.{}", temp.0));
                    f.block_mut(blk).params.push(Param { name, ty: a.ty, temp });
                    for (p, v) in block_preds.iter().zip(vals.into_iter()) {
                        let v = v.unwrap_or(zero_value(a.ty));
                        if let Some(term) = f.block_mut(*p).terminator.as_mut() {
                            if let Some(t) = term.targets.iter_mut().find(|t| t.label == label) {
                                t.args.push(v);
                            }
                        }
                    }
                    Some(Value::Temp(temp))
                }
            };
            if let Some(v) = incoming {
                current.insert(a.temp, v);
            }
        }

        let b = f.block_mut(blk);
        for instr in b.instrs.iter_mut().chain(b.terminator.iter_mut()) {
            for op in instr.operands.iter_mut() {
                substitute(op, &subst);
            }
            for t in instr.targets.iter_mut() {
                for a in t.args.iter_mut() {
                    substitute(a, &subst);
                }
            }
            match instr.op {
                Opcode::Load => {
                    if let Some(Value::Temp(ptr)) = instr.operands.first().copied() {
                        if let Some(v) = current.get(&ptr).cloned() {
                            if let Some(&(dest, _)) = instr.results.first() {
                                subst.insert(dest, v);
                            }
                        }
                    }
                }
                Opcode::Store => {
                    if let (Some(Value::Temp(ptr)), Some(v)) =
                        (instr.operands.first().copied(), instr.operands.get(1).cloned())
                    {
                        if to_remove.contains(&ptr) {
                            current.insert(ptr, v);
                        }
                    }
                }
                _ => {}
            }
        }

        for a in &allocas {
            if let Some(v) = current.get(&a.temp).cloned() {
                exit_value.insert((blk.index(), a.temp), v);
            }
        }
    }

    for b in &mut f.blocks {
        b.instrs.retain(|instr| !defines_or_addresses(instr, &to_remove));
    }
}

fn substitute(v: &mut Value, subst: &FxHashMap<TempId, Value>) {
    if let Value::Temp(t) = *v {
        if let Some(r) = subst.get(&t) {
            *v = r.clone();
        }
    }
}

fn defines_or_addresses(instr: &viper_il::Instruction, to_remove: &FxHashSet<TempId>) -> bool {
    match instr.op {
        Opcode::Alloca => instr.results.first().map(|&(t, _)| to_remove.contains(&t)).unwrap_or(false),
        Opcode::Load | Opcode::Store => {
            matches!(instr.operands.first(), Some(Value::Temp(t)) if to_remove.contains(t))
        }
        _ => false,
    }
}

fn zero_value(ty: Ty) -> Value {
    match ty {
        Ty::F64 => Value::ConstFloat(0.0),
        Ty::I1 => Value::ConstBool(false),
        Ty::Ptr | Ty::Str | Ty::Error | Ty::ResumeTok => Value::Null,
        _ => Value::ConstInt(0),
    }
}

/// An alloca is promotable when every use of its result is the address
/// operand of a `load` or `store` on that same element type — nothing else
/// may reference the pointer (no `gep`, no passing it to a call, no storing
/// it through another pointer).
fn promotable_allocas(f: &Function) -> Vec<Alloca> {
    let mut candidates = Vec::new();
    for b in &f.blocks {
        for instr in b.all_instrs() {
            if instr.op == Opcode::Alloca {
                if let Some(&(t, _)) = instr.results.first() {
                    candidates.push(t);
                }
            }
        }
    }

    let mut out = Vec::new();
    'candidate: for temp in candidates {
        let mut elem_ty = None;
        for b in &f.blocks {
            for instr in b.all_instrs() {
                for (i, op) in instr.operands.iter().enumerate() {
                    if *op != Value::Temp(temp) {
                        continue;
                    }
                    let allowed = matches!((instr.op, i), (Opcode::Load, 0) | (Opcode::Store, 0));
                    if !allowed {
                        continue 'candidate;
                    }
                    let ty = instr.ty.unwrap_or(Ty::I64);
                    match elem_ty {
                        None => elem_ty = Some(ty),
                        Some(prev) if prev != ty => continue 'candidate,
                        _ => {}
                    }
                }
                for t in &instr.targets {
                    if t.args.contains(&Value::Temp(temp)) {
                        continue 'candidate;
                    }
                }
            }
        }
        if let Some(ty) = elem_ty {
            out.push(Alloca { temp, ty });
        }
    }
    out
}

fn successors(f: &Function, blk: BlockId) -> Vec<BlockId> {
    let b = f.block(blk);
    match &b.terminator {
        Some(t) => t.targets.iter().filter_map(|tg| f.block_index(tg.label)).collect(),
        None => Vec::new(),
    }
}

fn predecessors(f: &Function) -> FxHashMap<BlockId, Vec<BlockId>> {
    let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for i in 0..f.blocks.len() {
        preds.entry(BlockId::from(i)).or_default();
    }
    for i in 0..f.blocks.len() {
        let b = BlockId::from(i);
        for s in successors(f, b) {
            preds.entry(s).or_default().push(b);
        }
    }
    preds
}

/// `None` if the reachable subgraph from block 0 has a cycle.
fn reverse_postorder(f: &Function) -> Option<Vec<BlockId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Unvisited,
        Active,
        Done,
    }

    let mut state = vec![State::Unvisited; f.blocks.len()];
    let mut postorder = Vec::with_capacity(f.blocks.len());
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::from(0usize), 0)];
    state[0] = State::Active;

    while let Some((blk, next_child)) = stack.pop() {
        let succs = successors(f, blk);
        if next_child < succs.len() {
            let child = succs[next_child];
            stack.push((blk, next_child + 1));
            match state[child.index()] {
                State::Active => return None,
                State::Done => {}
                State::Unvisited => {
                    state[child.index()] = State::Active;
                    stack.push((child, 0));
                }
            }
        } else {
            state[blk.index()] = State::Done;
            postorder.push(blk);
        }
    }

    postorder.reverse();
    Some(postorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_function(m: &Module) -> &Function {
        let id = m.find_function(m.interner.lookup("@main").unwrap()).unwrap();
        m.function(id)
    }

    /// The literal diamond: `alloca`, store 2 down one arm, store 3 down the
    /// other, `load` back at the join. After promotion the join block should
    /// gain one `i64` parameter and the `load`/`store`/`alloca` triple should
    /// be gone.
    #[test]
    fn diamond_gets_a_single_join_parameter() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  %s = alloca 8
  %c = icmp_eq 0, 0
  cbr %c, ^t, ^f
^t: store i64, %s, 2
  br ^join
^f: store i64, %s, 3
  br ^join
^join: %v = load i64, %s
  ret %v }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        mem2reg(&mut m);

        let f = main_function(&m);
        let join = f.blocks.iter().find(|b| m.interner.resolve(b.label) == "join").unwrap();
        assert_eq!(join.params.len(), 1, "join block should gain exactly one block parameter");
        assert_eq!(join.params[0].ty, Ty::I64);

        for b in &f.blocks {
            for instr in b.all_instrs() {
                assert_ne!(instr.op, Opcode::Alloca);
                assert_ne!(instr.op, Opcode::Load);
                assert_ne!(instr.op, Opcode::Store);
            }
        }

        // Each arm's `br` now carries the stored constant as the join argument.
        for label in ["t", "f"] {
            let b = f.blocks.iter().find(|b| m.interner.resolve(b.label) == label).unwrap();
            let term = b.terminator.as_ref().unwrap();
            assert_eq!(term.targets.len(), 1);
            assert_eq!(term.targets[0].args.len(), 1);
        }
    }

    #[test]
    fn running_the_promoted_diamond_preserves_the_result() {
        use viper_rt::bridge::Bridge;
        use viper_rt::name_map::NameMap;
        use viper_vm::{Interpreter, RunOutcome};

        let src = r#"il 0.1
func @main() -> i64 { entry:
  %s = alloca 8
  %c = icmp_eq 0, 0
  cbr %c, ^t, ^f
^t: store i64, %s, 2
  br ^join
^f: store i64, %s, 3
  br ^join
^join: %v = load i64, %s
  ret %v }
"#;
        let before = viper_il::parse(src).expect("valid IL");
        let mut after = before.clone();
        mem2reg(&mut after);

        let report = viper_verify::verify_module(&after);
        assert!(report.is_ok(), "{:?}", report.diagnostics.iter().collect::<Vec<_>>());

        for m in [&before, &after] {
            let bridge = Bridge::with_writer(Box::new(Vec::new()));
            let mut vm = Interpreter::new(m, &bridge, NameMap::for_load());
            assert!(matches!(vm.run("@main"), RunOutcome::Exit(0)));
        }
    }

    /// An alloca whose address escapes into a call argument must not be
    /// promoted: the pointer itself, not just the stored value, is live.
    #[test]
    fn escaping_alloca_is_left_alone() {
        let src = r#"il 0.1
extern @Viper.Debug.Touch(ptr) -> void
func @main() -> i64 { entry:
  %s = alloca 8
  store i64, %s, 1
  call @Viper.Debug.Touch(%s)
  ret 0 }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        mem2reg(&mut m);
        let f = main_function(&m);
        let has_alloca = f.blocks.iter().flat_map(|b| b.all_instrs()).any(|i| i.op == Opcode::Alloca);
        assert!(has_alloca, "an alloca passed to a call must not be promoted");
    }

    #[test]
    fn straight_line_alloca_needs_no_block_parameter() {
        let src = r#"il 0.1
func @main() -> i64 { entry:
  %s = alloca 8
  store i64, %s, 41
  %v = load i64, %s
  ret %v }
"#;
        let mut m = viper_il::parse(src).expect("valid IL");
        mem2reg(&mut m);
        let f = main_function(&m);
        assert!(f.blocks[0].params.is_empty());
        assert!(f.blocks.iter().flat_map(|b| b.all_instrs()).all(|i| i.op != Opcode::Alloca));
        let ret = f.blocks[0].terminator.as_ref().unwrap();
        assert_eq!(ret.operands, vec![Value::ConstInt(41)]);
    }
}
