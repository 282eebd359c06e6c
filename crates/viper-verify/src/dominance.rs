//! Iterative dominator computation over one function's control-flow graph
//! (blocks as nodes, `terminator.targets` as edges). Used by the verifier's
//! dominance pass (C5 responsibility 5): a standard fixpoint over reverse
//! postorder, not a Lengauer-Tarjan tree, since function sizes here are
//! small enough that simplicity wins.

use viper_il::{BlockId, Function};

pub struct DomInfo {
    reachable: Vec<bool>,
    dom: Vec<Vec<bool>>,
}

impl DomInfo {
    /// Does `a` dominate `b`? Every block dominates itself. Blocks
    /// unreachable from the entry block are defined to dominate only
    /// themselves.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        if !self.reachable[b.index()] {
            return false;
        }
        self.dom[b.index()][a.index()]
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.reachable[b.index()]
    }
}

pub fn successors(f: &Function, b: BlockId) -> Vec<BlockId> {
    let block = f.block(b);
    let mut out = Vec::new();
    if let Some(term) = &block.terminator {
        for t in &term.targets {
            if let Some(bid) = f.block_index(t.label) {
                out.push(bid);
            }
        }
    }
    out
}

fn predecessors(f: &Function, reachable: &[bool]) -> Vec<Vec<usize>> {
    let n = f.blocks.len();
    let mut preds = vec![Vec::new(); n];
    for i in 0..n {
        if !reachable[i] {
            continue;
        }
        for s in successors(f, BlockId(i as u32)) {
            preds[s.index()].push(i);
        }
    }
    preds
}

pub fn compute(f: &Function) -> DomInfo {
    let n = f.blocks.len();
    if n == 0 {
        return DomInfo { reachable: Vec::new(), dom: Vec::new() };
    }

    let mut reachable = vec![false; n];
    reachable[0] = true;
    let mut stack = vec![BlockId(0)];
    while let Some(b) = stack.pop() {
        for s in successors(f, b) {
            if !reachable[s.index()] {
                reachable[s.index()] = true;
                stack.push(s);
            }
        }
    }

    let preds = predecessors(f, &reachable);

    let mut dom = vec![vec![false; n]; n];
    dom[0][0] = true;
    for b in 1..n {
        if reachable[b] {
            for i in 0..n {
                dom[b][i] = reachable[i];
            }
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for b in 1..n {
            if !reachable[b] || preds[b].is_empty() {
                continue;
            }
            let mut new_dom = vec![true; n];
            for &p in &preds[b] {
                for i in 0..n {
                    new_dom[i] &= dom[p][i];
                }
            }
            new_dom[b] = true;
            if new_dom != dom[b] {
                dom[b] = new_dom;
                changed = true;
            }
        }
    }

    DomInfo { reachable, dom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::ModuleBuilder;
    use viper_il::{Opcode, Target, Ty, Value};

    #[test]
    fn linear_chain_each_block_dominates_the_next() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let e = b.create_block(f, "entry", vec![]).unwrap();
        let m1 = b.create_block(f, "mid", vec![]).unwrap();
        let ex = b.create_block(f, "exit", vec![]).unwrap();
        let (lbl_mid, lbl_exit) = (b.intern("mid"), b.intern("exit"));
        b.emit_terminator(f, e, Opcode::Br, vec![], vec![Target { label: lbl_mid, args: vec![] }], vec![], None, None).unwrap();
        b.emit_terminator(f, m1, Opcode::Br, vec![], vec![Target { label: lbl_exit, args: vec![] }], vec![], None, None).unwrap();
        b.emit_terminator(f, ex, Opcode::Ret, vec![Value::ConstInt(0)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let module = b.finish();
        let dom = compute(&module.functions[0]);
        assert!(dom.dominates(e, m1));
        assert!(dom.dominates(e, ex));
        assert!(!dom.dominates(m1, e));
    }

    #[test]
    fn diamond_join_is_dominated_only_by_the_common_header() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let h = b.create_block(f, "h", vec![]).unwrap();
        let l = b.create_block(f, "l", vec![]).unwrap();
        let r = b.create_block(f, "r", vec![]).unwrap();
        let j = b.create_block(f, "j", vec![]).unwrap();
        let (lbl_l, lbl_r, lbl_j) = (b.intern("l"), b.intern("r"), b.intern("j"));
        b.emit_terminator(
            f, h, Opcode::Cbr, vec![Value::ConstBool(true)],
            vec![Target { label: lbl_l, args: vec![] }, Target { label: lbl_r, args: vec![] }],
            vec![], None, None,
        ).unwrap();
        b.emit_terminator(f, l, Opcode::Br, vec![], vec![Target { label: lbl_j, args: vec![] }], vec![], None, None).unwrap();
        b.emit_terminator(f, r, Opcode::Br, vec![], vec![Target { label: lbl_j, args: vec![] }], vec![], None, None).unwrap();
        b.emit_terminator(f, j, Opcode::Ret, vec![Value::ConstInt(0)], vec![], vec![], Some(Ty::I64), None).unwrap();
        let module = b.finish();
        let dom = compute(&module.functions[0]);
        assert!(dom.dominates(h, j));
        assert!(!dom.dominates(l, j));
        assert!(!dom.dominates(r, j));
    }
}
