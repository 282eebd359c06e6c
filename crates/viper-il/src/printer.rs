//! Serialization to the textual IL grammar (§4.3). Emission is in canonical
//! order: version, optional target, externs (insertion order), globals
//! (insertion order), functions (insertion order). Within a function,
//! blocks are walked entry-first then depth-first preorder, breaking ties
//! by label; temp ids are renumbered into the canonical dense range at
//! emission time, which is what makes `parse(serialize(M)) == M` hold up to
//! the renaming the spec allows.

use crate::ids::{BlockId, TempId};
use crate::module::{GlobalInit, Instruction, Module, Param, Target};
use crate::opcode::Opcode;
use crate::ty::Ty;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::fmt::Write;

pub fn serialize(m: &Module) -> String {
    let mut out = String::new();
    writeln!(out, "il {}.{}.{}", m.version.0, m.version.1, m.version.2).unwrap();
    if let Some(t) = &m.target {
        writeln!(out, "target {:?}", t).unwrap();
    }
    for e in &m.externs {
        let params = e.params.iter().map(|t| t.mnemonic()).collect::<Vec<_>>().join(", ");
        writeln!(
            out,
            "extern {}({}) -> {}",
            m.interner.resolve(e.decl.name),
            params,
            e.decl.ret
        )
        .unwrap();
    }
    for g in &m.globals {
        let kw = if g.is_const { "const " } else { "" };
        writeln!(
            out,
            "global {}{} {} = {}",
            kw,
            g.ty,
            m.interner.resolve(g.name),
            format_init(&g.init)
        )
        .unwrap();
    }
    for f in &m.functions {
        out.push_str(&serialize_function(m, f));
        out.push('\n');
    }
    out
}

fn format_init(init: &GlobalInit) -> String {
    match init {
        GlobalInit::Int(v) => v.to_string(),
        GlobalInit::Float(v) => format!("{:?}", v),
        GlobalInit::Str(s) => format!("{:?}", s),
        GlobalInit::Zero => "zeroinitializer".to_string(),
    }
}

fn serialize_function(m: &Module, f: &crate::module::Function) -> String {
    let mut out = String::new();
    let params = f
        .params
        .iter()
        .map(|p| format!("%{}: {}", m.interner.resolve(p.name), p.ty))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "func {}({}) -> {} {{", m.interner.resolve(f.name), params, f.ret).unwrap();

    // Canonical temp renumbering: walk the function in emission order and
    // assign dense ids as each result is first seen. Parameters keep
    // %0..%n-1 by construction already.
    let mut renumber: FxHashMap<TempId, TempId> = FxHashMap::default();
    for (i, p) in f.params.iter().enumerate() {
        let _ = p;
        renumber.insert(TempId(i as u32), TempId(i as u32));
    }
    let mut next = f.params.len() as u32;

    let order = canonical_block_order(f);
    for &bid in &order {
        let block = f.block(bid);
        for instr in block.all_instrs() {
            for &(t, _) in &instr.results {
                renumber.entry(t).or_insert_with(|| {
                    let id = TempId(next);
                    next += 1;
                    id
                });
            }
        }
    }

    for &bid in &order {
        let block = f.block(bid);
        let bparams = block
            .params
            .iter()
            .map(|p: &Param| format!("%{}: {}", m.interner.resolve(p.name), p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        if bparams.is_empty() {
            writeln!(out, "{}:", m.interner.resolve(block.label)).unwrap();
        } else {
            writeln!(out, "{}({}):", m.interner.resolve(block.label), bparams).unwrap();
        }
        for instr in block.all_instrs() {
            writeln!(out, "  {}", format_instr(m, instr, &renumber)).unwrap();
        }
    }
    writeln!(out, "}}").unwrap();
    out
}

/// Entry first, then depth-first preorder over successor edges
/// (`targets`), breaking ties by label text, visiting each block once.
fn canonical_block_order(f: &crate::module::Function) -> Vec<BlockId> {
    let mut visited = vec![false; f.blocks.len()];
    let mut order = Vec::with_capacity(f.blocks.len());
    let mut stack = vec![BlockId(0)];
    while let Some(bid) = stack.pop() {
        if visited[bid.index()] {
            continue;
        }
        visited[bid.index()] = true;
        order.push(bid);
        let block = f.block(bid);
        let mut succs: Vec<BlockId> = Vec::new();
        if let Some(term) = &block.terminator {
            for t in &term.targets {
                if let Some(bid2) = f.block_index(t.label) {
                    if !visited[bid2.index()] {
                        succs.push(bid2);
                    }
                }
            }
        }
        succs.sort_by_key(|b| f.block(*b).label.0);
        succs.reverse();
        stack.extend(succs);
    }
    // any block unreachable from entry (dead code) is still emitted, in
    // declaration order, after the reachable set.
    for (i, v) in visited.iter().enumerate() {
        if !v {
            order.push(BlockId(i as u32));
        }
    }
    order
}

fn rn(renumber: &FxHashMap<TempId, TempId>, t: TempId) -> TempId {
    *renumber.get(&t).unwrap_or(&t)
}

fn format_value(m: &Module, v: &Value, renumber: &FxHashMap<TempId, TempId>) -> String {
    match v {
        Value::Temp(t) => format!("%{}", rn(renumber, *t).0),
        Value::ConstInt(i) => i.to_string(),
        Value::ConstFloat(f) => format!("{:?}", f),
        Value::ConstBool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::GlobalRef(s) => m.interner.resolve(*s).to_string(),
        Value::BlockAddr(s) => format!("^{}", m.interner.resolve(*s)),
    }
}

fn format_target(m: &Module, t: &Target, renumber: &FxHashMap<TempId, TempId>) -> String {
    if t.args.is_empty() {
        format!("^{}", m.interner.resolve(t.label))
    } else {
        let args = t.args.iter().map(|v| format_value(m, v, renumber)).collect::<Vec<_>>().join(", ");
        format!("^{}({})", m.interner.resolve(t.label), args)
    }
}

fn format_instr(m: &Module, instr: &Instruction, renumber: &FxHashMap<TempId, TempId>) -> String {
    let lhs = if !instr.results.is_empty() {
        let names = instr
            .results
            .iter()
            .map(|(t, _)| format!("%{}", rn(renumber, *t).0))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} = ", names)
    } else {
        String::new()
    };

    let operands = instr.operands.iter().map(|v| format_value(m, v, renumber)).collect::<Vec<_>>();

    match instr.op {
        Opcode::Call | Opcode::CallIndirect => {
            let callee = match instr.op {
                Opcode::Call => m.interner.resolve(instr.callee.unwrap()).to_string(),
                _ => operands.first().cloned().unwrap_or_default(),
            };
            let args = if instr.op == Opcode::CallIndirect { &operands[1..] } else { &operands[..] };
            format!("{}{} {}({})", lhs, instr.op, callee, args.join(", "))
        }
        Opcode::ConstStr | Opcode::AddrOf => {
            format!("{}{} {}", lhs, instr.op, m.interner.resolve(instr.callee.unwrap()))
        }
        Opcode::Br => format!("{}br {}", lhs, format_target(m, &instr.targets[0], renumber)),
        Opcode::Cbr => format!(
            "{}cbr {}, {}, {}",
            lhs,
            operands[0],
            format_target(m, &instr.targets[0], renumber),
            format_target(m, &instr.targets[1], renumber)
        ),
        Opcode::SwitchI32 => {
            let mut cases = Vec::new();
            for (k, t) in instr.case_keys.iter().zip(instr.targets[1..].iter()) {
                cases.push(format!("{} -> {}", k, format_target(m, t, renumber)));
            }
            format!(
                "{}switch.i32 {}, {}, {}",
                lhs,
                operands[0],
                format_target(m, &instr.targets[0], renumber),
                cases.join(", ")
            )
        }
        Opcode::EhPush => format!("{}eh.push {}", lhs, format_target(m, &instr.targets[0], renumber)),
        Opcode::ResumeLabel => format!(
            "{}resume.label {}, {}",
            lhs,
            operands[0],
            format_target(m, &instr.targets[0], renumber)
        ),
        Opcode::Ret if operands.is_empty() => format!("{}ret", lhs),
        Opcode::Ret => format!("{}ret {}", lhs, operands.join(", ")),
        Opcode::Load => {
            let ty = instr.ty.map(|t| format!("{}, ", t)).unwrap_or_default();
            format!("{}{} {}{}", lhs, instr.op, ty, operands.join(", "))
        }
        Opcode::Store => {
            let ty = instr.ty.map(|t| format!("{}, ", t)).unwrap_or_default();
            format!("{}{} {}{}", lhs, instr.op, ty, operands.join(", "))
        }
        Opcode::Alloca => format!("{}alloca {}", lhs, operands[0]),
        _ if operands.is_empty() => format!("{}{}", lhs, instr.op),
        _ => format!("{}{} {}", lhs, instr.op, operands.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::module::SourceLoc;

    #[test]
    fn hello_world_serializes_with_canonical_sections() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        b.declare_extern("@Viper.Console.PrintStr", Ty::Void, vec![Ty::Str]).unwrap();
        b.add_global("@.msg", Ty::Str, true, GlobalInit::Str("hello".into())).unwrap();
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        let s = b
            .emit(f, blk, Opcode::ConstStr, vec![], Some(Ty::Str), None, Some("@.msg"), None)
            .unwrap()
            .unwrap();
        b.emit(
            f,
            blk,
            Opcode::Call,
            vec![Value::Temp(s)],
            None,
            None,
            Some("@Viper.Console.PrintStr"),
            None,
        )
        .unwrap();
        b.emit_terminator(f, blk, Opcode::Ret, vec![Value::ConstInt(0)], vec![], vec![], Some(Ty::I64), None)
            .unwrap();
        let m = b.finish();
        let text = serialize(&m);
        assert!(text.starts_with("il 0.1.0\n"));
        assert!(text.contains("extern @Viper.Console.PrintStr(str) -> void"));
        assert!(text.contains("global const str @.msg = \"hello\""));
        assert!(text.contains("func @main() -> i64 {"));
        assert!(text.contains("ret 0"));
        let _ = SourceLoc { file: 0, line: 0, column: 0 };
    }
}
