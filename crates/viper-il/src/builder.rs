//! The builder API (C6): the single path through which frontends mutate a
//! module. Routing every mutation here is what keeps the block-single-
//! terminator invariant and the unique-temp rule from being violated by
//! frontend bugs.

use crate::error::BuilderError;
use crate::ids::{BlockId, FuncId, Symbol, TempId};
use crate::module::{
    BasicBlock, ExternDecl, ExternSig, Function, GlobalDef, GlobalInit, Instruction, Module,
    Param, SourceLoc, Target,
};
use crate::opcode::Opcode;
use crate::ty::Ty;
use crate::value::Value;

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(version: (u16, u16, u16)) -> Self {
        Self { module: Module::new(version) }
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.module.target = Some(target.into());
    }

    /// Idempotent: re-declaring the same signature is a no-op. A
    /// conflicting signature for an already-declared name fails with
    /// `DuplicateDefinition`.
    pub fn declare_extern(
        &mut self,
        name: &str,
        ret: Ty,
        params: Vec<Ty>,
    ) -> Result<(), BuilderError> {
        let sym = self.module.interner.intern(name);
        if let Some(existing) = self.module.find_extern(sym) {
            if existing.decl.ret == ret && existing.params == params {
                return Ok(());
            }
            return Err(BuilderError::DuplicateDefinition { name: name.to_string() });
        }
        self.module.externs.push(ExternSig { decl: ExternDecl { name: sym, ret }, params });
        self.module.reindex();
        Ok(())
    }

    pub fn add_global(
        &mut self,
        name: &str,
        ty: Ty,
        is_const: bool,
        init: GlobalInit,
    ) -> Result<(), BuilderError> {
        let sym = self.module.interner.intern(name);
        if self.module.find_global(sym).is_some() {
            return Err(BuilderError::DuplicateDefinition { name: name.to_string() });
        }
        self.module.globals.push(GlobalDef { name: sym, ty, is_const, init });
        self.module.reindex();
        Ok(())
    }

    /// Allocates parameter temp ids `%0..%n-1` and returns a handle bound to
    /// an empty function shell with no blocks yet.
    pub fn start_function(
        &mut self,
        name: &str,
        ret: Ty,
        params: Vec<(String, Ty)>,
    ) -> Result<FuncId, BuilderError> {
        let sym = self.module.interner.intern(name);
        if self.module.find_function(sym).is_some() {
            return Err(BuilderError::DuplicateDefinition { name: name.to_string() });
        }
        let params: Vec<Param> = params
            .into_iter()
            .enumerate()
            .map(|(i, (n, ty))| Param { name: self.module.interner.intern(&n), ty, temp: TempId(i as u32) })
            .collect();
        let next_temp = params.len() as u32;
        self.module.functions.push(Function { name: sym, ret, params, blocks: Vec::new(), next_temp });
        self.module.reindex();
        Ok(FuncId((self.module.functions.len() - 1) as u32))
    }

    /// Labels are unique within the function; a collision is rejected
    /// rather than silently disambiguated, so that frontends notice their
    /// own bugs instead of getting surprising renames.
    pub fn create_block(
        &mut self,
        func: FuncId,
        label: &str,
        params: Vec<(String, Ty)>,
    ) -> Result<BlockId, BuilderError> {
        let label_sym = self.module.interner.intern(label);
        let f = self.module.function_mut(func);
        if f.block_index(label_sym).is_some() {
            return Err(BuilderError::DuplicateLabel {
                function: label.to_string(),
                label: label.to_string(),
            });
        }
        let names: Vec<Symbol> = params.iter().map(|(n, _)| self.module.interner.intern(n)).collect();
        // re-borrow after interning (interner lives on module, not f)
        let f = self.module.function_mut(func);
        let mut next_temp = f.next_temp;
        let params: Vec<Param> = params
            .into_iter()
            .zip(names)
            .map(|((_, ty), name)| {
                let temp = TempId(next_temp);
                next_temp += 1;
                Param { name, ty, temp }
            })
            .collect();
        f.next_temp = next_temp;
        let mut block = BasicBlock::new(label_sym);
        block.params = params;
        f.blocks.push(block);
        Ok(BlockId((f.blocks.len() - 1) as u32))
    }

    pub fn reserve_temp(&mut self, func: FuncId) -> TempId {
        let f = self.module.function_mut(func);
        let id = TempId(f.next_temp);
        f.next_temp += 1;
        id
    }

    /// Emits a non-terminator instruction at `(func, block)`. Reserves a
    /// temp id automatically when `result_ty` is `Some`.
    pub fn emit(
        &mut self,
        func: FuncId,
        block: BlockId,
        op: Opcode,
        operands: Vec<Value>,
        result_ty: Option<Ty>,
        ty: Option<Ty>,
        callee: Option<&str>,
        loc: Option<SourceLoc>,
    ) -> Result<Option<TempId>, BuilderError> {
        if op.is_terminator() {
            return Err(BuilderError::NotATerminator);
        }
        if self.module.function(func).block(block).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated {
                block: format!("{}", self.module.function(func).block(block).label),
            });
        }
        let result = result_ty.map(|t| (self.reserve_temp(func), t));
        let callee_sym = callee.map(|c| self.module.interner.intern(c));
        let instr = Instruction {
            op,
            results: result.into_iter().collect(),
            operands,
            targets: Vec::new(),
            case_keys: Vec::new(),
            ty,
            callee: callee_sym,
            loc,
        };
        self.module.function_mut(func).block_mut(block).instrs.push(instr);
        Ok(result.map(|(t, _)| t))
    }

    /// `eh.entry`'s two-result form: binds the `error` record and a fresh
    /// `resumetok` in a single instruction.
    pub fn emit_eh_entry(&mut self, func: FuncId, block: BlockId) -> Result<(TempId, TempId), BuilderError> {
        if self.module.function(func).block(block).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated {
                block: format!("{}", self.module.function(func).block(block).label),
            });
        }
        let err_temp = self.reserve_temp(func);
        let tok_temp = self.reserve_temp(func);
        let instr = Instruction {
            op: Opcode::EhEntry,
            results: vec![(err_temp, Ty::Error), (tok_temp, Ty::ResumeTok)],
            operands: Vec::new(),
            targets: Vec::new(),
            case_keys: Vec::new(),
            ty: None,
            callee: None,
            loc: None,
        };
        self.module.function_mut(func).block_mut(block).instrs.push(instr);
        Ok((err_temp, tok_temp))
    }

    /// Marks `block` as terminated. Further emission into it is rejected.
    pub fn emit_terminator(
        &mut self,
        func: FuncId,
        block: BlockId,
        op: Opcode,
        operands: Vec<Value>,
        targets: Vec<Target>,
        case_keys: Vec<i32>,
        ty: Option<Ty>,
        loc: Option<SourceLoc>,
    ) -> Result<(), BuilderError> {
        if !op.is_terminator() {
            return Err(BuilderError::NotATerminator);
        }
        let b = self.module.function_mut(func).block_mut(block);
        if b.terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated { block: format!("{}", b.label) });
        }
        b.terminator = Some(Instruction {
            op,
            results: vec![],
            operands,
            targets,
            case_keys,
            ty,
            callee: None,
            loc,
        });
        Ok(())
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        self.module.interner.intern(s)
    }

    pub fn finish(self) -> Module {
        self.module
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Direct module access for the parser, which constructs `Instruction`s
    /// itself (temp ids already resolved from source names) rather than
    /// going through `emit`/`emit_terminator`.
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaring_the_same_extern_twice_is_idempotent() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        b.declare_extern("@Viper.Console.PrintI64", Ty::Void, vec![Ty::I64]).unwrap();
        b.declare_extern("@Viper.Console.PrintI64", Ty::Void, vec![Ty::I64]).unwrap();
        assert_eq!(b.module().externs.len(), 1);
    }

    #[test]
    fn conflicting_extern_signature_fails() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        b.declare_extern("@f", Ty::Void, vec![Ty::I64]).unwrap();
        let err = b.declare_extern("@f", Ty::I64, vec![Ty::I64]).unwrap_err();
        assert!(matches!(err, BuilderError::DuplicateDefinition { .. }));
    }

    #[test]
    fn duplicate_block_label_is_rejected() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        b.create_block(f, "entry", vec![]).unwrap();
        let err = b.create_block(f, "entry", vec![]).unwrap_err();
        assert!(matches!(err, BuilderError::DuplicateLabel { .. }));
    }

    #[test]
    fn emitting_after_terminator_is_rejected() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b.start_function("@main", Ty::I64, vec![]).unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        b.emit_terminator(f, blk, Opcode::Ret, vec![Value::ConstInt(0)], vec![], vec![], Some(Ty::I64), None)
            .unwrap();
        let err = b
            .emit(f, blk, Opcode::Add, vec![Value::ConstInt(1), Value::ConstInt(1)], Some(Ty::I64), None, None, None)
            .unwrap_err();
        assert!(matches!(err, BuilderError::BlockAlreadyTerminated { .. }));
    }

    #[test]
    fn parameters_allocate_dense_leading_temp_ids() {
        let mut b = ModuleBuilder::new((0, 1, 0));
        let f = b
            .start_function("@add", Ty::I64, vec![("a".into(), Ty::I64), ("b".into(), Ty::I64)])
            .unwrap();
        let blk = b.create_block(f, "entry", vec![]).unwrap();
        let t = b
            .emit(f, blk, Opcode::Add, vec![Value::Temp(TempId(0)), Value::Temp(TempId(1))], Some(Ty::I64), None, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(t, TempId(2));
    }
}
