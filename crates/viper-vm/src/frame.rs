//! Per-call activation record and the handler stack (C8). Frames are never
//! popped while a call is outstanding — only pushed deeper — so a callee
//! returning finds its caller's `call` instruction still at the current
//! position and deposits its result straight into that instruction's own
//! result slot.

use viper_il::{BlockId, FuncId, TempId};

use crate::value::{ErrorRecord, RtValue};

pub struct Frame {
    pub func: FuncId,
    pub block: BlockId,
    /// Position within the current block's combined instrs-then-terminator
    /// sequence (see `BasicBlock::all_instrs`).
    pub index: usize,
    pub regs: Vec<Option<RtValue>>,
    pub arena: u64,
    /// Set when a trap hands control to this frame's handler block; the
    /// next `eh.entry` executed in this frame consumes it.
    pub pending_error: Option<ErrorRecord>,
}

impl Frame {
    pub fn new(func: FuncId, entry_block: BlockId, num_temps: usize, arena: u64) -> Self {
        Self { func, block: entry_block, index: 0, regs: vec![None; num_temps], arena, pending_error: None }
    }

    pub fn set(&mut self, t: TempId, v: RtValue) {
        if t.index() >= self.regs.len() {
            self.regs.resize(t.index() + 1, None);
        }
        self.regs[t.index()] = Some(v);
    }

    pub fn get(&self, t: TempId) -> &RtValue {
        self.regs[t.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("read of unset temp {t} in frame for {:?}", self.func))
    }

    pub fn jump_to(&mut self, block: BlockId, args: &[(TempId, RtValue)]) {
        self.block = block;
        self.index = 0;
        for (t, v) in args {
            self.set(*t, v.clone());
        }
    }
}

/// One entry on the handler stack, pushed by `eh.push` and popped by
/// `eh.pop` or by trap dispatch unwinding past it.
#[derive(Clone, Copy)]
pub struct HandlerEntry {
    /// Index into the VM's frame stack of the frame `eh.push` executed in.
    pub frame_depth: usize,
    pub handler_block: BlockId,
    /// `Memory` region length at push time, so a trap can free allocas
    /// made since.
    pub alloca_mark: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RtValue;

    #[test]
    fn set_then_get_round_trips() {
        let mut f = Frame::new(FuncId(0), BlockId(0), 2, 1);
        f.set(TempId(1), RtValue::I64(7));
        assert_eq!(*f.get(TempId(1)), RtValue::I64(7));
    }

    #[test]
    fn set_past_declared_temp_count_grows_the_register_file() {
        let mut f = Frame::new(FuncId(0), BlockId(0), 1, 1);
        f.set(TempId(5), RtValue::I1(true));
        assert_eq!(*f.get(TempId(5)), RtValue::I1(true));
    }

    #[test]
    #[should_panic]
    fn reading_an_unset_temp_panics() {
        let f = Frame::new(FuncId(0), BlockId(0), 2, 1);
        f.get(TempId(0));
    }

    #[test]
    fn jump_to_resets_position_and_binds_block_arguments() {
        let mut f = Frame::new(FuncId(0), BlockId(0), 2, 1);
        f.index = 3;
        f.jump_to(BlockId(2), &[(TempId(0), RtValue::I64(9))]);
        assert_eq!(f.block, BlockId(2));
        assert_eq!(f.index, 0);
        assert_eq!(*f.get(TempId(0)), RtValue::I64(9));
    }
}
