// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;
use crate::method::Method;
use crate::walker::InstrWalker;

/// Inserts instructions at a fixed point of a method
///
/// Every pushed instruction lands right before the builder's insertion
/// point, so consecutive pushes keep their order.  Use records are kept up
/// to date.
pub struct Builder<'a> {
    m: &'a mut Method,
    at: InstrWalker,
}

impl<'a> Builder<'a> {
    /// Appends to the end of `block`
    pub fn new(m: &'a mut Method, block: usize) -> Builder<'a> {
        let at = m.block_end(block);
        Builder { m, at }
    }

    /// Inserts before the instruction under `at`
    pub fn at(m: &'a mut Method, at: InstrWalker) -> Builder<'a> {
        Builder { m, at }
    }

    pub fn method(&self) -> &Method {
        &*self.m
    }

    /// A value referring to the whole of `local`
    pub fn local(&self, local: LocalId) -> Value {
        Value::local(local, self.m.local(local).ty)
    }

    pub fn push_instr(&mut self, instr: Box<Instr>) -> InstrWalker {
        let mut it = self.at;
        it.emplace(self.m, instr);
        it
    }

    pub fn push_op(&mut self, op: impl Into<Op>) -> InstrWalker {
        self.push_instr(Instr::new_boxed(op))
    }

    pub fn alu(
        &mut self,
        op: AluOp,
        dst: Value,
        srcs: &[Value],
    ) -> InstrWalker {
        assert!(srcs.len() == op.num_srcs());
        self.push_op(OpAlu {
            op,
            dst,
            srcs: srcs.to_vec(),
        })
    }

    pub fn mov(&mut self, dst: Value, src: Value) -> InstrWalker {
        self.push_op(OpMov { dst, src })
    }

    pub fn ldi(&mut self, dst: Value, imm: i32) -> InstrWalker {
        self.push_op(OpLoadImm {
            dst,
            imm: Immediate::Int(imm),
        })
    }

    pub fn nop(&mut self, delay: DelayType) -> InstrWalker {
        self.push_op(OpNop { delay })
    }

    pub fn rotate(
        &mut self,
        dst: Value,
        src: Value,
        offset: Value,
    ) -> InstrWalker {
        self.push_op(OpRotate {
            dst,
            srcs: [src, offset],
        })
    }

    pub fn branch(&mut self, target: LocalId, cond: BranchCond) -> InstrWalker {
        self.push_op(OpBranch {
            target: Value::local(target, DataType::LABEL),
            cond,
        })
    }

    pub fn mem_barrier(&mut self, scope: MemoryScope) -> InstrWalker {
        self.push_op(OpMemBarrier { scope })
    }

    /// Acquires the hardware mutex by reading it
    pub fn mutex_acquire(&mut self) -> InstrWalker {
        self.mov(
            Value::reg(Register::Nop, DataType::BOOL),
            Value::reg(Register::Mutex, DataType::BOOL),
        )
    }

    /// Releases the hardware mutex by writing it
    pub fn mutex_release(&mut self) -> InstrWalker {
        self.mov(
            Value::reg(Register::Mutex, DataType::BOOL),
            Value::int(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_order() {
        let mut m = Method::new("build");
        let a = m.add_local("a", DataType::INT32, LocalKind::General);
        let blk = m.create_block("entry");
        let mut b = Builder::new(&mut m, blk);
        b.ldi(b.local(a), 3);
        b.mutex_acquire();
        b.mutex_release();

        let text: Vec<String> =
            m.block(blk).instrs().map(|i| i.to_string()).collect();
        assert_eq!(text.len(), 4);
        assert_eq!(text[1], "%0 = ldi 3");
        assert_eq!(text[2], "- = mov mutex");
        assert_eq!(text[3], "mutex = mov 1");
        assert_eq!(m.local(a).num_users(), 1);
    }

    #[test]
    fn test_insert_at() {
        let mut m = Method::new("build");
        let a = m.add_local("a", DataType::INT32, LocalKind::General);
        let blk = m.create_block("entry");
        let mut b = Builder::new(&mut m, blk);
        let last = b.ldi(b.local(a), 3);

        let mut b = Builder::at(&mut m, last);
        b.nop(DelayType::WaitRegister);
        b.nop(DelayType::WaitSfu);

        let text: Vec<String> =
            m.block(blk).instrs().map(|i| i.to_string()).collect();
        assert_eq!(text[1], "nop (wait_reg)");
        assert_eq!(text[2], "nop (wait_sfu)");
        assert_eq!(text[3], "%0 = ldi 3");
    }
}
