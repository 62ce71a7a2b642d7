// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::error::Result;
use crate::ir::Instr;
use crate::method::{Method, SlotId};

/// A position inside a method's instruction stream
///
/// A walker is a plain handle, a block index plus a slot in that block, with
/// `None` standing for the end of the block.  It stays valid while other
/// slots are inserted, emptied or unlinked, so it can be held across any
/// mutation of the method short of cleaning empty slots.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct InstrWalker {
    block: usize,
    pos: Option<SlotId>,
}

impl InstrWalker {
    pub(crate) fn new(block: usize, pos: Option<SlotId>) -> InstrWalker {
        InstrWalker { block, pos }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn slot(&self) -> Option<SlotId> {
        self.pos
    }

    pub fn is_start_of_block(&self, m: &Method) -> bool {
        self.pos.is_some() && self.pos == m.block(self.block).first_slot()
    }

    pub fn is_end_of_block(&self) -> bool {
        self.pos.is_none()
    }

    pub fn is_start_of_method(&self, m: &Method) -> bool {
        self.block == 0 && self.is_start_of_block(m)
    }

    pub fn is_end_of_method(&self, m: &Method) -> bool {
        self.is_end_of_block() && self.block + 1 >= m.num_blocks()
    }

    pub fn next_in_block(self, m: &Method) -> InstrWalker {
        let Some(s) = self.pos else {
            panic!("Cannot step past the end of a block");
        };
        InstrWalker {
            block: self.block,
            pos: m.block(self.block).next_slot(s),
        }
    }

    pub fn previous_in_block(self, m: &Method) -> InstrWalker {
        let block = m.block(self.block);
        let pos = match self.pos {
            Some(s) => {
                assert!(
                    !self.is_start_of_block(m),
                    "Cannot step before the start of a block"
                );
                block.prev_slot(s)
            }
            None => block.last_slot(),
        };
        InstrWalker {
            block: self.block,
            pos,
        }
    }

    /// Steps forward, continuing at the label of the next block
    pub fn next_in_method(self, m: &Method) -> InstrWalker {
        let mut it = self;
        if !it.is_end_of_block() {
            it = it.next_in_block(m);
        }
        if it.is_end_of_block() && it.block + 1 < m.num_blocks() {
            it = m.block_begin(it.block + 1);
        }
        it
    }

    /// Steps backward, continuing at the last slot of the previous block
    pub fn previous_in_method(self, m: &Method) -> InstrWalker {
        if self.is_start_of_block(m) && self.block > 0 {
            let block = self.block - 1;
            InstrWalker {
                block,
                pos: m.block(block).last_slot(),
            }
        } else {
            self.previous_in_block(m)
        }
    }

    /// Returns the instruction under the walker, `None` for an empty slot or
    /// the end of the block
    pub fn get<'a>(&self, m: &'a Method) -> Option<&'a Instr> {
        m.block(self.block).instr(self.pos?)
    }

    /// Mutable access to the instruction under the walker
    ///
    /// Operands referring to locals must not be changed through this, use
    /// [`Method::replace_local`] so the use records follow.
    pub fn get_mut<'a>(&self, m: &'a mut Method) -> Option<&'a mut Instr> {
        m.block_mut(self.block).instr_mut(self.pos?)
    }

    pub fn has_instr(&self, m: &Method) -> bool {
        self.get(m).is_some()
    }

    /// Takes the instruction out and leaves the slot empty
    ///
    /// The instruction keeps its id and its use records, so it can be put
    /// back elsewhere with [`InstrWalker::reset`] or
    /// [`InstrWalker::emplace`] without touching any local.
    pub fn release(&self, m: &mut Method) -> Option<Box<Instr>> {
        let s = self.pos.expect("Cannot release the end of a block");
        m.block_mut(self.block).take(s)
    }

    /// Replaces the content of the slot under the walker
    ///
    /// The use records of the previous occupant are dropped and those of a
    /// fresh instruction are added.  A label can neither be added nor
    /// removed this way.
    pub fn reset(&self, m: &mut Method, mut instr: Box<Instr>) -> Result<()> {
        let s = self.pos.expect("Cannot reset the end of a block");
        let was_label = self.get(m).is_some_and(|i| i.is_label());
        assert!(
            was_label == instr.is_label(),
            "Cannot add or remove a label by resetting"
        );

        m.register_uses(&mut instr);
        if let Some(old) = m.block_mut(self.block).replace(s, Some(instr)) {
            m.unregister_uses(&old)?;
        }
        Ok(())
    }

    /// Inserts an instruction before the walker and moves the walker onto it
    pub fn emplace(&mut self, m: &mut Method, mut instr: Box<Instr>) {
        assert!(
            !self.is_start_of_block(m),
            "Cannot insert before the label of a block"
        );
        assert!(!instr.is_label(), "Cannot insert a label into a block");

        m.register_uses(&mut instr);
        let block = m.block_mut(self.block);
        self.pos = Some(block.insert_before(self.pos, Some(instr)));
    }

    /// Inserts an empty slot before the walker and moves the walker onto it
    pub fn emplace_empty(&mut self, m: &mut Method) {
        assert!(
            !self.is_start_of_block(m),
            "Cannot insert before the label of a block"
        );
        self.pos = Some(m.block_mut(self.block).insert_before(self.pos, None));
    }

    /// Unlinks the slot under the walker, dropping its instruction, and
    /// moves the walker to the following slot
    pub fn erase(&mut self, m: &mut Method) -> Result<()> {
        let s = self.pos.expect("Cannot erase the end of a block");
        assert!(
            !self.is_start_of_block(m),
            "Cannot erase the label of a block"
        );
        let next = m.block(self.block).next_slot(s);
        if let Some(old) = m.block_mut(self.block).unlink(s) {
            m.unregister_uses(&old)?;
        }
        self.pos = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::ir::*;

    fn two_blocks() -> (Method, LocalId) {
        let mut m = Method::new("walk");
        let a = m.add_local("a", DataType::INT32, LocalKind::General);
        let b0 = m.create_block("b0");
        let b1 = m.create_block("b1");
        let mut b = Builder::new(&mut m, b0);
        b.ldi(b.local(a), 1);
        b.nop(DelayType::WaitRegister);
        let mut b = Builder::new(&mut m, b1);
        b.alu(AluOp::Add, b.local(a), &[b.local(a), Value::int(2)]);
        (m, a)
    }

    #[test]
    fn test_walk_method() {
        let (m, _) = two_blocks();
        let mut it = m.walk_all_instructions();
        assert!(it.is_start_of_method(&m));
        let mut seen = Vec::new();
        while !it.is_end_of_method(&m) {
            if let Some(instr) = it.get(&m) {
                seen.push(instr.to_string());
            }
            it = it.next_in_method(&m);
        }
        assert_eq!(seen.len(), 5);
        assert!(seen[0].starts_with("label"));
        assert!(seen[3].starts_with("label"));

        let mut back = 0;
        it = it.previous_in_method(&m);
        loop {
            back += 1;
            if it.is_start_of_method(&m) {
                break;
            }
            it = it.previous_in_method(&m);
        }
        assert_eq!(back, 5);
    }

    #[test]
    fn test_release_reset() {
        let (mut m, a) = two_blocks();
        let ldi = m.walk_all_instructions().next_in_block(&m);
        let nop = ldi.next_in_block(&m);
        let id = ldi.get(&m).unwrap().id();

        let instr = ldi.release(&mut m).unwrap();
        assert!(!ldi.has_instr(&m));
        // Moving an instruction keeps its use record
        assert!(m.local(a).use_of(id).is_some());

        nop.reset(&mut m, instr).unwrap();
        assert_eq!(nop.get(&m).unwrap().id(), id);
        assert!(m.local(a).use_of(id).unwrap().writes_local());
        assert_eq!(m.block(0).len(), 3);
    }

    #[test]
    fn test_emplace_erase() {
        let (mut m, a) = two_blocks();
        let mut it = m.block_end(0);
        it.emplace(
            &mut m,
            Instr::new_boxed(OpMov {
                dst: Value::reg(Register::Acc(0), DataType::INT32),
                src: Value::local(a, DataType::INT32),
            }),
        );
        assert_eq!(m.block(0).len(), 4);
        assert!(it.next_in_block(&m).is_end_of_block());
        let id = it.get(&m).unwrap().id();
        assert!(m.local(a).use_of(id).unwrap().reads_local());

        it.erase(&mut m).unwrap();
        assert!(it.is_end_of_block());
        assert!(m.local(a).use_of(id).is_none());
        assert_eq!(m.block(0).len(), 3);
    }

    #[test]
    fn test_emplace_empty() {
        let (mut m, _) = two_blocks();
        let nop = m.block_begin(0).next_in_block(&m).next_in_block(&m);
        let mut it = nop;
        it.emplace_empty(&mut m);
        assert!(!it.has_instr(&m));
        assert_eq!(it.next_in_block(&m), nop);
        assert_eq!(m.block(0).num_empty_slots(), 1);
        assert_eq!(m.clean_empty_instructions(), 1);
    }

    #[test]
    #[should_panic]
    fn test_emplace_before_label() {
        let (mut m, _) = two_blocks();
        let mut it = m.block_begin(1);
        it.emplace(&mut m, Instr::new_nop(DelayType::WaitRegister));
    }
}
