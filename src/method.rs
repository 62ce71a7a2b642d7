// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::api::{GetDebugFlags, DEBUG};
use crate::error::Result;
use crate::ir::*;
use crate::walker::InstrWalker;

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::iter;

/// Position of an instruction slot within its basic block
///
/// Slot ids never move.  Inserting or unlinking other slots leaves every
/// existing id valid until the block is compacted.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SlotId(u32);

impl SlotId {
    fn new(idx: usize) -> SlotId {
        SlotId(idx.try_into().expect("Too many instruction slots"))
    }

    fn idx(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct Slot {
    instr: Option<Box<Instr>>,
    prev: Option<SlotId>,
    next: Option<SlotId>,
    linked: bool,
}

/// A straight-line run of instruction slots
///
/// The slots form a doubly-linked list inside an arena owned by the block.
/// A slot whose instruction was moved away stays in the list, empty, until
/// the block is cleaned.  The first slot always holds the block's label.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    label: LocalId,
    slots: Vec<Slot>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl BasicBlock {
    fn new(label: LocalId) -> BasicBlock {
        BasicBlock {
            label,
            slots: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn label(&self) -> LocalId {
        self.label
    }

    /// Number of slots, empty ones included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, s: SlotId) -> &Slot {
        let slot = &self.slots[s.idx()];
        assert!(slot.linked, "Use of an unlinked instruction slot");
        slot
    }

    fn slot_mut(&mut self, s: SlotId) -> &mut Slot {
        let slot = &mut self.slots[s.idx()];
        assert!(slot.linked, "Use of an unlinked instruction slot");
        slot
    }

    pub fn first_slot(&self) -> Option<SlotId> {
        self.head
    }

    pub fn last_slot(&self) -> Option<SlotId> {
        self.tail
    }

    pub fn next_slot(&self, s: SlotId) -> Option<SlotId> {
        self.slot(s).next
    }

    pub fn prev_slot(&self, s: SlotId) -> Option<SlotId> {
        self.slot(s).prev
    }

    pub fn instr(&self, s: SlotId) -> Option<&Instr> {
        self.slot(s).instr.as_deref()
    }

    pub(crate) fn instr_mut(&mut self, s: SlotId) -> Option<&mut Instr> {
        self.slot_mut(s).instr.as_deref_mut()
    }

    pub(crate) fn take(&mut self, s: SlotId) -> Option<Box<Instr>> {
        self.slot_mut(s).instr.take()
    }

    pub(crate) fn replace(
        &mut self,
        s: SlotId,
        instr: Option<Box<Instr>>,
    ) -> Option<Box<Instr>> {
        std::mem::replace(&mut self.slot_mut(s).instr, instr)
    }

    /// Links a new slot in front of `before`, or at the end for `None`
    pub(crate) fn insert_before(
        &mut self,
        before: Option<SlotId>,
        instr: Option<Box<Instr>>,
    ) -> SlotId {
        let id = SlotId::new(self.slots.len());
        let prev = match before {
            Some(b) => self.slot(b).prev,
            None => self.tail,
        };
        self.slots.push(Slot {
            instr,
            prev,
            next: before,
            linked: true,
        });

        match prev {
            Some(p) => self.slot_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match before {
            Some(b) => self.slot_mut(b).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
        id
    }

    /// Removes a slot from the list and returns its content
    pub(crate) fn unlink(&mut self, s: SlotId) -> Option<Box<Instr>> {
        let (prev, next) = {
            let slot = self.slot_mut(s);
            slot.linked = false;
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
        self.slots[s.idx()].instr.take()
    }

    /// Iterates over all linked slots in program order
    pub fn slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        iter::successors(self.head, |s| self.slot(*s).next)
    }

    /// Iterates over the non-empty slots in program order
    pub fn instrs(&self) -> impl Iterator<Item = &Instr> + '_ {
        self.slots().filter_map(|s| self.instr(s))
    }

    pub fn num_instrs(&self) -> usize {
        self.instrs().count()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.len - self.num_instrs()
    }

    /// Rebuilds the arena without the empty slots
    ///
    /// This invalidates every [`SlotId`] into this block.
    fn compact(&mut self) -> usize {
        let mut old = std::mem::take(&mut self.slots);
        let mut order = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(s) = cur {
            cur = old[s.idx()].next;
            if let Some(instr) = old[s.idx()].instr.take() {
                order.push(instr);
            }
        }

        let removed = self.len - order.len();
        self.head = None;
        self.tail = None;
        self.len = 0;
        for instr in order {
            self.insert_before(None, Some(instr));
        }
        removed
    }
}

/// A compilation unit: one kernel function with its locals and blocks
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    locals: Vec<Local>,
    local_names: FxHashMap<String, LocalId>,
    blocks: Vec<BasicBlock>,
    next_instr: u32,
}

impl Method {
    pub fn new(name: impl Into<String>) -> Method {
        Method {
            name: name.into(),
            locals: Vec::new(),
            local_names: FxHashMap::default(),
            blocks: Vec::new(),
            next_instr: 0,
        }
    }

    pub fn add_local(
        &mut self,
        name: impl Into<String>,
        ty: DataType,
        kind: LocalKind,
    ) -> LocalId {
        let name = name.into();
        assert!(
            !self.local_names.contains_key(&name),
            "Local {name} already exists"
        );
        let id = LocalId::new(self.locals.len());
        self.local_names.insert(name.clone(), id);
        self.locals.push(Local::new(id, name, ty, kind));
        id
    }

    /// Creates a fresh general-purpose local with a unique name
    pub fn add_new_local(&mut self, ty: DataType, prefix: &str) -> LocalId {
        let mut n = self.locals.len();
        loop {
            let name = format!("{prefix}.{n}");
            if !self.local_names.contains_key(&name) {
                return self.add_local(name, ty, LocalKind::General);
            }
            n += 1;
        }
    }

    pub fn find_local(&self, name: &str) -> Option<LocalId> {
        self.local_names.get(name).copied()
    }

    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.idx()]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut Local {
        &mut self.locals[id.idx()]
    }

    pub fn locals(&self) -> impl Iterator<Item = &Local> + '_ {
        self.locals.iter()
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Appends a new block starting with a fresh label
    pub fn create_block(&mut self, name: &str) -> usize {
        let label = self.add_local(name, DataType::LABEL, LocalKind::Label);
        let mut instr = Instr::new_boxed(OpLabel {
            label: Value::local(label, DataType::LABEL),
        });
        self.register_uses(&mut instr);

        let mut block = BasicBlock::new(label);
        block.insert_before(None, Some(instr));
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, idx: usize) -> &BasicBlock {
        &self.blocks[idx]
    }

    pub(crate) fn block_mut(&mut self, idx: usize) -> &mut BasicBlock {
        &mut self.blocks[idx]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn find_block(&self, label: LocalId) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> + '_ {
        self.blocks.iter().flat_map(|b| b.instrs())
    }

    pub fn num_instrs(&self) -> usize {
        self.instrs().count()
    }

    pub fn num_slots(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    /// Walker at the label of the first block
    pub fn walk_all_instructions(&self) -> InstrWalker {
        self.block_begin(0)
    }

    pub fn block_begin(&self, block: usize) -> InstrWalker {
        let pos = self.blocks.get(block).and_then(|b| b.first_slot());
        InstrWalker::new(block, pos)
    }

    pub fn block_end(&self, block: usize) -> InstrWalker {
        InstrWalker::new(block, None)
    }

    /// Looks up the current position of an instruction
    pub fn find_instr(&self, id: InstrId) -> Option<InstrWalker> {
        for (b, block) in self.blocks.iter().enumerate() {
            for s in block.slots() {
                if block.instr(s).is_some_and(|i| i.id() == id) {
                    return Some(InstrWalker::new(b, Some(s)));
                }
            }
        }
        None
    }

    fn assign_id(&mut self, instr: &mut Instr) {
        if !instr.id().is_assigned() {
            instr.set_id(InstrId::new(self.next_instr));
            self.next_instr += 1;
        }
    }

    /// Gives a fresh instruction an id and records its local accesses
    ///
    /// Instructions which already have an id are assumed to be registered.
    pub(crate) fn register_uses(&mut self, instr: &mut Instr) {
        if instr.id().is_assigned() {
            return;
        }
        self.assign_id(instr);
        for (local, kind) in instr.local_uses() {
            self.locals[local.idx()].add_user(instr.id(), kind);
        }
    }

    /// Drops every use record of an instruction
    pub fn unregister_uses(&mut self, instr: &Instr) -> Result<()> {
        if !instr.id().is_assigned() {
            return Ok(());
        }
        for (local, kind) in instr.local_uses() {
            self.locals[local.idx()]
                .remove_user(instr.id(), kind)
                .map_err(|mut err| {
                    err.instr = instr.to_string();
                    err
                })?;
        }
        Ok(())
    }

    /// Rewrites accesses of `old` in the instruction under `it` to `new` and
    /// moves the matching use records over
    pub fn replace_local(
        &mut self,
        it: InstrWalker,
        old: LocalId,
        new: LocalId,
        kind: UseKind,
    ) -> Result<usize> {
        let Some(s) = it.slot() else {
            panic!("Cannot replace locals at the end of a block");
        };
        let instr = self.blocks[it.block()]
            .instr_mut(s)
            .expect("Cannot replace locals in an empty slot");

        let id = instr.id();
        let mut changed = Vec::new();
        for k in [UseKind::Writer, UseKind::Reader] {
            if kind == UseKind::Both || kind == k {
                changed.push((k, instr.replace_local(old, new, k)));
            }
        }
        let text = instr.to_string();

        let mut total = 0;
        for (k, n) in changed {
            for _ in 0..n {
                self.locals[old.idx()].remove_user(id, k).map_err(
                    |mut err| {
                        err.instr = text.clone();
                        err
                    },
                )?;
                self.locals[new.idx()].add_user(id, k);
            }
            total += n;
        }
        Ok(total)
    }

    /// Checks whether every access of `local` lies close to `it`
    ///
    /// The window covers the instruction before `it` and `threshold`
    /// instructions from `it` onwards, inside the block.  Such a local can
    /// live in an accumulator no matter how this window gets scheduled.
    pub fn is_locally_limited(
        &self,
        it: InstrWalker,
        local: LocalId,
        threshold: usize,
    ) -> bool {
        let mut remaining: FxHashSet<InstrId> =
            self.local(local).users().map(|(id, _)| id).collect();

        if !it.is_start_of_block(self) {
            if let Some(prev) = it.previous_in_block(self).get(self) {
                remaining.remove(&prev.id());
            }
        }

        let mut cur = it;
        let mut left = threshold;
        while left > 0 && !cur.is_end_of_block() {
            if let Some(instr) = cur.get(self) {
                remaining.remove(&instr.id());
            }
            if remaining.is_empty() {
                break;
            }
            left -= 1;
            cur = cur.next_in_block(self);
        }
        remaining.is_empty()
    }

    /// Removes the empty slots of one block and returns how many there were
    ///
    /// With the `annotate` debug flag, empty slots are filled with markers
    /// instead.  Compacting invalidates all walkers into the block.
    pub fn clean_empty_instructions_in_block(&mut self, block: usize) -> usize {
        if DEBUG.annotate() {
            let empty: Vec<SlotId> = self.blocks[block]
                .slots()
                .filter(|s| self.blocks[block].instr(*s).is_none())
                .collect();
            for s in &empty {
                let mut marker = Instr::new_boxed(OpAnnotate {
                    annotation: "moved by reorder".into(),
                });
                self.assign_id(&mut marker);
                self.blocks[block].replace(*s, Some(marker));
            }
            empty.len()
        } else {
            self.blocks[block].compact()
        }
    }

    pub fn clean_empty_instructions(&mut self) -> usize {
        (0..self.blocks.len())
            .map(|b| self.clean_empty_instructions_in_block(b))
            .sum()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}:", self.name)?;
        for block in &self.blocks {
            for s in block.slots() {
                match block.instr(s) {
                    Some(instr) if instr.is_label() => writeln!(f, "{instr}")?,
                    Some(instr) => writeln!(f, "    {instr}")?,
                    None => writeln!(f, "    <empty>")?,
                }
            }
        }
        Ok(())
    }
}

/// A set of methods compiled together
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    pub methods: Vec<Method>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn add_method(&mut self, method: Method) -> usize {
        self.methods.push(method);
        self.methods.len() - 1
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, method) in self.methods.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{method}")?;
        }
        Ok(())
    }
}
