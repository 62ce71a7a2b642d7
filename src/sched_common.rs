// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;
use crate::method::Method;
use crate::walker::InstrWalker;

use rustc_hash::FxHashSet;
use std::fmt;

/// The storage an operand refers to, ignoring its type and element
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Location {
    Local(LocalId),
    Reg(Register),
}

impl Location {
    /// Immediates and the `nop` register are not storage
    pub fn of(value: &Value) -> Option<Location> {
        match value.kind {
            ValueKind::Local { local, .. } => Some(Location::Local(local)),
            ValueKind::Reg(Register::Nop) => None,
            ValueKind::Reg(reg) => Some(Location::Reg(reg.canonical())),
            ValueKind::Imm(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(l) => write!(f, "{l}"),
            Location::Reg(r) => write!(f, "{r}"),
        }
    }
}

/// Storage locations a delay-slot filler must not access
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExcludedSet {
    locs: FxHashSet<Location>,
}

impl ExcludedSet {
    pub fn new() -> ExcludedSet {
        Default::default()
    }

    pub fn insert(&mut self, loc: Location) -> bool {
        self.locs.insert(loc)
    }

    pub fn insert_value(&mut self, value: &Value) {
        if let Some(loc) = Location::of(value) {
            self.insert(loc);
        }
    }

    pub fn insert_sfu_tmu_group(&mut self) {
        for reg in Register::SFU_TMU_GROUP {
            self.insert(Location::Reg(reg));
        }
    }

    pub fn contains(&self, loc: &Location) -> bool {
        self.locs.contains(loc)
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        Location::of(value).is_some_and(|loc| self.contains(&loc))
    }

    /// Whether the output or any argument of `instr` is excluded
    pub fn is_accessed_by(&self, instr: &Instr) -> bool {
        instr.output().is_some_and(|out| self.contains_value(out))
            || instr.args().iter().any(|arg| self.contains_value(arg))
    }

    /// Adds the output of an instruction which stays between the placeholder
    /// and any later filler
    ///
    /// SFU and TMU results share one port, so one of them pulls in the
    /// whole group.
    pub fn fold_output(&mut self, instr: &Instr) {
        let Some(out) = instr.output() else {
            return;
        };
        match Location::of(out) {
            Some(Location::Reg(reg)) if reg.is_sfu_or_tmu() => {
                self.insert_sfu_tmu_group();
            }
            Some(loc) => {
                self.insert(loc);
            }
            None => (),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> + '_ {
        self.locs.iter()
    }

    pub fn len(&self) -> usize {
        self.locs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }
}

impl fmt::Display for ExcludedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut locs: Vec<_> = self.locs.iter().collect();
        locs.sort();
        write!(f, "{{")?;
        for (i, loc) in locs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{loc}")?;
        }
        write!(f, "}}")
    }
}

/// Walks back from `it` to the closest instruction writing something
///
/// Empty slots and instructions without an output are skipped.  Stops at
/// the start of the block if nothing is found.
pub fn find_previous_instruction(m: &Method, it: InstrWalker) -> InstrWalker {
    let mut prev = it.previous_in_block(m);
    while !prev.is_start_of_block(m) {
        if prev.get(m).is_some_and(|i| i.output().is_some()) {
            break;
        }
        prev = prev.previous_in_block(m);
    }
    prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn test_location_of() {
        let l = LocalId::new(3);
        let v = Value::local_elem(l, 2, DataType::INT32.vector(16));
        assert_eq!(Location::of(&v), Some(Location::Local(l)));
        assert_eq!(Location::of(&Value::int(1)), None);
        let nop = Value::reg(Register::Nop, DataType::INT32);
        assert_eq!(Location::of(&nop), None);
    }

    #[test]
    fn test_fold_sfu_output() {
        let mut set = ExcludedSet::new();
        let instr = Instr::new(OpMov {
            dst: Value::reg(Register::SfuRecip, DataType::FLOAT),
            src: Value::float(2.0),
        });
        set.fold_output(&instr);
        assert_eq!(set.len(), Register::SFU_TMU_GROUP.len());
        assert!(set.contains(&Location::Reg(Register::TmuAddress)));
    }

    #[test]
    fn test_r4_is_sfu_output() {
        let r4 = Value::reg(Register::Acc(4), DataType::FLOAT);
        let loc = Location::Reg(Register::SfuOut);
        assert_eq!(Location::of(&r4), Some(loc));

        let mut set = ExcludedSet::new();
        set.insert(loc);
        assert!(set.contains_value(&r4));

        let mut set = ExcludedSet::new();
        set.fold_output(&Instr::new(OpMov {
            dst: r4,
            src: Value::float(1.0),
        }));
        assert_eq!(set.len(), Register::SFU_TMU_GROUP.len());
        assert!(set.contains(&Location::Reg(Register::SfuRecip)));
    }

    #[test]
    fn test_find_previous_instruction() {
        let mut m = Method::new("prev");
        let a = m.add_local("a", DataType::INT32, LocalKind::General);
        let blk = m.create_block("entry");
        let mut b = Builder::new(&mut m, blk);
        let ldi = b.ldi(b.local(a), 7);
        b.mem_barrier(MemoryScope::WorkGroup);
        b.nop(DelayType::WaitRegister);
        let nop = b.nop(DelayType::WaitRegister);

        assert_eq!(find_previous_instruction(&m, nop), ldi);

        let first = m.block_begin(blk).next_in_block(&m);
        let prev = find_previous_instruction(&m, first);
        assert!(prev.is_start_of_block(&m));
    }
}
