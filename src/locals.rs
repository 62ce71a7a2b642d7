// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::error::{CompilationError, CompilationStep, Result};
use crate::ir::{DataType, InstrId};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LocalId(u32);

impl LocalId {
    pub(crate) fn new(idx: usize) -> LocalId {
        LocalId(idx.try_into().expect("Too many locals"))
    }

    pub fn idx(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LocalKind {
    General,
    Parameter,
    /// Names a basic block, written only by the block's label
    Label,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UseKind {
    Reader,
    Writer,
    Both,
}

impl UseKind {
    pub fn reads(&self) -> bool {
        matches!(self, UseKind::Reader | UseKind::Both)
    }

    pub fn writes(&self) -> bool {
        matches!(self, UseKind::Writer | UseKind::Both)
    }
}

/// How often a single instruction reads and writes a local
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LocalUse {
    pub num_reads: u32,
    pub num_writes: u32,
}

impl LocalUse {
    pub fn reads_local(&self) -> bool {
        self.num_reads > 0
    }

    pub fn writes_local(&self) -> bool {
        self.num_writes > 0
    }

    pub fn is_empty(&self) -> bool {
        self.num_reads == 0 && self.num_writes == 0
    }

    pub fn matches(&self, kind: UseKind) -> bool {
        match kind {
            UseKind::Reader => self.reads_local(),
            UseKind::Writer => self.writes_local(),
            UseKind::Both => self.reads_local() || self.writes_local(),
        }
    }
}

/// A named SSA-like value
///
/// Every local keeps a record of the instructions accessing it.  The record
/// is keyed by [`InstrId`] so it stays valid when an instruction moves to a
/// different position within its method.
#[derive(Clone, Debug)]
pub struct Local {
    id: LocalId,
    pub name: String,
    pub ty: DataType,
    pub kind: LocalKind,
    users: IndexMap<InstrId, LocalUse, FxBuildHasher>,
}

impl Local {
    pub(crate) fn new(
        id: LocalId,
        name: String,
        ty: DataType,
        kind: LocalKind,
    ) -> Local {
        Local {
            id,
            name,
            ty,
            kind,
            users: IndexMap::default(),
        }
    }

    pub fn id(&self) -> LocalId {
        self.id
    }

    pub fn add_user(&mut self, instr: InstrId, kind: UseKind) {
        assert!(instr.is_assigned());
        let entry = self.users.entry(instr).or_default();
        if kind.reads() {
            entry.num_reads += 1;
        }
        if kind.writes() {
            entry.num_writes += 1;
        }
    }

    /// Removes one access of the given kind
    ///
    /// Removing an access which is not on record is an error, unless `kind`
    /// is [`UseKind::Both`], which drops whatever record exists.
    pub fn remove_user(&mut self, instr: InstrId, kind: UseKind) -> Result<()> {
        let on_record = match (self.users.get(&instr), kind) {
            (_, UseKind::Both) => true,
            (None, _) => false,
            (Some(u), UseKind::Reader) => u.reads_local(),
            (Some(u), UseKind::Writer) => u.writes_local(),
        };
        if !on_record {
            return Err(CompilationError::new(
                CompilationStep::General,
                format!(
                    "Removing {:?} use of {} which is not registered",
                    kind, self
                ),
                instr,
            ));
        }

        let Some(entry) = self.users.get_mut(&instr) else {
            return Ok(());
        };
        match kind {
            UseKind::Reader => entry.num_reads -= 1,
            UseKind::Writer => entry.num_writes -= 1,
            UseKind::Both => *entry = LocalUse::default(),
        }
        if entry.is_empty() {
            self.users.shift_remove(&instr);
        }
        Ok(())
    }

    pub fn remove_user_completely(&mut self, instr: InstrId) {
        self.users.shift_remove(&instr);
    }

    pub fn users(&self) -> impl Iterator<Item = (InstrId, LocalUse)> + '_ {
        self.users.iter().map(|(id, u)| (*id, *u))
    }

    pub fn users_of(
        &self,
        kind: UseKind,
    ) -> impl Iterator<Item = InstrId> + '_ {
        self.users
            .iter()
            .filter(move |(_, u)| u.matches(kind))
            .map(|(id, _)| *id)
    }

    pub fn use_of(&self, instr: InstrId) -> Option<LocalUse> {
        self.users.get(&instr).copied()
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Returns the writer if exactly one instruction writes this local
    pub fn single_writer(&self) -> Option<InstrId> {
        let mut writers = self.users_of(UseKind::Writer);
        let first = writers.next()?;
        match writers.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.id)?;
        if !self.name.is_empty() {
            write!(f, " ({})", self.name)?;
        }
        Ok(())
    }
}
