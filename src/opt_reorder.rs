// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::api::Configuration;
use crate::error::Result;
use crate::ir::*;
use crate::method::Method;
use crate::sched_common::{find_previous_instruction, ExcludedSet, Location};
use crate::walker::InstrWalker;

use rustc_hash::FxHashSet;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Rejection {
    /// Touches an excluded location, or overwrites one that an instruction
    /// between the placeholder and the candidate still reads
    Excluded,
    CondOrSideEffects,
    /// Branches, labels and barriers never move
    Barrier,
    Placeholder,
    NoMachineCode,
}

fn is_mutex_access(instr: &Instr) -> bool {
    instr.output().is_some_and(|out| out.has_reg(Register::Mutex))
        || instr.args().iter().any(|arg| arg.has_reg(Register::Mutex))
}

fn check_candidate(
    instr: &Instr,
    excluded: &ExcludedSet,
    read_between: &FxHashSet<Location>,
) -> Option<Rejection> {
    let overwrites_read = instr
        .output()
        .and_then(Location::of)
        .is_some_and(|loc| read_between.contains(&loc));

    if excluded.is_accessed_by(instr) || overwrites_read {
        Some(Rejection::Excluded)
    } else if instr.has_conditional_execution() || instr.has_side_effects() {
        Some(Rejection::CondOrSideEffects)
    } else if instr.is_branch() || instr.is_label() || instr.is_barrier() {
        Some(Rejection::Barrier)
    } else if instr.is_nop() {
        Some(Rejection::Placeholder)
    } else if !instr.maps_to_asm() {
        Some(Rejection::NoMachineCode)
    } else {
        None
    }
}

/// Scans forward from `pos` for an instruction which accesses nothing in
/// `excluded`
///
/// At most `max_instrs` slots are looked at, `pos` and empty slots
/// included.  Every skipped instruction adds its output to `excluded`, so
/// the set returned through it is the one the candidate was checked
/// against.  Any access to the mutex ends the search.
pub fn find_instruction_not_accessing(
    m: &Method,
    pos: InstrWalker,
    excluded: &mut ExcludedSet,
    max_instrs: usize,
) -> Option<InstrWalker> {
    let mut read_between = FxHashSet::default();
    let mut it = pos;
    for _ in 0..max_instrs {
        if it.is_end_of_block() {
            return None;
        }

        if let Some(instr) = it.get(m) {
            // Moving anything over a mutex access would grow the critical
            // section, and the access itself must stay put
            if is_mutex_access(instr) {
                log::debug!("Stopping search at mutex access: {}", instr);
                return None;
            }

            match check_candidate(instr, excluded, &read_between) {
                None => {
                    log::debug!(
                        "Found instruction not using any of the excluded \
                         values ({}): {}",
                        excluded,
                        instr
                    );
                    return Some(it);
                }
                Some(Rejection::Barrier) => (),
                Some(_) => excluded.fold_output(instr),
            }
            read_between.extend(instr.args().iter().filter_map(Location::of));
        }
        it = it.next_in_block(m);
    }
    None
}

/// Finds an instruction to put into the placeholder at `it` without
/// violating the reason the placeholder exists for
///
/// Returns the candidate along with the excluded set it was checked
/// against.
pub fn find_replacement_candidate(
    m: &Method,
    it: InstrWalker,
    delay: DelayType,
    config: &Configuration,
) -> Option<(InstrWalker, ExcludedSet)> {
    let mut excluded = ExcludedSet::new();
    match delay {
        // Branch delay slots are only created during emission and nothing
        // may follow a thread end
        DelayType::BranchDelay | DelayType::ThreadEnd => return None,
        DelayType::WaitRegister => {
            let prev = find_previous_instruction(m, it);
            if prev.is_start_of_block(m) {
                // Several predecessor blocks could write the value
                log::debug!(
                    "Can't find reason for nop in block: {}",
                    m.local(m.block(it.block()).label())
                );
                return None;
            }
            let out = *prev.get(m).and_then(|i| i.output())?;
            excluded.insert_value(&out);
            match out.as_reg() {
                Some(Register::VpmInAddr) => {
                    excluded.insert(Location::Reg(Register::VpmInBusy));
                    excluded.insert(Location::Reg(Register::VpmIo));
                }
                Some(Register::VpmOutAddr) => {
                    excluded.insert(Location::Reg(Register::VpmOutBusy));
                    excluded.insert(Location::Reg(Register::VpmIo));
                }
                _ => (),
            }
        }
        DelayType::WaitSfu | DelayType::WaitTmu => {
            excluded.insert_sfu_tmu_group();
        }
    }

    let found = find_instruction_not_accessing(
        m,
        it,
        &mut excluded,
        config.replace_nop_max_instructions,
    )?;
    Some((found, excluded))
}

struct ReorderPass<'a> {
    config: &'a Configuration,
    replaced: usize,
}

impl<'a> ReorderPass<'a> {
    fn new(config: &'a Configuration) -> ReorderPass<'a> {
        ReorderPass {
            config,
            replaced: 0,
        }
    }

    fn replace_nops(&mut self, m: &mut Method, block: usize) -> Result<()> {
        let mut it = m.block_begin(block);
        while !it.is_end_of_block() {
            let nop = it.get(m).and_then(|instr| match &instr.op {
                Op::Nop(nop) if !instr.has_side_effects() => {
                    Some((nop.delay, instr.can_be_combined))
                }
                _ => None,
            });

            if let Some((delay, combinable)) = nop {
                let candidate =
                    find_replacement_candidate(m, it, delay, self.config);
                if let Some((candidate, _)) = candidate {
                    // The candidate's slot stays behind empty until cleanup
                    if let Some(mut instr) = candidate.release(m) {
                        log::debug!("Replacing nop with: {}", instr);
                        instr.can_be_combined &= combinable;
                        it.reset(m, instr)?;
                        self.replaced += 1;
                    }
                }
            }
            it = it.next_in_block(m);
        }
        Ok(())
    }
}

impl Method {
    /// Fills the `nop`s of one block and returns how many were replaced
    ///
    /// The slots the fillers came from are left empty.
    pub fn replace_nops(
        &mut self,
        block: usize,
        config: &Configuration,
    ) -> Result<usize> {
        let mut pass = ReorderPass::new(config);
        pass.replace_nops(self, block)?;
        Ok(pass.replaced)
    }

    /// Fills `nop` placeholders with independent instructions from further
    /// down the same block and removes the slots emptied that way
    pub fn reorder_within_basic_blocks(
        &mut self,
        config: &Configuration,
    ) -> Result<()> {
        let mut pass = ReorderPass::new(config);
        for block in 0..self.num_blocks() {
            pass.replace_nops(self, block)?;
        }
        let removed = self.clean_empty_instructions();
        log::trace!(
            "Replaced {} nops in {}, cleaned {} slots",
            pass.replaced,
            self.name,
            removed
        );
        Ok(())
    }
}
