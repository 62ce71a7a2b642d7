// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Named scheduling passes and the optimizer running them over a module
//!
//! Passes over different methods may run on different threads.  A pass only
//! ever gets exclusive access to the one method it works on, plus shared
//! access to the read-only configuration.

use crate::api::{Configuration, GetDebugFlags, DEBUG};
use crate::error::Result;
use crate::method::{Method, Module};
use crate::opt_rotation_srcs::move_rotation_sources_to_accumulators;
use crate::walker::InstrWalker;

use rayon::prelude::*;
use std::cmp::Ordering;
use std::fmt;

pub type PassFn = fn(&mut Method, &Configuration) -> Result<()>;
pub type StepFn =
    fn(&mut Method, InstrWalker, &Configuration) -> Result<InstrWalker>;

/// A pass over all instructions of one method
#[derive(Clone, Copy)]
pub struct OptimizationPass {
    pub name: &'static str,
    pub index: usize,
    pass: PassFn,
}

impl OptimizationPass {
    pub const fn new(
        name: &'static str,
        pass: PassFn,
        index: usize,
    ) -> OptimizationPass {
        OptimizationPass { name, index, pass }
    }

    pub fn run(&self, m: &mut Method, config: &Configuration) -> Result<()> {
        (self.pass)(m, config)
    }
}

/// A transformation of a single instruction
///
/// The step returns the walker to continue from, which may lie before the
/// one it was given.
#[derive(Clone, Copy)]
pub struct OptimizationStep {
    pub name: &'static str,
    pub index: usize,
    step: StepFn,
}

impl OptimizationStep {
    pub const fn new(
        name: &'static str,
        step: StepFn,
        index: usize,
    ) -> OptimizationStep {
        OptimizationStep { name, index, step }
    }

    pub fn run(
        &self,
        m: &mut Method,
        it: InstrWalker,
        config: &Configuration,
    ) -> Result<InstrWalker> {
        (self.step)(m, it, config)
    }
}

macro_rules! impl_ordered_by_index {
    ($ty:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.index == other.index && self.name == other.name
            }
        }

        impl Eq for $ty {}

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.index
                    .cmp(&other.index)
                    .then_with(|| self.name.cmp(other.name))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", self.name, self.index)
            }
        }
    };
}

impl_ordered_by_index!(OptimizationPass);
impl_ordered_by_index!(OptimizationStep);

pub const MOVE_ROTATION_SOURCES: OptimizationStep = OptimizationStep::new(
    "MoveRotationSourcesToAccumulators",
    move_rotation_sources_to_accumulators,
    10,
);

/// Every step run by [`RUN_SINGLE_STEPS`], in index order
pub const SINGLE_STEPS: [OptimizationStep; 1] = [MOVE_ROTATION_SOURCES];

fn run_single_steps(m: &mut Method, config: &Configuration) -> Result<()> {
    // An inserted copy can push an earlier value out of its window, so walk
    // again until no step adds a local
    loop {
        let num_locals = m.num_locals();
        let mut it = m.walk_all_instructions();
        while !it.is_end_of_method(m) {
            for step in &SINGLE_STEPS {
                it = step.run(m, it, config)?;
            }
            it = it.next_in_method(m);
        }
        if m.num_locals() == num_locals {
            return Ok(());
        }
    }
}

/// Runs all single-instruction steps over the method until nothing changes
pub const RUN_SINGLE_STEPS: OptimizationPass =
    OptimizationPass::new("SingleSteps", run_single_steps, 30);

/// Inserts `nop`s between writes and reads which cannot be forwarded
pub const SPLIT_READ_WRITES: OptimizationPass = OptimizationPass::new(
    "SplitReadAfterWrites",
    Method::split_read_after_writes,
    10,
);

/// Fills `nop`s with independent instructions and sweeps emptied slots
pub const REORDER: OptimizationPass = OptimizationPass::new(
    "ReorderInstructions",
    Method::reorder_within_basic_blocks,
    20,
);

pub const DEFAULT_PASSES: [OptimizationPass; 3] =
    [SPLIT_READ_WRITES, REORDER, RUN_SINGLE_STEPS];

pub struct Optimizer {
    config: Configuration,
    passes: Vec<OptimizationPass>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::new(Configuration::default(), &DEFAULT_PASSES)
    }
}

impl Optimizer {
    pub fn new(config: Configuration, passes: &[OptimizationPass]) -> Self {
        let mut opt = Optimizer {
            config,
            passes: Vec::new(),
        };
        for pass in passes {
            opt.add_pass(*pass);
        }
        opt
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn passes(&self) -> &[OptimizationPass] {
        &self.passes
    }

    /// Adds a pass, keeping the passes sorted by index
    pub fn add_pass(&mut self, pass: OptimizationPass) {
        if let Err(pos) = self.passes.binary_search(&pass) {
            self.passes.insert(pos, pass);
        }
    }

    pub fn remove_pass(&mut self, pass: &OptimizationPass) {
        self.passes.retain(|p| p != pass);
    }

    fn run_pass(
        &self,
        pass: &OptimizationPass,
        module: &mut Module,
    ) -> Result<()> {
        log::trace!("Running pass: {}", pass.name);
        if DEBUG.serial() {
            module
                .methods
                .iter_mut()
                .try_for_each(|m| pass.run(m, &self.config))?;
        } else {
            module
                .methods
                .par_iter_mut()
                .try_for_each(|m| pass.run(m, &self.config))?;
        }

        if DEBUG.print() {
            for m in &module.methods {
                log::debug!("After {}:\n{}", pass.name, m);
            }
        }
        Ok(())
    }

    /// Runs every pass, in index order, over every method of the module
    ///
    /// Stops at the first pass that fails on any method.
    pub fn optimize(&self, module: &mut Module) -> Result<()> {
        log::debug!(
            "Running {} optimization passes over {} methods of {}",
            self.passes.len(),
            module.methods.len(),
            module.name
        );
        for pass in &self.passes {
            self.run_pass(pass, module)?;
        }
        Ok(())
    }
}
