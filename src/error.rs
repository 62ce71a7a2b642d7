// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use std::fmt;

/// The compilation stage an error was raised in
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompilationStep {
    General,
    Optimizer,
}

impl fmt::Display for CompilationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilationStep::General => write!(f, "General"),
            CompilationStep::Optimizer => write!(f, "Optimizer"),
        }
    }
}

/// A hard compilation failure
///
/// Only raised for broken bookkeeping.  Failing to find a filler for a delay
/// slot is never an error.
#[derive(Debug, thiserror::Error)]
#[error("{step}: {message}: {instr}")]
pub struct CompilationError {
    pub step: CompilationStep,
    pub message: String,
    /// Textual form of the offending instruction
    pub instr: String,
}

impl CompilationError {
    pub fn new(
        step: CompilationStep,
        message: impl Into<String>,
        instr: impl fmt::Display,
    ) -> Self {
        Self {
            step,
            message: message.into(),
            instr: instr.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilationError>;
