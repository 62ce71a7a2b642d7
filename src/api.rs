// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use std::env;
use std::sync::OnceLock;

/// Number of instructions the delay-slot filler looks at after a `nop`
pub const REPLACE_NOP_MAX_INSTRUCTIONS_TO_CHECK: usize = 4;

/// Number of instructions a value may live for and still be guaranteed to
/// fit into an accumulator
pub const ACCUMULATOR_THRESHOLD_HINT: usize = 6;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Configuration {
    /// Lookahead of the forward candidate search, empty slots included
    pub replace_nop_max_instructions: usize,
    /// Window used by the "locally limited" live range test
    pub accumulator_threshold: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            replace_nop_max_instructions: REPLACE_NOP_MAX_INSTRUCTIONS_TO_CHECK,
            accumulator_threshold: ACCUMULATOR_THRESHOLD_HINT,
        }
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Configuration {
    /// Returns the default configuration with any `QPU_SCHED_LOOKAHEAD` or
    /// `QPU_ACCUMULATOR_THRESHOLD` overrides applied
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            replace_nop_max_instructions: env_usize(
                "QPU_SCHED_LOOKAHEAD",
                default.replace_nop_max_instructions,
            ),
            accumulator_threshold: env_usize(
                "QPU_ACCUMULATOR_THRESHOLD",
                default.accumulator_threshold,
            ),
        }
    }
}

enum DebugFlags {
    Annotate,
    Print,
    Serial,
}

pub struct Debug {
    flags: u32,
}

impl Debug {
    fn parse(debug_str: &str) -> Debug {
        let mut flags = 0;
        for flag in debug_str.split(',') {
            match flag.trim() {
                "annotate" => flags |= 1 << DebugFlags::Annotate as u8,
                "print" => flags |= 1 << DebugFlags::Print as u8,
                "serial" => flags |= 1 << DebugFlags::Serial as u8,
                "" => (),
                unk => log::warn!("Unknown QPU_DEBUG flag \"{}\"", unk),
            }
        }
        Debug { flags }
    }

    fn new() -> Debug {
        match env::var("QPU_DEBUG") {
            Ok(s) => Debug::parse(&s),
            Err(_) => Debug { flags: 0 },
        }
    }
}

pub trait GetDebugFlags {
    fn debug_flags(&self) -> u32;

    /// Leave a marker where a delay-slot filler was moved out from
    fn annotate(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Annotate as u8) != 0
    }

    /// Log every method after each pass
    fn print(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Print as u8) != 0
    }

    /// Optimize methods one after the other instead of in parallel
    fn serial(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Serial as u8) != 0
    }
}

impl GetDebugFlags for Debug {
    fn debug_flags(&self) -> u32 {
        self.flags
    }
}

pub static DEBUG: OnceLock<Debug> = OnceLock::new();

impl GetDebugFlags for OnceLock<Debug> {
    fn debug_flags(&self) -> u32 {
        self.get_or_init(Debug::new).flags
    }
}
