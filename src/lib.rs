// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Instruction hazard scheduling for the QPU, a fixed-pipeline dual-ALU SIMD
//! processor.
//!
//! The passes in this crate work on a [`Method`](method::Method) in place:
//!
//!  1. [`split_read_after_writes`](method::Method::split_read_after_writes)
//!     inserts `nop` placeholders where a value cannot be forwarded in time.
//!  2. [`reorder_within_basic_blocks`](method::Method::reorder_within_basic_blocks)
//!     replaces placeholders with independent instructions where that is
//!     provably legal, then sweeps the emptied slots.
//!  3. [`move_rotation_sources_to_accumulators`](opt_rotation_srcs::move_rotation_sources_to_accumulators)
//!     makes sure every vector rotation reads a short-lived value.
//!
//! [`passes::Optimizer`] sequences them over all methods of a module.

pub mod api;
pub mod builder;
pub mod error;
pub mod ir;
pub mod locals;
pub mod method;
pub mod opt_reorder;
pub mod opt_rotation_srcs;
pub mod opt_split_read_writes;
pub mod passes;
pub mod sched_common;
pub mod walker;

#[cfg(test)]
mod sched_tests;
