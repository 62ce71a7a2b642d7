// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::api::Configuration;
use crate::error::Result;
use crate::ir::*;
use crate::method::Method;
use crate::walker::InstrWalker;

struct SplitReadWritesPass {
    accumulator_threshold: usize,
    last_written: Option<LocalId>,
    last_instr: Option<InstrWalker>,
    inserted: usize,
}

impl SplitReadWritesPass {
    fn new(config: &Configuration) -> SplitReadWritesPass {
        SplitReadWritesPass {
            accumulator_threshold: config.accumulator_threshold,
            last_written: None,
            last_instr: None,
            inserted: 0,
        }
    }

    /// Whether the value written by `writer` cannot be forwarded straight
    /// into `reader`
    fn needs_split(
        &self,
        m: &Method,
        writer: InstrWalker,
        local: LocalId,
        reader: &Instr,
    ) -> bool {
        let Some(w) = writer.get(m) else {
            return false;
        };
        let threshold = self.accumulator_threshold;
        w.has_pack_mode()
            || matches!(reader.op, Op::Rotate(_))
            || !m.is_locally_limited(writer, local, threshold)
    }

    fn run(&mut self, m: &mut Method) {
        let mut it = m.walk_all_instructions();
        while !it.is_end_of_method(m) {
            let Some(instr) = it.get(m) else {
                it = it.next_in_method(m);
                continue;
            };

            let written = instr.output().and_then(Value::as_local);
            let maps_to_asm = instr.maps_to_asm();

            if let (Some(local), Some(writer)) =
                (self.last_written, self.last_instr)
            {
                if instr.reads_local(local)
                    && self.needs_split(m, writer, local, instr)
                {
                    log::debug!(
                        "Inserting nop to split up read-after-write before: {}",
                        instr
                    );
                    // Insert right after the writer so a label between the
                    // two stays in front of the reader
                    let mut at = writer.next_in_block(m);
                    at.emplace(m, Instr::new_nop(DelayType::WaitRegister));
                    self.inserted += 1;
                }
            }

            if maps_to_asm {
                self.last_instr = Some(it);
                self.last_written = written;
            }
            it = it.next_in_method(m);
        }
    }
}

impl Method {
    /// Inserts a `nop` after every write whose value cannot be read by the
    /// very next instruction
    pub fn split_read_after_writes(
        &mut self,
        config: &Configuration,
    ) -> Result<()> {
        let mut pass = SplitReadWritesPass::new(config);
        pass.run(self);
        log::trace!(
            "Inserted {} nops to split read-after-writes in {}",
            pass.inserted,
            self.name
        );
        Ok(())
    }
}
