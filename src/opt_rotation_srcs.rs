// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::api::Configuration;
use crate::error::Result;
use crate::ir::*;
use crate::method::Method;
use crate::walker::InstrWalker;

fn rotation_source(m: &Method, it: InstrWalker) -> Option<LocalId> {
    match &it.get(m)?.op {
        Op::Rotate(rot) => rot.src().as_local(),
        _ => None,
    }
}

/// Whether only placeholders and empty slots lie between `from` and `to`
fn only_placeholders_between(
    m: &Method,
    from: InstrWalker,
    to: InstrWalker,
) -> bool {
    let mut cur = from.next_in_block(m);
    while cur != to {
        if cur.is_end_of_block() {
            return false;
        }
        if cur.get(m).is_some_and(|i| !i.is_nop()) {
            return false;
        }
        cur = cur.next_in_block(m);
    }
    true
}

/// Whether `writer` is a copy made for the rotation at `it` earlier
fn is_rotation_copy(
    m: &Method,
    writer: InstrWalker,
    it: InstrWalker,
    local: LocalId,
) -> bool {
    let Some(instr) = writer.get(m) else {
        return false;
    };
    let l = m.local(local);
    matches!(instr.op, Op::Mov(_))
        && l.single_writer() == Some(instr.id())
        && l.num_users() == 2
        && only_placeholders_between(m, writer, it)
}

/// Finds where a copy feeding the rotation at `it` goes: in front of the
/// placeholders directly preceding the rotation, if any
fn copy_insertion_point(m: &Method, it: InstrWalker) -> InstrWalker {
    let mut at = it;
    loop {
        let prev = at.previous_in_block(m);
        if prev.is_start_of_block(m) {
            return at;
        }
        match prev.get(m) {
            None => at = prev,
            Some(instr) if instr.is_nop() => at = prev,
            Some(_) => return at,
        }
    }
}

/// Makes sure the source of the vector rotation at `it` is short-lived
/// enough to sit in an accumulator
///
/// If the source is written in another block, has more than one writer or
/// lives too long, it is
/// copied into a fresh temporary right before the rotation and the rotation
/// reads the copy instead.  Returns the position of the source's writer in
/// that case, the block start if there is none, and `it` otherwise.
pub fn move_rotation_sources_to_accumulators(
    m: &mut Method,
    it: InstrWalker,
    config: &Configuration,
) -> Result<InstrWalker> {
    let Some(local) = rotation_source(m, it) else {
        return Ok(it);
    };

    let mut writer = it.previous_in_block(m);
    while !writer.is_start_of_block(m) {
        if writer.get(m).is_some_and(|i| i.writes_local(local)) {
            break;
        }
        writer = writer.previous_in_block(m);
    }

    let threshold = config.accumulator_threshold;
    if !writer.is_start_of_block(m)
        && ((m.local(local).single_writer().is_some()
            && m.is_locally_limited(writer, local, threshold))
            || is_rotation_copy(m, writer, it, local))
    {
        return Ok(it);
    }

    if let Some(rot) = it.get(m) {
        log::debug!(
            "Moving source of vector rotation to temporary for: {}",
            rot
        );
    }

    let ty = m.local(local).ty;
    let tmp = m.add_new_local(ty, "vector_rotation");
    let mut at = copy_insertion_point(m, it);
    let needs_wait = at == it;
    at.emplace(
        m,
        Instr::new_boxed(OpMov {
            dst: Value::local(tmp, ty),
            src: Value::local(local, ty),
        }),
    );
    if needs_wait {
        // The rotation must not read a value written by the instruction
        // right before it
        let mut wait = it;
        wait.emplace(m, Instr::new_nop(DelayType::WaitRegister));
    }
    m.replace_local(it, local, tmp, UseKind::Reader)?;

    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    fn text(m: &Method, blk: usize) -> Vec<String> {
        m.block(blk).instrs().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_local_source_is_kept() {
        let mut m = Method::new("rot");
        let vec16 = DataType::INT32.vector(16);
        let a = m.add_local("a", vec16, LocalKind::General);
        let c = m.add_local("c", vec16, LocalKind::General);
        let blk = m.create_block("entry");
        let mut b = Builder::new(&mut m, blk);
        b.ldi(b.local(a), 1);
        b.nop(DelayType::WaitRegister);
        let rot = b.rotate(b.local(c), b.local(a), Value::int(2));

        let config = Configuration::default();
        let next =
            move_rotation_sources_to_accumulators(&mut m, rot, &config)
                .unwrap();
        assert_eq!(next, rot);
        assert_eq!(m.num_locals(), 3);
    }

    #[test]
    fn test_long_lived_source_is_copied() {
        let mut m = Method::new("rot");
        let vec16 = DataType::INT32.vector(16);
        let a = m.add_local("a", vec16, LocalKind::General);
        let c = m.add_local("c", vec16, LocalKind::General);
        let blk = m.create_block("entry");
        let mut b = Builder::new(&mut m, blk);
        let ldi = b.ldi(b.local(a), 1);
        for _ in 0..6 {
            b.ldi(b.local(c), 0);
        }
        b.nop(DelayType::WaitRegister);
        let rot = b.rotate(b.local(c), b.local(a), Value::int(2));
        b.alu(AluOp::Add, b.local(c), &[b.local(a), b.local(c)]);

        let config = Configuration::default();
        let next =
            move_rotation_sources_to_accumulators(&mut m, rot, &config)
                .unwrap();
        assert_eq!(next, ldi);

        let tmp = m.find_local("vector_rotation.3").unwrap();
        let lines = text(&m, blk);
        // The copy goes in front of the pending nop
        assert_eq!(lines[8], "%3 = mov %0");
        assert_eq!(lines[9], "nop (wait_reg)");
        assert_eq!(lines[10], "%1 = rot %3, 2");
        assert_eq!(m.local(a).users().count(), 3);
        assert_eq!(m.local(tmp).users().count(), 2);

        // A second run leaves the copy alone
        let next =
            move_rotation_sources_to_accumulators(&mut m, rot, &config)
                .unwrap();
        assert_eq!(next, rot);
        assert_eq!(m.num_locals(), 4);
    }

    #[test]
    fn test_source_with_two_writers_is_copied() {
        let mut m = Method::new("rot");
        let vec16 = DataType::INT32.vector(16);
        let a = m.add_local("a", vec16, LocalKind::General);
        let c = m.add_local("c", vec16, LocalKind::General);
        let b0 = m.create_block("b0");
        let b1 = m.create_block("b1");
        let mut b = Builder::new(&mut m, b0);
        b.ldi(b.local(a), 1);
        let mut b = Builder::new(&mut m, b1);
        let ldi = b.ldi(b.local(a), 2);
        b.nop(DelayType::WaitRegister);
        let rot = b.rotate(b.local(c), b.local(a), Value::int(2));

        let config = Configuration::default();
        assert!(m.is_locally_limited(ldi, a, config.accumulator_threshold));
        let next =
            move_rotation_sources_to_accumulators(&mut m, rot, &config)
                .unwrap();
        assert_eq!(next, ldi);

        let lines = text(&m, b1);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[2], "%4 = mov %0");
        assert_eq!(lines[3], "nop (wait_reg)");
        assert_eq!(lines[4], "%1 = rot %4, 2");
    }

    #[test]
    fn test_source_from_other_block() {
        let mut m = Method::new("rot");
        let vec16 = DataType::INT32.vector(16);
        let a = m.add_local("a", vec16, LocalKind::General);
        let c = m.add_local("c", vec16, LocalKind::General);
        let b0 = m.create_block("b0");
        let b1 = m.create_block("b1");
        let mut b = Builder::new(&mut m, b0);
        b.ldi(b.local(a), 1);
        let mut b = Builder::new(&mut m, b1);
        let rot = b.rotate(b.local(c), b.local(a), Value::int(2));

        let config = Configuration::default();
        let next =
            move_rotation_sources_to_accumulators(&mut m, rot, &config)
                .unwrap();
        assert!(next.is_start_of_block(&m));
        assert_eq!(next.block(), b1);

        let lines = text(&m, b1);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "%4 = mov %0");
        assert_eq!(lines[2], "nop (wait_reg)");
        assert_eq!(lines[3], "%1 = rot %4, 2");
    }
}
