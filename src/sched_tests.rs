// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::api::Configuration;
use crate::builder::Builder;
use crate::ir::*;
use crate::method::{Method, Module};
use crate::opt_reorder::find_replacement_candidate;
use crate::passes::{Optimizer, RUN_SINGLE_STEPS};
use crate::walker::InstrWalker;

fn slot_text(m: &Method, blk: usize) -> Vec<String> {
    m.block(blk)
        .slots()
        .map(|s| match m.block(blk).instr(s) {
            Some(i) => i.to_string(),
            None => "<empty>".into(),
        })
        .collect()
}

fn new_method(locals: &[&str]) -> (Method, Vec<LocalId>) {
    let mut m = Method::new("kernel");
    let ids = locals
        .iter()
        .map(|name| m.add_local(*name, DataType::INT32, LocalKind::General))
        .collect();
    (m, ids)
}

#[test]
fn test_fill_independent_add() {
    let (mut m, l) = new_method(&["L", "L2"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(l[0]), 1);
    b.nop(DelayType::WaitRegister);
    b.alu(AluOp::Add, b.local(l[1]), &[b.local(l[1]), Value::int(1)]);

    let config = Configuration::default();
    assert_eq!(m.replace_nops(blk, &config).unwrap(), 1);
    assert_eq!(
        slot_text(&m, blk),
        ["label %2:", "%0 = ldi 1", "%1 = add %1, 1", "<empty>"]
    );

    assert_eq!(m.clean_empty_instructions(), 1);
    assert_eq!(
        slot_text(&m, blk),
        ["label %2:", "%0 = ldi 1", "%1 = add %1, 1"]
    );
}

#[test]
fn test_fill_after_mutex_release() {
    let (mut m, l) = new_method(&["a"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    let release = b.mutex_release();
    let nop = b.nop(DelayType::WaitRegister);
    b.alu(AluOp::Add, b.local(l[0]), &[b.local(l[0]), Value::int(1)]);
    let release_id = release.get(&m).unwrap().id();

    let config = Configuration::default();
    let (found, excluded) =
        find_replacement_candidate(&m, nop, DelayType::WaitRegister, &config)
            .unwrap();
    let filler = found.get(&m).unwrap();
    assert_ne!(filler.id(), release_id);
    assert!(!excluded.is_accessed_by(filler));

    m.reorder_within_basic_blocks(&config).unwrap();
    assert_eq!(
        slot_text(&m, blk),
        ["label %1:", "mutex = mov 1", "%0 = add %0, 1"]
    );
    // The release itself never moves
    assert_eq!(m.block(blk).instrs().nth(1).unwrap().id(), release_id);
}

#[test]
fn test_no_fill_across_mutex_release() {
    let (mut m, l) = new_method(&["a", "b"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(l[0]), 1);
    let nop = b.nop(DelayType::WaitRegister);
    b.mutex_release();
    b.ldi(b.local(l[1]), 2);

    let config = Configuration::default();
    let delay = DelayType::WaitRegister;
    assert!(find_replacement_candidate(&m, nop, delay, &config).is_none());

    let before = slot_text(&m, blk);
    m.reorder_within_basic_blocks(&config).unwrap();
    assert_eq!(slot_text(&m, blk), before);
}

#[test]
fn test_no_fill_across_mutex_acquire() {
    let (mut m, l) = new_method(&["a", "b"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(l[0]), 1);
    b.nop(DelayType::WaitRegister);
    b.mutex_acquire();
    b.ldi(b.local(l[1]), 2);

    let before = slot_text(&m, blk);
    m.reorder_within_basic_blocks(&Configuration::default())
        .unwrap();
    assert_eq!(slot_text(&m, blk), before);
}

#[test]
fn test_thread_end_is_never_filled() {
    let (mut m, l) = new_method(&["a", "b"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(l[0]), 1);
    let thrend = b.nop(DelayType::ThreadEnd);
    b.ldi(b.local(l[1]), 2);
    let branch = b.nop(DelayType::BranchDelay);
    b.ldi(b.local(l[1]), 3);

    let config = Configuration::default();
    for (nop, delay) in [
        (thrend, DelayType::ThreadEnd),
        (branch, DelayType::BranchDelay),
    ] {
        assert!(find_replacement_candidate(&m, nop, delay, &config).is_none());
    }

    m.reorder_within_basic_blocks(&config).unwrap();
    assert_eq!(m.block(blk).num_instrs(), 6);
}

#[test]
fn test_repair_rotation_source_from_earlier_block() {
    let mut m = Method::new("kernel");
    let vec16 = DataType::INT32.vector(16);
    let l3 = m.add_local("L3", vec16, LocalKind::General);
    let out = m.add_local("out", vec16, LocalKind::General);
    let tmp = m.add_local("t", vec16, LocalKind::General);
    let b0 = m.create_block("b0");
    let b1 = m.create_block("b1");
    let b2 = m.create_block("b2");

    let mut b = Builder::new(&mut m, b0);
    b.ldi(b.local(l3), 7);
    let mut b = Builder::new(&mut m, b1);
    b.ldi(b.local(tmp), 1);
    let mut b = Builder::new(&mut m, b2);
    let rot = b.rotate(b.local(out), b.local(l3), Value::int(1));

    RUN_SINGLE_STEPS
        .run(&mut m, &Configuration::default())
        .unwrap();

    let lines = slot_text(&m, b2);
    assert_eq!(
        lines,
        ["label %5:", "%6 = mov %0", "nop (wait_reg)", "%1 = rot %6, 1"]
    );
    let rot = rot.get(&m).unwrap();
    let src = match &rot.op {
        Op::Rotate(r) => r.src().as_local().unwrap(),
        _ => panic!("Expected a rotation"),
    };
    assert!(m.local(src).name.starts_with("vector_rotation"));
    assert!(!rot.reads_local(l3));
    assert_eq!(m.local(l3).users().count(), 2);
}

fn rotation_source(m: &Method, rot: InstrWalker) -> LocalId {
    match &rot.get(m).unwrap().op {
        Op::Rotate(r) => r.src().as_local().unwrap(),
        _ => panic!("Expected a rotation"),
    }
}

#[test]
fn test_copy_pushes_earlier_source_out_of_window() {
    let mut m = Method::new("kernel");
    let vec16 = DataType::INT32.vector(16);
    let l: Vec<LocalId> = ["a", "b", "c", "d", "e", "f", "g"]
        .iter()
        .map(|name| m.add_local(*name, vec16, LocalKind::General))
        .collect();
    let (a, bb) = (l[0], l[1]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(a), 1);
    let rot_a = b.rotate(b.local(l[2]), b.local(a), Value::int(1));
    b.ldi(b.local(bb), 2);
    let rot_b = b.rotate(b.local(l[3]), b.local(bb), Value::int(1));
    b.alu(AluOp::Add, b.local(l[4]), &[b.local(a), Value::int(1)]);
    for _ in 0..4 {
        b.ldi(b.local(l[5]), 0);
    }
    b.alu(AluOp::Add, b.local(l[6]), &[b.local(bb), Value::int(1)]);

    RUN_SINGLE_STEPS
        .run(&mut m, &Configuration::default())
        .unwrap();

    for rot in [rot_a, rot_b] {
        let src = rotation_source(&m, rot);
        assert!(m.local(src).name.starts_with("vector_rotation"));
    }
    assert_eq!(m.num_locals(), 10);

    // Nothing is left to repair
    RUN_SINGLE_STEPS
        .run(&mut m, &Configuration::default())
        .unwrap();
    assert_eq!(m.num_locals(), 10);
}

#[test]
fn test_remove_unregistered_use_is_fatal() {
    let (mut m, l) = new_method(&["a"]);
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    let ldi = b.ldi(b.local(l[0]), 1);

    let instr = ldi.release(&mut m).unwrap();
    m.unregister_uses(&instr).unwrap();
    let err = m.unregister_uses(&instr).unwrap_err();
    assert_eq!(err.instr, "%0 = ldi 1");
    assert!(err.to_string().contains("not registered"));
}

fn pipeline_method(name: &str) -> Method {
    let mut m = Method::new(name);
    let l: Vec<LocalId> = ["a", "b", "c", "d", "e", "f", "g", "h"]
        .iter()
        .map(|n| m.add_local(*n, DataType::INT32, LocalKind::General))
        .collect();
    let blk = m.create_block("entry");
    let mut b = Builder::new(&mut m, blk);
    b.ldi(b.local(l[0]), 1);
    b.alu(AluOp::Add, b.local(l[1]), &[b.local(l[0]), Value::int(1)]);
    for (i, local) in l[2..7].iter().enumerate() {
        b.ldi(b.local(*local), i as i32 + 5);
    }
    b.alu(AluOp::Add, b.local(l[7]), &[b.local(l[0]), b.local(l[1])]);
    m
}

#[test]
fn test_default_pipeline() {
    let mut module = Module::new("module");
    module.add_method(pipeline_method("k0"));
    module.add_method(pipeline_method("k1"));

    Optimizer::default().optimize(&mut module).unwrap();

    let expected = [
        "label %8:",
        "%0 = ldi 1",
        "%2 = ldi 5",
        "%1 = add %0, 1",
        "%3 = ldi 6",
        "%4 = ldi 7",
        "%5 = ldi 8",
        "%6 = ldi 9",
        "%7 = add %0, %1",
    ];
    for m in &module.methods {
        assert_eq!(slot_text(m, 0), expected);
        assert_eq!(m.block(0).num_empty_slots(), 0);
    }
}
