// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use xbar_components::bus::BusInitiator;
use xbar_components::error_responder::ErrorResponder;
use xbar_components::types::{AddrReq, AtomicOp, Burst, ReadBeat, RespStatus, WriteBeat, WriteResp};
use xbar_engine::engine::Engine;
use xbar_engine::test_helpers::start_test;
use xbar_track::Id;

struct Harness {
    engine: Engine,
    responder: Rc<ErrorResponder>,
    mgr: BusInitiator,
}

fn setup(max_trans: usize) -> Harness {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let responder = ErrorResponder::new_and_register(&engine, &top, "error", max_trans).unwrap();
    let mgr = BusInitiator::new(&engine, &top, "mgr");
    mgr.connect(responder.port_bus()).unwrap();
    Harness {
        engine,
        responder,
        mgr,
    }
}

/// Step the engine, draining both response channels every tick.
fn collect(h: &Harness, ticks: usize) -> (Vec<WriteResp>, Vec<ReadBeat>) {
    let mut b = Vec::new();
    let mut r = Vec::new();
    for _ in 0..ticks {
        b.extend(h.mgr.b.pop());
        r.extend(h.mgr.r.pop());
        h.engine.step().unwrap();
    }
    (b, r)
}

fn write(tag: u64, id: u32, len: u8) -> AddrReq {
    AddrReq::new(Id(tag), id, 0x4000_0000, len, 3, Burst::Incr)
}

#[test]
fn write_response_waits_for_last_beat() {
    let h = setup(4);
    h.mgr.aw.push(write(1, 5, 1)).unwrap();
    h.mgr.w.push(WriteBeat::new(Id(2), 0, false)).unwrap();
    let (b, _) = collect(&h, 5);
    assert!(b.is_empty());
    assert_eq!(h.responder.outstanding(), (1, 0));

    h.mgr.w.push(WriteBeat::new(Id(3), 0, true)).unwrap();
    let (b, r) = collect(&h, 5);
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].id, 5);
    assert_eq!(b[0].status, RespStatus::DecodeError);
    assert!(r.is_empty());
    assert_eq!(h.responder.outstanding(), (0, 0));
    assert_eq!(h.responder.num_responses(), 1);
}

#[test]
fn read_returns_zero_beats() {
    let h = setup(4);
    h.mgr
        .ar
        .push(AddrReq::new(Id(1), 9, 0x4000_0000, 3, 3, Burst::Incr))
        .unwrap();
    let (b, r) = collect(&h, 10);
    assert!(b.is_empty());
    assert_eq!(r.len(), 4);
    assert!(r.iter().all(|beat| beat.id == 9 && beat.data == 0));
    assert!(r.iter().all(|beat| beat.status == RespStatus::DecodeError));
    let last: Vec<bool> = r.iter().map(|beat| beat.last).collect();
    assert_eq!(last, vec![false, false, false, true]);
    assert_eq!(h.responder.num_responses(), 1);
}

#[test]
fn atomic_returns_one_read_beat() {
    let h = setup(4);
    h.mgr.aw.push(write(1, 2, 0).with_atomic(AtomicOp::LoadAdd)).unwrap();
    h.mgr.w.push(WriteBeat::new(Id(2), 7, true)).unwrap();
    let (b, r) = collect(&h, 8);
    assert_eq!(b.len(), 1);
    assert_eq!(r.len(), 1);
    assert!(r[0].last);
    assert_eq!(r[0].status, RespStatus::DecodeError);
    assert_eq!(h.responder.outstanding(), (0, 0));
}

#[test]
fn store_atomic_has_no_read_data() {
    let h = setup(4);
    h.mgr.aw.push(write(1, 2, 0).with_atomic(AtomicOp::StoreAdd)).unwrap();
    h.mgr.w.push(WriteBeat::new(Id(2), 7, true)).unwrap();
    let (b, r) = collect(&h, 8);
    assert_eq!(b.len(), 1);
    assert!(r.is_empty());
}

#[test]
fn max_trans_bounds_writes() {
    let h = setup(2);
    let mut tag = 0;
    for _ in 0..10 {
        if tag < 3 && h.mgr.aw.can_push() {
            tag += 1;
            h.mgr.aw.push(write(tag, 1, 0)).unwrap();
        }
        h.engine.step().unwrap();
    }
    assert_eq!(h.responder.outstanding(), (2, 0));
    assert_eq!(h.responder.port_bus().aw.len(), 1);

    h.mgr.w.push(WriteBeat::new(Id(10), 0, true)).unwrap();
    let (b, _) = collect(&h, 5);
    assert_eq!(b.len(), 1);
    assert!(h.responder.port_bus().aw.is_empty());
    assert_eq!(h.responder.outstanding(), (2, 0));
}

#[test]
fn zero_max_trans_is_an_error() {
    let engine = start_test(file!());
    assert!(ErrorResponder::new_and_register(&engine, engine.top(), "error", 0).is_err());
}
