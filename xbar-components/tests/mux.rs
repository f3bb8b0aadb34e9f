// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use xbar_components::arbiter::ArbiterPolicy;
use xbar_components::bus::{BusInitiator, BusTarget};
use xbar_components::mux::{Mux, MuxConfig};
use xbar_components::types::{AddrReq, Burst, ReadBeat, RespStatus, WriteBeat, WriteResp};
use xbar_engine::engine::Engine;
use xbar_engine::test_helpers::start_test;
use xbar_engine::types::ProtocolChecking;
use xbar_track::Id;

struct Harness {
    engine: Engine,
    mux: Rc<Mux>,
    lanes: Vec<BusInitiator>,
    downstream: BusTarget,
}

fn setup(config: MuxConfig) -> Harness {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let num_lanes = config.num_lanes;
    let mux = Mux::new_and_register(&engine, &top, "mux", config).unwrap();
    let lanes: Vec<BusInitiator> = (0..num_lanes)
        .map(|i| BusInitiator::new(&engine, &top, format!("mgr{i}").as_str()))
        .collect();
    for (i, lane) in lanes.iter().enumerate() {
        lane.connect(mux.port_lane_i(i)).unwrap();
    }
    let downstream = BusTarget::new(&engine, &top, "sub");
    mux.connect_port_downstream(&downstream).unwrap();
    Harness {
        engine,
        mux,
        lanes,
        downstream,
    }
}

fn config(num_lanes: usize) -> MuxConfig {
    MuxConfig {
        num_lanes,
        id_width: 4,
        ..MuxConfig::default()
    }
}

fn read(tag: u64, id: u32) -> AddrReq {
    AddrReq::new(Id(tag), id, 0x100, 0, 3, Burst::Incr)
}

/// Keep every lane offering reads and accept everything downstream.
/// Returns the grant counters after each tick.
fn saturate_reads(h: &Harness, ticks: usize) -> Vec<Vec<u64>> {
    let mut tag = 0;
    let mut grants = Vec::new();
    for _ in 0..ticks {
        h.downstream.ar.pop();
        for lane in &h.lanes {
            if lane.ar.can_push() {
                tag += 1;
                lane.ar.push(read(tag, 1)).unwrap();
            }
        }
        h.engine.step().unwrap();
        grants.push((0..h.lanes.len()).map(|i| h.mux.grants(i)).collect());
    }
    grants
}

#[test]
fn round_robin_is_fair() {
    let h = setup(config(2));
    let grants = saturate_reads(&h, 40);

    // Every lane is granted at least once in every window of 2 x N ticks
    let window = 2 * h.lanes.len();
    for end in (window + 1)..grants.len() {
        let start = end - window;
        for lane in 0..h.lanes.len() {
            assert!(
                grants[end][lane] > grants[start][lane],
                "lane {lane} not granted between ticks {start} and {end}"
            );
        }
    }
    assert!(h.mux.last_ar_grant().is_some());
}

#[test]
fn fixed_priority_starves() {
    let h = setup(MuxConfig {
        ar_policy: ArbiterPolicy::FixedPriority,
        ..config(2)
    });
    let grants = saturate_reads(&h, 20);
    let last = grants.last().unwrap();
    assert!(last[0] > 10);
    assert_eq!(last[1], 0);
}

#[test]
fn id_extension() {
    let h = setup(config(2));
    h.lanes[1].ar.push(read(1, 3)).unwrap();
    h.engine.run_ticks(2).unwrap();
    let req = h.downstream.ar.pop().unwrap();
    assert_eq!(req.id, 0x13);
    assert_eq!(h.mux.last_ar_grant(), Some(1));

    h.downstream
        .r
        .push(ReadBeat {
            tag: Id(2),
            id: 0x13,
            data: 0xfeed,
            status: RespStatus::Okay,
            last: true,
        })
        .unwrap();
    h.engine.run_ticks(2).unwrap();
    let beat = h.lanes[1].r.pop().unwrap();
    assert_eq!(beat.id, 3);
    assert_eq!(beat.data, 0xfeed);
    assert!(h.lanes[0].r.is_empty());
}

#[test]
fn id_too_wide() {
    let h = setup(config(2));
    h.lanes[0].ar.push(read(1, 0x10)).unwrap();
    h.engine.step().unwrap();
    assert!(h.engine.step().is_err());
}

#[test]
fn write_budget() {
    let h = setup(MuxConfig {
        max_w_trans: 2,
        ..config(2)
    });
    let mut to_send = (0..3).map(|i| AddrReq::new(Id(i + 1), i as u32, 0x0, 0, 3, Burst::Incr));
    let mut next = to_send.next();
    let mut received = Vec::new();
    for _ in 0..10 {
        if let Some(req) = h.downstream.aw.pop() {
            received.push(req.id);
        }
        if next.is_some() && h.lanes[0].aw.can_push() {
            if let Some(req) = next.take() {
                h.lanes[0].aw.push(req).unwrap();
            }
            next = to_send.next();
        }
        h.engine.step().unwrap();
    }
    assert_eq!(received, vec![0, 1]);
    assert_eq!(h.mux.outstanding_writes(), 2);
    assert!(h.mux.stats().write_budget_stalls > 0);

    h.downstream
        .b
        .push(WriteResp {
            tag: Id(10),
            id: 0,
            status: RespStatus::Okay,
        })
        .unwrap();
    h.engine.run_ticks(4).unwrap();
    assert_eq!(h.downstream.aw.pop().map(|r| r.id), Some(2));
    assert_eq!(h.lanes[0].b.pop().map(|b| b.id), Some(0));
    assert_eq!(h.mux.stats().writes_granted, 3);
}

#[test]
fn write_data_follows_grants() {
    let h = setup(config(2));
    h.lanes[0]
        .aw
        .push(AddrReq::new(Id(1), 0, 0x0, 1, 3, Burst::Incr))
        .unwrap();
    h.lanes[1]
        .aw
        .push(AddrReq::new(Id(2), 0, 0x8, 0, 3, Burst::Incr))
        .unwrap();
    h.lanes[1].w.push(WriteBeat::new(Id(3), 0xc, true)).unwrap();
    h.lanes[0].w.push(WriteBeat::new(Id(4), 0xa, false)).unwrap();
    h.engine.step().unwrap();
    h.lanes[0].w.push(WriteBeat::new(Id(5), 0xb, true)).unwrap();

    let mut w = Vec::new();
    let mut aw = Vec::new();
    for _ in 0..10 {
        if let Some(req) = h.downstream.aw.pop() {
            aw.push(req.id);
        }
        if let Some(beat) = h.downstream.w.pop() {
            w.push(beat.data);
        }
        h.engine.step().unwrap();
    }
    assert_eq!(aw, vec![0x00, 0x10]);
    assert_eq!(w, vec![0xa, 0xb, 0xc]);
}

fn arrival_tick(fall_through: bool) -> u64 {
    let h = setup(MuxConfig {
        fall_through,
        ..config(1)
    });
    h.lanes[0].ar.push(read(1, 0)).unwrap();
    h.engine
        .run_until(20, || h.downstream.ar.is_pending())
        .unwrap()
}

#[test]
fn output_register_adds_a_tick() {
    assert_eq!(arrival_tick(true), 2);
    assert_eq!(arrival_tick(false), 3);
}

#[test]
fn output_register_full_throughput() {
    let h = setup(MuxConfig {
        fall_through: false,
        ..config(1)
    });
    let grants = saturate_reads(&h, 20);
    assert!(grants[19][0] >= 18);
}

fn misrouted_response(checking: ProtocolChecking) -> (Harness, bool) {
    let h = setup(MuxConfig {
        checking,
        ..config(2)
    });
    h.downstream
        .b
        .push(WriteResp {
            tag: Id(1),
            id: 0x50,
            status: RespStatus::Okay,
        })
        .unwrap();
    h.engine.step().unwrap();
    let failed = h.engine.step().is_err();
    (h, failed)
}

#[test]
fn misrouted_response_strict() {
    let (_h, failed) = misrouted_response(ProtocolChecking::Strict);
    assert!(failed);
}

#[test]
fn misrouted_response_relaxed() {
    let (h, failed) = misrouted_response(ProtocolChecking::Relaxed);
    assert!(!failed);
    h.engine.run_ticks(2).unwrap();
    assert!(h.downstream.b.can_push());
    assert!(h.lanes.iter().all(|l| l.b.is_empty()));
}

#[test]
fn tied_off_lane() {
    let h = setup(config(2));
    h.mux.tie_off_lane(1).unwrap();
    assert!(h.mux.tie_off_lane(2).is_err());

    h.lanes[1].ar.push(read(1, 0)).unwrap();
    h.engine.run_ticks(4).unwrap();
    assert!(h.downstream.ar.is_empty());
    assert_eq!(h.mux.grants(1), 0);

    // A response addressed to the tied-off lane is a violation
    h.downstream
        .r
        .push(ReadBeat {
            tag: Id(2),
            id: 0x10,
            data: 0,
            status: RespStatus::Okay,
            last: true,
        })
        .unwrap();
    h.engine.step().unwrap();
    assert!(h.engine.step().is_err());
}

#[test]
fn id_width_too_large() {
    let engine = start_test(file!());
    let config = MuxConfig {
        num_lanes: 4,
        id_width: 31,
        ..MuxConfig::default()
    };
    assert!(Mux::new_and_register(&engine, engine.top(), "mux", config).is_err());
}

#[test]
fn full_width_ids_on_one_lane() {
    let h = setup(MuxConfig {
        num_lanes: 1,
        id_width: 32,
        ..MuxConfig::default()
    });
    h.lanes[0].ar.push(read(1, 0xffff_fff0)).unwrap();
    h.engine.run_ticks(2).unwrap();
    let req = h.downstream.ar.pop().unwrap();
    assert_eq!(req.id, 0xffff_fff0);

    h.downstream
        .r
        .push(ReadBeat {
            tag: Id(2),
            id: 0xffff_fff0,
            data: 0xbeef,
            status: RespStatus::Okay,
            last: true,
        })
        .unwrap();
    h.engine.run_ticks(2).unwrap();
    let beat = h.lanes[0].r.pop().unwrap();
    assert_eq!(beat.id, 0xffff_fff0);
    assert_eq!(beat.data, 0xbeef);
}

fn unexpected_write_response(checking: ProtocolChecking) -> (Harness, bool) {
    let h = setup(MuxConfig {
        checking,
        ..config(2)
    });
    h.downstream
        .b
        .push(WriteResp {
            tag: Id(1),
            id: 0x01,
            status: RespStatus::Okay,
        })
        .unwrap();
    h.engine.step().unwrap();
    let failed = h.engine.step().is_err();
    (h, failed)
}

#[test]
fn unexpected_write_response_strict() {
    let (_h, failed) = unexpected_write_response(ProtocolChecking::Strict);
    assert!(failed);
}

#[test]
fn unexpected_write_response_relaxed() {
    let (h, failed) = unexpected_write_response(ProtocolChecking::Relaxed);
    assert!(!failed);
    h.engine.run_ticks(2).unwrap();
    assert_eq!(h.lanes[0].b.pop().map(|b| b.id), Some(1));
    assert_eq!(h.mux.outstanding_writes(), 0);
}
