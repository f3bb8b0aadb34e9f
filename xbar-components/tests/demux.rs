// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use xbar_components::bus::{BusInitiator, BusTarget};
use xbar_components::decoder::{AddrRule, AddressMap, Decode, DefaultRoute, RouteSnapshot};
use xbar_components::demux::{Demux, DemuxConfig};
use xbar_components::types::{
    AddrReq, AtomicOp, Burst, ReadBeat, RespStatus, WriteBeat, WriteResp,
};
use xbar_engine::engine::Engine;
use xbar_engine::test_helpers::start_test;
use xbar_engine::types::ProtocolChecking;
use xbar_track::Id;

struct Harness {
    engine: Engine,
    demux: Rc<Demux>,
    upstream: BusInitiator,
    lanes: Vec<BusTarget>,
}

fn setup(config: DemuxConfig) -> Harness {
    let engine = start_test(file!());
    let top = engine.top().clone();
    let map = AddressMap::new(
        vec![AddrRule::new(0x0, 0x1000, 0), AddrRule::new(0x1000, 0x2000, 1)],
        2,
    )
    .unwrap();
    let route = RouteSnapshot::new(Rc::new(map), DefaultRoute::disabled());
    let demux = Demux::new_and_register(&engine, &top, "demux", config, route).unwrap();

    let upstream = BusInitiator::new(&engine, &top, "mgr");
    upstream.connect(demux.port_upstream()).unwrap();
    let lanes: Vec<BusTarget> = (0..3)
        .map(|i| BusTarget::new(&engine, &top, format!("sub{i}").as_str()))
        .collect();
    for (i, lane) in lanes.iter().enumerate() {
        demux.connect_port_lane_i(i, lane).unwrap();
    }
    Harness {
        engine,
        demux,
        upstream,
        lanes,
    }
}

fn two_lanes() -> DemuxConfig {
    DemuxConfig {
        num_lanes: 2,
        ..DemuxConfig::default()
    }
}

fn read(tag: u64, id: u32, addr: u64) -> AddrReq {
    AddrReq::new(Id(tag), id, addr, 0, 3, Burst::Incr)
}

fn last_beat(tag: u64, id: u32) -> ReadBeat {
    ReadBeat {
        tag: Id(tag),
        id,
        data: 0,
        status: RespStatus::Okay,
        last: true,
    }
}

/// Offer the requests in order and collect what arrives on each lane's `ar`.
fn drive_reads(h: &Harness, reqs: &[AddrReq], ticks: usize) -> Vec<Vec<AddrReq>> {
    let mut to_send = reqs.iter().cloned();
    let mut next = to_send.next();
    let mut received = vec![Vec::new(); h.lanes.len()];
    for _ in 0..ticks {
        for (i, lane) in h.lanes.iter().enumerate() {
            if let Some(req) = lane.ar.pop() {
                received[i].push(req);
            }
        }
        if next.is_some() && h.upstream.ar.can_push() {
            if let Some(req) = next.take() {
                h.upstream.ar.push(req).unwrap();
            }
            next = to_send.next();
        }
        h.engine.step().unwrap();
    }
    received
}

#[test]
fn routes_by_address() {
    let h = setup(two_lanes());
    let received = drive_reads(&h, &[read(1, 0, 0x10), read(2, 1, 0x1800)], 10);
    assert_eq!(received[0], vec![read(1, 0, 0x10)]);
    assert_eq!(received[1], vec![read(2, 1, 0x1800)]);
    assert!(received[2].is_empty());
    assert_eq!(h.demux.last_ar_decode(), Some(Decode::Rule(1)));
    assert_eq!(h.demux.stats().reads_routed, 2);
}

#[test]
fn miss_goes_to_error_lane() {
    let h = setup(two_lanes());
    let received = drive_reads(&h, &[read(1, 0, 0x8000)], 10);
    assert_eq!(received[h.demux.error_lane_index()], vec![read(1, 0, 0x8000)]);
    assert_eq!(h.demux.last_ar_decode(), Some(Decode::Miss));
    assert_eq!(h.demux.stats().decode_errors, 1);
}

#[test]
fn max_trans_stalls() {
    let h = setup(DemuxConfig {
        max_trans: 2,
        ..two_lanes()
    });
    let reqs = [read(1, 1, 0x10), read(2, 2, 0x20), read(3, 3, 0x30)];
    let received = drive_reads(&h, &reqs, 10);
    assert_eq!(received[0].len(), 2);
    assert_eq!(h.demux.outstanding_reads(), 2);
    assert!(h.demux.stats().stalls > 0);

    // Completing one read lets the third through
    h.lanes[0].r.push(last_beat(10, 1)).unwrap();
    let received = drive_reads(&h, &[], 5);
    assert_eq!(received[0], vec![read(3, 3, 0x30)]);
    assert_eq!(h.upstream.r.pop(), Some(last_beat(10, 1)));
}

#[test]
fn unique_ids_stall_on_same_id() {
    let h = setup(DemuxConfig {
        unique_ids: true,
        ..two_lanes()
    });
    let received = drive_reads(&h, &[read(1, 5, 0x10), read(2, 5, 0x20)], 10);
    assert_eq!(received[0], vec![read(1, 5, 0x10)]);

    h.lanes[0].r.push(last_beat(10, 5)).unwrap();
    let received = drive_reads(&h, &[], 5);
    assert_eq!(received[0], vec![read(2, 5, 0x20)]);
}

#[test]
fn shared_id_same_lane_passes() {
    let h = setup(two_lanes());
    let received = drive_reads(&h, &[read(1, 5, 0x10), read(2, 5, 0x20)], 10);
    assert_eq!(received[0].len(), 2);
}

#[test]
fn shared_id_other_lane_stalls() {
    let h = setup(DemuxConfig {
        id_used_bits: 4,
        ..two_lanes()
    });
    // 0x15 and 0x25 share the low four bits
    let received = drive_reads(&h, &[read(1, 0x15, 0x10), read(2, 0x25, 0x1010)], 10);
    assert_eq!(received[0].len(), 1);
    assert!(received[1].is_empty());

    h.lanes[0].r.push(last_beat(10, 0x15)).unwrap();
    let received = drive_reads(&h, &[], 5);
    assert_eq!(received[1], vec![read(2, 0x25, 0x1010)]);
}

#[test]
fn read_burst_holds_upstream() {
    let h = setup(two_lanes());
    let mut a = read(1, 1, 0x10);
    a.len = 1;
    let mut b = read(2, 2, 0x1010);
    b.len = 1;
    let received = drive_reads(&h, &[a, b], 10);
    assert_eq!(received[0].len(), 1);
    assert_eq!(received[1].len(), 1);

    let beat = |tag: u64, id: u32, last: bool| ReadBeat {
        tag: Id(tag),
        id,
        data: tag,
        status: RespStatus::Okay,
        last,
    };
    h.lanes[0].r.push(beat(10, 1, false)).unwrap();
    h.lanes[1].r.push(beat(20, 2, false)).unwrap();
    h.engine.step().unwrap();
    h.lanes[0].r.push(beat(11, 1, true)).unwrap();
    h.lanes[1].r.push(beat(21, 2, true)).unwrap();

    let mut upstream = Vec::new();
    for _ in 0..10 {
        if let Some(beat) = h.upstream.r.pop() {
            upstream.push(beat.data);
        }
        h.engine.step().unwrap();
    }
    assert_eq!(upstream, vec![10, 11, 20, 21]);
    assert_eq!(h.demux.outstanding_reads(), 0);
}

#[test]
fn write_data_follows_requests() {
    let h = setup(two_lanes());
    let aw0 = AddrReq::new(Id(1), 1, 0x1000, 1, 3, Burst::Incr);
    let aw1 = AddrReq::new(Id(2), 2, 0x0, 0, 3, Burst::Incr);
    let mut aws = vec![aw0, aw1].into_iter();
    let mut beats = vec![
        WriteBeat::new(Id(10), 0xa, false),
        WriteBeat::new(Id(11), 0xb, true),
        WriteBeat::new(Id(12), 0xc, true),
    ]
    .into_iter()
    .peekable();

    let mut w = vec![Vec::new(), Vec::new()];
    let mut aw = vec![Vec::new(), Vec::new()];
    let mut next_aw = aws.next();
    for _ in 0..20 {
        for i in 0..2 {
            if let Some(req) = h.lanes[i].aw.pop() {
                aw[i].push(req.tag);
            }
            if let Some(beat) = h.lanes[i].w.pop() {
                w[i].push(beat.data);
            }
        }
        if next_aw.is_some() && h.upstream.aw.can_push() {
            if let Some(req) = next_aw.take() {
                h.upstream.aw.push(req).unwrap();
            }
            next_aw = aws.next();
        }
        if beats.peek().is_some() && h.upstream.w.can_push() {
            if let Some(beat) = beats.next() {
                h.upstream.w.push(beat).unwrap();
            }
        }
        h.engine.step().unwrap();
    }
    assert_eq!(aw, vec![vec![Id(2)], vec![Id(1)]]);
    assert_eq!(w, vec![vec![0xc], vec![0xa, 0xb]]);
    assert_eq!(h.demux.outstanding_writes(), 2);

    h.lanes[1].b.push(WriteResp {
        tag: Id(30),
        id: 1,
        status: RespStatus::Okay,
    })
    .unwrap();
    h.engine.run_ticks(3).unwrap();
    assert_eq!(h.demux.outstanding_writes(), 1);
    assert_eq!(h.upstream.b.pop().map(|b| b.id), Some(1));
}

#[test]
fn atomics_disabled_go_to_error_lane() {
    let h = setup(two_lanes());
    let req = AddrReq::new(Id(1), 1, 0x10, 0, 3, Burst::Incr).with_atomic(AtomicOp::LoadAdd);
    h.upstream.aw.push(req.clone()).unwrap();
    h.engine.run_ticks(3).unwrap();
    assert!(h.lanes[0].aw.is_empty());
    assert_eq!(h.lanes[2].aw.pop(), Some(req));
}

#[test]
fn atomics_tracked_in_both_directions() {
    let h = setup(DemuxConfig {
        atomics: true,
        ..two_lanes()
    });
    let req = AddrReq::new(Id(1), 1, 0x10, 0, 3, Burst::Incr).with_atomic(AtomicOp::Swap);
    h.upstream.aw.push(req.clone()).unwrap();
    h.engine.run_ticks(3).unwrap();
    assert_eq!(h.lanes[0].aw.pop(), Some(req));
    assert_eq!(h.demux.outstanding_writes(), 1);
    assert_eq!(h.demux.outstanding_reads(), 1);

    h.lanes[0].b.push(WriteResp {
        tag: Id(2),
        id: 1,
        status: RespStatus::Okay,
    })
    .unwrap();
    h.lanes[0].r.push(last_beat(3, 1)).unwrap();
    h.engine.run_ticks(3).unwrap();
    assert_eq!(h.demux.outstanding_writes(), 0);
    assert_eq!(h.demux.outstanding_reads(), 0);
}

/// Leave a read to an unmapped address waiting behind a full transaction
/// budget and then enable a default route.
fn change_route_while_pending(checking: ProtocolChecking) -> (Harness, bool) {
    let h = setup(DemuxConfig {
        max_trans: 1,
        checking,
        ..two_lanes()
    });
    h.upstream.ar.push(read(1, 1, 0x10)).unwrap();
    h.engine.step().unwrap();
    h.upstream.ar.push(read(2, 2, 0x8000)).unwrap();
    h.engine.run_ticks(2).unwrap();
    assert_eq!(h.demux.last_ar_decode(), Some(Decode::Miss));

    let route = h.demux.route().with_default(DefaultRoute::enabled(1));
    h.demux.set_route(route);
    let failed = h.engine.step().is_err();
    (h, failed)
}

#[test]
fn decode_change_while_pending_strict() {
    let (_h, failed) = change_route_while_pending(ProtocolChecking::Strict);
    assert!(failed);
}

#[test]
fn decode_change_while_pending_relaxed() {
    let (h, failed) = change_route_while_pending(ProtocolChecking::Relaxed);
    assert!(!failed);

    // Complete the first read, the pending one keeps its original decision
    assert_eq!(h.lanes[0].ar.pop(), Some(read(1, 1, 0x10)));
    h.lanes[0].r.push(last_beat(10, 1)).unwrap();
    h.engine.run_ticks(4).unwrap();
    assert!(h.lanes[1].ar.is_empty());
    assert_eq!(h.lanes[2].ar.pop(), Some(read(2, 2, 0x8000)));
    h.lanes[2].r.push(last_beat(11, 2)).unwrap();

    // Later requests use the new route
    h.upstream.ar.push(read(3, 3, 0x9000)).unwrap();
    h.engine.run_ticks(4).unwrap();
    assert_eq!(h.lanes[1].ar.pop(), Some(read(3, 3, 0x9000)));
}

#[test]
fn unexpected_response_is_a_violation() {
    let h = setup(two_lanes());
    h.lanes[0]
        .b
        .push(WriteResp {
            tag: Id(1),
            id: 9,
            status: RespStatus::Okay,
        })
        .unwrap();
    h.engine.step().unwrap();
    let result = h.engine.step();
    assert!(result.is_err());
}

#[test]
fn bad_map_size() {
    let engine = start_test(file!());
    let map = AddressMap::new(vec![AddrRule::new(0x0, 0x1000, 0)], 1).unwrap();
    let route = RouteSnapshot::new(Rc::new(map), DefaultRoute::disabled());
    assert!(Demux::new_and_register(&engine, engine.top(), "demux", two_lanes(), route).is_err());
}
