// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Fan one ingress bus out to a number of lanes.
//!
//! Each request is decoded against the current [`RouteSnapshot`] and sent to
//! exactly one of `num_lanes + 1` lanes. The extra lane (the last one) is the
//! error lane which receives requests whose address does not decode.
//!
//! # Ordering
//!
//! Requests are tracked per direction in an [`IdTable`] keyed by the low
//! `id_used_bits` bits of the identifier:
//!
//!  - with `unique_ids` set, a request stalls while any request with the same
//!    key is outstanding,
//!  - otherwise requests may share a key as long as they go to the same lane.
//!
//! Write data follows the order of the write requests. A read burst owns the
//! upstream `r` channel until its last beat has been returned.
//!
//! # Ports
//!
//! This component has:
//!  - One [bus target](crate::bus::BusTarget): `upstream`
//!  - `num_lanes + 1` [bus initiators](crate::bus::BusInitiator): `lane[i]`

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::traits::Clocked;
use xbar_engine::types::{ProtocolChecking, SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{Id, debug, trace};

use crate::arbiter::Arbitrate;
use crate::arbiter::policy::RoundRobin;
use crate::bus::{BusInitiator, BusTarget};
use crate::decoder::{Decode, RouteSnapshot};
use crate::types::{AddrReq, mask_id};

/// Parameters of a [`Demux`].
#[derive(Clone, Debug, PartialEq)]
pub struct DemuxConfig {
    /// Number of lanes excluding the error lane.
    pub num_lanes: usize,

    /// Maximum outstanding requests per direction.
    pub max_trans: usize,

    pub unique_ids: bool,

    /// Number of low identifier bits that define an ordering group.
    pub id_used_bits: u32,

    /// Forward atomic writes. When false they are sent to the error lane.
    pub atomics: bool,

    pub checking: ProtocolChecking,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            num_lanes: 1,
            max_trans: 8,
            unique_ids: false,
            id_used_bits: u32::BITS,
            atomics: false,
            checking: ProtocolChecking::Strict,
        }
    }
}

struct IdEntry {
    lane: usize,
    count: usize,
}

/// Outstanding transactions of one direction.
pub struct IdTable {
    entries: HashMap<u32, IdEntry>,
    outstanding: usize,
    id_used_bits: u32,
}

impl IdTable {
    #[must_use]
    pub fn new(id_used_bits: u32) -> Self {
        Self {
            entries: HashMap::new(),
            outstanding: 0,
            id_used_bits,
        }
    }

    fn key(&self, id: u32) -> u32 {
        mask_id(id, self.id_used_bits)
    }

    /// Can a request with `id` be sent to `lane` without breaking ordering?
    #[must_use]
    pub fn can_accept(&self, id: u32, lane: usize, unique_ids: bool, max_trans: usize) -> bool {
        if self.outstanding >= max_trans {
            return false;
        }
        match self.entries.get(&self.key(id)) {
            None => true,
            Some(entry) => !unique_ids && entry.lane == lane,
        }
    }

    pub fn insert(&mut self, id: u32, lane: usize) {
        let key = self.key(id);
        self.entries
            .entry(key)
            .and_modify(|e| e.count += 1)
            .or_insert(IdEntry { lane, count: 1 });
        self.outstanding += 1;
    }

    /// Remove one outstanding request with `id` and return its lane.
    pub fn retire(&mut self, id: u32) -> Option<usize> {
        let key = self.key(id);
        let entry = self.entries.get_mut(&key)?;
        let lane = entry.lane;
        entry.count -= 1;
        if entry.count == 0 {
            self.entries.remove(&key);
        }
        self.outstanding -= 1;
        Some(lane)
    }

    #[must_use]
    pub fn lane_of(&self, id: u32) -> Option<usize> {
        self.entries.get(&self.key(id)).map(|e| e.lane)
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

/// Routing decision taken when a request first reaches the head of its
/// channel.
struct PendingDecision {
    tag: Id,
    lane: usize,
    decode: Decode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DemuxStats {
    pub writes_routed: u64,
    pub reads_routed: u64,
    pub decode_errors: u64,
    pub stalls: u64,
}

#[derive(EntityDisplay, EntityGet)]
pub struct Demux {
    pub entity: Rc<Entity>,
    config: DemuxConfig,

    upstream: BusTarget,
    lanes: Vec<BusInitiator>,

    route: RefCell<RouteSnapshot>,

    write_table: RefCell<IdTable>,
    read_table: RefCell<IdTable>,
    w_lanes: RefCell<VecDeque<usize>>,

    pending_aw: RefCell<Option<PendingDecision>>,
    pending_ar: RefCell<Option<PendingDecision>>,
    last_aw_decode: Cell<Option<Decode>>,
    last_ar_decode: Cell<Option<Decode>>,

    b_policy: RefCell<RoundRobin>,
    r_policy: RefCell<RoundRobin>,
    r_owner: Cell<Option<usize>>,

    stats: Cell<DemuxStats>,
}

impl Demux {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: DemuxConfig,
        route: RouteSnapshot,
    ) -> Result<Rc<Self>, SimError> {
        if config.num_lanes == 0 || config.max_trans == 0 {
            return sim_error!("{parent}::{name}: num_lanes and max_trans must be non-zero");
        }
        if route.map.num_targets() != config.num_lanes {
            return sim_error!(
                "{parent}::{name}: address map has {} targets, expected {}",
                route.map.num_targets(),
                config.num_lanes
            );
        }

        let entity = Rc::new(Entity::new(parent, name));
        let upstream = BusTarget::new(engine, &entity, "upstream");
        let lanes = (0..=config.num_lanes)
            .map(|i| BusInitiator::new(engine, &entity, format!("lane{i}").as_str()))
            .collect();
        let rc_self = Rc::new(Self {
            upstream,
            lanes,
            route: RefCell::new(route),
            write_table: RefCell::new(IdTable::new(config.id_used_bits)),
            read_table: RefCell::new(IdTable::new(config.id_used_bits)),
            w_lanes: RefCell::new(VecDeque::new()),
            pending_aw: RefCell::new(None),
            pending_ar: RefCell::new(None),
            last_aw_decode: Cell::new(None),
            last_ar_decode: Cell::new(None),
            b_policy: RefCell::new(RoundRobin::new()),
            r_policy: RefCell::new(RoundRobin::new()),
            r_owner: Cell::new(None),
            stats: Cell::new(DemuxStats::default()),
            config,
            entity,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_upstream(&self) -> &BusTarget {
        &self.upstream
    }

    /// Connect lane `i` to a target. Lane `num_lanes` is the error lane.
    pub fn connect_port_lane_i(&self, i: usize, target: &BusTarget) -> SimResult {
        match self.lanes.get(i) {
            Some(lane) => lane.connect(target),
            None => sim_error!("{}: no lane {i}", self.entity),
        }
    }

    #[must_use]
    pub fn lane_i(&self, i: usize) -> &BusInitiator {
        &self.lanes[i]
    }

    #[must_use]
    pub fn error_lane_index(&self) -> usize {
        self.config.num_lanes
    }

    #[must_use]
    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    /// Install a new routing snapshot.
    pub fn set_route(&self, route: RouteSnapshot) {
        debug!(self.entity ; "new route, default {:?}", route.default);
        *self.route.borrow_mut() = route;
    }

    #[must_use]
    pub fn route(&self) -> RouteSnapshot {
        self.route.borrow().clone()
    }

    /// Decode recorded for the most recent write request at the head.
    #[must_use]
    pub fn last_aw_decode(&self) -> Option<Decode> {
        self.last_aw_decode.get()
    }

    /// Decode recorded for the most recent read request at the head.
    #[must_use]
    pub fn last_ar_decode(&self) -> Option<Decode> {
        self.last_ar_decode.get()
    }

    #[must_use]
    pub fn outstanding_writes(&self) -> usize {
        self.write_table.borrow().outstanding()
    }

    #[must_use]
    pub fn outstanding_reads(&self) -> usize {
        self.read_table.borrow().outstanding()
    }

    #[must_use]
    pub fn stats(&self) -> DemuxStats {
        self.stats.get()
    }

    fn update_stats(&self, f: impl FnOnce(&mut DemuxStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Return the lane for the request at the head of a channel.
    ///
    /// The decision made when the request first reached the head is kept for
    /// as long as the request is waiting. A different decode while waiting is
    /// a protocol violation.
    fn select_lane(
        &self,
        pending: &RefCell<Option<PendingDecision>>,
        last_decode: &Cell<Option<Decode>>,
        req: &AddrReq,
    ) -> Result<usize, SimError> {
        let decode = self.route.borrow().decode(req.addr);
        let mut pending = pending.borrow_mut();
        if let Some(decision) = pending.as_mut().filter(|d| d.tag == req.tag) {
            if decision.decode != decode {
                self.config.checking.violation(
                    &self.entity,
                    format_args!(
                        "decode of pending {req} changed from '{}' to '{decode}'",
                        decision.decode
                    ),
                )?;
                decision.decode = decode;
            }
            return Ok(decision.lane);
        }

        let lane = if req.atomic.is_some() && !self.config.atomics {
            self.error_lane_index()
        } else {
            decode.target().unwrap_or(self.error_lane_index())
        };
        trace!(self.entity ; "{req}: {decode}, lane {lane}");
        last_decode.set(Some(decode));
        *pending = Some(PendingDecision {
            tag: req.tag,
            lane,
            decode,
        });
        Ok(lane)
    }

    fn retire(&self, table: &RefCell<IdTable>, id: u32, lane: usize, kind: &str) -> SimResult {
        let retired = table.borrow_mut().retire(id);
        match retired {
            Some(l) if l == lane => Ok(()),
            Some(l) => self.config.checking.violation(
                &self.entity,
                format_args!("{kind} response id {id:#x} on lane {lane}, request went to lane {l}"),
            ),
            None => self.config.checking.violation(
                &self.entity,
                format_args!("{kind} response id {id:#x} on lane {lane} has no request"),
            ),
        }
    }

    fn route_b(&self) -> SimResult {
        if !self.upstream.b.can_push() {
            return Ok(());
        }
        let requests: Vec<bool> = self.lanes.iter().map(|l| l.b.is_pending()).collect();
        let Some(lane) = self.b_policy.borrow_mut().arbitrate(&self.entity, &requests) else {
            return Ok(());
        };
        let Some(resp) = self.lanes[lane].b.pop() else {
            return Ok(());
        };
        self.retire(&self.write_table, resp.id, lane, "write")?;
        self.upstream.b.push(resp)
    }

    fn route_r(&self) -> SimResult {
        if !self.upstream.r.can_push() {
            return Ok(());
        }
        let lane = match self.r_owner.get() {
            Some(lane) => lane,
            None => {
                let requests: Vec<bool> = self.lanes.iter().map(|l| l.r.is_pending()).collect();
                match self.r_policy.borrow_mut().arbitrate(&self.entity, &requests) {
                    Some(lane) => lane,
                    None => return Ok(()),
                }
            }
        };
        let Some(beat) = self.lanes[lane].r.pop() else {
            return Ok(());
        };
        if beat.last {
            self.r_owner.set(None);
            self.retire(&self.read_table, beat.id, lane, "read")?;
        } else {
            self.r_owner.set(Some(lane));
        }
        self.upstream.r.push(beat)
    }

    fn route_w(&self) -> SimResult {
        let Some(lane) = self.w_lanes.borrow().front().copied() else {
            return Ok(());
        };
        if !self.lanes[lane].w.can_push() {
            return Ok(());
        }
        let Some(beat) = self.upstream.w.pop() else {
            return Ok(());
        };
        if beat.last {
            self.w_lanes.borrow_mut().pop_front();
        }
        self.lanes[lane].w.push(beat)
    }

    fn route_aw(&self) -> SimResult {
        let Some(req) = self.upstream.aw.peek() else {
            return Ok(());
        };
        let lane = self.select_lane(&self.pending_aw, &self.last_aw_decode, &req)?;

        let needs_read = req.expects_read_data();
        let unique_ids = self.config.unique_ids;
        let max_trans = self.config.max_trans;
        let write_ok = self
            .write_table
            .borrow()
            .can_accept(req.id, lane, unique_ids, max_trans);
        let read_ok = !needs_read
            || self
                .read_table
                .borrow()
                .can_accept(req.id, lane, unique_ids, max_trans);
        if !(write_ok && read_ok && self.lanes[lane].aw.can_push()) {
            self.update_stats(|s| s.stalls += 1);
            return Ok(());
        }

        self.upstream.aw.pop();
        self.write_table.borrow_mut().insert(req.id, lane);
        if needs_read {
            self.read_table.borrow_mut().insert(req.id, lane);
        }
        self.w_lanes.borrow_mut().push_back(lane);
        *self.pending_aw.borrow_mut() = None;

        let is_error = lane == self.error_lane_index();
        self.update_stats(|s| {
            s.writes_routed += 1;
            if is_error {
                s.decode_errors += 1;
            }
        });
        self.lanes[lane].aw.push(req)
    }

    fn route_ar(&self) -> SimResult {
        let Some(req) = self.upstream.ar.peek() else {
            return Ok(());
        };
        let lane = self.select_lane(&self.pending_ar, &self.last_ar_decode, &req)?;

        let can_accept = self.read_table.borrow().can_accept(
            req.id,
            lane,
            self.config.unique_ids,
            self.config.max_trans,
        );
        if !(can_accept && self.lanes[lane].ar.can_push()) {
            self.update_stats(|s| s.stalls += 1);
            return Ok(());
        }

        self.upstream.ar.pop();
        self.read_table.borrow_mut().insert(req.id, lane);
        *self.pending_ar.borrow_mut() = None;

        let is_error = lane == self.error_lane_index();
        self.update_stats(|s| {
            s.reads_routed += 1;
            if is_error {
                s.decode_errors += 1;
            }
        });
        self.lanes[lane].ar.push(req)
    }
}

impl Clocked for Demux {
    fn evaluate(&self, _tick: u64) -> SimResult {
        self.route_b()?;
        self.route_r()?;
        self.route_w()?;
        self.route_aw()?;
        self.route_ar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_ids_same_lane() {
        let mut table = IdTable::new(4);
        assert!(table.can_accept(0x3, 1, false, 4));
        table.insert(0x3, 1);
        assert!(table.can_accept(0x3, 1, false, 4));
        assert!(!table.can_accept(0x3, 2, false, 4));

        // 0x13 shares the low 4 bits with 0x3
        assert!(!table.can_accept(0x13, 2, false, 4));
        assert!(table.can_accept(0x4, 2, false, 4));
    }

    #[test]
    fn unique_ids() {
        let mut table = IdTable::new(32);
        table.insert(7, 0);
        assert!(!table.can_accept(7, 0, true, 4));
        assert!(table.can_accept(8, 1, true, 4));
        assert_eq!(table.retire(7), Some(0));
        assert!(table.can_accept(7, 1, true, 4));
    }

    #[test]
    fn max_trans() {
        let mut table = IdTable::new(32);
        table.insert(1, 0);
        table.insert(2, 0);
        assert!(!table.can_accept(3, 0, false, 2));
        assert_eq!(table.outstanding(), 2);
    }

    #[test]
    fn retire_counts() {
        let mut table = IdTable::new(32);
        table.insert(5, 2);
        table.insert(5, 2);
        assert_eq!(table.retire(5), Some(2));
        assert_eq!(table.lane_of(5), Some(2));
        assert_eq!(table.retire(5), Some(2));
        assert_eq!(table.lane_of(5), None);
        assert_eq!(table.retire(5), None);
    }
}
