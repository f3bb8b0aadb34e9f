// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Merge a number of lanes onto one egress bus.
//!
//! Requests from the lanes are arbitrated separately for writes and reads.
//! Each granted request has its identifier extended with the lane index:
//!
//! ```text
//!   id_out = (lane << id_width) | id
//! ```
//!
//! so that responses can be returned to the right lane by looking at the top
//! bits and restoring the original identifier. Write data follows granted
//! write requests in order.
//!
//! When `fall_through` is false each granted request spends one tick in an
//! output register before being offered downstream.
//!
//! # Ports
//!
//! This component has:
//!  - `num_lanes` [bus targets](crate::bus::BusTarget): `lane[i]`
//!  - One [bus initiator](crate::bus::BusInitiator): `downstream`

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::traits::Clocked;
use xbar_engine::types::{ProtocolChecking, SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{debug, trace, warn};

use crate::arbiter::{ArbiterPolicy, Arbitrate};
use crate::bus::{BusInitiator, BusTarget};
use crate::types::{AddrReq, mask_id};

#[derive(Clone, Debug, PartialEq)]
pub struct MuxConfig {
    pub num_lanes: usize,

    /// Width of the identifiers arriving on each lane.
    pub id_width: u32,

    /// Maximum outstanding writes across all lanes.
    pub max_w_trans: usize,

    pub fall_through: bool,
    pub aw_policy: ArbiterPolicy,
    pub ar_policy: ArbiterPolicy,
    pub checking: ProtocolChecking,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            num_lanes: 1,
            id_width: 8,
            max_w_trans: 8,
            fall_through: true,
            aw_policy: ArbiterPolicy::default(),
            ar_policy: ArbiterPolicy::default(),
            checking: ProtocolChecking::Strict,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MuxStats {
    pub writes_granted: u64,
    pub reads_granted: u64,

    /// Ticks where a write was waiting but the write budget was used up.
    pub write_budget_stalls: u64,
}

/// A granted request and the lane it came from.
type Granted = (AddrReq, usize);

#[derive(EntityDisplay, EntityGet)]
pub struct Mux {
    pub entity: Rc<Entity>,
    config: MuxConfig,

    lanes: Vec<BusTarget>,
    downstream: BusInitiator,
    tied_off: RefCell<Vec<bool>>,

    aw_arbiter: RefCell<Box<dyn Arbitrate>>,
    ar_arbiter: RefCell<Box<dyn Arbitrate>>,

    aw_reg: RefCell<Option<Granted>>,
    ar_reg: RefCell<Option<Granted>>,
    aw_next: RefCell<Option<Granted>>,
    ar_next: RefCell<Option<Granted>>,

    w_lanes: RefCell<VecDeque<usize>>,
    writes_outstanding: Cell<usize>,

    last_aw_grant: Cell<Option<usize>>,
    last_ar_grant: Cell<Option<usize>>,
    grants: RefCell<Vec<u64>>,
    stats: Cell<MuxStats>,
}

impl Mux {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: MuxConfig,
    ) -> Result<Rc<Self>, SimError> {
        if config.num_lanes == 0 || config.max_w_trans == 0 {
            return sim_error!("{parent}::{name}: num_lanes and max_w_trans must be non-zero");
        }
        let lane_bits = usize::BITS - (config.num_lanes - 1).leading_zeros();
        if config.id_width.saturating_add(lane_bits) > u32::BITS {
            return sim_error!(
                "{parent}::{name}: id_width {} leaves no room for {} lanes",
                config.id_width,
                config.num_lanes
            );
        }

        let entity = Rc::new(Entity::new(parent, name));
        let lanes = (0..config.num_lanes)
            .map(|i| BusTarget::new(engine, &entity, format!("lane{i}").as_str()))
            .collect();
        let downstream = BusInitiator::new(engine, &entity, "downstream");
        let aw_arbiter = config.aw_policy.build(config.num_lanes)?;
        let ar_arbiter = config.ar_policy.build(config.num_lanes)?;
        let rc_self = Rc::new(Self {
            lanes,
            downstream,
            tied_off: RefCell::new(vec![false; config.num_lanes]),
            aw_arbiter: RefCell::new(aw_arbiter),
            ar_arbiter: RefCell::new(ar_arbiter),
            aw_reg: RefCell::new(None),
            ar_reg: RefCell::new(None),
            aw_next: RefCell::new(None),
            ar_next: RefCell::new(None),
            w_lanes: RefCell::new(VecDeque::new()),
            writes_outstanding: Cell::new(0),
            last_aw_grant: Cell::new(None),
            last_ar_grant: Cell::new(None),
            grants: RefCell::new(vec![0; config.num_lanes]),
            stats: Cell::new(MuxStats::default()),
            config,
            entity,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_lane_i(&self, i: usize) -> &BusTarget {
        &self.lanes[i]
    }

    pub fn connect_port_downstream(&self, target: &BusTarget) -> SimResult {
        self.downstream.connect(target)
    }

    #[must_use]
    pub fn downstream(&self) -> &BusInitiator {
        &self.downstream
    }

    /// Mark a lane that is never connected. Any response addressed to it is a
    /// protocol violation.
    pub fn tie_off_lane(&self, i: usize) -> SimResult {
        match self.tied_off.borrow_mut().get_mut(i) {
            Some(tied_off) => {
                debug!(self.entity ; "tie off lane {i}");
                *tied_off = true;
                Ok(())
            }
            None => sim_error!("{}: no lane {i}", self.entity),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    #[must_use]
    pub fn last_aw_grant(&self) -> Option<usize> {
        self.last_aw_grant.get()
    }

    #[must_use]
    pub fn last_ar_grant(&self) -> Option<usize> {
        self.last_ar_grant.get()
    }

    /// Requests (writes and reads) granted to lane `i`.
    #[must_use]
    pub fn grants(&self, i: usize) -> u64 {
        self.grants.borrow()[i]
    }

    #[must_use]
    pub fn outstanding_writes(&self) -> usize {
        self.writes_outstanding.get()
    }

    #[must_use]
    pub fn stats(&self) -> MuxStats {
        self.stats.get()
    }

    fn update_stats(&self, f: impl FnOnce(&mut MuxStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn lane_of(&self, id: u32) -> Option<usize> {
        let lane = id.checked_shr(self.config.id_width).unwrap_or(0) as usize;
        let tied_off = self.tied_off.borrow();
        match tied_off.get(lane) {
            Some(false) => Some(lane),
            _ => None,
        }
    }

    fn extend_id(&self, mut req: AddrReq, lane: usize) -> Result<AddrReq, SimError> {
        let id_width = self.config.id_width;
        if mask_id(req.id, id_width) != req.id {
            self.config.checking.violation(
                &self.entity,
                format_args!("{req} on lane {lane} is wider than {id_width} bits"),
            )?;
        }
        let lane_id = (lane as u32).checked_shl(id_width).unwrap_or(0);
        req.id = lane_id | mask_id(req.id, id_width);
        Ok(req)
    }

    /// Pick a lane offering a request on the channel selected by `pending`.
    fn grant(
        &self,
        arbiter: &RefCell<Box<dyn Arbitrate>>,
        pending: impl Fn(&BusTarget) -> bool,
    ) -> Option<usize> {
        let requests: Vec<bool> = {
            let tied_off = self.tied_off.borrow();
            self.lanes
                .iter()
                .zip(tied_off.iter())
                .map(|(lane, tied_off)| !tied_off && pending(lane))
                .collect()
        };
        arbiter.borrow_mut().arbitrate(&self.entity, &requests)
    }

    fn send_aw(&self, req: AddrReq, lane: usize) -> SimResult {
        trace!(self.entity ; "aw {req} from lane {lane}");
        self.w_lanes.borrow_mut().push_back(lane);
        self.downstream.aw.push(req)
    }

    fn send_ar(&self, req: AddrReq, lane: usize) -> SimResult {
        trace!(self.entity ; "ar {req} from lane {lane}");
        self.downstream.ar.push(req)
    }

    /// Grant a write if allowed, returning the extended request.
    fn take_aw(&self) -> Result<Option<Granted>, SimError> {
        if self.writes_outstanding.get() >= self.config.max_w_trans {
            if self.lanes.iter().any(|l| l.aw.is_pending()) {
                self.update_stats(|s| s.write_budget_stalls += 1);
            }
            return Ok(None);
        }
        let Some(lane) = self.grant(&self.aw_arbiter, |l| l.aw.is_pending()) else {
            return Ok(None);
        };
        let Some(req) = self.lanes[lane].aw.pop() else {
            return Ok(None);
        };
        let req = self.extend_id(req, lane)?;
        self.writes_outstanding.set(self.writes_outstanding.get() + 1);
        self.last_aw_grant.set(Some(lane));
        self.grants.borrow_mut()[lane] += 1;
        self.update_stats(|s| s.writes_granted += 1);
        Ok(Some((req, lane)))
    }

    fn take_ar(&self) -> Result<Option<Granted>, SimError> {
        let Some(lane) = self.grant(&self.ar_arbiter, |l| l.ar.is_pending()) else {
            return Ok(None);
        };
        let Some(req) = self.lanes[lane].ar.pop() else {
            return Ok(None);
        };
        let req = self.extend_id(req, lane)?;
        self.last_ar_grant.set(Some(lane));
        self.grants.borrow_mut()[lane] += 1;
        self.update_stats(|s| s.reads_granted += 1);
        Ok(Some((req, lane)))
    }

    fn forward_aw(&self) -> SimResult {
        if self.config.fall_through {
            if self.downstream.aw.can_push() {
                if let Some((req, lane)) = self.take_aw()? {
                    self.send_aw(req, lane)?;
                }
            }
            return Ok(());
        }

        let mut reg = self.aw_reg.borrow_mut();
        if reg.is_some() && self.downstream.aw.can_push() {
            if let Some((req, lane)) = reg.take() {
                self.send_aw(req, lane)?;
            }
        }
        if reg.is_none() {
            *self.aw_next.borrow_mut() = self.take_aw()?;
        }
        Ok(())
    }

    fn forward_ar(&self) -> SimResult {
        if self.config.fall_through {
            if self.downstream.ar.can_push() {
                if let Some((req, lane)) = self.take_ar()? {
                    self.send_ar(req, lane)?;
                }
            }
            return Ok(());
        }

        let mut reg = self.ar_reg.borrow_mut();
        if reg.is_some() && self.downstream.ar.can_push() {
            if let Some((req, lane)) = reg.take() {
                self.send_ar(req, lane)?;
            }
        }
        if reg.is_none() {
            *self.ar_next.borrow_mut() = self.take_ar()?;
        }
        Ok(())
    }

    fn forward_w(&self) -> SimResult {
        let Some(lane) = self.w_lanes.borrow().front().copied() else {
            return Ok(());
        };
        if !self.downstream.w.can_push() {
            return Ok(());
        }
        let Some(beat) = self.lanes[lane].w.pop() else {
            return Ok(());
        };
        if beat.last {
            self.w_lanes.borrow_mut().pop_front();
        }
        self.downstream.w.push(beat)
    }

    fn return_b(&self) -> SimResult {
        let Some(resp) = self.downstream.b.peek() else {
            return Ok(());
        };
        let Some(lane) = self.lane_of(resp.id) else {
            self.config.checking.violation(
                &self.entity,
                format_args!("write response {resp} maps to no lane"),
            )?;
            warn!(self.entity ; "dropping {resp}");
            self.downstream.b.pop();
            return Ok(());
        };
        if !self.lanes[lane].b.can_push() {
            return Ok(());
        }

        self.downstream.b.pop();
        let mut resp = resp;
        resp.id = mask_id(resp.id, self.config.id_width);
        match self.writes_outstanding.get().checked_sub(1) {
            Some(outstanding) => self.writes_outstanding.set(outstanding),
            None => self.config.checking.violation(
                &self.entity,
                format_args!("write response {resp} with no write outstanding"),
            )?,
        }
        self.lanes[lane].b.push(resp)
    }

    fn return_r(&self) -> SimResult {
        let Some(beat) = self.downstream.r.peek() else {
            return Ok(());
        };
        let Some(lane) = self.lane_of(beat.id) else {
            self.config.checking.violation(
                &self.entity,
                format_args!("read data {beat} maps to no lane"),
            )?;
            warn!(self.entity ; "dropping {beat}");
            self.downstream.r.pop();
            return Ok(());
        };
        if !self.lanes[lane].r.can_push() {
            return Ok(());
        }

        self.downstream.r.pop();
        let mut beat = beat;
        beat.id = mask_id(beat.id, self.config.id_width);
        self.lanes[lane].r.push(beat)
    }
}

impl Clocked for Mux {
    fn evaluate(&self, _tick: u64) -> SimResult {
        self.return_b()?;
        self.return_r()?;
        self.forward_w()?;
        self.forward_aw()?;
        self.forward_ar()
    }

    fn commit(&self) {
        if let Some(granted) = self.aw_next.borrow_mut().take() {
            *self.aw_reg.borrow_mut() = Some(granted);
        }
        if let Some(granted) = self.ar_next.borrow_mut().take() {
            *self.ar_reg.borrow_mut() = Some(granted);
        }
    }
}
