// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A sink that answers every request with a decode error.
//!
//! The responder terminates requests that have no valid destination: addresses
//! that match no routing rule and ingress/egress pairs that are disabled.
//!
//!  - A write is accepted, its write data is consumed up to the beat marked
//!    `last` and then a single `DecodeError` write response is returned.
//!  - A read returns `len + 1` zero-filled `DecodeError` beats, `last` on the
//!    final one.
//!  - An atomic write that expects read data also returns a single
//!    `DecodeError` read beat.
//!
//! At most `max_trans` requests per direction are outstanding. Responses are
//! never sent in the same tick that the request arrives.
//!
//! # Ports
//!
//! This component has one [bus target](crate::bus::BusTarget): `bus`

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::traits::Clocked;
use xbar_engine::types::{SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{create_id, debug, trace};

use crate::bus::BusTarget;
use crate::types::{AddrReq, ReadBeat, RespStatus, WriteResp};

struct ReadInFlight {
    id: u32,
    beats_left: usize,
}

#[derive(EntityDisplay, EntityGet)]
pub struct ErrorResponder {
    pub entity: Rc<Entity>,
    bus: BusTarget,
    max_trans: usize,

    awaiting_data: RefCell<VecDeque<AddrReq>>,
    write_resps: RefCell<VecDeque<WriteResp>>,
    reads: RefCell<VecDeque<ReadInFlight>>,

    writes_outstanding: Cell<usize>,
    reads_outstanding: Cell<usize>,
    num_responses: Cell<usize>,
}

impl ErrorResponder {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        max_trans: usize,
    ) -> Result<Rc<Self>, SimError> {
        if max_trans == 0 {
            return sim_error!("{parent}::{name}: max_trans must be non-zero");
        }
        let entity = Rc::new(Entity::new(parent, name));
        let bus = BusTarget::new(engine, &entity, "bus");
        let rc_self = Rc::new(Self {
            entity,
            bus,
            max_trans,
            awaiting_data: RefCell::new(VecDeque::new()),
            write_resps: RefCell::new(VecDeque::new()),
            reads: RefCell::new(VecDeque::new()),
            writes_outstanding: Cell::new(0),
            reads_outstanding: Cell::new(0),
            num_responses: Cell::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_bus(&self) -> &BusTarget {
        &self.bus
    }

    /// Requests accepted whose responses are not complete, per direction.
    #[must_use]
    pub fn outstanding(&self) -> (usize, usize) {
        (self.writes_outstanding.get(), self.reads_outstanding.get())
    }

    /// Number of completed error responses (write responses plus read bursts).
    #[must_use]
    pub fn num_responses(&self) -> usize {
        self.num_responses.get()
    }

    fn drive_b(&self) -> SimResult {
        if !self.bus.b.can_push() {
            return Ok(());
        }
        if let Some(resp) = self.write_resps.borrow_mut().pop_front() {
            trace!(self.entity ; "b {}", resp);
            self.bus.b.push(resp)?;
            self.writes_outstanding.set(self.writes_outstanding.get() - 1);
            self.num_responses.set(self.num_responses.get() + 1);
        }
        Ok(())
    }

    fn drive_r(&self) -> SimResult {
        if !self.bus.r.can_push() {
            return Ok(());
        }
        let mut reads = self.reads.borrow_mut();
        let Some(read) = reads.front_mut() else {
            return Ok(());
        };

        read.beats_left -= 1;
        let last = read.beats_left == 0;
        let beat = ReadBeat {
            tag: create_id!(self.entity),
            id: read.id,
            data: 0,
            status: RespStatus::DecodeError,
            last,
        };
        trace!(self.entity ; "r {}", beat);
        self.bus.r.push(beat)?;

        if last {
            reads.pop_front();
            self.reads_outstanding.set(self.reads_outstanding.get() - 1);
            self.num_responses.set(self.num_responses.get() + 1);
        }
        Ok(())
    }

    fn accept_w(&self) {
        let mut awaiting_data = self.awaiting_data.borrow_mut();
        let Some(req) = awaiting_data.front() else {
            return;
        };
        let Some(beat) = self.bus.w.pop() else {
            return;
        };
        if !beat.last {
            return;
        }

        self.write_resps.borrow_mut().push_back(WriteResp {
            tag: create_id!(self.entity),
            id: req.id,
            status: RespStatus::DecodeError,
        });
        if req.expects_read_data() {
            self.reads.borrow_mut().push_back(ReadInFlight {
                id: req.id,
                beats_left: 1,
            });
        }
        awaiting_data.pop_front();
    }

    fn accept_aw(&self) {
        let Some(req) = self.bus.aw.peek() else {
            return;
        };
        if self.writes_outstanding.get() >= self.max_trans {
            return;
        }
        let needs_read = req.expects_read_data();
        if needs_read && self.reads_outstanding.get() >= self.max_trans {
            return;
        }

        self.bus.aw.pop();
        debug!(self.entity ; "decode error for write {}", req);
        self.writes_outstanding.set(self.writes_outstanding.get() + 1);
        if needs_read {
            self.reads_outstanding.set(self.reads_outstanding.get() + 1);
        }
        self.awaiting_data.borrow_mut().push_back(req);
    }

    fn accept_ar(&self) {
        if self.reads_outstanding.get() >= self.max_trans {
            return;
        }
        if let Some(req) = self.bus.ar.pop() {
            debug!(self.entity ; "decode error for read {}", req);
            self.reads_outstanding.set(self.reads_outstanding.get() + 1);
            self.reads.borrow_mut().push_back(ReadInFlight {
                id: req.id,
                beats_left: req.num_beats(),
            });
        }
    }
}

impl Clocked for ErrorResponder {
    fn evaluate(&self, _tick: u64) -> SimResult {
        self.drive_b()?;
        self.drive_r()?;
        self.accept_w();
        self.accept_aw();
        self.accept_ar();
        Ok(())
    }
}
