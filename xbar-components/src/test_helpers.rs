// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Traffic generation and memory models used to exercise bus components.
//!
//! A [`Manager`] issues a scripted list of [`Transaction`]s on a bus and
//! records a [`Completion`] for each one. A [`Memory`] answers requests from
//! a sparse byte store after a configurable latency.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::traits::Clocked;
use xbar_engine::types::{SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{create_id, debug, trace};

use crate::bus::{BusInitiator, BusTarget};
use crate::types::{
    AddrReq, AtomicOp, Burst, ReadBeat, RespStatus, WriteBeat, WriteResp,
};

/// One request to be issued by a [`Manager`].
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub is_write: bool,
    pub id: u32,
    pub addr: u64,
    pub len: u8,
    pub size: u8,
    pub burst: Burst,
    pub atomic: Option<AtomicOp>,

    /// Write data, one entry per beat.
    pub data: Vec<u64>,
}

impl Transaction {
    /// A write of `data.len()` beats. `data` must not be empty.
    #[must_use]
    pub fn write(id: u32, addr: u64, size: u8, burst: Burst, data: Vec<u64>) -> Self {
        Self {
            is_write: true,
            id,
            addr,
            len: (data.len() - 1) as u8,
            size,
            burst,
            atomic: None,
            data,
        }
    }

    #[must_use]
    pub fn read(id: u32, addr: u64, len: u8, size: u8, burst: Burst) -> Self {
        Self {
            is_write: false,
            id,
            addr,
            len,
            size,
            burst,
            atomic: None,
            data: Vec::new(),
        }
    }

    /// A single-beat atomic write.
    #[must_use]
    pub fn atomic(id: u32, addr: u64, size: u8, op: AtomicOp, operand: u64) -> Self {
        let mut txn = Self::write(id, addr, size, Burst::Incr, vec![operand]);
        txn.atomic = Some(op);
        txn
    }

    fn expects_read_data(&self) -> bool {
        self.atomic.is_some_and(|op| op.expects_read_data())
    }
}

/// The outcome of a [`Transaction`].
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    /// Position of the transaction in the script.
    pub index: usize,
    pub is_write: bool,
    pub id: u32,

    /// Write response status, or the worst status of the read data.
    pub status: RespStatus,

    /// Read data (also returned by atomics that load).
    pub data: Vec<u64>,

    pub issued: u64,
    pub completed: u64,
}

impl Completion {
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.completed - self.issued
    }
}

fn worst(a: RespStatus, b: RespStatus) -> RespStatus {
    match (a, b) {
        (RespStatus::DecodeError, _) | (_, RespStatus::DecodeError) => RespStatus::DecodeError,
        (RespStatus::SlaveError, _) | (_, RespStatus::SlaveError) => RespStatus::SlaveError,
        _ => RespStatus::Okay,
    }
}

struct InFlight {
    completion: Completion,
    awaiting_b: bool,
    awaiting_r: bool,
}

#[derive(EntityDisplay, EntityGet)]
pub struct Manager {
    pub entity: Rc<Entity>,
    bus: BusInitiator,
    max_outstanding: usize,

    script: RefCell<VecDeque<(usize, Transaction)>>,
    w_beats: RefCell<VecDeque<WriteBeat>>,

    in_flight: RefCell<HashMap<usize, InFlight>>,
    b_order: RefCell<HashMap<u32, VecDeque<usize>>>,
    r_order: RefCell<HashMap<u32, VecDeque<usize>>>,

    completions: RefCell<Vec<Completion>>,
    tick: Cell<u64>,
}

impl Manager {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        script: Vec<Transaction>,
        max_outstanding: usize,
    ) -> Result<Rc<Self>, SimError> {
        if max_outstanding == 0 {
            return sim_error!("{parent}::{name}: max_outstanding must be non-zero");
        }
        if let Some(txn) = script
            .iter()
            .find(|t| t.is_write && t.data.len() != usize::from(t.len) + 1)
        {
            return sim_error!("{parent}::{name}: {txn:?} has the wrong number of beats");
        }
        let entity = Rc::new(Entity::new(parent, name));
        let bus = BusInitiator::new(engine, &entity, "bus");
        let rc_self = Rc::new(Self {
            entity,
            bus,
            max_outstanding,
            script: RefCell::new(script.into_iter().enumerate().collect()),
            w_beats: RefCell::new(VecDeque::new()),
            in_flight: RefCell::new(HashMap::new()),
            b_order: RefCell::new(HashMap::new()),
            r_order: RefCell::new(HashMap::new()),
            completions: RefCell::new(Vec::new()),
            tick: Cell::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_bus(&self, target: &BusTarget) -> SimResult {
        self.bus.connect(target)
    }

    /// True once every transaction has been issued and completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.script.borrow().is_empty() && self.in_flight.borrow().is_empty()
    }

    #[must_use]
    pub fn num_completed(&self) -> usize {
        self.completions.borrow().len()
    }

    /// Completions in the order they finished.
    #[must_use]
    pub fn completions(&self) -> Vec<Completion> {
        self.completions.borrow().clone()
    }

    /// Completions sorted by script position.
    #[must_use]
    pub fn completions_by_index(&self) -> Vec<Completion> {
        let mut completions = self.completions();
        completions.sort_by_key(|c| c.index);
        completions
    }

    fn finish(&self, index: usize) {
        let mut in_flight = self.in_flight.borrow_mut();
        let done = in_flight
            .get(&index)
            .is_some_and(|f| !f.awaiting_b && !f.awaiting_r);
        if !done {
            return;
        }
        if let Some(mut flight) = in_flight.remove(&index) {
            flight.completion.completed = self.tick.get();
            trace!(self.entity ; "completed {:?}", flight.completion);
            self.completions.borrow_mut().push(flight.completion);
        }
    }

    fn next_for(&self, order: &RefCell<HashMap<u32, VecDeque<usize>>>, id: u32, channel: &str) -> Result<usize, SimError> {
        match order.borrow().get(&id).and_then(|q| q.front().copied()) {
            Some(index) => Ok(index),
            None => sim_error!("{}: unexpected {channel} response with id {id:#x}", self.entity),
        }
    }

    fn receive_b(&self) -> SimResult {
        let Some(resp) = self.bus.b.pop() else {
            return Ok(());
        };
        let index = self.next_for(&self.b_order, resp.id, "b")?;
        if let Some(q) = self.b_order.borrow_mut().get_mut(&resp.id) {
            q.pop_front();
        }
        if let Some(flight) = self.in_flight.borrow_mut().get_mut(&index) {
            flight.awaiting_b = false;
            flight.completion.status = worst(flight.completion.status, resp.status);
        }
        self.finish(index);
        Ok(())
    }

    fn receive_r(&self) -> SimResult {
        let Some(beat) = self.bus.r.pop() else {
            return Ok(());
        };
        let index = self.next_for(&self.r_order, beat.id, "r")?;
        if beat.last {
            if let Some(q) = self.r_order.borrow_mut().get_mut(&beat.id) {
                q.pop_front();
            }
        }
        if let Some(flight) = self.in_flight.borrow_mut().get_mut(&index) {
            flight.completion.data.push(beat.data);
            flight.completion.status = worst(flight.completion.status, beat.status);
            if beat.last {
                flight.awaiting_r = false;
            }
        }
        self.finish(index);
        Ok(())
    }

    fn send_w(&self) -> SimResult {
        if !self.bus.w.can_push() {
            return Ok(());
        }
        match self.w_beats.borrow_mut().pop_front() {
            Some(beat) => self.bus.w.push(beat),
            None => Ok(()),
        }
    }

    fn issue(&self, tick: u64) -> SimResult {
        if self.in_flight.borrow().len() >= self.max_outstanding {
            return Ok(());
        }
        let is_write = match self.script.borrow().front() {
            Some((_, txn)) => txn.is_write,
            None => return Ok(()),
        };
        let port = if is_write { &self.bus.aw } else { &self.bus.ar };
        if !port.can_push() {
            return Ok(());
        }
        let Some((index, txn)) = self.script.borrow_mut().pop_front() else {
            return Ok(());
        };

        let mut req = AddrReq::new(
            create_id!(self.entity),
            txn.id,
            txn.addr,
            txn.len,
            txn.size,
            txn.burst,
        );
        req.atomic = txn.atomic;
        debug!(self.entity ; "issue {req}");

        let awaiting_r = !txn.is_write || txn.expects_read_data();
        if txn.is_write {
            let num_beats = txn.data.len();
            let mut w_beats = self.w_beats.borrow_mut();
            for (i, data) in txn.data.iter().enumerate() {
                w_beats.push_back(WriteBeat::new(create_id!(self.entity), *data, i + 1 == num_beats));
            }
            self.b_order.borrow_mut().entry(txn.id).or_default().push_back(index);
        }
        if awaiting_r {
            self.r_order.borrow_mut().entry(txn.id).or_default().push_back(index);
        }
        self.in_flight.borrow_mut().insert(
            index,
            InFlight {
                completion: Completion {
                    index,
                    is_write: txn.is_write,
                    id: txn.id,
                    status: RespStatus::Okay,
                    data: Vec::new(),
                    issued: tick,
                    completed: tick,
                },
                awaiting_b: txn.is_write,
                awaiting_r,
            },
        );
        port.push(req)
    }
}

impl Clocked for Manager {
    fn evaluate(&self, tick: u64) -> SimResult {
        self.tick.set(tick);
        self.receive_b()?;
        self.receive_r()?;
        self.send_w()?;
        self.issue(tick)
    }
}

/// Parameters of a [`Memory`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Lowest valid address.
    pub base: u64,

    /// Number of valid bytes from `base`.
    pub size: u64,

    /// Ticks from a request completing to its response being available.
    pub latency: u64,

    /// Outstanding requests per direction.
    pub max_trans: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base: 0,
            size: 1 << 32,
            latency: 1,
            max_trans: 8,
        }
    }
}

struct WriteInProgress {
    req: AddrReq,
    beat: usize,
    status: RespStatus,
    loaded: Vec<u64>,
}

#[derive(EntityDisplay, EntityGet)]
pub struct Memory {
    pub entity: Rc<Entity>,
    config: MemoryConfig,
    bus: BusTarget,
    bytes: RefCell<HashMap<u64, u8>>,

    writes: RefCell<VecDeque<WriteInProgress>>,
    b_queue: RefCell<VecDeque<(WriteResp, u64)>>,
    r_queue: RefCell<VecDeque<(ReadBeat, u64)>>,
    reads_outstanding: Cell<usize>,

    num_writes: Cell<usize>,
    num_reads: Cell<usize>,
}

impl Memory {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: MemoryConfig,
    ) -> Result<Rc<Self>, SimError> {
        if config.max_trans == 0 {
            return sim_error!("{parent}::{name}: max_trans must be non-zero");
        }
        let entity = Rc::new(Entity::new(parent, name));
        let bus = BusTarget::new(engine, &entity, "bus");
        let rc_self = Rc::new(Self {
            entity,
            config,
            bus,
            bytes: RefCell::new(HashMap::new()),
            writes: RefCell::new(VecDeque::new()),
            b_queue: RefCell::new(VecDeque::new()),
            r_queue: RefCell::new(VecDeque::new()),
            reads_outstanding: Cell::new(0),
            num_writes: Cell::new(0),
            num_reads: Cell::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_bus(&self) -> &BusTarget {
        &self.bus
    }

    /// Read `num_bytes` (at most 8) little-endian bytes. Unwritten bytes are 0.
    #[must_use]
    pub fn read(&self, addr: u64, num_bytes: usize) -> u64 {
        let bytes = self.bytes.borrow();
        (0..num_bytes).fold(0, |value, i| {
            let byte = bytes.get(&(addr + i as u64)).copied().unwrap_or(0);
            value | (u64::from(byte) << (8 * i))
        })
    }

    /// Write the bytes of `value` enabled in `strb`.
    pub fn write(&self, addr: u64, num_bytes: usize, value: u64, strb: u8) {
        let mut bytes = self.bytes.borrow_mut();
        for i in 0..num_bytes {
            if strb & (1 << i) != 0 {
                bytes.insert(addr + i as u64, (value >> (8 * i)) as u8);
            }
        }
    }

    /// A copy of every byte written so far.
    #[must_use]
    pub fn contents(&self) -> HashMap<u64, u8> {
        self.bytes.borrow().clone()
    }

    /// Completed write bursts.
    #[must_use]
    pub fn num_writes(&self) -> usize {
        self.num_writes.get()
    }

    /// Accepted read bursts.
    #[must_use]
    pub fn num_reads(&self) -> usize {
        self.num_reads.get()
    }

    fn in_range(&self, req: &AddrReq, beat: usize) -> bool {
        let addr = req.beat_addr(beat);
        let end = self.config.base.saturating_add(self.config.size);
        addr >= self.config.base && addr.saturating_add(req.beat_bytes()) <= end
    }

    fn send_b(&self, tick: u64) -> SimResult {
        if !self.bus.b.can_push() {
            return Ok(());
        }
        let ready = self
            .b_queue
            .borrow()
            .front()
            .is_some_and(|(_, ready)| *ready <= tick);
        if !ready {
            return Ok(());
        }
        match self.b_queue.borrow_mut().pop_front() {
            Some((resp, _)) => self.bus.b.push(resp),
            None => Ok(()),
        }
    }

    fn send_r(&self, tick: u64) -> SimResult {
        if !self.bus.r.can_push() {
            return Ok(());
        }
        let ready = self
            .r_queue
            .borrow()
            .front()
            .is_some_and(|(_, ready)| *ready <= tick);
        if !ready {
            return Ok(());
        }
        let Some((beat, _)) = self.r_queue.borrow_mut().pop_front() else {
            return Ok(());
        };
        if beat.last {
            self.reads_outstanding.set(self.reads_outstanding.get() - 1);
        }
        self.bus.r.push(beat)
    }

    fn apply_beat(&self, write: &mut WriteInProgress, beat: &WriteBeat) {
        if !self.in_range(&write.req, write.beat) {
            write.status = RespStatus::SlaveError;
            return;
        }
        let addr = write.req.beat_addr(write.beat);
        let num_bytes = write.req.beat_bytes() as usize;
        match write.req.atomic {
            None => self.write(addr, num_bytes, beat.data, beat.strb),
            Some(op) => {
                let old = self.read(addr, num_bytes);
                let new = match op {
                    AtomicOp::StoreAdd | AtomicOp::LoadAdd => old.wrapping_add(beat.data),
                    AtomicOp::Swap => beat.data,
                };
                self.write(addr, num_bytes, new, beat.strb);
                write.loaded.push(old);
            }
        }
    }

    fn accept_w(&self, tick: u64) {
        let mut writes = self.writes.borrow_mut();
        let Some(write) = writes.front_mut() else {
            return;
        };
        let Some(beat) = self.bus.w.pop() else {
            return;
        };
        self.apply_beat(write, &beat);
        write.beat += 1;
        if !beat.last {
            return;
        }

        let ready = tick + self.config.latency;
        self.b_queue.borrow_mut().push_back((
            WriteResp {
                tag: create_id!(self.entity),
                id: write.req.id,
                status: write.status,
            },
            ready,
        ));
        if write.req.expects_read_data() {
            let num_loaded = write.loaded.len();
            let mut r_queue = self.r_queue.borrow_mut();
            for (i, data) in write.loaded.iter().enumerate() {
                r_queue.push_back((
                    ReadBeat {
                        tag: create_id!(self.entity),
                        id: write.req.id,
                        data: *data,
                        status: write.status,
                        last: i + 1 == num_loaded,
                    },
                    ready,
                ));
            }
            if num_loaded == 0 {
                r_queue.push_back((
                    ReadBeat {
                        tag: create_id!(self.entity),
                        id: write.req.id,
                        data: 0,
                        status: write.status,
                        last: true,
                    },
                    ready,
                ));
            }
        }
        trace!(self.entity ; "write {} done", write.req);
        self.num_writes.set(self.num_writes.get() + 1);
        writes.pop_front();
    }

    fn accept_aw(&self) {
        let can_accept = self.writes.borrow().len() + self.b_queue.borrow().len() < self.config.max_trans;
        if !can_accept {
            return;
        }
        if let Some(req) = self.bus.aw.peek() {
            if req.expects_read_data() && self.reads_outstanding.get() >= self.config.max_trans {
                return;
            }
            self.bus.aw.pop();
            if req.expects_read_data() {
                self.reads_outstanding.set(self.reads_outstanding.get() + 1);
            }
            self.writes.borrow_mut().push_back(WriteInProgress {
                req,
                beat: 0,
                status: RespStatus::Okay,
                loaded: Vec::new(),
            });
        }
    }

    fn accept_ar(&self, tick: u64) {
        if self.reads_outstanding.get() >= self.config.max_trans {
            return;
        }
        let Some(req) = self.bus.ar.pop() else {
            return;
        };
        let status = if (0..req.num_beats()).all(|i| self.in_range(&req, i)) {
            RespStatus::Okay
        } else {
            RespStatus::SlaveError
        };
        let ready = tick + self.config.latency;
        let num_beats = req.num_beats();
        let mut r_queue = self.r_queue.borrow_mut();
        for i in 0..num_beats {
            let data = match status {
                RespStatus::Okay => self.read(req.beat_addr(i), req.beat_bytes() as usize),
                _ => 0,
            };
            r_queue.push_back((
                ReadBeat {
                    tag: create_id!(self.entity),
                    id: req.id,
                    data,
                    status,
                    last: i + 1 == num_beats,
                },
                ready,
            ));
        }
        self.reads_outstanding.set(self.reads_outstanding.get() + 1);
        self.num_reads.set(self.num_reads.get() + 1);
    }
}

impl Clocked for Memory {
    fn evaluate(&self, tick: u64) -> SimResult {
        self.send_b(tick)?;
        self.send_r(tick)?;
        self.accept_w(tick);
        self.accept_aw();
        self.accept_ar(tick);
        Ok(())
    }
}
