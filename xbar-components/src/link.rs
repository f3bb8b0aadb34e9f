// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pipelined links between a demultiplexer lane and a multiplexer input.
//!
//! A [`Pipeline`] adds `depth` ticks of latency to one channel while still
//! accepting a new value every tick. It applies back-pressure once `depth`
//! values are held.
//!
//! A [`LinkStage`] bundles one optional [`Pipeline`] per channel of a bus. A
//! channel with a depth of 0 is connected directly.
//!
//! # Ports
//!
//! A [`Pipeline`] has:
//!  - One [input port](xbar_engine::port::InPort): `rx`
//!  - One [output port](xbar_engine::port::OutPort): `tx`

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_engine::engine::Engine;
use xbar_engine::port::{InPort, OutPort, PortState};
use xbar_engine::sim_error;
use xbar_engine::traits::{Clocked, SimObject};
use xbar_engine::types::{SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{connect, trace};

use crate::bus::{BusInitiator, BusTarget};
use crate::types::{AddrReq, ReadBeat, WriteBeat, WriteResp};

/// Extra ticks of latency per channel of a link.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct LinkDepths {
    pub aw: usize,
    pub w: usize,
    pub b: usize,
    pub ar: usize,
    pub r: usize,
}

impl LinkDepths {
    /// The same depth on every channel.
    #[must_use]
    pub fn uniform(depth: usize) -> Self {
        Self {
            aw: depth,
            w: depth,
            b: depth,
            ar: depth,
            r: depth,
        }
    }
}

#[derive(EntityDisplay, EntityGet)]
pub struct Pipeline<T>
where
    T: SimObject,
{
    pub entity: Rc<Entity>,
    depth: usize,
    rx: InPort<T>,
    tx: OutPort<T>,
    queue: RefCell<VecDeque<(T, u64)>>,
    num_forwarded: Cell<usize>,
}

impl<T> Pipeline<T>
where
    T: SimObject,
{
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        depth: usize,
    ) -> Result<Rc<Self>, SimError> {
        if depth == 0 {
            return sim_error!("{parent}::{name}: pipeline depth must be non-zero");
        }
        let entity = Rc::new(Entity::new(parent, name));
        let rx = InPort::new(engine, &entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Rc::new(Self {
            entity,
            depth,
            rx,
            tx,
            queue: RefCell::new(VecDeque::with_capacity(depth)),
            num_forwarded: Cell::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_rx(&self) -> Rc<PortState<T>> {
        self.rx.state()
    }

    pub fn connect_port_tx(&self, port_state: Rc<PortState<T>>) -> SimResult {
        self.tx.connect(port_state)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of values currently held.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.queue.borrow().len()
    }

    #[must_use]
    pub fn num_forwarded(&self) -> usize {
        self.num_forwarded.get()
    }
}

impl<T> Clocked for Pipeline<T>
where
    T: SimObject,
{
    fn evaluate(&self, tick: u64) -> SimResult {
        let mut queue = self.queue.borrow_mut();
        if queue.len() < self.depth {
            if let Some(value) = self.rx.pop() {
                // The hop into the next channel costs the final tick
                queue.push_back((value, tick + self.depth as u64 - 1));
            }
        }

        let ready = queue.front().is_some_and(|(_, ready)| *ready <= tick);
        if ready && self.tx.can_push() {
            if let Some((value, _)) = queue.pop_front() {
                trace!(self.entity ; "forward {}", value);
                self.tx.push(value)?;
                self.num_forwarded.set(self.num_forwarded.get() + 1);
            }
        }
        Ok(())
    }
}

/// Connect `tx` to `rx` either directly or through a pipeline.
fn connect_channel<T>(pipeline: Option<&Rc<Pipeline<T>>>, tx: &OutPort<T>, rx: &InPort<T>) -> SimResult
where
    T: SimObject,
{
    match pipeline {
        Some(pipeline) => {
            tx.connect(pipeline.port_rx())?;
            pipeline.connect_port_tx(rx.state())
        }
        None => tx.connect(rx.state()),
    }
}

fn build<T>(
    engine: &Engine,
    parent: &Rc<Entity>,
    name: &str,
    depth: usize,
) -> Result<Option<Rc<Pipeline<T>>>, SimError>
where
    T: SimObject,
{
    if depth == 0 {
        return Ok(None);
    }
    Ok(Some(Pipeline::new_and_register(engine, parent, name, depth)?))
}

/// The pipelines of one ingress/egress pair.
#[derive(EntityDisplay, EntityGet)]
pub struct LinkStage {
    pub entity: Rc<Entity>,
    depths: LinkDepths,
    aw: Option<Rc<Pipeline<AddrReq>>>,
    w: Option<Rc<Pipeline<WriteBeat>>>,
    b: Option<Rc<Pipeline<WriteResp>>>,
    ar: Option<Rc<Pipeline<AddrReq>>>,
    r: Option<Rc<Pipeline<ReadBeat>>>,
}

impl LinkStage {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        depths: LinkDepths,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Rc::new(Entity::new(parent, name));
        Ok(Rc::new(Self {
            aw: build(engine, &entity, "aw", depths.aw)?,
            w: build(engine, &entity, "w", depths.w)?,
            b: build(engine, &entity, "b", depths.b)?,
            ar: build(engine, &entity, "ar", depths.ar)?,
            r: build(engine, &entity, "r", depths.r)?,
            depths,
            entity,
        }))
    }

    /// Join `initiator` to `target` through this link.
    pub fn connect(&self, initiator: &BusInitiator, target: &BusTarget) -> SimResult {
        connect!(self.entity ; initiator.entity);
        connect!(self.entity ; target.entity);
        connect_channel(self.aw.as_ref(), &initiator.aw, &target.aw)?;
        connect_channel(self.w.as_ref(), &initiator.w, &target.w)?;
        connect_channel(self.ar.as_ref(), &initiator.ar, &target.ar)?;
        connect_channel(self.b.as_ref(), &target.b, &initiator.b)?;
        connect_channel(self.r.as_ref(), &target.r, &initiator.r)
    }

    #[must_use]
    pub fn depths(&self) -> LinkDepths {
        self.depths
    }

    /// Number of values held across all channels.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.aw.as_ref().map_or(0, |p| p.occupancy())
            + self.w.as_ref().map_or(0, |p| p.occupancy())
            + self.b.as_ref().map_or(0, |p| p.occupancy())
            + self.ar.as_ref().map_or(0, |p| p.occupancy())
            + self.r.as_ref().map_or(0, |p| p.occupancy())
    }
}

#[cfg(test)]
mod tests {
    use xbar_engine::test_helpers::start_test;

    use super::*;

    fn arrival_tick(depth: usize) -> u64 {
        let engine = start_test(file!());
        let top = engine.top();
        let tx: OutPort<u64> = OutPort::new(top, "src");
        let rx: InPort<u64> = InPort::new(&engine, top, "sink");
        if depth == 0 {
            tx.connect(rx.state()).unwrap();
        } else {
            let pipeline = Pipeline::new_and_register(&engine, top, "pipe", depth).unwrap();
            tx.connect(pipeline.port_rx()).unwrap();
            pipeline.connect_port_tx(rx.state()).unwrap();
        }

        tx.push(7).unwrap();
        engine.run_until(100, || rx.is_pending()).unwrap()
    }

    #[test]
    fn adds_depth_ticks() {
        let direct = arrival_tick(0);
        assert_eq!(direct, 1);
        for depth in 1..5 {
            assert_eq!(arrival_tick(depth), direct + depth as u64);
        }
    }

    #[test]
    fn full_throughput() {
        let engine = start_test(file!());
        let top = engine.top();
        let tx: OutPort<u64> = OutPort::new(top, "src");
        let rx: InPort<u64> = InPort::new(&engine, top, "sink");
        let pipeline = Pipeline::new_and_register(&engine, top, "pipe", 3).unwrap();
        tx.connect(pipeline.port_rx()).unwrap();
        pipeline.connect_port_tx(rx.state()).unwrap();

        let mut next = 0;
        let mut received = Vec::new();
        for _ in 0..20 {
            if let Some(v) = rx.pop() {
                received.push(v);
            }
            if tx.can_push() {
                tx.push(next).unwrap();
                next += 1;
            }
            engine.step().unwrap();
        }

        // One value per tick once the pipeline is full
        assert_eq!(next, 20);
        assert_eq!(received, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn back_pressure() {
        let engine = start_test(file!());
        let top = engine.top();
        let tx: OutPort<u64> = OutPort::new(top, "src");
        let rx: InPort<u64> = InPort::new(&engine, top, "sink");
        let pipeline = Pipeline::new_and_register(&engine, top, "pipe", 2).unwrap();
        tx.connect(pipeline.port_rx()).unwrap();
        pipeline.connect_port_tx(rx.state()).unwrap();

        let mut pushed = 0;
        for _ in 0..20 {
            if tx.can_push() {
                tx.push(pushed).unwrap();
                pushed += 1;
            }
            engine.step().unwrap();
        }

        // Sink holds 2, pipeline holds 2, the input channel holds 2
        assert_eq!(rx.len(), 2);
        assert_eq!(pipeline.occupancy(), 2);
        assert_eq!(pushed, 6);
    }

    #[test]
    fn zero_depth_pipeline_is_an_error() {
        let engine = start_test(file!());
        assert!(Pipeline::<u64>::new_and_register(&engine, engine.top(), "pipe", 0).is_err());
    }
}
