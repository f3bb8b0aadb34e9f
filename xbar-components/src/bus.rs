// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The five-channel bus port.
//!
//! A [`BusTarget`] is the end of a bus that receives requests: it owns the
//! `aw`, `w` and `ar` [input ports](xbar_engine::port::InPort) and the `b` and
//! `r` [output ports](xbar_engine::port::OutPort). A [`BusInitiator`] is the
//! mirror image. [`BusInitiator::connect`] joins the two.

use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::port::{InPort, OutPort};
use xbar_engine::types::SimResult;
use xbar_model_builder::EntityDisplay;
use xbar_track::entity::Entity;
use xbar_track::{connect, debug};

use crate::types::{AddrReq, ReadBeat, WriteBeat, WriteResp};

/// The receiving end of a bus.
#[derive(EntityDisplay)]
pub struct BusTarget {
    pub entity: Rc<Entity>,
    pub aw: InPort<AddrReq>,
    pub w: InPort<WriteBeat>,
    pub ar: InPort<AddrReq>,
    pub b: OutPort<WriteResp>,
    pub r: OutPort<ReadBeat>,
}

impl BusTarget {
    #[must_use]
    pub fn new(engine: &Engine, parent: &Rc<Entity>, name: &str) -> Self {
        let entity = Rc::new(Entity::new(parent, name));
        Self {
            aw: InPort::new(engine, &entity, "aw"),
            w: InPort::new(engine, &entity, "w"),
            ar: InPort::new(engine, &entity, "ar"),
            b: OutPort::new(&entity, "b"),
            r: OutPort::new(&entity, "r"),
            entity,
        }
    }

    /// True when no request or write data is waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.aw.is_empty() && self.w.is_empty() && self.ar.is_empty()
    }
}

/// The issuing end of a bus.
#[derive(EntityDisplay)]
pub struct BusInitiator {
    pub entity: Rc<Entity>,
    pub aw: OutPort<AddrReq>,
    pub w: OutPort<WriteBeat>,
    pub ar: OutPort<AddrReq>,
    pub b: InPort<WriteResp>,
    pub r: InPort<ReadBeat>,
}

impl BusInitiator {
    #[must_use]
    pub fn new(engine: &Engine, parent: &Rc<Entity>, name: &str) -> Self {
        let entity = Rc::new(Entity::new(parent, name));
        Self {
            aw: OutPort::new(&entity, "aw"),
            w: OutPort::new(&entity, "w"),
            ar: OutPort::new(&entity, "ar"),
            b: InPort::new(engine, &entity, "b"),
            r: InPort::new(engine, &entity, "r"),
            entity,
        }
    }

    /// Connect all five channels of this initiator to a target.
    pub fn connect(&self, target: &BusTarget) -> SimResult {
        debug!(self.entity ; "connect to {}", target);
        connect!(self.entity ; target.entity);
        self.aw.connect(target.aw.state())?;
        self.w.connect(target.w.state())?;
        self.ar.connect(target.ar.state())?;
        target.b.connect(self.b.state())?;
        target.r.connect(self.r.state())?;
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.aw.is_connected()
    }
}
