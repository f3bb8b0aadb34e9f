// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A crossbar connecting `num_ingress` initiators to `num_egress` targets.
//!
//! The crossbar is built from:
//!  - one [`Demux`] per ingress port,
//!  - one [`Mux`] per egress port,
//!  - a [`LinkStage`] for every enabled ingress/egress pair,
//!  - an [`ErrorResponder`] on the error lane of every demux and on every
//!    disabled pair.
//!
//! # Ports
//!
//! This component has:
//!  - `num_ingress` [bus targets](crate::bus::BusTarget): `ingress[i]`
//!  - `num_egress` [bus initiators](crate::bus::BusInitiator): `egress[j]`
//!
//! # Example
//!
//! ```rust
//! # use xbar_components::config::CrossbarConfig;
//! # use xbar_components::crossbar::Crossbar;
//! # use xbar_components::decoder::DefaultRoute;
//! # use xbar_engine::engine::Engine;
//! let engine = Engine::default();
//! let config = CrossbarConfig::default();
//! let xbar = Crossbar::new_and_register(&engine, engine.top(), "xbar", config).unwrap();
//! xbar.set_default_route(0, DefaultRoute::enabled(1)).unwrap();
//! assert_eq!(xbar.num_ingress(), 2);
//! ```

use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::types::{SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::info;

use crate::bus::BusTarget;
use crate::config::CrossbarConfig;
use crate::connect_bus;
use crate::decoder::{AddressMap, DefaultRoute, RouteSnapshot};
use crate::demux::Demux;
use crate::error_responder::ErrorResponder;
use crate::link::LinkStage;
use crate::mux::Mux;

#[derive(EntityDisplay, EntityGet)]
pub struct Crossbar {
    pub entity: Rc<Entity>,
    config: CrossbarConfig,
    demuxes: Vec<Rc<Demux>>,
    muxes: Vec<Rc<Mux>>,
    links: Vec<Vec<Option<Rc<LinkStage>>>>,
    error_responders: Vec<Rc<ErrorResponder>>,
    disabled_responders: Vec<Rc<ErrorResponder>>,
}

impl Crossbar {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: CrossbarConfig,
    ) -> Result<Rc<Self>, SimError> {
        config.validate()?;
        let entity = Rc::new(Entity::new(parent, name));
        let map = Rc::new(AddressMap::new(config.rules.clone(), config.num_egress)?);

        let mut demuxes = Vec::with_capacity(config.num_ingress);
        let mut error_responders = Vec::with_capacity(config.num_ingress);
        for i in 0..config.num_ingress {
            let route = RouteSnapshot::new(map.clone(), config.default_route(i));
            let demux = Demux::new_and_register(
                engine,
                &entity,
                format!("demux{i}").as_str(),
                config.demux_config(),
                route,
            )?;
            let responder = ErrorResponder::new_and_register(
                engine,
                &entity,
                format!("error{i}").as_str(),
                config.error_max_trans,
            )?;
            connect_bus!(demux, lane, demux.error_lane_index() => responder, bus)?;
            demuxes.push(demux);
            error_responders.push(responder);
        }

        let muxes = (0..config.num_egress)
            .map(|j| {
                Mux::new_and_register(engine, &entity, format!("mux{j}").as_str(), config.mux_config())
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        let mut links = Vec::with_capacity(config.num_ingress);
        let mut disabled_responders = Vec::new();
        for (i, demux) in demuxes.iter().enumerate() {
            let mut row = Vec::with_capacity(config.num_egress);
            for (j, mux) in muxes.iter().enumerate() {
                if config.is_enabled(i, j) {
                    let link = LinkStage::new_and_register(
                        engine,
                        &entity,
                        format!("link{i}_{j}").as_str(),
                        config.link_depths,
                    )?;
                    link.connect(demux.lane_i(j), mux.port_lane_i(i))?;
                    row.push(Some(link));
                } else {
                    let responder = ErrorResponder::new_and_register(
                        engine,
                        &entity,
                        format!("disabled{i}_{j}").as_str(),
                        config.error_max_trans,
                    )?;
                    connect_bus!(demux, lane, j => responder, bus)?;
                    mux.tie_off_lane(i)?;
                    disabled_responders.push(responder);
                    row.push(None);
                }
            }
            links.push(row);
        }

        info!(entity ; "{} x {} crossbar, {} rules", config.num_ingress, config.num_egress, map.num_rules());
        Ok(Rc::new(Self {
            entity,
            config,
            demuxes,
            muxes,
            links,
            error_responders,
            disabled_responders,
        }))
    }

    #[must_use]
    pub fn port_ingress_i(&self, i: usize) -> &BusTarget {
        self.demuxes[i].port_upstream()
    }

    pub fn connect_port_egress_i(&self, j: usize, target: &BusTarget) -> SimResult {
        match self.muxes.get(j) {
            Some(mux) => mux.connect_port_downstream(target),
            None => sim_error!("{}: no egress port {j}", self.entity),
        }
    }

    /// Replace the default route of ingress `i`.
    ///
    /// Must not be called while a request on that ingress is waiting to be
    /// accepted if the change alters its decode.
    pub fn set_default_route(&self, i: usize, route: DefaultRoute) -> SimResult {
        let Some(demux) = self.demuxes.get(i) else {
            return sim_error!("{}: no ingress port {i}", self.entity);
        };
        if route.enable && route.target >= self.config.num_egress {
            return sim_error!("{}: default route to egress {}", self.entity, route.target);
        }
        demux.set_route(demux.route().with_default(route));
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &CrossbarConfig {
        &self.config
    }

    #[must_use]
    pub fn num_ingress(&self) -> usize {
        self.demuxes.len()
    }

    #[must_use]
    pub fn num_egress(&self) -> usize {
        self.muxes.len()
    }

    #[must_use]
    pub fn demux(&self, i: usize) -> &Rc<Demux> {
        &self.demuxes[i]
    }

    #[must_use]
    pub fn mux(&self, j: usize) -> &Rc<Mux> {
        &self.muxes[j]
    }

    /// The link for ingress `i` to egress `j`, `None` for a disabled pair.
    #[must_use]
    pub fn link(&self, i: usize, j: usize) -> Option<&Rc<LinkStage>> {
        self.links[i][j].as_ref()
    }

    /// Error responses returned for unmapped addresses and disabled pairs.
    #[must_use]
    pub fn num_error_responses(&self) -> usize {
        self.error_responders
            .iter()
            .chain(self.disabled_responders.iter())
            .map(|r| r.num_responses())
            .sum()
    }
}
