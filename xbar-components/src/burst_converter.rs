// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Rewrite descending write bursts as incrementing ones.
//!
//! A descending (`Decr`) write burst is held back until all of its write data
//! has arrived. It is then sent downstream as an `Incr` burst starting at its
//! lowest address, with the write data replayed in reverse order. The bytes
//! written to memory are the same as those the original burst would have
//! written.
//!
//! Every other request passes straight through, as do all responses.
//!
//! # States
//!
//! ```text
//!   Idle --(Decr aw)--> AddressReceived --(w last)--> LastBeatReceived
//!    ^                                                       |
//!    |                                                  (aw sent)
//!    |                                                       v
//!    +-------------------(final beat sent)------------ AddressForwarded
//! ```
//!
//! While not `Idle`:
//!  - all write requests are stalled,
//!  - reads to the same 4 KiB page as the buffered burst are stalled.
//!
//! # Ports
//!
//! This component has:
//!  - One [bus target](crate::bus::BusTarget): `upstream`
//!  - One [bus initiator](crate::bus::BusInitiator): `downstream`

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use xbar_engine::engine::Engine;
use xbar_engine::sim_error;
use xbar_engine::traits::Clocked;
use xbar_engine::types::{SimError, SimResult};
use xbar_model_builder::{EntityDisplay, EntityGet};
use xbar_track::entity::Entity;
use xbar_track::{debug, trace};

use crate::bus::{BusInitiator, BusTarget};
use crate::config::ConverterConfig;
use crate::types::{AddrReq, Burst, PAGE_SHIFT, WriteBeat};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConverterState {
    #[default]
    Idle,
    AddressReceived,
    LastBeatReceived,
    AddressForwarded,
}

impl fmt::Display for ConverterState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConverterStats {
    pub converted: u64,
    pub bypassed: u64,
    pub hazard_stalls: u64,
}

struct BufferedBurst {
    req: AddrReq,
    beats: Vec<WriteBeat>,
}

impl BufferedBurst {
    /// True when any byte the buffered burst writes lies in `page`.
    ///
    /// A descending burst covers the pages from its lowest beat up to its
    /// original address.
    fn touches_page(&self, page: u64) -> bool {
        let span = self.req.beat_bytes() * (self.req.num_beats() as u64 - 1);
        let lowest = self.req.addr.saturating_sub(span);
        (lowest >> PAGE_SHIFT..=self.req.page()).contains(&page)
    }

    /// The request to send downstream once all beats are held.
    fn corrected(&self) -> AddrReq {
        let num_beats = self.beats.len() as u64;
        let beat_bytes = self.req.beat_bytes();
        let mut req = self.req.clone();
        req.addr = self.req.addr.wrapping_sub(beat_bytes * (num_beats - 1));
        req.len = (self.beats.len() - 1) as u8;
        req.burst = Burst::Incr;
        req
    }
}

#[derive(EntityDisplay, EntityGet)]
pub struct BurstConverter {
    pub entity: Rc<Entity>,
    config: ConverterConfig,

    upstream: BusTarget,
    downstream: BusInitiator,

    state: Cell<ConverterState>,
    buffer: RefCell<Option<BufferedBurst>>,

    /// Write bursts passed through whose write data has not all been sent.
    bypassed_w: Cell<usize>,

    stats: Cell<ConverterStats>,
}

impl BurstConverter {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Rc<Entity>,
        name: &str,
        config: ConverterConfig,
    ) -> Result<Rc<Self>, SimError> {
        if config.max_beats == 0 || config.max_beats > usize::from(u8::MAX) + 1 {
            return sim_error!(
                "{parent}::{name}: max_beats {} must be in the range 1..=256",
                config.max_beats
            );
        }
        let entity = Rc::new(Entity::new(parent, name));
        let upstream = BusTarget::new(engine, &entity, "upstream");
        let downstream = BusInitiator::new(engine, &entity, "downstream");
        let rc_self = Rc::new(Self {
            entity,
            config,
            upstream,
            downstream,
            state: Cell::new(ConverterState::Idle),
            buffer: RefCell::new(None),
            bypassed_w: Cell::new(0),
            stats: Cell::new(ConverterStats::default()),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_upstream(&self) -> &BusTarget {
        &self.upstream
    }

    pub fn connect_port_downstream(&self, target: &BusTarget) -> SimResult {
        self.downstream.connect(target)
    }

    #[must_use]
    pub fn state(&self) -> ConverterState {
        self.state.get()
    }

    /// Number of write beats currently held.
    #[must_use]
    pub fn buffered_beats(&self) -> usize {
        self.buffer.borrow().as_ref().map_or(0, |b| b.beats.len())
    }

    #[must_use]
    pub fn stats(&self) -> ConverterStats {
        self.stats.get()
    }

    fn update_stats(&self, f: impl FnOnce(&mut ConverterStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn set_state(&self, state: ConverterState) {
        trace!(self.entity ; "{} -> {}", self.state.get(), state);
        self.state.set(state);
    }

    fn pass_responses(&self) -> SimResult {
        if self.upstream.b.can_push() {
            if let Some(resp) = self.downstream.b.pop() {
                self.upstream.b.push(resp)?;
            }
        }
        if self.upstream.r.can_push() {
            if let Some(beat) = self.downstream.r.pop() {
                self.upstream.r.push(beat)?;
            }
        }
        Ok(())
    }

    fn receive_beat(&self) -> SimResult {
        let Some(beat) = self.upstream.w.pop() else {
            return Ok(());
        };
        let mut buffer = self.buffer.borrow_mut();
        let Some(burst) = buffer.as_mut() else {
            return sim_error!("{}: no buffer in state {}", self.entity, self.state.get());
        };

        let last = beat.last;
        if burst.beats.len() < burst.req.num_beats() {
            burst.beats.push(beat);
        } else {
            self.config.checking.violation(
                &self.entity,
                format_args!("dropping extra beat {beat} for {}", burst.req),
            )?;
        }

        if last {
            if burst.beats.len() != burst.req.num_beats() {
                self.config.checking.violation(
                    &self.entity,
                    format_args!(
                        "{} ended after {} beats",
                        burst.req,
                        burst.beats.len()
                    ),
                )?;
            }
            self.set_state(ConverterState::LastBeatReceived);
        }
        Ok(())
    }

    fn bypass_beat(&self) -> SimResult {
        if self.bypassed_w.get() == 0 || !self.downstream.w.can_push() {
            return Ok(());
        }
        let Some(beat) = self.upstream.w.pop() else {
            return Ok(());
        };
        if beat.last {
            self.bypassed_w.set(self.bypassed_w.get() - 1);
        }
        self.downstream.w.push(beat)
    }

    fn forward_address(&self) -> SimResult {
        if !self.downstream.aw.can_push() {
            return Ok(());
        }
        let corrected = match self.buffer.borrow().as_ref() {
            Some(burst) => burst.corrected(),
            None => {
                return sim_error!("{}: no buffer in state {}", self.entity, self.state.get());
            }
        };
        debug!(self.entity ; "converted to {corrected}");
        self.downstream.aw.push(corrected)?;
        self.set_state(ConverterState::AddressForwarded);
        Ok(())
    }

    fn replay_beat(&self) -> SimResult {
        if !self.downstream.w.can_push() {
            return Ok(());
        }
        let mut buffer = self.buffer.borrow_mut();
        let Some(burst) = buffer.as_mut() else {
            return sim_error!("{}: no buffer in state {}", self.entity, self.state.get());
        };
        let Some(mut beat) = burst.beats.pop() else {
            return Ok(());
        };
        let done = burst.beats.is_empty();
        beat.last = done;
        self.downstream.w.push(beat)?;

        if done {
            *buffer = None;
            self.update_stats(|s| s.converted += 1);
            self.set_state(ConverterState::Idle);
        }
        Ok(())
    }

    fn accept_aw(&self) -> SimResult {
        if self.state.get() != ConverterState::Idle {
            return Ok(());
        }
        let Some(req) = self.upstream.aw.peek() else {
            return Ok(());
        };

        let mut convert = req.burst == Burst::Decr;
        if convert && req.num_beats() > self.config.max_beats {
            self.config.checking.violation(
                &self.entity,
                format_args!(
                    "{req} is longer than {} beats, passing through",
                    self.config.max_beats
                ),
            )?;
            convert = false;
        }

        if convert {
            if self.bypassed_w.get() > 0 {
                return Ok(());
            }
            self.upstream.aw.pop();
            debug!(self.entity ; "buffering {req}");
            *self.buffer.borrow_mut() = Some(BufferedBurst {
                beats: Vec::with_capacity(req.num_beats()),
                req,
            });
            self.set_state(ConverterState::AddressReceived);
            return Ok(());
        }

        if !self.downstream.aw.can_push() {
            return Ok(());
        }
        self.upstream.aw.pop();
        self.bypassed_w.set(self.bypassed_w.get() + 1);
        self.update_stats(|s| s.bypassed += 1);
        self.downstream.aw.push(req)
    }

    fn accept_ar(&self) -> SimResult {
        let Some(req) = self.upstream.ar.peek() else {
            return Ok(());
        };
        if self.state.get() != ConverterState::Idle {
            let hazard = self
                .buffer
                .borrow()
                .as_ref()
                .is_some_and(|burst| burst.touches_page(req.page()));
            if hazard {
                self.update_stats(|s| s.hazard_stalls += 1);
                return Ok(());
            }
        }
        if !self.downstream.ar.can_push() {
            return Ok(());
        }
        self.upstream.ar.pop();
        self.downstream.ar.push(req)
    }
}

impl Clocked for BurstConverter {
    fn evaluate(&self, _tick: u64) -> SimResult {
        self.pass_responses()?;
        match self.state.get() {
            ConverterState::Idle => self.bypass_beat()?,
            ConverterState::AddressReceived => self.receive_beat()?,
            ConverterState::LastBeatReceived => self.forward_address()?,
            ConverterState::AddressForwarded => self.replay_beat()?,
        }
        self.accept_aw()?;
        self.accept_ar()
    }
}

#[cfg(test)]
mod tests {
    use xbar_track::Id;

    use super::*;

    fn burst(addr: u64, len: u8, size: u8, beats: usize) -> BufferedBurst {
        let req = AddrReq::new(Id(1), 0, addr, len, size, Burst::Decr);
        BufferedBurst {
            req,
            beats: (0..beats)
                .map(|i| WriteBeat::new(Id(10 + i as u64), i as u64, i + 1 == beats))
                .collect(),
        }
    }

    #[test]
    fn corrected_address() {
        let corrected = burst(0x1000, 3, 3, 4).corrected();
        assert_eq!(corrected.addr, 0xfe8);
        assert_eq!(corrected.len, 3);
        assert_eq!(corrected.burst, Burst::Incr);
        assert_eq!(corrected.tag, Id(1));
    }

    #[test]
    fn pages_touched() {
        let buffered = burst(0x1000, 3, 3, 0);
        assert!(buffered.touches_page(0x0));
        assert!(buffered.touches_page(0x1));
        assert!(!buffered.touches_page(0x2));

        let buffered = burst(0x1800, 3, 3, 0);
        assert!(!buffered.touches_page(0x0));
        assert!(buffered.touches_page(0x1));
    }

    #[test]
    fn corrected_single_beat() {
        let corrected = burst(0x40, 0, 2, 1).corrected();
        assert_eq!(corrected.addr, 0x40);
        assert_eq!(corrected.len, 0);
    }

    #[test]
    fn corrected_short_burst() {
        // Only the beats actually received are replayed
        let corrected = burst(0x2000, 7, 2, 3).corrected();
        assert_eq!(corrected.addr, 0x2000 - 8);
        assert_eq!(corrected.len, 2);
    }
}
