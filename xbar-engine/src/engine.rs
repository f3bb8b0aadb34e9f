// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The lock-step simulation engine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use xbar_track::entity::{Entity, toplevel};
use xbar_track::tracker::stdout_tracker;
use xbar_track::{Tracker, trace};

use crate::sim_error;
use crate::traits::{Resolve, Resolver};
use crate::types::{Component, SimError, SimResult};

pub struct Engine {
    toplevel: Rc<Entity>,
    tracker: Tracker,
    components: RefCell<Vec<Component>>,
    resolvers: RefCell<Vec<Rc<dyn Resolve>>>,
    tick: Cell<u64>,
}

impl Engine {
    /// Create a standalone engine.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        Self {
            toplevel: toplevel(tracker, "top"),
            tracker: tracker.clone(),
            components: RefCell::new(Vec::new()),
            resolvers: RefCell::new(Vec::new()),
            tick: Cell::new(0),
        }
    }

    /// Add a component to be evaluated and committed every tick.
    pub fn register(&self, component: Component) {
        self.components.borrow_mut().push(component);
    }

    /// Advance the simulation by one tick.
    ///
    /// All components are evaluated before any is committed. The first error
    /// returned by a component aborts the tick.
    pub fn step(&self) -> SimResult {
        let tick = self.tick.get();
        self.tracker.time(self.toplevel.id, tick);

        let components = self.components.borrow();
        for component in components.iter() {
            component.evaluate(tick)?;
        }
        for component in components.iter() {
            component.commit();
        }
        for resolver in self.resolvers.borrow().iter() {
            resolver.resolve();
        }

        self.tick.set(tick + 1);
        Ok(())
    }

    /// Run for a fixed number of ticks.
    pub fn run_ticks(&self, num_ticks: u64) -> SimResult {
        for _ in 0..num_ticks {
            self.step()?;
        }
        Ok(())
    }

    /// Run until `done` returns true, checked before every tick.
    ///
    /// Returns the tick at which `done` became true or an error if that did not
    /// happen within `max_ticks`.
    pub fn run_until(&self, max_ticks: u64, mut done: impl FnMut() -> bool) -> Result<u64, SimError> {
        for _ in 0..max_ticks {
            if done() {
                trace!(self.toplevel ; "finished at tick {}", self.tick_now());
                return Ok(self.tick_now());
            }
            self.step()?;
        }
        if done() {
            return Ok(self.tick_now());
        }
        sim_error!("simulation did not finish within {max_ticks} ticks")
    }

    /// The tick that will be evaluated next.
    #[must_use]
    pub fn tick_now(&self) -> u64 {
        self.tick.get()
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }

    #[must_use]
    pub fn num_components(&self) -> usize {
        self.components.borrow().len()
    }
}

impl Resolver for Engine {
    fn add_resolve(&self, resolve: Rc<dyn Resolve + 'static>) {
        self.resolvers.borrow_mut().push(resolve);
    }
}

/// Create a default engine that sends [`Track`](xbar_track::Track) events to
/// stdout.
///
/// This is provided to keep documentation examples simple with fewer
/// concepts to have to consider at once.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
