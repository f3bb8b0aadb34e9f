// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Handshake ports.
//!
//! A connection between an [`OutPort`] and an [`InPort`] is a small elastic
//! register ([`PortState`]). Within a tick:
//!
//!  - the consumer sees only values committed in earlier ticks and accepts one
//!    by calling [`InPort::pop`],
//!  - the producer may stage at most one new value with [`OutPort::push`]
//!    which becomes visible to the consumer in the next tick,
//!  - [`OutPort::can_push`] is computed from the occupancy at the start of the
//!    tick so that the result never depends on whether the consumer has been
//!    evaluated yet.
//!
//! The state is resolved by the [`Engine`] once all components have been
//! committed.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use xbar_track::entity::Entity;
use xbar_track::{enter, exit};

use crate::engine::Engine;
use crate::sim_error;
use crate::traits::{Resolve, Resolver, SimObject};
use crate::types::SimResult;

/// Number of values a connection can hold.
///
/// Two entries allow a value to be accepted every tick while the acceptance is
/// only seen by the producer in the following tick.
pub const CHANNEL_CAPACITY: usize = 2;

pub struct PortState<T>
where
    T: SimObject,
{
    values: RefCell<VecDeque<T>>,
    staged: RefCell<Option<T>>,
    popped: Cell<usize>,
}

impl<T> PortState<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RefCell::new(VecDeque::with_capacity(CHANNEL_CAPACITY)),
            staged: RefCell::new(None),
            popped: Cell::new(0),
        }
    }

    fn start_of_tick_occupancy(&self) -> usize {
        self.values.borrow().len() + self.popped.get()
    }
}

impl<T> Default for PortState<T>
where
    T: SimObject,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Resolve for PortState<T>
where
    T: SimObject,
{
    fn resolve(&self) {
        if let Some(value) = self.staged.borrow_mut().take() {
            self.values.borrow_mut().push_back(value);
        }
        self.popped.set(0);
    }
}

/// The receiving end of a connection.
pub struct InPort<T>
where
    T: SimObject,
{
    pub entity: Rc<Entity>,
    state: Rc<PortState<T>>,
}

impl<T> fmt::Display for InPort<T>
where
    T: SimObject,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entity, f)
    }
}

impl<T> InPort<T>
where
    T: SimObject,
{
    /// Create a new port and register its state to be resolved every tick.
    #[must_use]
    pub fn new(engine: &Engine, parent: &Rc<Entity>, name: &str) -> Self {
        let state = Rc::new(PortState::new());
        engine.add_resolve(state.clone());
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> Rc<PortState<T>> {
        self.state.clone()
    }

    /// Return a copy of the value at the head of the channel, if any.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.state.values.borrow().front().cloned()
    }

    /// Accept the value at the head of the channel.
    pub fn pop(&self) -> Option<T> {
        let value = self.state.values.borrow_mut().pop_front();
        if let Some(value) = &value {
            self.state.popped.set(self.state.popped.get() + 1);
            enter!(self.entity ; value.id());
        }
        value
    }

    /// True when a value is waiting to be accepted.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.state.values.borrow().is_empty()
    }

    /// Number of values waiting to be accepted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.values.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_pending()
    }
}

/// The sending end of a connection.
pub struct OutPort<T>
where
    T: SimObject,
{
    pub entity: Rc<Entity>,
    state: RefCell<Option<Rc<PortState<T>>>>,
}

impl<T> fmt::Display for OutPort<T>
where
    T: SimObject,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entity, f)
    }
}

impl<T> OutPort<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            state: RefCell::new(None),
        }
    }

    /// Connect this port to the state of an [`InPort`].
    ///
    /// A port can only be connected once.
    pub fn connect(&self, port_state: Rc<PortState<T>>) -> SimResult {
        let mut state = self.state.borrow_mut();
        match *state {
            Some(_) => sim_error!("{} already connected", self.entity),
            None => {
                *state = Some(port_state);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// True when a value pushed this tick will be accepted by the connection.
    #[must_use]
    pub fn can_push(&self) -> bool {
        match self.state.borrow().as_ref() {
            Some(state) => {
                state.staged.borrow().is_none()
                    && state.start_of_tick_occupancy() < CHANNEL_CAPACITY
            }
            None => false,
        }
    }

    /// Stage a value to be visible to the consumer in the next tick.
    ///
    /// Callers must check [`OutPort::can_push`] first.
    pub fn push(&self, value: T) -> SimResult {
        if !self.is_connected() {
            return sim_error!("{} not connected", self.entity);
        }
        if !self.can_push() {
            return sim_error!("{} pushed {value} while full", self.entity);
        }
        exit!(self.entity ; value.id());
        if let Some(state) = self.state.borrow().as_ref() {
            *state.staged.borrow_mut() = Some(value);
        }
        Ok(())
    }
}
