// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A set of common traits used across the XBAR engine.

use std::fmt::{Debug, Display};
use std::rc::Rc;

use xbar_track::Tagged;

use crate::types::SimResult;

/// A super-trait that objects that are passed around the simulation have to
/// implement
///
///  - Clone:       Allows components to peek at the head of a channel and
///    keep copies of objects sent around.
///  - Debug:       In order to print "{:?}" objects have to at least implement
///    Debug.
///  - Display:     Used in log messages.
///  - Tagged:      Allows for simple tracking of objects through components.
///  - 'static:     Objects are stored in shared channel state.
pub trait SimObject: Clone + Debug + Display + Tagged + 'static {}

impl SimObject for u64 {}

/// A component that is advanced in lock-step by the
/// [`Engine`](crate::engine::Engine).
///
/// Every tick the engine calls `evaluate()` on all registered components and
/// then `commit()` on all of them. `evaluate()` may only observe state that was
/// committed in previous ticks and must stage any changes; `commit()` installs
/// the staged state.
pub trait Clocked {
    /// Compute the next state for the given tick.
    fn evaluate(&self, tick: u64) -> SimResult;

    /// Install the state computed by `evaluate()`.
    fn commit(&self) {}
}

/// Complete any pending transactions.
pub trait Resolve {
    /// Complete any pending update.
    fn resolve(&self);
}

/// A [`Resolver`] is used to register any [`Resolve`] functions that need to be
/// called at the end of every tick.
pub trait Resolver {
    /// Register an object to be resolved at the end of every tick.
    fn add_resolve(&self, resolve: Rc<dyn Resolve + 'static>);
}
