// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! `XBAR` engine - lock-step evaluation of clocked bus components
//!
//! This library provides the core of the [XBAR Engine](crate::engine) which
//! advances a set of [`Clocked`](crate::traits::Clocked) components one tick
//! at a time. Each tick is split into two phases:
//!
//!  1. every component is *evaluated*: it observes state committed in earlier
//!     ticks and stages its next state,
//!  2. every component is *committed* and then every channel is resolved.
//!
//! Components exchange values through [ports](crate::port) whose occupancy is
//! sampled at the start of the tick, so the result of a tick does not depend on
//! the order in which components were registered.
//!
//! # Simple Application
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use xbar_engine::engine::Engine;
//! use xbar_engine::port::{InPort, OutPort};
//! use xbar_engine::traits::Clocked;
//! use xbar_engine::types::SimResult;
//!
//! struct Counter {
//!     tx: OutPort<u64>,
//! }
//!
//! impl Clocked for Counter {
//!     fn evaluate(&self, tick: u64) -> SimResult {
//!         if self.tx.can_push() {
//!             self.tx.push(tick)?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let engine = Engine::default();
//! let rx = InPort::new(&engine, engine.top(), "rx");
//! let tx = OutPort::new(engine.top(), "tx");
//! tx.connect(rx.state()).unwrap();
//! engine.register(Rc::new(Counter { tx }));
//! engine.run_ticks(2).unwrap();
//! assert_eq!(rx.pop(), Some(0));
//! ```

pub mod engine;
pub mod port;
pub mod test_helpers;
pub mod traits;
pub mod types;

#[macro_export]
/// Connect an [`OutPort`](crate::port::OutPort) to an
/// [`InPort`](crate::port::InPort).
///
/// The ports are named fields of the two components. The macro evaluates to a
/// [`SimResult`](crate::types::SimResult).
macro_rules! connect_port {
    ($from:expr, $from_port:ident => $to:expr, $to_port:ident) => {
        $from.$from_port.connect($to.$to_port.state())
    };
}
