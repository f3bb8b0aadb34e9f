// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_track::entity::Entity;
use xbar_track::warn;

use crate::traits::Clocked;

/// The type of a component that can be registered with the `Engine` so that it
/// will be evaluated and committed every tick.
pub type Component = Rc<dyn Clocked + 'static>;

// Simulation errors

#[macro_export]
/// Build an `Err(SimError)` from a format string and arguments
macro_rules! sim_error {
    ($($arg:tt)+) => {
        Err($crate::types::SimError(format!($($arg)+)))
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug, PartialEq)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;

/// How a component reacts when a neighbour breaks the bus protocol.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolChecking {
    /// Abort the simulation with a [`SimError`].
    #[default]
    Strict,

    /// Log a warning and continue.
    Relaxed,
}

impl ProtocolChecking {
    /// Report a protocol violation detected by `entity`.
    ///
    /// Returns an error under [`ProtocolChecking::Strict`], otherwise emits a
    /// warning and lets the caller contain the fault.
    pub fn violation(&self, entity: &Rc<Entity>, msg: fmt::Arguments) -> SimResult {
        match self {
            ProtocolChecking::Strict => sim_error!("{entity}: protocol violation: {msg}"),
            ProtocolChecking::Relaxed => {
                warn!(entity ; "protocol violation: {msg}");
                Ok(())
            }
        }
    }
}

impl fmt::Display for ProtocolChecking {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolChecking::Strict => write!(f, "strict"),
            ProtocolChecking::Relaxed => write!(f, "relaxed"),
        }
    }
}
