// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Round robin arbitration.
//!
//! The search for a requesting input starts one past the last input granted,
//! so every input that keeps requesting is granted within `N` grants.

use std::rc::Rc;

use xbar_track::entity::Entity;
use xbar_track::trace;

use crate::arbiter::Arbitrate;

#[derive(Default)]
pub struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Arbitrate for RoundRobin {
    fn arbitrate(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        let num_inputs = requests.len();
        let granted = (self.next..self.next + num_inputs)
            .map(|i| i % num_inputs)
            .find(|&i| requests[i])?;
        trace!(entity ; "rr: grant {granted} (searched from {})", self.next);
        self.next = (granted + 1) % num_inputs;
        Some(granted)
    }
}
