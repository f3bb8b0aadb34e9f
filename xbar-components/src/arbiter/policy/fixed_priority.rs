// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Fixed priority arbitration policy
//!
//! The requesting input with the lowest index is always granted. This policy
//! can starve higher-numbered inputs.

use std::rc::Rc;

use xbar_track::entity::Entity;

use crate::arbiter::Arbitrate;

#[derive(Default)]
pub struct FixedPriority;

impl FixedPriority {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Arbitrate for FixedPriority {
    fn arbitrate(&mut self, _entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        requests.iter().position(|r| *r)
    }
}
