// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Arbitration between a number of requesting inputs.
//!
//! An [`Arbitrate`] policy is given one flag per input saying whether that
//! input has something to offer this tick and returns the input that is
//! granted. Policies are only asked when the grant can actually be taken, so
//! any fairness state they keep advances exactly once per grant.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_engine::types::SimError;
use xbar_track::entity::Entity;

pub mod policy;

use policy::{FixedPriority, Priority, PriorityRoundRobin, RoundRobin, WeightedRoundRobin};

pub trait Arbitrate {
    /// Select one of the inputs whose entry in `requests` is true.
    fn arbitrate(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize>;
}

/// Serializable selection of an arbitration policy.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArbiterPolicy {
    #[default]
    RoundRobin,

    /// Lowest input index always wins.
    FixedPriority,

    WeightedRoundRobin {
        weights: Vec<usize>,
    },

    PriorityRoundRobin {
        priorities: Vec<Priority>,
    },
}

impl ArbiterPolicy {
    /// Create an instance of this policy for `num_inputs` inputs.
    pub fn build(&self, num_inputs: usize) -> Result<Box<dyn Arbitrate>, SimError> {
        let policy: Box<dyn Arbitrate> = match self {
            ArbiterPolicy::RoundRobin => Box::new(RoundRobin::new()),
            ArbiterPolicy::FixedPriority => Box::new(FixedPriority::new()),
            ArbiterPolicy::WeightedRoundRobin { weights } => {
                Box::new(WeightedRoundRobin::new(weights.clone(), num_inputs)?)
            }
            ArbiterPolicy::PriorityRoundRobin { priorities } => Box::new(
                PriorityRoundRobin::from_priorities(priorities.clone(), num_inputs)?,
            ),
        };
        Ok(policy)
    }
}

impl fmt::Display for ArbiterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArbiterPolicy::RoundRobin => write!(f, "round_robin"),
            ArbiterPolicy::FixedPriority => write!(f, "fixed_priority"),
            ArbiterPolicy::WeightedRoundRobin { weights } => {
                write!(f, "weighted_round_robin{weights:?}")
            }
            ArbiterPolicy::PriorityRoundRobin { priorities } => {
                write!(f, "priority_round_robin{priorities:?}")
            }
        }
    }
}
