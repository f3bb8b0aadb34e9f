// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Priority Round Robin arbitration policy
//!
//! The highest priority level with a requesting input wins. Inputs that share
//! a level are served round-robin.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_engine::sim_error;
use xbar_engine::types::SimError;
use xbar_track::entity::Entity;

use crate::arbiter::Arbitrate;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    #[default]
    Low = 0,
    Medium,
    High,
}

struct PriorityLevel {
    current_candidate_index: usize,
    candidates: Vec<usize>,
}

pub struct PriorityRoundRobin<P>
where
    P: Copy + Default + Ord,
{
    priority_map: BTreeMap<P, PriorityLevel>,
}

impl<P> PriorityRoundRobin<P>
where
    P: Copy + Default + Ord,
{
    #[must_use]
    pub fn new(num_inputs: usize) -> Self {
        Self::from_vec(&vec![P::default(); num_inputs])
    }

    pub fn from_priorities(priority_vec: Vec<P>, num_inputs: usize) -> Result<Self, SimError> {
        if priority_vec.len() != num_inputs {
            return sim_error!("The number of priorities must be equal to the number of inputs");
        }
        Ok(Self::from_vec(&priority_vec))
    }

    fn from_vec(priority_vec: &[P]) -> Self {
        let mut priority_map = BTreeMap::new();
        for (i, priority) in priority_vec.iter().enumerate() {
            priority_map
                .entry(*priority)
                .and_modify(|e: &mut PriorityLevel| {
                    e.candidates.push(i);
                })
                .or_insert(PriorityLevel {
                    current_candidate_index: 0,
                    candidates: Vec::from([i]),
                });
        }
        Self { priority_map }
    }
}

impl<P> Arbitrate for PriorityRoundRobin<P>
where
    P: Copy + Default + Ord,
{
    fn arbitrate(&mut self, _entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        for priority_level in self.priority_map.values_mut().rev() {
            let candidates = &priority_level.candidates;
            let num_inputs = candidates.len();
            for i in 0..num_inputs {
                let priority_index = (i + priority_level.current_candidate_index) % num_inputs;
                let input_index = candidates[priority_index];
                if requests[input_index] {
                    priority_level.current_candidate_index = (priority_index + 1) % num_inputs;
                    return Some(input_index);
                }
            }
        }
        None
    }
}
