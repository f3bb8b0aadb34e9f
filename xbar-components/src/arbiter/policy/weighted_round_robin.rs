// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Weighted Round Robin policy
//!
//! An input keeps the grant until it has been granted `weight` times in a row
//! or stops requesting.

use std::rc::Rc;

use xbar_engine::sim_error;
use xbar_engine::types::SimError;
use xbar_track::entity::Entity;
use xbar_track::trace;

use crate::arbiter::Arbitrate;

pub struct WeightedRoundRobin {
    candidate: usize,
    grants: Vec<usize>,
    weights: Vec<usize>,
}

impl WeightedRoundRobin {
    pub fn new(weights: Vec<usize>, num_inputs: usize) -> Result<Self, SimError> {
        if weights.len() != num_inputs {
            return sim_error!("The number of weights must be equal to the number of inputs");
        }
        if weights.contains(&0) {
            return sim_error!("Weights must be non-zero");
        }

        Ok(Self {
            candidate: 0,
            grants: vec![0; weights.len()],
            weights,
        })
    }

    pub fn state_str(&self, requests: &[bool]) -> String {
        let mut s = String::new();
        s.push_str(format!("{}: ", self.candidate).as_str());
        for (i, grant) in self.grants.iter().enumerate() {
            let req = if requests[i] { "r" } else { "-" };
            s.push_str(format!("{}/{}/{}, ", req, grant, self.weights[i]).as_str());
        }
        s
    }
}

impl Arbitrate for WeightedRoundRobin {
    fn arbitrate(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        trace!(entity ; "wrr: arbitrate {}", self.state_str(requests));

        let num_inputs = requests.len();
        for i in 0..num_inputs {
            let index = (i + self.candidate) % num_inputs;
            if !requests[index] {
                self.grants[index] = 0;
                continue;
            }

            self.grants[index] += 1;
            if self.grants[index] >= self.weights[index] {
                self.grants[index] = 0;
                self.candidate = (index + 1) % num_inputs;
            } else {
                self.candidate = index;
            }
            return Some(index);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use xbar_track::entity::toplevel;
    use xbar_track::tracker::dev_null_tracker;

    use super::*;

    #[test]
    fn weights_are_honoured() {
        let top = toplevel(&dev_null_tracker(), "top");
        let mut policy = WeightedRoundRobin::new(vec![3, 1], 2).unwrap();
        let grants: Vec<usize> = (0..8)
            .map(|_| policy.arbitrate(&top, &[true, true]).unwrap())
            .collect();
        assert_eq!(grants, vec![0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn bad_weights() {
        assert!(WeightedRoundRobin::new(vec![1], 2).is_err());
        assert!(WeightedRoundRobin::new(vec![1, 0], 2).is_err());
    }
}
