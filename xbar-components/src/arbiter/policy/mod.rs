// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

pub mod fixed_priority;
pub mod priority_round_robin;
pub mod round_robin;
pub mod weighted_round_robin;

pub use fixed_priority::FixedPriority;
pub use priority_round_robin::{Priority, PriorityRoundRobin};
pub use round_robin::RoundRobin;
pub use weighted_round_robin::WeightedRoundRobin;
