// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Address decoding.
//!
//! An [`AddressMap`] is an ordered list of [`AddrRule`]s. Rules may overlap,
//! in which case the earliest rule wins. Addresses not covered by any rule go
//! to the [`DefaultRoute`] when it is enabled and otherwise fail to decode.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use xbar_engine::sim_error;
use xbar_engine::types::SimError;

/// Map the addresses `[start, end)` to `target`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddrRule {
    pub start: u64,
    pub end: u64,
    pub target: usize,
}

impl AddrRule {
    #[must_use]
    pub fn new(start: u64, end: u64, target: usize) -> Self {
        Self { start, end, target }
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

impl fmt::Display for AddrRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}) -> {}", self.start, self.end, self.target)
    }
}

/// Where addresses that match no rule are sent.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DefaultRoute {
    pub enable: bool,
    pub target: usize,
}

impl DefaultRoute {
    #[must_use]
    pub fn enabled(target: usize) -> Self {
        Self {
            enable: true,
            target,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// The outcome of decoding an address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decode {
    /// Matched a rule.
    Rule(usize),

    /// Matched no rule and the default route is enabled.
    Default(usize),

    /// Matched no rule and there is no default route.
    Miss,
}

impl Decode {
    /// The selected target, if any.
    #[must_use]
    pub fn target(&self) -> Option<usize> {
        match self {
            Decode::Rule(t) | Decode::Default(t) => Some(*t),
            Decode::Miss => None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_error()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Decode::Miss)
    }
}

impl fmt::Display for Decode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Decode::Rule(t) => write!(f, "rule -> {t}"),
            Decode::Default(t) => write!(f, "default -> {t}"),
            Decode::Miss => write!(f, "miss"),
        }
    }
}

pub struct AddressMap {
    rules: Vec<AddrRule>,
    num_targets: usize,
}

impl AddressMap {
    /// Create a map after checking every rule is well formed.
    pub fn new(rules: Vec<AddrRule>, num_targets: usize) -> Result<Self, SimError> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.start >= rule.end {
                return sim_error!("Rule {i} {rule} is empty");
            }
            if rule.target >= num_targets {
                return sim_error!("Rule {i} {rule} targets a port >= {num_targets}");
            }
        }
        Ok(Self { rules, num_targets })
    }

    /// Decode an address. The first matching rule wins.
    #[must_use]
    pub fn decode(&self, addr: u64, default: DefaultRoute) -> Decode {
        match self.rules.iter().find(|rule| rule.contains(addr)) {
            Some(rule) => Decode::Rule(rule.target),
            None if default.enable => Decode::Default(default.target),
            None => Decode::Miss,
        }
    }

    #[must_use]
    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn num_targets(&self) -> usize {
        self.num_targets
    }

    pub fn rules(&self) -> impl Iterator<Item = &AddrRule> {
        self.rules.iter()
    }
}

/// The routing state used by a demultiplexer.
///
/// A snapshot is never modified. New routing state is installed by replacing
/// the whole snapshot.
#[derive(Clone)]
pub struct RouteSnapshot {
    pub map: Rc<AddressMap>,
    pub default: DefaultRoute,
}

impl RouteSnapshot {
    #[must_use]
    pub fn new(map: Rc<AddressMap>, default: DefaultRoute) -> Self {
        Self { map, default }
    }

    #[must_use]
    pub fn decode(&self, addr: u64) -> Decode {
        self.map.decode(addr, self.default)
    }

    /// A copy of this snapshot with a different default route.
    #[must_use]
    pub fn with_default(&self, default: DefaultRoute) -> Self {
        Self {
            map: self.map.clone(),
            default,
        }
    }
}
